use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Crate source directories; anything else under the root is not ours to police.
const SOURCE_DIRS: [&str; 4] = ["penalized", "src", "tests", "benches"];

/// A line-level source policy. `pattern` preselects candidate lines and
/// `violates` decides whether a candidate really breaks the rule.
struct Rule {
    name: &'static str,
    pattern: &'static str,
    hint: &'static str,
    violates: fn(&str) -> bool,
    // The rules quote their own patterns, so only some may look at this file.
    scan_build_script: bool,
}

const RULES: [Rule; 4] = [
    Rule {
        name: "underscore-prefixed names",
        pattern: r"\b(_[a-zA-Z0-9_]+)\b",
        hint: "Use the binding under a plain name or remove it.",
        violates: names_underscore_binding,
        scan_build_script: true,
    },
    Rule {
        name: "edit-history comments",
        pattern: r"(//|/\*).*\b(FIXED|FIXES|FIX|CORRECTED|NEW|CHANGED|CHANGES|CHANGE|MODIFIED|MODIFIES|MODIFY|UPDATED|UPDATES|UPDATE)\b",
        hint: "Comments describe the code as it is, not how it got there.",
        violates: always,
        scan_build_script: false,
    },
    Rule {
        name: "all-caps comments",
        pattern: r"(//|/\*)",
        hint: "Write the comment in sentence case or delete it.",
        violates: is_all_caps_comment,
        scan_build_script: false,
    },
    Rule {
        name: "#[allow(dead_code)] attributes",
        pattern: r"#!?\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
        hint: "Use the item or remove it; the library denies dead code.",
        violates: always,
        scan_build_script: false,
    },
];

/// Collects the candidate lines of one file that `rule` rejects.
struct RuleMatches<'r> {
    rule: &'r Rule,
    lines: Vec<String>,
}

impl Sink for RuleMatches<'_> {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let text = String::from_utf8_lossy(mat.bytes());
        let line = text.trim_end();
        if (self.rule.violates)(line) {
            let number = mat.line_number().unwrap_or(0);
            self.lines.push(format!("{number}:{line}"));
        }
        Ok(true)
    }
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    if let Err(e) = check_sources() {
        // Shown in cargo's output before the build fails.
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn rust_sources() -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = SOURCE_DIRS
        .iter()
        .flat_map(|dir| WalkDir::new(dir).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
        .collect();
    files.push(PathBuf::from("build.rs"));
    files
}

fn is_build_script(path: &Path) -> bool {
    path == Path::new("build.rs")
}

/// Runs every rule over every source file and reports all violations at once.
fn check_sources() -> Result<(), Box<dyn Error>> {
    let sources = rust_sources();
    let mut searcher = Searcher::new();
    let mut report = String::new();

    for rule in &RULES {
        let matcher = RegexMatcher::new_line_matcher(rule.pattern)?;
        let targets = sources
            .iter()
            .filter(|path| rule.scan_build_script || !is_build_script(path));
        for path in targets {
            let mut matches = RuleMatches {
                rule,
                lines: Vec::new(),
            };
            searcher.search_path(&matcher, path, &mut matches)?;
            if matches.lines.is_empty() {
                continue;
            }
            writeln!(
                report,
                "\n❌ {} {} in {}:",
                matches.lines.len(),
                rule.name,
                path.display()
            )?;
            for line in &matches.lines {
                writeln!(report, "   {line}")?;
            }
            writeln!(report, "   {}", rule.hint)?;
        }
    }

    if report.is_empty() {
        Ok(())
    } else {
        Err(format!("Source policy violations:{report}").into())
    }
}

fn always(_: &str) -> bool {
    true
}

// Code before any line comment, with string literal contents removed.
fn code_outside_strings(line: &str) -> String {
    let code = line.split("//").next().unwrap_or(line);
    code.split('"').step_by(2).collect::<Vec<_>>().join(" ")
}

fn names_underscore_binding(line: &str) -> bool {
    code_outside_strings(line)
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .any(|token| token.len() > 1 && token.starts_with('_'))
}

fn comment_text(line: &str) -> Option<&str> {
    if let Some(start) = line.find("//") {
        return Some(line[start + 2..].trim_start_matches(['/', '!']));
    }
    let start = line.find("/*")?;
    let body = &line[start + 2..];
    Some(body.split("*/").next().unwrap_or(body))
}

fn is_all_caps_comment(line: &str) -> bool {
    let Some(text) = comment_text(line) else {
        return false;
    };
    let mut letters = text.chars().filter(|c| c.is_alphabetic()).peekable();
    letters.peek().is_some() && letters.all(char::is_uppercase)
}
