use crate::common::{correlated_design, poisson_response, true_params};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

const CONFIG: &str = r#"
[data]
response = "y"
offset = "exposure"
add_intercept = true

[model]
family = "poisson"

[penalty]
kind = "scad-smoothed"
tau = 0.1

[fit]
method = "newton"
cov_type = "HC0"
trim = true
trim_threshold = 1e-3
"#;

fn write_inputs(dir: &Path) {
    let exog = correlated_design(300, 6, 3);
    let endog = poisson_response(&exog, &true_params(6, 0.4), 4);
    let mut text = String::from("y\tx1\tx2\tx3\tx4\tx5\texposure\n");
    for (row, y) in exog.rows().into_iter().zip(endog.iter()) {
        write!(text, "{y}").unwrap();
        for value in row.iter().skip(1) {
            write!(text, "\t{value}").unwrap();
        }
        text.push_str("\t0.0\n");
    }
    fs::write(dir.join("data.tsv"), text).unwrap();
    fs::write(dir.join("run.toml"), CONFIG).unwrap();
}

#[test]
fn fit_writes_a_labelled_toml_report() {
    let tmp = tempdir().unwrap();
    write_inputs(tmp.path());

    let exe = env!("CARGO_BIN_EXE_penlik");
    let status = Command::new(exe)
        .current_dir(tmp.path())
        .args(["fit", "data.tsv", "--config", "run.toml", "--output", "result.toml"])
        .status()
        .expect("run penlik fit");
    assert!(status.success());

    let text = fs::read_to_string(tmp.path().join("result.toml")).unwrap();
    let report: toml::Value = toml::from_str(&text).unwrap();
    assert_eq!(report["method"].as_str(), Some("newton"));
    assert_eq!(report["cov_type"].as_str(), Some("HC0"));
    assert_eq!(report["nobs"].as_integer(), Some(300));

    let coefficients = report["coefficients"].as_array().unwrap();
    assert_eq!(coefficients.len(), 6);
    assert_eq!(coefficients[0]["name"].as_str(), Some("const"));
    assert_eq!(coefficients[5]["name"].as_str(), Some("x5"));
    assert!(report["cov_kwds"]["description"].as_str().unwrap().contains("HC0"));
}

#[test]
fn check_derivatives_reports_discrepancies() {
    let tmp = tempdir().unwrap();
    write_inputs(tmp.path());

    let exe = env!("CARGO_BIN_EXE_penlik");
    let output = Command::new(exe)
        .current_dir(tmp.path())
        .args(["check-derivatives", "data.tsv", "--config", "run.toml", "--shrink", "0.95"])
        .output()
        .expect("run penlik check-derivatives");
    assert!(output.status.success());

    let report: toml::Value = toml::from_str(&String::from_utf8_lossy(&output.stdout)).unwrap();
    assert_eq!(report["shrink"].as_float(), Some(0.95));
    let score_error = report["max_abs_score_error"].as_float().unwrap();
    assert!(score_error.is_finite() && score_error >= 0.0);
    assert!(report["max_rel_hessian_error"].as_float().unwrap().is_finite());
}

#[test]
fn missing_response_column_fails_with_a_message() {
    let tmp = tempdir().unwrap();
    write_inputs(tmp.path());
    fs::write(
        tmp.path().join("run.toml"),
        CONFIG.replace("response = \"y\"", "response = \"count\""),
    )
    .unwrap();

    let exe = env!("CARGO_BIN_EXE_penlik");
    let output = Command::new(exe)
        .current_dir(tmp.path())
        .args(["fit", "data.tsv", "--config", "run.toml"])
        .output()
        .expect("run penlik fit");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error:"));
    assert!(stderr.contains("count"));
}
