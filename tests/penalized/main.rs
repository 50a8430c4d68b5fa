//! Integration tests on simulated data, plus the command-line tool.

mod cli;
mod logit;
mod oracle;
mod poisson;
