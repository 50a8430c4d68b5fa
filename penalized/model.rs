use crate::penalty::{L2, Penalty, PenaltyError, Scad, ScadSmoothed};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

// --- Public Data Structures ---
// These types describe model families, estimation controls, and the TOML run
// configuration consumed by the command-line tool.

/// Defines the link function, connecting the linear predictor to the mean response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkFunction {
    /// The log link, for counts. Mean is `exp(eta)`.
    Log,
    /// The logit link, for binary or proportional outcomes.
    Logit,
    /// The probit link. Mean is the standard normal CDF of `eta`.
    Probit,
    /// The identity link, for continuous outcomes (e.g., Gaussian regression).
    Identity,
}

/// Largest absolute linear predictor passed to `exp`; keeps the mean finite.
pub const MAX_ABS_ETA: f64 = 700.0;

impl LinkFunction {
    /// Maps a linear predictor to the mean response.
    pub fn inverse(self, eta: f64) -> f64 {
        match self {
            LinkFunction::Log => eta.clamp(-MAX_ABS_ETA, MAX_ABS_ETA).exp(),
            LinkFunction::Logit => logistic(eta),
            LinkFunction::Probit => normal_cdf(eta),
            LinkFunction::Identity => eta,
        }
    }
}

/// Numerically stable logistic function.
pub fn logistic(eta: f64) -> f64 {
    if eta >= 0.0 {
        1.0 / (1.0 + (-eta).exp())
    } else {
        let e = eta.exp();
        e / (1.0 + e)
    }
}

/// `ln(1 + exp(eta))` without overflow.
pub fn softplus(eta: f64) -> f64 {
    if eta > 0.0 {
        eta + (-eta).exp().ln_1p()
    } else {
        eta.exp().ln_1p()
    }
}

/// Standard normal CDF.
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * statrs::function::erf::erfc(-x / std::f64::consts::SQRT_2)
}

/// Standard normal density.
pub fn normal_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

/// Exponential-family distributions supported by [`crate::base::GlmModel`].
/// Each family is paired with its canonical link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Poisson,
    Binomial,
    Gaussian,
}

impl Family {
    pub fn canonical_link(self) -> LinkFunction {
        match self {
            Family::Poisson => LinkFunction::Log,
            Family::Binomial => LinkFunction::Logit,
            Family::Gaussian => LinkFunction::Identity,
        }
    }

    /// Variance function `V(mu)`.
    pub fn variance(self, mu: f64) -> f64 {
        match self {
            Family::Poisson => mu,
            Family::Binomial => mu * (1.0 - mu),
            Family::Gaussian => 1.0,
        }
    }

    /// Starting linear predictor used by IRLS when no coefficient vector is
    /// available: a shrunken mean mapped through the canonical link.
    pub fn starting_eta(self, y: f64, y_mean: f64, trials: f64) -> f64 {
        match self {
            Family::Binomial => {
                let mu = (trials * y + 0.5) / (trials + 1.0);
                (mu / (1.0 - mu)).ln()
            }
            Family::Poisson => ((y + y_mean) / 2.0).ln(),
            Family::Gaussian => (y + y_mean) / 2.0,
        }
    }

    /// Whether the dispersion is estimated rather than fixed at one.
    pub fn has_free_scale(self) -> bool {
        matches!(self, Family::Gaussian)
    }
}

/// Discrete-choice and count models that are not parameterized through a GLM family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscreteKind {
    Poisson,
    Logit,
    Probit,
}

impl DiscreteKind {
    pub fn link(self) -> LinkFunction {
        match self {
            DiscreteKind::Poisson => LinkFunction::Log,
            DiscreteKind::Logit => LinkFunction::Logit,
            DiscreteKind::Probit => LinkFunction::Probit,
        }
    }
}

/// The optimizer used for the point estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FitMethod {
    /// Quasi-Newton minimization of the scaled negative log-likelihood.
    #[default]
    Bfgs,
    /// Damped Newton-Raphson on the analytic Hessian.
    Newton,
    /// Iteratively reweighted least squares. GLM base models only.
    Irls,
}

/// Which covariance estimator to report for the fitted coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum CovType {
    /// Inverse of the negative Hessian of the fitted objective.
    #[default]
    #[serde(rename = "nonrobust")]
    Nonrobust,
    /// White's heteroscedasticity-consistent sandwich estimator.
    #[serde(rename = "HC0")]
    HC0,
    /// HC0 with the `n / (n - k)` small-sample correction.
    #[serde(rename = "HC1")]
    HC1,
    /// Inverse negative Hessian multiplied by a user-supplied scale.
    #[serde(rename = "fixed_scale")]
    FixedScale(f64),
}

impl CovType {
    pub fn name(&self) -> &'static str {
        match self {
            CovType::Nonrobust => "nonrobust",
            CovType::HC0 => "HC0",
            CovType::HC1 => "HC1",
            CovType::FixedScale(_) => "fixed scale",
        }
    }
}

/// How the penalty weight is specified before it is resolved against the sample size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PenaltyWeight {
    /// Multiple of the number of observations; `PerObservation(1.0)` is the default.
    PerObservation(f64),
    /// Absolute weight, independent of the sample size.
    Absolute(f64),
}

impl Default for PenaltyWeight {
    fn default() -> Self {
        PenaltyWeight::PerObservation(1.0)
    }
}

impl PenaltyWeight {
    pub fn resolve(self, nobs: usize) -> f64 {
        match self {
            PenaltyWeight::PerObservation(factor) => factor * nobs as f64,
            PenaltyWeight::Absolute(weight) => weight,
        }
    }
}

/// Default coefficient magnitude below which trimming drops a coefficient.
pub const DEFAULT_TRIM_THRESHOLD: f64 = 1e-4;

/// Estimation controls shared by base-model and penalized fits.
#[derive(Debug, Clone, PartialEq)]
pub struct FitOptions {
    pub method: FitMethod,
    pub max_iter: usize,
    /// Gradient-norm tolerance for BFGS, step tolerance for Newton, relative
    /// deviance tolerance for IRLS.
    pub tolerance: f64,
    pub cov_type: CovType,
    /// Trim threshold; `None` disables trimming.
    pub trim: Option<f64>,
    /// Verbosity. Zero keeps progress messages at debug level.
    pub disp: u8,
    pub start_params: Option<Array1<f64>>,
    /// IRLS iterations used to warm-start gradient methods on GLM base models.
    pub max_start_irls: usize,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            method: FitMethod::Bfgs,
            max_iter: 100,
            tolerance: 1e-8,
            cov_type: CovType::Nonrobust,
            trim: None,
            disp: 0,
            start_params: None,
            max_start_irls: 3,
        }
    }
}

impl FitOptions {
    pub fn method(mut self, method: FitMethod) -> Self {
        self.method = method;
        self
    }

    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn cov_type(mut self, cov_type: CovType) -> Self {
        self.cov_type = cov_type;
        self
    }

    /// Enables trimming at [`DEFAULT_TRIM_THRESHOLD`] or disables it.
    pub fn trim(mut self, trim: bool) -> Self {
        self.trim = trim.then_some(DEFAULT_TRIM_THRESHOLD);
        self
    }

    pub fn trim_threshold(mut self, threshold: f64) -> Self {
        self.trim = Some(threshold);
        self
    }

    pub fn disp(mut self, disp: u8) -> Self {
        self.disp = disp;
        self
    }

    pub fn start_params(mut self, start: Array1<f64>) -> Self {
        self.start_params = Some(start);
        self
    }

    pub fn max_start_irls(mut self, iterations: usize) -> Self {
        self.max_start_irls = iterations;
        self
    }
}

/// Custom error type for reading the run configuration.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

// --- TOML run configuration ---

/// Which base model the command-line tool builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ModelFamily {
    #[default]
    Poisson,
    Logit,
    Probit,
    GlmPoisson,
    GlmBinomial,
    GlmGaussian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PenaltyKind {
    #[default]
    ScadSmoothed,
    Scad,
    L2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSection {
    pub response: String,
    pub offset: Option<String>,
    /// Binomial trial counts; the response then holds success counts.
    pub trials: Option<String>,
    pub add_intercept: bool,
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            response: "y".to_string(),
            offset: None,
            trials: None,
            add_intercept: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ModelSection {
    pub family: ModelFamily,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PenaltySection {
    pub kind: PenaltyKind,
    pub tau: f64,
    pub c: f64,
    pub c0: f64,
    /// Weight as a multiple of the number of observations.
    pub weight_factor: f64,
    /// Absolute weight; overrides `weight_factor` when present.
    pub weight: Option<f64>,
}

impl Default for PenaltySection {
    fn default() -> Self {
        Self {
            kind: PenaltyKind::ScadSmoothed,
            tau: 0.1,
            c: 3.7,
            c0: 1e-4,
            weight_factor: 1.0,
            weight: None,
        }
    }
}

impl PenaltySection {
    pub fn to_penalty(&self) -> Result<Penalty, PenaltyError> {
        Ok(match self.kind {
            PenaltyKind::ScadSmoothed => {
                Penalty::ScadSmoothed(ScadSmoothed::with_params(self.tau, self.c, self.c0)?)
            }
            PenaltyKind::Scad => Penalty::Scad(Scad::with_params(self.tau, self.c)?),
            PenaltyKind::L2 => Penalty::L2(L2::new()),
        })
    }

    pub fn to_weight(&self) -> PenaltyWeight {
        match self.weight {
            Some(weight) => PenaltyWeight::Absolute(weight),
            None => PenaltyWeight::PerObservation(self.weight_factor),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FitSection {
    pub method: FitMethod,
    pub max_iter: usize,
    pub tolerance: f64,
    pub cov_type: CovType,
    pub trim: bool,
    pub trim_threshold: f64,
    pub disp: u8,
    pub max_start_irls: usize,
}

impl Default for FitSection {
    fn default() -> Self {
        let defaults = FitOptions::default();
        Self {
            method: defaults.method,
            max_iter: defaults.max_iter,
            tolerance: defaults.tolerance,
            cov_type: defaults.cov_type,
            trim: false,
            trim_threshold: DEFAULT_TRIM_THRESHOLD,
            disp: defaults.disp,
            max_start_irls: defaults.max_start_irls,
        }
    }
}

impl FitSection {
    pub fn to_options(&self) -> FitOptions {
        FitOptions {
            method: self.method,
            max_iter: self.max_iter,
            tolerance: self.tolerance,
            cov_type: self.cov_type,
            trim: self.trim.then_some(self.trim_threshold),
            disp: self.disp,
            start_params: None,
            max_start_irls: self.max_start_irls,
        }
    }
}

/// The complete run configuration read from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RunConfig {
    pub data: DataSection,
    pub model: ModelSection,
    pub penalty: PenaltySection,
    pub fit: FitSection,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}
