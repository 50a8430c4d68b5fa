//! # Model Estimation
//!
//! The single fitting routine shared by the base models and the penalized
//! model. Every fit follows the same sequence:
//!
//! 1. Validate the options against the model's dimensions.
//! 2. Choose a start vector: the caller's, an IRLS warm start for GLM bases,
//!    or zeros.
//! 3. Run the optimizer (BFGS or Newton), or the model's IRLS solver.
//! 4. Compute the covariance at the optimum and assemble an immutable
//!    [`FitResult`].
//!
//! Trimming of small coefficients and the reduced refit are layered on top for
//! models that support it (see [`crate::penalized`]).

use crate::base::LikelihoodModel;
use crate::inference::{self, CovKwds};
use crate::model::{CovType, FitMethod, FitOptions};
use crate::optimizer::{self, OptimizerControls, OptimizerOutcome};
use crate::penalized;
use crate::penalty::PenaltyError;
use crate::pirls::IrlsStatus;
use crate::results::FitResult;
use ndarray::Array1;
use thiserror::Error;

/// A comprehensive error type for the model estimation process.
#[derive(Error, Debug)]
pub enum EstimationError {
    #[error("Invalid input data: {0}")]
    InvalidInput(String),

    #[error("Invalid fit configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Dimension mismatch for {what}: expected {expected}, found {found}.")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Invalid penalty: {0}")]
    Penalty(#[from] PenaltyError),

    #[error("A linear system solve failed. The Hessian may be singular. Error: {0}")]
    LinearSystemSolveFailed(ndarray_linalg::error::LinalgError),

    #[error("Eigendecomposition failed: {0}")]
    EigendecompositionFailed(ndarray_linalg::error::LinalgError),

    #[error(
        "IRLS did not converge within {max_iterations} iterations. Last deviance change was {last_change:.6e}."
    )]
    IrlsDidNotConverge {
        max_iterations: usize,
        last_change: f64,
    },

    #[error("Optimization failed: {0}")]
    OptimizationFailed(String),

    #[error("Every coefficient is below the trim threshold {threshold:e}; nothing is left to refit.")]
    AllCoefficientsTrimmed { threshold: f64 },
}

/// Fits `model`, trimming and refitting when `options.trim` is set.
pub fn fit<M: LikelihoodModel>(model: &M, options: &FitOptions) -> Result<FitResult, EstimationError> {
    if options.trim.is_some() && !model.supports_trimming() {
        return Err(EstimationError::InvalidConfiguration(format!(
            "trimming is only available for penalized models, not for {}",
            model.describe()
        )));
    }
    let full = fit_single_stage(model, options)?;
    match options.trim {
        Some(threshold) => penalized::trim_and_refit(model, full, threshold, options),
        None => Ok(full),
    }
}

/// One optimization plus covariance, ignoring `options.trim`.
pub(crate) fn fit_single_stage<M: LikelihoodModel>(
    model: &M,
    options: &FitOptions,
) -> Result<FitResult, EstimationError> {
    validate_options(model, options)?;
    log::info!(
        "Fitting {} with {:?} (max {} iterations, {} covariance)",
        model.describe(),
        options.method,
        options.max_iter,
        options.cov_type.name()
    );

    let outcome = match options.method {
        FitMethod::Irls => run_irls(model, options)?,
        method => {
            let start = match &options.start_params {
                Some(start) => start.clone(),
                None => model.start_params(options.max_start_irls, options.tolerance),
            };
            let controls = OptimizerControls {
                max_iter: options.max_iter,
                tolerance: options.tolerance,
                disp: options.disp,
            };
            optimizer::minimize(model, start, method, &controls)?
        }
    };

    if outcome.converged {
        log::info!(
            "Converged after {} iterations (objective {:.10}, gradient norm {:.3e})",
            outcome.iterations,
            outcome.objective,
            outcome.gradient_norm
        );
    } else {
        log::warn!(
            "{:?} did not converge within {} iterations (gradient norm {:.3e}); returning the last iterate",
            options.method,
            options.max_iter,
            outcome.gradient_norm
        );
    }

    assemble_result(model, outcome, options)
}

fn run_irls<M: LikelihoodModel>(
    model: &M,
    options: &FitOptions,
) -> Result<OptimizerOutcome, EstimationError> {
    let start = options.start_params.as_ref().map(|s| s.view());
    let irls = model
        .irls(start, options.max_iter, options.tolerance)
        .ok_or_else(|| {
            EstimationError::InvalidConfiguration(format!(
                "IRLS is not available for {}",
                model.describe()
            ))
        })??;
    let nobs = model.nobs() as f64;
    let objective = -model.loglike(irls.beta.view()) / nobs;
    let score = model.score(irls.beta.view());
    Ok(OptimizerOutcome {
        objective,
        iterations: irls.iterations,
        converged: irls.status == IrlsStatus::Converged,
        gradient_norm: score.dot(&score).sqrt() / nobs,
        params: irls.beta,
    })
}

fn validate_options<M: LikelihoodModel>(model: &M, options: &FitOptions) -> Result<(), EstimationError> {
    if options.max_iter == 0 {
        return Err(EstimationError::InvalidConfiguration(
            "max_iter must be at least 1".to_string(),
        ));
    }
    if !(options.tolerance.is_finite() && options.tolerance > 0.0) {
        return Err(EstimationError::InvalidConfiguration(format!(
            "tolerance must be positive and finite, but was {}",
            options.tolerance
        )));
    }
    if let Some(threshold) = options.trim {
        if !(threshold.is_finite() && threshold > 0.0) {
            return Err(EstimationError::InvalidConfiguration(format!(
                "trim threshold must be positive and finite, but was {threshold}"
            )));
        }
    }
    if let Some(start) = &options.start_params {
        if start.len() != model.k_params() {
            return Err(EstimationError::DimensionMismatch {
                what: "start_params",
                expected: model.k_params(),
                found: start.len(),
            });
        }
        if start.iter().any(|v| !v.is_finite()) {
            return Err(EstimationError::InvalidConfiguration(
                "start_params must be finite".to_string(),
            ));
        }
    }
    match options.cov_type {
        CovType::FixedScale(scale) if !(scale.is_finite() && scale > 0.0) => {
            Err(EstimationError::InvalidConfiguration(format!(
                "fixed covariance scale must be positive and finite, but was {scale}"
            )))
        }
        CovType::HC1 if model.nobs() <= model.k_params() => {
            Err(EstimationError::InvalidConfiguration(format!(
                "HC1 needs more observations ({}) than parameters ({})",
                model.nobs(),
                model.k_params()
            )))
        }
        _ => Ok(()),
    }
}

fn assemble_result<M: LikelihoodModel>(
    model: &M,
    outcome: OptimizerOutcome,
    options: &FitOptions,
) -> Result<FitResult, EstimationError> {
    let params: Array1<f64> = outcome.params;
    let covariance = inference::compute_covariance(model, params.view(), &options.cov_type)?;
    let bse = inference::standard_errors(&covariance.matrix);
    let tvalues = inference::z_values(&params, &bse);
    let pvalues = inference::two_sided_pvalues(&tvalues);
    let llf = model.loglike(params.view());
    let fitted_values = model.predict(params.view());

    Ok(FitResult {
        cov_kwds: CovKwds::for_cov_type(&options.cov_type),
        cov_type: options.cov_type,
        covariance_status: covariance.status,
        cov_params: covariance.matrix,
        params,
        bse,
        tvalues,
        pvalues,
        llf,
        nobs: model.nobs(),
        method: options.method,
        iterations: outcome.iterations,
        converged: outcome.converged,
        fitted_values,
        link: model.link(),
        trimmed: None,
    })
}
