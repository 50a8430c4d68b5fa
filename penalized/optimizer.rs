//! Minimizers for the scaled negative log-likelihood `-loglike(p) / nobs`.

use crate::base::LikelihoodModel;
use crate::estimate::EstimationError;
use crate::model::FitMethod;
use ndarray::{Array1, Array2};
use ndarray_linalg::{Cholesky, Solve, UPLO};
use std::cell::Cell;
use wolfe_bfgs::{Bfgs, BfgsError};

/// Cost reported to the line search when the objective is not finite.
const NON_FINITE_COST: f64 = 1e10;
/// Maximum number of Newton step halvings per iteration.
const MAX_STEP_HALVINGS: usize = 30;
/// A stalled line search still counts as converged below this gradient norm.
const STALLED_GRADIENT_TOLERANCE: f64 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerControls {
    pub max_iter: usize,
    pub tolerance: f64,
    pub disp: u8,
}

impl OptimizerControls {
    fn progress_level(&self) -> log::Level {
        if self.disp > 0 {
            log::Level::Info
        } else {
            log::Level::Debug
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimizerOutcome {
    pub params: Array1<f64>,
    /// Final value of `-loglike / nobs`.
    pub objective: f64,
    pub iterations: usize,
    pub converged: bool,
    /// Euclidean norm of the scaled gradient at `params`.
    pub gradient_norm: f64,
}

pub fn minimize<M: LikelihoodModel + ?Sized>(
    model: &M,
    start: Array1<f64>,
    method: FitMethod,
    controls: &OptimizerControls,
) -> Result<OptimizerOutcome, EstimationError> {
    let nobs = model.nobs() as f64;
    let initial = -model.loglike(start.view()) / nobs;
    if !initial.is_finite() {
        return Err(EstimationError::OptimizationFailed(format!(
            "Initial objective is not finite: {initial}. Cannot start the optimizer."
        )));
    }
    log::log!(
        controls.progress_level(),
        "Starting {method:?} optimization of {} from objective {initial:.8}",
        model.describe()
    );
    match method {
        FitMethod::Bfgs => run_bfgs(model, start, controls),
        FitMethod::Newton => run_newton(model, start, controls),
        FitMethod::Irls => Err(EstimationError::InvalidConfiguration(
            "IRLS is not a gradient optimizer; use the model's IRLS solver".to_string(),
        )),
    }
}

fn scaled_gradient_norm<M: LikelihoodModel + ?Sized>(model: &M, params: &Array1<f64>) -> f64 {
    let nobs = model.nobs() as f64;
    let score = model.score(params.view());
    score.dot(&score).sqrt() / nobs
}

fn run_bfgs<M: LikelihoodModel + ?Sized>(
    model: &M,
    start: Array1<f64>,
    controls: &OptimizerControls,
) -> Result<OptimizerOutcome, EstimationError> {
    let nobs = model.nobs() as f64;
    let evaluations = Cell::new(0usize);
    let cost_and_grad = |params: &Array1<f64>| -> (f64, Array1<f64>) {
        evaluations.set(evaluations.get() + 1);
        let cost = -model.loglike(params.view()) / nobs;
        let grad = model.score(params.view()).mapv(|g| -g / nobs);
        if !cost.is_finite() || grad.iter().any(|g| !g.is_finite()) {
            log::warn!("Non-finite objective encountered: {cost}, returning large finite value");
            return (NON_FINITE_COST, Array1::zeros(params.len()));
        }
        log::trace!("BFGS evaluation #{}: objective {cost:.10}", evaluations.get());
        (cost, grad)
    };

    let solver = Bfgs::new(start, cost_and_grad)
        .with_tolerance(controls.tolerance)
        .with_max_iterations(controls.max_iter);

    let (solution, converged) = match solver.run() {
        Ok(solution) => (solution, true),
        Err(BfgsError::LineSearchFailed { last_solution, .. }) => {
            let converged = last_solution.final_gradient_norm <= STALLED_GRADIENT_TOLERANCE;
            log::debug!(
                "BFGS line search stopped early with gradient norm {:.3e}; using best-so-far parameters",
                last_solution.final_gradient_norm
            );
            (*last_solution, converged)
        }
        Err(BfgsError::MaxIterationsReached { last_solution }) => {
            log::debug!(
                "BFGS hit the iteration cap with gradient norm {:.3e}",
                last_solution.final_gradient_norm
            );
            (*last_solution, false)
        }
        Err(e) => {
            return Err(EstimationError::OptimizationFailed(format!(
                "BFGS failed with a critical error: {e:?}"
            )));
        }
    };

    log::log!(
        controls.progress_level(),
        "BFGS finished after {} iterations ({} evaluations) with objective {:.10}",
        solution.iterations,
        evaluations.get(),
        solution.final_value
    );

    let gradient_norm = scaled_gradient_norm(model, &solution.final_point);
    Ok(OptimizerOutcome {
        params: solution.final_point,
        objective: solution.final_value,
        iterations: solution.iterations,
        converged,
        gradient_norm,
    })
}

/// Newton direction `(-H)^-1 g` when `-H` is positive definite, otherwise a
/// gradient step scaled by the largest diagonal curvature.
fn ascent_direction(
    neg_hessian: &Array2<f64>,
    score: &Array1<f64>,
) -> Result<Array1<f64>, EstimationError> {
    if neg_hessian.cholesky(UPLO::Lower).is_ok() {
        return neg_hessian
            .solve(score)
            .map_err(EstimationError::LinearSystemSolveFailed);
    }
    let curvature = neg_hessian
        .diag()
        .iter()
        .fold(1.0_f64, |acc, v| acc.max(v.abs()));
    log::debug!("Negative Hessian is not positive definite; taking a scaled gradient step");
    Ok(score / curvature)
}

fn run_newton<M: LikelihoodModel + ?Sized>(
    model: &M,
    start: Array1<f64>,
    controls: &OptimizerControls,
) -> Result<OptimizerOutcome, EstimationError> {
    let nobs = model.nobs() as f64;
    let mut params = start;
    let mut loglike = model.loglike(params.view());
    let mut converged = false;
    let mut iterations = 0;

    for iter in 1..=controls.max_iter {
        iterations = iter;
        let score = model.score(params.view());
        let neg_hessian = -model.hessian(params.view());
        let direction = ascent_direction(&neg_hessian, &score)?;
        let full_step_size = direction.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));

        let mut step = direction;
        let mut trial = &params + &step;
        let mut trial_loglike = model.loglike(trial.view());
        let mut step_halving_count = 0;
        while (!trial_loglike.is_finite() || trial_loglike < loglike)
            && step_halving_count < MAX_STEP_HALVINGS
        {
            step *= 0.5;
            trial = &params + &step;
            trial_loglike = model.loglike(trial.view());
            step_halving_count += 1;
        }

        if !trial_loglike.is_finite() || trial_loglike < loglike {
            // No ascent left within rounding of the current point.
            converged = full_step_size < controls.tolerance.sqrt();
            log::debug!(
                "Newton iteration #{iter}: no improving step after {step_halving_count} halvings"
            );
            break;
        }

        let change = step.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        params = trial;
        loglike = trial_loglike;
        log::log!(
            controls.progress_level(),
            "Newton iteration #{iter}: objective {:.10}, max step {change:.3e}",
            -loglike / nobs
        );

        if change < controls.tolerance {
            converged = true;
            break;
        }
    }

    let gradient_norm = scaled_gradient_norm(model, &params);
    Ok(OptimizerOutcome {
        params,
        objective: -loglike / nobs,
        iterations,
        converged,
        gradient_norm,
    })
}
