use crate::base::{GlmModel, LikelihoodModel, weighted_cross_product};
use crate::estimate::EstimationError;
use crate::model::Family;
use ndarray::{Array1, ArrayView1};
use ndarray_linalg::Solve;

/// The status of the IRLS iterations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IrlsStatus {
    /// Relative deviance change fell below the tolerance.
    Converged,
    /// Ran out of iterations. Expected for a bounded warm start.
    MaxIterationsReached,
}

/// Outcome of an unpenalized IRLS run on a GLM.
#[derive(Clone, Debug)]
pub struct IrlsResult {
    pub beta: Array1<f64>,
    /// Deviance at `beta`. For the Gaussian family this is the weighted RSS.
    pub deviance: f64,
    pub iterations: usize,
    pub status: IrlsStatus,
}

/// Maximum number of step halvings before an IRLS update is abandoned.
const MAX_STEP_HALVINGS: usize = 30;

/// Iteratively reweighted least squares for a canonical-link GLM.
///
/// Starts from `start` when given, otherwise from the family's starting mean.
/// Each update solves `X'WX beta = X'W z` and is halved toward the previous
/// coefficients until the deviance does not increase (mgcv-style).
pub fn fit_irls(
    model: &GlmModel,
    start: Option<ArrayView1<f64>>,
    max_iterations: usize,
    tolerance: f64,
) -> Result<IrlsResult, EstimationError> {
    if max_iterations == 0 {
        return Err(EstimationError::InvalidConfiguration(
            "IRLS needs at least one iteration".to_string(),
        ));
    }
    let family = model.family();
    let link = family.canonical_link();
    let y = model.endog().view();
    let prior_weights = model.var_weights().view();
    let x = model.exog();
    let offset = match model.offset() {
        Some(o) => o.to_owned(),
        None => Array1::zeros(model.nobs()),
    };

    let (mut beta_current, mut eta) = match start {
        Some(beta) => {
            let eta = x.dot(&beta) + &offset;
            (Some(beta.to_owned()), eta)
        }
        None => {
            let y_mean = y.mean().unwrap_or(0.0);
            let eta = ndarray::Zip::from(y)
                .and(prior_weights)
                .map_collect(|&yi, &wi| family.starting_eta(yi, y_mean, wi));
            (None, eta)
        }
    };
    let mut mu = eta.mapv(|e| link.inverse(e));
    let mut last_deviance = calculate_deviance(y, &mu, family, prior_weights);

    for iter in 1..=max_iterations {
        let (weights, z) = update_glm_vectors(y, &eta, &mu, family, prior_weights);
        let working_response = &z - &offset;
        let xtwx = weighted_cross_product(x, &weights);
        let xtwz = x.t().dot(&(&weights * &working_response));
        let mut beta_trial = xtwx
            .solve_into(xtwz)
            .map_err(EstimationError::LinearSystemSolveFailed)?;

        if !beta_trial.iter().all(|v| v.is_finite()) {
            log::error!("Non-finite IRLS coefficients at iteration {iter}");
            return Err(EstimationError::IrlsDidNotConverge {
                max_iterations,
                last_change: f64::NAN,
            });
        }

        let mut eta_trial = x.dot(&beta_trial) + &offset;
        let mut mu_trial = eta_trial.mapv(|e| link.inverse(e));
        let mut deviance_trial = calculate_deviance(y, &mu_trial, family, prior_weights);

        // mgcv-style step halving toward the previous coefficients
        if let Some(previous) = &beta_current {
            let mut step_halving_count = 0;
            while (!deviance_trial.is_finite() || deviance_trial > last_deviance)
                && step_halving_count < MAX_STEP_HALVINGS
            {
                beta_trial = previous + &(0.5 * (&beta_trial - previous));
                eta_trial = x.dot(&beta_trial) + &offset;
                mu_trial = eta_trial.mapv(|e| link.inverse(e));
                deviance_trial = calculate_deviance(y, &mu_trial, family, prior_weights);
                step_halving_count += 1;
            }
            if step_halving_count > 0 {
                log::debug!(
                    "IRLS iteration #{iter}: step halved {step_halving_count} times, deviance {deviance_trial:.8e}"
                );
            }
        }

        if !deviance_trial.is_finite() {
            log::warn!("IRLS failed to find a finite deviance at iteration {iter}");
            return Err(EstimationError::IrlsDidNotConverge {
                max_iterations,
                last_change: f64::INFINITY,
            });
        }

        let deviance_change = (last_deviance - deviance_trial).abs() / (deviance_trial.abs() + 0.1);
        log::debug!(
            "IRLS iteration #{iter}: deviance {deviance_trial:.8e}, relative change {deviance_change:.3e}"
        );

        beta_current = Some(beta_trial);
        eta = eta_trial;
        mu = mu_trial;
        last_deviance = deviance_trial;

        if deviance_change < tolerance {
            return Ok(IrlsResult {
                beta: beta_current.unwrap_or_else(|| Array1::zeros(model.k_params())),
                deviance: last_deviance,
                iterations: iter,
                status: IrlsStatus::Converged,
            });
        }
    }

    log::debug!("IRLS stopped after {max_iterations} iterations without meeting the tolerance");
    Ok(IrlsResult {
        beta: beta_current.unwrap_or_else(|| Array1::zeros(model.k_params())),
        deviance: last_deviance,
        iterations: max_iterations,
        status: IrlsStatus::MaxIterationsReached,
    })
}

/// Working weights and working response for a canonical link.
///
/// With a canonical link `dmu/deta = V(mu)`, so the weights are
/// `prior * V(mu)` and `z = eta + (y - mu) / V(mu)`. The response still
/// contains the offset.
pub fn update_glm_vectors(
    y: ArrayView1<f64>,
    eta: &Array1<f64>,
    mu: &Array1<f64>,
    family: Family,
    prior_weights: ArrayView1<f64>,
) -> (Array1<f64>, Array1<f64>) {
    const MIN_WEIGHT: f64 = 1e-10;
    const PROB_EPS: f64 = 1e-8;

    let mut weights = Array1::zeros(y.len());
    let mut z = Array1::zeros(y.len());
    for i in 0..y.len() {
        let mu_i = match family {
            Family::Binomial => mu[i].clamp(PROB_EPS, 1.0 - PROB_EPS),
            Family::Poisson => mu[i].max(PROB_EPS),
            Family::Gaussian => mu[i],
        };
        let variance = family.variance(mu_i);
        weights[i] = (prior_weights[i] * variance).max(MIN_WEIGHT);
        z[i] = eta[i] + (y[i] - mu_i) / variance;
    }
    (weights, z)
}

/// GLM deviance of `mu` against `y`.
pub fn calculate_deviance(
    y: ArrayView1<f64>,
    mu: &Array1<f64>,
    family: Family,
    prior_weights: ArrayView1<f64>,
) -> f64 {
    const EPS: f64 = 1e-8;
    match family {
        Family::Binomial => {
            let total_residual = ndarray::Zip::from(y)
                .and(mu)
                .and(prior_weights)
                .fold(0.0, |acc, &yi, &mui, &wi| {
                    let mui_c = mui.clamp(EPS, 1.0 - EPS);
                    let term1 = if yi > 0.0 {
                        yi * (yi.ln() - mui_c.ln())
                    } else {
                        0.0
                    };
                    let term2 = if yi < 1.0 {
                        (1.0 - yi) * ((1.0 - yi).ln() - (1.0 - mui_c).ln())
                    } else {
                        0.0
                    };
                    acc + wi * (term1 + term2)
                });
            2.0 * total_residual
        }
        Family::Poisson => {
            let total_residual = ndarray::Zip::from(y)
                .and(mu)
                .and(prior_weights)
                .fold(0.0, |acc, &yi, &mui, &wi| {
                    let mui_c = mui.max(EPS);
                    let log_ratio = if yi > 0.0 {
                        yi * (yi.ln() - mui_c.ln())
                    } else {
                        0.0
                    };
                    acc + wi * (log_ratio - (yi - mui_c))
                });
            2.0 * total_residual
        }
        Family::Gaussian => ndarray::Zip::from(y)
            .and(mu)
            .and(prior_weights)
            .map_collect(|&yi, &mui, &wi| wi * (yi - mui) * (yi - mui))
            .sum(),
    }
}
