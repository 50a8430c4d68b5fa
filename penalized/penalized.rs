//! Penalized maximum likelihood.
//!
//! [`PenalizedModel`] wraps any [`LikelihoodModel`] and subtracts a weighted
//! penalty from its log-likelihood. With `w` the absolute penalty weight, `s`
//! the base model's scale and `n` the number of observations:
//!
//! ```text
//! loglike(p)        = loglike_base(p)        - (w / s) * pen(p)
//! loglike_obs(p)[i] = loglike_obs_base(p)[i] - (w / (s * n)) * pen(p)
//! score(p)          = score_base(p)          - (w / s) * pen'(p)
//! hessian(p)        = hessian_base(p)        - (w / s) * diag(pen''(p))
//! ```
//!
//! Fitting optionally trims coefficients whose magnitude falls below a
//! threshold and refits the model restricted to the survivors.

use crate::base::LikelihoodModel;
use crate::estimate::{self, EstimationError};
use crate::inference;
use crate::model::{FitOptions, LinkFunction, PenaltyWeight};
use crate::penalty::{Penalty, PenaltyFunction};
use crate::results::FitResult;
use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// A base model combined with a penalty on its coefficients.
#[derive(Debug, Clone)]
pub struct PenalizedModel<M> {
    base: M,
    penalty: Penalty,
    pen_weight: f64,
}

/// Validating builder for [`PenalizedModel`].
#[derive(Debug, Clone)]
pub struct PenalizedModelBuilder<M> {
    base: M,
    penalty: Penalty,
    weight: PenaltyWeight,
}

impl<M: LikelihoodModel> PenalizedModelBuilder<M> {
    pub fn penalty(mut self, penalty: Penalty) -> Self {
        self.penalty = penalty;
        self
    }

    pub fn pen_weight(mut self, weight: PenaltyWeight) -> Self {
        self.weight = weight;
        self
    }

    pub fn build(self) -> Result<PenalizedModel<M>, EstimationError> {
        let pen_weight = self.weight.resolve(self.base.nobs());
        if !(pen_weight.is_finite() && pen_weight >= 0.0) {
            return Err(EstimationError::InvalidConfiguration(format!(
                "penalty weight must be finite and non-negative, but resolved to {pen_weight}"
            )));
        }
        self.penalty.check_dimension(self.base.k_params())?;
        Ok(PenalizedModel {
            base: self.base,
            penalty: self.penalty,
            pen_weight,
        })
    }
}

impl<M: LikelihoodModel> PenalizedModel<M> {
    /// Starts from the default penalty and a weight equal to the number of observations.
    pub fn builder(base: M) -> PenalizedModelBuilder<M> {
        PenalizedModelBuilder {
            base,
            penalty: Penalty::default(),
            weight: PenaltyWeight::default(),
        }
    }

    pub fn base(&self) -> &M {
        &self.base
    }

    pub fn penalty(&self) -> &Penalty {
        &self.penalty
    }

    /// The resolved absolute weight.
    pub fn pen_weight(&self) -> f64 {
        self.pen_weight
    }

    pub fn fit(&self, options: &FitOptions) -> Result<FitResult, EstimationError> {
        estimate::fit(self, options)
    }

    // Multiplier of the penalty in the total log-likelihood.
    fn penalty_factor(&self) -> f64 {
        self.pen_weight / self.base.scale()
    }

    fn is_penalized(&self) -> bool {
        self.pen_weight != 0.0
    }
}

impl<M: LikelihoodModel> LikelihoodModel for PenalizedModel<M> {
    fn nobs(&self) -> usize {
        self.base.nobs()
    }

    fn k_params(&self) -> usize {
        self.base.k_params()
    }

    fn exog(&self) -> ArrayView2<'_, f64> {
        self.base.exog()
    }

    fn offset(&self) -> Option<ArrayView1<'_, f64>> {
        self.base.offset()
    }

    fn link(&self) -> LinkFunction {
        self.base.link()
    }

    fn scale(&self) -> f64 {
        self.base.scale()
    }

    fn loglike(&self, params: ArrayView1<f64>) -> f64 {
        let mut llf = self.base.loglike(params);
        if self.is_penalized() {
            llf -= self.penalty_factor() * self.penalty.func(params);
        }
        llf
    }

    fn loglike_obs(&self, params: ArrayView1<f64>) -> Array1<f64> {
        let mut llf = self.base.loglike_obs(params);
        if self.is_penalized() {
            let per_obs = self.penalty_factor() / self.nobs() as f64;
            llf -= per_obs * self.penalty.func(params);
        }
        llf
    }

    fn score(&self, params: ArrayView1<f64>) -> Array1<f64> {
        let mut score = self.base.score(params);
        if self.is_penalized() {
            score.scaled_add(-self.penalty_factor(), &self.penalty.deriv(params));
        }
        score
    }

    fn score_obs(&self, params: ArrayView1<f64>) -> Array2<f64> {
        let mut scores = self.base.score_obs(params);
        if self.is_penalized() {
            let per_obs = self.penalty_factor() / self.nobs() as f64;
            let gradient = self.penalty.deriv(params);
            for mut row in scores.rows_mut() {
                row.scaled_add(-per_obs, &gradient);
            }
        }
        scores
    }

    fn hessian(&self, params: ArrayView1<f64>) -> Array2<f64> {
        let mut hessian = self.base.hessian(params);
        if self.is_penalized() {
            let curvature = self.penalty.deriv2(params);
            let factor = self.penalty_factor();
            for (i, value) in curvature.iter().enumerate() {
                hessian[[i, i]] -= factor * value;
            }
        }
        hessian
    }

    fn linear_predictor(&self, params: ArrayView1<f64>) -> Array1<f64> {
        self.base.linear_predictor(params)
    }

    fn predict(&self, params: ArrayView1<f64>) -> Array1<f64> {
        self.base.predict(params)
    }

    /// Restricts the base model and the penalty; the absolute weight is kept.
    fn select_columns(&self, keep: &[usize]) -> Result<Self, EstimationError> {
        Ok(Self {
            base: self.base.select_columns(keep)?,
            penalty: self.penalty.restrict(keep)?,
            pen_weight: self.pen_weight,
        })
    }

    // IRLS cannot optimize the penalty, so only the warm start reaches the base solver.
    fn start_params(&self, max_start_irls: usize, tolerance: f64) -> Array1<f64> {
        self.base.start_params(max_start_irls, tolerance)
    }

    fn supports_trimming(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!(
            "penalized {} ({} penalty, weight {})",
            self.base.describe(),
            self.penalty.name(),
            self.pen_weight
        )
    }
}

/// Drops coefficients with `|b| < threshold` from `full` and refits the
/// restricted model from the surviving values.
///
/// Returns `full` unchanged when nothing is dropped.
pub(crate) fn trim_and_refit<M: LikelihoodModel>(
    model: &M,
    full: FitResult,
    threshold: f64,
    options: &FitOptions,
) -> Result<FitResult, EstimationError> {
    let params = full.params();
    let (keep, dropped): (Vec<usize>, Vec<usize>) =
        (0..params.len()).partition(|&i| params[i].abs() >= threshold);

    if dropped.is_empty() {
        log::info!("No coefficient is below the trim threshold {threshold:e}");
        return Ok(full);
    }
    if keep.is_empty() {
        return Err(EstimationError::AllCoefficientsTrimmed { threshold });
    }
    log::info!(
        "Trimming {} coefficients below {threshold:e} at indices [{}]; refitting {} columns",
        dropped.len(),
        dropped.iter().join(", "),
        keep.len()
    );

    let reduced = model.select_columns(&keep)?;
    let start: Array1<f64> = keep.iter().map(|&i| params[i]).collect();
    let refit_options = FitOptions {
        trim: None,
        start_params: Some(start),
        ..options.clone()
    };
    let constrained = estimate::fit_single_stage(&reduced, &refit_options)?;

    let k_full = model.k_params();
    let expanded = inference::expand_params(constrained.params(), &keep, k_full);
    let llf = model.loglike(expanded.view());
    Ok(FitResult::from_constrained(constrained, keep, k_full, llf))
}
