//! Unpenalized likelihood models.
//!
//! [`LikelihoodModel`] is the capability interface shared by the base models
//! and by [`crate::penalized::PenalizedModel`]. The optimizer, the covariance
//! layer and the numerical cross-checks only ever see this trait.

use crate::estimate::{self, EstimationError};
use crate::model::{DiscreteKind, Family, FitMethod, FitOptions, LinkFunction, softplus};
use crate::model::{normal_cdf, normal_pdf};
use crate::pirls::{self, IrlsResult};
use crate::results::FitResult;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_linalg::Solve;
use statrs::function::gamma::ln_gamma;

/// The likelihood machinery an estimator needs from a model.
pub trait LikelihoodModel {
    fn nobs(&self) -> usize;

    fn k_params(&self) -> usize;

    fn exog(&self) -> ArrayView2<'_, f64>;

    fn offset(&self) -> Option<ArrayView1<'_, f64>>;

    fn link(&self) -> LinkFunction;

    /// Dispersion that divides the log-likelihood. One unless the family
    /// has a free scale.
    fn scale(&self) -> f64 {
        1.0
    }

    fn loglike_obs(&self, params: ArrayView1<f64>) -> Array1<f64>;

    fn loglike(&self, params: ArrayView1<f64>) -> f64 {
        self.loglike_obs(params).sum()
    }

    /// Per-observation score, one row per observation.
    fn score_obs(&self, params: ArrayView1<f64>) -> Array2<f64>;

    fn score(&self, params: ArrayView1<f64>) -> Array1<f64> {
        self.score_obs(params).sum_axis(Axis(0))
    }

    fn hessian(&self, params: ArrayView1<f64>) -> Array2<f64>;

    fn linear_predictor(&self, params: ArrayView1<f64>) -> Array1<f64> {
        let mut eta = self.exog().dot(&params);
        if let Some(offset) = self.offset() {
            eta += &offset;
        }
        eta
    }

    fn predict(&self, params: ArrayView1<f64>) -> Array1<f64> {
        let link = self.link();
        self.linear_predictor(params).mapv(|eta| link.inverse(eta))
    }

    /// The same model over a subset of the design columns.
    fn select_columns(&self, keep: &[usize]) -> Result<Self, EstimationError>
    where
        Self: Sized;

    /// Runs at most `max_iterations` unpenalized IRLS iterations. `None` when
    /// the model has no IRLS solver.
    fn irls(
        &self,
        _: Option<ArrayView1<f64>>,
        _: usize,
        _: f64,
    ) -> Option<Result<IrlsResult, EstimationError>> {
        None
    }

    /// Start vector for the gradient optimizers when the caller gives none:
    /// a bounded IRLS warm start where available, zeros otherwise.
    fn start_params(&self, max_start_irls: usize, tolerance: f64) -> Array1<f64> {
        if max_start_irls > 0 {
            match self.irls(None, max_start_irls, tolerance) {
                Some(Ok(warm)) => {
                    log::debug!(
                        "IRLS warm start finished after {} iterations with deviance {:.8e}",
                        warm.iterations,
                        warm.deviance
                    );
                    return warm.beta;
                }
                Some(Err(e)) => {
                    log::warn!("IRLS warm start failed ({e}); starting from zeros");
                }
                None => {}
            }
        }
        Array1::zeros(self.k_params())
    }

    /// Whether `fit` may trim and refit this model.
    fn supports_trimming(&self) -> bool {
        false
    }

    fn describe(&self) -> String;
}

fn check_design(
    endog: &Array1<f64>,
    exog: &Array2<f64>,
) -> Result<(), EstimationError> {
    if endog.is_empty() {
        return Err(EstimationError::InvalidInput(
            "the response contains no observations".to_string(),
        ));
    }
    if exog.nrows() != endog.len() {
        return Err(EstimationError::DimensionMismatch {
            what: "exog rows",
            expected: endog.len(),
            found: exog.nrows(),
        });
    }
    if exog.ncols() == 0 {
        return Err(EstimationError::InvalidInput(
            "the design matrix has no columns".to_string(),
        ));
    }
    if endog.iter().chain(exog.iter()).any(|v| !v.is_finite()) {
        return Err(EstimationError::InvalidInput(
            "the response and design must be finite".to_string(),
        ));
    }
    Ok(())
}

fn check_offset(offset: &Array1<f64>, nobs: usize) -> Result<(), EstimationError> {
    if offset.len() != nobs {
        return Err(EstimationError::DimensionMismatch {
            what: "offset",
            expected: nobs,
            found: offset.len(),
        });
    }
    if offset.iter().any(|v| !v.is_finite()) {
        return Err(EstimationError::InvalidInput(
            "the offset must be finite".to_string(),
        ));
    }
    Ok(())
}

fn select_exog(exog: &Array2<f64>, keep: &[usize]) -> Result<Array2<f64>, EstimationError> {
    if keep.is_empty() {
        return Err(EstimationError::InvalidInput(
            "cannot select an empty set of columns".to_string(),
        ));
    }
    if let Some(&index) = keep.iter().find(|&&i| i >= exog.ncols()) {
        return Err(EstimationError::InvalidInput(format!(
            "column {index} is out of range for a design with {} columns",
            exog.ncols()
        )));
    }
    Ok(exog.select(Axis(1), keep))
}

/// `X' diag(w) X`.
pub(crate) fn weighted_cross_product(exog: ArrayView2<f64>, weights: &Array1<f64>) -> Array2<f64> {
    let weighted = &exog * &weights.view().insert_axis(Axis(1));
    exog.t().dot(&weighted)
}

/// Rows of `exog` scaled by `factors`.
fn scale_rows(exog: ArrayView2<f64>, factors: &Array1<f64>) -> Array2<f64> {
    &exog * &factors.view().insert_axis(Axis(1))
}

/// Poisson, Logit and Probit regression.
#[derive(Debug, Clone)]
pub struct DiscreteModel {
    kind: DiscreteKind,
    endog: Array1<f64>,
    exog: Array2<f64>,
    offset: Option<Array1<f64>>,
}

impl DiscreteModel {
    pub fn new(
        kind: DiscreteKind,
        endog: Array1<f64>,
        exog: Array2<f64>,
    ) -> Result<Self, EstimationError> {
        check_design(&endog, &exog)?;
        match kind {
            DiscreteKind::Poisson => {
                if endog.iter().any(|&y| y < 0.0) {
                    return Err(EstimationError::InvalidInput(
                        "Poisson responses must be non-negative".to_string(),
                    ));
                }
            }
            DiscreteKind::Logit | DiscreteKind::Probit => {
                if endog.iter().any(|&y| !(0.0..=1.0).contains(&y)) {
                    return Err(EstimationError::InvalidInput(
                        "binary responses must lie in [0, 1]".to_string(),
                    ));
                }
            }
        }
        Ok(Self {
            kind,
            endog,
            exog,
            offset: None,
        })
    }

    pub fn poisson(endog: Array1<f64>, exog: Array2<f64>) -> Result<Self, EstimationError> {
        Self::new(DiscreteKind::Poisson, endog, exog)
    }

    pub fn logit(endog: Array1<f64>, exog: Array2<f64>) -> Result<Self, EstimationError> {
        Self::new(DiscreteKind::Logit, endog, exog)
    }

    pub fn probit(endog: Array1<f64>, exog: Array2<f64>) -> Result<Self, EstimationError> {
        Self::new(DiscreteKind::Probit, endog, exog)
    }

    pub fn with_offset(mut self, offset: Array1<f64>) -> Result<Self, EstimationError> {
        check_offset(&offset, self.endog.len())?;
        self.offset = Some(offset);
        Ok(self)
    }

    pub fn kind(&self) -> DiscreteKind {
        self.kind
    }

    pub fn endog(&self) -> &Array1<f64> {
        &self.endog
    }

    /// Newton-Raphson, the usual choice for an unpenalized discrete model.
    pub fn default_fit_options() -> FitOptions {
        FitOptions::default().method(FitMethod::Newton).max_iter(35)
    }

    pub fn fit(&self, options: &FitOptions) -> Result<FitResult, EstimationError> {
        estimate::fit(self, options)
    }

    // Derivatives of each observation's log-likelihood with respect to its
    // linear predictor: (first, second).
    fn eta_derivatives(&self, eta: &Array1<f64>) -> (Array1<f64>, Array1<f64>) {
        let n = eta.len();
        let mut first = Array1::zeros(n);
        let mut second = Array1::zeros(n);
        for i in 0..n {
            let (y, e) = (self.endog[i], eta[i]);
            let (d1, d2) = match self.kind {
                DiscreteKind::Poisson => {
                    let mu = LinkFunction::Log.inverse(e);
                    (y - mu, -mu)
                }
                DiscreteKind::Logit => {
                    let p = LinkFunction::Logit.inverse(e);
                    (y - p, -p * (1.0 - p))
                }
                DiscreteKind::Probit => {
                    let density = normal_pdf(e);
                    let upper = normal_cdf(e).clamp(f64::EPSILON, 1.0 - f64::EPSILON);
                    let lower = normal_cdf(-e).clamp(f64::EPSILON, 1.0 - f64::EPSILON);
                    let ratio_up = density / upper;
                    let ratio_down = density / lower;
                    (
                        y * ratio_up - (1.0 - y) * ratio_down,
                        -y * ratio_up * (ratio_up + e) - (1.0 - y) * ratio_down * (ratio_down - e),
                    )
                }
            };
            first[i] = d1;
            second[i] = d2;
        }
        (first, second)
    }
}

impl LikelihoodModel for DiscreteModel {
    fn nobs(&self) -> usize {
        self.endog.len()
    }

    fn k_params(&self) -> usize {
        self.exog.ncols()
    }

    fn exog(&self) -> ArrayView2<'_, f64> {
        self.exog.view()
    }

    fn offset(&self) -> Option<ArrayView1<'_, f64>> {
        self.offset.as_ref().map(|o| o.view())
    }

    fn link(&self) -> LinkFunction {
        self.kind.link()
    }

    fn loglike_obs(&self, params: ArrayView1<f64>) -> Array1<f64> {
        let eta = self.linear_predictor(params);
        match self.kind {
            DiscreteKind::Poisson => ndarray::Zip::from(&self.endog)
                .and(&eta)
                .map_collect(|&y, &e| {
                    let e = e.clamp(-crate::model::MAX_ABS_ETA, crate::model::MAX_ABS_ETA);
                    -e.exp() + y * e - ln_gamma(y + 1.0)
                }),
            DiscreteKind::Logit => ndarray::Zip::from(&self.endog)
                .and(&eta)
                .map_collect(|&y, &e| y * e - softplus(e)),
            DiscreteKind::Probit => ndarray::Zip::from(&self.endog)
                .and(&eta)
                .map_collect(|&y, &e| {
                    let upper = normal_cdf(e).clamp(f64::EPSILON, 1.0);
                    let lower = normal_cdf(-e).clamp(f64::EPSILON, 1.0);
                    y * upper.ln() + (1.0 - y) * lower.ln()
                }),
        }
    }

    fn score_obs(&self, params: ArrayView1<f64>) -> Array2<f64> {
        let eta = self.linear_predictor(params);
        let (first, _) = self.eta_derivatives(&eta);
        scale_rows(self.exog.view(), &first)
    }

    fn score(&self, params: ArrayView1<f64>) -> Array1<f64> {
        let eta = self.linear_predictor(params);
        let (first, _) = self.eta_derivatives(&eta);
        self.exog.t().dot(&first)
    }

    fn hessian(&self, params: ArrayView1<f64>) -> Array2<f64> {
        let eta = self.linear_predictor(params);
        let (_, second) = self.eta_derivatives(&eta);
        weighted_cross_product(self.exog.view(), &second)
    }

    fn select_columns(&self, keep: &[usize]) -> Result<Self, EstimationError> {
        Ok(Self {
            kind: self.kind,
            endog: self.endog.clone(),
            exog: select_exog(&self.exog, keep)?,
            offset: self.offset.clone(),
        })
    }

    fn describe(&self) -> String {
        format!(
            "{:?} model ({} observations, {} parameters)",
            self.kind,
            self.endog.len(),
            self.exog.ncols()
        )
    }
}

/// Generalized linear model with a canonical link.
///
/// For the binomial family `endog` holds proportions and the trial counts act
/// as variance weights.
///
/// The Gaussian dispersion is estimated once, at construction, from the
/// unpenalized least-squares fit, unless fixed with [`GlmModel::with_scale`].
/// It is not re-estimated from the current mean at each evaluation, so the
/// penalized objective is `loglike - (w / s) * pen` with `s` constant during a
/// fit. Shrunken estimates can therefore differ from a fit whose scale tracks
/// the mean. Coefficients beyond the SCAD flat region are unaffected.
#[derive(Debug, Clone)]
pub struct GlmModel {
    family: Family,
    endog: Array1<f64>,
    exog: Array2<f64>,
    offset: Option<Array1<f64>>,
    var_weights: Array1<f64>,
    fixed_scale: Option<f64>,
    estimated_scale: f64,
}

impl GlmModel {
    pub fn new(
        endog: Array1<f64>,
        exog: Array2<f64>,
        family: Family,
    ) -> Result<Self, EstimationError> {
        check_design(&endog, &exog)?;
        match family {
            Family::Poisson => {
                if endog.iter().any(|&y| y < 0.0) {
                    return Err(EstimationError::InvalidInput(
                        "Poisson responses must be non-negative".to_string(),
                    ));
                }
            }
            Family::Binomial => {
                if endog.iter().any(|&y| !(0.0..=1.0).contains(&y)) {
                    return Err(EstimationError::InvalidInput(
                        "binomial responses must be proportions in [0, 1]".to_string(),
                    ));
                }
            }
            Family::Gaussian => {}
        }
        let n = endog.len();
        let mut model = Self {
            family,
            endog,
            exog,
            offset: None,
            var_weights: Array1::ones(n),
            fixed_scale: None,
            estimated_scale: 1.0,
        };
        model.refresh_scale()?;
        Ok(model)
    }

    /// Binomial model from success counts and trial counts.
    pub fn binomial_counts(
        successes: Array1<f64>,
        trials: Array1<f64>,
        exog: Array2<f64>,
    ) -> Result<Self, EstimationError> {
        if trials.len() != successes.len() {
            return Err(EstimationError::DimensionMismatch {
                what: "trials",
                expected: successes.len(),
                found: trials.len(),
            });
        }
        if trials.iter().any(|&t| !(t.is_finite() && t > 0.0)) {
            return Err(EstimationError::InvalidInput(
                "trial counts must be positive".to_string(),
            ));
        }
        let proportions = &successes / &trials;
        Self::new(proportions, exog, Family::Binomial)?.with_trials(trials)
    }

    pub fn with_offset(mut self, offset: Array1<f64>) -> Result<Self, EstimationError> {
        check_offset(&offset, self.endog.len())?;
        self.offset = Some(offset);
        self.refresh_scale()?;
        Ok(self)
    }

    /// Binomial trial counts per observation; `endog` stays a proportion.
    pub fn with_trials(mut self, trials: Array1<f64>) -> Result<Self, EstimationError> {
        if self.family != Family::Binomial {
            return Err(EstimationError::InvalidInput(
                "trial counts only apply to the binomial family".to_string(),
            ));
        }
        if trials.len() != self.endog.len() {
            return Err(EstimationError::DimensionMismatch {
                what: "trials",
                expected: self.endog.len(),
                found: trials.len(),
            });
        }
        if trials.iter().any(|&t| !(t.is_finite() && t > 0.0)) {
            return Err(EstimationError::InvalidInput(
                "trial counts must be positive".to_string(),
            ));
        }
        self.var_weights = trials;
        Ok(self)
    }

    pub fn with_scale(mut self, scale: f64) -> Result<Self, EstimationError> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(EstimationError::InvalidInput(format!(
                "the scale must be positive and finite, but was {scale}"
            )));
        }
        self.fixed_scale = Some(scale);
        Ok(self)
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn endog(&self) -> &Array1<f64> {
        &self.endog
    }

    pub fn var_weights(&self) -> &Array1<f64> {
        &self.var_weights
    }

    /// IRLS, the usual choice for an unpenalized GLM.
    pub fn default_fit_options() -> FitOptions {
        FitOptions::default().method(FitMethod::Irls)
    }

    pub fn fit(&self, options: &FitOptions) -> Result<FitResult, EstimationError> {
        estimate::fit(self, options)
    }

    // Pearson chi-square over residual degrees of freedom of the weighted
    // least-squares fit. Only the Gaussian family has a free scale.
    fn refresh_scale(&mut self) -> Result<(), EstimationError> {
        if !self.family.has_free_scale() {
            self.estimated_scale = 1.0;
            return Ok(());
        }
        let (n, k) = (self.exog.nrows(), self.exog.ncols());
        if n <= k {
            return Err(EstimationError::InvalidInput(format!(
                "estimating the Gaussian scale needs more observations ({n}) than parameters ({k})"
            )));
        }
        let target = match &self.offset {
            Some(offset) => &self.endog - offset,
            None => self.endog.clone(),
        };
        let xtwx = weighted_cross_product(self.exog.view(), &self.var_weights);
        let xtwy = self.exog.t().dot(&(&self.var_weights * &target));
        let beta = xtwx
            .solve_into(xtwy)
            .map_err(EstimationError::LinearSystemSolveFailed)?;
        let residuals = &target - &self.exog.dot(&beta);
        let pearson = (&residuals * &residuals * &self.var_weights).sum();
        let scale = pearson / (n - k) as f64;
        if !(scale.is_finite() && scale > 0.0) {
            return Err(EstimationError::InvalidInput(
                "the Gaussian response has no residual variation".to_string(),
            ));
        }
        self.estimated_scale = scale;
        Ok(())
    }

    /// Deviance at the mean `mu`.
    pub fn deviance(&self, mu: &Array1<f64>) -> f64 {
        pirls::calculate_deviance(self.endog.view(), mu, self.family, self.var_weights.view())
    }
}

impl LikelihoodModel for GlmModel {
    fn nobs(&self) -> usize {
        self.endog.len()
    }

    fn k_params(&self) -> usize {
        self.exog.ncols()
    }

    fn exog(&self) -> ArrayView2<'_, f64> {
        self.exog.view()
    }

    fn offset(&self) -> Option<ArrayView1<'_, f64>> {
        self.offset.as_ref().map(|o| o.view())
    }

    fn link(&self) -> LinkFunction {
        self.family.canonical_link()
    }

    fn scale(&self) -> f64 {
        self.fixed_scale.unwrap_or(self.estimated_scale)
    }

    fn loglike_obs(&self, params: ArrayView1<f64>) -> Array1<f64> {
        let eta = self.linear_predictor(params);
        let scale = self.scale();
        let family = self.family;
        ndarray::Zip::from(&self.endog)
            .and(&eta)
            .and(&self.var_weights)
            .map_collect(|&y, &e, &w| match family {
                Family::Poisson => {
                    let e = e.clamp(-crate::model::MAX_ABS_ETA, crate::model::MAX_ABS_ETA);
                    w * (y * e - e.exp() - ln_gamma(y + 1.0)) / scale
                }
                Family::Binomial => {
                    let successes = w * y;
                    let combinations = ln_gamma(w + 1.0)
                        - ln_gamma(successes + 1.0)
                        - ln_gamma(w - successes + 1.0);
                    (w * (y * e - softplus(e)) + combinations) / scale
                }
                Family::Gaussian => {
                    let resid = y - e;
                    -w * resid * resid / (2.0 * scale)
                        - 0.5 * (2.0 * std::f64::consts::PI * scale / w).ln()
                }
            })
    }

    fn score_obs(&self, params: ArrayView1<f64>) -> Array2<f64> {
        let mu = self.predict(params);
        let factors = (&self.endog - &mu) * &self.var_weights / self.scale();
        scale_rows(self.exog.view(), &factors)
    }

    fn score(&self, params: ArrayView1<f64>) -> Array1<f64> {
        let mu = self.predict(params);
        let factors = (&self.endog - &mu) * &self.var_weights / self.scale();
        self.exog.t().dot(&factors)
    }

    fn hessian(&self, params: ArrayView1<f64>) -> Array2<f64> {
        let mu = self.predict(params);
        let family = self.family;
        let scale = self.scale();
        let weights = ndarray::Zip::from(&mu)
            .and(&self.var_weights)
            .map_collect(|&m, &w| -w * family.variance(m) / scale);
        weighted_cross_product(self.exog.view(), &weights)
    }

    fn select_columns(&self, keep: &[usize]) -> Result<Self, EstimationError> {
        let mut reduced = Self {
            family: self.family,
            endog: self.endog.clone(),
            exog: select_exog(&self.exog, keep)?,
            offset: self.offset.clone(),
            var_weights: self.var_weights.clone(),
            fixed_scale: self.fixed_scale,
            estimated_scale: 1.0,
        };
        reduced.refresh_scale()?;
        Ok(reduced)
    }

    fn irls(
        &self,
        start: Option<ArrayView1<f64>>,
        max_iterations: usize,
        tolerance: f64,
    ) -> Option<Result<IrlsResult, EstimationError>> {
        Some(pirls::fit_irls(self, start, max_iterations, tolerance))
    }

    fn describe(&self) -> String {
        format!(
            "{:?} GLM ({} observations, {} parameters)",
            self.family,
            self.endog.len(),
            self.exog.ncols()
        )
    }
}
