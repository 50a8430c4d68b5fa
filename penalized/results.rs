use crate::estimate::EstimationError;
use crate::inference::{self, CovKwds, CovarianceStatus};
use crate::model::{CovType, FitMethod, LinkFunction};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, Normal};

/// The outcome of one `fit` call. Immutable once built.
#[derive(Debug, Clone)]
pub struct FitResult {
    pub(crate) params: Array1<f64>,
    pub(crate) cov_params: Array2<f64>,
    pub(crate) bse: Array1<f64>,
    pub(crate) tvalues: Array1<f64>,
    pub(crate) pvalues: Array1<f64>,
    pub(crate) cov_type: CovType,
    pub(crate) cov_kwds: CovKwds,
    pub(crate) covariance_status: CovarianceStatus,
    pub(crate) llf: f64,
    pub(crate) nobs: usize,
    pub(crate) method: FitMethod,
    pub(crate) iterations: usize,
    pub(crate) converged: bool,
    pub(crate) fitted_values: Array1<f64>,
    pub(crate) link: LinkFunction,
    pub(crate) trimmed: Option<TrimmedFit>,
}

/// The reduced refit behind a trimmed result.
#[derive(Debug, Clone)]
pub struct TrimmedFit {
    keep_index: Vec<usize>,
    constrained: Box<FitResult>,
}

impl FitResult {
    /// Builds the full-length result from a fit over the columns in `keep`.
    ///
    /// Parameters, covariance and standard errors are zero at the dropped
    /// positions, and test statistics there are NaN. The covariance type and
    /// its metadata are taken from the constrained fit.
    pub(crate) fn from_constrained(
        constrained: FitResult,
        keep_index: Vec<usize>,
        k_full: usize,
        llf: f64,
    ) -> Self {
        let params = inference::expand_params(&constrained.params, &keep_index, k_full);
        let cov_params = inference::expand_covariance(&constrained.cov_params, &keep_index, k_full);
        let bse = inference::standard_errors(&cov_params);
        let tvalues = inference::z_values(&params, &bse);
        let pvalues = inference::two_sided_pvalues(&tvalues);
        Self {
            params,
            cov_params,
            bse,
            tvalues,
            pvalues,
            cov_type: constrained.cov_type,
            cov_kwds: constrained.cov_kwds.clone(),
            covariance_status: constrained.covariance_status,
            llf,
            nobs: constrained.nobs,
            method: constrained.method,
            iterations: constrained.iterations,
            converged: constrained.converged,
            fitted_values: constrained.fitted_values.clone(),
            link: constrained.link,
            trimmed: Some(TrimmedFit {
                keep_index,
                constrained: Box::new(constrained),
            }),
        }
    }

    pub fn params(&self) -> &Array1<f64> {
        &self.params
    }

    pub fn bse(&self) -> &Array1<f64> {
        &self.bse
    }

    /// z-statistics `params / bse`.
    pub fn tvalues(&self) -> &Array1<f64> {
        &self.tvalues
    }

    pub fn pvalues(&self) -> &Array1<f64> {
        &self.pvalues
    }

    pub fn cov_params(&self) -> &Array2<f64> {
        &self.cov_params
    }

    /// Normal-theory confidence intervals, one `[lower, upper]` row per parameter.
    pub fn conf_int(&self, alpha: f64) -> Result<Array2<f64>, EstimationError> {
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(EstimationError::InvalidConfiguration(format!(
                "alpha must lie in (0, 1), but was {alpha}"
            )));
        }
        let normal = Normal::new(0.0, 1.0)
            .map_err(|e| EstimationError::InvalidConfiguration(e.to_string()))?;
        let q = normal.inverse_cdf(1.0 - alpha / 2.0);
        let mut bounds = Array2::zeros((self.params.len(), 2));
        for (i, (&p, &se)) in self.params.iter().zip(self.bse.iter()).enumerate() {
            bounds[[i, 0]] = p - q * se;
            bounds[[i, 1]] = p + q * se;
        }
        Ok(bounds)
    }

    /// Fitted mean for the estimation sample.
    pub fn predict(&self) -> &Array1<f64> {
        &self.fitted_values
    }

    /// Mean response for new rows of the full-length design.
    pub fn predict_exog(
        &self,
        exog: ArrayView2<f64>,
        offset: Option<ArrayView1<f64>>,
    ) -> Result<Array1<f64>, EstimationError> {
        if exog.ncols() != self.params.len() {
            return Err(EstimationError::DimensionMismatch {
                what: "prediction exog columns",
                expected: self.params.len(),
                found: exog.ncols(),
            });
        }
        let mut eta = exog.dot(&self.params);
        if let Some(offset) = offset {
            if offset.len() != exog.nrows() {
                return Err(EstimationError::DimensionMismatch {
                    what: "prediction offset",
                    expected: exog.nrows(),
                    found: offset.len(),
                });
            }
            eta += &offset;
        }
        let link = self.link;
        Ok(eta.mapv(|e| link.inverse(e)))
    }

    pub fn cov_type(&self) -> CovType {
        self.cov_type
    }

    pub fn cov_kwds(&self) -> &CovKwds {
        &self.cov_kwds
    }

    pub fn covariance_status(&self) -> CovarianceStatus {
        self.covariance_status
    }

    /// The reduced fit, when trimming dropped any coefficient.
    pub fn results_constrained(&self) -> Option<&FitResult> {
        self.trimmed.as_ref().map(|t| t.constrained.as_ref())
    }

    /// Indices of the coefficients that survived trimming.
    pub fn keep_index(&self) -> Option<&[usize]> {
        self.trimmed.as_ref().map(|t| t.keep_index.as_slice())
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    /// Log-likelihood of the fitted model's own objective (penalized if the model is).
    pub fn llf(&self) -> f64 {
        self.llf
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn method(&self) -> FitMethod {
        self.method
    }

    pub fn nobs(&self) -> usize {
        self.nobs
    }

    pub fn link(&self) -> LinkFunction {
        self.link
    }

    /// A serializable view of the result, with coefficients labelled by `names`.
    pub fn report(&self, names: &[String]) -> FitReport {
        let coefficients = (0..self.params.len())
            .map(|i| CoefficientRow {
                name: names.get(i).cloned().unwrap_or_else(|| format!("x{i}")),
                estimate: self.params[i],
                std_err: self.bse[i],
                z: self.tvalues[i],
                p_value: self.pvalues[i],
            })
            .collect();
        FitReport {
            method: self.method,
            converged: self.converged,
            iterations: self.iterations,
            nobs: self.nobs,
            llf: self.llf,
            cov_type: self.cov_type.name().to_string(),
            covariance_status: self.covariance_status,
            keep_index: self.keep_index().map(|k| k.to_vec()),
            cov_kwds: self.cov_kwds.clone(),
            coefficients,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CoefficientRow {
    pub name: String,
    pub estimate: f64,
    pub std_err: f64,
    pub z: f64,
    pub p_value: f64,
}

/// What the command-line tool writes out.
#[derive(Debug, Clone, Serialize)]
pub struct FitReport {
    pub method: FitMethod,
    pub converged: bool,
    pub iterations: usize,
    pub nobs: usize,
    pub llf: f64,
    pub cov_type: String,
    pub covariance_status: CovarianceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_index: Option<Vec<usize>>,
    pub cov_kwds: CovKwds,
    pub coefficients: Vec<CoefficientRow>,
}
