//! Coefficient covariance and the statistics derived from it.

use crate::base::LikelihoodModel;
use crate::estimate::EstimationError;
use crate::model::CovType;
use ndarray::{Array1, Array2, ArrayView1};
use ndarray_linalg::{Cholesky, Eigh, Inverse, UPLO};
use serde::{Deserialize, Serialize};

/// How `(-H)^-1` was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CovarianceStatus {
    /// `-H` was positive definite and inverted exactly.
    Exact,
    /// `-H` was not positive definite; an eigenvalue-truncated pseudo-inverse was used.
    PseudoInverse,
}

/// Metadata describing the reported covariance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovKwds {
    pub description: String,
    pub adjust_df: bool,
    pub use_t: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scaling_factor: Option<f64>,
}

impl CovKwds {
    pub fn for_cov_type(cov_type: &CovType) -> Self {
        let (description, scaling_factor) = match cov_type {
            CovType::Nonrobust => (
                "Standard Errors assume that the covariance matrix of the errors is correctly specified."
                    .to_string(),
                None,
            ),
            CovType::HC0 => (
                "Standard Errors are heteroscedasticity robust (HC0)".to_string(),
                None,
            ),
            CovType::HC1 => (
                "Standard Errors are heteroscedasticity robust (HC1)".to_string(),
                None,
            ),
            CovType::FixedScale(scale) => (
                "Standard Errors are based on fixed scale".to_string(),
                Some(*scale),
            ),
        };
        Self {
            description,
            adjust_df: false,
            use_t: false,
            scaling_factor,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Covariance {
    pub matrix: Array2<f64>,
    pub status: CovarianceStatus,
}

/// Covariance of the estimates at `params` for the requested estimator.
///
/// All estimators start from the inverse of the negative Hessian of the
/// model's own objective, so for a penalized model the penalty curvature is
/// included. The sandwich variants use the per-observation scores as the meat.
pub fn compute_covariance<M: LikelihoodModel + ?Sized>(
    model: &M,
    params: ArrayView1<f64>,
    cov_type: &CovType,
) -> Result<Covariance, EstimationError> {
    let neg_hessian = -model.hessian(params);
    let (bread, status) = invert_information(&neg_hessian)?;

    let matrix = match cov_type {
        CovType::Nonrobust => bread,
        CovType::FixedScale(scale) => bread * *scale,
        CovType::HC0 | CovType::HC1 => {
            let scores = model.score_obs(params);
            let meat = scores.t().dot(&scores);
            let mut sandwich = bread.dot(&meat).dot(&bread);
            if *cov_type == CovType::HC1 {
                let (n, k) = (model.nobs() as f64, model.k_params() as f64);
                sandwich *= n / (n - k);
            }
            sandwich
        }
    };

    Ok(Covariance {
        matrix: symmetrize(matrix),
        status,
    })
}

/// Inverts `-H`, falling back to a pseudo-inverse when it is not positive definite.
pub fn invert_information(
    neg_hessian: &Array2<f64>,
) -> Result<(Array2<f64>, CovarianceStatus), EstimationError> {
    if neg_hessian.cholesky(UPLO::Lower).is_ok() {
        let inverse = neg_hessian
            .inv()
            .map_err(EstimationError::LinearSystemSolveFailed)?;
        if inverse.iter().all(|v| v.is_finite()) {
            return Ok((inverse, CovarianceStatus::Exact));
        }
    }
    log::warn!(
        "Negative Hessian is not positive definite; using an eigenvalue-truncated pseudo-inverse for the covariance"
    );
    let inverse = pseudo_inverse(neg_hessian)?;
    Ok((inverse, CovarianceStatus::PseudoInverse))
}

// Keeps only directions of positive curvature.
fn pseudo_inverse(matrix: &Array2<f64>) -> Result<Array2<f64>, EstimationError> {
    let (eigvals, eigvecs) = matrix
        .eigh(UPLO::Lower)
        .map_err(EstimationError::EigendecompositionFailed)?;
    let largest = eigvals.iter().fold(0.0_f64, |acc, &v| acc.max(v));
    let cutoff = 1e-9 * largest.max(1.0);
    let mut d_plus = Array1::zeros(eigvals.len());
    for (i, &eig) in eigvals.iter().enumerate() {
        if eig > cutoff {
            d_plus[i] = 1.0 / eig;
        }
    }
    Ok(eigvecs.dot(&Array2::from_diag(&d_plus)).dot(&eigvecs.t()))
}

fn symmetrize(matrix: Array2<f64>) -> Array2<f64> {
    let transposed = matrix.t().to_owned();
    (matrix + transposed) * 0.5
}

pub fn standard_errors(cov: &Array2<f64>) -> Array1<f64> {
    cov.diag().mapv(|v| v.max(0.0).sqrt())
}

/// `params / bse`, NaN where the standard error is zero.
pub fn z_values(params: &Array1<f64>, bse: &Array1<f64>) -> Array1<f64> {
    ndarray::Zip::from(params)
        .and(bse)
        .map_collect(|&p, &se| if se > 0.0 { p / se } else { f64::NAN })
}

/// Two-sided p-values under the standard normal.
pub fn two_sided_pvalues(z: &Array1<f64>) -> Array1<f64> {
    z.mapv(|v| {
        if v.is_finite() {
            statrs::function::erf::erfc(v.abs() / std::f64::consts::SQRT_2)
        } else {
            f64::NAN
        }
    })
}

/// Scatters reduced coefficients back to `k_full` positions, zero elsewhere.
pub fn expand_params(reduced: &Array1<f64>, keep: &[usize], k_full: usize) -> Array1<f64> {
    let mut full = Array1::zeros(k_full);
    for (&index, &value) in keep.iter().zip(reduced.iter()) {
        full[index] = value;
    }
    full
}

/// Scatters a reduced covariance back to `k_full x k_full`, zero elsewhere.
pub fn expand_covariance(reduced: &Array2<f64>, keep: &[usize], k_full: usize) -> Array2<f64> {
    let mut full = Array2::zeros((k_full, k_full));
    for (i, &row) in keep.iter().enumerate() {
        for (j, &col) in keep.iter().enumerate() {
            full[[row, col]] = reduced[[i, j]];
        }
    }
    full
}
