//! Finite-difference derivatives of `loglike`, for validating analytic
//! scores and Hessians. Never used while fitting.

use crate::base::LikelihoodModel;
use ndarray::{Array1, Array2, ArrayView1};

/// Smallest scale used when building relative step sizes.
const MIN_STEP_SCALE: f64 = 0.1;

fn step_sizes(params: ArrayView1<f64>, root: f64) -> Array1<f64> {
    let base = f64::EPSILON.powf(1.0 / root);
    params.mapv(|p| base * p.abs().max(MIN_STEP_SCALE))
}

/// Centered first differences of `loglike` with steps `eps^(1/3) * max(|p|, 0.1)`.
pub fn score_numdiff<M: LikelihoodModel + ?Sized>(model: &M, params: ArrayView1<f64>) -> Array1<f64> {
    let h = step_sizes(params, 3.0);
    let mut grad = Array1::zeros(params.len());
    let mut shifted = params.to_owned();
    for i in 0..params.len() {
        shifted[i] = params[i] + h[i];
        let forward = model.loglike(shifted.view());
        shifted[i] = params[i] - h[i];
        let backward = model.loglike(shifted.view());
        shifted[i] = params[i];
        grad[i] = (forward - backward) / (2.0 * h[i]);
    }
    grad
}

/// Four-point second differences of `loglike` with steps `eps^(1/4) * max(|p|, 0.1)`.
///
/// Entry `(i, j)` is
/// `[f(x+e_i+e_j) - f(x+e_i-e_j) - f(x-e_i+e_j) + f(x-e_i-e_j)] / (4 h_i h_j)`.
pub fn hessian_numdiff<M: LikelihoodModel + ?Sized>(model: &M, params: ArrayView1<f64>) -> Array2<f64> {
    let k = params.len();
    let h = step_sizes(params, 4.0);
    let mut hess = Array2::zeros((k, k));
    let evaluate = |i: usize, si: f64, j: usize, sj: f64| -> f64 {
        let mut point = params.to_owned();
        point[i] += si * h[i];
        point[j] += sj * h[j];
        model.loglike(point.view())
    };
    for i in 0..k {
        for j in i..k {
            let value = (evaluate(i, 1.0, j, 1.0) - evaluate(i, 1.0, j, -1.0)
                - (evaluate(i, -1.0, j, 1.0) - evaluate(i, -1.0, j, -1.0)))
                / (4.0 * h[i] * h[j]);
            hess[[i, j]] = value;
            hess[[j, i]] = value;
        }
    }
    hess
}
