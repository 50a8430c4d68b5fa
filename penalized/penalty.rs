//! Penalty functions on the coefficient vector.
//!
//! Every penalty is separable: its value is a sum over coefficients and its
//! Hessian is diagonal. Optional per-coefficient weights multiply each term;
//! a zero weight leaves that coefficient unpenalized.

use ndarray::{Array1, Array2, ArrayView1};
use thiserror::Error;

/// Default SCAD shape parameter.
pub const DEFAULT_SCAD_C: f64 = 3.7;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PenaltyError {
    #[error("The penalty threshold tau must be positive and finite, but was {0}.")]
    InvalidTau(f64),

    #[error("The SCAD shape parameter c must be finite and greater than 2, but was {0}.")]
    InvalidShape(f64),

    #[error("The smoothing threshold c0 = {c0} must lie in (0, tau = {tau}].")]
    InvalidSmoothing { c0: f64, tau: f64 },

    #[error("Penalty weights must be finite and non-negative.")]
    InvalidWeights,

    #[error("Penalty weights have length {found}, but the parameter vector has length {expected}.")]
    WeightLengthMismatch { expected: usize, found: usize },

    #[error("Cannot restrict the penalty to index {index}; it only has {len} weights.")]
    RestrictionOutOfRange { index: usize, len: usize },
}

/// Value, gradient and Hessian of a penalty at one parameter vector.
#[derive(Debug, Clone, PartialEq)]
pub struct PenaltyEvaluation {
    pub value: f64,
    pub grad: Array1<f64>,
    pub hess: Array2<f64>,
}

/// A separable penalty on the coefficient vector.
///
/// # Panics
///
/// Weighted penalties panic when evaluated on a vector whose length differs
/// from their weights. [`Penalty::check_dimension`] reports the mismatch as an
/// error instead and runs whenever a penalized model is built.
pub trait PenaltyFunction {
    fn func(&self, params: ArrayView1<f64>) -> f64;

    fn deriv(&self, params: ArrayView1<f64>) -> Array1<f64>;

    /// Diagonal of the Hessian.
    fn deriv2(&self, params: ArrayView1<f64>) -> Array1<f64>;

    fn hessian(&self, params: ArrayView1<f64>) -> Array2<f64> {
        Array2::from_diag(&self.deriv2(params))
    }

    fn evaluate(&self, params: ArrayView1<f64>) -> PenaltyEvaluation {
        PenaltyEvaluation {
            value: self.func(params),
            grad: self.deriv(params),
            hess: self.hessian(params),
        }
    }
}

fn validate_weights(weights: &Array1<f64>) -> Result<(), PenaltyError> {
    if weights.iter().all(|w| w.is_finite() && *w >= 0.0) {
        Ok(())
    } else {
        Err(PenaltyError::InvalidWeights)
    }
}

fn coefficient_weights(weights: Option<&Array1<f64>>, len: usize) -> Array1<f64> {
    match weights {
        Some(w) => {
            assert_eq!(
                w.len(),
                len,
                "penalty has {} weights but was evaluated on {len} coefficients",
                w.len()
            );
            w.clone()
        }
        None => Array1::ones(len),
    }
}

// Applies `f` to each coefficient and scales the result by its weight.
fn weighted(
    weights: Option<&Array1<f64>>,
    params: ArrayView1<f64>,
    f: impl Fn(f64) -> f64,
) -> Array1<f64> {
    let mut out = coefficient_weights(weights, params.len());
    out.zip_mut_with(&params, |w, &b| *w *= f(b));
    out
}

fn restrict_weights(
    weights: Option<&Array1<f64>>,
    keep: &[usize],
) -> Result<Option<Array1<f64>>, PenaltyError> {
    match weights {
        None => Ok(None),
        Some(w) => {
            if let Some(&index) = keep.iter().find(|&&i| i >= w.len()) {
                return Err(PenaltyError::RestrictionOutOfRange {
                    index,
                    len: w.len(),
                });
            }
            Ok(Some(keep.iter().map(|&i| w[i]).collect()))
        }
    }
}

fn sign(b: f64) -> f64 {
    if b > 0.0 {
        1.0
    } else if b < 0.0 {
        -1.0
    } else {
        0.0
    }
}

// Scalar SCAD pieces, shared by the plain and the smoothed penalty.

fn scad_value(b: f64, tau: f64, c: f64) -> f64 {
    let a = b.abs();
    if a < tau {
        tau * a
    } else if a < c * tau {
        -(a * a - 2.0 * c * tau * a + tau * tau) / (2.0 * (c - 1.0))
    } else {
        (c + 1.0) * tau * tau / 2.0
    }
}

fn scad_deriv(b: f64, tau: f64, c: f64) -> f64 {
    let a = b.abs();
    if a < tau {
        sign(b) * tau
    } else if a < c * tau {
        -sign(b) * (a - c * tau) / (c - 1.0)
    } else {
        0.0
    }
}

fn scad_deriv2(b: f64, tau: f64, c: f64) -> f64 {
    let a = b.abs();
    if a >= tau && a < c * tau {
        -1.0 / (c - 1.0)
    } else {
        0.0
    }
}

fn validate_scad_shape(tau: f64, c: f64) -> Result<(), PenaltyError> {
    if !(tau.is_finite() && tau > 0.0) {
        return Err(PenaltyError::InvalidTau(tau));
    }
    if !(c.is_finite() && c > 2.0) {
        return Err(PenaltyError::InvalidShape(c));
    }
    Ok(())
}

/// Smoothly clipped absolute deviation penalty (Fan and Li).
///
/// Linear up to `tau`, quadratic between `tau` and `c * tau`, constant
/// beyond. The derivative at zero uses `sign(0) = 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct Scad {
    tau: f64,
    c: f64,
    weights: Option<Array1<f64>>,
}

impl Scad {
    pub fn new(tau: f64) -> Result<Self, PenaltyError> {
        Self::with_params(tau, DEFAULT_SCAD_C)
    }

    pub fn with_params(tau: f64, c: f64) -> Result<Self, PenaltyError> {
        validate_scad_shape(tau, c)?;
        Ok(Self {
            tau,
            c,
            weights: None,
        })
    }

    pub fn with_weights(mut self, weights: Array1<f64>) -> Result<Self, PenaltyError> {
        validate_weights(&weights)?;
        self.weights = Some(weights);
        Ok(self)
    }

    pub fn tau(&self) -> f64 {
        self.tau
    }

    pub fn c(&self) -> f64 {
        self.c
    }
}

impl PenaltyFunction for Scad {
    fn func(&self, params: ArrayView1<f64>) -> f64 {
        weighted(self.weights.as_ref(), params, |b| scad_value(b, self.tau, self.c)).sum()
    }

    fn deriv(&self, params: ArrayView1<f64>) -> Array1<f64> {
        weighted(self.weights.as_ref(), params, |b| scad_deriv(b, self.tau, self.c))
    }

    fn deriv2(&self, params: ArrayView1<f64>) -> Array1<f64> {
        weighted(self.weights.as_ref(), params, |b| scad_deriv2(b, self.tau, self.c))
    }
}

/// SCAD with the kink at zero replaced by a quadratic on `|b| < c0`.
///
/// The penalty is shifted so that `func(0) = 0`. Value and first derivative
/// are continuous at `c0`, which makes the penalty usable with gradient-based
/// optimizers.
#[derive(Debug, Clone, PartialEq)]
pub struct ScadSmoothed {
    tau: f64,
    c: f64,
    c0: f64,
    // Shift applied outside the quadratic segment.
    aq1: f64,
    // Quadratic coefficient inside the segment.
    aq2: f64,
    weights: Option<Array1<f64>>,
}

impl ScadSmoothed {
    /// Smoothed SCAD with `c = 3.7` and `c0 = tau / 10`.
    pub fn new(tau: f64) -> Result<Self, PenaltyError> {
        Self::with_params(tau, DEFAULT_SCAD_C, tau * 0.1)
    }

    pub fn with_params(tau: f64, c: f64, c0: f64) -> Result<Self, PenaltyError> {
        validate_scad_shape(tau, c)?;
        if !(c0.is_finite() && c0 > 0.0 && c0 <= tau) {
            return Err(PenaltyError::InvalidSmoothing { c0, tau });
        }
        Ok(Self::from_valid_params(tau, c, c0))
    }

    // Callers have validated `tau`, `c` and `c0`.
    fn from_valid_params(tau: f64, c: f64, c0: f64) -> Self {
        let value_at_c0 = scad_value(c0, tau, c);
        let deriv_at_c0 = scad_deriv(c0, tau, c);
        Self {
            tau,
            c,
            c0,
            aq1: value_at_c0 - 0.5 * deriv_at_c0 * c0,
            aq2: 0.5 * deriv_at_c0 / c0,
            weights: None,
        }
    }

    pub fn with_weights(mut self, weights: Array1<f64>) -> Result<Self, PenaltyError> {
        validate_weights(&weights)?;
        self.weights = Some(weights);
        Ok(self)
    }

    pub fn tau(&self) -> f64 {
        self.tau
    }

    pub fn c(&self) -> f64 {
        self.c
    }

    pub fn c0(&self) -> f64 {
        self.c0
    }

    fn value(&self, b: f64) -> f64 {
        if b.abs() < self.c0 {
            self.aq2 * b * b
        } else {
            scad_value(b, self.tau, self.c) - self.aq1
        }
    }

    fn slope(&self, b: f64) -> f64 {
        if b.abs() < self.c0 {
            2.0 * self.aq2 * b
        } else {
            scad_deriv(b, self.tau, self.c)
        }
    }

    fn curvature(&self, b: f64) -> f64 {
        if b.abs() < self.c0 {
            2.0 * self.aq2
        } else {
            scad_deriv2(b, self.tau, self.c)
        }
    }
}

impl PenaltyFunction for ScadSmoothed {
    fn func(&self, params: ArrayView1<f64>) -> f64 {
        weighted(self.weights.as_ref(), params, |b| self.value(b)).sum()
    }

    fn deriv(&self, params: ArrayView1<f64>) -> Array1<f64> {
        weighted(self.weights.as_ref(), params, |b| self.slope(b))
    }

    fn deriv2(&self, params: ArrayView1<f64>) -> Array1<f64> {
        weighted(self.weights.as_ref(), params, |b| self.curvature(b))
    }
}

/// Ridge penalty `sum(w_i * b_i^2)`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct L2 {
    weights: Option<Array1<f64>>,
}

impl L2 {
    pub fn new() -> Self {
        Self { weights: None }
    }

    pub fn with_weights(mut self, weights: Array1<f64>) -> Result<Self, PenaltyError> {
        validate_weights(&weights)?;
        self.weights = Some(weights);
        Ok(self)
    }
}

impl PenaltyFunction for L2 {
    fn func(&self, params: ArrayView1<f64>) -> f64 {
        weighted(self.weights.as_ref(), params, |b| b * b).sum()
    }

    fn deriv(&self, params: ArrayView1<f64>) -> Array1<f64> {
        weighted(self.weights.as_ref(), params, |b| 2.0 * b)
    }

    fn deriv2(&self, params: ArrayView1<f64>) -> Array1<f64> {
        weighted(self.weights.as_ref(), params, |_| 2.0)
    }
}

/// The penalties a [`crate::penalized::PenalizedModel`] can carry.
#[derive(Debug, Clone, PartialEq)]
pub enum Penalty {
    Scad(Scad),
    ScadSmoothed(ScadSmoothed),
    L2(L2),
}

impl Default for Penalty {
    /// Smoothed SCAD with `tau = 0.1`, `c = 3.7` and `c0 = 1e-4`.
    fn default() -> Self {
        Penalty::ScadSmoothed(ScadSmoothed::from_valid_params(0.1, DEFAULT_SCAD_C, 1e-4))
    }
}

impl Penalty {
    pub fn weights(&self) -> Option<&Array1<f64>> {
        match self {
            Penalty::Scad(p) => p.weights.as_ref(),
            Penalty::ScadSmoothed(p) => p.weights.as_ref(),
            Penalty::L2(p) => p.weights.as_ref(),
        }
    }

    /// Checks that per-coefficient weights, if any, cover `k_params` coefficients.
    pub fn check_dimension(&self, k_params: usize) -> Result<(), PenaltyError> {
        match self.weights() {
            Some(w) if w.len() != k_params => Err(PenaltyError::WeightLengthMismatch {
                expected: k_params,
                found: w.len(),
            }),
            _ => Ok(()),
        }
    }

    /// The same penalty over the coefficients at `keep`, in that order.
    pub fn restrict(&self, keep: &[usize]) -> Result<Penalty, PenaltyError> {
        let weights = restrict_weights(self.weights(), keep)?;
        Ok(match self {
            Penalty::Scad(p) => Penalty::Scad(Scad {
                weights,
                ..p.clone()
            }),
            Penalty::ScadSmoothed(p) => Penalty::ScadSmoothed(ScadSmoothed {
                weights,
                ..p.clone()
            }),
            Penalty::L2(_) => Penalty::L2(L2 { weights }),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Penalty::Scad(_) => "SCAD",
            Penalty::ScadSmoothed(_) => "smoothed SCAD",
            Penalty::L2(_) => "L2",
        }
    }
}

impl PenaltyFunction for Penalty {
    fn func(&self, params: ArrayView1<f64>) -> f64 {
        match self {
            Penalty::Scad(p) => p.func(params),
            Penalty::ScadSmoothed(p) => p.func(params),
            Penalty::L2(p) => p.func(params),
        }
    }

    fn deriv(&self, params: ArrayView1<f64>) -> Array1<f64> {
        match self {
            Penalty::Scad(p) => p.deriv(params),
            Penalty::ScadSmoothed(p) => p.deriv(params),
            Penalty::L2(p) => p.deriv(params),
        }
    }

    fn deriv2(&self, params: ArrayView1<f64>) -> Array1<f64> {
        match self {
            Penalty::Scad(p) => p.deriv2(params),
            Penalty::ScadSmoothed(p) => p.deriv2(params),
            Penalty::L2(p) => p.deriv2(params),
        }
    }
}
