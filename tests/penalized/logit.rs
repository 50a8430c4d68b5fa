use approx::{assert_abs_diff_eq, assert_relative_eq};
use crate::common::{bernoulli_response, correlated_design, true_params};
use ndarray::{Array1, Array2};
use penlik::{
    CovType, DiscreteModel, Family, FitMethod, FitOptions, GlmModel, L2, LikelihoodModel,
    PenalizedModel, Penalty, PenaltyWeight, ScadSmoothed,
};

const NOBS: usize = 2000;
const K: usize = 8;

fn simulated() -> (Array1<f64>, Array2<f64>) {
    let exog = correlated_design(NOBS, K, 99);
    let endog = bernoulli_response(&exog, &true_params(K, 1.0), 100);
    (endog, exog)
}

fn ridge() -> Penalty {
    let mut weights = Array1::ones(K);
    weights[0] = 0.0;
    Penalty::L2(L2::new().with_weights(weights).unwrap())
}

fn ridge_logit() -> PenalizedModel<DiscreteModel> {
    let (endog, exog) = simulated();
    PenalizedModel::builder(DiscreteModel::logit(endog, exog).unwrap())
        .penalty(ridge())
        .pen_weight(PenaltyWeight::PerObservation(0.05))
        .build()
        .unwrap()
}

fn newton_from_zero() -> FitOptions {
    FitOptions::default()
        .method(FitMethod::Newton)
        .start_params(Array1::zeros(K))
}

#[test]
fn zero_weight_reproduces_the_unpenalized_logit() {
    let (endog, exog) = simulated();
    let base = DiscreteModel::logit(endog, exog).unwrap();
    let reference = base.fit(&DiscreteModel::default_fit_options()).unwrap();
    let model = PenalizedModel::builder(base)
        .pen_weight(PenaltyWeight::Absolute(0.0))
        .build()
        .unwrap();
    let result = model.fit(&FitOptions::default()).unwrap();

    for (a, b) in result.params().iter().zip(reference.params().iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-5);
    }
    assert_relative_eq!(result.llf(), reference.llf(), max_relative = 1e-9);
}

#[test]
fn bfgs_and_newton_agree_on_a_ridge_penalized_logit() {
    let model = ridge_logit();
    let newton = model.fit(&newton_from_zero()).unwrap();
    let bfgs = model.fit(&FitOptions::default()).unwrap();
    assert!(newton.converged());

    for (a, b) in newton.params().iter().zip(bfgs.params().iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-5);
    }
    let score = model.score(newton.params().view());
    assert!(score.iter().all(|g| g.abs() / NOBS as f64 <= 1e-6));

    // The ridge pulls every slope toward zero relative to the MLE.
    let (endog, exog) = simulated();
    let mle = DiscreteModel::logit(endog, exog)
        .unwrap()
        .fit(&DiscreteModel::default_fit_options())
        .unwrap();
    let shrunk: f64 = newton.params().iter().skip(1).map(|b| b * b).sum();
    let free: f64 = mle.params().iter().skip(1).map(|b| b * b).sum();
    assert!(shrunk < free);
}

#[test]
fn discrete_logit_matches_bernoulli_glm() {
    let (endog, exog) = simulated();
    let glm = PenalizedModel::builder(GlmModel::new(endog, exog, Family::Binomial).unwrap())
        .penalty(ridge())
        .pen_weight(PenaltyWeight::PerObservation(0.05))
        .build()
        .unwrap();
    let discrete = ridge_logit();

    let a = discrete.fit(&newton_from_zero()).unwrap();
    let b = glm.fit(&newton_from_zero()).unwrap();
    for (x, y) in a.params().iter().zip(b.params().iter()) {
        assert_abs_diff_eq!(x, y, epsilon = 1e-7);
    }
    assert_relative_eq!(a.llf(), b.llf(), max_relative = 1e-10);
}

#[test]
fn hc1_scales_hc0_by_the_degrees_of_freedom_correction() {
    let model = ridge_logit();
    let hc0 = model.fit(&newton_from_zero().cov_type(CovType::HC0)).unwrap();
    let hc1 = model.fit(&newton_from_zero().cov_type(CovType::HC1)).unwrap();
    let factor = NOBS as f64 / (NOBS - K) as f64;

    for (a, b) in hc1.cov_params().iter().zip(hc0.cov_params().iter()) {
        assert_relative_eq!(*a, b * factor, max_relative = 1e-10, epsilon = 1e-16);
    }
    assert!(hc1.cov_kwds().description.contains("HC1"));
}

#[test]
fn fixed_scale_multiplies_the_nonrobust_covariance() {
    let model = ridge_logit();
    let nonrobust = model.fit(&newton_from_zero()).unwrap();
    let fixed = model
        .fit(&newton_from_zero().cov_type(CovType::FixedScale(2.5)))
        .unwrap();

    for (a, b) in fixed.cov_params().iter().zip(nonrobust.cov_params().iter()) {
        assert_relative_eq!(*a, 2.5 * b, max_relative = 1e-10, epsilon = 1e-16);
    }
    assert_eq!(fixed.cov_kwds().scaling_factor, Some(2.5));
    assert_eq!(nonrobust.cov_kwds().scaling_factor, None);
    assert_eq!(fixed.cov_type().name(), "fixed scale");
}

#[test]
fn smoothed_scad_shrinks_inactive_logit_slopes() {
    let (endog, exog) = simulated();
    let base = DiscreteModel::logit(endog, exog).unwrap();
    let mle = base.fit(&DiscreteModel::default_fit_options()).unwrap();

    let mut weights = Array1::ones(K);
    weights[0] = 0.0;
    let penalty = ScadSmoothed::new(0.1).unwrap().with_weights(weights).unwrap();
    let model = PenalizedModel::builder(base)
        .penalty(Penalty::ScadSmoothed(penalty))
        .build()
        .unwrap();
    let result = model.fit(&FitOptions::default()).unwrap();

    let inactive = |params: &Array1<f64>| -> f64 { params.iter().skip(4).map(|b| b.abs()).sum() };
    assert!(inactive(result.params()) < inactive(mle.params()));
    let truth = true_params(K, 1.0);
    for i in 0..4 {
        assert_abs_diff_eq!(result.params()[i], truth[i], epsilon = 0.35);
    }
    assert!(model.loglike(result.params().view()) >= model.loglike(mle.params().view()));
}

#[test]
fn ridge_probit_fits_with_both_optimizers() {
    let (endog, exog) = simulated();
    let model = PenalizedModel::builder(DiscreteModel::probit(endog, exog).unwrap())
        .penalty(ridge())
        .pen_weight(PenaltyWeight::PerObservation(0.05))
        .build()
        .unwrap();

    let newton = model.fit(&newton_from_zero()).unwrap();
    let bfgs = model.fit(&FitOptions::default()).unwrap();
    for (a, b) in newton.params().iter().zip(bfgs.params().iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-5);
    }
    // Probit slopes share the signs of the logit truth.
    let truth = true_params(K, 1.0);
    for i in 1..4 {
        assert_eq!(newton.params()[i].signum(), truth[i].signum());
    }
    assert!(newton.pvalues().iter().all(|p| (0.0..=1.0).contains(p)));
}
