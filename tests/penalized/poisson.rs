use approx::{assert_abs_diff_eq, assert_relative_eq};
use crate::common::{correlated_design, poisson_response, true_params};
use ndarray::{Array1, Array2, array, s};
use ndarray_linalg::Inverse;
use penlik::numdiff::{hessian_numdiff, score_numdiff};
use penlik::{
    CovType, DiscreteModel, Family, FitMethod, FitOptions, GlmModel, LikelihoodModel,
    PenalizedModel, Penalty, PenaltyWeight, ScadSmoothed,
};

const NOBS: usize = 1000;
const K: usize = 10;
const TAU: f64 = 0.12;

fn simulated() -> (Array1<f64>, Array2<f64>) {
    let exog = correlated_design(NOBS, K, 20240611);
    let endog = poisson_response(&exog, &true_params(K, 0.5), 7);
    (endog, exog)
}

// Smoothed SCAD on every slope; the intercept is left unpenalized.
fn slope_penalty() -> Penalty {
    let mut weights = Array1::ones(K);
    weights[0] = 0.0;
    Penalty::ScadSmoothed(
        ScadSmoothed::with_params(TAU, 3.7, 1e-4)
            .unwrap()
            .with_weights(weights)
            .unwrap(),
    )
}

fn penalized_poisson() -> PenalizedModel<DiscreteModel> {
    let (endog, exog) = simulated();
    let base = DiscreteModel::poisson(endog, exog).unwrap();
    PenalizedModel::builder(base)
        .penalty(slope_penalty())
        .build()
        .unwrap()
}

fn newton() -> FitOptions {
    FitOptions::default().method(FitMethod::Newton)
}

fn oracle_params() -> Array1<f64> {
    let (endog, exog) = simulated();
    let oracle = DiscreteModel::poisson(endog, exog.slice(s![.., 0..4]).to_owned()).unwrap();
    oracle
        .fit(&DiscreteModel::default_fit_options())
        .unwrap()
        .params()
        .clone()
}

#[test]
fn zero_weight_reproduces_the_unpenalized_fit() {
    let (endog, exog) = simulated();
    let base = DiscreteModel::poisson(endog, exog).unwrap();
    let reference = base.fit(&DiscreteModel::default_fit_options()).unwrap();

    let model = PenalizedModel::builder(base)
        .pen_weight(PenaltyWeight::Absolute(0.0))
        .build()
        .unwrap();
    let result = model.fit(&FitOptions::default()).unwrap();

    for (a, b) in result.params().iter().zip(reference.params().iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-5);
    }
    for (a, b) in result.bse().iter().zip(reference.bse().iter()) {
        assert_relative_eq!(a, b, max_relative = 1e-4);
    }
    assert_relative_eq!(result.llf(), reference.llf(), max_relative = 1e-9);
}

#[test]
fn large_coefficients_match_the_oracle_fit() {
    let model = penalized_poisson();
    let result = model.fit(&newton()).unwrap();
    assert!(result.converged());

    let oracle = oracle_params();
    for i in 0..4 {
        assert_abs_diff_eq!(result.params()[i], oracle[i], epsilon = 2e-3);
    }
    for i in 4..K {
        assert!(
            result.params()[i].abs() < 1e-3,
            "coefficient {i} was not shrunk: {}",
            result.params()[i]
        );
    }
}

#[test]
fn trimming_refits_exactly_the_oracle_model() {
    let model = penalized_poisson();
    let result = model.fit(&newton().trim_threshold(1e-3)).unwrap();

    assert_eq!(result.keep_index(), Some(&[0, 1, 2, 3][..]));
    let constrained = result.results_constrained().unwrap();
    assert_eq!(constrained.params().len(), 4);

    // Past c * tau the penalty is flat, so the reduced fit is the plain MLE.
    let oracle = oracle_params();
    for i in 0..4 {
        assert_abs_diff_eq!(constrained.params()[i], oracle[i], epsilon = 1e-6);
        assert_abs_diff_eq!(result.params()[i], constrained.params()[i]);
    }
    for i in 4..K {
        assert_eq!(result.params()[i], 0.0);
        assert_eq!(result.bse()[i], 0.0);
        assert!(result.tvalues()[i].is_nan());
    }
    assert_abs_diff_eq!(
        result.llf(),
        model.loglike(result.params().view()),
        epsilon = 1e-9
    );
}

#[test]
fn hc0_covariance_is_the_penalized_sandwich() {
    let model = penalized_poisson();
    let result = model.fit(&newton().cov_type(CovType::HC0)).unwrap();
    assert_eq!(result.cov_type(), CovType::HC0);
    assert!(result.cov_kwds().description.contains("HC0"));
    assert!(!result.cov_kwds().adjust_df);

    let params = result.params().view();
    let bread = (-model.hessian(params)).inv().unwrap();
    let scores = model.score_obs(params);
    let expected = bread.dot(&scores.t().dot(&scores)).dot(&bread);
    for (a, b) in result.cov_params().iter().zip(expected.iter()) {
        assert_relative_eq!(a, b, max_relative = 1e-8, epsilon = 1e-14);
    }
    assert!(result.bse().iter().all(|se| se.is_finite() && *se > 0.0));
}

#[test]
fn analytic_derivatives_agree_with_finite_differences() {
    let model = penalized_poisson();
    let result = model.fit(&newton()).unwrap();

    // Slopes placed in every region of the smoothed SCAD.
    let mut point = result.params() * 0.98;
    point
        .slice_mut(s![4..])
        .assign(&array![0.0, 5e-5, 0.05, -0.2, 0.6, -0.03]);

    let numeric = score_numdiff(&model, point.view());
    let analytic = model.score(point.view());
    for (a, b) in analytic.iter().zip(numeric.iter()) {
        assert_relative_eq!(a, b, max_relative = 1e-4, epsilon = 1e-4);
    }

    let numeric = hessian_numdiff(&model, point.view());
    let analytic = model.hessian(point.view());
    for (a, b) in analytic.iter().zip(numeric.iter()) {
        assert_relative_eq!(a, b, max_relative = 1e-3, epsilon = 0.1);
    }
}

#[test]
fn discrete_and_glm_poisson_give_the_same_penalized_fit() {
    let (endog, exog) = simulated();
    let glm = GlmModel::new(endog, exog, Family::Poisson).unwrap();
    let glm_model = PenalizedModel::builder(glm)
        .penalty(slope_penalty())
        .build()
        .unwrap();
    let discrete_model = penalized_poisson();

    let options = newton().start_params(Array1::zeros(K));
    let discrete = discrete_model.fit(&options).unwrap();
    let glm = glm_model.fit(&options).unwrap();

    for (a, b) in discrete.params().iter().zip(glm.params().iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-6);
    }
    for (a, b) in discrete.bse().iter().zip(glm.bse().iter()) {
        assert_relative_eq!(a, b, max_relative = 1e-6);
    }
    assert_relative_eq!(discrete.llf(), glm.llf(), max_relative = 1e-10);
}

#[test]
fn irls_is_rejected_for_penalized_models() {
    let model = penalized_poisson();
    let err = model
        .fit(&FitOptions::default().method(FitMethod::Irls))
        .unwrap_err();
    assert!(err.to_string().contains("IRLS"));
}
