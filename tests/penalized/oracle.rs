//! Penalized Poisson fits against the oracle model restricted to the
//! columns with nonzero true coefficients: 500 observations, coefficients
//! `1, 1/2, 1/3, 1/4` and six zeros, smoothed SCAD on every coefficient.

use approx::{assert_abs_diff_eq, assert_relative_eq};
use crate::common::{correlated_design, harmonic_params, poisson_response};
use ndarray::{Array1, Array2, s};
use penlik::penalty::DEFAULT_SCAD_C;
use penlik::{
    CovType, DiscreteModel, Family, FitOptions, FitResult, GlmModel, LikelihoodModel,
    PenalizedModel, Penalty, PenaltyWeight, ScadSmoothed,
};

const NOBS: usize = 500;
const K: usize = 10;
const K_NONZERO: usize = 4;
const TAU: f64 = 0.05;

fn simulated() -> (Array1<f64>, Array2<f64>) {
    let exog = correlated_design(NOBS, K, 987865);
    let endog = poisson_response(&exog, &harmonic_params(K, K_NONZERO), 999);
    (endog, exog)
}

fn oracle_columns(exog: &Array2<f64>) -> Array2<f64> {
    exog.slice(s![.., ..K_NONZERO]).to_owned()
}

// The default smoothed SCAD with a smaller threshold, intercept included.
fn smoothed_scad() -> Penalty {
    Penalty::ScadSmoothed(ScadSmoothed::with_params(TAU, DEFAULT_SCAD_C, 1e-4).unwrap())
}

fn penalized<M: LikelihoodModel>(base: M, factor: f64) -> PenalizedModel<M> {
    PenalizedModel::builder(base)
        .penalty(smoothed_scad())
        .pen_weight(PenaltyWeight::PerObservation(factor))
        .build()
        .unwrap()
}

fn discrete(factor: f64) -> PenalizedModel<DiscreteModel> {
    let (endog, exog) = simulated();
    penalized(DiscreteModel::poisson(endog, exog).unwrap(), factor)
}

fn glm(factor: f64) -> PenalizedModel<GlmModel> {
    let (endog, exog) = simulated();
    penalized(GlmModel::new(endog, exog, Family::Poisson).unwrap(), factor)
}

fn discrete_oracle(options: &FitOptions) -> FitResult {
    let (endog, exog) = simulated();
    DiscreteModel::poisson(endog, oracle_columns(&exog))
        .unwrap()
        .fit(options)
        .unwrap()
}

fn assert_matches_oracle(result: &FitResult, oracle: &FitResult, atol: f64) {
    for i in 0..K_NONZERO {
        assert_abs_diff_eq!(result.params()[i], oracle.params()[i], epsilon = atol);
        assert_abs_diff_eq!(result.bse()[i], oracle.bse()[i], epsilon = atol);
    }
    for (a, b) in result.predict().iter().zip(oracle.predict().iter()) {
        assert_relative_eq!(a, b, max_relative = 0.05);
    }
}

#[test]
fn zero_weight_discrete_poisson_matches_the_unpenalized_fit() {
    let (endog, exog) = simulated();
    let base = DiscreteModel::poisson(endog, exog).unwrap();
    let reference = base.fit(&DiscreteModel::default_fit_options()).unwrap();
    let result = PenalizedModel::builder(base)
        .pen_weight(PenaltyWeight::Absolute(0.0))
        .build()
        .unwrap()
        .fit(&FitOptions::default())
        .unwrap();

    for (a, b) in result.params().iter().zip(reference.params().iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 5e-6);
    }
    for (a, b) in result.bse().iter().zip(reference.bse().iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 5e-6);
    }
}

#[test]
fn zero_weight_glm_poisson_matches_irls() {
    let (endog, exog) = simulated();
    let base = GlmModel::new(endog, exog, Family::Poisson).unwrap();
    let reference = base.fit(&GlmModel::default_fit_options()).unwrap();
    let result = PenalizedModel::builder(base)
        .pen_weight(PenaltyWeight::Absolute(0.0))
        .build()
        .unwrap()
        .fit(&FitOptions::default())
        .unwrap();

    for (a, b) in result.params().iter().zip(reference.params().iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 5e-6);
    }
    for (a, b) in result.bse().iter().zip(reference.bse().iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 5e-6);
    }
}

#[test]
fn discrete_poisson_bfgs_fit_recovers_the_oracle() {
    let result = discrete(1.5).fit(&FitOptions::default()).unwrap();
    let oracle = discrete_oracle(&DiscreteModel::default_fit_options());
    assert_matches_oracle(&result, &oracle, 5e-3);
}

#[test]
fn glm_poisson_bfgs_fit_recovers_the_oracle() {
    let result = glm(1.5).fit(&FitOptions::default()).unwrap();
    let (endog, exog) = simulated();
    let oracle = GlmModel::new(endog, oracle_columns(&exog), Family::Poisson)
        .unwrap()
        .fit(&GlmModel::default_fit_options())
        .unwrap();
    assert_matches_oracle(&result, &oracle, 5e-3);
}

#[test]
fn hc0_fit_recovers_the_hc0_oracle() {
    let options = FitOptions::default().cov_type(CovType::HC0);
    let result = discrete(1.5).fit(&options).unwrap();
    let oracle = discrete_oracle(&options);
    assert_matches_oracle(&result, &oracle, 5e-3);
    assert_eq!(result.cov_type(), CovType::HC0);
}

#[test]
fn strong_penalty_with_trimming_selects_exactly_the_oracle_columns() {
    let model = discrete(10.0);
    let result = model.fit(&FitOptions::default().trim(true)).unwrap();

    assert_eq!(result.keep_index(), Some(&[0, 1, 2, 3][..]));
    for i in K_NONZERO..K {
        assert_eq!(result.params()[i], 0.0);
        assert_eq!(result.bse()[i], 0.0);
    }

    // The reduced refit solves the same problem as penalizing the oracle columns directly.
    let (endog, exog) = simulated();
    let direct = penalized(DiscreteModel::poisson(endog, oracle_columns(&exog)).unwrap(), 10.0)
        .fit(&FitOptions::default())
        .unwrap();
    for i in 0..K_NONZERO {
        assert_abs_diff_eq!(result.params()[i], direct.params()[i], epsilon = 1e-6);
        assert_relative_eq!(result.bse()[i], direct.bse()[i], max_relative = 1e-5);
    }
}

#[test]
fn glm_poisson_trimming_matches_the_discrete_selection() {
    let options = FitOptions::default().trim(true);
    let from_glm = glm(10.0).fit(&options).unwrap();
    let from_discrete = discrete(10.0).fit(&options).unwrap();

    assert_eq!(from_glm.keep_index(), from_discrete.keep_index());
    for i in K_NONZERO..K {
        assert_eq!(from_glm.params()[i], 0.0);
        assert_eq!(from_glm.bse()[i], 0.0);
    }
    for i in 0..K_NONZERO {
        assert_abs_diff_eq!(from_glm.params()[i], from_discrete.params()[i], epsilon = 1e-6);
        assert_relative_eq!(from_glm.bse()[i], from_discrete.bse()[i], max_relative = 1e-5);
    }
}

#[test]
fn trimmed_hc0_fit_shares_its_covariance_metadata_with_the_constrained_fit() {
    let options = FitOptions::default().cov_type(CovType::HC0).trim(true);
    let result = discrete(10.0).fit(&options).unwrap();
    let constrained = result.results_constrained().unwrap();

    assert_eq!(result.cov_type(), CovType::HC0);
    assert_eq!(constrained.cov_type(), CovType::HC0);
    assert_eq!(result.cov_kwds(), constrained.cov_kwds());
    let kwds = result.cov_kwds();
    assert_eq!(
        kwds.description,
        "Standard Errors are heteroscedasticity robust (HC0)"
    );
    assert!(!kwds.adjust_df);
    assert!(!kwds.use_t);
    assert_eq!(kwds.scaling_factor, None);

    for i in K_NONZERO..K {
        assert_eq!(result.bse()[i], 0.0);
    }

    let (endog, exog) = simulated();
    let direct = penalized(DiscreteModel::poisson(endog, oracle_columns(&exog)).unwrap(), 10.0)
        .fit(&FitOptions::default().cov_type(CovType::HC0))
        .unwrap();
    for i in 0..K_NONZERO {
        assert_abs_diff_eq!(result.params()[i], direct.params()[i], epsilon = 1e-6);
        assert_relative_eq!(result.bse()[i], direct.bse()[i], max_relative = 1e-5);
        assert_eq!(constrained.bse()[i], result.bse()[i]);
    }
}

#[test]
fn discrete_and_glm_poisson_agree_under_hc0() {
    let options = FitOptions::default().cov_type(CovType::HC0);
    let count_model = discrete(1.5).fit(&options).unwrap();
    let family_model = glm(1.5).fit(&options).unwrap();

    for (a, b) in count_model.params().iter().zip(family_model.params().iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-4);
    }
    for (a, b) in count_model.bse().iter().zip(family_model.bse().iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-4);
    }
    assert_eq!(count_model.cov_kwds(), family_model.cov_kwds());
}
