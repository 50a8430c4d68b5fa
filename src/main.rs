use clap::{Parser, Subcommand};
use ndarray::{Array1, ArrayView1};
use penlik::data::{ModelData, load_table};
use penlik::model::{ModelFamily, PenaltySection};
use penlik::numdiff::{hessian_numdiff, score_numdiff};
use penlik::{
    DiscreteKind, DiscreteModel, EstimationError, Family, FitOptions, GlmModel, LikelihoodModel,
    PenalizedModel, RunConfig,
};
use serde::Serialize;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(
    name = "penlik",
    version,
    about = "Penalized maximum-likelihood estimation for GLM and discrete-choice models",
    long_about = "Fits Poisson, Logit, Probit and GLM models with a SCAD-type penalty on the \
                 coefficients, optionally trimming shrunk coefficients and refitting."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a penalized model and write the estimates as TOML
    #[command(about = "Fit a penalized model (outputs: result.toml or stdout)")]
    Fit {
        /// Path to a tab-separated data file with a header row
        data: PathBuf,

        /// Path to the run configuration (.toml)
        #[arg(long)]
        config: PathBuf,

        /// Where to write the result; stdout when omitted
        #[arg(long)]
        output: Option<PathBuf>,

        /// Trim near-zero coefficients and refit, regardless of the configuration
        #[arg(long)]
        trim: bool,
    },

    /// Compare analytic and numerical derivatives near the penalized optimum
    #[command(about = "Check score and Hessian against finite differences")]
    CheckDerivatives {
        /// Path to a tab-separated data file with a header row
        data: PathBuf,

        /// Path to the run configuration (.toml)
        #[arg(long)]
        config: PathBuf,

        /// Factor applied to the fitted parameters before differencing
        #[arg(long, default_value = "0.98")]
        shrink: f64,
    },
}

/// Largest discrepancies between analytic and numerical derivatives.
#[derive(Debug, Serialize)]
struct DerivativeReport {
    shrink: f64,
    max_abs_score_error: f64,
    max_rel_score_error: f64,
    max_abs_hessian_error: f64,
    max_rel_hessian_error: f64,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Fit {
            data,
            config,
            output,
            trim,
        } => fit_command(&data, &config, output.as_deref(), trim),
        Commands::CheckDerivatives {
            data,
            config,
            shrink,
        } => check_derivatives_command(&data, &config, shrink),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn load_inputs(data_path: &Path, config_path: &Path) -> Result<(RunConfig, ModelData), Box<dyn Error>> {
    let config = RunConfig::load(config_path)?;
    let table = load_table(data_path)?;
    let data = table.to_model_data(&config.data)?;
    Ok((config, data))
}

fn discrete_base(kind: DiscreteKind, data: &ModelData) -> Result<DiscreteModel, EstimationError> {
    if data.trials.is_some() {
        return Err(EstimationError::InvalidConfiguration(
            "trial counts only apply to binomial GLMs".to_string(),
        ));
    }
    let model = DiscreteModel::new(kind, data.endog.clone(), data.exog.clone())?;
    match &data.offset {
        Some(offset) => model.with_offset(offset.clone()),
        None => Ok(model),
    }
}

fn glm_base(family: Family, data: &ModelData) -> Result<GlmModel, EstimationError> {
    let model = match (&data.trials, family) {
        (Some(trials), Family::Binomial) => {
            GlmModel::binomial_counts(data.endog.clone(), trials.clone(), data.exog.clone())?
        }
        (Some(_), _) => {
            return Err(EstimationError::InvalidConfiguration(
                "trial counts only apply to binomial GLMs".to_string(),
            ));
        }
        (None, family) => GlmModel::new(data.endog.clone(), data.exog.clone(), family)?,
    };
    match &data.offset {
        Some(offset) => model.with_offset(offset.clone()),
        None => Ok(model),
    }
}

fn penalized<M: LikelihoodModel>(
    base: M,
    section: &PenaltySection,
) -> Result<PenalizedModel<M>, Box<dyn Error>> {
    let model = PenalizedModel::builder(base)
        .penalty(section.to_penalty()?)
        .pen_weight(section.to_weight())
        .build()?;
    Ok(model)
}

fn fit_command(
    data_path: &Path,
    config_path: &Path,
    output: Option<&Path>,
    trim: bool,
) -> Result<(), Box<dyn Error>> {
    let (mut config, data) = load_inputs(data_path, config_path)?;
    if trim {
        config.fit.trim = true;
    }
    let options = config.fit.to_options();

    let result = match config.model.family {
        ModelFamily::Poisson => fit_penalized(discrete_base(DiscreteKind::Poisson, &data)?, &config, &options)?,
        ModelFamily::Logit => fit_penalized(discrete_base(DiscreteKind::Logit, &data)?, &config, &options)?,
        ModelFamily::Probit => fit_penalized(discrete_base(DiscreteKind::Probit, &data)?, &config, &options)?,
        ModelFamily::GlmPoisson => fit_penalized(glm_base(Family::Poisson, &data)?, &config, &options)?,
        ModelFamily::GlmBinomial => fit_penalized(glm_base(Family::Binomial, &data)?, &config, &options)?,
        ModelFamily::GlmGaussian => fit_penalized(glm_base(Family::Gaussian, &data)?, &config, &options)?,
    };

    let report = result.report(&data.exog_names);
    let text = toml::to_string(&report)?;
    match output {
        Some(path) => {
            fs::write(path, text)?;
            log::info!("Wrote fit result to {}", path.display());
        }
        None => print!("{text}"),
    }
    Ok(())
}

fn fit_penalized<M: LikelihoodModel>(
    base: M,
    config: &RunConfig,
    options: &FitOptions,
) -> Result<penlik::FitResult, Box<dyn Error>> {
    let model = penalized(base, &config.penalty)?;
    Ok(model.fit(options)?)
}

fn check_derivatives_command(
    data_path: &Path,
    config_path: &Path,
    shrink: f64,
) -> Result<(), Box<dyn Error>> {
    if !shrink.is_finite() {
        return Err(format!("shrink must be finite, but was {shrink}").into());
    }
    let (config, data) = load_inputs(data_path, config_path)?;
    let mut options = config.fit.to_options();
    options.trim = None;

    let report = match config.model.family {
        ModelFamily::Poisson => compare_derivatives(discrete_base(DiscreteKind::Poisson, &data)?, &config, &options, shrink)?,
        ModelFamily::Logit => compare_derivatives(discrete_base(DiscreteKind::Logit, &data)?, &config, &options, shrink)?,
        ModelFamily::Probit => compare_derivatives(discrete_base(DiscreteKind::Probit, &data)?, &config, &options, shrink)?,
        ModelFamily::GlmPoisson => compare_derivatives(glm_base(Family::Poisson, &data)?, &config, &options, shrink)?,
        ModelFamily::GlmBinomial => compare_derivatives(glm_base(Family::Binomial, &data)?, &config, &options, shrink)?,
        ModelFamily::GlmGaussian => compare_derivatives(glm_base(Family::Gaussian, &data)?, &config, &options, shrink)?,
    };
    print!("{}", toml::to_string(&report)?);
    Ok(())
}

fn max_errors<'a>(
    analytic: impl Iterator<Item = &'a f64>,
    numeric: impl Iterator<Item = &'a f64>,
) -> (f64, f64) {
    analytic
        .zip(numeric)
        .fold((0.0_f64, 0.0_f64), |(abs_max, rel_max), (a, n)| {
            let diff = (a - n).abs();
            (abs_max.max(diff), rel_max.max(diff / n.abs().max(1e-8)))
        })
}

fn compare_derivatives<M: LikelihoodModel>(
    base: M,
    config: &RunConfig,
    options: &FitOptions,
    shrink: f64,
) -> Result<DerivativeReport, Box<dyn Error>> {
    let model = penalized(base, &config.penalty)?;
    let fit = model.fit(options)?;
    let point: Array1<f64> = fit.params() * shrink;
    let view: ArrayView1<f64> = point.view();

    let (max_abs_score_error, max_rel_score_error) = max_errors(
        model.score(view).iter(),
        score_numdiff(&model, view).iter(),
    );
    let (max_abs_hessian_error, max_rel_hessian_error) = max_errors(
        model.hessian(view).iter(),
        hessian_numdiff(&model, view).iter(),
    );
    log::info!(
        "Largest relative errors at {shrink} x estimate: score {max_rel_score_error:.3e}, Hessian {max_rel_hessian_error:.3e}"
    );
    Ok(DerivativeReport {
        shrink,
        max_abs_score_error,
        max_rel_score_error,
        max_abs_hessian_error,
        max_rel_hessian_error,
    })
}
