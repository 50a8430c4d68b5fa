#![deny(dead_code)]
#![deny(unused_imports)]

pub mod base;
pub mod data;
pub mod estimate;
pub mod inference;
pub mod model;
pub mod numdiff;
pub mod optimizer;
pub mod penalized;
pub mod penalty;
pub mod pirls;
pub mod results;

pub use base::{DiscreteModel, GlmModel, LikelihoodModel};
pub use estimate::EstimationError;
pub use inference::{CovKwds, CovarianceStatus};
pub use model::{
    CovType, DiscreteKind, Family, FitMethod, FitOptions, LinkFunction, PenaltyWeight, RunConfig,
};
pub use penalized::{PenalizedModel, PenalizedModelBuilder};
pub use penalty::{L2, Penalty, PenaltyError, PenaltyFunction, Scad, ScadSmoothed};
pub use results::FitResult;
