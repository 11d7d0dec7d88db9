//! Core traits and types for preference-based reward learning
//!
//! This crate provides the foundational abstractions shared by the
//! preference-comparison pipeline: trajectories and fragments, the reward
//! model capability (single models, ensembles and the recognized
//! uncertainty wrapper), environment and agent capabilities, and the
//! scalar-statistics sink.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod agent;
pub mod ensemble;
pub mod env;
pub mod error;
pub mod logging;
pub mod reward;
pub mod space;
pub mod trajectory;

// Re-export core traits and types
pub use agent::{RandomAgent, RlAgent};
pub use ensemble::{
    classify, AddStdRewardWrapper, RewardEnsemble, RewardModelClass, SharedEnsemble,
};
pub use env::{StepInfo, VecEnv, VecStep};
pub use error::{PrefRlError, Result};
pub use logging::{StatLogger, TracingStatLogger};
pub use reward::{LinearRewardModel, RewardModel, ScaledRewardWrapper, SharedRewardModel};
pub use space::Space;
pub use trajectory::{discounted_sum, Fragment, FragmentPair, Trajectory};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        Fragment, FragmentPair, PrefRlError, Result, RewardModel, RlAgent, SharedEnsemble,
        SharedRewardModel, Space, StatLogger, Trajectory, VecEnv,
    };
}
