//! Preference-comparison reward learning
//!
//! This crate implements the active-learning and reward-model-fitting
//! pipeline: trajectory generators (fixed datasets, agent-driven rollouts
//! and mixtures), fragmenters that carve trajectories into comparison
//! pairs, preference gatherers, a bounded preference dataset, the
//! Bradley-Terry preference model, reward trainers and the query schedules
//! and orchestrator that drive the iterated loop.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod comparisons;
pub mod dataset;
pub mod fragmenter;
pub mod gatherer;
pub mod generator;
pub mod model;
pub mod schedule;
pub mod trainer;

// Re-export the pipeline surface
pub use comparisons::{PreferenceComparisons, PreferenceComparisonsConfig};
pub use dataset::{PreferenceDataset, PreferenceSample};
pub use fragmenter::{ActiveSelectionFragmenter, Fragmenter, RandomFragmenter, UncertaintyOn};
pub use gatherer::{PreferenceGatherer, SyntheticGatherer, SyntheticGathererConfig};
pub use generator::{
    AgentTrainer, AgentTrainerConfig, MixtureOfTrajectoryGenerators, TrajectoryDataset,
    TrajectoryGenerator,
};
pub use model::{PreferenceEval, PreferenceModel};
pub use schedule::QuerySchedule;
pub use trainer::{
    BasicRewardTrainer, CrossEntropyRewardLoss, EnsembleTrainer, RewardTrainStats, RewardTrainer,
    RewardTrainerConfig,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        Fragmenter, PreferenceComparisons, PreferenceComparisonsConfig, PreferenceDataset,
        PreferenceGatherer, PreferenceModel, QuerySchedule, RewardTrainer, TrajectoryGenerator,
    };
}
