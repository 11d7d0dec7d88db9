//! Preference-comparisons training loop
//!
//! The orchestrator drives the iterated collect/compare/fit cycle: per
//! iteration it trains the trajectory generator, samples fresh trajectories,
//! fragments them into comparison pairs, gathers preferences, grows the
//! bounded dataset and refits the reward model against it. Each phase runs
//! to completion before the next starts; a failing phase surfaces its error
//! instead of being caught and skipped.

use pref_rl_core::{
    PrefRlError, Result, RewardModelClass, SharedRewardModel, StatLogger,
};

use crate::dataset::PreferenceDataset;
use crate::fragmenter::Fragmenter;
use crate::gatherer::PreferenceGatherer;
use crate::generator::TrajectoryGenerator;
use crate::model::PreferenceModel;
use crate::schedule::QuerySchedule;
use crate::trainer::{
    BasicRewardTrainer, CrossEntropyRewardLoss, EnsembleTrainer, RewardTrainStats, RewardTrainer,
    RewardTrainerConfig,
};

/// Configuration for [`PreferenceComparisons`]
#[derive(Debug, Clone)]
pub struct PreferenceComparisonsConfig {
    /// Number of collect/compare/fit iterations
    pub num_iterations: usize,
    /// Length of the compared fragments, in steps
    pub fragment_length: usize,
    /// Factor by which to oversample transitions relative to the steps the
    /// requested fragments strictly need
    pub transition_oversampling: f32,
    /// Fraction of the comparison budget spent up front, on top of the
    /// first iteration's scheduled share
    pub initial_comparison_frac: f32,
    /// Epoch multiplier applied to reward fitting on the first iteration
    /// only
    pub initial_epoch_multiplier: f32,
    /// How the comparison budget is spread across iterations
    pub query_schedule: QuerySchedule,
    /// Floor probability mass for random disagreement in the default
    /// preference model
    pub noise_prob: f32,
    /// Per-step discount within fragments in the default preference model
    pub discount_factor: f32,
    /// Logit clamp magnitude in the default preference model
    pub threshold: f32,
    /// Configuration of the automatically selected reward trainer
    pub trainer: RewardTrainerConfig,
    /// Seed for the automatically selected reward trainer
    pub seed: u64,
}

impl Default for PreferenceComparisonsConfig {
    fn default() -> Self {
        Self {
            num_iterations: 5,
            fragment_length: 50,
            transition_oversampling: 1.0,
            initial_comparison_frac: 0.1,
            initial_epoch_multiplier: 4.0,
            query_schedule: QuerySchedule::Hyperbolic,
            noise_prob: 0.0,
            discount_factor: 1.0,
            threshold: 50.0,
            trainer: RewardTrainerConfig::default(),
            seed: 0,
        }
    }
}

/// Iterated preference-based reward learning
///
/// Owns the whole pipeline below it and steps through `num_iterations`
/// collect/compare/fit states when [`PreferenceComparisons::train`] is
/// called. The reward trainer is chosen automatically from the reward
/// model's classification unless one is supplied.
pub struct PreferenceComparisons {
    trajectory_generator: Box<dyn TrajectoryGenerator>,
    fragmenter: Box<dyn Fragmenter>,
    gatherer: Box<dyn PreferenceGatherer>,
    reward_trainer: Box<dyn RewardTrainer>,
    dataset: PreferenceDataset,
    logger: Box<dyn StatLogger>,
    config: PreferenceComparisonsConfig,
}

impl std::fmt::Debug for PreferenceComparisons {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreferenceComparisons")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PreferenceComparisons {
    /// Wire up the pipeline
    ///
    /// Fails with a validation error if the reward model hides an ensemble
    /// behind anything but the recognized uncertainty wrapper, or if the
    /// configuration is out of range. With `reward_trainer` omitted, an
    /// [`EnsembleTrainer`] is built for ensemble-backed models and a
    /// [`BasicRewardTrainer`] otherwise.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        trajectory_generator: Box<dyn TrajectoryGenerator>,
        reward_model: SharedRewardModel,
        fragmenter: Box<dyn Fragmenter>,
        gatherer: Box<dyn PreferenceGatherer>,
        reward_trainer: Option<Box<dyn RewardTrainer>>,
        dataset: PreferenceDataset,
        logger: Box<dyn StatLogger>,
        config: PreferenceComparisonsConfig,
    ) -> Result<Self> {
        if config.num_iterations == 0 {
            return Err(PrefRlError::Validation(
                "num_iterations must be positive".to_string(),
            ));
        }
        if config.fragment_length == 0 {
            return Err(PrefRlError::Validation(
                "fragment_length must be positive".to_string(),
            ));
        }
        if !(config.transition_oversampling > 0.0) {
            return Err(PrefRlError::Validation(format!(
                "transition_oversampling must be positive, got {}",
                config.transition_oversampling
            )));
        }
        if !(0.0..1.0).contains(&config.initial_comparison_frac) {
            return Err(PrefRlError::Validation(format!(
                "initial_comparison_frac must lie in [0, 1), got {}",
                config.initial_comparison_frac
            )));
        }
        if config.initial_epoch_multiplier <= 0.0 {
            return Err(PrefRlError::Validation(format!(
                "initial_epoch_multiplier must be positive, got {}",
                config.initial_epoch_multiplier
            )));
        }

        let class = reward_model.classify()?;
        if let RewardModelClass::InvalidWrap { wrapper } = class {
            return Err(PrefRlError::Validation(format!(
                "a reward ensemble may only be wrapped by AddStdRewardWrapper, found {wrapper}"
            )));
        }
        let reward_trainer = match reward_trainer {
            Some(trainer) => trainer,
            None => {
                let preference_model = PreferenceModel::new(
                    reward_model.clone(),
                    config.noise_prob,
                    config.discount_factor,
                    config.threshold,
                )?;
                let loss = CrossEntropyRewardLoss::new(preference_model);
                match &class {
                    RewardModelClass::Ensemble(ensemble)
                    | RewardModelClass::WrappedEnsemble(ensemble) => Box::new(
                        EnsembleTrainer::new(ensemble, loss, config.trainer.clone(), config.seed)?,
                    )
                        as Box<dyn RewardTrainer>,
                    _ => Box::new(BasicRewardTrainer::new(
                        reward_model,
                        loss,
                        config.trainer.clone(),
                        config.seed,
                    )?),
                }
            }
        };

        Ok(Self {
            trajectory_generator,
            fragmenter,
            gatherer,
            reward_trainer,
            dataset,
            logger,
            config,
        })
    }

    /// The accumulated preference dataset
    #[must_use]
    pub fn dataset(&self) -> &PreferenceDataset {
        &self.dataset
    }

    /// Run the full loop: `total_timesteps` of agent training and
    /// `total_comparisons` preference queries, spread over the configured
    /// iterations
    ///
    /// Returns the reward loss and accuracy of the final iteration's fit.
    pub async fn train(
        &mut self,
        total_timesteps: usize,
        total_comparisons: usize,
    ) -> Result<RewardTrainStats> {
        let iterations = self.config.num_iterations;
        let initial = ((self.config.initial_comparison_frac * total_comparisons as f32).round()
            as usize)
            .min(total_comparisons);
        let mut queries_per_iteration = self
            .config
            .query_schedule
            .allocate(iterations, total_comparisons - initial)?;
        queries_per_iteration[0] += initial;

        let timesteps_each = total_timesteps / iterations;
        let mut stats = RewardTrainStats {
            loss: f32::NAN,
            accuracy: f32::NAN,
        };
        for (i, &queries) in queries_per_iteration.iter().enumerate() {
            tracing::info!(iteration = i, queries, "preference comparison iteration");

            // agent improvement; the division remainder lands on the final
            // iteration
            let mut agent_steps = timesteps_each;
            if i == iterations - 1 {
                agent_steps += total_timesteps % iterations;
            }
            self.trajectory_generator.train(agent_steps).await?;

            // collect and compare; sampling always runs so the generator's
            // rollout buffer is drained even on a zero-query iteration
            let needed = (self.config.transition_oversampling
                * (2 * queries * self.config.fragment_length) as f32)
                .ceil() as usize;
            let trajectories = self.trajectory_generator.sample(needed).await?;
            if queries > 0 {
                let pairs =
                    self.fragmenter
                        .fragment(&trajectories, self.config.fragment_length, queries)?;
                let preferences = self.gatherer.gather(&pairs).await?;
                self.dataset.push(pairs, &preferences)?;
            }

            // refit the reward model against everything gathered so far
            let multiplier = if i == 0 {
                self.config.initial_epoch_multiplier
            } else {
                1.0
            };
            stats = self.reward_trainer.train(&self.dataset, multiplier).await?;

            self.logger.record("preferences/queries", queries as f64);
            self.logger
                .record("preferences/dataset_size", self.dataset.len() as f64);
            self.logger.record("reward/loss", f64::from(stats.loss));
            self.logger
                .record("reward/accuracy", f64::from(stats.accuracy));
            self.logger.dump(i);
        }
        Ok(stats)
    }
}
