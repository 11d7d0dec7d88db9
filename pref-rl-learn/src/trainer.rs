//! Reward-model fitting against preference data
//!
//! The loss computes soft-label binary cross-entropy between predicted and
//! gathered preferences, together with the exact gradient of that loss with
//! respect to each fragment's per-step rewards. Trainers feed those
//! gradients to the reward model's own `backward`/`step` hooks.

use async_trait::async_trait;
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use pref_rl_core::{
    FragmentPair, PrefRlError, Result, RewardModel, RewardModelClass, SharedEnsemble,
    SharedRewardModel,
};

use crate::dataset::PreferenceDataset;
use crate::model::PreferenceModel;

const PROB_EPS: f32 = 1e-7;

/// Scalar statistics of one reward-fitting pass
#[derive(Debug, Clone, Copy)]
pub struct RewardTrainStats {
    /// Mean preference-prediction loss over the final epoch
    pub loss: f32,
    /// Fraction of pairs where the higher-probability side matches the
    /// higher ground-truth preference side
    pub accuracy: f32,
}

/// Gradient of the loss with respect to one pair's per-step rewards
#[derive(Debug, Clone)]
pub struct PairGradient {
    /// Gradient for the first fragment's rewards
    pub first: Array1<f32>,
    /// Gradient for the second fragment's rewards
    pub second: Array1<f32>,
}

/// Loss, accuracy and reward gradients for one batch
#[derive(Debug, Clone)]
pub struct LossOutput {
    /// Mean binary cross-entropy against the gathered preferences
    pub loss: f32,
    /// Fraction of correctly ordered pairs
    pub accuracy: f32,
    /// Per-pair reward gradients
    pub gradients: Vec<PairGradient>,
}

/// Soft-label binary cross-entropy over a preference model
pub struct CrossEntropyRewardLoss {
    preference_model: PreferenceModel,
}

impl CrossEntropyRewardLoss {
    /// Create a loss over `preference_model`
    #[must_use]
    pub fn new(preference_model: PreferenceModel) -> Self {
        Self { preference_model }
    }

    /// The preference model this loss evaluates
    #[must_use]
    pub fn preference_model(&self) -> &PreferenceModel {
        &self.preference_model
    }

    /// Loss, accuracy and reward gradients for a batch of compared pairs
    ///
    /// `preferences` may be fractional (0.5 denotes a tie); this is
    /// soft-label cross-entropy, not hard classification. For
    /// ensemble-backed models `member` selects which member is evaluated.
    pub fn evaluate(
        &self,
        pairs: &[FragmentPair],
        preferences: &[f32],
        member: Option<usize>,
    ) -> Result<LossOutput> {
        if preferences.len() != pairs.len() {
            return Err(PrefRlError::Validation(format!(
                "{} preferences for {} fragment pairs",
                preferences.len(),
                pairs.len()
            )));
        }
        let (probs, diffs) = self.preference_model.forward_single(pairs, member)?;
        let n = pairs.len() as f32;
        let noise = self.preference_model.noise_prob();
        let threshold = self.preference_model.threshold();
        let discount = self.preference_model.discount_factor();

        let mut loss = 0.0;
        let mut correct = 0.0;
        let mut gradients = Vec::with_capacity(pairs.len());
        for (i, pair) in pairs.iter().enumerate() {
            let target = preferences[i];
            let p = probs[i].clamp(PROB_EPS, 1.0 - PROB_EPS);
            loss -= target * p.ln() + (1.0 - target) * (1.0 - p).ln();
            if (probs[i] > 0.5) == (target > 0.5) {
                correct += 1.0;
            }

            // d(loss)/d(diff), with the clamp zeroing saturated pairs
            let grad_prob = (p - target) / (p * (1.0 - p)) / n;
            let sigmoid = 1.0 / (1.0 + (-diffs[i].clamp(-threshold, threshold)).exp());
            let grad_diff = if diffs[i].abs() >= threshold {
                0.0
            } else {
                grad_prob * (1.0 - noise) * sigmoid * (1.0 - sigmoid)
            };

            let len = pair.first().len();
            let mut second = Array1::zeros(len);
            let mut weight = 1.0;
            for t in 0..len {
                second[t] = grad_diff * weight;
                weight *= discount;
            }
            let first = -&second;
            gradients.push(PairGradient { first, second });
        }
        Ok(LossOutput {
            loss: loss / n,
            accuracy: correct / n,
            gradients,
        })
    }
}

/// Configuration shared by the reward trainers
#[derive(Debug, Clone)]
pub struct RewardTrainerConfig {
    /// Optimization passes over the dataset per call
    pub epochs: usize,
    /// Samples per gradient step
    pub batch_size: usize,
    /// Step size handed to the model's update hook
    pub learning_rate: f32,
}

impl Default for RewardTrainerConfig {
    fn default() -> Self {
        Self {
            epochs: 3,
            batch_size: 32,
            learning_rate: 1e-3,
        }
    }
}

/// Fits a reward model to a preference dataset
#[async_trait]
pub trait RewardTrainer: Send + Sync {
    /// Run one fitting pass over `dataset`
    ///
    /// `epoch_multiplier` scales the configured number of epochs; the
    /// orchestrator uses it to train longer on the first iteration.
    async fn train(
        &mut self,
        dataset: &PreferenceDataset,
        epoch_multiplier: f32,
    ) -> Result<RewardTrainStats>;
}

fn effective_epochs(epochs: usize, multiplier: f32) -> usize {
    ((epochs as f32 * multiplier).round() as usize).max(1)
}

fn batch_of(dataset: &PreferenceDataset, indices: &[usize]) -> (Vec<FragmentPair>, Vec<f32>) {
    let mut pairs = Vec::with_capacity(indices.len());
    let mut prefs = Vec::with_capacity(indices.len());
    for &i in indices {
        if let Some(sample) = dataset.get(i) {
            pairs.push(sample.pair.clone());
            prefs.push(sample.preference);
        }
    }
    (pairs, prefs)
}

fn require_non_empty(dataset: &PreferenceDataset) -> Result<()> {
    if dataset.is_empty() {
        return Err(PrefRlError::Validation(
            "cannot fit a reward model to an empty preference dataset".to_string(),
        ));
    }
    Ok(())
}

/// Trainer for a single (non-ensemble) reward model
pub struct BasicRewardTrainer {
    model: SharedRewardModel,
    loss: CrossEntropyRewardLoss,
    config: RewardTrainerConfig,
    rng: StdRng,
}

impl BasicRewardTrainer {
    /// Create a trainer; fails if the loss is built over an ensemble-backed
    /// preference model
    pub fn new(
        model: SharedRewardModel,
        loss: CrossEntropyRewardLoss,
        config: RewardTrainerConfig,
        seed: u64,
    ) -> Result<Self> {
        if loss.preference_model().is_ensemble() {
            return Err(PrefRlError::WrongModelType {
                expected: "a single reward model",
                context: "BasicRewardTrainer",
                found: model.model_name(),
            });
        }
        Ok(Self {
            model,
            loss,
            config,
            rng: StdRng::seed_from_u64(seed),
        })
    }
}

#[async_trait]
impl RewardTrainer for BasicRewardTrainer {
    async fn train(
        &mut self,
        dataset: &PreferenceDataset,
        epoch_multiplier: f32,
    ) -> Result<RewardTrainStats> {
        require_non_empty(dataset)?;
        let epochs = effective_epochs(self.config.epochs, epoch_multiplier);
        let mut indices: Vec<usize> = (0..dataset.len()).collect();
        let mut stats = RewardTrainStats {
            loss: 0.0,
            accuracy: 0.0,
        };
        for _ in 0..epochs {
            indices.shuffle(&mut self.rng);
            let mut epoch_loss = 0.0;
            let mut epoch_correct = 0.0;
            for chunk in indices.chunks(self.config.batch_size.max(1)) {
                let (pairs, prefs) = batch_of(dataset, chunk);
                let out = self.loss.evaluate(&pairs, &prefs, None)?;
                for (pair, grad) in pairs.iter().zip(&out.gradients) {
                    self.model.backward(pair.first(), grad.first.view())?;
                    self.model.backward(pair.second(), grad.second.view())?;
                }
                self.model.step(self.config.learning_rate)?;
                epoch_loss += out.loss * pairs.len() as f32;
                epoch_correct += out.accuracy * pairs.len() as f32;
            }
            stats = RewardTrainStats {
                loss: epoch_loss / dataset.len() as f32,
                accuracy: epoch_correct / dataset.len() as f32,
            };
        }
        tracing::debug!(loss = stats.loss, accuracy = stats.accuracy, "reward fit");
        Ok(stats)
    }
}

/// Trainer for a reward ensemble
///
/// Each member is fitted on its own bootstrap resample of the dataset so
/// that members decorrelate.
pub struct EnsembleTrainer {
    ensemble: SharedEnsemble,
    loss: CrossEntropyRewardLoss,
    config: RewardTrainerConfig,
    rng: StdRng,
}

impl EnsembleTrainer {
    /// Create a trainer; `model` must classify as a literal ensemble, not
    /// merely be ensemble-backed through a wrapper
    pub fn new(
        model: &dyn RewardModel,
        loss: CrossEntropyRewardLoss,
        config: RewardTrainerConfig,
        seed: u64,
    ) -> Result<Self> {
        let ensemble = match pref_rl_core::classify(model) {
            RewardModelClass::Ensemble(handle) => handle,
            _ => {
                return Err(PrefRlError::WrongModelType {
                    expected: "RewardEnsemble",
                    context: "EnsembleTrainer",
                    found: model.model_name(),
                })
            }
        };
        Ok(Self {
            ensemble,
            loss,
            config,
            rng: StdRng::seed_from_u64(seed),
        })
    }
}

#[async_trait]
impl RewardTrainer for EnsembleTrainer {
    async fn train(
        &mut self,
        dataset: &PreferenceDataset,
        epoch_multiplier: f32,
    ) -> Result<RewardTrainStats> {
        require_non_empty(dataset)?;
        let members = self.ensemble.num_members()?;
        let epochs = effective_epochs(self.config.epochs, epoch_multiplier);
        let n = dataset.len();
        let mut total_loss = 0.0;
        let mut total_accuracy = 0.0;
        for m in 0..members {
            let mut member_stats = RewardTrainStats {
                loss: 0.0,
                accuracy: 0.0,
            };
            for _ in 0..epochs {
                // independent bootstrap resample per member and epoch
                let resample: Vec<usize> = (0..n).map(|_| self.rng.gen_range(0..n)).collect();
                let mut epoch_loss = 0.0;
                let mut epoch_correct = 0.0;
                for chunk in resample.chunks(self.config.batch_size.max(1)) {
                    let (pairs, prefs) = batch_of(dataset, chunk);
                    let out = self.loss.evaluate(&pairs, &prefs, Some(m))?;
                    let mut guard = self.ensemble.write()?;
                    let model = guard.member_mut(m)?;
                    for (pair, grad) in pairs.iter().zip(&out.gradients) {
                        model.backward(pair.first(), grad.first.view())?;
                        model.backward(pair.second(), grad.second.view())?;
                    }
                    model.step(self.config.learning_rate)?;
                    drop(guard);
                    epoch_loss += out.loss * pairs.len() as f32;
                    epoch_correct += out.accuracy * pairs.len() as f32;
                }
                member_stats = RewardTrainStats {
                    loss: epoch_loss / n as f32,
                    accuracy: epoch_correct / n as f32,
                };
            }
            tracing::debug!(
                member = m,
                loss = member_stats.loss,
                accuracy = member_stats.accuracy,
                "ensemble member fit"
            );
            total_loss += member_stats.loss;
            total_accuracy += member_stats.accuracy;
        }
        Ok(RewardTrainStats {
            loss: total_loss / members as f32,
            accuracy: total_accuracy / members as f32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;
    use pref_rl_core::{
        LinearRewardModel, RewardEnsemble, SharedEnsemble, Space, Trajectory,
    };

    fn spaces() -> (Space, Space) {
        (
            Space::boxed(vec![-100.0; 1], vec![100.0; 1], vec![1]).unwrap(),
            Space::discrete(2).unwrap(),
        )
    }

    fn plain_model(seed: u64) -> SharedRewardModel {
        let (o, a) = spaces();
        SharedRewardModel::new(Box::new(LinearRewardModel::new(o, a, seed)))
    }

    fn ensemble_model(members: usize) -> SharedRewardModel {
        let (o, a) = spaces();
        let members: Vec<Box<dyn RewardModel>> = (0..members)
            .map(|i| {
                Box::new(LinearRewardModel::new(o.clone(), a.clone(), i as u64))
                    as Box<dyn RewardModel>
            })
            .collect();
        SharedRewardModel::new(Box::new(SharedEnsemble::new(
            RewardEnsemble::new(members).unwrap(),
        )))
    }

    fn preference_model(model: &SharedRewardModel) -> PreferenceModel {
        PreferenceModel::new(model.clone(), 0.0, 1.0, 50.0).unwrap()
    }

    /// Pairs where the second fragment always takes action 1 and the first
    /// action 0, labelled with certain preference for the second.
    fn separable_dataset(pairs: usize) -> PreferenceDataset {
        let obs = |v: f32| ArrayD::from_shape_vec(vec![1], vec![v]).unwrap();
        let act = |v: f32| ArrayD::from_shape_vec(vec![1], vec![v]).unwrap();
        let mut dataset = PreferenceDataset::new();
        for i in 0..pairs {
            let base = i as f32;
            let losing = Trajectory::new(
                vec![obs(base), obs(base + 1.0), obs(base + 2.0)],
                vec![act(0.0), act(0.0)],
                vec![0.0, 0.0],
                None,
                false,
            )
            .unwrap();
            let winning = Trajectory::new(
                vec![obs(base), obs(base + 1.0), obs(base + 2.0)],
                vec![act(1.0), act(1.0)],
                vec![1.0, 1.0],
                None,
                false,
            )
            .unwrap();
            let pair = FragmentPair::new(
                losing.fragment(0, 2).unwrap(),
                winning.fragment(0, 2).unwrap(),
            )
            .unwrap();
            dataset.push(vec![pair], &[1.0]).unwrap();
        }
        dataset
    }

    #[test]
    fn basic_trainer_rejects_ensemble_backed_preference_model() {
        let model = ensemble_model(2);
        let loss = CrossEntropyRewardLoss::new(preference_model(&model));
        let result =
            BasicRewardTrainer::new(model, loss, RewardTrainerConfig::default(), 0);
        match result {
            Err(PrefRlError::WrongModelType { found, .. }) => {
                assert_eq!(found, "RewardEnsemble");
            }
            _ => panic!("expected a wrong-model-type error"),
        }
    }

    #[test]
    fn ensemble_trainer_rejects_plain_model() {
        let plain = plain_model(0);
        let ensemble = ensemble_model(2);
        let loss = CrossEntropyRewardLoss::new(preference_model(&ensemble));
        let result = EnsembleTrainer::new(&plain, loss, RewardTrainerConfig::default(), 0);
        match result {
            Err(PrefRlError::WrongModelType {
                expected, found, ..
            }) => {
                assert_eq!(expected, "RewardEnsemble");
                assert_eq!(found, "LinearRewardModel");
            }
            _ => panic!("expected a wrong-model-type error"),
        }
    }

    #[tokio::test]
    async fn basic_trainer_reduces_loss_on_separable_data() {
        let model = plain_model(7);
        let loss = CrossEntropyRewardLoss::new(preference_model(&model));
        let dataset = separable_dataset(8);

        let probe = CrossEntropyRewardLoss::new(preference_model(&model));
        let batch: (Vec<_>, Vec<_>) = (
            dataset.iter().map(|s| s.pair.clone()).collect(),
            dataset.iter().map(|s| s.preference).collect(),
        );
        let before = probe.evaluate(&batch.0, &batch.1, None).unwrap().loss;

        let mut trainer = BasicRewardTrainer::new(
            model,
            loss,
            RewardTrainerConfig {
                epochs: 20,
                batch_size: 8,
                learning_rate: 0.05,
            },
            0,
        )
        .unwrap();
        trainer.train(&dataset, 1.0).await.unwrap();

        let after = probe.evaluate(&batch.0, &batch.1, None).unwrap().loss;
        assert!(after < before, "loss did not decrease: {before} -> {after}");
    }

    #[tokio::test]
    async fn ensemble_trainer_fits_every_member() {
        let model = ensemble_model(2);
        let loss = CrossEntropyRewardLoss::new(preference_model(&model));
        let dataset = separable_dataset(6);
        let mut trainer = EnsembleTrainer::new(
            &model,
            loss,
            RewardTrainerConfig {
                epochs: 5,
                batch_size: 4,
                learning_rate: 0.05,
            },
            1,
        )
        .unwrap();
        let stats = trainer.train(&dataset, 1.0).await.unwrap();
        assert!(stats.loss.is_finite());
        assert!((0.0..=1.0).contains(&stats.accuracy));
    }

    #[test]
    fn loss_is_exact_for_indifferent_predictions() {
        let model = plain_model(0);
        let loss = CrossEntropyRewardLoss::new(
            PreferenceModel::new(model, 1.0, 1.0, 50.0).unwrap(),
        );
        // noise_prob == 1.0 pins every probability at exactly 0.5
        let dataset = separable_dataset(2);
        let pairs: Vec<_> = dataset.iter().map(|s| s.pair.clone()).collect();
        let out = loss.evaluate(&pairs, &[0.5, 0.5], None).unwrap();
        let expected = -(0.5f32.ln());
        assert!((out.loss - expected).abs() < 1e-5);
    }
}
