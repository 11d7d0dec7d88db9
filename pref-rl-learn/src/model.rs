//! Probabilistic preference model
//!
//! Maps a fragment pair to the probability that its second fragment is
//! preferred, by summing discounted learned rewards per fragment and passing
//! the difference through a clamped sigmoid (a Bradley-Terry model), then
//! blending in a floor probability for random disagreement.

use ndarray::{Array1, Array2};

use pref_rl_core::{
    discounted_sum, FragmentPair, PrefRlError, Result, RewardModel, RewardModelClass,
    SharedRewardModel,
};

/// Probabilities and raw logit differences for a batch of fragment pairs
#[derive(Debug, Clone)]
pub enum PreferenceEval {
    /// One probability per pair, from a single model or a named member
    Single {
        /// Preference probability per pair
        probs: Array1<f32>,
        /// Raw (unclamped) return difference per pair
        diffs: Array1<f32>,
    },
    /// Per-member outputs of an ensemble, shape `(pairs, members)`
    PerMember {
        /// Preference probability per pair and member
        probs: Array2<f32>,
        /// Raw (unclamped) return difference per pair and member
        diffs: Array2<f32>,
    },
}

/// Bradley-Terry preference model over a shared reward model
pub struct PreferenceModel {
    model: SharedRewardModel,
    class: RewardModelClass,
    noise_prob: f32,
    discount_factor: f32,
    threshold: f32,
}

impl std::fmt::Debug for PreferenceModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreferenceModel")
            .field("class", &self.class)
            .field("noise_prob", &self.noise_prob)
            .field("discount_factor", &self.discount_factor)
            .field("threshold", &self.threshold)
            .finish()
    }
}

impl PreferenceModel {
    /// Create a preference model over `model`
    ///
    /// `noise_prob` is the probability mass reserved for random
    /// disagreement, `discount_factor` down-weights later steps within a
    /// fragment (`1.0` disables discounting) and `threshold` clamps logit
    /// differences before the sigmoid.
    pub fn new(
        model: SharedRewardModel,
        noise_prob: f32,
        discount_factor: f32,
        threshold: f32,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&noise_prob) {
            return Err(PrefRlError::Validation(format!(
                "noise_prob must lie in [0, 1], got {noise_prob}"
            )));
        }
        if !(discount_factor > 0.0 && discount_factor <= 1.0) {
            return Err(PrefRlError::Validation(format!(
                "discount_factor must lie in (0, 1], got {discount_factor}"
            )));
        }
        if threshold <= 0.0 {
            return Err(PrefRlError::Validation(format!(
                "threshold must be positive, got {threshold}"
            )));
        }
        let class = model.classify()?;
        if let RewardModelClass::InvalidWrap { wrapper } = class {
            return Err(PrefRlError::Validation(format!(
                "a reward ensemble may only be wrapped by AddStdRewardWrapper, found {wrapper}"
            )));
        }
        Ok(Self {
            model,
            class,
            noise_prob,
            discount_factor,
            threshold,
        })
    }

    /// Whether the wrapped reward model is backed by an ensemble
    ///
    /// A property of the classification computed at construction, not a
    /// type check.
    #[must_use]
    pub fn is_ensemble(&self) -> bool {
        self.class.is_ensemble_backed()
    }

    /// Number of ensemble members, or 1 for a single model
    pub fn num_members(&self) -> Result<usize> {
        match self.class.ensemble() {
            Some(ensemble) => ensemble.num_members(),
            None => Ok(1),
        }
    }

    /// The shared reward model this preference model evaluates
    #[must_use]
    pub fn model(&self) -> &SharedRewardModel {
        &self.model
    }

    /// Floor probability mass reserved for random disagreement
    #[must_use]
    pub fn noise_prob(&self) -> f32 {
        self.noise_prob
    }

    /// Per-step discount applied within fragments
    #[must_use]
    pub fn discount_factor(&self) -> f32 {
        self.discount_factor
    }

    /// Clamp magnitude for logit differences
    #[must_use]
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Preference probability from a raw return difference
    #[must_use]
    pub fn probability(&self, diff: f32) -> f32 {
        let clamped = diff.clamp(-self.threshold, self.threshold);
        let sigmoid = 1.0 / (1.0 + (-clamped).exp());
        self.noise_prob * 0.5 + (1.0 - self.noise_prob) * sigmoid
    }

    /// Evaluate a batch of fragment pairs
    ///
    /// For an ensemble-backed model with `member` omitted, every member is
    /// evaluated and the outputs are stacked along a member axis. Passing a
    /// member index on a non-ensemble model is a validation error.
    pub fn forward(&self, pairs: &[FragmentPair], member: Option<usize>) -> Result<PreferenceEval> {
        match (self.class.ensemble(), member) {
            (Some(ensemble), None) => {
                let members = ensemble.num_members()?;
                let mut probs = Array2::zeros((pairs.len(), members));
                let mut diffs = Array2::zeros((pairs.len(), members));
                let guard = ensemble.read()?;
                for (i, pair) in pairs.iter().enumerate() {
                    let rews1 = guard.rewards_per_member(pair.first())?;
                    let rews2 = guard.rewards_per_member(pair.second())?;
                    for m in 0..members {
                        let d =
                            self.return_diff(rews1.column(m).to_vec(), rews2.column(m).to_vec());
                        diffs[[i, m]] = d;
                        probs[[i, m]] = self.probability(d);
                    }
                }
                Ok(PreferenceEval::PerMember { probs, diffs })
            }
            (Some(ensemble), Some(m)) => {
                let members = ensemble.num_members()?;
                if m >= members {
                    return Err(PrefRlError::Validation(format!(
                        "ensemble member index {m} out of range for {members} members"
                    )));
                }
                let mut probs = Array1::zeros(pairs.len());
                let mut diffs = Array1::zeros(pairs.len());
                let guard = ensemble.read()?;
                for (i, pair) in pairs.iter().enumerate() {
                    let rews1 = guard.member(m)?.rewards(pair.first())?;
                    let rews2 = guard.member(m)?.rewards(pair.second())?;
                    let d = self.return_diff(rews1.to_vec(), rews2.to_vec());
                    diffs[i] = d;
                    probs[i] = self.probability(d);
                }
                Ok(PreferenceEval::Single { probs, diffs })
            }
            (None, Some(_)) => Err(PrefRlError::Validation(
                "ensemble member index given for a non-ensemble reward model".to_string(),
            )),
            (None, None) => {
                let mut probs = Array1::zeros(pairs.len());
                let mut diffs = Array1::zeros(pairs.len());
                let guard = self.model.read()?;
                for (i, pair) in pairs.iter().enumerate() {
                    let rews1 = guard.rewards(pair.first())?;
                    let rews2 = guard.rewards(pair.second())?;
                    let d = self.return_diff(rews1.to_vec(), rews2.to_vec());
                    diffs[i] = d;
                    probs[i] = self.probability(d);
                }
                Ok(PreferenceEval::Single { probs, diffs })
            }
        }
    }

    /// Single-probability evaluation, as used by the training loss
    ///
    /// For ensemble-backed models a member index is mandatory here.
    pub fn forward_single(
        &self,
        pairs: &[FragmentPair],
        member: Option<usize>,
    ) -> Result<(Array1<f32>, Array1<f32>)> {
        if self.is_ensemble() && member.is_none() {
            return Err(PrefRlError::Validation(
                "`ensemble_member_index` required for ensemble models".to_string(),
            ));
        }
        match self.forward(pairs, member)? {
            PreferenceEval::Single { probs, diffs } => Ok((probs, diffs)),
            PreferenceEval::PerMember { .. } => Err(PrefRlError::Consistency(
                "per-member evaluation on the single-probability path".to_string(),
            )),
        }
    }

    fn return_diff(&self, rews1: Vec<f32>, rews2: Vec<f32>) -> f32 {
        discounted_sum(&rews2, self.discount_factor)
            - discounted_sum(&rews1, self.discount_factor)
    }
}
