//! Trajectory fragmentation
//!
//! Fragmenters carve a batch of trajectories into fixed-length fragment
//! pairs for comparison. The random fragmenter draws uniformly over all
//! valid start offsets in the corpus; the active fragmenter re-ranks an
//! oversampled candidate set by ensemble disagreement.

use ndarray::ArrayView1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, WeightedIndex};
use std::str::FromStr;

use pref_rl_core::{FragmentPair, PrefRlError, Result, Trajectory};

use crate::model::{PreferenceEval, PreferenceModel};

/// Carves trajectories into fragment pairs
pub trait Fragmenter: Send + Sync {
    /// Produce `num_pairs` pairs of `fragment_length`-step fragments
    fn fragment(
        &mut self,
        trajectories: &[Trajectory],
        fragment_length: usize,
        num_pairs: usize,
    ) -> Result<Vec<FragmentPair>>;
}

/// Uniformly random fragmenter
///
/// Trajectories are oversampled with replacement, weighted by their number
/// of valid start offsets, so that every possible fragment in the corpus is
/// equally likely.
pub struct RandomFragmenter {
    rng: StdRng,
    warning_threshold: usize,
}

impl RandomFragmenter {
    /// Create a fragmenter; a warning is emitted when fewer than
    /// `warning_threshold` distinct trajectories are available
    #[must_use]
    pub fn new(seed: u64, warning_threshold: usize) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            warning_threshold,
        }
    }
}

impl Fragmenter for RandomFragmenter {
    fn fragment(
        &mut self,
        trajectories: &[Trajectory],
        fragment_length: usize,
        num_pairs: usize,
    ) -> Result<Vec<FragmentPair>> {
        if fragment_length == 0 {
            return Err(PrefRlError::Validation(
                "fragment length must be positive".to_string(),
            ));
        }
        let usable: Vec<&Trajectory> = trajectories
            .iter()
            .filter(|t| t.len() >= fragment_length)
            .collect();
        if usable.is_empty() {
            return Err(PrefRlError::Validation(
                "no trajectories are long enough for the desired fragment length".to_string(),
            ));
        }
        if usable.len() < self.warning_threshold {
            tracing::warn!(
                available = usable.len(),
                threshold = self.warning_threshold,
                "few trajectories are long enough to fragment; fragment diversity may suffer"
            );
        }

        // weight by valid start offsets so every offset in the corpus is
        // equally likely
        let weights: Vec<f32> = usable
            .iter()
            .map(|t| (t.len() - fragment_length + 1) as f32)
            .collect();
        let by_offsets = WeightedIndex::new(&weights)
            .map_err(|e| PrefRlError::Validation(e.to_string()))?;

        let mut fragments = Vec::with_capacity(2 * num_pairs);
        for _ in 0..2 * num_pairs {
            let traj = usable[by_offsets.sample(&mut self.rng)];
            let start = self.rng.gen_range(0..=traj.len() - fragment_length);
            fragments.push(traj.fragment(start, fragment_length)?);
        }

        let mut pairs = Vec::with_capacity(num_pairs);
        let mut iter = fragments.into_iter();
        while let (Some(first), Some(second)) = (iter.next(), iter.next()) {
            pairs.push(FragmentPair::new(first, second)?);
        }
        Ok(pairs)
    }
}

/// Axis along which ensemble disagreement is measured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UncertaintyOn {
    /// Variance of the raw logit (return) differences
    Logit,
    /// Variance of the preference probabilities
    Probability,
    /// Variance of the implied binary labels (probability thresholded
    /// at 0.5)
    Label,
}

impl FromStr for UncertaintyOn {
    type Err = PrefRlError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "logit" => Ok(Self::Logit),
            "probability" => Ok(Self::Probability),
            "label" => Ok(Self::Label),
            other => Err(PrefRlError::Validation(format!(
                "`{other}` not supported; `uncertainty_on` should be one of `logit`, \
                 `probability` or `label`"
            ))),
        }
    }
}

/// Active fragmenter selecting the pairs the ensemble disagrees on most
///
/// Oversamples candidates from a base fragmenter, scores each candidate by
/// the variance across ensemble members of the chosen axis, and keeps the
/// highest-variance pairs.
pub struct ActiveSelectionFragmenter {
    base: Box<dyn Fragmenter>,
    preference_model: PreferenceModel,
    fragment_sample_factor: f32,
    uncertainty_on: UncertaintyOn,
}

impl ActiveSelectionFragmenter {
    /// Create an active fragmenter over an ensemble-backed preference model
    pub fn new(
        preference_model: PreferenceModel,
        base: Box<dyn Fragmenter>,
        fragment_sample_factor: f32,
        uncertainty_on: UncertaintyOn,
    ) -> Result<Self> {
        if !preference_model.is_ensemble() {
            return Err(PrefRlError::Validation(
                "preference model is not backed by a reward ensemble; active selection \
                 needs member disagreement"
                    .to_string(),
            ));
        }
        if fragment_sample_factor < 1.0 {
            return Err(PrefRlError::Validation(format!(
                "fragment_sample_factor must be at least 1, got {fragment_sample_factor}"
            )));
        }
        Ok(Self {
            base,
            preference_model,
            fragment_sample_factor,
            uncertainty_on,
        })
    }

    /// Population variance across members of the configured axis
    fn variance_estimate(&self, probs: ArrayView1<f32>, diffs: ArrayView1<f32>) -> f32 {
        let values: Vec<f32> = match self.uncertainty_on {
            UncertaintyOn::Logit => diffs.to_vec(),
            UncertaintyOn::Probability => probs.to_vec(),
            UncertaintyOn::Label => probs
                .iter()
                .map(|p| if *p > 0.5 { 1.0 } else { 0.0 })
                .collect(),
        };
        let n = values.len() as f32;
        let mean = values.iter().sum::<f32>() / n;
        values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n
    }
}

impl Fragmenter for ActiveSelectionFragmenter {
    fn fragment(
        &mut self,
        trajectories: &[Trajectory],
        fragment_length: usize,
        num_pairs: usize,
    ) -> Result<Vec<FragmentPair>> {
        let oversampled = (self.fragment_sample_factor * num_pairs as f32).ceil() as usize;
        let candidates = self
            .base
            .fragment(trajectories, fragment_length, oversampled)?;
        if candidates.len() <= num_pairs {
            return Ok(candidates);
        }

        let eval = self.preference_model.forward(&candidates, None)?;
        let (probs, diffs) = match eval {
            PreferenceEval::PerMember { probs, diffs } => (probs, diffs),
            PreferenceEval::Single { .. } => {
                return Err(PrefRlError::Consistency(
                    "ensemble-backed preference model produced a single evaluation".to_string(),
                ))
            }
        };

        let mut scored: Vec<(usize, f32)> = (0..candidates.len())
            .map(|i| (i, self.variance_estimate(probs.row(i), diffs.row(i))))
            .collect();
        // stable sort keeps the original order among ties
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut candidates: Vec<Option<FragmentPair>> = candidates.into_iter().map(Some).collect();
        Ok(scored
            .into_iter()
            .take(num_pairs)
            .filter_map(|(i, _)| candidates[i].take())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;
    use pref_rl_core::{
        LinearRewardModel, RewardEnsemble, RewardModel, ScaledRewardWrapper, SharedEnsemble,
        SharedRewardModel, Space, Trajectory,
    };

    fn obs1(v: f32) -> ArrayD<f32> {
        ArrayD::from_shape_vec(vec![1], vec![v]).unwrap()
    }

    fn make_trajectory(steps: usize, terminal: bool) -> Trajectory {
        Trajectory::new(
            (0..=steps).map(|i| obs1(i as f32)).collect(),
            (0..steps).map(|_| obs1(0.0)).collect(),
            (0..steps).map(|_| 0.0).collect(),
            None,
            terminal,
        )
        .unwrap()
    }

    #[test]
    fn too_short_trajectories_are_rejected() {
        let mut fragmenter = RandomFragmenter::new(0, 0);
        let trajectories = vec![make_trajectory(3, false)];
        let result = fragmenter.fragment(&trajectories, 10_000, 2);
        match result {
            Err(PrefRlError::Validation(message)) => {
                assert!(message.contains("long enough"));
            }
            _ => panic!("expected a validation error"),
        }
    }

    #[test]
    fn fragment_terminal_flags_follow_parents() {
        let trajectories = vec![make_trajectory(3, true), make_trajectory(2, false)];
        let mut fragmenter = RandomFragmenter::new(0, 0);
        for _ in 0..5 {
            for pair in fragmenter.fragment(&trajectories, 2, 2).unwrap() {
                for frag in [pair.first(), pair.second()] {
                    let ends_at_three = frag.obs().last() == Some(&obs1(3.0));
                    assert_eq!(frag.terminal(), ends_at_three);
                }
            }
        }
    }

    #[test]
    fn same_seed_reproduces_fragments() {
        let trajectories = vec![make_trajectory(10, false), make_trajectory(8, false)];
        let mut a = RandomFragmenter::new(42, 0);
        let mut b = RandomFragmenter::new(42, 0);
        let pairs_a = a.fragment(&trajectories, 3, 4).unwrap();
        let pairs_b = b.fragment(&trajectories, 3, 4).unwrap();
        assert_eq!(pairs_a, pairs_b);

        let mut c = RandomFragmenter::new(7, 0);
        let pairs_c = c.fragment(&trajectories, 3, 4).unwrap();
        assert_ne!(pairs_a, pairs_c);
    }

    #[test]
    fn uncertainty_axis_parsing() {
        assert_eq!(UncertaintyOn::from_str("logit").unwrap(), UncertaintyOn::Logit);
        assert_eq!(
            UncertaintyOn::from_str("probability").unwrap(),
            UncertaintyOn::Probability
        );
        assert_eq!(UncertaintyOn::from_str("label").unwrap(), UncertaintyOn::Label);
        let err = UncertaintyOn::from_str("entropy").unwrap_err();
        assert!(err.to_string().contains("`uncertainty_on` should be"));
    }

    fn ensemble_preference_model() -> PreferenceModel {
        let obs_space = Space::boxed(vec![-100.0], vec![100.0], vec![1]).unwrap();
        let act_space = Space::discrete(2).unwrap();
        let members: Vec<Box<dyn RewardModel>> = (0..2)
            .map(|i| {
                Box::new(LinearRewardModel::new(obs_space.clone(), act_space.clone(), i))
                    as Box<dyn RewardModel>
            })
            .collect();
        let shared = SharedEnsemble::new(RewardEnsemble::new(members).unwrap());
        PreferenceModel::new(
            SharedRewardModel::new(Box::new(shared)),
            0.1,
            0.9,
            50.0,
        )
        .unwrap()
    }

    #[test]
    fn non_ensemble_preference_model_is_rejected() {
        let obs_space = Space::boxed(vec![-100.0], vec![100.0], vec![1]).unwrap();
        let act_space = Space::discrete(2).unwrap();
        let pm = PreferenceModel::new(
            SharedRewardModel::new(Box::new(LinearRewardModel::new(obs_space, act_space, 0))),
            0.1,
            0.9,
            50.0,
        )
        .unwrap();
        let result = ActiveSelectionFragmenter::new(
            pm,
            Box::new(RandomFragmenter::new(0, 0)),
            2.0,
            UncertaintyOn::Logit,
        );
        assert!(matches!(result, Err(PrefRlError::Validation(_))));
    }

    /// Base fragmenter returning a fixed candidate list, for deterministic
    /// active-selection tests.
    struct FixedFragmenter {
        pairs: Vec<FragmentPair>,
    }

    impl Fragmenter for FixedFragmenter {
        fn fragment(
            &mut self,
            _trajectories: &[Trajectory],
            _fragment_length: usize,
            _num_pairs: usize,
        ) -> Result<Vec<FragmentPair>> {
            Ok(self.pairs.clone())
        }
    }

    #[test]
    fn highest_variance_pair_is_selected_first() {
        // Members are LinearRewardModel with different seeds, so their
        // disagreement grows with the observation magnitude: a pair built
        // from large observations has higher member variance than one built
        // from observations near zero.
        let small = Trajectory::new(
            vec![obs1(0.0), obs1(0.1), obs1(0.2)],
            vec![obs1(0.0), obs1(1.0)],
            vec![0.0, 0.0],
            None,
            false,
        )
        .unwrap();
        let large = Trajectory::new(
            vec![obs1(0.0), obs1(90.0), obs1(-90.0)],
            vec![obs1(0.0), obs1(1.0)],
            vec![0.0, 0.0],
            None,
            false,
        )
        .unwrap();
        let low_variance = FragmentPair::new(
            small.fragment(0, 2).unwrap(),
            small.fragment(0, 2).unwrap(),
        )
        .unwrap();
        let high_variance = FragmentPair::new(
            small.fragment(0, 2).unwrap(),
            large.fragment(0, 2).unwrap(),
        )
        .unwrap();

        for axis in [UncertaintyOn::Logit, UncertaintyOn::Probability] {
            let mut fragmenter = ActiveSelectionFragmenter::new(
                ensemble_preference_model(),
                Box::new(FixedFragmenter {
                    pairs: vec![low_variance.clone(), high_variance.clone()],
                }),
                2.0,
                axis,
            )
            .unwrap();
            let selected = fragmenter.fragment(&[], 2, 1).unwrap();
            assert_eq!(selected.len(), 1);
            assert_eq!(selected[0], high_variance);
        }
    }
}
