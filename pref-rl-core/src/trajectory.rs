//! Trajectories, fragments and fragment pairs

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::{PrefRlError, Result};

/// Sum of rewards discounted per time step
///
/// `discount == 1.0` reduces to a plain sum. This is the single discounting
/// contract shared by preference models and synthetic preference gatherers.
#[must_use]
pub fn discounted_sum(rews: &[f32], discount: f32) -> f32 {
    if (discount - 1.0).abs() < f32::EPSILON {
        return rews.iter().sum();
    }
    let mut weight = 1.0;
    let mut total = 0.0;
    for r in rews {
        total += weight * r;
        weight *= discount;
    }
    total
}

/// Complete recorded trajectory of one episode (or episode prefix)
///
/// Holds `n + 1` observations, `n` actions and `n` rewards. The rewards are
/// the ones emitted by the environment, not a learned relabelling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    obs: Vec<ArrayD<f32>>,
    acts: Vec<ArrayD<f32>>,
    rews: Vec<f32>,
    infos: Option<Vec<serde_json::Value>>,
    terminal: bool,
}

impl Trajectory {
    /// Create a trajectory, validating the length invariant
    /// `len(obs) == len(acts) + 1 == len(rews) + 1`
    pub fn new(
        obs: Vec<ArrayD<f32>>,
        acts: Vec<ArrayD<f32>>,
        rews: Vec<f32>,
        infos: Option<Vec<serde_json::Value>>,
        terminal: bool,
    ) -> Result<Self> {
        if obs.len() != acts.len() + 1 || obs.len() != rews.len() + 1 {
            return Err(PrefRlError::Validation(format!(
                "trajectory lengths do not line up: {} observations, {} actions, {} rewards",
                obs.len(),
                acts.len(),
                rews.len()
            )));
        }
        if let Some(ref infos) = infos {
            if infos.len() != acts.len() {
                return Err(PrefRlError::Validation(format!(
                    "trajectory has {} infos for {} steps",
                    infos.len(),
                    acts.len()
                )));
            }
        }
        Ok(Self {
            obs,
            acts,
            rews,
            infos,
            terminal,
        })
    }

    /// Number of steps (transitions) in the trajectory
    #[must_use]
    pub fn len(&self) -> usize {
        self.acts.len()
    }

    /// Check if the trajectory has no steps
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.acts.is_empty()
    }

    /// Observations, one more than there are steps
    #[must_use]
    pub fn obs(&self) -> &[ArrayD<f32>] {
        &self.obs
    }

    /// Actions taken at each step
    #[must_use]
    pub fn acts(&self) -> &[ArrayD<f32>] {
        &self.acts
    }

    /// Environment rewards at each step
    #[must_use]
    pub fn rews(&self) -> &[f32] {
        &self.rews
    }

    /// Per-step auxiliary info, if recorded
    #[must_use]
    pub fn infos(&self) -> Option<&[serde_json::Value]> {
        self.infos.as_deref()
    }

    /// Whether the episode ended in a true environment termination
    /// (as opposed to truncation)
    #[must_use]
    pub fn terminal(&self) -> bool {
        self.terminal
    }

    /// Copy out a fixed-length contiguous fragment starting at `start`
    ///
    /// The fragment is terminal only if it ends at this trajectory's final
    /// observation and the trajectory itself is terminal. The data is copied,
    /// so the parent trajectory may be dropped afterwards.
    pub fn fragment(&self, start: usize, length: usize) -> Result<Fragment> {
        if length == 0 {
            return Err(PrefRlError::Validation(
                "fragment length must be positive".to_string(),
            ));
        }
        let end = start
            .checked_add(length)
            .filter(|end| *end <= self.len())
            .ok_or_else(|| {
                PrefRlError::Validation(format!(
                    "fragment [{start}, {start}+{length}) out of range for trajectory of length {}",
                    self.len()
                ))
            })?;
        let terminal = self.terminal && end == self.len();
        Ok(Fragment {
            obs: self.obs[start..=end].to_vec(),
            acts: self.acts[start..end].to_vec(),
            rews: self.rews[start..end].to_vec(),
            terminal,
        })
    }
}

/// Immutable fixed-length slice of a trajectory
///
/// The atomic unit compared by a preference. Owns its data by value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    obs: Vec<ArrayD<f32>>,
    acts: Vec<ArrayD<f32>>,
    rews: Vec<f32>,
    terminal: bool,
}

impl Fragment {
    /// Number of steps in the fragment
    #[must_use]
    pub fn len(&self) -> usize {
        self.acts.len()
    }

    /// Check if the fragment has no steps
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.acts.is_empty()
    }

    /// Observations, one more than there are steps
    #[must_use]
    pub fn obs(&self) -> &[ArrayD<f32>] {
        &self.obs
    }

    /// Actions taken at each step
    #[must_use]
    pub fn acts(&self) -> &[ArrayD<f32>] {
        &self.acts
    }

    /// Environment rewards at each step
    #[must_use]
    pub fn rews(&self) -> &[f32] {
        &self.rews
    }

    /// Whether the fragment ends in a true environment termination
    #[must_use]
    pub fn terminal(&self) -> bool {
        self.terminal
    }

    /// Whether step `t` is the final, terminating step of its episode
    #[must_use]
    pub fn done_at(&self, t: usize) -> bool {
        self.terminal && t + 1 == self.len()
    }

    /// Discounted sum of this fragment's environment rewards
    #[must_use]
    pub fn discounted_return(&self, discount: f32) -> f32 {
        discounted_sum(&self.rews, discount)
    }
}

/// Ordered pair of equal-length fragments, the unit of comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentPair {
    first: Fragment,
    second: Fragment,
}

impl FragmentPair {
    /// Create a pair, validating that both fragments have the same length
    pub fn new(first: Fragment, second: Fragment) -> Result<Self> {
        if first.len() != second.len() {
            return Err(PrefRlError::Validation(format!(
                "fragment pair lengths differ: {} vs {}",
                first.len(),
                second.len()
            )));
        }
        Ok(Self { first, second })
    }

    /// The first fragment of the pair
    #[must_use]
    pub fn first(&self) -> &Fragment {
        &self.first
    }

    /// The second fragment of the pair
    ///
    /// A preference is the probability that this fragment is preferred.
    #[must_use]
    pub fn second(&self) -> &Fragment {
        &self.second
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn obs(v: f32) -> ArrayD<f32> {
        ArrayD::from_shape_vec(vec![1], vec![v]).unwrap()
    }

    fn act(v: f32) -> ArrayD<f32> {
        ArrayD::from_shape_vec(vec![1], vec![v]).unwrap()
    }

    fn make_trajectory(steps: usize, terminal: bool) -> Trajectory {
        Trajectory::new(
            (0..=steps).map(|i| obs(i as f32)).collect(),
            (0..steps).map(|_| act(0.0)).collect(),
            (0..steps).map(|i| i as f32).collect(),
            None,
            terminal,
        )
        .unwrap()
    }

    #[test]
    fn new_rejects_mismatched_lengths() {
        let result = Trajectory::new(
            vec![obs(0.0), obs(1.0)],
            vec![act(0.0), act(1.0)],
            vec![0.0],
            None,
            false,
        );
        assert!(matches!(result, Err(PrefRlError::Validation(_))));
    }

    #[test]
    fn fragment_terminal_only_at_parent_end() {
        let traj = make_trajectory(3, true);
        for start in 0..2 {
            let frag = traj.fragment(start, 2).unwrap();
            let ends_at_parent_end = frag.obs().last() == traj.obs().last();
            assert_eq!(frag.terminal(), ends_at_parent_end);
        }

        let truncated = make_trajectory(3, false);
        let frag = truncated.fragment(1, 2).unwrap();
        assert!(!frag.terminal());
    }

    #[test]
    fn fragment_copies_the_right_slice() {
        let traj = make_trajectory(4, false);
        let frag = traj.fragment(1, 2).unwrap();
        assert_eq!(frag.len(), 2);
        assert_eq!(frag.obs().len(), 3);
        assert_eq!(frag.rews(), &[1.0, 2.0]);
        assert_eq!(frag.obs()[0], obs(1.0));
    }

    #[test]
    fn fragment_out_of_range_is_rejected() {
        let traj = make_trajectory(3, false);
        assert!(traj.fragment(2, 2).is_err());
        assert!(traj.fragment(0, 0).is_err());
    }

    #[test]
    fn discounted_sum_matches_hand_computation() {
        let rews = [1.0, 2.0, 4.0];
        assert_relative_eq!(discounted_sum(&rews, 1.0), 7.0);
        assert_relative_eq!(discounted_sum(&rews, 0.5), 1.0 + 1.0 + 1.0);
    }

    #[test]
    fn pair_requires_equal_lengths() {
        let traj = make_trajectory(4, false);
        let short = traj.fragment(0, 1).unwrap();
        let long = traj.fragment(0, 2).unwrap();
        assert!(FragmentPair::new(short, long).is_err());
    }
}
