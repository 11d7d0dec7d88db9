//! Small deterministic environment for examples and tests

use async_trait::async_trait;
use ndarray::ArrayD;

use pref_rl_core::{PrefRlError, Result, Space, StepInfo, VecEnv, VecStep};

/// Deterministic vectorized environment counting steps within an episode
///
/// Observations are the step counter broadcast across `obs_dim` entries; the
/// reward of a step is the chosen action index. Episodes end after
/// `episode_len` steps, either as true terminations or as truncations.
pub struct CountingVecEnv {
    num_envs: usize,
    episode_len: usize,
    obs_dim: usize,
    terminal: bool,
    t: Vec<usize>,
}

impl CountingVecEnv {
    /// Create an environment with `num_envs` sub-environments
    #[must_use]
    pub fn new(num_envs: usize, episode_len: usize, obs_dim: usize, terminal: bool) -> Self {
        Self {
            num_envs,
            episode_len,
            obs_dim,
            terminal,
            t: vec![0; num_envs],
        }
    }

    fn observe(&self, t: usize) -> ArrayD<f32> {
        ArrayD::from_elem(vec![self.obs_dim], t as f32)
    }
}

#[async_trait]
impl VecEnv for CountingVecEnv {
    fn num_envs(&self) -> usize {
        self.num_envs
    }

    fn observation_space(&self) -> Space {
        let high = self.episode_len as f32;
        Space::Box {
            low: vec![0.0; self.obs_dim],
            high: vec![high; self.obs_dim],
            shape: vec![self.obs_dim],
        }
    }

    fn action_space(&self) -> Space {
        Space::Discrete { n: 2 }
    }

    async fn reset(&mut self) -> Result<Vec<ArrayD<f32>>> {
        self.t = vec![0; self.num_envs];
        Ok((0..self.num_envs).map(|_| self.observe(0)).collect())
    }

    async fn step(&mut self, actions: &[ArrayD<f32>]) -> Result<VecStep> {
        if actions.len() != self.num_envs {
            return Err(PrefRlError::Validation(format!(
                "{} actions for {} sub-environments",
                actions.len(),
                self.num_envs
            )));
        }
        let mut obs = Vec::with_capacity(self.num_envs);
        let mut rews = Vec::with_capacity(self.num_envs);
        let mut dones = Vec::with_capacity(self.num_envs);
        let mut truncated = Vec::with_capacity(self.num_envs);
        let mut terminal_obs = Vec::with_capacity(self.num_envs);
        for (i, action) in actions.iter().enumerate() {
            if !self.action_space().contains(action) {
                return Err(PrefRlError::Validation(format!(
                    "action {action} is not a member of the action space"
                )));
            }
            rews.push(action.iter().next().copied().unwrap_or(0.0));
            self.t[i] += 1;
            if self.t[i] >= self.episode_len {
                dones.push(true);
                truncated.push(!self.terminal);
                terminal_obs.push(Some(self.observe(self.t[i])));
                self.t[i] = 0;
                obs.push(self.observe(0));
            } else {
                dones.push(false);
                truncated.push(false);
                terminal_obs.push(None);
                obs.push(self.observe(self.t[i]));
            }
        }
        Ok(VecStep {
            obs,
            rews,
            dones,
            truncated,
            terminal_obs,
            infos: vec![StepInfo::default(); self.num_envs],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(v: f32) -> ArrayD<f32> {
        ArrayD::from_shape_vec(vec![1], vec![v]).unwrap()
    }

    #[tokio::test]
    async fn episodes_end_after_episode_len_steps() {
        let mut env = CountingVecEnv::new(2, 3, 4, true);
        env.reset().await.unwrap();
        for expected_done in [false, false, true] {
            let step = env.step(&[action(0.0), action(1.0)]).await.unwrap();
            assert!(step.dones.iter().all(|d| *d == expected_done));
        }
    }

    #[tokio::test]
    async fn reward_is_the_action_index() {
        let mut env = CountingVecEnv::new(2, 5, 1, true);
        env.reset().await.unwrap();
        let step = env.step(&[action(0.0), action(1.0)]).await.unwrap();
        assert_eq!(step.rews, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn invalid_action_is_rejected() {
        let mut env = CountingVecEnv::new(1, 5, 1, true);
        env.reset().await.unwrap();
        let result = env.step(&[action(7.0)]).await;
        assert!(matches!(result, Err(PrefRlError::Validation(_))));
    }
}
