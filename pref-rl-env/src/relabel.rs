//! Reward relabelling wrapper
//!
//! Replaces the environment's rewards with the output of a learned reward
//! model, so the agent optimizes the learned objective while the buffering
//! wrapper underneath keeps recording the environment's own rewards.

use async_trait::async_trait;
use ndarray::ArrayD;

use pref_rl_core::{PrefRlError, Result, RewardModel, SharedRewardModel, Space, VecEnv, VecStep};

/// Wrapper that rewrites step rewards with a learned reward model
pub struct RewardRelabelWrapper<E> {
    env: E,
    model: SharedRewardModel,
    last_obs: Vec<ArrayD<f32>>,
}

impl<E: VecEnv> RewardRelabelWrapper<E> {
    /// Wrap `env`, validating that the model and environment agree on spaces
    pub fn new(env: E, model: SharedRewardModel) -> Result<Self> {
        if model.observation_space() != env.observation_space()
            || model.action_space() != env.action_space()
        {
            return Err(PrefRlError::Validation(
                "observation and action spaces of the reward model and the environment \
                 do not match"
                    .to_string(),
            ));
        }
        Ok(Self {
            env,
            model,
            last_obs: Vec::new(),
        })
    }
}

#[async_trait]
impl<E: VecEnv> VecEnv for RewardRelabelWrapper<E> {
    fn num_envs(&self) -> usize {
        self.env.num_envs()
    }

    fn observation_space(&self) -> Space {
        self.env.observation_space()
    }

    fn action_space(&self) -> Space {
        self.env.action_space()
    }

    async fn reset(&mut self) -> Result<Vec<ArrayD<f32>>> {
        let obs = self.env.reset().await?;
        self.last_obs = obs.clone();
        Ok(obs)
    }

    async fn step(&mut self, actions: &[ArrayD<f32>]) -> Result<VecStep> {
        if self.last_obs.is_empty() {
            return Err(PrefRlError::Consistency(
                "reward relabelling stepped before the environment was reset".to_string(),
            ));
        }
        let mut step = self.env.step(actions).await?;
        for i in 0..step.rews.len() {
            let next_obs = step.terminal_obs[i].as_ref().unwrap_or(&step.obs[i]);
            let done = step.dones[i] && !step.truncated[i];
            step.rews[i] = self
                .model
                .reward(&self.last_obs[i], &actions[i], next_obs, done)?;
        }
        self.last_obs = step.obs.clone();
        Ok(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BufferingWrapper, CountingVecEnv};
    use pref_rl_core::LinearRewardModel;

    fn action(v: f32) -> ArrayD<f32> {
        ArrayD::from_shape_vec(vec![1], vec![v]).unwrap()
    }

    fn model_for(env: &CountingVecEnv) -> SharedRewardModel {
        SharedRewardModel::new(Box::new(LinearRewardModel::new(
            env.observation_space(),
            env.action_space(),
            0,
        )))
    }

    #[tokio::test]
    async fn mismatched_spaces_are_rejected() {
        let env = CountingVecEnv::new(1, 3, 2, true);
        let other = CountingVecEnv::new(1, 3, 5, true);
        let model = model_for(&other);
        let result = RewardRelabelWrapper::new(env, model);
        assert!(matches!(result, Err(PrefRlError::Validation(_))));
    }

    #[tokio::test]
    async fn agent_sees_model_rewards_while_buffer_keeps_originals() {
        let raw = CountingVecEnv::new(1, 3, 2, true);
        let model = model_for(&raw);
        let buffering = BufferingWrapper::new(raw);
        let buffer = buffering.buffer();
        let mut env = RewardRelabelWrapper::new(buffering, model.clone()).unwrap();

        let obs = env.reset().await.unwrap();
        let act = action(1.0);
        let step = env.step(std::slice::from_ref(&act)).await.unwrap();

        let expected = model
            .reward(&obs[0], &act, &step.obs[0], false)
            .unwrap();
        assert!((step.rews[0] - expected).abs() < 1e-6);

        // the buffer recorded the environment's own reward for that action
        let trajs = buffer.drain().unwrap();
        assert!((trajs[0].rews()[0] - 1.0).abs() < 1e-6);
    }
}
