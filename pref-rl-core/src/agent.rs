//! RL agent capability
//!
//! The policy-optimization algorithm is an external collaborator: the
//! preference subsystem only needs it to run its learning loop against an
//! environment and to produce actions for rollouts.

use async_trait::async_trait;
use ndarray::ArrayD;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::{Result, Space, VecEnv};

/// Reinforcement-learning agent consumed by agent-driven trajectory
/// generation
#[async_trait]
pub trait RlAgent: Send + Sync {
    /// Run the agent's learning loop against `env` for `steps` environment
    /// steps; the agent may reset the environment
    async fn train(&mut self, env: &mut dyn VecEnv, steps: usize) -> Result<()>;

    /// Actions for a batch of observations, one per sub-environment
    async fn predict(&mut self, obs: &[ArrayD<f32>]) -> Result<Vec<ArrayD<f32>>>;
}

/// Agent that acts uniformly at random and does not learn
///
/// Useful as a rollout baseline and in tests.
pub struct RandomAgent {
    action_space: Space,
    rng: StdRng,
}

impl RandomAgent {
    /// Create a random agent over `action_space`
    #[must_use]
    pub fn new(action_space: Space, seed: u64) -> Self {
        Self {
            action_space,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

#[async_trait]
impl RlAgent for RandomAgent {
    async fn train(&mut self, env: &mut dyn VecEnv, steps: usize) -> Result<()> {
        // No parameter updates; the rollout still drives the environment.
        let mut obs = env.reset().await?;
        let mut taken = 0;
        while taken < steps {
            let actions = self.predict(&obs).await?;
            let step = env.step(&actions).await?;
            obs = step.obs;
            taken += env.num_envs();
        }
        Ok(())
    }

    async fn predict(&mut self, obs: &[ArrayD<f32>]) -> Result<Vec<ArrayD<f32>>> {
        Ok(obs
            .iter()
            .map(|_| self.action_space.sample(&mut self.rng))
            .collect())
    }
}
