//! Vectorized environment capability

use async_trait::async_trait;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::{Result, Space};

/// Additional information attached to one environment step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepInfo {
    /// Custom fields
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Result of stepping every sub-environment once
#[derive(Debug, Clone)]
pub struct VecStep {
    /// Next observation per sub-environment; for a finished episode this is
    /// already the first observation of the new one
    pub obs: Vec<ArrayD<f32>>,
    /// Reward per sub-environment
    pub rews: Vec<f32>,
    /// Whether each episode ended this step (termination or truncation)
    pub dones: Vec<bool>,
    /// Whether a `done` was a truncation (e.g. time limit) rather than a
    /// true termination
    pub truncated: Vec<bool>,
    /// The final observation of an episode that ended this step
    pub terminal_obs: Vec<Option<ArrayD<f32>>>,
    /// Extra info per sub-environment
    pub infos: Vec<StepInfo>,
}

/// Vectorized environment: several identical sub-environments stepped in
/// lock-step, auto-resetting on episode end
#[async_trait]
pub trait VecEnv: Send + Sync {
    /// Number of sub-environments
    fn num_envs(&self) -> usize;

    /// Space of observations
    fn observation_space(&self) -> Space;

    /// Space of actions
    fn action_space(&self) -> Space;

    /// Reset every sub-environment, returning the initial observations
    async fn reset(&mut self) -> Result<Vec<ArrayD<f32>>>;

    /// Step every sub-environment with one action each
    async fn step(&mut self, actions: &[ArrayD<f32>]) -> Result<VecStep>;
}

#[async_trait]
impl VecEnv for Box<dyn VecEnv> {
    fn num_envs(&self) -> usize {
        (**self).num_envs()
    }

    fn observation_space(&self) -> Space {
        (**self).observation_space()
    }

    fn action_space(&self) -> Space {
        (**self).action_space()
    }

    async fn reset(&mut self) -> Result<Vec<ArrayD<f32>>> {
        (**self).reset().await
    }

    async fn step(&mut self, actions: &[ArrayD<f32>]) -> Result<VecStep> {
        (**self).step(actions).await
    }
}
