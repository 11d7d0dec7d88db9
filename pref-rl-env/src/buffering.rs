//! Transition buffering with a strict hand-off contract
//!
//! [`BufferingWrapper`] sits directly around the raw environment and records
//! every transition exactly as the environment produced it, before any
//! reward relabelling further up the stack. The recorded transitions are a
//! shared resource between training (producer) and sampling (consumer):
//! [`TransitionBuffer::drain`] hands over everything at once, and producers
//! are expected to refuse to run while undrained transitions remain.

use async_trait::async_trait;
use ndarray::ArrayD;
use std::sync::{Arc, Mutex, MutexGuard};

use pref_rl_core::{PrefRlError, Result, Space, Trajectory, VecEnv, VecStep};

struct PartialEpisode {
    obs: Vec<ArrayD<f32>>,
    acts: Vec<ArrayD<f32>>,
    rews: Vec<f32>,
    infos: Vec<serde_json::Value>,
}

impl PartialEpisode {
    fn start(obs: ArrayD<f32>) -> Self {
        Self {
            obs: vec![obs],
            acts: Vec::new(),
            rews: Vec::new(),
            infos: Vec::new(),
        }
    }

    fn steps(&self) -> usize {
        self.acts.len()
    }

    fn finish(mut self, final_obs: Option<ArrayD<f32>>, terminal: bool) -> Result<Trajectory> {
        if let Some(obs) = final_obs {
            self.obs.push(obs);
        }
        Trajectory::new(self.obs, self.acts, self.rews, Some(self.infos), terminal)
    }
}

struct BufferState {
    finished: Vec<Trajectory>,
    partial: Vec<Option<PartialEpisode>>,
}

impl BufferState {
    fn n_transitions(&self) -> usize {
        let finished: usize = self.finished.iter().map(Trajectory::len).sum();
        let partial: usize = self
            .partial
            .iter()
            .flatten()
            .map(PartialEpisode::steps)
            .sum();
        finished + partial
    }
}

/// Shared handle to the transitions recorded by a [`BufferingWrapper`]
///
/// The single consumer side of the hand-off: `drain` empties the buffer,
/// closing any in-progress episode as a truncated trajectory.
#[derive(Clone)]
pub struct TransitionBuffer {
    inner: Arc<Mutex<BufferState>>,
}

impl TransitionBuffer {
    fn new(num_envs: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BufferState {
                finished: Vec::new(),
                partial: (0..num_envs).map(|_| None).collect(),
            })),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, BufferState>> {
        self.inner
            .lock()
            .map_err(|_| PrefRlError::Consistency("transition buffer lock poisoned".to_string()))
    }

    /// Number of transitions currently buffered, including the in-progress
    /// episodes
    pub fn n_transitions(&self) -> Result<usize> {
        Ok(self.lock()?.n_transitions())
    }

    /// Take every buffered transition, leaving the buffer empty
    ///
    /// In-progress episodes are closed off as truncated (non-terminal)
    /// trajectories; recording continues seamlessly from the environment's
    /// current observation.
    pub fn drain(&self) -> Result<Vec<Trajectory>> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        let mut out = std::mem::take(&mut state.finished);
        for slot in &mut state.partial {
            if slot.as_ref().is_some_and(|p| p.steps() > 0) {
                if let Some(partial) = slot.take() {
                    let last_obs = partial.obs.last().cloned();
                    out.push(partial.finish(None, false)?);
                    *slot = last_obs.map(PartialEpisode::start);
                }
            }
        }
        Ok(out)
    }

    fn record_reset(&self, obs: &[ArrayD<f32>]) -> Result<()> {
        let mut guard = self.lock()?;
        let BufferState { finished, partial } = &mut *guard;
        for (slot, first_obs) in partial.iter_mut().zip(obs) {
            if let Some(partial) = slot.take() {
                if partial.steps() > 0 {
                    finished.push(partial.finish(None, false)?);
                }
            }
            *slot = Some(PartialEpisode::start(first_obs.clone()));
        }
        Ok(())
    }

    fn record_step(&self, actions: &[ArrayD<f32>], step: &VecStep) -> Result<()> {
        let mut guard = self.lock()?;
        let BufferState { finished, partial } = &mut *guard;
        for i in 0..actions.len() {
            let slot = partial.get_mut(i).ok_or_else(|| {
                PrefRlError::Consistency(format!(
                    "transition recorded for unknown sub-environment {i}"
                ))
            })?;
            let episode = slot.as_mut().ok_or_else(|| {
                PrefRlError::Consistency(
                    "transition recorded before the environment was reset".to_string(),
                )
            })?;
            episode.acts.push(actions[i].clone());
            episode.rews.push(step.rews[i]);
            episode
                .infos
                .push(serde_json::Value::Object(step.infos[i].fields.clone()));
            if step.dones[i] {
                let final_obs = step.terminal_obs[i].clone().ok_or_else(|| {
                    PrefRlError::Consistency(format!(
                        "sub-environment {i} finished an episode without a terminal observation"
                    ))
                })?;
                let terminal = !step.truncated[i];
                if let Some(p) = slot.take() {
                    finished.push(p.finish(Some(final_obs), terminal)?);
                }
                *slot = Some(PartialEpisode::start(step.obs[i].clone()));
            } else {
                episode.obs.push(step.obs[i].clone());
            }
        }
        Ok(())
    }
}

/// Wrapper that records every transition flowing through it
pub struct BufferingWrapper<E> {
    env: E,
    buffer: TransitionBuffer,
}

impl<E: VecEnv> BufferingWrapper<E> {
    /// Wrap `env`, recording its transitions
    #[must_use]
    pub fn new(env: E) -> Self {
        let buffer = TransitionBuffer::new(env.num_envs());
        Self { env, buffer }
    }

    /// Shared handle to the recorded transitions
    #[must_use]
    pub fn buffer(&self) -> TransitionBuffer {
        self.buffer.clone()
    }
}

#[async_trait]
impl<E: VecEnv> VecEnv for BufferingWrapper<E> {
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
        self.buffer.record_reset(&obs)?;
        Ok(obs)
    }

    async fn step(&mut self, actions: &[ArrayD<f32>]) -> Result<VecStep> {
        let step = self.env.step(actions).await?;
        self.buffer.record_step(actions, &step)?;
        Ok(step)
    }
}
