//! Reward ensembles and ensemble classification
//!
//! An ensemble aggregates several independently trained reward models; the
//! spread of its members' outputs is the uncertainty signal used for active
//! fragment selection. Components that care about ensembles classify the
//! model stack once, at construction, into [`RewardModelClass`]; nothing
//! downstream inspects concrete types.

use ndarray::{Array2, ArrayD, ArrayView1};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{Fragment, PrefRlError, Result, RewardModel, Space};

/// Collection of independently trained member reward models
pub struct RewardEnsemble {
    members: Vec<Box<dyn RewardModel>>,
    obs_space: Space,
    act_space: Space,
}

impl RewardEnsemble {
    /// Create an ensemble, validating that members exist and share spaces
    pub fn new(members: Vec<Box<dyn RewardModel>>) -> Result<Self> {
        let first = members.first().ok_or_else(|| {
            PrefRlError::Validation("reward ensemble needs at least one member".to_string())
        })?;
        let obs_space = first.observation_space();
        let act_space = first.action_space();
        for (i, member) in members.iter().enumerate() {
            if member.observation_space() != obs_space || member.action_space() != act_space {
                return Err(PrefRlError::Validation(format!(
                    "ensemble member {i} disagrees with member 0 about its spaces"
                )));
            }
        }
        Ok(Self {
            members,
            obs_space,
            act_space,
        })
    }

    /// Number of member models
    #[must_use]
    pub fn num_members(&self) -> usize {
        self.members.len()
    }

    /// Immutable access to one member
    pub fn member(&self, index: usize) -> Result<&dyn RewardModel> {
        self.members
            .get(index)
            .map(AsRef::as_ref)
            .ok_or_else(|| member_range_error(index, self.members.len()))
    }

    /// Mutable access to one member, for per-member training
    pub fn member_mut(&mut self, index: usize) -> Result<&mut dyn RewardModel> {
        let len = self.members.len();
        match self.members.get_mut(index) {
            Some(member) => Ok(member.as_mut()),
            None => Err(member_range_error(index, len)),
        }
    }

    /// Per-step rewards of every member for a fragment, shape `(len, members)`
    pub fn rewards_per_member(&self, fragment: &Fragment) -> Result<Array2<f32>> {
        let mut out = Array2::zeros((fragment.len(), self.members.len()));
        for (m, member) in self.members.iter().enumerate() {
            let rews = member.rewards(fragment)?;
            out.column_mut(m).assign(&rews);
        }
        Ok(out)
    }

    /// Mean and population standard deviation of member rewards for one
    /// transition
    pub fn reward_moments(
        &self,
        obs: &ArrayD<f32>,
        act: &ArrayD<f32>,
        next_obs: &ArrayD<f32>,
        done: bool,
    ) -> Result<(f32, f32)> {
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for member in &self.members {
            let r = member.reward(obs, act, next_obs, done)?;
            sum += r;
            sum_sq += r * r;
        }
        let n = self.members.len() as f32;
        let mean = sum / n;
        let var = (sum_sq / n - mean * mean).max(0.0);
        Ok((mean, var.sqrt()))
    }
}

fn member_range_error(index: usize, len: usize) -> PrefRlError {
    PrefRlError::Validation(format!(
        "ensemble member index {index} out of range for {len} members"
    ))
}

/// Shared, lock-guarded handle to a reward ensemble
///
/// This is the form in which an ensemble enters the pipeline: the handle
/// implements the reward capability (mean over members) and is the value
/// carried by [`RewardModelClass`] so that trainers and preference models
/// reach the members of the same underlying ensemble.
#[derive(Clone)]
pub struct SharedEnsemble {
    inner: Arc<RwLock<RewardEnsemble>>,
    obs_space: Space,
    act_space: Space,
}

impl SharedEnsemble {
    /// Wrap an ensemble in a shared handle
    #[must_use]
    pub fn new(ensemble: RewardEnsemble) -> Self {
        let obs_space = ensemble.obs_space.clone();
        let act_space = ensemble.act_space.clone();
        Self {
            inner: Arc::new(RwLock::new(ensemble)),
            obs_space,
            act_space,
        }
    }

    /// Read access to the underlying ensemble
    pub fn read(&self) -> Result<RwLockReadGuard<'_, RewardEnsemble>> {
        self.inner
            .read()
            .map_err(|_| PrefRlError::Consistency("reward ensemble lock poisoned".to_string()))
    }

    /// Write access to the underlying ensemble
    pub fn write(&self) -> Result<RwLockWriteGuard<'_, RewardEnsemble>> {
        self.inner
            .write()
            .map_err(|_| PrefRlError::Consistency("reward ensemble lock poisoned".to_string()))
    }

    /// Number of member models
    pub fn num_members(&self) -> Result<usize> {
        Ok(self.read()?.num_members())
    }
}

impl fmt::Debug for SharedEnsemble {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let members = self.read().map(|e| e.num_members()).unwrap_or(0);
        f.debug_struct("SharedEnsemble")
            .field("members", &members)
            .finish()
    }
}

impl RewardModel for SharedEnsemble {
    fn model_name(&self) -> &'static str {
        "RewardEnsemble"
    }

    fn observation_space(&self) -> Space {
        self.obs_space.clone()
    }

    fn action_space(&self) -> Space {
        self.act_space.clone()
    }

    fn reward(
        &self,
        obs: &ArrayD<f32>,
        act: &ArrayD<f32>,
        next_obs: &ArrayD<f32>,
        done: bool,
    ) -> Result<f32> {
        let (mean, _) = self.read()?.reward_moments(obs, act, next_obs, done)?;
        Ok(mean)
    }

    /// Distributes the same gradient to every member; per-member training
    /// goes through [`RewardEnsemble::member_mut`] instead
    fn backward(&mut self, fragment: &Fragment, grad_rews: ArrayView1<f32>) -> Result<()> {
        let mut ensemble = self.write()?;
        for m in 0..ensemble.num_members() {
            ensemble.member_mut(m)?.backward(fragment, grad_rews)?;
        }
        Ok(())
    }

    fn step(&mut self, learning_rate: f32) -> Result<()> {
        let mut ensemble = self.write()?;
        for m in 0..ensemble.num_members() {
            ensemble.member_mut(m)?.step(learning_rate)?;
        }
        Ok(())
    }

    fn ensemble_handle(&self) -> Option<SharedEnsemble> {
        Some(self.clone())
    }
}

/// The one recognized ensemble wrapper: mean member reward plus a bonus
/// proportional to the member standard deviation
pub struct AddStdRewardWrapper {
    base: SharedEnsemble,
    std_coeff: f32,
}

impl AddStdRewardWrapper {
    /// Wrap a shared ensemble; `std_coeff` scales the uncertainty bonus
    #[must_use]
    pub fn new(base: SharedEnsemble, std_coeff: f32) -> Self {
        Self { base, std_coeff }
    }
}

impl RewardModel for AddStdRewardWrapper {
    fn model_name(&self) -> &'static str {
        "AddStdRewardWrapper"
    }

    fn observation_space(&self) -> Space {
        self.base.observation_space()
    }

    fn action_space(&self) -> Space {
        self.base.action_space()
    }

    fn reward(
        &self,
        obs: &ArrayD<f32>,
        act: &ArrayD<f32>,
        next_obs: &ArrayD<f32>,
        done: bool,
    ) -> Result<f32> {
        let (mean, std) = self.base.read()?.reward_moments(obs, act, next_obs, done)?;
        Ok(mean + self.std_coeff * std)
    }

    fn backward(&mut self, fragment: &Fragment, grad_rews: ArrayView1<f32>) -> Result<()> {
        self.base.backward(fragment, grad_rews)
    }

    fn step(&mut self, learning_rate: f32) -> Result<()> {
        self.base.step(learning_rate)
    }

    fn base_model(&self) -> Option<&dyn RewardModel> {
        Some(&self.base)
    }

    fn exposes_ensemble(&self) -> bool {
        true
    }
}

/// Structural classification of a reward model stack
///
/// Computed once at construction; downstream code branches on the tag
/// instead of inspecting concrete model types.
#[derive(Debug, Clone)]
pub enum RewardModelClass {
    /// A single model, possibly behind ordinary wrappers
    Plain,
    /// A bare ensemble
    Ensemble(SharedEnsemble),
    /// An ensemble behind the recognized uncertainty-bonus wrapper
    WrappedEnsemble(SharedEnsemble),
    /// An ensemble behind a wrapper that is not allowed to hide one
    InvalidWrap {
        /// Name of the offending wrapper
        wrapper: &'static str,
    },
}

impl RewardModelClass {
    /// Whether an ensemble sits anywhere (legally) in the stack
    #[must_use]
    pub fn is_ensemble_backed(&self) -> bool {
        matches!(self, Self::Ensemble(_) | Self::WrappedEnsemble(_))
    }

    /// The backing ensemble, when the stack legally contains one
    #[must_use]
    pub fn ensemble(&self) -> Option<&SharedEnsemble> {
        match self {
            Self::Ensemble(e) | Self::WrappedEnsemble(e) => Some(e),
            _ => None,
        }
    }
}

/// Classify a reward model stack by walking its wrapper structure
#[must_use]
pub fn classify(model: &dyn RewardModel) -> RewardModelClass {
    if let Some(handle) = model.ensemble_handle() {
        if model.base_model().is_none() {
            return RewardModelClass::Ensemble(handle);
        }
    }
    match model.base_model() {
        None => RewardModelClass::Plain,
        Some(base) => match classify(base) {
            RewardModelClass::Plain => RewardModelClass::Plain,
            RewardModelClass::Ensemble(e) if model.exposes_ensemble() => {
                RewardModelClass::WrappedEnsemble(e)
            }
            _ => RewardModelClass::InvalidWrap {
                wrapper: model.model_name(),
            },
        },
    }
}
