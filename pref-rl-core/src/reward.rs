//! Reward model capability
//!
//! A reward model maps a transition `(obs, act, next_obs, done)` to a scalar
//! reward. The preference subsystem never looks inside the model: fitting is
//! delegated through the `backward`/`step` hooks, which receive the gradient
//! of the training loss with respect to the model's own per-step reward
//! outputs and apply the parameter update internally.

use ndarray::{Array1, ArrayD, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::ensemble::SharedEnsemble;
use crate::{Fragment, PrefRlError, Result, Space};

/// Scalar reward function over transitions, with gradient hooks for fitting
pub trait RewardModel: Send + Sync {
    /// Short name of the concrete model, used in wiring diagnostics
    fn model_name(&self) -> &'static str;

    /// Space of the observations this model accepts
    fn observation_space(&self) -> Space;

    /// Space of the actions this model accepts
    fn action_space(&self) -> Space;

    /// Reward for a single transition
    fn reward(
        &self,
        obs: &ArrayD<f32>,
        act: &ArrayD<f32>,
        next_obs: &ArrayD<f32>,
        done: bool,
    ) -> Result<f32>;

    /// Per-step rewards for a whole fragment
    fn rewards(&self, fragment: &Fragment) -> Result<Array1<f32>> {
        let mut rews = Vec::with_capacity(fragment.len());
        for t in 0..fragment.len() {
            rews.push(self.reward(
                &fragment.obs()[t],
                &fragment.acts()[t],
                &fragment.obs()[t + 1],
                fragment.done_at(t),
            )?);
        }
        Ok(Array1::from(rews))
    }

    /// Accumulate parameter gradients from `grad_rews`, the gradient of the
    /// training loss with respect to this fragment's per-step rewards
    fn backward(&mut self, fragment: &Fragment, grad_rews: ArrayView1<f32>) -> Result<()>;

    /// Apply one update from the accumulated gradients and clear them
    fn step(&mut self, learning_rate: f32) -> Result<()>;

    /// Handle to this model, when the model is itself a shared ensemble
    ///
    /// Only the ensemble handle returns `Some` here; wrappers report their
    /// structure through [`RewardModel::base_model`] instead.
    fn ensemble_handle(&self) -> Option<SharedEnsemble> {
        None
    }

    /// The wrapped model, when this model is a wrapper around another
    fn base_model(&self) -> Option<&dyn RewardModel> {
        None
    }

    /// Whether this wrapper is the recognized uncertainty-bonus wrapper that
    /// may legally stand between an ensemble and the rest of the system
    fn exposes_ensemble(&self) -> bool {
        false
    }
}

/// Shared, lock-guarded handle to a reward model
///
/// The same underlying model is read by the relabelling environment wrapper
/// and the preference model while being updated by the reward trainer, so it
/// lives behind an `Arc<RwLock>`. Clones share the model.
#[derive(Clone)]
pub struct SharedRewardModel {
    inner: Arc<RwLock<Box<dyn RewardModel>>>,
    obs_space: Space,
    act_space: Space,
}

impl SharedRewardModel {
    /// Wrap a model in a shared handle
    #[must_use]
    pub fn new(model: Box<dyn RewardModel>) -> Self {
        let obs_space = model.observation_space();
        let act_space = model.action_space();
        Self {
            inner: Arc::new(RwLock::new(model)),
            obs_space,
            act_space,
        }
    }

    /// Read access to the underlying model
    pub fn read(&self) -> Result<RwLockReadGuard<'_, Box<dyn RewardModel>>> {
        self.inner
            .read()
            .map_err(|_| PrefRlError::Consistency("reward model lock poisoned".to_string()))
    }

    /// Write access to the underlying model
    pub fn write(&self) -> Result<RwLockWriteGuard<'_, Box<dyn RewardModel>>> {
        self.inner
            .write()
            .map_err(|_| PrefRlError::Consistency("reward model lock poisoned".to_string()))
    }

    /// Classify the underlying model stack once, for wiring decisions
    pub fn classify(&self) -> Result<crate::ensemble::RewardModelClass> {
        let guard = self.read()?;
        Ok(crate::ensemble::classify(guard.as_ref()))
    }
}

impl RewardModel for SharedRewardModel {
    fn model_name(&self) -> &'static str {
        self.read().map_or("SharedRewardModel", |g| g.model_name())
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
        self.read()?.reward(obs, act, next_obs, done)
    }

    fn rewards(&self, fragment: &Fragment) -> Result<Array1<f32>> {
        self.read()?.rewards(fragment)
    }

    fn backward(&mut self, fragment: &Fragment, grad_rews: ArrayView1<f32>) -> Result<()> {
        self.write()?.backward(fragment, grad_rews)
    }

    fn step(&mut self, learning_rate: f32) -> Result<()> {
        self.write()?.step(learning_rate)
    }

    fn ensemble_handle(&self) -> Option<SharedEnsemble> {
        self.read().ok().and_then(|g| g.ensemble_handle())
    }
}

/// Linear reward model over flat transition features
///
/// The built-in trainable baseline: `reward = w · phi(obs, act, next_obs,
/// done) + b` where `phi` concatenates the encoded observation, action, next
/// observation and the done flag. Enough to fit simple preference structure
/// without an external network backend.
pub struct LinearRewardModel {
    obs_space: Space,
    act_space: Space,
    weights: Array1<f32>,
    bias: f32,
    grad_weights: Array1<f32>,
    grad_bias: f32,
}

impl LinearRewardModel {
    /// Create a model with uniformly initialized weights
    #[must_use]
    pub fn new(obs_space: Space, act_space: Space, seed: u64) -> Self {
        let dim = 2 * obs_space.flat_dim() + act_space.flat_dim() + 1;
        let limit = (6.0 / (dim as f32 + 1.0)).sqrt();
        let mut rng = StdRng::seed_from_u64(seed);
        let weights = Array1::from_shape_fn(dim, |_| rng.gen_range(-limit..limit));
        Self {
            obs_space,
            act_space,
            grad_weights: Array1::zeros(dim),
            grad_bias: 0.0,
            weights,
            bias: 0.0,
        }
    }

    fn features(
        &self,
        obs: &ArrayD<f32>,
        act: &ArrayD<f32>,
        next_obs: &ArrayD<f32>,
        done: bool,
    ) -> Result<Array1<f32>> {
        let mut phi = self.obs_space.encode(obs)?;
        phi.extend(self.act_space.encode(act)?);
        phi.extend(self.obs_space.encode(next_obs)?);
        phi.push(if done { 1.0 } else { 0.0 });
        Ok(Array1::from(phi))
    }
}

impl RewardModel for LinearRewardModel {
    fn model_name(&self) -> &'static str {
        "LinearRewardModel"
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
        let phi = self.features(obs, act, next_obs, done)?;
        Ok(self.weights.dot(&phi) + self.bias)
    }

    fn backward(&mut self, fragment: &Fragment, grad_rews: ArrayView1<f32>) -> Result<()> {
        if grad_rews.len() != fragment.len() {
            return Err(PrefRlError::Validation(format!(
                "{} reward gradients for a fragment of {} steps",
                grad_rews.len(),
                fragment.len()
            )));
        }
        for t in 0..fragment.len() {
            let phi = self.features(
                &fragment.obs()[t],
                &fragment.acts()[t],
                &fragment.obs()[t + 1],
                fragment.done_at(t),
            )?;
            self.grad_weights.scaled_add(grad_rews[t], &phi);
            self.grad_bias += grad_rews[t];
        }
        Ok(())
    }

    fn step(&mut self, learning_rate: f32) -> Result<()> {
        self.weights.scaled_add(-learning_rate, &self.grad_weights);
        self.bias -= learning_rate * self.grad_bias;
        self.grad_weights.fill(0.0);
        self.grad_bias = 0.0;
        Ok(())
    }
}

/// Wrapper that rescales another model's rewards
///
/// An ordinary wrapper: it is not recognized as a legal way to expose an
/// ensemble, which makes it useful for normalization of plain models only.
pub struct ScaledRewardWrapper {
    base: Box<dyn RewardModel>,
    scale: f32,
}

impl ScaledRewardWrapper {
    /// Wrap `base`, multiplying its rewards by `scale`
    #[must_use]
    pub fn new(base: Box<dyn RewardModel>, scale: f32) -> Self {
        Self { base, scale }
    }
}

impl RewardModel for ScaledRewardWrapper {
    fn model_name(&self) -> &'static str {
        "ScaledRewardWrapper"
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
        Ok(self.scale * self.base.reward(obs, act, next_obs, done)?)
    }

    fn backward(&mut self, fragment: &Fragment, grad_rews: ArrayView1<f32>) -> Result<()> {
        let scaled = grad_rews.to_owned() * self.scale;
        self.base.backward(fragment, scaled.view())
    }

    fn step(&mut self, learning_rate: f32) -> Result<()> {
        self.base.step(learning_rate)
    }

    fn base_model(&self) -> Option<&dyn RewardModel> {
        Some(self.base.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::ArrayD;

    fn spaces() -> (Space, Space) {
        (
            Space::boxed(vec![-10.0; 2], vec![10.0; 2], vec![2]).unwrap(),
            Space::discrete(2).unwrap(),
        )
    }

    fn obs(a: f32, b: f32) -> ArrayD<f32> {
        ArrayD::from_shape_vec(vec![2], vec![a, b]).unwrap()
    }

    fn act(i: f32) -> ArrayD<f32> {
        ArrayD::from_shape_vec(vec![1], vec![i]).unwrap()
    }

    fn fragment(model_rews: &[f32]) -> Fragment {
        let n = model_rews.len();
        let traj = crate::Trajectory::new(
            (0..=n).map(|i| obs(i as f32, 0.0)).collect(),
            (0..n).map(|_| act(0.0)).collect(),
            model_rews.to_vec(),
            None,
            false,
        )
        .unwrap();
        traj.fragment(0, n).unwrap()
    }

    #[test]
    fn same_seed_same_rewards() {
        let (o, a) = spaces();
        let m1 = LinearRewardModel::new(o.clone(), a.clone(), 3);
        let m2 = LinearRewardModel::new(o, a, 3);
        let r1 = m1.reward(&obs(0.5, -0.5), &act(1.0), &obs(0.6, -0.4), false);
        let r2 = m2.reward(&obs(0.5, -0.5), &act(1.0), &obs(0.6, -0.4), false);
        assert_relative_eq!(r1.unwrap(), r2.unwrap());
    }

    #[test]
    fn gradient_step_moves_reward_down() {
        let (o, a) = spaces();
        let mut model = LinearRewardModel::new(o, a, 0);
        let frag = fragment(&[0.0, 0.0]);
        let before: f32 = model.rewards(&frag).unwrap().sum();
        // positive gradient on every step reward => step lowers the rewards
        model
            .backward(&frag, Array1::from(vec![1.0, 1.0]).view())
            .unwrap();
        model.step(0.1).unwrap();
        let after: f32 = model.rewards(&frag).unwrap().sum();
        assert!(after < before);
    }

    #[test]
    fn backward_rejects_mismatched_gradients() {
        let (o, a) = spaces();
        let mut model = LinearRewardModel::new(o, a, 0);
        let frag = fragment(&[0.0, 0.0]);
        let result = model.backward(&frag, Array1::from(vec![1.0]).view());
        assert!(matches!(result, Err(PrefRlError::Validation(_))));
    }

    #[test]
    fn scaled_wrapper_rescales() {
        let (o, a) = spaces();
        let base = LinearRewardModel::new(o.clone(), a.clone(), 1);
        let reference = base.reward(&obs(1.0, 2.0), &act(0.0), &obs(1.5, 2.0), false);
        let wrapper = ScaledRewardWrapper::new(Box::new(base), 2.0);
        let scaled = wrapper.reward(&obs(1.0, 2.0), &act(0.0), &obs(1.5, 2.0), false);
        assert_relative_eq!(scaled.unwrap(), 2.0 * reference.unwrap());
    }

    #[test]
    fn shared_handle_sees_updates() {
        let (o, a) = spaces();
        let shared = SharedRewardModel::new(Box::new(LinearRewardModel::new(o, a, 0)));
        let mut writer = shared.clone();
        let frag = fragment(&[0.0]);
        let before = shared.rewards(&frag).unwrap()[0];
        writer
            .backward(&frag, Array1::from(vec![1.0]).view())
            .unwrap();
        writer.step(0.5).unwrap();
        let after = shared.rewards(&frag).unwrap()[0];
        assert!(after < before);
    }
}
