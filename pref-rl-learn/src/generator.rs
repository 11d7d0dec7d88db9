//! Trajectory generation
//!
//! A trajectory generator produces trajectories on demand, either from a
//! fixed offline dataset or from a live agent-environment loop, and may be
//! trained between sampling rounds. Generators compose into weighted
//! mixtures.

use async_trait::async_trait;
use ndarray::ArrayD;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use pref_rl_core::{PrefRlError, Result, RlAgent, SharedRewardModel, Trajectory, VecEnv};
use pref_rl_env::{BufferingWrapper, RewardRelabelWrapper, TransitionBuffer};

/// Produces trajectories on demand
#[async_trait]
pub trait TrajectoryGenerator: Send + Sync {
    /// Sample trajectories covering at least `steps` steps in total
    async fn sample(&mut self, steps: usize) -> Result<Vec<Trajectory>>;

    /// Improve the generator for `steps` environment steps
    ///
    /// A no-op for generators with nothing to train.
    async fn train(&mut self, steps: usize) -> Result<()> {
        let _ = steps;
        Ok(())
    }
}

/// Generator over a fixed, pre-collected set of trajectories
pub struct TrajectoryDataset {
    trajectories: Vec<Trajectory>,
    rng: StdRng,
}

impl TrajectoryDataset {
    /// Create a dataset generator with its own seeded RNG stream
    #[must_use]
    pub fn new(trajectories: Vec<Trajectory>, seed: u64) -> Self {
        Self {
            trajectories,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

#[async_trait]
impl TrajectoryGenerator for TrajectoryDataset {
    /// Draws whole trajectories in a fresh shuffled order until their
    /// cumulative step count reaches `steps`
    async fn sample(&mut self, steps: usize) -> Result<Vec<Trajectory>> {
        let available: usize = self.trajectories.iter().map(Trajectory::len).sum();
        if steps > available {
            return Err(PrefRlError::Capacity {
                requested: steps,
                available,
            });
        }
        let mut order: Vec<usize> = (0..self.trajectories.len()).collect();
        order.shuffle(&mut self.rng);

        let mut out = Vec::new();
        let mut covered = 0;
        for index in order {
            if covered >= steps {
                break;
            }
            let traj = self.trajectories[index].clone();
            covered += traj.len();
            out.push(traj);
        }
        Ok(out)
    }
}

/// Configuration for [`AgentTrainer`]
#[derive(Debug, Clone)]
pub struct AgentTrainerConfig {
    /// Fraction of top-up rollout steps driven by uniformly random actions
    /// instead of the agent's policy
    pub exploration_frac: f32,
    /// Seed for the exploration RNG stream
    pub seed: u64,
}

impl Default for AgentTrainerConfig {
    fn default() -> Self {
        Self {
            exploration_frac: 0.0,
            seed: 0,
        }
    }
}

/// Generator driven by a live agent-environment loop
///
/// Owns the agent and the wrapped environment stack: the raw environment is
/// wrapped in a buffering layer recording ground-truth transitions, then a
/// relabelling layer feeding the agent rewards from the learned model. The
/// buffer is handed off strictly: `train` refuses to run while transitions
/// from a previous round have not been drained by `sample`.
pub struct AgentTrainer {
    agent: Box<dyn RlAgent>,
    venv: RewardRelabelWrapper<BufferingWrapper<Box<dyn VecEnv>>>,
    buffer: TransitionBuffer,
    exploration_frac: f32,
    rng: StdRng,
}

impl AgentTrainer {
    /// Create an agent-driven generator
    ///
    /// Fails with a validation error if the reward model and the
    /// environment disagree about their spaces.
    pub fn new(
        agent: Box<dyn RlAgent>,
        reward_model: SharedRewardModel,
        venv: Box<dyn VecEnv>,
        config: AgentTrainerConfig,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&config.exploration_frac) {
            return Err(PrefRlError::Validation(format!(
                "exploration_frac must lie in [0, 1], got {}",
                config.exploration_frac
            )));
        }
        let buffering = BufferingWrapper::new(venv);
        let buffer = buffering.buffer();
        let venv = RewardRelabelWrapper::new(buffering, reward_model)?;
        Ok(Self {
            agent,
            venv,
            buffer,
            exploration_frac: config.exploration_frac,
            rng: StdRng::seed_from_u64(config.seed),
        })
    }

    /// Number of transitions waiting to be drained by `sample`
    pub fn pending_transitions(&self) -> Result<usize> {
        self.buffer.n_transitions()
    }

    /// Roll the wrapped environment for at least `min_steps` steps
    async fn rollout(&mut self, min_steps: usize, random_policy: bool) -> Result<()> {
        if min_steps == 0 {
            return Ok(());
        }
        let action_space = self.venv.action_space();
        let mut obs = self.venv.reset().await?;
        let mut collected = 0;
        while collected < min_steps {
            let actions: Vec<ArrayD<f32>> = if random_policy {
                obs.iter()
                    .map(|_| action_space.sample(&mut self.rng))
                    .collect()
            } else {
                self.agent.predict(&obs).await?
            };
            let step = self.venv.step(&actions).await?;
            obs = step.obs;
            collected += actions.len();
        }
        Ok(())
    }
}

#[async_trait]
impl TrajectoryGenerator for AgentTrainer {
    /// Drains the buffered transitions, topping up with fresh rollouts when
    /// they do not cover `steps`
    ///
    /// Returned trajectories carry the raw environment observation layout
    /// and the environment's own rewards: the buffering layer records them
    /// below the relabelling layer, so neither learned rewards nor
    /// agent-side observation transforms can leak into them.
    async fn sample(&mut self, steps: usize) -> Result<Vec<Trajectory>> {
        let mut trajectories = self.buffer.drain()?;
        let mut covered: usize = trajectories.iter().map(Trajectory::len).sum();
        while covered < steps {
            let deficit = steps - covered;
            let explore = (self.exploration_frac * deficit as f32).round() as usize;
            self.rollout(deficit - explore.min(deficit), false).await?;
            self.rollout(explore.min(deficit), true).await?;
            let fresh = self.buffer.drain()?;
            covered += fresh.iter().map(Trajectory::len).sum::<usize>();
            trajectories.extend(fresh);
        }
        Ok(trajectories)
    }

    /// Runs the agent's learning loop for `steps` environment steps
    ///
    /// Fails with a consistency error if transitions from a previous round
    /// are still buffered, instead of silently losing or double-counting
    /// them.
    async fn train(&mut self, steps: usize) -> Result<()> {
        let pending = self.buffer.n_transitions()?;
        if pending > 0 {
            return Err(PrefRlError::Consistency(format!(
                "there are {pending} transitions left in the buffer; call sample() first \
                 to clear them"
            )));
        }
        self.agent.train(&mut self.venv, steps).await
    }
}

/// Ordered collection of generators sharing sampling and training load
pub struct MixtureOfTrajectoryGenerators {
    members: Vec<Box<dyn TrajectoryGenerator>>,
    share_training_steps: bool,
}

impl MixtureOfTrajectoryGenerators {
    /// Create a mixture; fails with a validation error when `members` is
    /// empty
    pub fn new(
        members: Vec<Box<dyn TrajectoryGenerator>>,
        share_training_steps: bool,
    ) -> Result<Self> {
        if members.is_empty() {
            return Err(PrefRlError::Validation(
                "mixture of trajectory generators needs at least one member".to_string(),
            ));
        }
        Ok(Self {
            members,
            share_training_steps,
        })
    }

    fn even_split(total: usize, parts: usize) -> Vec<usize> {
        let base = total / parts;
        let remainder = total % parts;
        (0..parts)
            .map(|i| if i < remainder { base + 1 } else { base })
            .collect()
    }
}

#[async_trait]
impl TrajectoryGenerator for MixtureOfTrajectoryGenerators {
    /// Splits the request evenly across members, remainder to the earliest
    async fn sample(&mut self, steps: usize) -> Result<Vec<Trajectory>> {
        let shares = Self::even_split(steps, self.members.len());
        let mut out = Vec::new();
        for (member, share) in self.members.iter_mut().zip(shares) {
            if share > 0 {
                out.extend(member.sample(share).await?);
            }
        }
        Ok(out)
    }

    /// Trains every member on the full request, or on an even share when
    /// `share_training_steps` is set
    async fn train(&mut self, steps: usize) -> Result<()> {
        if self.share_training_steps {
            let shares = Self::even_split(steps, self.members.len());
            for (member, share) in self.members.iter_mut().zip(shares) {
                member.train(share).await?;
            }
        } else {
            for member in &mut self.members {
                member.train(steps).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pref_rl_core::{LinearRewardModel, RandomAgent, Space};
    use pref_rl_env::CountingVecEnv;
    use std::sync::{Arc, Mutex};

    fn obs1(v: f32) -> ArrayD<f32> {
        ArrayD::from_shape_vec(vec![1], vec![v]).unwrap()
    }

    fn make_trajectory(steps: usize) -> Trajectory {
        offset_trajectory(0.0, steps)
    }

    fn offset_trajectory(offset: f32, steps: usize) -> Trajectory {
        Trajectory::new(
            (0..=steps).map(|i| obs1(offset + i as f32)).collect(),
            (0..steps).map(|_| obs1(0.0)).collect(),
            (0..steps).map(|_| 0.0).collect(),
            None,
            false,
        )
        .unwrap()
    }

    fn episodes(count: usize, steps: usize) -> Vec<Trajectory> {
        (0..count)
            .map(|i| offset_trajectory(100.0 * i as f32, steps))
            .collect()
    }

    #[tokio::test]
    async fn seeded_sampling_is_reproducible_across_instances() {
        let trajectories = episodes(20, 10);
        let mut a = TrajectoryDataset::new(trajectories.clone(), 0);
        let mut b = TrajectoryDataset::new(trajectories.clone(), 0);
        assert_eq!(a.sample(100).await.unwrap(), b.sample(100).await.unwrap());

        let mut c = TrajectoryDataset::new(trajectories, 42);
        assert_ne!(a.sample(100).await.unwrap(), c.sample(100).await.unwrap());
    }

    #[tokio::test]
    async fn successive_samples_diverge() {
        let mut dataset = TrajectoryDataset::new(episodes(20, 10), 0);
        let first = dataset.sample(100).await.unwrap();
        let second = dataset.sample(100).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn sampled_steps_cover_the_request_without_overshooting_much() {
        // episode length is 10
        for steps in [0, 9, 10, 11, 100] {
            let mut dataset = TrajectoryDataset::new(episodes(20, 10), 0);
            let sample = dataset.sample(steps).await.unwrap();
            let lengths: Vec<usize> = sample.iter().map(Trajectory::len).collect();
            let total: usize = lengths.iter().sum();
            assert!(total >= steps);
            if steps > 0 {
                let shortest = lengths.iter().min().copied().unwrap_or(0);
                assert!(total - shortest < steps);
            }
        }
    }

    #[tokio::test]
    async fn oversampling_raises_a_capacity_error() {
        let mut dataset = TrajectoryDataset::new(episodes(2, 10), 0);
        match dataset.sample(100_000).await {
            Err(PrefRlError::Capacity {
                requested,
                available,
            }) => {
                assert_eq!(requested, 100_000);
                assert_eq!(available, 20);
            }
            _ => panic!("expected a capacity error"),
        }
    }

    fn agent_trainer(exploration_frac: f32) -> AgentTrainer {
        let env = CountingVecEnv::new(1, 5, 2, true);
        let model = SharedRewardModel::new(Box::new(LinearRewardModel::new(
            env.observation_space(),
            env.action_space(),
            0,
        )));
        AgentTrainer::new(
            Box::new(RandomAgent::new(env.action_space(), 1)),
            model,
            Box::new(env),
            AgentTrainerConfig {
                exploration_frac,
                seed: 2,
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn mismatched_spaces_are_rejected() {
        let env = CountingVecEnv::new(1, 5, 2, true);
        let other = CountingVecEnv::new(1, 5, 7, true);
        let model = SharedRewardModel::new(Box::new(LinearRewardModel::new(
            other.observation_space(),
            other.action_space(),
            0,
        )));
        let result = AgentTrainer::new(
            Box::new(RandomAgent::new(env.action_space(), 1)),
            model,
            Box::new(env),
            AgentTrainerConfig::default(),
        );
        assert!(matches!(result, Err(PrefRlError::Validation(_))));
    }

    #[tokio::test]
    async fn train_populates_the_buffer() {
        let mut trainer = agent_trainer(0.0);
        trainer.train(5).await.unwrap();
        assert!(trainer.pending_transitions().unwrap() > 0);
    }

    #[tokio::test]
    async fn train_refuses_an_undrained_buffer() {
        let mut trainer = agent_trainer(0.0);
        trainer.train(2).await.unwrap();
        match trainer.train(1).await {
            Err(PrefRlError::Consistency(message)) => {
                assert!(message.contains("transitions left in the buffer"));
                assert!(message.contains("sample()"));
            }
            _ => panic!("expected a consistency error"),
        }

        // draining unblocks training again
        trainer.sample(1).await.unwrap();
        trainer.train(1).await.unwrap();
    }

    #[tokio::test]
    async fn sample_covers_the_request_with_env_layout_observations() {
        let mut trainer = agent_trainer(0.5);
        let trajectories = trainer.sample(12).await.unwrap();
        let total: usize = trajectories.iter().map(Trajectory::len).sum();
        assert!(total >= 12);
        for traj in &trajectories {
            for obs in traj.obs() {
                assert_eq!(obs.shape(), &[2]);
            }
        }
        assert_eq!(trainer.pending_transitions().unwrap(), 0);
    }

    /// Generator that records the step counts it was asked for.
    struct StubGenerator {
        calls: Arc<Mutex<Vec<usize>>>,
    }

    #[async_trait]
    impl TrajectoryGenerator for StubGenerator {
        async fn sample(&mut self, steps: usize) -> Result<Vec<Trajectory>> {
            self.calls.lock().unwrap().push(steps);
            Ok(vec![make_trajectory(steps.max(1))])
        }

        async fn train(&mut self, steps: usize) -> Result<()> {
            self.calls.lock().unwrap().push(steps);
            Ok(())
        }
    }

    fn stub_mixture(
        members: usize,
        share_training_steps: bool,
    ) -> (MixtureOfTrajectoryGenerators, Vec<Arc<Mutex<Vec<usize>>>>) {
        let logs: Vec<Arc<Mutex<Vec<usize>>>> =
            (0..members).map(|_| Arc::new(Mutex::new(Vec::new()))).collect();
        let generators: Vec<Box<dyn TrajectoryGenerator>> = logs
            .iter()
            .map(|log| {
                Box::new(StubGenerator { calls: log.clone() }) as Box<dyn TrajectoryGenerator>
            })
            .collect();
        (
            MixtureOfTrajectoryGenerators::new(generators, share_training_steps).unwrap(),
            logs,
        )
    }

    #[test]
    fn empty_mixture_is_rejected() {
        let result = MixtureOfTrajectoryGenerators::new(Vec::new(), false);
        assert!(matches!(result, Err(PrefRlError::Validation(_))));
    }

    #[tokio::test]
    async fn unshared_training_gives_every_member_the_full_request() {
        let (mut mixture, logs) = stub_mixture(2, false);
        mixture.train(11).await.unwrap();
        for log in &logs {
            assert_eq!(*log.lock().unwrap(), vec![11]);
        }
    }

    #[tokio::test]
    async fn shared_training_splits_evenly_with_remainder_first() {
        let (mut mixture, logs) = stub_mixture(2, true);
        mixture.train(11).await.unwrap();
        let shares: Vec<usize> = logs.iter().map(|l| l.lock().unwrap()[0]).collect();
        assert_eq!(shares.iter().sum::<usize>(), 11);
        assert!(shares.iter().all(|s| *s >= 11 / 2));
        assert_eq!(shares[0], 6);
    }

    #[tokio::test]
    async fn sampling_always_splits_evenly() {
        let (mut mixture, logs) = stub_mixture(2, false);
        mixture.sample(11).await.unwrap();
        let shares: Vec<usize> = logs.iter().map(|l| l.lock().unwrap()[0]).collect();
        assert_eq!(shares.iter().sum::<usize>(), 11);
        assert!(shares.iter().all(|s| *s >= 11 / 2));
    }
}
