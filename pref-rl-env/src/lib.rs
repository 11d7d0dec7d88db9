//! Environment plumbing for preference-based reward learning
//!
//! Provides the wrapper stack used by agent-driven trajectory generation:
//! a buffering wrapper that records ground-truth transitions with a strict
//! drain hand-off, a relabelling wrapper that feeds the agent learned
//! rewards, and a small deterministic environment for tests and examples.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod buffering;
pub mod relabel;
pub mod synthetic;

pub use buffering::{BufferingWrapper, TransitionBuffer};
pub use relabel::RewardRelabelWrapper;
pub use synthetic::CountingVecEnv;
