//! Bounded preference dataset
//!
//! Order-preserving store of (fragment pair, preference) samples with FIFO
//! eviction and whole-file snapshot persistence.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;

use pref_rl_core::{FragmentPair, PrefRlError, Result};

/// One stored comparison: a fragment pair and the probability that its
/// second fragment is preferred
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceSample {
    /// The compared fragments
    pub pair: FragmentPair,
    /// Probability in [0, 1] that the second fragment is preferred
    pub preference: f32,
}

/// Capacity-bounded, insertion-ordered store of preference samples
///
/// Pushing past `max_size` evicts the oldest samples first. A push is
/// all-or-nothing: validation happens before any sample is stored.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PreferenceDataset {
    samples: VecDeque<PreferenceSample>,
    max_size: Option<usize>,
}

impl PreferenceDataset {
    /// Create an unbounded dataset
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a dataset that keeps at most `max_size` samples
    #[must_use]
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            max_size: Some(max_size),
        }
    }

    /// Number of stored samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check whether the dataset holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample at position `index`, in insertion order
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&PreferenceSample> {
        self.samples.get(index)
    }

    /// Iterate over samples in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &PreferenceSample> {
        self.samples.iter()
    }

    /// Append a batch of comparisons, evicting the oldest beyond capacity
    ///
    /// Fails without mutating the dataset if the number of preferences does
    /// not match the number of pairs.
    pub fn push(&mut self, pairs: Vec<FragmentPair>, preferences: &[f32]) -> Result<()> {
        if preferences.len() != pairs.len() {
            return Err(PrefRlError::Validation(format!(
                "unexpected preferences length: {} for {} fragment pairs",
                preferences.len(),
                pairs.len()
            )));
        }
        for (pair, &preference) in pairs.into_iter().zip(preferences) {
            self.samples.push_back(PreferenceSample { pair, preference });
        }
        if let Some(max) = self.max_size {
            while self.samples.len() > max {
                self.samples.pop_front();
            }
        }
        Ok(())
    }

    /// Serialize the whole dataset to a single file
    pub async fn save(&self, path: &Path) -> Result<()> {
        let blob = bincode::serialize(self).map_err(anyhow::Error::from)?;
        tokio::fs::write(path, blob).await?;
        Ok(())
    }

    /// Restore a dataset from a snapshot written by [`PreferenceDataset::save`]
    pub async fn load(path: &Path) -> Result<Self> {
        let blob = tokio::fs::read(path).await?;
        Ok(bincode::deserialize(&blob).map_err(anyhow::Error::from)?)
    }
}
