//! Preference gathering
//!
//! A gatherer turns fragment pairs into preference probabilities. The
//! synthetic gatherer answers from the fragments' own ground-truth rewards;
//! an external elicitation channel is just another implementation of the
//! same trait, and the orchestrator does not care which is wired in.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Bernoulli, Distribution};

use pref_rl_core::{FragmentPair, PrefRlError, Result};

/// Produces a preference per fragment pair
///
/// A preference is the probability in [0, 1] that the second fragment of
/// the pair is preferred over the first.
#[async_trait]
pub trait PreferenceGatherer: Send + Sync {
    /// Gather one preference per pair
    async fn gather(&mut self, pairs: &[FragmentPair]) -> Result<Vec<f32>>;
}

/// Configuration for [`SyntheticGatherer`]
#[derive(Debug, Clone)]
pub struct SyntheticGathererConfig {
    /// Temperature of the return-difference sigmoid; `0.0` makes the
    /// gatherer fully deterministic with hard labels
    pub temperature: f32,
    /// Per-step discount applied to fragment rewards
    pub discount_factor: f32,
    /// Whether to draw a stochastic binary label instead of returning the
    /// probability itself
    pub sample: bool,
    /// Clamp magnitude for the scaled return difference
    pub threshold: f32,
}

impl Default for SyntheticGathererConfig {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            discount_factor: 1.0,
            sample: true,
            threshold: 50.0,
        }
    }
}

/// Oracle gatherer computing preferences from ground-truth returns
pub struct SyntheticGatherer {
    config: SyntheticGathererConfig,
    rng: StdRng,
}

impl SyntheticGatherer {
    /// Create a gatherer, validating the configuration
    pub fn new(config: SyntheticGathererConfig, seed: u64) -> Result<Self> {
        if config.temperature < 0.0 {
            return Err(PrefRlError::Validation(format!(
                "temperature must be non-negative, got {}",
                config.temperature
            )));
        }
        if !(config.discount_factor > 0.0 && config.discount_factor <= 1.0) {
            return Err(PrefRlError::Validation(format!(
                "discount_factor must lie in (0, 1], got {}",
                config.discount_factor
            )));
        }
        if config.threshold <= 0.0 {
            return Err(PrefRlError::Validation(format!(
                "threshold must be positive, got {}",
                config.threshold
            )));
        }
        Ok(Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        })
    }
}

#[async_trait]
impl PreferenceGatherer for SyntheticGatherer {
    async fn gather(&mut self, pairs: &[FragmentPair]) -> Result<Vec<f32>> {
        let mut prefs = Vec::with_capacity(pairs.len());
        let mut entropy_sum = 0.0;
        for pair in pairs {
            let diff = pair.second().discounted_return(self.config.discount_factor)
                - pair.first().discounted_return(self.config.discount_factor);

            if self.config.temperature == 0.0 {
                // hard labels: all mass on the higher-return fragment
                let pref = match diff.partial_cmp(&0.0) {
                    Some(std::cmp::Ordering::Greater) => 1.0,
                    Some(std::cmp::Ordering::Less) => 0.0,
                    _ => 0.5,
                };
                prefs.push(pref);
                continue;
            }

            let logit = (diff / self.config.temperature)
                .clamp(-self.config.threshold, self.config.threshold);
            let prob = 1.0 / (1.0 + (-logit).exp());
            entropy_sum += binary_entropy(prob);
            if self.config.sample {
                let label = Bernoulli::new(f64::from(prob))
                    .map_err(|e| PrefRlError::Validation(e.to_string()))?
                    .sample(&mut self.rng);
                prefs.push(if label { 1.0 } else { 0.0 });
            } else {
                prefs.push(prob);
            }
        }
        if self.config.temperature != 0.0 && !pairs.is_empty() {
            tracing::debug!(
                entropy = entropy_sum / pairs.len() as f32,
                pairs = pairs.len(),
                "gathered synthetic preferences"
            );
        }
        Ok(prefs)
    }
}

fn binary_entropy(p: f32) -> f32 {
    let q = 1.0 - p;
    let mut h = 0.0;
    if p > 0.0 {
        h -= p * p.ln();
    }
    if q > 0.0 {
        h -= q * q.ln();
    }
    h
}
