//! Query scheduling across training iterations
//!
//! A schedule is a pure weight function of normalized progress in [0, 1).
//! Integer allocation normalizes the weights over the iterations and rounds
//! by largest remainder, so the allocated query counts always sum exactly
//! to the comparison budget.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use pref_rl_core::{PrefRlError, Result};

/// How many preference queries to request per iteration
#[derive(Clone)]
pub enum QuerySchedule {
    /// The same share for every iteration
    Constant,
    /// Front-loaded, proportional to `1 / (1 + t)`
    Hyperbolic,
    /// Strongly front-loaded, proportional to `1 / (1 + t)^2`
    InverseQuadratic,
    /// Custom weight function of normalized progress
    Custom(Arc<dyn Fn(f64) -> f64 + Send + Sync>),
}

impl fmt::Debug for QuerySchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant => write!(f, "Constant"),
            Self::Hyperbolic => write!(f, "Hyperbolic"),
            Self::InverseQuadratic => write!(f, "InverseQuadratic"),
            Self::Custom(_) => write!(f, "Custom"),
        }
    }
}

impl FromStr for QuerySchedule {
    type Err = PrefRlError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "constant" => Ok(Self::Constant),
            "hyperbolic" => Ok(Self::Hyperbolic),
            "inverse_quadratic" => Ok(Self::InverseQuadratic),
            other => Err(PrefRlError::Validation(format!(
                "unknown query schedule `{other}`; expected `constant`, `hyperbolic` or \
                 `inverse_quadratic`"
            ))),
        }
    }
}

impl QuerySchedule {
    /// Relative weight at normalized progress `t`
    #[must_use]
    pub fn weight(&self, t: f64) -> f64 {
        match self {
            Self::Constant => 1.0,
            Self::Hyperbolic => 1.0 / (1.0 + t),
            Self::InverseQuadratic => 1.0 / ((1.0 + t) * (1.0 + t)),
            Self::Custom(f) => f(t),
        }
    }

    /// Split `total_queries` across `num_iterations` according to the
    /// schedule, summing exactly to the total
    pub fn allocate(&self, num_iterations: usize, total_queries: usize) -> Result<Vec<usize>> {
        if num_iterations == 0 {
            return Err(PrefRlError::Validation(
                "cannot allocate queries over zero iterations".to_string(),
            ));
        }
        let weights: Vec<f64> = (0..num_iterations)
            .map(|i| self.weight(i as f64 / num_iterations as f64))
            .collect();
        if weights.iter().any(|w| !w.is_finite() || *w <= 0.0) {
            return Err(PrefRlError::Validation(
                "query schedule weights must be positive and finite".to_string(),
            ));
        }
        let weight_sum: f64 = weights.iter().sum();

        // largest-remainder rounding
        let raw: Vec<f64> = weights
            .iter()
            .map(|w| w / weight_sum * total_queries as f64)
            .collect();
        let mut allocation: Vec<usize> = raw.iter().map(|r| r.floor() as usize).collect();
        let allocated: usize = allocation.iter().sum();
        let mut order: Vec<usize> = (0..num_iterations).collect();
        order.sort_by(|&a, &b| {
            let frac_a = raw[a] - raw[a].floor();
            let frac_b = raw[b] - raw[b].floor();
            frac_b
                .partial_cmp(&frac_a)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for &i in order.iter().take(total_queries.saturating_sub(allocated)) {
            allocation[i] += 1;
        }
        Ok(allocation)
    }
}
