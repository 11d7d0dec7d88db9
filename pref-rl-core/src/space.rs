//! Observation and action space descriptors
//!
//! Spaces describe the shape and bounds of the arrays flowing between
//! environments, agents and reward models. Components that exchange arrays
//! validate that their spaces match before any data flows.

use ndarray::ArrayD;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{PrefRlError, Result};

/// Description of an observation or action space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Space {
    /// Bounded continuous space of a fixed shape
    Box {
        /// Lower bounds, one per element
        low: Vec<f32>,
        /// Upper bounds, one per element
        high: Vec<f32>,
        /// Shape of the arrays in this space
        shape: Vec<usize>,
    },
    /// Finite set of `n` choices, carried as a single-element array
    Discrete {
        /// Number of choices
        n: usize,
    },
}

impl Space {
    /// Create a box space, validating that the bounds cover the shape
    pub fn boxed(low: Vec<f32>, high: Vec<f32>, shape: Vec<usize>) -> Result<Self> {
        let total: usize = shape.iter().product();
        if low.len() != total || high.len() != total {
            return Err(PrefRlError::Validation(format!(
                "box space bounds cover {} elements but shape {:?} has {}",
                low.len(),
                shape,
                total
            )));
        }
        Ok(Self::Box { low, high, shape })
    }

    /// Create a discrete space with `n` choices
    pub fn discrete(n: usize) -> Result<Self> {
        if n == 0 {
            return Err(PrefRlError::Validation(
                "discrete space must have at least one choice".to_string(),
            ));
        }
        Ok(Self::Discrete { n })
    }

    /// Shape of the arrays belonging to this space
    #[must_use]
    pub fn shape(&self) -> Vec<usize> {
        match self {
            Self::Box { shape, .. } => shape.clone(),
            Self::Discrete { .. } => vec![1],
        }
    }

    /// Length of the flat feature encoding of one element
    ///
    /// Box elements flatten to their size; discrete elements one-hot encode.
    #[must_use]
    pub fn flat_dim(&self) -> usize {
        match self {
            Self::Box { shape, .. } => shape.iter().product(),
            Self::Discrete { n } => *n,
        }
    }

    /// Check whether an array is a member of this space
    #[must_use]
    pub fn contains(&self, value: &ArrayD<f32>) -> bool {
        match self {
            Self::Box { low, high, shape } => {
                value.shape() == shape.as_slice()
                    && value
                        .iter()
                        .zip(low.iter().zip(high))
                        .all(|(x, (l, h))| x >= l && x <= h)
            }
            Self::Discrete { n } => {
                value.len() == 1
                    && value.iter().all(|x| {
                        x.fract() == 0.0 && *x >= 0.0 && (*x as usize) < *n
                    })
            }
        }
    }

    /// Draw a uniformly random element of this space
    pub fn sample(&self, rng: &mut StdRng) -> ArrayD<f32> {
        match self {
            Self::Box { low, high, shape } => {
                let data: Vec<f32> = low
                    .iter()
                    .zip(high)
                    .map(|(l, h)| if l < h { rng.gen_range(*l..*h) } else { *l })
                    .collect();
                ArrayD::from_shape_vec(shape.clone(), data)
                    .unwrap_or_else(|_| ArrayD::zeros(shape.clone()))
            }
            Self::Discrete { n } => {
                let idx = rng.gen_range(0..*n) as f32;
                ArrayD::from_shape_vec(vec![1], vec![idx])
                    .unwrap_or_else(|_| ArrayD::zeros(vec![1]))
            }
        }
    }

    /// Flat feature encoding of one element of this space
    ///
    /// Box elements are flattened in storage order; discrete elements are
    /// one-hot encoded. Used by reward models that consume feature vectors.
    pub fn encode(&self, value: &ArrayD<f32>) -> Result<Vec<f32>> {
        if !self.contains(value) {
            return Err(PrefRlError::Validation(format!(
                "array of shape {:?} is not a member of {:?}",
                value.shape(),
                self
            )));
        }
        match self {
            Self::Box { .. } => Ok(value.iter().copied().collect()),
            Self::Discrete { n } => {
                let mut one_hot = vec![0.0; *n];
                let idx = value.iter().next().copied().unwrap_or(0.0) as usize;
                one_hot[idx] = 1.0;
                Ok(one_hot)
            }
        }
    }
}
