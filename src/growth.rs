//! [`Growth`] policy applied when a block store runs out of free blocks.

use crate::error::AllocError;

/// How a block store reacts to exhaustion.
#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub enum Growth {
    /// Exhaustion is reported as [`AllocError::OutOfMemory`].
    #[default]
    Disabled,
    /// Capacity is multiplied by the factor (which is strictly greater than 1).
    Factor(f64),
}

impl Growth {
    /// Builds a policy from a raw growth factor where `0` disables growth.
    ///
    /// Anything outside of `{0} ∪ (1, ∞)` is rejected.
    pub fn from_factor(factor: f64) -> Result<Growth, AllocError> {
        if factor == 0.0 {
            Ok(Growth::Disabled)
        } else if factor > 1.0 && factor.is_finite() {
            Ok(Growth::Factor(factor))
        } else {
            Err(AllocError::IllegalConfig(format!(
                "growth factor must be 0 or greater than 1, got {factor}"
            )))
        }
    }

    /// Returns the raw factor, `0` when growth is disabled.
    pub fn factor(&self) -> f64 {
        match *self {
            Growth::Disabled => 0.0,
            Growth::Factor(f) => f,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), AllocError> {
        Growth::from_factor(self.factor()).map(|_| ())
    }

    /// Returns the capacity to grow to from `current` usable blocks, capped at `limit`,
    /// or `None` if no growth is possible.
    ///
    /// The new capacity is `max(current + 1, ceil(current * factor))`.
    pub fn next_capacity(&self, current: usize, limit: usize) -> Option<usize> {
        let Growth::Factor(factor) = *self else {
            return None;
        };
        if current >= limit {
            return None;
        }
        let scaled = (current as f64 * factor).ceil();
        let scaled = if scaled >= limit as f64 { limit } else { scaled as usize };
        Some(scaled.max(current + 1).min(limit))
    }
}
