use crate::PoolError;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Sizing parameters of a resource pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfig {
    /// Number of instances fabricated eagerly when the pool is created.
    ///
    /// This only sizes the prefill; the pool does not try to keep this many
    /// instances around afterwards.
    pub initial_size: usize,
    /// Maximum number of idle instances the pool retains. Instances returned
    /// while the idle set is full are destroyed, so 0 destroys every returned
    /// instance. This does not limit how many instances can be leased out at
    /// once. [`ResourcePool`](crate::ResourcePool) needs at least 1.
    pub max_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_size: 10,
            max_size: 1000,
        }
    }
}

impl PoolConfig {
    /// Creates a configuration with the given prefill and retention limits.
    pub fn new(initial_size: usize, max_size: usize) -> Self {
        Self {
            initial_size,
            max_size,
        }
    }

    /// Sets the number of instances fabricated at construction.
    #[must_use]
    pub fn with_initial_size(mut self, initial_size: usize) -> Self {
        self.initial_size = initial_size;
        self
    }

    /// Sets the idle retention ceiling.
    #[must_use]
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Checks that the configuration can be honored.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.initial_size > self.max_size {
            return Err(PoolError::InvalidConfig(format!(
                "initial_size ({}) must not exceed max_size ({})",
                self.initial_size, self.max_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.initial_size, 10);
        assert_eq!(config.max_size, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn accepts_zero_max_size() {
        assert!(PoolConfig::new(0, 0).validate().is_ok());
        assert!(matches!(
            PoolConfig::new(1, 0).validate(),
            Err(PoolError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_prefill_above_ceiling() {
        let config = PoolConfig::default().with_initial_size(5).with_max_size(4);
        assert!(matches!(config.validate(), Err(PoolError::InvalidConfig(_))));
    }
}
