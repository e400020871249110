//! Pool configuration options

use crate::errors::{PoolError, PoolResult};

/// Default hard ceiling on live resources.
pub const DEFAULT_MAX_POOL_SIZE: usize = 10;

/// Sizing configuration for single and keyed pools
///
/// For a keyed pool, `max_pool_size`/`core_pool_size` bound the number of
/// distinct keys and the `key_*` sizes bound each per-key sub-pool.
///
/// # Examples
///
/// ```
/// use resilient_pool::PoolConfiguration;
///
/// let config = PoolConfiguration::new()
///     .with_max_pool_size(8)
///     .with_name("db");
///
/// assert_eq!(config.max_pool_size, 8);
/// assert_eq!(config.core_pool_size(), 4);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolConfiguration {
    /// Maximum number of live resources (or keys, for a keyed pool)
    pub max_pool_size: usize,

    /// Target minimum, `max_pool_size / 2` when unset
    pub core_pool_size: Option<usize>,

    /// Maximum resources per key
    pub key_max_pool_size: usize,

    /// Target minimum per key, `key_max_pool_size / 2` when unset
    pub key_core_pool_size: Option<usize>,

    /// Name used in log fields
    pub name: String,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            core_pool_size: None,
            key_max_pool_size: DEFAULT_MAX_POOL_SIZE,
            key_core_pool_size: None,
            name: "<unnamed>".to_string(),
        }
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = size;
        self
    }

    pub fn with_core_pool_size(mut self, size: usize) -> Self {
        self.core_pool_size = Some(size);
        self
    }

    pub fn with_key_max_pool_size(mut self, size: usize) -> Self {
        self.key_max_pool_size = size;
        self
    }

    pub fn with_key_core_pool_size(mut self, size: usize) -> Self {
        self.key_core_pool_size = Some(size);
        self
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Effective core size
    pub fn core_pool_size(&self) -> usize {
        self.core_pool_size.unwrap_or(self.max_pool_size / 2)
    }

    /// Effective per-key core size
    pub fn key_core_pool_size(&self) -> usize {
        self.key_core_pool_size
            .unwrap_or(self.key_max_pool_size / 2)
    }

    /// Sizing of a per-key sub-pool derived from this configuration.
    pub fn for_key(&self, key: &str) -> PoolConfiguration {
        PoolConfiguration {
            max_pool_size: self.key_max_pool_size,
            core_pool_size: Some(self.key_core_pool_size()),
            key_max_pool_size: self.key_max_pool_size,
            key_core_pool_size: self.key_core_pool_size,
            name: format!("{}[{}]", self.name, key),
        }
    }

    /// Checks `core <= max` for both levels.
    pub fn validate(&self) -> PoolResult<()> {
        if self.core_pool_size() > self.max_pool_size {
            return Err(PoolError::InvalidConfiguration(format!(
                "core pool size {} exceeds max pool size {}",
                self.core_pool_size(),
                self.max_pool_size
            )));
        }
        if self.key_core_pool_size() > self.key_max_pool_size {
            return Err(PoolError::InvalidConfiguration(format!(
                "per-key core pool size {} exceeds per-key max pool size {}",
                self.key_core_pool_size(),
                self.key_max_pool_size
            )));
        }
        Ok(())
    }
}
