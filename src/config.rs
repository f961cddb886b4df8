//! Configuration for the watch cache.
//!
//! # Example
//!
//! ```
//! use watch_cache::WatchCacheConfig;
//!
//! // Minimal config (uses defaults)
//! let config = WatchCacheConfig::default();
//! assert_eq!(config.lower_bound_capacity, 100);
//! assert!(config.validate().is_ok());
//!
//! // Tuned config
//! let config = WatchCacheConfig {
//!     event_fresh_duration_ms: 30_000,
//!     upper_bound_capacity: 4096,
//!     consistent_list_from_snapshot: true,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::WatchCacheError;

/// Configuration for the watch cache.
///
/// All fields have sensible defaults. Updates delivered through the watch
/// channel handed to [`crate::WatchCache::new`] are applied by the run loop.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchCacheConfig {
    /// Maximum age of an event before it is trimmed from the ring (default: 75s)
    #[serde(default = "default_event_fresh_duration_ms")]
    pub event_fresh_duration_ms: u64,

    /// Ring capacity at construction
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,

    /// Ring resize bounds
    #[serde(default = "default_lower_bound_capacity")]
    pub lower_bound_capacity: usize,
    #[serde(default = "default_upper_bound_capacity")]
    pub upper_bound_capacity: usize,

    /// Serve consistent (and paginated exact) lists from the cache instead of
    /// the store of record
    #[serde(default)]
    pub consistent_list_from_snapshot: bool,

    /// How long a read may wait for a revision (default: 3s)
    #[serde(default = "default_block_timeout_ms")]
    pub block_timeout_ms: u64,

    /// How long a wait runs before asking the store of record for a bookmark
    #[serde(default = "default_progress_grace_ms")]
    pub progress_grace_ms: u64,

    /// Freshness trim / shrink interval of the run loop
    #[serde(default = "default_maintenance_interval_ms")]
    pub maintenance_interval_ms: u64,

    /// Events copied per read-lock acquisition by watch cursors
    #[serde(default = "default_cursor_buffer_size")]
    pub cursor_buffer_size: usize,
}

fn default_event_fresh_duration_ms() -> u64 { 75_000 }
fn default_initial_capacity() -> usize { 100 }
fn default_lower_bound_capacity() -> usize { 100 }
fn default_upper_bound_capacity() -> usize { 100 * 1024 }
fn default_block_timeout_ms() -> u64 { 3_000 }
fn default_progress_grace_ms() -> u64 { 100 }
fn default_maintenance_interval_ms() -> u64 { 1_000 }
fn default_cursor_buffer_size() -> usize { 100 }

impl Default for WatchCacheConfig {
    fn default() -> Self {
        Self {
            event_fresh_duration_ms: default_event_fresh_duration_ms(),
            initial_capacity: default_initial_capacity(),
            lower_bound_capacity: default_lower_bound_capacity(),
            upper_bound_capacity: default_upper_bound_capacity(),
            consistent_list_from_snapshot: false,
            block_timeout_ms: default_block_timeout_ms(),
            progress_grace_ms: default_progress_grace_ms(),
            maintenance_interval_ms: default_maintenance_interval_ms(),
            cursor_buffer_size: default_cursor_buffer_size(),
        }
    }
}

impl WatchCacheConfig {
    /// Fixed-size ring, useful when a test needs exact eviction behaviour.
    #[must_use]
    pub fn with_fixed_capacity(capacity: usize) -> Self {
        Self {
            initial_capacity: capacity,
            lower_bound_capacity: capacity,
            upper_bound_capacity: capacity,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn event_fresh_duration(&self) -> Duration {
        Duration::from_millis(self.event_fresh_duration_ms)
    }

    #[must_use]
    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_timeout_ms)
    }

    #[must_use]
    pub fn progress_grace(&self) -> Duration {
        Duration::from_millis(self.progress_grace_ms)
    }

    #[must_use]
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms.max(1))
    }

    pub fn validate(&self) -> Result<(), WatchCacheError> {
        if self.lower_bound_capacity == 0 {
            return Err(WatchCacheError::InvalidInput(
                "lower_bound_capacity must be positive".into(),
            ));
        }
        if self.lower_bound_capacity > self.upper_bound_capacity {
            return Err(WatchCacheError::InvalidInput(format!(
                "lower_bound_capacity {} exceeds upper_bound_capacity {}",
                self.lower_bound_capacity, self.upper_bound_capacity
            )));
        }
        if self.initial_capacity < self.lower_bound_capacity
            || self.initial_capacity > self.upper_bound_capacity
        {
            return Err(WatchCacheError::InvalidInput(format!(
                "initial_capacity {} outside [{}, {}]",
                self.initial_capacity, self.lower_bound_capacity, self.upper_bound_capacity
            )));
        }
        if self.block_timeout_ms == 0 {
            return Err(WatchCacheError::InvalidInput(
                "block_timeout_ms must be positive".into(),
            ));
        }
        if self.cursor_buffer_size == 0 {
            return Err(WatchCacheError::InvalidInput(
                "cursor_buffer_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = WatchCacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.event_fresh_duration(), Duration::from_secs(75));
        assert_eq!(config.block_timeout(), Duration::from_secs(3));
        assert!(!config.consistent_list_from_snapshot);
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: WatchCacheConfig =
            serde_json::from_str(r#"{"consistent_list_from_snapshot": true, "upper_bound_capacity": 512}"#)
                .unwrap();
        assert!(config.consistent_list_from_snapshot);
        assert_eq!(config.upper_bound_capacity, 512);
        assert_eq!(config.lower_bound_capacity, 100);
        assert_eq!(config.cursor_buffer_size, 100);
    }

    #[test]
    fn test_fixed_capacity() {
        let config = WatchCacheConfig::with_fixed_capacity(2);
        assert!(config.validate().is_ok());
        assert_eq!(config.initial_capacity, 2);
        assert_eq!(config.upper_bound_capacity, 2);
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        let config = WatchCacheConfig {
            lower_bound_capacity: 10,
            upper_bound_capacity: 5,
            initial_capacity: 5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(WatchCacheError::InvalidInput(_))));
    }

    #[test]
    fn test_rejects_initial_outside_bounds() {
        let config = WatchCacheConfig {
            initial_capacity: 5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let config = WatchCacheConfig {
            block_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
