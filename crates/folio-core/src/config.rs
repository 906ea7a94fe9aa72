//! Session configuration
//!
//! Timing and concurrency knobs for an editing session. Loadable from TOML;
//! every field is optional there and falls back to the defaults below.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Editing session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Quiet period after the last change before an autosave fires
    pub autosave_delay_ms: u64,
    /// How long Success/Error stays visible before reverting to Idle
    pub status_reset_ms: u64,
    /// Uploads in flight at once
    pub max_concurrent_uploads: usize,
    /// Deletions in flight at once
    pub max_concurrent_deletions: usize,
    /// Per-URL preload budget
    pub preload_timeout_ms: u64,
    /// How long a warmed URL is not warmed again
    pub preload_cache_ttl_secs: u64,
    /// Whether content changes arm the autosave timer
    pub autosave_enabled: bool,
}

impl SessionConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With autosave delay
    #[inline]
    #[must_use]
    pub fn with_autosave_delay(mut self, delay: Duration) -> Self {
        self.autosave_delay_ms = duration_ms(delay);
        self
    }

    /// With status reset delay
    #[inline]
    #[must_use]
    pub fn with_status_reset(mut self, delay: Duration) -> Self {
        self.status_reset_ms = duration_ms(delay);
        self
    }

    /// With upload concurrency
    #[inline]
    #[must_use]
    pub fn with_max_concurrent_uploads(mut self, max: usize) -> Self {
        self.max_concurrent_uploads = max;
        self
    }

    /// With deletion concurrency
    #[inline]
    #[must_use]
    pub fn with_max_concurrent_deletions(mut self, max: usize) -> Self {
        self.max_concurrent_deletions = max;
        self
    }

    /// With preload timeout
    #[inline]
    #[must_use]
    pub fn with_preload_timeout(mut self, timeout: Duration) -> Self {
        self.preload_timeout_ms = duration_ms(timeout);
        self
    }

    /// With autosave on or off
    #[inline]
    #[must_use]
    pub fn with_autosave(mut self, enabled: bool) -> Self {
        self.autosave_enabled = enabled;
        self
    }

    /// Parse from TOML text and validate
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file and validate
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_uploads == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_uploads must be at least 1".into(),
            ));
        }
        if self.max_concurrent_deletions == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_deletions must be at least 1".into(),
            ));
        }
        if self.preload_timeout_ms == 0 {
            return Err(ConfigError::Invalid("preload_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    /// Autosave quiet period
    #[inline]
    #[must_use]
    pub fn autosave_delay(&self) -> Duration {
        Duration::from_millis(self.autosave_delay_ms)
    }

    /// Terminal status display time
    #[inline]
    #[must_use]
    pub fn status_reset(&self) -> Duration {
        Duration::from_millis(self.status_reset_ms)
    }

    /// Per-URL preload budget
    #[inline]
    #[must_use]
    pub fn preload_timeout(&self) -> Duration {
        Duration::from_millis(self.preload_timeout_ms)
    }

    /// Warmed-URL memory
    #[inline]
    #[must_use]
    pub fn preload_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.preload_cache_ttl_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            autosave_delay_ms: 3_000,
            status_reset_ms: 2_000,
            max_concurrent_uploads: 4,
            max_concurrent_deletions: 8,
            preload_timeout_ms: 10_000,
            preload_cache_ttl_secs: 600,
            autosave_enabled: true,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
