//! Engine configuration

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the per-phase timeout, in seconds
pub const PHASE_TIMEOUT_ENV: &str = "STANZA_PHASE_TIMEOUT_SECS";

/// Default location of the content repository configuration file
pub const DEFAULT_REPOSITORY_CONFIG: &str = "/tmp/stanza-repository.config";

/// Execution engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-phase time bound in seconds
    pub phase_timeout_secs: Option<u64>,
    /// Per-phase time bound in milliseconds; takes precedence over
    /// `phase_timeout_secs`. Both unset leaves phases unbounded.
    pub phase_timeout_ms: Option<u64>,
    /// Content repository configuration file
    pub repository_config: PathBuf,
    /// Validate the action before running it
    pub validate_before_run: bool,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With per-phase timeout
    #[inline]
    #[must_use]
    pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self.phase_timeout_secs = None;
        self
    }

    /// With repository configuration path
    #[inline]
    #[must_use]
    pub fn with_repository_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.repository_config = path.into();
        self
    }

    /// With or without pre-run validation
    #[inline]
    #[must_use]
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validate_before_run = enabled;
        self
    }

    /// Per-phase timeout as a duration
    #[inline]
    #[must_use]
    pub fn phase_timeout(&self) -> Option<Duration> {
        self.phase_timeout_ms
            .map(Duration::from_millis)
            .or_else(|| self.phase_timeout_secs.map(Duration::from_secs))
    }

    /// Parse TOML configuration
    ///
    /// # Errors
    /// [`Error::Config`] on malformed input
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(e.to_string()))
    }

    /// Read TOML configuration from a file
    ///
    /// # Errors
    /// [`Error::Config`] if the file cannot be read or parsed
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    /// Apply overrides from the environment
    ///
    /// [`PHASE_TIMEOUT_ENV`] replaces any configured timeout; `0` disables it.
    ///
    /// # Errors
    /// [`Error::Config`] if an override is not a valid number
    pub fn apply_env(mut self) -> Result<Self> {
        if let Ok(raw) = std::env::var(PHASE_TIMEOUT_ENV) {
            let secs = raw
                .trim()
                .parse::<u64>()
                .map_err(|e| Error::Config(format!("{PHASE_TIMEOUT_ENV}={raw}: {e}")))?;
            self.phase_timeout_secs = (secs > 0).then_some(secs);
            self.phase_timeout_ms = None;
        }
        Ok(self)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            phase_timeout_secs: None,
            phase_timeout_ms: None,
            repository_config: PathBuf::from(DEFAULT_REPOSITORY_CONFIG),
            validate_before_run: true,
        }
    }
}
