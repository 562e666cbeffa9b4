use schema_core::SyncConfig;
use std::time::Duration;

/// Reserved label prefixes, comma separated. Defaults to `_`.
pub const RESERVED_PREFIXES_VAR: &str = "SCHEMA_SYNC_RESERVED_PREFIXES";
/// Per-statement timeout in seconds.
pub const STEP_TIMEOUT_VAR: &str = "SCHEMA_SYNC_STEP_TIMEOUT_SECS";

/// CLI configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub sync: SyncConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional environment variables:
    /// - `SCHEMA_SYNC_RESERVED_PREFIXES`: e.g. `_,tmp_`
    /// - `SCHEMA_SYNC_STEP_TIMEOUT_SECS`: positive integer
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut sync = SyncConfig::default();

        if let Some(prefixes) = lookup(RESERVED_PREFIXES_VAR) {
            sync = sync.with_reserved_prefixes(
                prefixes
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty()),
            );
        }

        if let Some(raw) = lookup(STEP_TIMEOUT_VAR) {
            let secs: u64 = raw
                .trim()
                .parse()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| ConfigError::InvalidTimeout(raw.clone()))?;
            sync = sync.with_step_timeout(Duration::from_secs(secs));
        }

        Ok(Self { sync })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("SCHEMA_SYNC_STEP_TIMEOUT_SECS must be a positive number of seconds, got '{0}'")]
    InvalidTimeout(String),
}
