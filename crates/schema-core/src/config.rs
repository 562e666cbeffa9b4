//! Session configuration.

use crate::store::{SCHEMA_LABEL, SCHEMA_RELATIONSHIP};
use std::time::Duration;

/// Default per-step store timeout.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Labels and relationship types starting with any of these are never introspected.
    pub reserved_prefixes: Vec<String>,
    /// Upper bound for a single store statement.
    pub step_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reserved_prefixes: vec!["_".to_string()],
            step_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }
}

impl SyncConfig {
    pub fn with_reserved_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reserved_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Whether a label or relationship type belongs to this tool or a reserved namespace.
    pub fn is_reserved(&self, name: &str) -> bool {
        name == SCHEMA_LABEL
            || name == SCHEMA_RELATIONSHIP
            || self
                .reserved_prefixes
                .iter()
                .any(|prefix| !prefix.is_empty() && name.starts_with(prefix.as_str()))
    }
}
