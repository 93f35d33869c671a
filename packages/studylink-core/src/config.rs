//! Core configuration.
//!
//! Loaded from environment variables, with defaults that match the
//! behaviour of the mobile app.

use std::env;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Default minimum search fragment length. The app only searches once the
/// trimmed query is longer than two characters.
pub const DEFAULT_SEARCH_MIN_CHARS: usize = 3;

/// How the two document writes of a protocol operation are issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Two independent single-document writes. A failure between them
    /// leaves a half-applied operation, reported as `Error::PartialWrite`.
    #[default]
    Paired,
    /// Both writes are submitted as one batch and land together or not at all.
    Atomic,
}

impl WriteMode {
    /// Config string form
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Paired => "paired",
            WriteMode::Atomic => "atomic",
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WriteMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paired" => Ok(WriteMode::Paired),
            "atomic" | "batch" => Ok(WriteMode::Atomic),
            other => Err(Error::InvalidConfig(format!(
                "unknown write mode '{}', expected 'paired' or 'atomic'",
                other
            ))),
        }
    }
}

/// Configuration for the protocol services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// Paired or batched writes.
    pub write_mode: WriteMode,
    /// Search fragments shorter than this return no results.
    pub search_min_chars: usize,
    /// Path to the SQLite document store. `None` means in-memory.
    pub database_path: Option<String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            write_mode: WriteMode::Paired,
            search_min_chars: DEFAULT_SEARCH_MIN_CHARS,
            database_path: None,
        }
    }
}

impl CoreConfig {
    /// Load configuration from environment variables.
    ///
    /// - `STUDYLINK_WRITE_MODE`: `paired` or `atomic`
    /// - `STUDYLINK_SEARCH_MIN_CHARS`: positive integer
    /// - `STUDYLINK_DB`: path to the SQLite file
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`CoreConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(mode) = lookup("STUDYLINK_WRITE_MODE") {
            config.write_mode = mode.parse()?;
        }

        if let Some(min) = lookup("STUDYLINK_SEARCH_MIN_CHARS") {
            config.search_min_chars = min.trim().parse::<usize>().map_err(|e| {
                Error::InvalidConfig(format!("STUDYLINK_SEARCH_MIN_CHARS: {}", e))
            })?;
        }

        config.database_path = lookup("STUDYLINK_DB").filter(|p| !p.trim().is_empty());

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = CoreConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, CoreConfig::default());
        assert_eq!(config.write_mode, WriteMode::Paired);
        assert_eq!(config.search_min_chars, 3);
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config = CoreConfig::from_lookup(lookup_from(&[
            ("STUDYLINK_WRITE_MODE", "Atomic"),
            ("STUDYLINK_SEARCH_MIN_CHARS", "1"),
            ("STUDYLINK_DB", "/tmp/studylink.db"),
        ]))
        .unwrap();

        assert_eq!(config.write_mode, WriteMode::Atomic);
        assert_eq!(config.search_min_chars, 1);
        assert_eq!(config.database_path.as_deref(), Some("/tmp/studylink.db"));
    }

    #[test]
    fn test_invalid_values() {
        let bad_mode = CoreConfig::from_lookup(lookup_from(&[("STUDYLINK_WRITE_MODE", "eventual")]));
        assert!(matches!(bad_mode, Err(Error::InvalidConfig(_))));

        let bad_min = CoreConfig::from_lookup(lookup_from(&[("STUDYLINK_SEARCH_MIN_CHARS", "-2")]));
        assert!(matches!(bad_min, Err(Error::InvalidConfig(_))));
    }
}
