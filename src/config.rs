//! Configuration types.
//!
//! Everything has a usable default; `from_env()` overrides individual values
//! from `GRAPH_CLASSIFIER_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Personal-mail providers whose domains never become company nodes.
pub const DEFAULT_PERSONAL_DOMAINS: &[&str] = &[
    "gmail.com",
    "googlemail.com",
    "yahoo.com",
    "hotmail.com",
    "outlook.com",
    "live.com",
    "icloud.com",
    "me.com",
    "aol.com",
    "protonmail.com",
    "proton.me",
];

/// Classification engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker pool width for bulk classification.
    pub concurrency: usize,
    /// Upper bound for classifying a single thread.
    pub thread_timeout: Duration,
    /// Upper bound for a whole bulk call.
    pub bulk_timeout: Duration,
    /// Similarity cutoff for `ai_match` conditions when a rule sets none.
    pub ai_match_threshold: f32,
    /// Maximum structural bindings explored per rule per thread.
    pub max_bindings_per_rule: usize,
    /// Email domains treated as personal mail (no company inferred).
    pub personal_domains: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            thread_timeout: Duration::from_secs(10),
            bulk_timeout: Duration::from_secs(120),
            ai_match_threshold: 0.7,
            max_bindings_per_rule: 64,
            personal_domains: DEFAULT_PERSONAL_DOMAINS
                .iter()
                .map(|d| d.to_string())
                .collect(),
        }
    }
}

impl EngineConfig {
    /// Build from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(width) = parse_var::<usize>(&lookup, "GRAPH_CLASSIFIER_CONCURRENCY")? {
            if width == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "GRAPH_CLASSIFIER_CONCURRENCY".into(),
                    message: "must be at least 1".into(),
                });
            }
            config.concurrency = width;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "GRAPH_CLASSIFIER_THREAD_TIMEOUT_MS")? {
            config.thread_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "GRAPH_CLASSIFIER_BULK_TIMEOUT_MS")? {
            config.bulk_timeout = Duration::from_millis(ms);
        }
        if let Some(threshold) = parse_var::<f32>(&lookup, "GRAPH_CLASSIFIER_AI_THRESHOLD")? {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(ConfigError::InvalidValue {
                    key: "GRAPH_CLASSIFIER_AI_THRESHOLD".into(),
                    message: format!("{threshold} is outside [0, 1]"),
                });
            }
            config.ai_match_threshold = threshold;
        }
        if let Some(max) = parse_var::<usize>(&lookup, "GRAPH_CLASSIFIER_MAX_BINDINGS")? {
            config.max_bindings_per_rule = max.max(1);
        }
        if let Some(domains) = lookup("GRAPH_CLASSIFIER_PERSONAL_DOMAINS") {
            config.personal_domains = domains
                .split(',')
                .map(|d| d.trim().to_lowercase())
                .filter(|d| !d.is_empty())
                .collect();
        }

        Ok(config)
    }
}

/// HTTP server / binary configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port for the JSON API.
    pub port: u16,
    /// libSQL database file holding rules, labels and vocabulary.
    pub db_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            db_path: PathBuf::from("./data/graph-classifier.db"),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(port) = parse_var::<u16>(&lookup, "GRAPH_CLASSIFIER_PORT")? {
            config.port = port;
        }
        if let Some(path) = lookup("GRAPH_CLASSIFIER_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        Ok(config)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = EngineConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.concurrency, 8);
        assert!((config.ai_match_threshold - 0.7).abs() < f32::EPSILON);
        assert!(config.personal_domains.iter().any(|d| d == "gmail.com"));
    }

    #[test]
    fn overrides_from_lookup() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("GRAPH_CLASSIFIER_CONCURRENCY", "3"),
            ("GRAPH_CLASSIFIER_THREAD_TIMEOUT_MS", "250"),
            ("GRAPH_CLASSIFIER_PERSONAL_DOMAINS", "Example.org, ,mail.test"),
        ]))
        .unwrap();
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.thread_timeout, Duration::from_millis(250));
        assert_eq!(config.personal_domains, vec!["example.org", "mail.test"]);
    }

    #[test]
    fn rejects_zero_concurrency() {
        let err = EngineConfig::from_lookup(lookup_from(&[("GRAPH_CLASSIFIER_CONCURRENCY", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn rejects_unparseable_threshold() {
        let err = EngineConfig::from_lookup(lookup_from(&[("GRAPH_CLASSIFIER_AI_THRESHOLD", "high")]))
            .unwrap_err();
        assert!(err.to_string().contains("GRAPH_CLASSIFIER_AI_THRESHOLD"));
    }

    #[test]
    fn server_config_overrides() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("GRAPH_CLASSIFIER_PORT", "9090"),
            ("GRAPH_CLASSIFIER_DB_PATH", "/tmp/rules.db"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.db_path, PathBuf::from("/tmp/rules.db"));
    }
}
