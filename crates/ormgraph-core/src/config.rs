//! Engine configuration.

use serde::{Deserialize, Deserializer, Serialize};

/// Default maximum cascade depth.
pub const DEFAULT_MAX_CASCADE_DEPTH: usize = 100;

/// Default number of values in one `IN` list.
pub const DEFAULT_IN_LIST_LIMIT: usize = 500;

/// Persistence engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum nesting of persister calls within one cascade.
    #[serde(deserialize_with = "positive")]
    pub max_cascade_depth: usize,

    /// Maximum number of identifiers per `IN` predicate; longer lists are
    /// split into several statements.
    #[serde(deserialize_with = "positive")]
    pub in_list_limit: usize,

    /// Log every statement at debug level.
    pub log_statements: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_cascade_depth: DEFAULT_MAX_CASCADE_DEPTH,
            in_list_limit: DEFAULT_IN_LIST_LIMIT,
            log_statements: false,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Set the maximum cascade depth.
    pub fn with_max_cascade_depth(mut self, depth: usize) -> Self {
        self.max_cascade_depth = depth.max(1);
        self
    }

    /// Set the `IN` list limit.
    pub fn with_in_list_limit(mut self, limit: usize) -> Self {
        self.in_list_limit = limit.max(1);
        self
    }

    /// Enable statement logging.
    pub fn with_statement_logging(mut self) -> Self {
        self.log_statements = true;
        self
    }

    /// Number of values per `IN` list, never zero.
    pub(crate) fn in_list_chunk(&self) -> usize {
        self.in_list_limit.max(1)
    }
}

fn positive<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    match usize::deserialize(deserializer)? {
        0 => Err(serde::de::Error::custom("value must be at least 1")),
        value => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_cascade_depth, DEFAULT_MAX_CASCADE_DEPTH);
        assert_eq!(config.in_list_limit, DEFAULT_IN_LIST_LIMIT);
        assert!(!config.log_statements);
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = EngineConfig::from_json(r#"{"in_list_limit": 2}"#).unwrap();
        assert_eq!(config.in_list_limit, 2);
        assert_eq!(config.max_cascade_depth, DEFAULT_MAX_CASCADE_DEPTH);

        assert!(EngineConfig::from_json("{").is_err());
    }

    #[test]
    fn test_from_json_rejects_zero_limits() {
        let err = EngineConfig::from_json(r#"{"in_list_limit": 0}"#).unwrap_err();
        assert!(err.to_string().contains("at least 1"), "{err}");
        assert!(EngineConfig::from_json(r#"{"max_cascade_depth": 0}"#).is_err());
        assert!(EngineConfig::from_json(r#"{"max_cascade_depth": 1, "in_list_limit": 1}"#).is_ok());
    }

    #[test]
    fn test_in_list_chunk_is_never_zero() {
        let config = EngineConfig {
            in_list_limit: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.in_list_chunk(), 1);
    }

    #[test]
    fn test_builder_clamps() {
        let config = EngineConfig::default()
            .with_in_list_limit(0)
            .with_max_cascade_depth(0)
            .with_statement_logging();
        assert_eq!(config.in_list_limit, 1);
        assert_eq!(config.max_cascade_depth, 1);
        assert!(config.log_statements);
    }
}
