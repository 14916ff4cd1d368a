//! Bridge configuration.
//!
//! ## TOML format
//!
//! ```toml
//! accept_expression = false
//! explain_filters = true
//! default_primary_key = "id"
//! filter_variable = "resource"
//! allow_rule = "allow"
//! ```
//!
//! Every key is optional. After the file is read, `POLICY_BRIDGE_EXPLAIN` and
//! `POLICY_BRIDGE_ACCEPT_EXPRESSION` override the matching flags when set to
//! `1`, `true` or `yes` (or `0`, `false`, `no`).

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;

pub const ENV_EXPLAIN: &str = "POLICY_BRIDGE_EXPLAIN";
pub const ENV_ACCEPT_EXPRESSION: &str = "POLICY_BRIDGE_ACCEPT_EXPRESSION";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Hand expression bindings to the host instead of treating them as
    /// residual constraints
    pub accept_expression: bool,

    /// Log every built filter and compiled plan at `info`
    pub explain_filters: bool,

    /// Primary key column for classes that do not declare one
    pub default_primary_key: String,

    /// Variable bound to the partial resource in filtering queries
    pub filter_variable: String,

    /// Rule queried by the authorization helpers
    pub allow_rule: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            accept_expression: false,
            explain_filters: false,
            default_primary_key: "id".to_string(),
            filter_variable: "resource".to_string(),
            allow_rule: "allow".to_string(),
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

impl BridgeConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Reads a TOML file and applies environment overrides
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env();
        debug!(target: "policy_bridge::config", path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(flag) = lookup(ENV_EXPLAIN).as_deref().and_then(parse_flag) {
            self.explain_filters = flag;
        }
        if let Some(flag) = lookup(ENV_ACCEPT_EXPRESSION).as_deref().and_then(parse_flag) {
            self.accept_expression = flag;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_is_default() {
        assert_eq!(BridgeConfig::from_toml_str("").unwrap(), BridgeConfig::default());
    }

    #[test]
    fn test_parse_partial() {
        let config = BridgeConfig::from_toml_str(
            r#"
explain_filters = true
default_primary_key = "uuid"
"#,
        )
        .unwrap();
        assert!(config.explain_filters);
        assert!(!config.accept_expression);
        assert_eq!(config.default_primary_key, "uuid");
        assert_eq!(config.filter_variable, "resource");
    }

    #[test]
    fn test_parse_invalid_toml() {
        let err = BridgeConfig::from_toml_str("explain_filters = maybe").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        let err = BridgeConfig::from_toml_str("colour = \"blue\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = BridgeConfig::default();
        config.apply_overrides(|key| match key {
            ENV_EXPLAIN => Some("YES".to_string()),
            ENV_ACCEPT_EXPRESSION => Some("sometimes".to_string()),
            _ => None,
        });
        assert!(config.explain_filters);
        assert!(!config.accept_expression);
    }

    #[test]
    fn test_load_nonexistent_path() {
        let err = BridgeConfig::load(Path::new("/nonexistent/bridge.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
