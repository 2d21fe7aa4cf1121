//! Client configuration
//!
//! Configuration is loaded from:
//! 1. A TOML file (`url`, `api_key`, `api_key_secret`)
//! 2. Environment variables (`COUCHDB_URL`, `API_KEY`, `API_KEY_PASSWORD`)
//!
//! Environment variables take precedence over config file values. Only the
//! presence of each value is checked; a malformed URL surfaces when a request
//! is sent.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DocStoreError, Result};

pub const URL_VAR: &str = "COUCHDB_URL";
pub const API_KEY_VAR: &str = "API_KEY";
pub const API_KEY_SECRET_VAR: &str = "API_KEY_PASSWORD";

/// Base URL and credentials of one document store.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Server base URL, e.g. `https://couch.example.com/`
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub api_key_secret: String,
}

impl Config {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        api_key_secret: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            api_key_secret: api_key_secret.into(),
        }
    }

    /// Load configuration from the process environment only.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from a TOML file, then apply environment overrides.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DocStoreError::Config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        let mut config = Self::parse(&content)?;
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string. The environment is not consulted.
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let config = Self::parse(toml_content)?;
        config.validate()?;
        Ok(config)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        config.apply_overrides(lookup);
        config.validate()?;
        Ok(config)
    }

    fn parse(toml_content: &str) -> Result<Self> {
        toml::from_str(toml_content)
            .map_err(|e| DocStoreError::Config(format!("failed to parse config TOML: {e}")))
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup(URL_VAR) {
            self.url = val;
        }
        if let Some(val) = lookup(API_KEY_VAR) {
            self.api_key = val;
        }
        if let Some(val) = lookup(API_KEY_SECRET_VAR) {
            self.api_key_secret = val;
        }
    }

    fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            (URL_VAR, &self.url),
            (API_KEY_VAR, &self.api_key),
            (API_KEY_SECRET_VAR, &self.api_key_secret),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(DocStoreError::Config(format!("missing {}", missing.join(", "))))
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("url", &self.url)
            .field("api_key", &self.api_key)
            .field("api_key_secret", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn loads_from_lookup() {
        let env = vars(&[
            (URL_VAR, "http://localhost:5984/"),
            (API_KEY_VAR, "admin"),
            (API_KEY_SECRET_VAR, "secret"),
        ]);
        let config = Config::from_lookup(|name| env.get(name).cloned()).unwrap();
        assert_eq!(config, Config::new("http://localhost:5984/", "admin", "secret"));
    }

    #[test]
    fn reports_every_missing_value() {
        let env = vars(&[(URL_VAR, "http://localhost:5984/")]);
        let err = Config::from_lookup(|name| env.get(name).cloned()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains(API_KEY_VAR));
        assert!(msg.contains(API_KEY_SECRET_VAR));
        assert!(!msg.contains(URL_VAR));
    }

    #[test]
    fn loads_from_toml() {
        let config = Config::load_from_str(
            r#"
            url = "https://couch.example.com/"
            api_key = "key"
            api_key_secret = "pass"
            "#,
        )
        .unwrap();
        assert_eq!(config.url, "https://couch.example.com/");
        assert_eq!(config.api_key, "key");
        assert_eq!(config.api_key_secret, "pass");
    }

    #[test]
    fn rejects_invalid_toml() {
        let err = Config::load_from_str("url = ").unwrap_err();
        assert!(matches!(err, DocStoreError::Config(_)));
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config = Config::new("http://file/", "file-key", "file-secret");
        let env = vars(&[(API_KEY_VAR, "env-key")]);
        config.apply_overrides(|name| env.get(name).cloned());
        assert_eq!(config.url, "http://file/");
        assert_eq!(config.api_key, "env-key");
        assert_eq!(config.api_key_secret, "file-secret");
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = Config::load_from_path("/nonexistent/docstore.toml").unwrap_err();
        assert!(matches!(err, DocStoreError::Config(_)));
    }

    #[test]
    fn debug_redacts_secret() {
        let config = Config::new("http://localhost:5984/", "admin", "hunter2");
        let out = format!("{config:?}");
        assert!(out.contains("admin"));
        assert!(!out.contains("hunter2"));
    }
}
