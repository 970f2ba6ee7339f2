//! Pushdown pass configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_PARTITION_NAME: &str = "__default_partition__";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushdownConfig {
    /// When false the pass leaves the plan untouched.
    pub enabled: bool,

    /// Scans whose storage can evaluate predicates take pushed predicates
    /// without a residual Filter above them.
    pub storage_pushdown: bool,

    /// Splice out Filters whose whole condition was pushed below them.
    pub remove_redundant_filters: bool,

    /// `optimize` returns the input plan if the pass fails.
    pub fallback_on_error: bool,

    /// Partition value string that stands for NULL.
    pub default_partition_name: String,
}

impl Default for PushdownConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            storage_pushdown: true,
            remove_redundant_filters: true,
            fallback_on_error: true,
            default_partition_name: DEFAULT_PARTITION_NAME.to_string(),
        }
    }
}

impl PushdownConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `SIEVE_PPD_ENABLED`
    /// - `SIEVE_PPD_STORAGE`
    /// - `SIEVE_PPD_REMOVE_DUPLICATE_FILTERS`
    /// - `SIEVE_PPD_FALLBACK`
    /// - `SIEVE_DEFAULT_PARTITION_NAME`
    ///
    /// Unparseable booleans are ignored, like the other engine settings.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(v) = lookup("SIEVE_PPD_ENABLED").and_then(|s| parse_bool(&s).ok()) {
            cfg.enabled = v;
        }
        if let Some(v) = lookup("SIEVE_PPD_STORAGE").and_then(|s| parse_bool(&s).ok()) {
            cfg.storage_pushdown = v;
        }
        if let Some(v) =
            lookup("SIEVE_PPD_REMOVE_DUPLICATE_FILTERS").and_then(|s| parse_bool(&s).ok())
        {
            cfg.remove_redundant_filters = v;
        }
        if let Some(v) = lookup("SIEVE_PPD_FALLBACK").and_then(|s| parse_bool(&s).ok()) {
            cfg.fallback_on_error = v;
        }
        if let Some(s) = lookup("SIEVE_DEFAULT_PARTITION_NAME") {
            cfg.default_partition_name = s;
        }

        cfg
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_partition_name.is_empty() {
            return Err(Error::Config(
                "default_partition_name must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// `true/false`, `1/0`, `yes/no`, `on/off`, case-insensitive.
pub fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!("'{other}' is not a boolean"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn lookup_overrides_defaults() {
        let env: HashMap<&str, &str> = [
            ("SIEVE_PPD_STORAGE", "off"),
            ("SIEVE_PPD_FALLBACK", "0"),
            ("SIEVE_PPD_ENABLED", "maybe"),
            ("SIEVE_DEFAULT_PARTITION_NAME", "__HIVE_DEFAULT__"),
        ]
        .into_iter()
        .collect();
        let cfg = PushdownConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert!(cfg.enabled);
        assert!(!cfg.storage_pushdown);
        assert!(cfg.remove_redundant_filters);
        assert!(!cfg.fallback_on_error);
        assert_eq!(cfg.default_partition_name, "__HIVE_DEFAULT__");
    }

    #[test]
    fn partial_serde_fills_defaults() {
        let cfg: PushdownConfig =
            serde_json::from_str(r#"{"remove_redundant_filters": false}"#).unwrap();
        assert!(!cfg.remove_redundant_filters);
        assert!(cfg.storage_pushdown);
        assert_eq!(cfg.default_partition_name, DEFAULT_PARTITION_NAME);
    }

    #[test]
    fn empty_default_partition_name_is_rejected() {
        let cfg = PushdownConfig {
            default_partition_name: String::new(),
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }
}
