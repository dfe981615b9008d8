//! Environment-style configuration for the tracer.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Execution environment of the host application.
///
/// Local mode traces every query; anything else goes through the
/// slow-query/sampling rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Local,
    #[serde(other)]
    Production,
}

impl Environment {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("local") {
            Environment::Local
        } else {
            Environment::Production
        }
    }
}

/// Tracer configuration.
///
/// `from_env` reads the `SQL_TRACE_*` variables and never fails; any
/// unset or unparseable value falls back to its default. Hosts that
/// carry a config file can use `from_json_str` instead.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Append-only sink for SQL detail records.
    pub sql_log: PathBuf,
    /// Append-only sink for call-chain records.
    pub trace_log: PathBuf,
    /// Append-only sink for tracer-internal errors.
    pub error_log: PathBuf,
    pub environment: Environment,
    /// Whether to forward per-query statistics to the aggregate store.
    pub analyse: bool,
    /// Address of this application instance, stored in the descriptive
    /// aggregate blob next to the database host.
    pub app_host: String,
    /// Maximum call-stack depth captured per traced query.
    pub max_stack_depth: usize,
    /// Queries slower than this are always traced.
    pub slow_ms: f64,
    /// Frames whose file path matches this pattern are dropped from
    /// reduced call chains.
    pub vendor_pattern: String,
}

impl Default for TraceConfig {
    fn default() -> Self {
        TraceConfig {
            sql_log: PathBuf::from("/tmp/sql.log"),
            trace_log: PathBuf::from("/tmp/sql_trace.log"),
            error_log: PathBuf::from("/tmp/sql_error.log"),
            environment: Environment::Production,
            analyse: false,
            app_host: "-".to_string(),
            max_stack_depth: 20,
            slow_ms: 100.0,
            vendor_pattern: r"[/\\](vendor|\.cargo|\.rustup)[/\\]|^/rustc/".to_string(),
        }
    }
}

impl TraceConfig {
    pub fn from_env() -> Self {
        let mut config = TraceConfig::default();
        if let Some(path) = env::var_os("SQL_TRACE_SQL_FILE") {
            config.sql_log = PathBuf::from(path);
        }
        if let Some(path) = env::var_os("SQL_TRACE_TRACE_FILE") {
            config.trace_log = PathBuf::from(path);
        }
        if let Some(path) = env::var_os("SQL_TRACE_ERROR_FILE") {
            config.error_log = PathBuf::from(path);
        }
        if let Ok(value) = env::var("APP_ENV") {
            config.environment = Environment::parse(&value);
        }
        if let Ok(value) = env::var("SQL_TRACE_ANALYSE") {
            config.analyse = parse_bool(&value);
        }
        if let Ok(value) = env::var("SQL_TRACE_APP_HOST") {
            config.app_host = value;
        }
        config
    }

    pub fn from_json_str(buf: &str) -> Result<Self> {
        serde_json::from_str(buf).context("Failed to parse tracer config")
    }
}

fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TraceConfig::default();
        assert_eq!(config.sql_log, PathBuf::from("/tmp/sql.log"));
        assert_eq!(config.environment, Environment::Production);
        assert!(!config.analyse);
        assert_eq!(config.max_stack_depth, 20);
    }

    #[test]
    fn test_environment_parse() {
        assert_eq!(Environment::parse("local"), Environment::Local);
        assert_eq!(Environment::parse("LOCAL"), Environment::Local);
        assert_eq!(Environment::parse("production"), Environment::Production);
        assert_eq!(Environment::parse("staging"), Environment::Production);
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("1"));
        assert!(parse_bool("true"));
        assert!(parse_bool("TRUE"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("yes"));
        assert!(!parse_bool(""));
    }

    #[test]
    fn test_from_json() {
        let json = r#"
        {
            "sql_log": "/var/log/app/sql.log",
            "environment": "local",
            "analyse": true,
            "slow_ms": 250.0
        }
        "#;
        let config = TraceConfig::from_json_str(json).unwrap();
        assert_eq!(config.sql_log, PathBuf::from("/var/log/app/sql.log"));
        assert_eq!(config.environment, Environment::Local);
        assert!(config.analyse);
        assert_eq!(config.slow_ms, 250.0);
        // Unlisted fields keep their defaults.
        assert_eq!(config.trace_log, PathBuf::from("/tmp/sql_trace.log"));
    }

    #[test]
    fn test_from_json_unknown_environment() {
        let config = TraceConfig::from_json_str(r#"{"environment": "staging"}"#).unwrap();
        assert_eq!(config.environment, Environment::Production);
    }

    #[test]
    fn test_from_json_invalid() {
        assert!(TraceConfig::from_json_str("not json").is_err());
    }
}
