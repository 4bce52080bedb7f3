//! Telemetry configuration from environment variables.

use std::env;

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name recorded on the startup event
    pub service_name: String,

    /// `EnvFilter` directives, e.g. `info` or `ds_02_hsm_providers=debug`
    pub log_level: String,

    /// Emit JSON lines instead of human-readable output
    pub json_logs: bool,

    /// Colored output; ignored for JSON
    pub ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "docseal".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            ansi: true,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from the process environment.
    ///
    /// # Environment Variables
    ///
    /// - `DS_SERVICE_NAME`: Service name (default: docseal)
    /// - `DS_LOG_LEVEL` or `RUST_LOG`: Log filter (default: info)
    /// - `DS_JSON_LOGS`: JSON output (default: false)
    /// - `NO_COLOR`: Disable ANSI colors when set
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            service_name: lookup("DS_SERVICE_NAME").unwrap_or(defaults.service_name),
            log_level: lookup("DS_LOG_LEVEL")
                .or_else(|| lookup("RUST_LOG"))
                .unwrap_or(defaults.log_level),
            json_logs: lookup("DS_JSON_LOGS")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(defaults.json_logs),
            ansi: lookup("NO_COLOR").is_none(),
        }
    }

    /// Override the filter, as a `--verbose` flag would.
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::from_lookup(lookup(&[]));
        assert_eq!(config, TelemetryConfig::default());
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_ds_log_level_wins_over_rust_log() {
        let config = TelemetryConfig::from_lookup(lookup(&[("DS_LOG_LEVEL", "debug"), ("RUST_LOG", "warn")]));
        assert_eq!(config.log_level, "debug");
        let config = TelemetryConfig::from_lookup(lookup(&[("RUST_LOG", "warn")]));
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_json_and_color_flags() {
        let config = TelemetryConfig::from_lookup(lookup(&[("DS_JSON_LOGS", "TRUE"), ("NO_COLOR", "1")]));
        assert!(config.json_logs);
        assert!(!config.ansi);
        let config = TelemetryConfig::from_lookup(lookup(&[("DS_JSON_LOGS", "no")]));
        assert!(!config.json_logs);
    }
}
