//! Deployment-time gateway settings.

use std::collections::BTreeMap;

use mirage_telemetry::{LogFormat, TelemetryConfig, TelemetryError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Account id reported to backends when none is configured.
pub const DEFAULT_ACCOUNT_ID: &str = "000000000000";

/// Stage name used when none is configured.
pub const DEFAULT_STAGE: &str = "local";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid gateway config: {0}")]
    Parse(String),
}

/// Stage, stage variables and account id of the emulated deployment, plus
/// how it logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct GatewayConfig {
    pub stage: String,
    pub stage_variables: BTreeMap<String, String>,
    pub account_id: String,
    /// `EnvFilter` directive, overridden by `RUST_LOG`.
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            stage: DEFAULT_STAGE.to_string(),
            stage_variables: BTreeMap::new(),
            account_id: DEFAULT_ACCOUNT_ID.to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
        }
    }
}

impl GatewayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a config from YAML (or JSON). Missing fields take their defaults.
    pub fn from_yaml_str(input: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = stage.into();
        self
    }

    pub fn with_stage_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.stage_variables.insert(name.into(), value.into());
        self
    }

    pub fn with_stage_variables<K, V>(mut self, variables: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.stage_variables
            .extend(variables.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = account_id.into();
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    /// Logging settings for this deployment; the service is named after the
    /// stage.
    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig::new()
            .with_service_name(format!("mirage-{}", self.stage))
            .with_log_level(self.log_level.as_str())
            .with_log_format(self.log_format)
    }

    /// Install the global log subscriber. Fails if one is already set.
    pub fn init_logging(&self) -> Result<(), TelemetryError> {
        mirage_telemetry::init(&self.telemetry())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.stage, "local");
        assert_eq!(config.account_id, "000000000000");
        assert!(config.stage_variables.is_empty());
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_builder() {
        let config = GatewayConfig::new()
            .with_stage("test")
            .with_stage_variable("env", "prod")
            .with_stage_variables([("region", "eu"), ("env", "dev")])
            .with_account_id("123456789012");
        assert_eq!(config.stage, "test");
        assert_eq!(config.stage_variables["env"], "dev");
        assert_eq!(config.stage_variables["region"], "eu");
        assert_eq!(config.account_id, "123456789012");
    }

    #[test]
    fn test_from_yaml() {
        let config = GatewayConfig::from_yaml_str(
            "stage: dev\nstageVariables:\n  env: prod\n",
        )
        .unwrap();
        assert_eq!(config.stage, "dev");
        assert_eq!(config.stage_variables["env"], "prod");
        assert_eq!(config.account_id, DEFAULT_ACCOUNT_ID);
    }

    #[test]
    fn test_telemetry_follows_config() {
        let config = GatewayConfig::from_yaml_str(
            "stage: dev\nlogLevel: mirage=debug\nlogFormat: pretty\n",
        )
        .unwrap();
        let telemetry = config.telemetry();
        assert_eq!(telemetry.service_name, "mirage-dev");
        assert_eq!(telemetry.log_level, "mirage=debug");
        assert_eq!(telemetry.log_format, LogFormat::Pretty);
        assert!(GatewayConfig::from_yaml_str("logFormat: xml\n").is_err());
    }

    #[test]
    fn test_from_yaml_rejects_unknown_fields() {
        assert!(GatewayConfig::from_yaml_str("stages: dev\n").is_err());
    }
}
