// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants;
use crate::errors::TelemetryError;
use crate::util::parse_metric_namespace;
use std::env;
use std::time::Duration;

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_NAMESPACE: &str = "Hyperion/FleetManager";
const DEFAULT_PROJECT_NAME: &str = "hyperion-fleet";
const DEFAULT_LOG_GROUP: &str = "/hyperion/fleet";
const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 10;
const DEFAULT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_BASE_MS: u64 = 100;
const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(10);

/// What happens to a batch once its retry budget is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Drop the batch and emit a warning.
    Drop,
    /// Put the items back into the buffer for the next flush, keeping at most
    /// `max_entries` of them; the excess is dropped.
    Requeue { max_entries: usize },
}

/// Configuration owned by one telemetry pipeline instance.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// When false, `publish` and `enqueue` are no-ops
    pub enabled: bool,
    /// Region the session and default endpoints are bound to
    pub region: String,
    /// Namespace every metric batch is published under
    pub metric_namespace: String,
    /// Value of the static `Project` dimension
    pub project_name: String,
    /// Explicit `Environment` dimension
    pub environment: Option<String>,
    /// Explicit `Role` dimension
    pub role: Option<String>,
    /// Log group all entries are shipped to
    pub log_group: String,
    /// Overrides the `{hostname}/{date}` stream name
    pub log_stream: Option<String>,
    /// Overrides the region-derived metrics endpoint
    pub metrics_endpoint: Option<String>,
    /// Overrides the region-derived logs endpoint
    pub logs_endpoint: Option<String>,
    /// HTTPS proxy URL
    pub https_proxy: Option<String>,
    /// How often the flush loop runs
    pub flush_interval: Duration,
    /// Timeout applied to every remote call
    pub request_timeout: Duration,
    /// Retries allowed for throttled or transient failures, on top of the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles on every subsequent one
    pub retry_base_delay: Duration,
    /// Upper bound on a single backoff delay
    pub retry_max_delay: Duration,
    pub failure_policy: FailurePolicy,
    /// When true, `flush` returns an error if anything was dropped
    pub strict: bool,
    /// Buffered log entries kept before the oldest are evicted
    pub max_queue_entries: usize,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            region: DEFAULT_REGION.to_string(),
            metric_namespace: DEFAULT_NAMESPACE.to_string(),
            project_name: DEFAULT_PROJECT_NAME.to_string(),
            environment: None,
            role: None,
            log_group: DEFAULT_LOG_GROUP.to_string(),
            log_stream: None,
            metrics_endpoint: None,
            logs_endpoint: None,
            https_proxy: None,
            flush_interval: Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_MS),
            retry_max_delay: DEFAULT_RETRY_MAX_DELAY,
            failure_policy: FailurePolicy::Drop,
            strict: false,
            max_queue_entries: constants::DEFAULT_MAX_QUEUE_ENTRIES,
            log_level: "info".to_string(),
        }
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|val| match val.to_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            _ => default,
        })
        .unwrap_or(default)
}

fn env_number<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|val| val.trim().parse::<T>().ok())
}

fn env_non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|val| !val.trim().is_empty())
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, TelemetryError> {
        let defaults = Self::default();

        let metric_namespace = match env::var("METRIC_NAMESPACE") {
            Ok(val) => parse_metric_namespace(&val).ok_or_else(|| {
                TelemetryError::InvalidConfig(format!("Invalid METRIC_NAMESPACE '{val}'"))
            })?,
            Err(_) => defaults.metric_namespace,
        };

        let requeue_cap =
            env_number("FLEET_TELEMETRY_REQUEUE_CAP").unwrap_or(constants::DEFAULT_REQUEUE_CAP);
        let failure_policy = match env::var("FLEET_TELEMETRY_ON_FAILURE")
            .map(|val| val.to_lowercase())
            .as_deref()
        {
            Ok("requeue") => FailurePolicy::Requeue {
                max_entries: requeue_cap,
            },
            Ok("drop") | Err(_) => FailurePolicy::Drop,
            Ok(other) => {
                return Err(TelemetryError::InvalidConfig(format!(
                    "Invalid FLEET_TELEMETRY_ON_FAILURE '{other}'. Must be one of: drop, requeue"
                )))
            }
        };

        let config = Self {
            enabled: env_flag("FLEET_TELEMETRY_ENABLED", defaults.enabled),
            region: env::var("AWS_REGION").unwrap_or(defaults.region),
            metric_namespace,
            project_name: env::var("FLEET_NAME").unwrap_or(defaults.project_name),
            environment: env_non_empty("ENVIRONMENT"),
            role: env_non_empty("FLEET_ROLE"),
            log_group: env::var("FLEET_LOG_GROUP").unwrap_or(defaults.log_group),
            log_stream: env_non_empty("FLEET_LOG_STREAM"),
            metrics_endpoint: env_non_empty("FLEET_METRICS_ENDPOINT"),
            logs_endpoint: env_non_empty("FLEET_LOGS_ENDPOINT"),
            https_proxy: env::var("FLEET_PROXY_HTTPS")
                .or_else(|_| env::var("HTTPS_PROXY"))
                .ok(),
            flush_interval: env_number("FLEET_TELEMETRY_FLUSH_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.flush_interval),
            request_timeout: env_number("FLEET_TELEMETRY_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            max_retries: env_number("FLEET_TELEMETRY_MAX_RETRIES").unwrap_or(defaults.max_retries),
            retry_base_delay: env_number("FLEET_TELEMETRY_RETRY_BASE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
            retry_max_delay: defaults.retry_max_delay,
            failure_policy,
            strict: env_flag("FLEET_TELEMETRY_STRICT", defaults.strict),
            max_queue_entries: env_number("FLEET_TELEMETRY_MAX_QUEUE")
                .unwrap_or(defaults.max_queue_entries),
            log_level: env::var("FLEET_TELEMETRY_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), TelemetryError> {
        if self.region.trim().is_empty() {
            return Err(TelemetryError::InvalidConfig(
                "AWS_REGION cannot be empty".to_string(),
            ));
        }

        if parse_metric_namespace(&self.metric_namespace).is_none() {
            return Err(TelemetryError::InvalidConfig(format!(
                "Invalid metric namespace '{}'",
                self.metric_namespace
            )));
        }

        if self.log_group.trim().is_empty() {
            return Err(TelemetryError::InvalidConfig(
                "FLEET_LOG_GROUP cannot be empty".to_string(),
            ));
        }

        if self.flush_interval.is_zero() {
            return Err(TelemetryError::InvalidConfig(
                "Flush interval must be greater than 0".to_string(),
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(TelemetryError::InvalidConfig(
                "Request timeout must be greater than 0".to_string(),
            ));
        }

        if self.max_queue_entries == 0 {
            return Err(TelemetryError::InvalidConfig(
                "FLEET_TELEMETRY_MAX_QUEUE must be greater than 0".to_string(),
            ));
        }

        if let FailurePolicy::Requeue { max_entries: 0 } = self.failure_policy {
            return Err(TelemetryError::InvalidConfig(
                "FLEET_TELEMETRY_REQUEUE_CAP must be greater than 0".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(TelemetryError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Endpoint for the metrics API, derived from the region unless overridden.
    #[must_use]
    pub fn metrics_endpoint(&self) -> String {
        self.metrics_endpoint
            .clone()
            .unwrap_or_else(|| format!("https://monitoring.{}.amazonaws.com", self.region))
    }

    /// Endpoint for the logs API, derived from the region unless overridden.
    #[must_use]
    pub fn logs_endpoint(&self) -> String {
        self.logs_endpoint
            .clone()
            .unwrap_or_else(|| format!("https://logs.{}.amazonaws.com", self.region))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ENV_VARS: [&str; 9] = [
        "AWS_REGION",
        "METRIC_NAMESPACE",
        "FLEET_LOG_GROUP",
        "FLEET_LOG_STREAM",
        "FLEET_TELEMETRY_ON_FAILURE",
        "FLEET_TELEMETRY_REQUEUE_CAP",
        "FLEET_TELEMETRY_ENABLED",
        "FLEET_TELEMETRY_MAX_RETRIES",
        "FLEET_TELEMETRY_LOG_LEVEL",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = TelemetryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.failure_policy, FailurePolicy::Drop);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_validate_empty_region() {
        let config = TelemetryConfig {
            region: "  ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_namespace() {
        let config = TelemetryConfig {
            metric_namespace: "AWS/EC2".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_requeue_cap() {
        let config = TelemetryConfig {
            failure_policy: FailurePolicy::Requeue { max_entries: 0 },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_durations() {
        let config = TelemetryConfig {
            flush_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TelemetryConfig {
            request_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let config = TelemetryConfig {
            log_level: "verbose".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_endpoints_derived_from_region() {
        let config = TelemetryConfig {
            region: "eu-west-1".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.metrics_endpoint(),
            "https://monitoring.eu-west-1.amazonaws.com"
        );
        assert_eq!(config.logs_endpoint(), "https://logs.eu-west-1.amazonaws.com");

        let config = TelemetryConfig {
            logs_endpoint: Some("http://127.0.0.1:4566".to_string()),
            ..Default::default()
        };
        assert_eq!(config.logs_endpoint(), "http://127.0.0.1:4566");
    }

    #[test]
    #[serial]
    fn test_from_env_reads_overrides() {
        clear_env();
        env::set_var("AWS_REGION", "ap-southeast-2");
        env::set_var("METRIC_NAMESPACE", "Hyperion/Patching");
        env::set_var("FLEET_LOG_STREAM", "patch-runner");
        env::set_var("FLEET_TELEMETRY_ON_FAILURE", "requeue");
        env::set_var("FLEET_TELEMETRY_REQUEUE_CAP", "500");
        env::set_var("FLEET_TELEMETRY_ENABLED", "false");
        env::set_var("FLEET_TELEMETRY_MAX_RETRIES", "5");

        let config = TelemetryConfig::from_env().expect("config should load");
        assert_eq!(config.region, "ap-southeast-2");
        assert_eq!(config.metric_namespace, "Hyperion/Patching");
        assert_eq!(config.log_stream.as_deref(), Some("patch-runner"));
        assert_eq!(
            config.failure_policy,
            FailurePolicy::Requeue { max_entries: 500 }
        );
        assert!(!config.enabled);
        assert_eq!(config.max_retries, 5);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_unknown_failure_policy() {
        clear_env();
        env::set_var("FLEET_TELEMETRY_ON_FAILURE", "retry-forever");

        assert!(TelemetryConfig::from_env().is_err());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_namespace() {
        clear_env();
        env::set_var("METRIC_NAMESPACE", "9lives");

        assert!(TelemetryConfig::from_env().is_err());

        clear_env();
    }
}
