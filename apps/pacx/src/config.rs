use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use pacx_http::{ExponentialBackoff, RetryPolicy, TransportConfig};
use pacx_odata::BatchRetryPolicy;
use pacx_operations::PollOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment prefix; `PACX__SERVICE__BASE_URL` sets `service.base_url`.
pub const ENV_PREFIX: &str = "PACX__";

/// Effective configuration: defaults, then YAML, then env, then CLI flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub batch: BatchConfig,
    pub poll: PollConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Service root, e.g. `https://org.crm.dynamics.com/api/data/v9.2`
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub user_agent: Option<String>,
    pub max_retries: usize,
    pub backoff_initial_ms: u64,
    pub backoff_multiplier: f64,
    pub backoff_max_ms: u64,
    pub backoff_jitter: bool,
    pub ignore_retry_after: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: 60,
            user_agent: None,
            max_retries: 2,
            backoff_initial_ms: 500,
            backoff_multiplier: 2.0,
            backoff_max_ms: 60_000,
            backoff_jitter: false,
            ignore_retry_after: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    pub path: String,
    /// Re-send rounds for throttled parts
    pub max_retries: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            path: pacx_odata::DEFAULT_BATCH_PATH.to_owned(),
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PollConfig {
    pub interval_ms: u64,
    pub timeout_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2_000,
            timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_owned(),
            json: false,
        }
    }
}

/// Flags that override file and environment values
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub base_url: Option<String>,
    pub verbose: u8,
    pub json_logs: bool,
}

impl AppConfig {
    /// Load the layered configuration.
    ///
    /// # Errors
    /// A missing or unparsable config file, or values of the wrong type.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));

        if let Some(path) = path {
            if !path.is_file() {
                anyhow::bail!("config file does not exist: {}", path.display());
            }
            figment = figment.merge(Yaml::file(path));
        }

        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("invalid configuration")
    }

    pub fn apply_cli_overrides(&mut self, cli: &CliOverrides) {
        if let Some(base_url) = &cli.base_url {
            self.service.base_url = Some(base_url.clone());
        }
        if cli.json_logs {
            self.logging.json = true;
        }
        let level = match cli.verbose {
            0 => None,
            1 => Some("info"),
            2 => Some("debug"),
            _ => Some("trace"),
        };
        if let Some(level) = level {
            self.logging.level = level.to_owned();
        }
    }

    /// # Errors
    /// No service root configured.
    pub fn base_url(&self) -> Result<&str> {
        self.service
            .base_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .context("no service URL configured; set service.base_url, PACX__SERVICE__BASE_URL or --base-url")
    }

    #[must_use]
    pub fn transport_config(&self) -> TransportConfig {
        let service = &self.service;
        let mut backoff = ExponentialBackoff::new(
            Duration::from_millis(service.backoff_initial_ms),
            service.backoff_multiplier,
        );
        backoff.max = Duration::from_millis(service.backoff_max_ms);
        backoff.jitter = service.backoff_jitter;

        let mut config = TransportConfig {
            request_timeout: Duration::from_secs(service.timeout_secs),
            retry: Some(RetryPolicy {
                max_retries: service.max_retries,
                backoff,
                ignore_retry_after: service.ignore_retry_after,
                ..RetryPolicy::default()
            }),
            ..TransportConfig::default()
        };
        if let Some(user_agent) = &service.user_agent {
            config.user_agent.clone_from(user_agent);
        }
        config
    }

    #[must_use]
    pub fn batch_retry(&self) -> BatchRetryPolicy {
        BatchRetryPolicy {
            max_retries: self.batch.max_retries,
            ..BatchRetryPolicy::default()
        }
    }

    #[must_use]
    pub fn poll_options(&self) -> PollOptions {
        PollOptions::new(
            Duration::from_millis(self.poll.interval_ms),
            Duration::from_secs(self.poll.timeout_secs),
        )
    }
}
