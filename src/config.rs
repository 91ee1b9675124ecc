//! Configuration management for Pinglimit.
//!
//! Configuration is layered: built-in defaults, then an optional file (YAML,
//! TOML or JSON, chosen by extension), then `PINGLIMIT__SECTION__KEY`
//! environment variables.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PinglimitError, Result};
use crate::ratelimit::BucketLimits;

const ENV_PREFIX: &str = "PINGLIMIT";
const ENV_SEPARATOR: &str = "__";

/// Main configuration for the Pinglimit service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PinglimitConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Request handling configuration
    #[serde(default)]
    pub http: HttpConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Default bucket capacity, in tokens
    #[serde(default = "default_capacity")]
    pub capacity: f64,

    /// Default refill rate, in tokens per second
    #[serde(default = "default_refill_rate")]
    pub refill_rate_per_second: f64,

    /// Buckets idle for this long are evicted
    #[serde(default = "default_eviction_grace_period")]
    pub eviction_grace_period_secs: u64,

    /// How often the eviction task runs
    #[serde(default = "default_eviction_interval")]
    pub eviction_interval_secs: u64,

    /// Path to a YAML file of per-client overrides
    #[serde(default)]
    pub overrides_path: Option<PathBuf>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            refill_rate_per_second: default_refill_rate(),
            eviction_grace_period_secs: default_eviction_grace_period(),
            eviction_interval_secs: default_eviction_interval(),
            overrides_path: None,
        }
    }
}

fn default_capacity() -> f64 {
    10.0
}

fn default_refill_rate() -> f64 {
    1.0
}

fn default_eviction_grace_period() -> u64 {
    300
}

fn default_eviction_interval() -> u64 {
    60
}

impl RateLimitingConfig {
    /// Default bucket limits.
    pub fn limits(&self) -> Result<BucketLimits> {
        BucketLimits::new(self.capacity, self.refill_rate_per_second)
            .map_err(|e| PinglimitError::Config(e.to_string()))
    }

    pub fn eviction_grace_period(&self) -> Duration {
        Duration::from_secs(self.eviction_grace_period_secs)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }
}

/// What to do with a request that carries no client identifier header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingClientIdPolicy {
    /// Reject the request with 400
    #[default]
    Reject,
    /// Charge every such request to one shared bucket
    Anonymous,
    /// Use the peer's IP address as the identifier
    RemoteAddr,
}

/// Request handling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Header carrying the client identifier
    #[serde(default = "default_client_id_header")]
    pub client_id_header: String,

    /// Header carrying an optional request cost
    #[serde(default = "default_cost_header")]
    pub cost_header: String,

    /// Policy for requests without a client identifier
    #[serde(default)]
    pub missing_client_id: MissingClientIdPolicy,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            client_id_header: default_client_id_header(),
            cost_header: default_cost_header(),
            missing_client_id: MissingClientIdPolicy::default(),
        }
    }
}

fn default_client_id_header() -> String {
    "x-client-id".to_string()
}

fn default_cost_header() -> String {
    "x-ratelimit-cost".to_string()
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level filter, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl PinglimitConfig {
    /// Load configuration from an optional file and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Load configuration from a file path, ignoring the environment.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_with_env(Some(path.as_ref()), Some(config::Map::new()))
    }

    /// Load configuration, reading environment variables from `env` instead of
    /// the process environment when given.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(PinglimitError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .source(env),
        );

        let config: PinglimitConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| PinglimitError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        self.rate_limiting.limits()?;

        if self.rate_limiting.eviction_grace_period_secs == 0 {
            return Err(PinglimitError::Config(
                "eviction_grace_period_secs must be greater than zero".to_string(),
            ));
        }
        if self.rate_limiting.eviction_interval_secs == 0 {
            return Err(PinglimitError::Config(
                "eviction_interval_secs must be greater than zero".to_string(),
            ));
        }

        for (name, value) in [
            ("client_id_header", &self.http.client_id_header),
            ("cost_header", &self.http.cost_header),
        ] {
            axum::http::HeaderName::try_from(value.as_str()).map_err(|e| {
                PinglimitError::Config(format!("invalid {} {:?}: {}", name, value, e))
            })?;
        }

        Ok(())
    }
}
