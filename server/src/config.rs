//! Server configuration module.
//!
//! Parses configuration from environment variables once at startup. The
//! resulting [`Config`] is immutable for the lifetime of the process.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `PORT` | No | 4000 | HTTP server port |
//! | `GREENLIGHT_ENV` | No | development | `development`, `staging` or `production` |
//! | `GREENLIGHT_LIMITER_RPS` | No | 2 | Rate limiter refill rate (requests per second) |
//! | `GREENLIGHT_LIMITER_BURST` | No | 4 | Rate limiter burst size |
//! | `GREENLIGHT_LIMITER_ENABLED` | No | true | Enable the rate limiter |
//! | `GREENLIGHT_LIMITER_SWEEP_INTERVAL_SECS` | No | 60 | Seconds between idle client sweeps |
//! | `GREENLIGHT_LIMITER_IDLE_SECS` | No | 180 | Idle seconds before a client is evicted |
//! | `GREENLIGHT_CORS_TRUSTED_ORIGINS` | No | - | Space or comma separated trusted origins |

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::rate_limit::{
    DEFAULT_BURST, DEFAULT_IDLE_THRESHOLD, DEFAULT_RPS, DEFAULT_SWEEP_INTERVAL,
    MAX_IDLE_THRESHOLD, MAX_SWEEP_INTERVAL,
};

/// Default HTTP server port.
const DEFAULT_PORT: u16 = 4000;

/// Errors that can occur when parsing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable has invalid format.
    #[error("invalid format for {var}: {message}")]
    InvalidFormat { var: String, message: String },

    /// Port number is invalid.
    #[error("invalid port number: {0}")]
    InvalidPort(#[from] std::num::ParseIntError),

    /// Configuration validation failed.
    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

/// Deployment environment the server runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" => Ok(Self::Development),
            "staging" => Ok(Self::Staging),
            "production" => Ok(Self::Production),
            other => Err(ConfigError::InvalidFormat {
                var: "GREENLIGHT_ENV".to_string(),
                message: format!(
                    "expected development|staging|production, got '{other}'"
                ),
            }),
        }
    }
}

/// Rate limiter settings, shared read-only by every request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimiterConfig {
    /// Tokens added to each client bucket per second.
    pub rps: f64,

    /// Capacity of each client bucket.
    pub burst: u32,

    /// When false, the admission gate forwards every request.
    pub enabled: bool,

    /// Period of the idle client sweep.
    pub sweep_interval: Duration,

    /// Idle time after which a client is evicted.
    pub idle_threshold: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            rps: DEFAULT_RPS,
            burst: DEFAULT_BURST,
            enabled: true,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
        }
    }
}

/// Server configuration parsed from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port.
    pub port: u16,

    /// Deployment environment, reported by the healthcheck.
    pub env: Environment,

    /// Per-client rate limiter settings.
    pub limiter: LimiterConfig,

    /// Origins allowed to make cross-origin requests.
    pub trusted_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            env: Environment::default(),
            limiter: LimiterConfig::default(),
            trusted_origins: Vec::new(),
        }
    }
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - A variable has an invalid format
    /// - Port number is not a valid u16
    /// - Limiter values are out of range
    ///
    /// # Example
    ///
    /// ```no_run
    /// use greenlight_server::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Server will listen on port {}", config.port);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = parse_port()?;
        let env = match env::var("GREENLIGHT_ENV") {
            Ok(value) => value.parse()?,
            Err(_) => Environment::default(),
        };

        let limiter = LimiterConfig {
            rps: parse_env_or("GREENLIGHT_LIMITER_RPS", DEFAULT_RPS)?,
            burst: parse_env_or("GREENLIGHT_LIMITER_BURST", DEFAULT_BURST)?,
            enabled: parse_bool_env_or("GREENLIGHT_LIMITER_ENABLED", true)?,
            sweep_interval: Duration::from_secs(parse_env_or(
                "GREENLIGHT_LIMITER_SWEEP_INTERVAL_SECS",
                DEFAULT_SWEEP_INTERVAL.as_secs(),
            )?),
            idle_threshold: Duration::from_secs(parse_env_or(
                "GREENLIGHT_LIMITER_IDLE_SECS",
                DEFAULT_IDLE_THRESHOLD.as_secs(),
            )?),
        };

        let trusted_origins = parse_trusted_origins();

        let config = Self {
            port,
            env,
            limiter,
            trusted_origins,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.limiter.rps.is_finite() && self.limiter.rps > 0.0) {
            return Err(ConfigError::ValidationError(
                "GREENLIGHT_LIMITER_RPS must be a positive number".to_string(),
            ));
        }

        if self.limiter.burst == 0 {
            return Err(ConfigError::ValidationError(
                "GREENLIGHT_LIMITER_BURST must be at least 1".to_string(),
            ));
        }

        if self.limiter.sweep_interval.is_zero() || self.limiter.idle_threshold.is_zero() {
            return Err(ConfigError::ValidationError(
                "limiter sweep interval and idle threshold must be at least 1 second".to_string(),
            ));
        }

        if self.limiter.sweep_interval > MAX_SWEEP_INTERVAL {
            return Err(ConfigError::ValidationError(format!(
                "GREENLIGHT_LIMITER_SWEEP_INTERVAL_SECS must be at most {}",
                MAX_SWEEP_INTERVAL.as_secs()
            )));
        }

        if self.limiter.idle_threshold > MAX_IDLE_THRESHOLD {
            return Err(ConfigError::ValidationError(format!(
                "GREENLIGHT_LIMITER_IDLE_SECS must be at most {}",
                MAX_IDLE_THRESHOLD.as_secs()
            )));
        }

        if self.trusted_origins.iter().any(|origin| origin == "*") {
            return Err(ConfigError::ValidationError(
                "GREENLIGHT_CORS_TRUSTED_ORIGINS must list explicit origins, not '*'".to_string(),
            ));
        }

        Ok(())
    }
}

/// Parse a boolean environment variable, falling back to `default` when unset.
///
/// Accepts `true`/`false`/`1`/`0` (case-insensitive).
fn parse_bool_env_or(name: &str, default: bool) -> Result<bool, ConfigError> {
    let Ok(value) = env::var(name) else {
        return Ok(default);
    };

    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(ConfigError::InvalidFormat {
            var: name.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}

/// Parse an environment variable with `FromStr`, falling back to `default`
/// when unset.
fn parse_env_or<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|err: T::Err| ConfigError::InvalidFormat {
                var: name.to_string(),
                message: err.to_string(),
            }),
        Err(_) => Ok(default),
    }
}

/// Parse the PORT environment variable.
///
/// Returns the default port if not set.
fn parse_port() -> Result<u16, ConfigError> {
    match env::var("PORT") {
        Ok(port_str) => Ok(port_str.parse()?),
        Err(env::VarError::NotPresent) => Ok(DEFAULT_PORT),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidFormat {
            var: "PORT".to_string(),
            message: "contains invalid unicode".to_string(),
        }),
    }
}

/// Parse the GREENLIGHT_CORS_TRUSTED_ORIGINS environment variable.
///
/// Origins may be separated by spaces or commas.
fn parse_trusted_origins() -> Vec<String> {
    env::var("GREENLIGHT_CORS_TRUSTED_ORIGINS")
        .map(|value| {
            value
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
