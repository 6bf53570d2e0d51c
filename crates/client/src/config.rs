use std::time::Duration;

use crate::backoff::BackoffConfig;
use crate::error::ConfigError;

/// Default progress endpoint of the job processor.
pub const DEFAULT_WS_URL: &str = "ws://localhost:9981";

/// Client configuration.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// WebSocket endpoint (default: `ws://localhost:9981`).
    pub url: String,
    /// Reconnect backoff (default: 1s doubling up to 30s).
    pub backoff: BackoffConfig,
    /// Maximum number of buffered outbound messages; `None` is unbounded.
    pub buffer_capacity: Option<usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            backoff: BackoffConfig::default(),
            buffer_capacity: None,
        }
    }
}

impl ClientConfig {
    /// Defaults with a different endpoint.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default               |
    /// |----------------------------------|-----------------------|
    /// | `TASKPULSE_WS_URL`               | `ws://localhost:9981` |
    /// | `TASKPULSE_RECONNECT_INITIAL_MS` | `1000`                |
    /// | `TASKPULSE_RECONNECT_MAX_MS`     | `30000`               |
    /// | `TASKPULSE_RECONNECT_MULTIPLIER` | `2.0`                 |
    /// | `TASKPULSE_BUFFER_CAPACITY`      | unbounded             |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let url = lookup("TASKPULSE_WS_URL")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.url);
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            return Err(ConfigError::Invalid {
                var: "TASKPULSE_WS_URL",
                expected: "a ws:// or wss:// URL",
                value: url,
            });
        }

        let initial_ms: u64 = parse_var(
            &lookup,
            "TASKPULSE_RECONNECT_INITIAL_MS",
            "a positive integer",
            defaults.backoff.initial_delay.as_millis() as u64,
        )?;
        let max_ms: u64 = parse_var(
            &lookup,
            "TASKPULSE_RECONNECT_MAX_MS",
            "a positive integer",
            defaults.backoff.max_delay.as_millis() as u64,
        )?;
        let multiplier: f64 = parse_var(
            &lookup,
            "TASKPULSE_RECONNECT_MULTIPLIER",
            "a number >= 1.0",
            defaults.backoff.multiplier,
        )?;
        let buffer_capacity: Option<usize> = match lookup("TASKPULSE_BUFFER_CAPACITY") {
            Some(raw) => Some(raw.trim().parse().map_err(|_| ConfigError::Invalid {
                var: "TASKPULSE_BUFFER_CAPACITY",
                expected: "a non-negative integer",
                value: raw,
            })?),
            None => None,
        };

        if initial_ms == 0 || max_ms == 0 {
            return Err(ConfigError::Inconsistent(
                "reconnect delays must be greater than zero".into(),
            ));
        }
        if initial_ms > max_ms {
            return Err(ConfigError::Inconsistent(format!(
                "initial reconnect delay ({initial_ms}ms) exceeds the maximum ({max_ms}ms)"
            )));
        }
        if !(multiplier.is_finite() && multiplier >= 1.0) {
            return Err(ConfigError::Invalid {
                var: "TASKPULSE_RECONNECT_MULTIPLIER",
                expected: "a number >= 1.0",
                value: multiplier.to_string(),
            });
        }

        Ok(Self {
            url,
            backoff: BackoffConfig {
                initial_delay: Duration::from_millis(initial_ms),
                max_delay: Duration::from_millis(max_ms),
                multiplier,
            },
            buffer_capacity: buffer_capacity.filter(|&c| c > 0),
        })
    }
}

fn parse_var<T, F>(
    lookup: &F,
    var: &'static str,
    expected: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            var,
            expected,
            value: raw,
        }),
        None => Ok(default),
    }
}
