//! Server configuration
//!
//! Values come from `CHAT_RELAY_*` environment variables with defaults.
//! The binary lets its first CLI argument override the bind address.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Channel buffer size for server commands
pub const DEFAULT_COMMAND_BUFFER: usize = 256;

/// Shared-room history bound
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Idle window after which a typing indicator is stale
pub const DEFAULT_TYPING_TIMEOUT: Duration = Duration::from_secs(3);

/// How often the actor sweeps expired typing indicators
pub const DEFAULT_TYPING_SWEEP: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    pub command_buffer: usize,
    pub room_history_limit: usize,
    pub typing_timeout: Duration,
    pub typing_sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            command_buffer: DEFAULT_COMMAND_BUFFER,
            room_history_limit: DEFAULT_HISTORY_LIMIT,
            typing_timeout: DEFAULT_TYPING_TIMEOUT,
            typing_sweep_interval: DEFAULT_TYPING_SWEEP,
        }
    }
}

impl ServerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Ok(Self {
            addr: lookup("CHAT_RELAY_ADDR").unwrap_or(defaults.addr),
            command_buffer: parse_or(&lookup, "CHAT_RELAY_COMMAND_BUFFER", defaults.command_buffer)?,
            room_history_limit: parse_or(
                &lookup,
                "CHAT_RELAY_HISTORY_LIMIT",
                defaults.room_history_limit,
            )?,
            typing_timeout: parse_or(&lookup, "CHAT_RELAY_TYPING_TIMEOUT_MS", None)?
                .map(Duration::from_millis)
                .unwrap_or(defaults.typing_timeout),
            typing_sweep_interval: parse_or(&lookup, "CHAT_RELAY_TYPING_SWEEP_MS", None)?
                .map(Duration::from_millis)
                .unwrap_or(defaults.typing_sweep_interval),
        })
    }

    /// Override the bind address
    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: ParseValue,
{
    match lookup(key) {
        Some(value) => T::parse_value(&value).ok_or(ConfigError::InvalidValue { key, value }),
        None => Ok(default),
    }
}

/// Values readable from a single environment variable
trait ParseValue: Sized {
    fn parse_value(raw: &str) -> Option<Self>;
}

impl ParseValue for usize {
    fn parse_value(raw: &str) -> Option<Self> {
        usize::from_str(raw.trim()).ok().filter(|v| *v > 0)
    }
}

impl ParseValue for Option<u64> {
    fn parse_value(raw: &str) -> Option<Self> {
        u64::from_str(raw.trim()).ok().filter(|v| *v > 0).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.addr, DEFAULT_ADDR);
        assert_eq!(config.room_history_limit, 50);
        assert_eq!(config.typing_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("CHAT_RELAY_ADDR", "0.0.0.0:9000"),
            ("CHAT_RELAY_HISTORY_LIMIT", "20"),
            ("CHAT_RELAY_TYPING_TIMEOUT_MS", "1500"),
        ]))
        .unwrap();

        assert_eq!(config.addr, "0.0.0.0:9000");
        assert_eq!(config.room_history_limit, 20);
        assert_eq!(config.typing_timeout, Duration::from_millis(1500));
        assert_eq!(config.typing_sweep_interval, DEFAULT_TYPING_SWEEP);
    }

    #[test]
    fn test_invalid_value() {
        let err = ServerConfig::from_lookup(lookup_from(&[("CHAT_RELAY_COMMAND_BUFFER", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("CHAT_RELAY_COMMAND_BUFFER"));

        assert!(ServerConfig::from_lookup(lookup_from(&[("CHAT_RELAY_HISTORY_LIMIT", "0")])).is_err());
    }
}
