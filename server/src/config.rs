//! Configuration management for the server binary.

use std::env;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Append-only-file path; in-memory only when unset
    pub aof_path: Option<String>,
    /// Peer endpoint URLs to reconcile against
    pub peers: Vec<String>,
    /// Anti-entropy poll period
    pub poll_rate: Duration,
    /// Whether pollers push the local store to peers
    pub poll_push: bool,
    /// Whether pollers pull peer stores into the router
    pub poll_pull: bool,
    /// Config type names accepted with arbitrary JSON payloads
    pub payload_types: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let aof_path = env::var("BEACON_AOF").ok();

        let peers = split_list(env::var("BEACON_PEERS").ok());

        let poll_rate = match env::var("BEACON_POLL_SECS") {
            Ok(secs) => Duration::from_secs(
                secs.parse().map_err(|_| ConfigError::InvalidPollRate)?,
            ),
            Err(_) => crate::poller::DEFAULT_POLL_RATE,
        };

        let (poll_push, poll_pull) = match env::var("BEACON_POLL_MODE").as_deref() {
            Ok("push") => (true, false),
            Ok("pull") | Err(_) => (false, true),
            Ok("both") => (true, true),
            Ok(other) => return Err(ConfigError::InvalidPollMode(other.to_string())),
        };

        let payload_types = split_list(env::var("BEACON_TYPES").ok());

        Ok(Self {
            host,
            port,
            aof_path,
            peers,
            poll_rate,
            poll_push,
            poll_pull,
            payload_types,
        })
    }
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid BEACON_POLL_SECS value")]
    InvalidPollRate,

    #[error("Invalid BEACON_POLL_MODE value: {0} (expected push, pull or both)")]
    InvalidPollMode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_list_trims_and_drops_empties() {
        assert_eq!(
            split_list(Some("http://a, http://b,,".to_string())),
            vec!["http://a".to_string(), "http://b".to_string()]
        );
        assert!(split_list(None).is_empty());
    }
}
