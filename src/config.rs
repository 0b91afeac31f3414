//! Relay configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`).
//!
//! | Key                       | Default   |
//! |---------------------------|-----------|
//! | `HOST`                    | `0.0.0.0` |
//! | `PORT`                    | `8080`    |
//! | `HEARTBEAT_INTERVAL_SECS` | `30`      |

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::RelayError;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default seconds between liveness sweeps.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Top-level relay configuration.
///
/// Loaded once at startup via [`RelayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Socket address the WebSocket listener binds to.
    pub listen_addr: SocketAddr,

    /// Interval between liveness sweeps. A peer that misses one full
    /// interval is evicted on the next sweep.
    pub heartbeat_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
        }
    }
}

impl RelayConfig {
    /// Loads configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if `HOST` or `PORT` is set but cannot
    /// be parsed.
    pub fn from_env() -> Result<Self, RelayError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if `HOST` or `PORT` is present but
    /// invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RelayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host: IpAddr = match lookup("HOST") {
            Some(raw) => raw
                .parse()
                .map_err(|_| RelayError::Config(format!("HOST={raw} is not an IP address")))?,
            None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };

        let port: u16 = match lookup("PORT") {
            Some(raw) => raw
                .parse()
                .map_err(|_| RelayError::Config(format!("PORT={raw} is not a valid port")))?,
            None => DEFAULT_PORT,
        };

        let heartbeat_secs = lookup("HEARTBEAT_INTERVAL_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_SECS);

        Ok(Self {
            listen_addr: SocketAddr::new(host, port),
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
        })
    }
}
