// Relay server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. Unparseable values fall back to the default rather than
// failing startup.

use std::{net::SocketAddr, time::Duration};

use crate::hub::{HubConfig, DEFAULT_STANDBY_ACTIONS};

pub const DEFAULT_PORT: u16 = 8080;
pub const HEARTBEAT_INTERVAL_MS: u64 = 15_000;
pub const HEARTBEAT_TIMEOUT_MS: u64 = 10_000;
pub const MAX_FRAME_BYTES: usize = 262_144;

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// Log filter directive (e.g. `info`, `cuelink_relay=debug`).
    pub log_filter: String,
    /// Drop a session as soon as its last device disconnects.
    pub remove_empty_sessions: bool,
    /// Actions a standby player is allowed to broadcast.
    pub standby_allowed_actions: Vec<String>,
    pub heartbeat_interval: Duration,
    /// How long a ping may go unanswered before the socket is dropped.
    pub heartbeat_timeout: Duration,
    pub max_frame_bytes: usize,
}

/// Per-socket limits handed to the WebSocket layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketLimits {
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub max_frame_bytes: usize,
}

impl Default for SocketLimits {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(HEARTBEAT_INTERVAL_MS),
            heartbeat_timeout: Duration::from_millis(HEARTBEAT_TIMEOUT_MS),
            max_frame_bytes: MAX_FRAME_BYTES,
        }
    }
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `CUELINK_RELAY_HOST` | `0.0.0.0` |
    /// | `CUELINK_RELAY_PORT` | `PORT`, then `8080` |
    /// | `CUELINK_RELAY_LOG_FILTER` | `info` |
    /// | `CUELINK_RELAY_REMOVE_EMPTY_SESSIONS` | `true` |
    /// | `CUELINK_RELAY_STANDBY_ACTIONS` | `request-state` |
    /// | `CUELINK_RELAY_HEARTBEAT_INTERVAL_MS` | `15000` |
    /// | `CUELINK_RELAY_HEARTBEAT_TIMEOUT_MS` | `10000` |
    /// | `CUELINK_RELAY_MAX_FRAME_BYTES` | `262144` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("CUELINK_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("CUELINK_RELAY_PORT")
            .or_else(|_| env("PORT"))
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let log_filter = env("CUELINK_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());

        let remove_empty_sessions = env("CUELINK_RELAY_REMOVE_EMPTY_SESSIONS")
            .ok()
            .and_then(|v| parse_bool(&v))
            .unwrap_or(true);

        let standby_allowed_actions: Vec<String> = env("CUELINK_RELAY_STANDBY_ACTIONS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|action| !action.is_empty())
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or_else(|_| DEFAULT_STANDBY_ACTIONS.iter().map(|a| a.to_string()).collect());

        let heartbeat_interval = Duration::from_millis(
            positive_u64(&env, "CUELINK_RELAY_HEARTBEAT_INTERVAL_MS")
                .unwrap_or(HEARTBEAT_INTERVAL_MS),
        );
        let heartbeat_timeout = Duration::from_millis(
            positive_u64(&env, "CUELINK_RELAY_HEARTBEAT_TIMEOUT_MS")
                .unwrap_or(HEARTBEAT_TIMEOUT_MS),
        );
        let max_frame_bytes = positive_u64(&env, "CUELINK_RELAY_MAX_FRAME_BYTES")
            .and_then(|v| usize::try_from(v).ok())
            .unwrap_or(MAX_FRAME_BYTES);

        Self {
            listen_addr,
            log_filter,
            remove_empty_sessions,
            standby_allowed_actions,
            heartbeat_interval,
            heartbeat_timeout,
            max_frame_bytes,
        }
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            remove_empty_sessions: self.remove_empty_sessions,
            standby_allowed_actions: self.standby_allowed_actions.clone(),
        }
    }

    pub fn socket_limits(&self) -> SocketLimits {
        SocketLimits {
            heartbeat_interval: self.heartbeat_interval,
            heartbeat_timeout: self.heartbeat_timeout,
            max_frame_bytes: self.max_frame_bytes,
        }
    }
}

fn positive_u64<F>(env: &F, key: &str) -> Option<u64>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    env(key).ok().and_then(|v| v.trim().parse::<u64>().ok()).filter(|v| *v > 0)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from_map(
        map: HashMap<&'static str, &'static str>,
    ) -> impl Fn(&str) -> Result<String, std::env::VarError> {
        move |key: &str| map.get(key).map(|v| v.to_string()).ok_or(std::env::VarError::NotPresent)
    }

    #[test]
    fn defaults_when_no_env_vars() {
        let cfg = RelayConfig::from_env_fn(env_from_map(HashMap::new()));
        assert_eq!(cfg.listen_addr.port(), 8080);
        assert_eq!(cfg.listen_addr.ip().to_string(), "0.0.0.0");
        assert_eq!(cfg.log_filter, "info");
        assert!(cfg.remove_empty_sessions);
        assert_eq!(cfg.standby_allowed_actions, vec!["request-state".to_string()]);
        assert_eq!(cfg.socket_limits(), SocketLimits::default());
    }

    #[test]
    fn custom_host_and_port() {
        let mut m = HashMap::new();
        m.insert("CUELINK_RELAY_HOST", "127.0.0.1");
        m.insert("CUELINK_RELAY_PORT", "3000");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:3000");
    }

    #[test]
    fn plain_port_variable_is_honoured() {
        let mut m = HashMap::new();
        m.insert("PORT", "5050");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.port(), 5050);
    }

    #[test]
    fn relay_port_wins_over_plain_port() {
        let mut m = HashMap::new();
        m.insert("PORT", "5050");
        m.insert("CUELINK_RELAY_PORT", "9090");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.port(), 9090);
    }

    #[test]
    fn invalid_port_uses_default() {
        let mut m = HashMap::new();
        m.insert("CUELINK_RELAY_PORT", "not_a_number");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.port(), 8080);
    }

    #[test]
    fn log_filter_override() {
        let mut m = HashMap::new();
        m.insert("CUELINK_RELAY_LOG_FILTER", "debug,cuelink_relay=trace");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.log_filter, "debug,cuelink_relay=trace");
    }

    #[test]
    fn empty_session_removal_can_be_disabled() {
        let mut m = HashMap::new();
        m.insert("CUELINK_RELAY_REMOVE_EMPTY_SESSIONS", "false");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert!(!cfg.remove_empty_sessions);
        assert!(!cfg.hub_config().remove_empty_sessions);
    }

    #[test]
    fn unrecognised_bool_uses_default() {
        let mut m = HashMap::new();
        m.insert("CUELINK_RELAY_REMOVE_EMPTY_SESSIONS", "sometimes");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert!(cfg.remove_empty_sessions);
    }

    #[test]
    fn standby_actions_are_split_and_trimmed() {
        let mut m = HashMap::new();
        m.insert("CUELINK_RELAY_STANDBY_ACTIONS", "request-state, ping-clock ,,");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(
            cfg.hub_config().standby_allowed_actions,
            vec!["request-state".to_string(), "ping-clock".to_string()]
        );
    }

    #[test]
    fn socket_limits_override() {
        let mut m = HashMap::new();
        m.insert("CUELINK_RELAY_HEARTBEAT_INTERVAL_MS", "500");
        m.insert("CUELINK_RELAY_HEARTBEAT_TIMEOUT_MS", "250");
        m.insert("CUELINK_RELAY_MAX_FRAME_BYTES", "1024");
        let limits = RelayConfig::from_env_fn(env_from_map(m)).socket_limits();
        assert_eq!(limits.heartbeat_interval, Duration::from_millis(500));
        assert_eq!(limits.heartbeat_timeout, Duration::from_millis(250));
        assert_eq!(limits.max_frame_bytes, 1024);
    }

    #[test]
    fn zero_or_garbage_limits_use_defaults() {
        let mut m = HashMap::new();
        m.insert("CUELINK_RELAY_HEARTBEAT_INTERVAL_MS", "0");
        m.insert("CUELINK_RELAY_MAX_FRAME_BYTES", "lots");
        let limits = RelayConfig::from_env_fn(env_from_map(m)).socket_limits();
        assert_eq!(limits, SocketLimits::default());
    }
}
