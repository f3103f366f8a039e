//! Client configuration.
//!
//! Loaded once at startup from JSON and/or `FPSNET_*` environment variables.
//! Changing any value requires a fresh connect cycle.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Identifies a player on the server.
pub type PlayerId = u32;

/// Network client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server host name or IP.
    #[serde(default = "default_server_host")]
    pub server_host: String,
    /// Server TCP port.
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    /// Seconds between heartbeats while connected.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_interval_secs: f32,
    /// Silence longer than `heartbeat_interval_secs * heartbeat_grace` drops
    /// the connection. Zero disables the check.
    #[serde(default = "default_heartbeat_grace")]
    pub heartbeat_grace: u32,
    /// Local player identifier.
    #[serde(default = "default_player_id")]
    pub player_id: PlayerId,
    /// Seconds to wait for a join reply before reporting failure.
    #[serde(default = "default_join_timeout_secs")]
    pub join_timeout_secs: f32,
    /// Seconds allowed for the TCP connect.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: f32,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8888
}

fn default_heartbeat_secs() -> f32 {
    5.0
}

fn default_heartbeat_grace() -> u32 {
    3
}

fn default_player_id() -> PlayerId {
    1
}

fn default_join_timeout_secs() -> f32 {
    10.0
}

fn default_connect_timeout_secs() -> f32 {
    5.0
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_host: default_server_host(),
            server_port: default_server_port(),
            heartbeat_interval_secs: default_heartbeat_secs(),
            heartbeat_grace: default_heartbeat_grace(),
            player_id: default_player_id(),
            join_timeout_secs: default_join_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}")]
    Invalid { var: &'static str, value: String },

    #[error("{0} must be positive")]
    NotPositive(&'static str),

    #[error("malformed config json: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientConfig {
    /// Parses config from JSON. Missing fields take their defaults.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overridden by `FPSNET_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        cfg.apply_overrides(|var| std::env::var(var).ok())?;
        Ok(cfg)
    }

    /// Applies overrides from `lookup`, keyed by environment variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("FPSNET_SERVER_HOST") {
            debug!(var = "FPSNET_SERVER_HOST", value = %host, "Config override");
            self.server_host = host;
        }
        if let Some(v) = lookup("FPSNET_SERVER_PORT") {
            self.server_port = parse_var("FPSNET_SERVER_PORT", v)?;
        }
        if let Some(v) = lookup("FPSNET_PLAYER_ID") {
            self.player_id = parse_var("FPSNET_PLAYER_ID", v)?;
        }
        if let Some(v) = lookup("FPSNET_HEARTBEAT_SECS") {
            self.heartbeat_interval_secs = parse_var("FPSNET_HEARTBEAT_SECS", v)?;
        }
        if let Some(v) = lookup("FPSNET_HEARTBEAT_GRACE") {
            self.heartbeat_grace = parse_var("FPSNET_HEARTBEAT_GRACE", v)?;
        }
        if let Some(v) = lookup("FPSNET_JOIN_TIMEOUT_SECS") {
            self.join_timeout_secs = parse_var("FPSNET_JOIN_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("FPSNET_CONNECT_TIMEOUT_SECS") {
            self.connect_timeout_secs = parse_var("FPSNET_CONNECT_TIMEOUT_SECS", v)?;
        }
        self.validate()
    }

    /// Rejects durations that would make the timers spin or never fire.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, secs) in [
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
            ("join_timeout_secs", self.join_timeout_secs),
            ("connect_timeout_secs", self.connect_timeout_secs),
        ] {
            if secs_to_duration(secs).is_none() {
                return Err(ConfigError::NotPositive(name));
            }
        }
        Ok(())
    }

    /// `host:port` string suitable for `TcpStream::connect`.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        secs_to_duration(self.heartbeat_interval_secs)
            .unwrap_or_else(|| Duration::from_secs_f32(default_heartbeat_secs()))
    }

    pub fn join_timeout(&self) -> Duration {
        secs_to_duration(self.join_timeout_secs)
            .unwrap_or_else(|| Duration::from_secs_f32(default_join_timeout_secs()))
    }

    pub fn connect_timeout(&self) -> Duration {
        secs_to_duration(self.connect_timeout_secs)
            .unwrap_or_else(|| Duration::from_secs_f32(default_connect_timeout_secs()))
    }
}

/// Positive, finite second counts only.
fn secs_to_duration(secs: f32) -> Option<Duration> {
    Duration::try_from_secs_f32(secs)
        .ok()
        .filter(|d| !d.is_zero())
}

fn parse_var<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    let parsed = value.trim().parse();
    match parsed {
        Ok(parsed) => {
            debug!(var, value = %value.trim(), "Config override");
            Ok(parsed)
        }
        Err(_) => Err(ConfigError::Invalid { var, value }),
    }
}
