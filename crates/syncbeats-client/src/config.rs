use std::time::Duration;

use serde::Deserialize;

/// Top-level client configuration, loaded from `syncbeats.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_url: String,
    /// Deadline for every acknowledged request (create, join, play, ...).
    pub request_timeout_ms: u64,
    /// Deadline for a single connect attempt.
    pub connect_timeout_ms: u64,
    pub event_channel_capacity: usize,
    pub reconnect: ReconnectConfig,
    pub heartbeat: HeartbeatConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:3001/ws".to_string(),
            request_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            event_channel_capacity: 256,
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

/// Bounded reconnection with growing backoff.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Fraction of each delay to jitter by, in `[0, 1)`.
    pub randomization_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 5_000,
            randomization_factor: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { interval_ms: 30_000 }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Check the configuration, returning a description of the first problem.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.server_url.starts_with("ws://") || self.server_url.starts_with("wss://")) {
            return Err(format!(
                "server_url must be a ws:// or wss:// URL (got {:?})",
                self.server_url
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err("request_timeout_ms must be > 0".to_string());
        }
        if self.connect_timeout_ms == 0 {
            return Err("connect_timeout_ms must be > 0".to_string());
        }
        if self.event_channel_capacity == 0 {
            return Err("event_channel_capacity must be > 0".to_string());
        }
        if self.reconnect.initial_delay_ms == 0 {
            return Err("reconnect.initial_delay_ms must be > 0".to_string());
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            return Err("reconnect.max_delay_ms must be >= reconnect.initial_delay_ms".to_string());
        }
        if !(0.0..1.0).contains(&self.reconnect.randomization_factor) {
            return Err("reconnect.randomization_factor must be in [0, 1)".to_string());
        }
        if self.heartbeat.interval_ms == 0 {
            return Err("heartbeat.interval_ms must be > 0".to_string());
        }
        if self.reconnect.max_attempts == 0 {
            tracing::warn!("reconnect.max_attempts is 0, dropped connections will not be retried");
        }
        Ok(())
    }

    /// Load config from `syncbeats.toml` if it exists, then apply env var overrides.
    pub fn load() -> Self {
        let mut config = Self::load_file("syncbeats.toml");
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    fn load_file(path: &str) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<ClientConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!(path, "Loaded configuration");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("Failed to parse {path}: {e}, using defaults");
                    ClientConfig::default()
                },
            },
            Err(_) => {
                tracing::info!("No {path} found, using defaults");
                ClientConfig::default()
            },
        }
    }

    /// Apply `SYNCBEATS_*` overrides read through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("SYNCBEATS_SERVER_URL")
            && !url.is_empty()
        {
            self.server_url = url;
        }
        if let Some(val) = var("SYNCBEATS_REQUEST_TIMEOUT_MS")
            && let Ok(n) = val.parse::<u64>()
        {
            self.request_timeout_ms = n;
        }
        if let Some(val) = var("SYNCBEATS_CONNECT_TIMEOUT_MS")
            && let Ok(n) = val.parse::<u64>()
        {
            self.connect_timeout_ms = n;
        }
        if let Some(val) = var("SYNCBEATS_RECONNECT_ATTEMPTS")
            && let Ok(n) = val.parse::<u32>()
        {
            self.reconnect.max_attempts = n;
        }
        if let Some(val) = var("SYNCBEATS_HEARTBEAT_INTERVAL_MS")
            && let Ok(n) = val.parse::<u64>()
        {
            self.heartbeat.interval_ms = n;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.request_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.connect_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.reconnect.max_attempts, 5);
        assert_eq!(cfg.reconnect.initial_delay_ms, 1_000);
        assert_eq!(cfg.reconnect.max_delay_ms, 5_000);
        assert_eq!(cfg.heartbeat.interval_ms, 30_000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parse_full_toml() {
        let toml_str = r#"
server_url = "wss://beats.example.com/ws"
request_timeout_ms = 5000
event_channel_capacity = 64

[reconnect]
max_attempts = 3
initial_delay_ms = 500
max_delay_ms = 2000
randomization_factor = 0.25

[heartbeat]
interval_ms = 15000
"#;
        let cfg: ClientConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.server_url, "wss://beats.example.com/ws");
        assert_eq!(cfg.request_timeout_ms, 5_000);
        assert_eq!(cfg.connect_timeout_ms, 10_000);
        assert_eq!(cfg.event_channel_capacity, 64);
        assert_eq!(cfg.reconnect.max_attempts, 3);
        assert!((cfg.reconnect.randomization_factor - 0.25).abs() < f64::EPSILON);
        assert_eq!(cfg.heartbeat.interval_ms, 15_000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn missing_sections_use_defaults() {
        let cfg: ClientConfig = toml::from_str(r#"server_url = "ws://localhost:9000""#).unwrap();
        assert_eq!(cfg.reconnect.max_attempts, 5);
        assert_eq!(cfg.heartbeat.interval_ms, 30_000);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let bad_url = ClientConfig {
            server_url: "http://localhost".to_string(),
            ..ClientConfig::default()
        };
        assert!(bad_url.validate().unwrap_err().contains("server_url"));

        let zero_timeout = ClientConfig {
            request_timeout_ms: 0,
            ..ClientConfig::default()
        };
        assert!(zero_timeout.validate().is_err());

        let mut inverted = ClientConfig::default();
        inverted.reconnect.max_delay_ms = 100;
        assert!(inverted.validate().unwrap_err().contains("max_delay_ms"));

        let mut jittery = ClientConfig::default();
        jittery.reconnect.randomization_factor = 1.5;
        assert!(jittery.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("SYNCBEATS_SERVER_URL", "ws://10.0.0.2:3001/ws"),
            ("SYNCBEATS_RECONNECT_ATTEMPTS", "8"),
            ("SYNCBEATS_HEARTBEAT_INTERVAL_MS", "not-a-number"),
        ]
        .into_iter()
        .collect();
        let mut cfg = ClientConfig::default();
        cfg.apply_env(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(cfg.server_url, "ws://10.0.0.2:3001/ws");
        assert_eq!(cfg.reconnect.max_attempts, 8);
        // Unparseable values are ignored.
        assert_eq!(cfg.heartbeat.interval_ms, 30_000);
    }
}
