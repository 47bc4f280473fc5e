use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Listener addresses.
#[derive(Debug, Deserialize, Clone)]
pub struct ListenConfig {
    /// Bind address for judge connections. Default: "127.0.0.1:9999".
    #[serde(default = "default_judge_address")]
    pub judge_address: String,
    /// Bind address for the administrative control plane. Default: "127.0.0.1:9995".
    #[serde(default = "default_admin_address")]
    pub admin_address: String,
}

fn default_judge_address() -> String {
    "127.0.0.1:9999".into()
}
fn default_admin_address() -> String {
    "127.0.0.1:9995".into()
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            judge_address: default_judge_address(),
            admin_address: default_admin_address(),
        }
    }
}

/// Protocol timing and framing limits.
#[derive(Debug, Deserialize, Clone)]
pub struct ProtocolConfig {
    /// Seconds to wait for `submission-acknowledged` before declaring the
    /// judge dead. Default: 20.
    #[serde(default = "default_ack_timeout_secs")]
    pub ack_timeout_secs: u64,
    /// Seconds between liveness probes. Default: 10.
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// Largest accepted frame body, in bytes. Default: 16 MiB.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: u32,
}

fn default_ack_timeout_secs() -> u64 {
    20
}
fn default_ping_interval_secs() -> u64 {
    10
}
fn default_max_frame_bytes() -> u32 {
    common::codec::DEFAULT_MAX_FRAME_BYTES
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            ack_timeout_secs: default_ack_timeout_secs(),
            ping_interval_secs: default_ping_interval_secs(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl ProtocolConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

/// Rate limit for `test-case` live-update broadcasts.
#[derive(Debug, Deserialize, Clone)]
pub struct UpdateLimitConfig {
    /// Broadcasts allowed per submission per window. Default: 10.
    #[serde(default = "default_max_updates")]
    pub max_updates: u32,
    /// Window length in milliseconds. Default: 1000.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

fn default_max_updates() -> u32 {
    10
}
fn default_window_ms() -> u64 {
    1000
}

impl Default for UpdateLimitConfig {
    fn default() -> Self {
        Self {
            max_updates: default_max_updates(),
            window_ms: default_window_ms(),
        }
    }
}

impl UpdateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Bridge application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct BridgeAppConfig {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub updates: UpdateLimitConfig,
    /// Per-judge shared secrets, judge name -> key.
    #[serde(default)]
    pub judges: HashMap<String, String>,
}

impl BridgeAppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("BRIDGE_CONFIG").unwrap_or_else(|_| "config/config".to_string());

        let s = Config::builder()
            .set_default("listen.judge_address", default_judge_address())?
            .set_default("listen.admin_address", default_admin_address())?
            .set_default("protocol.ack_timeout_secs", default_ack_timeout_secs() as i64)?
            .set_default(
                "protocol.ping_interval_secs",
                default_ping_interval_secs() as i64,
            )?
            .set_default("protocol.max_frame_bytes", default_max_frame_bytes() as i64)?
            .set_default("updates.max_updates", default_max_updates() as i64)?
            .set_default("updates.window_ms", default_window_ms() as i64)?
            .add_source(File::with_name(&config_path).required(false))
            .add_source(Environment::with_prefix("BRIDGE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
