use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::model::{Library, Preferences};
use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub radio: RadioConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub connectivity: ConnectivityConfig,
    #[serde(default)]
    pub preferences: Preferences,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default = "default_auth_file")]
    pub auth_file: PathBuf,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_control_port")]
    pub control_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioConfig {
    #[serde(default)]
    pub library: Library,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Delay before the gateway retries after a dropped connection.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Length of the sleep-timer fade-out.
    #[serde(default = "default_fade_out_secs")]
    pub fade_out_secs: u64,
    #[serde(default = "default_volume")]
    pub volume: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Connectivity flaps inside this window collapse into one reconnect.
    #[serde(default = "default_reconnect_debounce_ms")]
    pub reconnect_debounce_ms: u64,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityConfig {
    /// host:port probed to decide whether the network is usable.
    #[serde(default = "default_probe_host")]
    pub probe_host: String,
    #[serde(default = "default_probe_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,
}

impl EngineConfig {
    pub fn reconnect_debounce(&self) -> Duration {
        Duration::from_millis(self.reconnect_debounce_ms)
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            auth_file: default_auth_file(),
            bind_address: default_bind_address(),
            control_port: default_control_port(),
        }
    }
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            library: Library::default(),
            api_url: default_api_url(),
            retry_delay_secs: default_retry_delay_secs(),
            fade_out_secs: default_fade_out_secs(),
            volume: default_volume(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reconnect_debounce_ms: default_reconnect_debounce_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_host: default_probe_host(),
            interval_secs: default_probe_interval_secs(),
            timeout_ms: default_probe_timeout_ms(),
        }
    }
}

fn default_state_file() -> PathBuf {
    platform::data_dir().join("state.json")
}

fn default_auth_file() -> PathBuf {
    platform::data_dir().join("auth.json")
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_control_port() -> u16 {
    platform::DAEMON_TCP_PORT
}

fn default_api_url() -> String {
    "https://listen.moe/graphql".to_string()
}

fn default_retry_delay_secs() -> u64 {
    10
}

fn default_fade_out_secs() -> u64 {
    15
}

fn default_volume() -> f32 {
    0.5
}

fn default_reconnect_debounce_ms() -> u64 {
    500
}

fn default_event_capacity() -> usize {
    256
}

fn default_probe_host() -> String {
    "listen.moe:443".to_string()
}

fn default_probe_interval_secs() -> u64 {
    5
}

fn default_probe_timeout_ms() -> u64 {
    3000
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
