//! Gateway configuration – reads `~/.smsgw/config.toml`.
//!
//! Every field has a default, so a missing file is not an error.  A few
//! fields can be overridden from the environment; see
//! [`apply_env_overrides`].
//!
//! ```toml
//! poll_interval_secs = 5
//! ack_mode = "per_message"        # or "placeholder"
//! response_encoding = "json"      # or "raw"
//!
//! [device]
//! address = "192.168.1.1"
//! username = "user1"
//! password = "..."
//!
//! [mqtt]
//! host = "broker.lan"
//! topic_prefix = "smsgw01"
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use smsgw_device::DeviceCredentials;
use smsgw_middleware::{MqttConfig, TopicMap};
use smsgw_runtime::{AckMode, BridgeConfig};
use smsgw_types::{ResponseEncoding, SmsError};
use zeroize::Zeroizing;

/// Overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "SMSGW_CONFIG";

/// How incoming messages are acknowledged on the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckModeSetting {
    #[default]
    PerMessage,
    Placeholder,
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceSection,

    #[serde(default)]
    pub mqtt: MqttSection,

    /// Seconds between inbox polls.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default)]
    pub ack_mode: AckModeSetting,

    /// Identifier deleted for every message in `placeholder` mode.
    #[serde(default)]
    pub placeholder_id: u32,

    #[serde(default)]
    pub response_encoding: ResponseEncoding,
}

/// Router connection.
#[derive(Clone, Serialize, Deserialize)]
pub struct DeviceSection {
    #[serde(default = "default_device_address")]
    pub address: String,

    #[serde(default = "default_device_username")]
    pub username: String,

    #[serde(default)]
    pub password: Zeroizing<String>,

    #[serde(default = "default_device_timeout_secs")]
    pub timeout_secs: u64,
}

/// Broker connection and topics.
#[derive(Clone, Serialize, Deserialize)]
pub struct MqttSection {
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Defaults to `smsgw-` plus a random suffix.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<Zeroizing<String>>,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Topics are `<prefix>/command`, `<prefix>/response` and
    /// `<prefix>/incoming`.
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
}

fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() { "<not set>" } else { "<redacted>" }
}

impl fmt::Debug for DeviceSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSection")
            .field("address", &self.address)
            .field("username", &self.username)
            .field("password", &redacted(&self.password))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl fmt::Debug for MqttSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttSection")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field(
                "password",
                &redacted(self.password.as_deref().map_or("", String::as_str)),
            )
            .field("keep_alive_secs", &self.keep_alive_secs)
            .field("topic_prefix", &self.topic_prefix)
            .finish()
    }
}

fn default_poll_interval_secs() -> u64 {
    5
}
fn default_device_address() -> String {
    "192.168.1.1".to_string()
}
fn default_device_username() -> String {
    "user1".to_string()
}
fn default_device_timeout_secs() -> u64 {
    10
}
fn default_mqtt_host() -> String {
    "localhost".to_string()
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_client_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("smsgw-{}", &id[..8])
}
fn default_keep_alive_secs() -> u64 {
    60
}
fn default_topic_prefix() -> String {
    "smsgw01".to_string()
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            address: default_device_address(),
            username: default_device_username(),
            password: Zeroizing::default(),
            timeout_secs: default_device_timeout_secs(),
        }
    }
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: default_client_id(),
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive_secs(),
            topic_prefix: default_topic_prefix(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceSection::default(),
            mqtt: MqttSection::default(),
            poll_interval_secs: default_poll_interval_secs(),
            ack_mode: AckModeSetting::default(),
            placeholder_id: 0,
            response_encoding: ResponseEncoding::default(),
        }
    }
}

impl Config {
    /// Reject values the gateway cannot run with.
    pub fn validate(&self) -> Result<(), SmsError> {
        if self.poll_interval_secs == 0 {
            return Err(SmsError::Config("poll_interval_secs must be at least 1".to_string()));
        }
        if self.device.timeout_secs == 0 {
            return Err(SmsError::Config("device.timeout_secs must be at least 1".to_string()));
        }
        if self.device.address.trim().is_empty() {
            return Err(SmsError::Config("device.address is empty".to_string()));
        }
        if self.mqtt.host.trim().is_empty() {
            return Err(SmsError::Config("mqtt.host is empty".to_string()));
        }
        Ok(())
    }

    pub fn device_credentials(&self) -> DeviceCredentials {
        DeviceCredentials::new(self.device.username.as_str(), self.device.password.as_str())
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_secs(self.device.timeout_secs)
    }

    pub fn mqtt_config(&self) -> MqttConfig {
        MqttConfig {
            host: self.mqtt.host.clone(),
            port: self.mqtt.port,
            client_id: self.mqtt.client_id.clone(),
            username: self.mqtt.username.clone(),
            password: self.mqtt.password.as_deref().cloned(),
            keep_alive: Duration::from_secs(self.mqtt.keep_alive_secs),
            topics: TopicMap::with_prefix(&self.mqtt.topic_prefix),
        }
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            ack_mode: match self.ack_mode {
                AckModeSetting::PerMessage => AckMode::PerMessage,
                AckModeSetting::Placeholder => AckMode::Placeholder(self.placeholder_id),
            },
            response_encoding: self.response_encoding,
        }
    }
}

/// `$SMSGW_CONFIG`, or `~/.smsgw/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".smsgw").join("config.toml")
}

/// Load from [`config_path`] and apply environment overrides.
pub fn load() -> Result<Config, SmsError> {
    let mut cfg = load_from(&config_path())?;
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the file at `path`; defaults if it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Config, SmsError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| SmsError::Config(format!("failed to read {}: {e}", path.display())))?;
    toml::from_str(&raw)
        .map_err(|e| SmsError::Config(format!("failed to parse {}: {e}", path.display())))
}

/// Apply `SMSGW_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `SMSGW_DEVICE_ADDRESS` | `device.address` |
/// | `SMSGW_DEVICE_USERNAME` | `device.username` |
/// | `SMSGW_DEVICE_PASSWORD` | `device.password` |
/// | `SMSGW_MQTT_HOST` | `mqtt.host` |
/// | `SMSGW_MQTT_PORT` | `mqtt.port` |
/// | `SMSGW_MQTT_USERNAME` | `mqtt.username` |
/// | `SMSGW_MQTT_PASSWORD` | `mqtt.password` |
/// | `SMSGW_POLL_INTERVAL_SECS` | `poll_interval_secs` |
///
/// Unparseable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("SMSGW_DEVICE_ADDRESS") {
        cfg.device.address = v;
    }
    if let Ok(v) = std::env::var("SMSGW_DEVICE_USERNAME") {
        cfg.device.username = v;
    }
    if let Ok(v) = std::env::var("SMSGW_DEVICE_PASSWORD") {
        cfg.device.password = Zeroizing::new(v);
    }
    if let Ok(v) = std::env::var("SMSGW_MQTT_HOST") {
        cfg.mqtt.host = v;
    }
    if let Ok(v) = std::env::var("SMSGW_MQTT_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.mqtt.port = port;
    }
    if let Ok(v) = std::env::var("SMSGW_MQTT_USERNAME") {
        cfg.mqtt.username = Some(v);
    }
    if let Ok(v) = std::env::var("SMSGW_MQTT_PASSWORD") {
        cfg.mqtt.password = Some(Zeroizing::new(v));
    }
    if let Ok(v) = std::env::var("SMSGW_POLL_INTERVAL_SECS")
        && let Ok(secs) = v.parse::<u64>()
    {
        cfg.poll_interval_secs = secs;
    }
}
