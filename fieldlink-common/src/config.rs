use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// MQTT broker connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host name or IP address.
    pub hostname: String,

    /// Broker port.
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Username for broker authentication (empty means anonymous).
    #[serde(default)]
    pub username: Option<String>,

    /// Password for broker authentication.
    #[serde(default)]
    pub password: Option<String>,

    /// Publish QoS level: 0, 1 or 2.
    #[serde(default)]
    pub qos: u8,

    /// Path to a PEM CA certificate. When set, the session uses TLS.
    #[serde(default)]
    pub cert: Option<PathBuf>,

    /// Topic every reading is published to.
    pub topic: String,

    /// MQTT client identifier.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Delay between reconnection attempts in seconds.
    #[serde(default = "default_reconnect_interval_secs")]
    pub reconnect_interval_secs: u64,

    /// Upper bound on the initial broker connection in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    format!("fieldlink-{}", std::process::id())
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_reconnect_interval_secs() -> u64 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl MqttConfig {
    /// Create a plaintext broker configuration with defaults for everything else.
    pub fn new(hostname: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            qos: 0,
            cert: None,
            topic: topic.into(),
            client_id: default_client_id(),
            keep_alive_secs: default_keep_alive_secs(),
            reconnect_interval_secs: default_reconnect_interval_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }

    /// Whether the session should use TLS.
    pub fn uses_tls(&self) -> bool {
        self.cert.is_some()
    }

    /// Check the broker settings.
    pub fn validate(&self) -> Result<()> {
        if self.hostname.trim().is_empty() {
            return Err(Error::Config("mqtt.hostname cannot be empty".to_string()));
        }
        if self.topic.is_empty() {
            return Err(Error::Config("mqtt.topic cannot be empty".to_string()));
        }
        if self.qos > 2 {
            return Err(Error::Config(format!(
                "mqtt.qos must be 0, 1 or 2 (got {})",
                self.qos
            )));
        }
        if self.keep_alive_secs < 5 {
            return Err(Error::Config(
                "mqtt.keep_alive_secs must be at least 5".to_string(),
            ));
        }
        if let Some(cert) = &self.cert {
            if !cert.exists() {
                return Err(Error::Config(format!(
                    "mqtt.cert '{}' does not exist",
                    cert.display()
                )));
            }
        }
        Ok(())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Common logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,

    /// Append logs to this file instead of stdout.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

/// Load a configuration file in JSON5 format.
pub fn load_config<T: for<'de> Deserialize<'de>>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    json5::from_str(&content).map_err(|e| {
        Error::Config(format!(
            "Failed to parse config file '{}': {}",
            path.display(),
            e
        ))
    })
}

/// Load a configuration from a JSON5 string.
pub fn parse_config<T: for<'de> Deserialize<'de>>(content: &str) -> Result<T> {
    json5::from_str(content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
}
