//! Configuration for the Modbus bridge.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

use fieldlink_bridge_framework::{BridgeConfig, BridgeError};
use fieldlink_common::config::{LoggingConfig, MqttConfig};
use fieldlink_common::telemetry::DEFAULT_FAILURE_SENTINEL;

use crate::decoder::DataType;

/// Polling interval used when none is configured.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(5);

/// Per-read timeout used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Largest holding-register count a single Modbus read may request.
pub const MAX_REGISTERS_PER_READ: u16 = 125;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusBridgeConfig {
    /// MQTT broker settings
    pub mqtt: MqttConfig,

    /// Modbus-specific settings
    pub modbus: ModbusConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Modbus polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusConfig {
    /// Seconds between polling cycles (0 or absent: 5)
    #[serde(default)]
    pub polling_interval: u64,

    /// Per-connection and per-read timeout in seconds (0 or absent: 2)
    #[serde(default)]
    pub timeout: u64,

    /// Value published when a device cannot be reached
    #[serde(default = "default_failure_sentinel")]
    pub failure_sentinel: String,

    /// Sensors to poll, in publishing order
    pub sensors: Vec<SensorSpec>,
}

fn default_failure_sentinel() -> String {
    DEFAULT_FAILURE_SENTINEL.to_string()
}

/// One register read per cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorSpec {
    /// Unique register label, published as `register`
    pub register_name: String,

    /// Modbus unit/slave ID
    pub slave_id: u8,

    /// Holding register start address (0-based)
    pub modbus_address: u16,

    /// How to interpret the register bytes
    pub data_type: DataType,

    /// Number of 16-bit registers to read
    pub size: u16,

    /// Device address (IP or hostname)
    pub ip: String,

    /// Modbus TCP port
    #[serde(default = "default_modbus_port")]
    pub port: u16,
}

fn default_modbus_port() -> u16 {
    502
}

impl SensorSpec {
    /// `host:port` of the device.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

impl ModbusConfig {
    /// Effective polling interval.
    pub fn polling_interval(&self) -> Duration {
        if self.polling_interval > 0 {
            Duration::from_secs(self.polling_interval)
        } else {
            DEFAULT_POLLING_INTERVAL
        }
    }

    /// Effective per-read timeout.
    pub fn timeout(&self) -> Duration {
        if self.timeout > 0 {
            Duration::from_secs(self.timeout)
        } else {
            DEFAULT_TIMEOUT
        }
    }
}

impl ModbusBridgeConfig {
    /// Validate the configuration.
    pub fn check(&self) -> Result<(), ConfigError> {
        self.mqtt
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        if self.modbus.sensors.is_empty() {
            return Err(ConfigError::Validation(
                "At least one sensor must be configured".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for sensor in &self.modbus.sensors {
            if sensor.register_name.is_empty() {
                return Err(ConfigError::Validation(
                    "Sensor register_name cannot be empty".to_string(),
                ));
            }

            if !names.insert(sensor.register_name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate register_name '{}'",
                    sensor.register_name
                )));
            }

            if sensor.slave_id == 0 {
                return Err(ConfigError::Validation(format!(
                    "Sensor '{}': slave_id must be 1-247",
                    sensor.register_name
                )));
            }

            if sensor.size == 0 || sensor.size > MAX_REGISTERS_PER_READ {
                return Err(ConfigError::Validation(format!(
                    "Sensor '{}': size must be 1-{}",
                    sensor.register_name, MAX_REGISTERS_PER_READ
                )));
            }

            if sensor.ip.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Sensor '{}': ip cannot be empty",
                    sensor.register_name
                )));
            }
        }

        Ok(())
    }
}

impl BridgeConfig for ModbusBridgeConfig {
    fn mqtt(&self) -> &MqttConfig {
        &self.mqtt
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn validate(&self) -> fieldlink_bridge_framework::Result<()> {
        self.check().map_err(|e| BridgeError::validation(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        mqtt: {
            hostname: "broker.local",
            port: 1883,
            qos: 1,
            topic: "plant/modbus",
        },
        modbus: {
            polling_interval: 10,
            timeout: 3,
            sensors: [
                {
                    register_name: "tank_level",
                    slave_id: 1,
                    modbus_address: 100,
                    data_type: "uint16",
                    size: 1,
                    ip: "192.168.1.10",
                },
                {
                    register_name: "serial_no",
                    slave_id: 2,
                    modbus_address: 0,
                    data_type: "bcd",
                    size: 2,
                    ip: "192.168.1.11",
                    port: 5020,
                },
            ],
        },
    }"#;

    fn sample() -> ModbusBridgeConfig {
        json5::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn test_parse_config() {
        let config = sample();
        config.check().unwrap();

        assert_eq!(config.mqtt.topic, "plant/modbus");
        assert_eq!(config.modbus.sensors.len(), 2);

        let first = &config.modbus.sensors[0];
        assert_eq!(first.register_name, "tank_level");
        assert_eq!(first.data_type, DataType::Uint16);
        assert_eq!(first.port, 502); // default
        assert_eq!(first.endpoint(), "192.168.1.10:502");

        let second = &config.modbus.sensors[1];
        assert_eq!(second.data_type, DataType::Bcd);
        assert_eq!(second.endpoint(), "192.168.1.11:5020");

        assert_eq!(config.modbus.polling_interval(), Duration::from_secs(10));
        assert_eq!(config.modbus.timeout(), Duration::from_secs(3));
        assert_eq!(config.modbus.failure_sentinel, "abc");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_zero_or_missing_timing_uses_defaults() {
        let mut config = sample();
        config.modbus.polling_interval = 0;
        config.modbus.timeout = 0;

        assert_eq!(config.modbus.polling_interval(), DEFAULT_POLLING_INTERVAL);
        assert_eq!(config.modbus.timeout(), DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_unknown_data_type_accepted() {
        let json = SAMPLE.replace("\"bcd\"", "\"weird\"");
        let config: ModbusBridgeConfig = json5::from_str(&json).unwrap();
        config.check().unwrap();

        assert_eq!(
            config.modbus.sensors[1].data_type,
            DataType::Other("weird".to_string())
        );
    }

    #[test]
    fn test_validate_empty_sensors() {
        let mut config = sample();
        config.modbus.sensors.clear();
        assert!(matches!(config.check(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validate_duplicate_names() {
        let mut config = sample();
        config.modbus.sensors[1].register_name = "tank_level".to_string();
        assert!(config.check().is_err());
    }

    #[test]
    fn test_validate_slave_and_size() {
        let mut config = sample();
        config.modbus.sensors[0].slave_id = 0;
        assert!(config.check().is_err());

        let mut config = sample();
        config.modbus.sensors[0].size = 0;
        assert!(config.check().is_err());

        let mut config = sample();
        config.modbus.sensors[0].size = MAX_REGISTERS_PER_READ + 1;
        assert!(config.check().is_err());
    }

    #[test]
    fn test_validate_broker_settings() {
        let mut config = sample();
        config.mqtt.qos = 5;
        assert!(config.check().is_err());
    }

    #[test]
    fn test_bridge_config_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", SAMPLE).unwrap();

        let config = <ModbusBridgeConfig as BridgeConfig>::load(file.path()).unwrap();
        assert_eq!(config.modbus.sensors.len(), 2);
        assert_eq!(config.mqtt().hostname, "broker.local");
    }

    #[test]
    fn test_shipped_sample_is_valid() {
        let config: ModbusBridgeConfig =
            json5::from_str(include_str!("../modbus-mqtt.json5")).unwrap();
        config.check().unwrap();

        assert_eq!(config.modbus.sensors.len(), 3);
        assert_eq!(config.modbus.sensors[1].data_type, DataType::Float32);
        assert_eq!(config.modbus.sensors[2].port, 5020);
    }

    #[test]
    fn test_bridge_config_validation_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", SAMPLE.replace("slave_id: 2", "slave_id: 0")).unwrap();

        let result = <ModbusBridgeConfig as BridgeConfig>::load(file.path());
        assert!(matches!(result, Err(BridgeError::ConfigValidation(_))));
    }
}
