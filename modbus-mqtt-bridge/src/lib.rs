//! Modbus TCP to MQTT bridge.
//!
//! Polls holding registers on a fixed list of Modbus TCP sensors and
//! publishes each reading as one JSON message on a single MQTT topic.
//!
//! # Payloads
//!
//! ```text
//! {"register": "tank_level", "value": 258, "starttimestamp": "2024-05-01T12:00:00Z"}
//! {"register": "tank_level", "value": "abc", "ts": "2024-05-01T12:00:05Z"}
//! ```
//!
//! The second form is published when the device cannot be reached. A device
//! that accepts the connection but fails the read publishes nothing for that
//! cycle.
//!
//! # Modules
//!
//! - [`config`]: sensor list and timing
//! - [`decoder`]: register bytes to typed values
//! - [`poller`]: one connect, read, decode step per sensor
//! - [`acquisition`]: the polling cycle feeding the delivery queue

pub mod acquisition;
pub mod config;
pub mod decoder;
pub mod poller;
