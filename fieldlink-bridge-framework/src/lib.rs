//! Fieldlink Bridge Framework
//!
//! Common abstractions for building field-protocol bridges that publish
//! telemetry to an MQTT broker.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`BridgeRunner`] for managing bridge lifecycle (startup, shutdown, signal handling)
//! - [`Publisher`] for publishing payloads over a self-healing MQTT session
//! - [`delivery`] for the bounded queue between acquisition and publication
//! - [`BridgeArgs`] for common CLI argument parsing
//!
//! # Example
//!
//! ```ignore
//! use fieldlink_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = BridgeArgs::parse_with_default("mybridge.json5");
//!     let config = MyBridgeConfig::load(&args.config)?;
//!
//!     let mut runner = BridgeRunner::new_with_args("mybridge", config, Some(&args)).await?;
//!
//!     // Spawn protocol-specific workers
//!     runner.spawn(my_worker(runner.publisher(), runner.shutdown_signal()));
//!
//!     // Run until Ctrl+C
//!     runner.run().await
//! }
//! ```

mod args;
mod config;
pub mod delivery;
mod error;
mod publisher;
mod runner;

pub use args::BridgeArgs;
pub use config::BridgeConfig;
pub use delivery::PublishStats;
pub use error::{BridgeError, Result};
pub use publisher::{ConnectionState, PayloadSink, Publisher};
pub use runner::BridgeRunner;

// Re-export commonly used types from fieldlink-common
pub use fieldlink_common::{LoggingConfig, MqttConfig, ReadingEnvelope, RegisterValue};
