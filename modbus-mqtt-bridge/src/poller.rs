//! Per-sensor Modbus polling.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio_modbus::client::{Context, Reader};
use tokio_modbus::prelude::*;
use tracing::{Instrument, Span, debug, warn};

use fieldlink_common::telemetry::ReadingEnvelope;

use crate::config::SensorSpec;
use crate::decoder::{decode, registers_to_bytes};

/// Error type for polling operations.
#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Read failed: {0}")]
    Read(String),
    #[error("Exception: {0}")]
    Exception(String),
}

/// An open connection to one Modbus unit.
pub trait RegisterLink: Send {
    /// Read `count` holding registers starting at `address`.
    fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> impl Future<Output = Result<Vec<u16>, PollerError>> + Send;

    /// Close the connection.
    fn disconnect(self) -> impl Future<Output = ()> + Send;
}

/// Opens connections to sensors.
pub trait Connector: Send + Sync {
    type Link: RegisterLink;

    fn connect(
        &self,
        sensor: &SensorSpec,
        timeout: Duration,
    ) -> impl Future<Output = Result<Self::Link, PollerError>> + Send;
}

/// Modbus TCP connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Link = ModbusLink;

    async fn connect(
        &self,
        sensor: &SensorSpec,
        timeout: Duration,
    ) -> Result<ModbusLink, PollerError> {
        let endpoint = sensor.endpoint();
        let slave = Slave(sensor.slave_id);

        let ctx = tokio::time::timeout(timeout, open(&endpoint, slave))
            .await
            .map_err(|_| PollerError::Connection(format!("{}: connection timeout", endpoint)))?
            .map_err(|e| PollerError::Connection(format!("{}: {}", endpoint, e)))?;

        Ok(ModbusLink { ctx, timeout })
    }
}

async fn open(endpoint: &str, slave: Slave) -> io::Result<Context> {
    let addr: SocketAddr = tokio::net::lookup_host(endpoint)
        .await?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address resolved"))?;

    tcp::connect_slave(addr, slave).await
}

/// A tokio-modbus client context with a per-request timeout.
pub struct ModbusLink {
    ctx: Context,
    timeout: Duration,
}

impl RegisterLink for ModbusLink {
    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, PollerError> {
        tokio::time::timeout(self.timeout, self.ctx.read_holding_registers(address, count))
            .await
            .map_err(|_| PollerError::Read("read timeout".to_string()))?
            .map_err(|e| PollerError::Read(e.to_string()))?
            .map_err(|e| PollerError::Exception(format!("{:?}", e)))
    }

    async fn disconnect(mut self) {
        if let Err(e) = self.ctx.disconnect().await {
            debug!(error = %e, "Modbus disconnect failed");
        }
    }
}

/// Polls one sensor per call and turns the outcome into an envelope.
///
/// A device that cannot be reached yields a failure envelope carrying the
/// sentinel value. A device that accepts the connection but fails the read
/// yields nothing for that cycle.
pub struct SensorPoller<C> {
    connector: C,
    timeout: Duration,
    failure_sentinel: String,
    span: Span,
}

impl<C: Connector> SensorPoller<C> {
    pub fn new(
        connector: C,
        timeout: Duration,
        failure_sentinel: impl Into<String>,
        span: Span,
    ) -> Self {
        Self {
            connector,
            timeout,
            failure_sentinel: failure_sentinel.into(),
            span,
        }
    }

    /// Run one connect, read, decode step for `sensor`.
    pub async fn poll(&self, sensor: &SensorSpec) -> Option<ReadingEnvelope> {
        async move {
            let mut link = match self.connector.connect(sensor, self.timeout).await {
                Ok(link) => link,
                Err(e) => {
                    warn!(
                        register = %sensor.register_name,
                        endpoint = %sensor.endpoint(),
                        error = %e,
                        "Modbus connection error"
                    );
                    return Some(ReadingEnvelope::connect_failure(
                        sensor.register_name.as_str(),
                        self.failure_sentinel.as_str(),
                    ));
                }
            };

            let read = link
                .read_holding_registers(sensor.modbus_address, sensor.size)
                .await;
            link.disconnect().await;

            match read {
                Ok(registers) => {
                    let bytes = registers_to_bytes(&registers);
                    let value = decode(&bytes, &sensor.data_type);
                    debug!(
                        register = %sensor.register_name,
                        data_type = %sensor.data_type,
                        value = ?value,
                        "Register read"
                    );
                    Some(ReadingEnvelope::reading(sensor.register_name.as_str(), value))
                }
                Err(e) => {
                    warn!(
                        register = %sensor.register_name,
                        address = sensor.modbus_address,
                        error = %e,
                        "Modbus read error"
                    );
                    None
                }
            }
        }
        .instrument(self.span.clone())
        .await
    }
}
