//! Telemetry publisher for MQTT.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, Outgoing, Packet, QoS};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, debug, info, warn};

use fieldlink_common::{MqttConfig, mqtt_options, qos_from_level};

use crate::error::{BridgeError, Result};

/// Capacity of the request channel between client handles and the event loop.
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Broker session state as seen by the session driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// CONNACK received, publishes flow.
    Connected,
    /// Connection lost, waiting to retry.
    Reconnecting,
    /// The session driver has stopped.
    Closed,
}

/// Progress of an outgoing publish, reported by the session driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    /// Packet written to the network (carries the packet id, 0 for QoS 0).
    Sent(u16),
    /// PUBACK (QoS 1) or PUBCOMP (QoS 2) received.
    Acked(u16),
}

/// Destination for serialized payloads drained from the delivery queue.
pub trait PayloadSink: Send + Sync {
    /// Publish one payload, returning once it is delivered per the sink's
    /// guarantees.
    fn publish(&self, payload: Vec<u8>) -> impl Future<Output = Result<()>> + Send;
}

/// Publisher for sending telemetry to an MQTT broker.
///
/// Every payload goes to one fixed topic at the configured QoS. The broker
/// session is owned by a background driver task that reconnects forever
/// with a fixed delay; connection loss is logged there and never surfaces
/// to callers of [`publish`](Self::publish).
#[derive(Clone, Debug)]
pub struct Publisher {
    client: AsyncClient,
    topic: String,
    qos: QoS,
    deliveries: Arc<Mutex<mpsc::UnboundedReceiver<Delivery>>>,
    state: watch::Receiver<ConnectionState>,
    span: Span,
}

impl Publisher {
    /// Connect to the broker.
    ///
    /// Waits for the first CONNACK (bounded by `connect_timeout_secs`) and
    /// fails if the broker is unreachable. On success, returns the publisher
    /// and the handle of the session driver that keeps the connection alive.
    pub async fn connect(config: &MqttConfig, span: Span) -> Result<(Self, JoinHandle<()>)> {
        let qos = qos_from_level(config.qos)?;
        let options = mqtt_options(config)?;
        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        let timeout = Duration::from_secs(config.connect_timeout_secs);
        let connected = tokio::time::timeout(timeout, wait_for_connack(&mut eventloop))
            .instrument(span.clone())
            .await;

        match connected {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                span.in_scope(|| warn!(error = %e, "Connect error"));
                return Err(e);
            }
            Err(_) => {
                return Err(BridgeError::BrokerConnection(format!(
                    "no CONNACK from {}:{} within {}s",
                    config.hostname, config.port, config.connect_timeout_secs
                )));
            }
        }

        span.in_scope(|| {
            info!(
                host = %config.hostname,
                port = config.port,
                "Connect successful"
            )
        });

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();

        let driver = SessionDriver {
            eventloop,
            state: state_tx,
            deliveries: delivery_tx,
            reconnect_interval: Duration::from_secs(config.reconnect_interval_secs),
        };
        let handle = tokio::spawn(driver.run().instrument(span.clone()));

        let publisher = Self {
            client,
            topic: config.topic.clone(),
            qos,
            deliveries: Arc::new(Mutex::new(delivery_rx)),
            state: state_rx,
            span,
        };

        Ok((publisher, handle))
    }

    /// Current broker session state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Whether the broker session is currently up.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Publish a payload to the configured topic.
    ///
    /// Returns once the packet is written (QoS 0) or acknowledged by the
    /// broker (QoS 1 and 2). While the session is down the call waits for
    /// the reconnect. Fails only if the client request is rejected or the
    /// session driver has stopped; there is no local retry.
    pub async fn publish(&self, payload: Vec<u8>) -> Result<()> {
        self.publish_inner(payload)
            .instrument(self.span.clone())
            .await
    }

    async fn publish_inner(&self, payload: Vec<u8>) -> Result<()> {
        let mut deliveries = self.deliveries.lock().await;

        // Notifications left over from an abandoned publish.
        while deliveries.try_recv().is_ok() {}

        let size = payload.len();
        debug!(topic = %self.topic, payload = %String::from_utf8_lossy(&payload), "Publishing");

        self.client
            .publish(&self.topic, self.qos, false, payload)
            .await
            .map_err(|e| {
                warn!(error = %e, "Publish error");
                BridgeError::publish(&self.topic, e.to_string())
            })?;

        let pkid = loop {
            match deliveries.recv().await {
                Some(Delivery::Sent(pkid)) => break pkid,
                Some(Delivery::Acked(_)) => continue,
                None => return Err(self.session_closed()),
            }
        };

        if self.qos != QoS::AtMostOnce {
            loop {
                match deliveries.recv().await {
                    Some(Delivery::Acked(id)) if id == pkid => break,
                    Some(_) => continue,
                    None => return Err(self.session_closed()),
                }
            }
        }

        debug!(topic = %self.topic, bytes = size, pkid, "Message published");
        Ok(())
    }

    /// Send an MQTT DISCONNECT. The session driver stops once it is sent.
    pub async fn disconnect(&self) -> Result<()> {
        self.client
            .disconnect()
            .await
            .map_err(|e| BridgeError::worker(format!("MQTT disconnect failed: {}", e)))
    }

    fn session_closed(&self) -> BridgeError {
        warn!(topic = %self.topic, "Publish error: broker session closed");
        BridgeError::publish(&self.topic, "broker session closed")
    }
}

impl PayloadSink for Publisher {
    async fn publish(&self, payload: Vec<u8>) -> Result<()> {
        Publisher::publish(self, payload).await
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<()> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(_) => {}
            Err(e) => return Err(BridgeError::BrokerConnection(e.to_string())),
        }
    }
}

/// Owns the MQTT event loop for the life of the session.
struct SessionDriver {
    eventloop: EventLoop,
    state: watch::Sender<ConnectionState>,
    deliveries: mpsc::UnboundedSender<Delivery>,
    reconnect_interval: Duration,
}

impl SessionDriver {
    async fn run(mut self) {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Connected to broker");
                    self.state.send_replace(ConnectionState::Connected);
                }
                Ok(Event::Incoming(Packet::PubAck(ack))) => self.notify(Delivery::Acked(ack.pkid)),
                Ok(Event::Incoming(Packet::PubComp(comp))) => {
                    self.notify(Delivery::Acked(comp.pkid))
                }
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) => self.notify(Delivery::Sent(pkid)),
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    info!("Disconnected from broker");
                    break;
                }
                Ok(_) => {}
                Err(ConnectionError::RequestsDone) => {
                    debug!("All client handles dropped");
                    break;
                }
                Err(e) => {
                    if *self.state.borrow() == ConnectionState::Connected {
                        warn!(error = %e, "Connection lost");
                    } else {
                        warn!(error = %e, "Reconnect attempt failed");
                    }
                    self.state.send_replace(ConnectionState::Reconnecting);
                    tokio::time::sleep(self.reconnect_interval).await;
                    info!("Reconnecting to broker...");
                }
            }
        }

        self.state.send_replace(ConnectionState::Closed);
    }

    fn notify(&self, delivery: Delivery) {
        // Nobody waiting is fine; the next publish discards stale entries.
        let _ = self.deliveries.send(delivery);
    }
}
