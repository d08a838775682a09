//! The polling cycle.
//!
//! Every cycle polls each configured sensor once, in configuration order,
//! and pushes the serialized envelopes into the delivery queue. Between
//! cycles the loop sleeps for the polling interval. The stop signal is
//! honored at the top of every cycle, between sensors, during the sleep and
//! while blocked on a full queue.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{Instrument, Span, debug, info, warn};

use fieldlink_bridge_framework::delivery::PayloadSender;
use fieldlink_common::serialization::encode;

use crate::config::SensorSpec;
use crate::poller::{Connector, SensorPoller};

/// Sequential poller over a fixed sensor list.
pub struct AcquisitionLoop<C> {
    sensors: Vec<SensorSpec>,
    poller: SensorPoller<C>,
    interval: Duration,
    span: Span,
}

impl<C: Connector> AcquisitionLoop<C> {
    /// `interval` may be zero, in which case cycles run back to back.
    pub fn new(
        sensors: Vec<SensorSpec>,
        poller: SensorPoller<C>,
        interval: Duration,
        span: Span,
    ) -> Self {
        Self {
            sensors,
            poller,
            interval,
            span,
        }
    }

    /// Poll until `stop` flips to `true`, its sender is dropped, or the
    /// delivery queue is closed. Returns the number of completed cycles.
    ///
    /// The queue is not closed here; dropping `out` on return is the only
    /// effect on it.
    pub async fn run(self, out: PayloadSender, mut stop: watch::Receiver<bool>) -> u64 {
        let span = self.span.clone();

        async move {
            info!(
                sensors = self.sensors.len(),
                interval_ms = self.interval.as_millis() as u64,
                "Starting Modbus reader"
            );

            let mut cycles = 0u64;

            'acquisition: loop {
                if *stop.borrow() {
                    break;
                }

                for sensor in &self.sensors {
                    if *stop.borrow() {
                        break 'acquisition;
                    }

                    let Some(envelope) = self.poller.poll(sensor).await else {
                        continue;
                    };

                    let payload = match encode(&envelope) {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!(
                                register = %sensor.register_name,
                                error = %e,
                                "JSON encode error"
                            );
                            continue;
                        }
                    };

                    tokio::select! {
                        sent = out.send(payload) => {
                            if sent.is_err() {
                                warn!("Delivery queue closed, stopping acquisition");
                                break 'acquisition;
                            }
                        }
                        _ = stop_requested(&mut stop) => break 'acquisition,
                    }
                }

                cycles += 1;
                debug!(cycle = cycles, "Polling cycle complete");

                tokio::select! {
                    _ = tokio::time::sleep(self.interval) => {}
                    _ = stop_requested(&mut stop) => break,
                }
            }

            info!(cycles, "Stopping Modbus reader");
            cycles
        }
        .instrument(span)
        .await
    }
}

/// Resolves once the stop flag is set or the sender is gone.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poller::tests::{Script, ScriptedConnector, sensor};
    use fieldlink_bridge_framework::delivery;
    use serde_json::Value;

    fn acquisition(
        connector: ScriptedConnector,
        sensors: Vec<SensorSpec>,
        interval: Duration,
    ) -> AcquisitionLoop<ScriptedConnector> {
        let poller = SensorPoller::new(connector, Duration::from_millis(100), "abc", Span::none());
        AcquisitionLoop::new(sensors, poller, interval, Span::none())
    }

    fn decode_all(payloads: &[Vec<u8>]) -> Vec<Value> {
        payloads
            .iter()
            .map(|p| serde_json::from_slice(p).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_cycle_follows_configuration_order() {
        let connector = ScriptedConnector::default()
            .with("a", Script::Registers(vec![1]))
            .with("b", Script::Unreachable)
            .with("c", Script::Registers(vec![3]));
        let sensors = vec![
            sensor("a", "uint16", 1),
            sensor("b", "uint16", 1),
            sensor("c", "uint16", 1),
        ];

        let (tx, mut rx) = delivery::channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(acquisition(connector, sensors, Duration::ZERO).run(tx, stop_rx));

        let mut payloads = Vec::new();
        for _ in 0..6 {
            payloads.push(rx.recv().await.unwrap());
        }
        stop_tx.send_replace(true);
        let cycles = task.await.unwrap();
        assert!(cycles >= 2);

        let registers: Vec<String> = decode_all(&payloads)
            .iter()
            .map(|v| v["register"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(registers, vec!["a", "b", "c", "a", "b", "c"]);

        let first = decode_all(&payloads[..3]);
        assert_eq!(first[0]["value"], 1);
        assert_eq!(first[1]["value"], "abc");
        assert!(first[1].get("ts").is_some());
        assert_eq!(first[2]["value"], 3);
    }

    #[tokio::test]
    async fn test_read_failure_skips_sensor() {
        let connector = ScriptedConnector::default()
            .with("ok", Script::Registers(vec![7]))
            .with("bad", Script::ReadFails);
        let sensors = vec![sensor("bad", "uint16", 1), sensor("ok", "uint16", 1)];

        let (tx, mut rx) = delivery::channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(acquisition(connector, sensors, Duration::ZERO).run(tx, stop_rx));

        for _ in 0..3 {
            let payload = rx.recv().await.unwrap();
            let value: Value = serde_json::from_slice(&payload).unwrap();
            assert_eq!(value["register"], "ok");
        }
        stop_tx.send_replace(true);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unencodable_value_is_dropped() {
        // 0x7FC00000 is a float32 NaN
        let connector = ScriptedConnector::default()
            .with("nan", Script::Registers(vec![0x7FC0, 0x0000]))
            .with("fine", Script::Registers(vec![0x0001]));
        let sensors = vec![sensor("nan", "float32", 2), sensor("fine", "uint16", 1)];

        let (tx, mut rx) = delivery::channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(acquisition(connector, sensors, Duration::ZERO).run(tx, stop_rx));

        for _ in 0..2 {
            let value: Value = serde_json::from_slice(&rx.recv().await.unwrap()).unwrap();
            assert_eq!(value["register"], "fine");
        }
        stop_tx.send_replace(true);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_before_start_polls_nothing() {
        let connector = ScriptedConnector::default().with("a", Script::Registers(vec![1]));
        let calls = connector.calls.clone();

        let (tx, mut rx) = delivery::channel();
        let (_stop_tx, stop_rx) = watch::channel(true);
        let cycles = acquisition(connector, vec![sensor("a", "uint16", 1)], Duration::ZERO)
            .run(tx, stop_rx)
            .await;

        assert_eq!(cycles, 0);
        assert!(calls.lock().unwrap().is_empty());
        // The sender was dropped on return
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stop_wakes_sleep() {
        let connector = ScriptedConnector::default().with("a", Script::Registers(vec![1]));
        let (tx, mut rx) = delivery::channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(
            acquisition(connector, vec![sensor("a", "uint16", 1)], Duration::from_secs(3600))
                .run(tx, stop_rx),
        );

        rx.recv().await.unwrap();
        stop_tx.send_replace(true);

        let cycles = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("loop did not stop during sleep")
            .unwrap();
        assert_eq!(cycles, 1);
    }

    #[tokio::test]
    async fn test_stop_wakes_blocked_enqueue() {
        let connector = ScriptedConnector::default().with("a", Script::Registers(vec![1]));
        let (tx, rx) = delivery::channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(
            acquisition(connector, vec![sensor("a", "uint16", 1)], Duration::ZERO)
                .run(tx, stop_rx),
        );

        // Nobody drains, so the loop ends up blocked on a full queue
        while rx.len() < delivery::DELIVERY_QUEUE_CAPACITY {
            tokio::task::yield_now().await;
        }
        stop_tx.send_replace(true);

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("loop did not stop while blocked")
            .unwrap();
        assert_eq!(rx.len(), delivery::DELIVERY_QUEUE_CAPACITY);
    }

    #[tokio::test]
    async fn test_closed_queue_ends_loop() {
        let connector = ScriptedConnector::default().with("a", Script::Registers(vec![1]));
        let (tx, rx) = delivery::channel();
        drop(rx);
        let (_stop_tx, stop_rx) = watch::channel(false);

        let cycles = tokio::time::timeout(
            Duration::from_secs(5),
            acquisition(connector, vec![sensor("a", "uint16", 1)], Duration::ZERO)
                .run(tx, stop_rx),
        )
        .await
        .unwrap();
        assert_eq!(cycles, 0);
    }
}
