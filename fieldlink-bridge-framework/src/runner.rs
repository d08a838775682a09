//! Bridge runner for lifecycle management.

use std::future::Future;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info_span;

use fieldlink_common::init_tracing;

use crate::BridgeArgs;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::publisher::Publisher;

/// How long workers get to finish after the stop signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Bridge runner that manages the lifecycle of a protocol bridge.
///
/// Handles:
/// - Logging initialization
/// - Broker connection (before any worker starts)
/// - Task spawning and management
/// - Cooperative shutdown on Ctrl+C or SIGTERM
///
/// # Example
///
/// ```ignore
/// use fieldlink_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner, delivery};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let args = BridgeArgs::parse_with_default("mybridge.json5");
///     let config = MyBridgeConfig::load(&args.config)?;
///
///     let mut runner = BridgeRunner::new_with_args("mybridge", config, Some(&args)).await?;
///
///     let (tx, rx) = delivery::channel();
///     let publisher = runner.publisher();
///     let stop = runner.shutdown_signal();
///     runner.spawn(async move { my_producer(tx, stop).await });
///     runner.spawn(async move { delivery::drain(rx, &publisher).await; });
///
///     runner.run().await
/// }
/// ```
pub struct BridgeRunner<C: BridgeConfig> {
    /// Bridge name for logging.
    name: String,
    /// The loaded configuration.
    config: C,
    /// Publisher for telemetry.
    publisher: Publisher,
    /// Task driving the broker session.
    session: JoinHandle<()>,
    /// Stop signal shared with workers.
    shutdown: watch::Sender<bool>,
    /// Spawned tasks.
    tasks: Vec<JoinHandle<()>>,
}

impl<C: BridgeConfig> BridgeRunner<C> {
    /// Create a new bridge runner.
    ///
    /// This will:
    /// 1. Initialize logging based on config
    /// 2. Connect to the MQTT broker
    pub async fn new(name: impl Into<String>, config: C) -> Result<Self> {
        Self::new_with_args(name, config, None).await
    }

    /// Create a new bridge runner with CLI args for log level override.
    pub async fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&BridgeArgs>,
    ) -> Result<Self> {
        let name = name.into();
        let version = env!("CARGO_PKG_VERSION");

        // Initialize logging with optional CLI override
        let log_config = match args {
            Some(args) => args.logging_overrides(config.logging()),
            None => config.logging().clone(),
        };

        init_tracing(&log_config).map_err(|e| BridgeError::config(e.to_string()))?;

        tracing::info!(bridge = %name, version = %version, "Starting bridge");

        let mqtt = config.mqtt();
        tracing::info!(
            host = %mqtt.hostname,
            port = mqtt.port,
            topic = %mqtt.topic,
            "MQTT config"
        );

        // The broker must be reachable before any worker produces data
        let span = info_span!("mqtt", topic = %mqtt.topic);
        let (publisher, session) = Publisher::connect(mqtt, span).await?;

        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            name,
            config,
            publisher,
            session,
            shutdown,
            tasks: Vec::new(),
        })
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Get a clone of the publisher.
    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    /// Get a stop signal receiver. It flips to `true` on shutdown.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Spawn a worker task.
    ///
    /// The task gets a grace period to finish on shutdown, then is aborted.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.tasks.push(handle);
    }

    /// Run the bridge until Ctrl+C or SIGTERM is received.
    ///
    /// This will:
    /// 1. Wait for a termination signal
    /// 2. Flip the stop signal so workers wind down
    /// 3. Give workers a grace period, then abort the rest
    /// 4. Disconnect from the broker
    pub async fn run(self) -> Result<()> {
        tracing::info!(
            bridge = %self.name,
            tasks = self.tasks.len(),
            "Bridge running. Press Ctrl+C to stop."
        );

        wait_for_termination().await;

        tracing::info!(bridge = %self.name, "Received shutdown signal");

        self.shutdown().await
    }

    /// Stop all workers and close the broker session.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.send_replace(true);

        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        for mut task in self.tasks {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                tracing::warn!("Worker did not stop in time, aborting");
                task.abort();
            }
        }

        if let Err(e) = self.publisher.disconnect().await {
            tracing::warn!(error = %e, "Error disconnecting from broker");
        }

        let mut session = self.session;
        if tokio::time::timeout(Duration::from_secs(1), &mut session)
            .await
            .is_err()
        {
            session.abort();
        }

        tracing::info!(bridge = %self.name, "Goodbye!");

        Ok(())
    }
}

async fn wait_for_termination() {
    tokio::select! {
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            }
        }
        _ = sigterm() => {
            tracing::info!("Received SIGTERM");
        }
    }
}

#[cfg(unix)]
async fn sigterm() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await;
}
