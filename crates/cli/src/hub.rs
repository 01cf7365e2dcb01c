// Hub session for the CLI
//
// Owns a coordinator task and a log forwarder for the lifetime of a command.
// Shutdown flushes logs before the connection closes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use schemaflow_coordinator::prelude::*;
use schemaflow_coordinator::{
    init_telemetry, ConnectionEvent, ConnectionListener, CoordinatorError, CoordinatorStats,
    LogForwarder, LogForwarderConfig, TelemetryConfig,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Install the tracing subscriber, optionally forwarding events to the hub
pub fn init_logging(quiet: bool, forwarder: Option<Arc<LogForwarder>>) -> Result<()> {
    let mut config = TelemetryConfig::from_env();
    if quiet && config.log_filter.is_none() {
        config = config.with_log_filter("warn");
    }
    init_telemetry(config, forwarder).context("failed to initialize logging")
}

/// Tracks whether the current connection has been acknowledged
struct RegistrationSignal(watch::Sender<bool>);

impl ConnectionListener for RegistrationSignal {
    fn on_connection_event(&self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Registered => {
                self.0.send_replace(true);
            }
            ConnectionEvent::Disconnected { .. } => {
                self.0.send_replace(false);
            }
            ConnectionEvent::Connected { .. } => {}
        }
    }
}

pub struct HubSession {
    coordinator: Arc<Coordinator>,
    registered: watch::Receiver<bool>,
    shutdown: CancellationToken,
    coordinator_task: Option<JoinHandle<Result<(), CoordinatorError>>>,
    forwarder_shutdown: CancellationToken,
    forwarder_task: JoinHandle<()>,
}

impl HubSession {
    /// Connect in the background and start forwarding logs.
    ///
    /// Configuration comes from the environment; `hub` overrides the address
    /// and `capabilities` apply when none are configured. Installs the global
    /// tracing subscriber.
    pub fn start(
        hub: Option<String>,
        capabilities: Vec<String>,
        phases: Arc<PhaseManager>,
        quiet: bool,
    ) -> Result<Self> {
        let mut config =
            CoordinatorConfig::from_env().context("invalid coordinator configuration")?;
        if let Some(addr) = hub {
            config = config.with_hub_addr(addr);
        }
        if config.capabilities.is_empty() {
            config = config.with_capabilities(capabilities);
        }

        let connector = TcpConnector::new(config.hub_addr.clone())
            .with_connect_timeout(config.connect_timeout);
        let (registered_tx, registered) = watch::channel(false);
        let coordinator = Arc::new(
            Coordinator::new(config, Arc::new(connector), phases)
                .with_listener(Arc::new(RegistrationSignal(registered_tx))),
        );

        let forwarder = Arc::new(LogForwarder::new(
            LogForwarderConfig::default(),
            coordinator.handle(),
        ));
        init_logging(quiet, Some(forwarder.clone()))?;

        info!(
            hub = %coordinator.config().hub_addr,
            service_id = %coordinator.config().service_id,
            "connecting to hub"
        );

        let shutdown = CancellationToken::new();
        let coordinator_task = tokio::spawn({
            let coordinator = coordinator.clone();
            let shutdown = shutdown.clone();
            async move { coordinator.run(shutdown).await }
        });

        let forwarder_shutdown = CancellationToken::new();
        let forwarder_task = forwarder.spawn(forwarder_shutdown.clone());

        Ok(Self {
            coordinator,
            registered,
            shutdown,
            coordinator_task: Some(coordinator_task),
            forwarder_shutdown,
            forwarder_task,
        })
    }

    pub fn handle(&self) -> CoordinatorHandle {
        self.coordinator.handle()
    }

    pub fn connect_timeout(&self) -> Duration {
        self.coordinator.config().connect_timeout
    }

    /// Wait until the hub acknowledges registration; false on timeout
    pub async fn wait_registered(&mut self, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, self.registered.wait_for(|registered| *registered)).await,
            Ok(Ok(_))
        )
    }

    /// Resolves when the coordinator stops on its own, e.g. after
    /// exhausting its reconnect attempts
    pub async fn closed(&mut self) -> Result<()> {
        let Some(task) = self.coordinator_task.as_mut() else {
            return std::future::pending().await;
        };
        let result = task.await;
        self.coordinator_task = None;
        flatten(result)
    }

    /// Flush buffered logs, disconnect and return the final counters
    pub async fn shutdown(self) -> Result<CoordinatorStats> {
        self.forwarder_shutdown.cancel();
        if let Err(e) = self.forwarder_task.await {
            warn!(error = %e, "log forwarder task failed");
        }

        self.shutdown.cancel();
        if let Some(task) = self.coordinator_task {
            flatten(task.await)?;
        }
        Ok(self.coordinator.handle().stats())
    }
}

fn flatten(
    result: Result<Result<(), CoordinatorError>, tokio::task::JoinError>,
) -> Result<()> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(anyhow!(e).context("hub connection failed")),
        Err(e) => Err(anyhow!("coordinator task failed: {e}")),
    }
}
