// Coordinator against an in-process hub
//
// Drives the full connection lifecycle through ChannelConnector: handshake,
// registration, phase reporting, remote commands, reconnects and shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use schemaflow_coordinator::backoff::ReconnectConfig;
use schemaflow_coordinator::handlers::{HandlerContext, HandlerError, MessageHandler};
use schemaflow_coordinator::prelude::*;
use schemaflow_coordinator::protocol::{PhaseChangedPayload, RegisterPayload};
use schemaflow_coordinator::{
    ChannelHub, ConnectionEvent, ConnectionListener, CoordinatorError, HubConnection,
};
use serde_json::json;
use test_log::test;
use tokio::task::JoinHandle;

#[derive(Default)]
struct EventRecorder {
    events: Mutex<Vec<ConnectionEvent>>,
}

impl ConnectionListener for EventRecorder {
    fn on_connection_event(&self, event: &ConnectionEvent) {
        self.events.lock().push(event.clone());
    }
}

#[derive(Default)]
struct CountingHandler {
    calls: AtomicUsize,
}

#[async_trait]
impl MessageHandler for CountingHandler {
    async fn handle(&self, _ctx: &HandlerContext, message: &WsMessage) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if message.payload["fail"] == true {
            return Err(HandlerError::Failed("asked to fail".into()));
        }
        Ok(())
    }
}

fn config() -> CoordinatorConfig {
    CoordinatorConfig::default()
        .with_service_name("runner")
        .with_service_id("runner-1")
        .with_capabilities(vec!["http".into(), "command".into()])
        .with_heartbeat_interval(Duration::ZERO)
        .with_reconnect(
            ReconnectConfig::default()
                .with_initial_delay(Duration::from_millis(100))
                .with_max_delay(Duration::from_secs(1)),
        )
}

fn spawn(
    coordinator: Arc<Coordinator>,
) -> (CancellationToken, JoinHandle<Result<(), CoordinatorError>>) {
    let shutdown = CancellationToken::new();
    let task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { coordinator.run(shutdown).await }
    });
    (shutdown, task)
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

/// Accept a connection, check the registration frame and acknowledge it
async fn accept_registered(hub: &mut ChannelHub, handle: &CoordinatorHandle) -> HubConnection {
    let mut connection = hub.accept().await.expect("hub closed");
    let register = connection.recv().await.expect("no registration");
    assert_eq!(register.message_type, MessageType::Register);

    connection.send(&WsMessage::new(MessageType::Registered, json!({})));
    wait_for(|| handle.is_registered()).await;
    connection
}

#[test(tokio::test)]
async fn test_registration_phase_reporting_and_commands() {
    let (connector, mut hub) = ChannelConnector::pair();
    let phases = Arc::new(PhaseManager::new());
    let recorder = Arc::new(EventRecorder::default());
    let coordinator = Arc::new(
        Coordinator::new(config(), Arc::new(connector), phases.clone())
            .with_listener(recorder.clone()),
    );
    let handle = coordinator.handle();
    let (shutdown, task) = spawn(coordinator);

    let mut connection = hub.accept().await.unwrap();
    assert_eq!(connection.identity.service_id, "runner-1");

    let register = connection.recv().await.unwrap();
    let payload: RegisterPayload = register.payload_as().unwrap();
    assert_eq!(payload.service_name, "runner");
    assert_eq!(payload.capabilities, vec!["http", "command"]);

    connection.send(&WsMessage::new(MessageType::Registered, json!({})));
    wait_for(|| handle.is_registered()).await;

    // Local transition reaches the hub
    phases.start("wf").unwrap();
    let changed = connection.recv().await.unwrap();
    assert_eq!(changed.message_type, MessageType::PhaseChanged);
    assert_eq!(changed.workflow_id.as_deref(), Some("wf"));
    let payload: PhaseChangedPayload = changed.payload_as().unwrap();
    assert_eq!(payload.to, Phase::Active);

    // Status query is answered with the same correlation id
    let status = WsMessage::new(MessageType::Status, json!({"workflow_id": "wf"}));
    connection.send(&status);
    let reply = connection.recv().await.unwrap();
    assert_eq!(reply.message_type, MessageType::StatusResponse);
    assert_eq!(reply.id, status.id);
    assert_eq!(reply.payload["state"]["phase"], "active");

    // Remote pause, addressed through the envelope
    connection.send(
        &WsMessage::new(MessageType::Pause, json!({"reason": "maintenance"})).with_workflow_id("wf"),
    );
    let changed = connection.recv().await.unwrap();
    let payload: PhaseChangedPayload = changed.payload_as().unwrap();
    assert_eq!(payload.from, Some(Phase::Active));
    assert_eq!(payload.to, Phase::Paused);
    assert_eq!(payload.reason.as_deref(), Some("maintenance"));
    assert_eq!(phases.get("wf").unwrap().phase, Phase::Paused);

    // Garbage and unknown types are ignored; the connection stays up
    connection.send_raw("this is not json");
    connection.send(&WsMessage::new("deploy", json!({"image": "x"})));
    let ping = WsMessage::ping();
    connection.send(&ping);
    let pong = connection.recv().await.unwrap();
    assert_eq!(pong.message_type, MessageType::Pong);
    assert_eq!(pong.id, ping.id);

    // Outbound helpers
    assert!(handle.report_progress("wf", 0.5, Some("render".into())).is_queued());
    let progress = connection.recv().await.unwrap();
    assert_eq!(progress.message_type, MessageType::Progress);
    assert_eq!(progress.payload["current_action"], "render");

    shutdown.cancel();
    task.await.unwrap().unwrap();

    let stats = handle.stats();
    assert_eq!(stats.connections, 1);
    assert_eq!(stats.handler_errors, 0);
    assert!(!handle.is_connected());

    let events = recorder.events.lock().clone();
    assert_eq!(events.len(), 3);
    assert!(matches!(events[0], ConnectionEvent::Connected { .. }));
    assert_eq!(events[1], ConnectionEvent::Registered);
    assert_eq!(
        events[2],
        ConnectionEvent::Disconnected {
            reason: "shutdown".into()
        }
    );
}

#[test(tokio::test(start_paused = true))]
async fn test_reconnect_resyncs_active_workflows() {
    let (connector, mut hub) = ChannelConnector::pair();
    connector.refuse_next(2);
    let phases = Arc::new(PhaseManager::new());
    let coordinator = Arc::new(Coordinator::new(config(), Arc::new(connector), phases.clone()));
    let handle = coordinator.handle();
    let (shutdown, task) = spawn(coordinator);

    let first = accept_registered(&mut hub, &handle).await;
    assert_eq!(handle.stats().failed_attempts, 2);

    phases.start("wf").unwrap();
    drop(first);
    wait_for(|| !handle.is_connected()).await;

    // Missed while disconnected
    phases.pause("wf", Some("operator".into())).unwrap();
    assert!(handle.stats().dropped_disconnected >= 1);

    let mut second = accept_registered(&mut hub, &handle).await;
    let resync = second.recv().await.unwrap();
    assert_eq!(resync.message_type, MessageType::PhaseChanged);
    let payload: PhaseChangedPayload = resync.payload_as().unwrap();
    assert_eq!(payload.workflow_id, "wf");
    assert_eq!(payload.to, Phase::Paused);
    assert_eq!(payload.from, Some(Phase::Active));

    assert_eq!(handle.stats().connections, 2);

    shutdown.cancel();
    task.await.unwrap().unwrap();
}

#[test(tokio::test(start_paused = true))]
async fn test_gives_up_after_max_attempts() {
    let (connector, _hub) = ChannelConnector::pair();
    connector.refuse_next(10);
    let config = config().with_reconnect(
        ReconnectConfig::default()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_attempts(2),
    );
    let coordinator = Coordinator::new(config, Arc::new(connector), Arc::new(PhaseManager::new()));

    let err = coordinator.run(CancellationToken::new()).await.unwrap_err();

    assert!(matches!(
        err,
        CoordinatorError::RetriesExhausted { attempts: 2, .. }
    ));
    assert_eq!(coordinator.handle().stats().failed_attempts, 3);
}

#[test(tokio::test(start_paused = true))]
async fn test_heartbeat_pings_on_interval() {
    let (connector, mut hub) = ChannelConnector::pair();
    let coordinator = Arc::new(Coordinator::new(
        config().with_heartbeat_interval(Duration::from_secs(5)),
        Arc::new(connector),
        Arc::new(PhaseManager::new()),
    ));
    let handle = coordinator.handle();
    let (shutdown, task) = spawn(coordinator);

    let mut connection = accept_registered(&mut hub, &handle).await;
    let started = tokio::time::Instant::now();
    let ping = connection.recv().await.unwrap();

    assert_eq!(ping.message_type, MessageType::Ping);
    assert!(started.elapsed() <= Duration::from_secs(5));

    shutdown.cancel();
    task.await.unwrap().unwrap();
}

#[test(tokio::test)]
async fn test_custom_handler_errors_are_counted_not_fatal() {
    let (connector, mut hub) = ChannelConnector::pair();
    let handler = Arc::new(CountingHandler::default());
    let coordinator = Arc::new(
        Coordinator::new(config(), Arc::new(connector), Arc::new(PhaseManager::new()))
            .with_handler("deploy", handler.clone()),
    );
    let handle = coordinator.handle();
    let (shutdown, task) = spawn(coordinator);

    let mut connection = accept_registered(&mut hub, &handle).await;
    connection.send(&WsMessage::new("deploy", json!({"fail": true})));
    connection.send(&WsMessage::new("deploy", json!({})));
    connection.send(&WsMessage::ping());
    assert_eq!(connection.recv().await.unwrap().message_type, MessageType::Pong);

    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    assert_eq!(handle.stats().handler_errors, 1);
    assert!(handle.is_connected());

    shutdown.cancel();
    task.await.unwrap().unwrap();
}

#[test(tokio::test)]
async fn test_second_run_is_rejected() {
    let (connector, _hub) = ChannelConnector::pair();
    let coordinator = Arc::new(Coordinator::new(
        config(),
        Arc::new(connector),
        Arc::new(PhaseManager::new()),
    ));
    let handle = coordinator.handle();
    let (shutdown, task) = spawn(coordinator.clone());
    wait_for(|| handle.is_connected()).await;

    let err = coordinator.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::AlreadyRunning));

    shutdown.cancel();
    task.await.unwrap().unwrap();
}
