//! Inbound message handlers
//!
//! The coordinator routes every inbound envelope to the handler registered
//! for its type. Handler errors are logged and counted; they never close the
//! connection.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::coordinator::CoordinatorHandle;
use crate::phase::{PhaseError, PhaseManager};
use crate::protocol::{
    ControlPayload, MessageType, PhaseChangedPayload, StatusResponsePayload, WsMessage,
};

/// Handler errors
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{message_type} message carries no workflow_id")]
    MissingWorkflowId { message_type: MessageType },

    #[error("invalid {message_type} payload: {source}")]
    InvalidPayload {
        message_type: MessageType,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Phase(#[from] PhaseError),

    #[error("{0}")]
    Failed(String),
}

/// What a handler can reach
#[derive(Clone)]
pub struct HandlerContext {
    pub phases: Arc<PhaseManager>,
    pub handle: CoordinatorHandle,
}

/// Handles one inbound message type
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, ctx: &HandlerContext, message: &WsMessage) -> Result<(), HandlerError>;
}

/// Handler table keyed by message type
pub type HandlerTable = HashMap<MessageType, Arc<dyn MessageHandler>>;

/// Handlers for pong, registered, pause, resume, cancel, status and ping
pub fn default_handlers() -> HandlerTable {
    let mut table: HandlerTable = HashMap::new();
    table.insert(MessageType::Ping, Arc::new(PingHandler));
    table.insert(MessageType::Pong, Arc::new(PongHandler));
    table.insert(MessageType::Registered, Arc::new(RegisteredHandler));
    table.insert(
        MessageType::Pause,
        Arc::new(ControlHandler::new(ControlCommand::Pause)),
    );
    table.insert(
        MessageType::Resume,
        Arc::new(ControlHandler::new(ControlCommand::Resume)),
    );
    table.insert(
        MessageType::Cancel,
        Arc::new(ControlHandler::new(ControlCommand::Cancel)),
    );
    table.insert(MessageType::Status, Arc::new(StatusHandler));
    table
}

fn control_payload(message: &WsMessage) -> Result<ControlPayload, HandlerError> {
    if message.payload.is_null() {
        return Ok(ControlPayload::default());
    }
    message
        .payload_as()
        .map_err(|source| HandlerError::InvalidPayload {
            message_type: message.message_type.clone(),
            source,
        })
}

fn require_workflow(message: &WsMessage) -> Result<String, HandlerError> {
    message
        .target_workflow()
        .map(str::to_string)
        .ok_or_else(|| HandlerError::MissingWorkflowId {
            message_type: message.message_type.clone(),
        })
}

// ============================================================================
// Default handlers
// ============================================================================

/// Answers `ping` with a correlated `pong`
pub struct PingHandler;

#[async_trait]
impl MessageHandler for PingHandler {
    async fn handle(&self, ctx: &HandlerContext, message: &WsMessage) -> Result<(), HandlerError> {
        ctx.handle.send(WsMessage::reply_to(
            message,
            MessageType::Pong,
            Value::Object(Default::default()),
        ));
        Ok(())
    }
}

/// Heartbeat replies
pub struct PongHandler;

#[async_trait]
impl MessageHandler for PongHandler {
    async fn handle(&self, _ctx: &HandlerContext, message: &WsMessage) -> Result<(), HandlerError> {
        debug!(id = %message.id, "heartbeat acknowledged");
        Ok(())
    }
}

/// Re-announces every non-terminal workflow once registration is acknowledged
pub struct RegisteredHandler;

#[async_trait]
impl MessageHandler for RegisteredHandler {
    async fn handle(&self, ctx: &HandlerContext, _message: &WsMessage) -> Result<(), HandlerError> {
        let active = ctx.phases.active_workflows();
        info!(workflows = active.len(), "registration acknowledged, resyncing phases");

        for state in active {
            let payload = PhaseChangedPayload {
                workflow_id: state.workflow_id.clone(),
                from: state.previous,
                to: state.phase,
                checkpoint_id: state.checkpoint_id,
                reason: state.reason,
            };
            let message = WsMessage::with_payload(MessageType::PhaseChanged, &payload)
                .map_err(|e| HandlerError::Failed(e.to_string()))?
                .with_workflow_id(state.workflow_id);
            ctx.handle.send(message);
        }
        Ok(())
    }
}

/// Remote lifecycle commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Pause,
    Resume,
    Cancel,
}

/// Forwards pause/resume/cancel to the phase manager
pub struct ControlHandler {
    command: ControlCommand,
}

impl ControlHandler {
    pub fn new(command: ControlCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl MessageHandler for ControlHandler {
    async fn handle(&self, ctx: &HandlerContext, message: &WsMessage) -> Result<(), HandlerError> {
        let payload = control_payload(message)?;
        let workflow_id = require_workflow(message)?;
        info!(workflow_id = %workflow_id, command = ?self.command, "remote command received");

        match self.command {
            ControlCommand::Pause => ctx.phases.pause(&workflow_id, payload.reason)?,
            ControlCommand::Resume => ctx.phases.resume(&workflow_id)?,
            ControlCommand::Cancel => ctx.phases.cancel(&workflow_id, payload.reason)?,
        };
        Ok(())
    }
}

/// Replies to `status` with a correlated `status_response`
pub struct StatusHandler;

#[async_trait]
impl MessageHandler for StatusHandler {
    async fn handle(&self, ctx: &HandlerContext, message: &WsMessage) -> Result<(), HandlerError> {
        let workflow_id = require_workflow(message)?;
        let state = ctx.phases.get(&workflow_id);

        let payload = StatusResponsePayload {
            workflow_id,
            found: state.is_some(),
            state,
        };
        let payload =
            serde_json::to_value(&payload).map_err(|e| HandlerError::Failed(e.to_string()))?;
        ctx.handle.send(WsMessage::reply_to(
            message,
            MessageType::StatusResponse,
            payload,
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::Phase;
    use crate::transport::ServiceIdentity;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn context() -> (HandlerContext, mpsc::Receiver<WsMessage>) {
        let handle = CoordinatorHandle::new(ServiceIdentity::new("runner", "runner-1"));
        let outbound = handle.attach(16);
        (
            HandlerContext {
                phases: Arc::new(PhaseManager::new()),
                handle,
            },
            outbound,
        )
    }

    #[tokio::test]
    async fn test_control_uses_envelope_workflow_id() {
        let (ctx, _outbound) = context();
        ctx.phases.start("wf").unwrap();

        let pause = WsMessage::new(MessageType::Pause, json!({"reason": "maintenance"}))
            .with_workflow_id("wf");
        ControlHandler::new(ControlCommand::Pause)
            .handle(&ctx, &pause)
            .await
            .unwrap();

        let state = ctx.phases.get("wf").unwrap();
        assert_eq!(state.phase, Phase::Paused);
        assert_eq!(state.reason.as_deref(), Some("maintenance"));
    }

    #[tokio::test]
    async fn test_control_without_workflow_fails() {
        let (ctx, _outbound) = context();
        let err = ControlHandler::new(ControlCommand::Cancel)
            .handle(&ctx, &WsMessage::new(MessageType::Cancel, Value::Null))
            .await
            .unwrap_err();

        assert!(matches!(err, HandlerError::MissingWorkflowId { .. }));
    }

    #[tokio::test]
    async fn test_illegal_command_surfaces_phase_error() {
        let (ctx, _outbound) = context();
        ctx.phases.start("wf").unwrap();
        ctx.phases.complete("wf").unwrap();

        let resume = WsMessage::new(MessageType::Resume, json!({"workflow_id": "wf"}));
        let err = ControlHandler::new(ControlCommand::Resume)
            .handle(&ctx, &resume)
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Phase(PhaseError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_control_for_unknown_workflow_is_rejected() {
        let (ctx, _outbound) = context();

        for (command, message_type) in [
            (ControlCommand::Resume, MessageType::Resume),
            (ControlCommand::Pause, MessageType::Pause),
            (ControlCommand::Cancel, MessageType::Cancel),
        ] {
            let message = WsMessage::new(message_type, json!({})).with_workflow_id("ghost");
            let err = ControlHandler::new(command)
                .handle(&ctx, &message)
                .await
                .unwrap_err();
            assert!(matches!(err, HandlerError::Phase(PhaseError::NotFound(_))));
        }
        assert!(ctx.phases.get("ghost").is_none());
    }

    #[tokio::test]
    async fn test_resume_of_pending_workflow_is_rejected() {
        let (ctx, _outbound) = context();
        ctx.phases.track("wf");

        let resume = WsMessage::new(MessageType::Resume, json!({})).with_workflow_id("wf");
        let err = ControlHandler::new(ControlCommand::Resume)
            .handle(&ctx, &resume)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            HandlerError::Phase(PhaseError::InvalidTransition {
                from: Phase::Potential,
                to: Phase::Active,
                ..
            })
        ));
        assert_eq!(ctx.phases.get("wf").unwrap().phase, Phase::Potential);
    }

    #[tokio::test]
    async fn test_status_reply_is_correlated() {
        let (ctx, mut outbound) = context();
        ctx.phases.start("wf").unwrap();

        let request = WsMessage::new(MessageType::Status, json!({"workflow_id": "wf"}));
        StatusHandler.handle(&ctx, &request).await.unwrap();

        let reply = outbound.recv().await.unwrap();
        assert_eq!(reply.id, request.id);
        assert_eq!(reply.message_type, MessageType::StatusResponse);
        let payload: StatusResponsePayload = reply.payload_as().unwrap();
        assert!(payload.found);
        assert_eq!(payload.state.unwrap().phase, Phase::Active);

        let missing = WsMessage::new(MessageType::Status, json!({"workflow_id": "nope"}));
        StatusHandler.handle(&ctx, &missing).await.unwrap();
        let payload: StatusResponsePayload = outbound.recv().await.unwrap().payload_as().unwrap();
        assert!(!payload.found);
    }

    #[tokio::test]
    async fn test_registered_resyncs_active_workflows() {
        let (ctx, mut outbound) = context();
        ctx.phases.start("running").unwrap();
        ctx.phases.start("done").unwrap();
        ctx.phases.complete("done").unwrap();

        RegisteredHandler
            .handle(&ctx, &WsMessage::new(MessageType::Registered, json!({})))
            .await
            .unwrap();

        let resync = outbound.recv().await.unwrap();
        assert_eq!(resync.message_type, MessageType::PhaseChanged);
        assert_eq!(resync.workflow_id.as_deref(), Some("running"));
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ping_answered_with_pong() {
        let (ctx, mut outbound) = context();
        let ping = WsMessage::ping();
        PingHandler.handle(&ctx, &ping).await.unwrap();

        let pong = outbound.recv().await.unwrap();
        assert_eq!(pong.message_type, MessageType::Pong);
        assert_eq!(pong.id, ping.id);
    }

    #[test]
    fn test_default_table_covers_control_types() {
        let table = default_handlers();
        for message_type in [
            MessageType::Ping,
            MessageType::Pong,
            MessageType::Registered,
            MessageType::Pause,
            MessageType::Resume,
            MessageType::Cancel,
            MessageType::Status,
        ] {
            assert!(table.contains_key(&message_type), "{message_type}");
        }
        assert!(!table.contains_key(&MessageType::Logs));
    }
}
