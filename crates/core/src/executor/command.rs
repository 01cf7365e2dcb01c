//! Command executor
//!
//! Runs a shell command for actions that declare one, either as a
//! `command` property or as `instrument.command`. The child is killed when
//! the execution is cancelled.

use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use super::result::codes;
use super::{ExecutionContext, ExecutionError, ExecutionResult, Executor};
use crate::action::SemanticScheduledAction;

/// Executes actions as local shell commands
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    shell: String,
    working_dir: Option<std::path::PathBuf>,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            working_dir: None,
        }
    }
}

impl CommandExecutor {
    pub const NAME: &'static str = "command";

    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different shell (invoked as `<shell> -c <command>`)
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Command line declared by the action
    pub fn command_for(action: &SemanticScheduledAction) -> Option<String> {
        if let Some(command) = action.action.property_str("command") {
            return Some(command.to_string());
        }
        match &action.action.instrument {
            Some(Value::Object(map)) => map.get("command").and_then(Value::as_str),
            _ => None,
        }
        .map(str::to_string)
    }

    async fn run(&self, command_line: &str) -> Result<ExecutionResult, ExecutionError> {
        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        tracing::debug!(command = command_line, "spawning command");

        let output = command.output().await.map_err(|e| {
            ExecutionError::new(
                codes::COMMAND_SPAWN_FAILED,
                format!("failed to start {}: {e}", self.shell),
            )
        })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let exit_code = output.status.code();

        if output.status.success() {
            Ok(ExecutionResult::completed(combined).with_metadata("exit_code", exit_code.unwrap_or(0)))
        } else {
            Err(ExecutionError::new(
                codes::COMMAND_FAILED,
                match exit_code {
                    Some(code) => format!("command exited with status {code}"),
                    None => "command terminated by signal".to_string(),
                },
            )
            .with_details(serde_json::json!({
                "exit_code": exit_code,
                "output": combined,
            })))
        }
    }
}

#[async_trait]
impl Executor for CommandExecutor {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn can_handle(&self, action: &SemanticScheduledAction) -> bool {
        Self::command_for(action).is_some_and(|c| !c.trim().is_empty())
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        action: &SemanticScheduledAction,
    ) -> Result<ExecutionResult, ExecutionError> {
        let command_line = Self::command_for(action).ok_or_else(|| {
            ExecutionError::new(codes::INVALID_ACTION, "action declares no command")
        })?;

        // Dropping the run future drops the child, which kill_on_drop terminates
        tokio::select! {
            _ = ctx.cancelled() => Err(ExecutionError::cancelled()),
            result = self.run(&command_line) => result,
        }
    }
}
