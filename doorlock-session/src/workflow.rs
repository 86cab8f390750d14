//! Auto-Open: initialize, connect to a named lock, settle, send
//!
//! Each stage short-circuits on failure and reports which stage failed.
//! Nothing is retried here; per-byte retries happen in the transmission
//! engine.

use std::fmt;

use doorlock_transport::{ConnectionState, LockCommand, SendOutcome};
use tracing::info;

use crate::error::{LockError, WorkflowError};
use crate::session::LockSession;

/// Auto-Open stages, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStage {
    Initialize,
    Connect,
    Settle,
    Send,
}

impl fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Initialize => "initialize",
            Self::Connect => "connect",
            Self::Settle => "settle",
            Self::Send => "send",
        })
    }
}

/// Which door the workflow opens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoorKind {
    /// Per-room lock; hangs up by itself after the command
    Room,
    /// Shared entrance; the session disconnects on a timer
    Entrance,
}

/// One Auto-Open run against a named target
#[derive(Debug, Clone)]
pub struct AutoOpen {
    target: String,
    kind: DoorKind,
}

impl AutoOpen {
    pub fn room(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            kind: DoorKind::Room,
        }
    }

    pub fn entrance(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            kind: DoorKind::Entrance,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn kind(&self) -> DoorKind {
        self.kind
    }

    /// Command sent in the final stage
    pub fn command(&self) -> LockCommand {
        match self.kind {
            DoorKind::Room => LockCommand::Open,
            DoorKind::Entrance => LockCommand::EntranceOpen,
        }
    }

    pub async fn run(&self, session: &LockSession) -> Result<SendOutcome, WorkflowError> {
        self.run_observed(session, |_| {}).await
    }

    /// Run the workflow, calling `on_stage` as each stage begins
    pub async fn run_observed(
        &self,
        session: &LockSession,
        mut on_stage: impl FnMut(WorkflowStage),
    ) -> Result<SendOutcome, WorkflowError> {
        on_stage(WorkflowStage::Initialize);
        session
            .initialize()
            .await
            .map_err(|e| WorkflowError::new(WorkflowStage::Initialize, e))?;

        on_stage(WorkflowStage::Connect);
        session
            .scan_and_connect(&self.target)
            .await
            .map_err(|e| WorkflowError::new(WorkflowStage::Connect, e))?;

        on_stage(WorkflowStage::Settle);
        tokio::time::sleep(session.config().settle_delay).await;
        if session.connection_state() != ConnectionState::Connected {
            return Err(WorkflowError::new(
                WorkflowStage::Settle,
                LockError::NotConnected,
            ));
        }

        on_stage(WorkflowStage::Send);
        let outcome = session
            .send_command(&self.command())
            .await
            .map_err(|e| WorkflowError::new(WorkflowStage::Send, e))?;
        info!("Auto-open of {} finished: {:?}", self.target, outcome);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_per_door() {
        assert_eq!(AutoOpen::room("a").command(), LockCommand::Open);
        assert_eq!(
            AutoOpen::entrance("b").command(),
            LockCommand::EntranceOpen
        );
    }

    #[test]
    fn test_error_names_stage() {
        let err = WorkflowError::new(WorkflowStage::Connect, LockError::TargetNotFound("x".into()));
        assert_eq!(err.to_string(), "connect failed: Target not found: x");
    }
}
