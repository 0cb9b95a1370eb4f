// Execution Events
// Progress reporting and event types for pipeline execution

use crate::execution::state::{PipelineState, StageStatus};

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Pipeline execution started
    PipelineStarted { total_stages: usize },

    /// Pipeline run reached a terminal state
    PipelineCompleted {
        state: PipelineState,
        duration: Duration,
    },

    /// Config failed validation; no script was started
    ValidationFailed { errors: Vec<String> },

    /// Stage became active
    StageStarted {
        stage_id: String,
        name: String,
        total_scripts: usize,
    },

    /// Stage marker changed
    StageStatusChanged {
        stage_id: String,
        status: StageStatus,
    },

    /// Channel opened for a script
    ScriptStarted {
        stage_id: String,
        script_path: String,
        args: Vec<String>,
        attempt: u32,
    },

    /// Script channel resolved successfully
    ScriptCompleted {
        stage_id: String,
        script_path: String,
        duration: Duration,
    },

    /// Transient connection failure; the script will be retried
    ScriptRetry {
        stage_id: String,
        script_path: String,
        attempt: u32,
        reason: String,
    },

    /// Script failed; the run aborts unless the stage failure is tolerated
    ScriptFailed {
        stage_id: String,
        script_path: String,
        message: String,
    },
}

impl ExecutionEvent {
    /// Create a stage status event
    pub fn stage_status(stage_id: impl Into<String>, status: StageStatus) -> Self {
        Self::StageStatusChanged {
            stage_id: stage_id.into(),
            status,
        }
    }

    /// Create a pipeline completed event
    pub fn pipeline_completed(state: PipelineState, duration: Duration) -> Self {
        Self::PipelineCompleted { state, duration }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_progress_channel() {
        let (tx, mut rx) = progress_channel();

        tx.send_event(ExecutionEvent::PipelineStarted { total_stages: 2 });
        tx.send_event(ExecutionEvent::stage_status("train", StageStatus::Active));

        let event1 = rx.recv().await.unwrap();
        assert!(matches!(event1, ExecutionEvent::PipelineStarted { total_stages: 2 }));

        let event2 = rx.recv().await.unwrap();
        assert!(matches!(
            event2,
            ExecutionEvent::StageStatusChanged { status: StageStatus::Active, .. }
        ));
    }

    #[test]
    fn test_optional_sender() {
        let sender: Option<ProgressSender> = None;
        // Should not panic
        sender.send_event(ExecutionEvent::PipelineStarted { total_stages: 0 });
    }
}
