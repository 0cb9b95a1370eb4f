// Execution State
// Run states, per-stage progress markers and the per-run session

use tokio_util::sync::CancellationToken;

use std::fmt;

/// Progress marker of one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Pending,
    Active,
    Completed,
    Error,
    Cancelled,
    /// Stage is switched off in the config; never run or re-marked
    Disabled,
}

impl StageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StageStatus::Completed | StageStatus::Error | StageStatus::Cancelled | StageStatus::Disabled
        )
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StageStatus::Pending => "pending",
            StageStatus::Active => "active",
            StageStatus::Completed => "completed",
            StageStatus::Error => "error",
            StageStatus::Cancelled => "cancelled",
            StageStatus::Disabled => "disabled",
        };
        write!(f, "{}", label)
    }
}

/// Executor state machine: `Idle -> Running -> {Completed, Failed, Cancelled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running { stage_index: usize },
    Completed,
    Failed,
    Cancelled,
}

impl PipelineState {
    pub fn is_running(self) -> bool {
        matches!(self, PipelineState::Running { .. })
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "idle"),
            PipelineState::Running { stage_index } => write!(f, "running (stage {})", stage_index + 1),
            PipelineState::Completed => write!(f, "completed"),
            PipelineState::Failed => write!(f, "failed"),
            PipelineState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Stage id with its current marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage_id: String,
    pub status: StageStatus,
}

/// Runtime state of one run. Created at run start, dropped at run end.
#[derive(Debug)]
pub struct ExecutionSession {
    pub stage_index: usize,
    pub script_index: usize,
    /// Retries performed across the whole run
    pub retry_count: u32,
    /// Channels opened so far; the inter-script delay applies from the second on
    pub channels_opened: usize,
    cancel: CancellationToken,
}

impl ExecutionSession {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            stage_index: 0,
            script_index: 0,
            retry_count: 0,
            channels_opened: 0,
            cancel,
        }
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}
