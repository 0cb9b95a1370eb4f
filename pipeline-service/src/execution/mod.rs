// Execution Engine Module
// Stage orchestration, progress deduplication, log sinks and run notifications

pub mod events;
pub mod executor;
pub mod notify;
pub mod progress;
pub mod sink;
pub mod state;

// Re-export key types
pub use events::{progress_channel, EventSender, ExecutionEvent, ProgressReceiver, ProgressSender};
pub use executor::{ExecutionResult, ExecutorConfig, FailurePolicy, PipelineExecutor, RunFailure};
pub use notify::{Notification, NotificationKind, Notifier, RecordingNotifier, TracingNotifier};
pub use progress::{classify_line, ProgressClassifier};
pub use sink::{EntryId, LogCategory, LogEntry, LogSink, MemoryLogSink, ProgressKind, TracingLogSink};
pub use state::{ExecutionSession, PipelineState, StageReport, StageStatus};
