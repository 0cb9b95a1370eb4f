// Training Pipeline Library
// Pipeline config model, execution-channel protocol, executor and reference worker

pub mod config;
pub mod error;
pub mod execution;
pub mod protocol;
pub mod runners;
pub mod worker;

// Re-export commonly used types
pub use error::{ServiceError, ServiceResult};

// Re-export config types
pub use config::{
    substitute, validate, ConfigDocument, ConfigStore, FileConfigStore, HttpConfigStore, PipelineConfig,
    ScriptInvocation, Stage, ValidationError, ValidationReport, Variable, VariableType,
    VariableValue,
};

// Re-export execution types
pub use execution::{
    progress_channel, ExecutionEvent, ExecutionResult, ExecutorConfig, FailurePolicy, LogEntry,
    LogSink, Notifier, PipelineExecutor, PipelineState, ProgressSender, StageStatus,
};

// Re-export protocol and runner types
pub use protocol::{ScriptError, WireMessage};
pub use runners::{ChannelConnector, ExecutionChannel, WebSocketConnector};
