// Pipeline Executor
// Runs enabled stages in order, one script channel at a time, with retry and cancellation

use crate::config::{substitute, validate, PipelineConfig, Stage, ValidationError, VariableValue};
use crate::error::{ServiceError, ServiceResult};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::notify::{Notification, Notifier, TracingNotifier};
use crate::execution::progress::ProgressClassifier;
use crate::execution::sink::{LogEntry, LogSink};
use crate::execution::state::{ExecutionSession, PipelineState, StageReport, StageStatus};
use crate::protocol::{close_code, OpenFrame, ScriptError, SentinelTracker, WireMessage, CANCEL_FRAME};
use crate::runners::{ChannelConnector, ChannelEvent};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What happens when a script in an `optional` stage fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Any script failure aborts the run, optional or not
    #[default]
    StrictAbort,
    /// A failing optional stage is marked `error` and the run moves on
    SkipOptional,
}

/// Configuration for pipeline execution
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Pause between one channel closing and the next opening
    pub inter_script_delay: Duration,
    /// Pause before retrying after a transport close
    pub retry_delay: Duration,
    /// Additional attempts per script after a transport close
    pub max_retries: u32,
    pub failure_policy: FailurePolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            inter_script_delay: Duration::from_secs(1),
            retry_delay: Duration::from_secs(2),
            max_retries: 3,
            failure_policy: FailurePolicy::default(),
        }
    }
}

/// Why a run ended in `Failed`
#[derive(Debug, Clone, PartialEq)]
pub enum RunFailure {
    /// Config did not validate; no channel was opened
    Validation(Vec<ValidationError>),
    /// A script failed and the run was aborted
    Script {
        stage_id: String,
        script_path: String,
        message: String,
    },
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunFailure::Validation(errors) => {
                write!(f, "configuration is invalid ({} error(s))", errors.len())
            }
            RunFailure::Script {
                stage_id,
                script_path,
                message,
            } => write!(f, "stage '{}' script '{}': {}", stage_id, script_path, message),
        }
    }
}

/// Result of pipeline execution
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub state: PipelineState,
    /// Final marker of every stage, in config order
    pub stages: Vec<StageReport>,
    /// Retries performed across the run
    pub retries: u32,
    pub failure: Option<RunFailure>,
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.state == PipelineState::Completed
    }

    pub fn stage_status(&self, stage_id: &str) -> Option<StageStatus> {
        self.stages
            .iter()
            .find(|report| report.stage_id == stage_id)
            .map(|report| report.status)
    }
}

enum RunOutcome {
    Completed,
    Cancelled,
    Failed(RunFailure),
}

struct ScriptFailure {
    script_path: String,
    error: ScriptError,
}

struct Shared {
    state: PipelineState,
    stages: Vec<StageReport>,
    cancel: Option<CancellationToken>,
}

/// Pipeline executor. One run at a time; `cancel` may be called from any task.
pub struct PipelineExecutor {
    connector: Arc<dyn ChannelConnector>,
    sink: Arc<dyn LogSink>,
    notifier: Arc<dyn Notifier>,
    config: ExecutorConfig,
    event_tx: Option<ProgressSender>,
    shared: Mutex<Shared>,
}

impl PipelineExecutor {
    pub fn new(connector: Arc<dyn ChannelConnector>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            connector,
            sink,
            notifier: Arc::new(TracingNotifier),
            config: ExecutorConfig::default(),
            event_tx: None,
            shared: Mutex::new(Shared {
                state: PipelineState::Idle,
                stages: Vec::new(),
                cancel: None,
            }),
        }
    }

    /// Set executor configuration
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        self.lock().state
    }

    pub fn stage_statuses(&self) -> Vec<StageReport> {
        self.lock().stages.clone()
    }

    /// Request cancellation of the active run.
    ///
    /// Every stage not yet completed is marked `cancelled` immediately; the
    /// active channel receives `CANCEL` and is closed by the run task.
    /// Returns `false` when no run is active.
    pub fn cancel(&self) -> bool {
        let mut shared = self.lock();
        if !shared.state.is_running() {
            return false;
        }
        let Some(token) = shared.cancel.as_ref() else {
            return false;
        };
        token.cancel();

        for report in shared.stages.iter_mut() {
            if !report.status.is_terminal() {
                report.status = StageStatus::Cancelled;
                self.event_tx
                    .send_event(ExecutionEvent::stage_status(&report.stage_id, StageStatus::Cancelled));
            }
        }
        info!("pipeline cancellation requested");
        true
    }

    /// Execute the pipeline.
    ///
    /// Only a concurrent run is an `Err`; every run outcome, including
    /// validation failure and cancellation, is reported in the result.
    pub async fn run(&self, config: &PipelineConfig) -> ServiceResult<ExecutionResult> {
        let token = self.begin(config)?;
        let start = Instant::now();
        let mut session = ExecutionSession::new(token);

        self.event_tx.send_event(ExecutionEvent::PipelineStarted {
            total_stages: config.enabled_stages().count(),
        });

        let outcome = self.drive(config, &mut session).await;
        Ok(self.finish(outcome, &session, start.elapsed()))
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn begin(&self, config: &PipelineConfig) -> ServiceResult<CancellationToken> {
        let mut shared = self.lock();
        if shared.state.is_running() {
            return Err(ServiceError::AlreadyRunning);
        }

        let token = CancellationToken::new();
        shared.state = PipelineState::Running { stage_index: 0 };
        shared.cancel = Some(token.clone());
        shared.stages = config
            .stages
            .iter()
            .map(|stage| StageReport {
                stage_id: stage.id.clone(),
                status: if stage.enabled {
                    StageStatus::Pending
                } else {
                    StageStatus::Disabled
                },
            })
            .collect();
        Ok(token)
    }

    /// Terminal markers are final for the rest of the run
    fn set_stage_status(&self, stage_id: &str, status: StageStatus) {
        let mut shared = self.lock();
        if let Some(report) = shared.stages.iter_mut().find(|r| r.stage_id == stage_id) {
            if report.status.is_terminal() || report.status == status {
                return;
            }
            report.status = status;
            self.event_tx.send_event(ExecutionEvent::stage_status(stage_id, status));
        }
    }

    fn set_state(&self, state: PipelineState) {
        self.lock().state = state;
    }

    async fn drive(&self, config: &PipelineConfig, session: &mut ExecutionSession) -> RunOutcome {
        let report = validate(config);
        if !report.is_valid() {
            for error in report.errors() {
                self.sink.append(LogEntry::error(error.to_string()));
            }
            warn!(errors = report.errors().len(), "pipeline config failed validation");
            self.event_tx.send_event(ExecutionEvent::ValidationFailed {
                errors: report.messages(),
            });
            return RunOutcome::Failed(RunFailure::Validation(report.into_errors()));
        }

        // Values are snapshotted once; edits made mid-run are not seen
        let variables = config.variable_values();
        let mut classifier = ProgressClassifier::new(self.sink.clone());
        self.sink.append(LogEntry::info("Pipeline started"));

        for (index, stage) in config.stages.iter().enumerate() {
            if !stage.enabled {
                continue;
            }
            if session.cancelled() {
                return RunOutcome::Cancelled;
            }

            session.stage_index = index;
            self.set_state(PipelineState::Running { stage_index: index });
            self.set_stage_status(&stage.id, StageStatus::Active);
            self.event_tx.send_event(ExecutionEvent::StageStarted {
                stage_id: stage.id.clone(),
                name: stage.display_name().to_string(),
                total_scripts: stage.scripts.len(),
            });
            info!(stage = %stage.id, "stage started");
            classifier.set_stage(Some(&stage.id));
            self.sink.append(
                LogEntry::info(format!("Starting stage: {}", stage.display_name()))
                    .for_stage(Some(&stage.id)),
            );

            match self.run_stage(stage, &variables, session, &mut classifier).await {
                Ok(()) => {
                    self.set_stage_status(&stage.id, StageStatus::Completed);
                    self.sink.append(
                        LogEntry::info(format!("Stage completed: {}", stage.display_name()))
                            .for_stage(Some(&stage.id)),
                    );
                }
                Err(failure) if failure.error.is_cancelled() => return RunOutcome::Cancelled,
                Err(failure) => {
                    self.set_stage_status(&stage.id, StageStatus::Error);
                    let message = failure.error.to_string();
                    self.event_tx.send_event(ExecutionEvent::ScriptFailed {
                        stage_id: stage.id.clone(),
                        script_path: failure.script_path.clone(),
                        message: message.clone(),
                    });

                    if stage.optional && self.config.failure_policy == FailurePolicy::SkipOptional {
                        warn!(stage = %stage.id, error = %message, "optional stage failed, continuing");
                        self.sink.append(
                            LogEntry::error(format!(
                                "Optional stage '{}' failed, continuing: {}",
                                stage.display_name(),
                                message
                            ))
                            .for_stage(Some(&stage.id)),
                        );
                        continue;
                    }

                    return RunOutcome::Failed(RunFailure::Script {
                        stage_id: stage.id.clone(),
                        script_path: failure.script_path,
                        message,
                    });
                }
            }
        }

        RunOutcome::Completed
    }

    async fn run_stage(
        &self,
        stage: &Stage,
        variables: &HashMap<String, VariableValue>,
        session: &mut ExecutionSession,
        classifier: &mut ProgressClassifier,
    ) -> Result<(), ScriptFailure> {
        for (script_index, script) in stage.scripts.iter().enumerate() {
            session.script_index = script_index;
            let fail = |error: ScriptError| ScriptFailure {
                script_path: script.path.clone(),
                error,
            };

            if session.channels_opened > 0
                && !pause(self.config.inter_script_delay, session.token()).await
            {
                return Err(fail(ScriptError::Cancelled));
            }

            let args = substitute(&script.args, variables);
            self.run_with_retry(&stage.id, &script.path, &args, session, classifier)
                .await
                .map_err(fail)?;

            if session.cancelled() {
                return Err(fail(ScriptError::Cancelled));
            }
        }
        Ok(())
    }

    async fn run_with_retry(
        &self,
        stage_id: &str,
        script_path: &str,
        args: &[String],
        session: &mut ExecutionSession,
        classifier: &mut ProgressClassifier,
    ) -> Result<(), ScriptError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            self.event_tx.send_event(ExecutionEvent::ScriptStarted {
                stage_id: stage_id.to_string(),
                script_path: script_path.to_string(),
                args: args.to_vec(),
                attempt,
            });
            let started = Instant::now();

            match self.run_script(script_path, args, session, classifier).await {
                Ok(()) => {
                    self.event_tx.send_event(ExecutionEvent::ScriptCompleted {
                        stage_id: stage_id.to_string(),
                        script_path: script_path.to_string(),
                        duration: started.elapsed(),
                    });
                    return Ok(());
                }
                Err(error)
                    if error.is_transport_closed()
                        && attempt <= self.config.max_retries
                        && !session.cancelled() =>
                {
                    session.retry_count += 1;
                    warn!(script = %script_path, attempt, error = %error, "transport closed, retrying");
                    self.sink.append(
                        LogEntry::info(format!(
                            "Connection lost, retrying {} ({}/{})",
                            script_path, attempt, self.config.max_retries
                        ))
                        .for_stage(Some(stage_id)),
                    );
                    self.event_tx.send_event(ExecutionEvent::ScriptRetry {
                        stage_id: stage_id.to_string(),
                        script_path: script_path.to_string(),
                        attempt,
                        reason: error.to_string(),
                    });

                    if !pause(self.config.retry_delay, session.token()).await {
                        return Err(ScriptError::Cancelled);
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// One channel, one script: open, send the open frame, consume until close
    async fn run_script(
        &self,
        script_path: &str,
        args: &[String],
        session: &mut ExecutionSession,
        classifier: &mut ProgressClassifier,
    ) -> Result<(), ScriptError> {
        let token = session.token().clone();

        let connected = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(ScriptError::Cancelled),
            result = self.connector.connect() => result,
        };
        let mut channel = connected.map_err(|e| ScriptError::Transport(e.to_string()))?;
        session.channels_opened += 1;

        let frame = OpenFrame::new(script_path, args.to_vec());
        let payload = serde_json::to_string(&frame).map_err(|e| ScriptError::Failed(e.to_string()))?;
        channel
            .send_text(payload)
            .await
            .map_err(|e| ScriptError::Transport(e.to_string()))?;
        debug!(script = %script_path, ?args, "open frame sent");

        let mut tracker = SentinelTracker::default();
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    // the worker may already be gone; cancellation stands either way
                    let _ = channel.send_text(CANCEL_FRAME.to_string()).await;
                    let _ = channel.close(close_code::USER_CANCELLED, "cancelled by user").await;
                    return Err(ScriptError::Cancelled);
                }
                event = channel.recv() => match event {
                    ChannelEvent::Text(text) => {
                        let message = WireMessage::decode(&text);
                        tracker.observe(&message);
                        classifier.handle(&message);
                    }
                    ChannelEvent::Closed { code, reason } => {
                        debug!(script = %script_path, code, reason = %reason, "channel closed");
                        return tracker.resolve(code, &reason);
                    }
                },
            }
        }
    }

    fn finish(&self, outcome: RunOutcome, session: &ExecutionSession, duration: Duration) -> ExecutionResult {
        let (state, failure, notification) = match outcome {
            RunOutcome::Completed => (
                PipelineState::Completed,
                None,
                Notification::success("Pipeline completed successfully"),
            ),
            RunOutcome::Cancelled => (
                PipelineState::Cancelled,
                None,
                Notification::cancelled("Pipeline cancelled by user"),
            ),
            RunOutcome::Failed(failure) => {
                let message = format!("Pipeline failed: {}", failure);
                (PipelineState::Failed, Some(failure), Notification::failed(message))
            }
        };

        let stages = {
            let mut shared = self.lock();
            if state != PipelineState::Completed {
                for report in shared.stages.iter_mut() {
                    if !report.status.is_terminal() {
                        report.status = StageStatus::Cancelled;
                        self.event_tx
                            .send_event(ExecutionEvent::stage_status(&report.stage_id, StageStatus::Cancelled));
                    }
                }
            }
            shared.state = state;
            shared.cancel = None;
            shared.stages.clone()
        };

        match state {
            PipelineState::Completed => self.sink.append(LogEntry::info("Pipeline completed")),
            PipelineState::Cancelled => self.sink.append(LogEntry::info("Pipeline cancelled")),
            _ => self.sink.append(LogEntry::error(notification.message.clone())),
        };
        info!(%state, retries = session.retry_count, ?duration, "pipeline finished");

        self.notifier.notify(notification);
        self.event_tx
            .send_event(ExecutionEvent::pipeline_completed(state, duration));

        ExecutionResult {
            state,
            stages,
            retries: session.retry_count,
            failure,
            duration,
        }
    }
}

/// Sleep unless cancelled first; `false` means the token fired
async fn pause(duration: Duration, token: &CancellationToken) -> bool {
    if duration.is_zero() {
        return !token.is_cancelled();
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
