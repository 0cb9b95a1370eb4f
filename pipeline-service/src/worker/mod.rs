// Worker Module
// Reference execution endpoint: runs scripts for execution channels and serves the config API

pub mod api;
pub mod memory;
pub mod process;
pub mod session;

// Re-export key types
pub use memory::{parse_meminfo, MemoryError, MemorySnapshot};
pub use process::{OutputCodec, ScriptCommand, ScriptProcess};
pub use session::{run_session, SessionEnd};

use crate::config::{ConfigStore, FileConfigStore};
use crate::error::{ServiceError, ServiceResult};
use crate::protocol::{route_matches, EXECUTE_ROUTE, LOAD_ROUTE, SAVE_ROUTE};

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{State, WebSocketUpgrade};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Configuration for the worker endpoint
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub listen: String,
    /// Execution route; also accepted under a path prefix
    pub route: String,
    /// Interpreter name or path, resolved on `PATH` at startup
    pub interpreter: String,
    pub interpreter_args: Vec<String>,
    /// Directory scripts run in; defaults to the worker's own
    pub working_dir: Option<PathBuf>,
    /// Document served by the config API
    pub pipeline_config: PathBuf,
    /// Silence after which a heartbeat is sent
    pub heartbeat_interval: Duration,
    pub memory_interval: Duration,
    /// Time a cancelled script gets to exit before it is killed
    pub terminate_grace: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3001".to_string(),
            route: EXECUTE_ROUTE.to_string(),
            interpreter: "python3".to_string(),
            interpreter_args: vec!["-u".to_string()],
            working_dir: None,
            pipeline_config: FileConfigStore::default_path(),
            heartbeat_interval: Duration::from_secs(30),
            memory_interval: Duration::from_secs(300),
            terminate_grace: Duration::from_secs(5),
        }
    }
}

impl WorkerConfig {
    pub fn with_listen(mut self, listen: impl Into<String>) -> Self {
        self.listen = listen.into();
        self
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>, args: Vec<String>) -> Self {
        self.interpreter = interpreter.into();
        self.interpreter_args = args;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_pipeline_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.pipeline_config = path.into();
        self
    }
}

/// Shared by every request handler
#[derive(Clone)]
pub(crate) struct WorkerState {
    pub config: Arc<WorkerConfig>,
    pub interpreter: Arc<PathBuf>,
    pub store: Arc<dyn ConfigStore>,
}

/// Execution endpoint. Each channel runs one script.
pub struct Worker {
    state: WorkerState,
}

impl Worker {
    /// Fails when the interpreter cannot be found
    pub fn new(config: WorkerConfig) -> ServiceResult<Self> {
        let interpreter = which::which(&config.interpreter)
            .map_err(|_| ServiceError::InterpreterNotFound(config.interpreter.clone()))?;
        debug!(interpreter = %interpreter.display(), "interpreter resolved");
        let store = Arc::new(FileConfigStore::new(config.pipeline_config.clone()));
        Ok(Self {
            state: WorkerState {
                config: Arc::new(config),
                interpreter: Arc::new(interpreter),
                store,
            },
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.state.config
    }

    /// Config API routes plus the execution route as fallback, so that
    /// prefixed mounts of the execution route are accepted too
    pub fn router(&self) -> Router {
        Router::new()
            .route(LOAD_ROUTE, get(api::load_pipeline))
            .route(SAVE_ROUTE, post(api::save_pipeline))
            .fallback(execute)
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until the token is cancelled
    pub async fn run(&self, shutdown: CancellationToken) -> ServiceResult<()> {
        let listener = TcpListener::bind(&self.state.config.listen).await?;
        self.serve(listener, shutdown).await
    }

    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> ServiceResult<()> {
        info!(
            addr = ?listener.local_addr().ok(),
            route = %self.state.config.route,
            config = %self.state.store.location(),
            "worker listening"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;

        info!("worker stopped");
        Ok(())
    }
}

async fn execute(
    State(state): State<WorkerState>,
    uri: Uri,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if !route_matches(uri.path(), &state.config.route) {
        debug!(path = %uri.path(), "unknown route");
        return StatusCode::NOT_FOUND.into_response();
    }

    match upgrade {
        Ok(ws) => ws.on_upgrade(move |socket| async move {
            let end = run_session(socket, &state.config, &state.interpreter).await;
            debug!(?end, "session closed");
        }),
        Err(rejection) => rejection.into_response(),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::{HttpConfigStore, PipelineConfig, ScriptInvocation, Stage, StoreError};
    use crate::execution::{
        ExecutorConfig, LogCategory, MemoryLogSink, PipelineExecutor, PipelineState, StageStatus,
    };
    use crate::runners::{ChannelConnector, ChannelEvent, WebSocketConnector};
    use std::net::SocketAddr;

    async fn start_worker(config: WorkerConfig) -> (SocketAddr, CancellationToken) {
        let worker = Worker::new(config).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        tokio::spawn(async move { worker.serve(listener, token).await });
        (addr, shutdown)
    }

    fn sh_worker() -> WorkerConfig {
        WorkerConfig::default().with_interpreter("sh", Vec::new())
    }

    fn url(addr: SocketAddr) -> String {
        format!("ws://{}{}", addr, EXECUTE_ROUTE)
    }

    async fn collect(connector: &WebSocketConnector, frame: &str) -> (Vec<String>, u16) {
        let mut channel = connector.connect().await.unwrap();
        channel.send_text(frame.to_string()).await.unwrap();
        let mut texts = Vec::new();
        loop {
            match channel.recv().await {
                ChannelEvent::Text(text) => texts.push(text),
                ChannelEvent::Closed { code, .. } => return (texts, code),
            }
        }
    }

    fn script(dir: &tempfile::TempDir, name: &str, body: &str) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path.display().to_string()
    }

    #[test]
    fn test_missing_interpreter() {
        let config = WorkerConfig::default().with_interpreter("no-such-interpreter-xyz", Vec::new());
        assert!(matches!(Worker::new(config), Err(ServiceError::InterpreterNotFound(_))));
    }

    #[tokio::test]
    async fn test_successful_script_protocol() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(&dir, "ok.sh", "echo hello $1\n");
        let (addr, shutdown) = start_worker(sh_worker()).await;
        let connector = WebSocketConnector::new(url(addr));

        let frame = format!(r#"{{"script_path": "{}", "args": ["world"]}}"#, path);
        let (texts, code) = collect(&connector, &frame).await;

        assert_eq!(texts[0], session::CONNECTED_GREETING);
        assert!(texts[1].starts_with("Executing: "));
        assert!(texts.iter().any(|t| t == "hello world"));
        assert_eq!(texts.last().map(String::as_str), Some("EXECUTION_FINISHED"));
        assert_eq!(code, 1000);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_failing_script_protocol() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(&dir, "fail.sh", "echo boom\nexit 2\n");
        let (addr, shutdown) = start_worker(sh_worker()).await;
        let connector = WebSocketConnector::new(url(addr));

        let frame = format!(r#"{{"script_path": "{}", "args": []}}"#, path);
        let (texts, code) = collect(&connector, &frame).await;

        assert_eq!(
            texts.last().map(String::as_str),
            Some("EXECUTION_ERROR: Script failed with exit code 2")
        );
        assert_eq!(code, 4000);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_missing_script_path() {
        let (addr, shutdown) = start_worker(sh_worker()).await;
        let connector = WebSocketConnector::new(url(addr));

        let (texts, code) = collect(&connector, r#"{"args": []}"#).await;

        assert_eq!(
            texts.last().map(String::as_str),
            Some("EXECUTION_ERROR: No script path provided")
        );
        assert_eq!(code, 4000);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_heartbeat_during_silence() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(&dir, "quiet.sh", "sleep 1\n");
        let config = WorkerConfig {
            heartbeat_interval: Duration::from_millis(200),
            ..sh_worker()
        };
        let (addr, shutdown) = start_worker(config).await;
        let connector = WebSocketConnector::new(url(addr));

        let frame = format!(r#"{{"script_path": "{}"}}"#, path);
        let (texts, code) = collect(&connector, &frame).await;

        assert!(texts.iter().any(|t| t == session::HEARTBEAT_MESSAGE));
        assert_eq!(code, 1000);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_carriage_return_meter_streams_before_exit() {
        let dir = tempfile::tempdir().unwrap();
        let gate = dir.path().join("gate");
        let path = script(
            &dir,
            "meter.sh",
            "printf ' 10%%|#    | 1/10\\r'\nwhile [ ! -f \"$1\" ]; do sleep 0.1; done\necho done\n",
        );
        let (addr, shutdown) = start_worker(sh_worker()).await;

        let mut channel = WebSocketConnector::new(url(addr)).connect().await.unwrap();
        let frame = format!(r#"{{"script_path": "{}", "args": ["{}"]}}"#, path, gate.display());
        channel.send_text(frame).await.unwrap();

        // the script blocks until the gate exists, so the meter must arrive on its own
        let meter = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match channel.recv().await {
                    ChannelEvent::Text(text) if text.contains("1/10") => return text,
                    ChannelEvent::Text(_) => continue,
                    ChannelEvent::Closed { code, .. } => panic!("closed early with {}", code),
                }
            }
        })
        .await
        .expect("meter frame held back");
        assert_eq!(meter, "10%|#    | 1/10");

        std::fs::write(&gate, "").unwrap();
        let mut texts = Vec::new();
        let code = loop {
            match channel.recv().await {
                ChannelEvent::Text(text) => texts.push(text),
                ChannelEvent::Closed { code, .. } => break code,
            }
        };
        assert!(texts.iter().any(|t| t == "done"));
        assert_eq!(code, 1000);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_config_api_through_http_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        let (addr, shutdown) = start_worker(sh_worker().with_pipeline_config(&path)).await;
        let store = HttpConfigStore::new(format!("http://{}", addr));

        assert!(store.load().await.unwrap().stages.is_empty());

        let config = PipelineConfig::default()
            .with_stage(Stage::new("train", "Train").with_script(ScriptInvocation::new("train.py")));
        store.save(&config).await.unwrap();

        assert!(std::fs::read_to_string(&path).unwrap().contains("\"train\""));
        assert_eq!(store.load().await.unwrap(), config);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_config_save_failure_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let config = sh_worker().with_pipeline_config(blocker.join("pipeline.json"));
        let (addr, shutdown) = start_worker(config).await;

        let err = HttpConfigStore::new(format!("http://{}", addr))
            .save(&PipelineConfig::default())
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Remote { status: 500, .. }));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_unknown_path_refused() {
        let (addr, shutdown) = start_worker(sh_worker()).await;
        let connector = WebSocketConnector::new(format!("ws://{}/other", addr));
        assert!(connector.connect().await.is_err());
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_executor_against_worker() {
        let dir = tempfile::tempdir().unwrap();
        let ok = script(&dir, "ok.sh", "echo epoch $1\n");
        let fail = script(&dir, "fail.sh", "exit 1\n");
        let (addr, shutdown) = start_worker(sh_worker()).await;

        let sink = Arc::new(MemoryLogSink::new());
        let executor = PipelineExecutor::new(Arc::new(WebSocketConnector::new(url(addr))), sink.clone())
            .with_config(ExecutorConfig {
                inter_script_delay: Duration::ZERO,
                retry_delay: Duration::ZERO,
                ..ExecutorConfig::default()
            });
        let config = PipelineConfig::default()
            .with_stage(
                Stage::new("train", "Train").with_script(ScriptInvocation::new(ok).with_args(["3"])),
            )
            .with_stage(Stage::new("export", "Export").with_script(ScriptInvocation::new(fail)))
            .with_stage(Stage::new("report", "Report").with_script(ScriptInvocation::new("unused.sh")));

        let result = executor.run(&config).await.unwrap();

        assert_eq!(result.state, PipelineState::Failed);
        assert_eq!(result.stage_status("train"), Some(StageStatus::Completed));
        assert_eq!(result.stage_status("export"), Some(StageStatus::Error));
        assert_eq!(result.stage_status("report"), Some(StageStatus::Cancelled));
        assert!(sink
            .entries()
            .iter()
            .any(|e| e.category == LogCategory::Plain && e.text == "epoch 3"));
        shutdown.cancel();
    }
}
