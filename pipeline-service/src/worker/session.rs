// Worker Session
// One execution channel on the worker side: open frame in, sentinel protocol out

use crate::protocol::{close_code, MemoryKind, OpenFrame, WireMessage, CANCEL_FRAME, FINISHED_SENTINEL};
use crate::worker::memory;
use crate::worker::process::{ScriptCommand, ScriptProcess};
use crate::worker::WorkerConfig;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const CONNECTED_GREETING: &str = "WebSocket connected successfully";
pub const HEARTBEAT_MESSAGE: &str = "HEARTBEAT: Process running...";
pub const NO_SCRIPT_PATH: &str = "No script path provided";

/// Time allowed for the peer to answer our close frame
const CLOSE_LINGER: Duration = Duration::from_secs(5);

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    Finished,
    Failed(String),
    Cancelled,
    /// Client went away; the script was terminated
    Disconnected,
}

enum Inbound {
    Cancel,
    Lost,
    Ignored,
}

struct Outbound {
    sink: SplitSink<WebSocket, Message>,
}

impl Outbound {
    async fn text(&mut self, text: impl Into<String>) -> Result<(), axum::Error> {
        let text: String = text.into();
        self.sink.send(Message::Text(text.into())).await
    }

    async fn message(&mut self, message: &WireMessage) -> Result<(), axum::Error> {
        self.text(message.encode()).await
    }

    async fn close(&mut self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code,
            reason: reason.to_string().into(),
        };
        if let Err(e) = self.sink.send(Message::Close(Some(frame))).await {
            debug!(error = %e, "close frame not delivered");
        }
    }
}

async fn next_inbound(stream: &mut SplitStream<WebSocket>) -> Inbound {
    match stream.next().await {
        Some(Ok(Message::Text(text))) if text.as_str().trim() == CANCEL_FRAME => Inbound::Cancel,
        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => Inbound::Lost,
        Some(Ok(_)) => Inbound::Ignored,
    }
}

/// Wait for the client's close reply so the close handshake completes
async fn linger(stream: &mut SplitStream<WebSocket>) {
    let drain = async { while let Some(Ok(_)) = stream.next().await {} };
    let _ = tokio::time::timeout(CLOSE_LINGER, drain).await;
}

async fn memory_report(kind: MemoryKind, suffix: &str) -> WireMessage {
    match memory::read_snapshot().await {
        Ok(snapshot) => WireMessage::memory(kind, format!("{}{}", snapshot, suffix)),
        Err(e) => WireMessage::memory(MemoryKind::Error, e.to_string()),
    }
}

/// Drive one accepted connection to completion
pub async fn run_session(ws: WebSocket, config: &WorkerConfig, interpreter: &Path) -> SessionEnd {
    let (sink, mut stream) = ws.split();
    let mut out = Outbound { sink };

    if out.text(CONNECTED_GREETING).await.is_err() {
        return SessionEnd::Disconnected;
    }

    let frame = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => break serde_json::from_str::<OpenFrame>(text.as_str()),
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return SessionEnd::Disconnected,
            Some(Ok(_)) => continue,
        }
    };

    let frame = match frame {
        Ok(frame) if !frame.script_path.trim().is_empty() => frame,
        Ok(_) => return fail(&mut out, &mut stream, NO_SCRIPT_PATH.to_string()).await,
        Err(e) => return fail(&mut out, &mut stream, format!("Invalid request: {}", e)).await,
    };

    let command = ScriptCommand::new(interpreter, frame.script_path.clone())
        .with_program_args(config.interpreter_args.clone())
        .with_args(frame.args.clone())
        .with_working_dir(config.working_dir.clone())
        .with_env("PYTHONUNBUFFERED", "1");

    info!(script = %frame.script_path, args = ?frame.args, "executing script");
    let _ = out.text(format!("Executing: {}", command.command_line())).await;
    let initial = memory_report(MemoryKind::Initial, " - Starting execution").await;
    let _ = out.message(&initial).await;

    let mut process = match ScriptProcess::spawn(&command) {
        Ok(process) => process,
        Err(e) => return fail(&mut out, &mut stream, format!("Failed to start script: {}", e)).await,
    };

    let heartbeat = tokio::time::sleep(config.heartbeat_interval);
    tokio::pin!(heartbeat);
    let mut monitor =
        tokio::time::interval_at(Instant::now() + config.memory_interval, config.memory_interval);

    // Stream output until both pipes close
    loop {
        tokio::select! {
            output = process.next_output() => match output {
                Some(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    if out.text(line).await.is_err() {
                        return abandon(&mut process, config, SessionEnd::Disconnected).await;
                    }
                    heartbeat.as_mut().reset(Instant::now() + config.heartbeat_interval);
                }
                None => break,
            },
            inbound = next_inbound(&mut stream) => match inbound {
                Inbound::Cancel => return abandon(&mut process, config, SessionEnd::Cancelled).await,
                Inbound::Lost => return abandon(&mut process, config, SessionEnd::Disconnected).await,
                Inbound::Ignored => {}
            },
            _ = &mut heartbeat => {
                if out.text(HEARTBEAT_MESSAGE).await.is_err() {
                    return abandon(&mut process, config, SessionEnd::Disconnected).await;
                }
                heartbeat.as_mut().reset(Instant::now() + config.heartbeat_interval);
            }
            _ = monitor.tick() => {
                let report = memory_report(MemoryKind::Monitor, "").await;
                if out.message(&report).await.is_err() {
                    return abandon(&mut process, config, SessionEnd::Disconnected).await;
                }
            }
        }
    }

    let status = loop {
        tokio::select! {
            status = process.wait() => break status,
            inbound = next_inbound(&mut stream) => match inbound {
                Inbound::Cancel => return abandon(&mut process, config, SessionEnd::Cancelled).await,
                Inbound::Lost => return abandon(&mut process, config, SessionEnd::Disconnected).await,
                Inbound::Ignored => {}
            },
        }
    };

    let final_report = memory_report(MemoryKind::Final, " - Execution completed").await;
    let _ = out.message(&final_report).await;

    match status {
        Ok(Some(0)) => {
            let _ = out.text(FINISHED_SENTINEL).await;
            out.close(close_code::NORMAL, "").await;
            linger(&mut stream).await;
            info!(script = %frame.script_path, "script finished");
            SessionEnd::Finished
        }
        Ok(code) => {
            let message = format!("Script failed with exit code {}", code.unwrap_or(-1));
            fail(&mut out, &mut stream, message).await
        }
        Err(e) => fail(&mut out, &mut stream, format!("Failed to wait for script: {}", e)).await,
    }
}

async fn fail(out: &mut Outbound, stream: &mut SplitStream<WebSocket>, message: String) -> SessionEnd {
    warn!(error = %message, "script execution failed");
    let _ = out.message(&WireMessage::error(message.clone())).await;
    out.close(close_code::EXECUTION_FAILED, "").await;
    linger(stream).await;
    SessionEnd::Failed(message)
}

/// Stop the script without sending any sentinel
async fn abandon(process: &mut ScriptProcess, config: &WorkerConfig, end: SessionEnd) -> SessionEnd {
    info!(pid = ?process.id(), reason = ?end, "terminating script");
    if let Err(e) = process.terminate(config.terminate_grace).await {
        warn!(error = %e, "failed to terminate script");
    }
    end
}
