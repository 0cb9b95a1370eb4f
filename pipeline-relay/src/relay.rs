// Relay Hop
// Accepts execution channels and forwards every frame, unchanged, to the downstream worker

use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use training_pipeline::protocol::{close_code, route_matches};

/// Sent to the client, as text and close reason, when the downstream worker
/// cannot be reached; the client retries on the trailing phrase
pub const BACKEND_UNAVAILABLE: &str =
    "Failed to connect to backend service: connection closed unexpectedly";

/// Handshake callback refusing every path but the execution route with 404
fn route_guard(route: String) -> impl FnOnce(&Request, Response) -> Result<Response, ErrorResponse> {
    move |request: &Request, response: Response| {
        if route_matches(request.uri().path(), &route) {
            Ok(response)
        } else {
            let mut refusal = ErrorResponse::new(Some("Not Found".to_string()));
            *refusal.status_mut() = StatusCode::NOT_FOUND;
            Err(refusal)
        }
    }
}

/// Why one forwarding direction stopped
#[derive(Debug)]
enum PumpEnd {
    /// A close frame was read and forwarded
    Closed(Option<u16>),
    SourceEnded,
    SourceFailed(tungstenite::Error),
    SinkFailed(tungstenite::Error),
}

/// Copy messages from `source` to `sink` until either side closes or fails
async fn pump<R, W>(source: &mut R, sink: &mut W) -> PumpEnd
where
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Close(frame)) => {
                let code = frame.as_ref().map(|f| u16::from(f.code));
                if let Err(e) = sink.send(Message::Close(frame)).await {
                    debug!(error = %e, "close frame not forwarded");
                }
                return PumpEnd::Closed(code);
            }
            // control frames are answered per hop
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
            Ok(message) => {
                if let Err(e) = sink.send(message).await {
                    return PumpEnd::SinkFailed(e);
                }
            }
            Err(e) => return PumpEnd::SourceFailed(e),
        }
    }
    PumpEnd::SourceEnded
}

/// Transparent relay between clients and a single downstream worker
pub struct Relay {
    config: RelayConfig,
    downstream_url: Arc<str>,
}

impl Relay {
    /// The downstream address is resolved once, here
    pub fn new(config: RelayConfig) -> Self {
        let downstream_url: Arc<str> = config.downstream_url().into();
        Self {
            config,
            downstream_url,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn downstream_url(&self) -> &str {
        &self.downstream_url
    }

    /// Bind the configured address and serve until the token is cancelled
    pub async fn run(&self, shutdown: CancellationToken) -> RelayResult<()> {
        let listener = TcpListener::bind(&self.config.listen)
            .await
            .map_err(|source| RelayError::Bind {
                addr: self.config.listen.clone(),
                source,
            })?;
        self.serve(listener, shutdown).await
    }

    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> RelayResult<()> {
        info!(
            addr = ?listener.local_addr().ok(),
            route = %self.config.upstream_route,
            downstream = %self.downstream_url,
            "relay listening"
        );

        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "accept failed");
                        continue;
                    }
                },
            };

            let route = self.config.upstream_route.clone();
            let downstream_url = self.downstream_url.clone();
            tokio::spawn(async move {
                if let Err(e) = relay_connection(stream, route, downstream_url).await {
                    warn!(%peer, error = %e, "relay connection ended with error");
                }
            });
        }

        info!("relay stopped");
        Ok(())
    }
}

async fn relay_connection(stream: TcpStream, route: String, downstream_url: Arc<str>) -> RelayResult<()> {
    let mut inbound = tokio_tungstenite::accept_hdr_async(stream, route_guard(route))
        .await
        .map_err(RelayError::Handshake)?;

    let downstream = match tokio_tungstenite::connect_async(&*downstream_url).await {
        Ok((downstream, _)) => downstream,
        Err(source) => {
            let _ = inbound.send(Message::Text(BACKEND_UNAVAILABLE.to_string())).await;
            let frame = CloseFrame {
                code: CloseCode::from(close_code::EXECUTION_FAILED),
                reason: BACKEND_UNAVAILABLE.into(),
            };
            let _ = inbound.close(Some(frame)).await;
            return Err(RelayError::Dial {
                url: downstream_url.to_string(),
                source,
            });
        }
    };
    debug!(downstream = %downstream_url, "relay hop open");

    let (mut client_tx, mut client_rx) = inbound.split();
    let (mut worker_tx, mut worker_rx) = downstream.split();

    tokio::select! {
        end = pump(&mut client_rx, &mut worker_tx) => debug!(?end, "client side finished"),
        end = pump(&mut worker_rx, &mut client_tx) => debug!(?end, "worker side finished"),
    }

    // Either side may already be closed
    let _ = client_tx.close().await;
    let _ = worker_tx.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::task::JoinHandle;
    use tokio_tungstenite::WebSocketStream;
    use std::time::Duration;
    use training_pipeline::execution::{
        ExecutorConfig, LogCategory, MemoryLogSink, PipelineExecutor, PipelineState, RunFailure,
    };
    use training_pipeline::protocol::TRANSPORT_CLOSED_MARKER;
    use training_pipeline::runners::{ChannelConnector, ChannelEvent, ExecutionChannel, WebSocketConnector};
    use training_pipeline::{PipelineConfig, ScriptInvocation, Stage};

    async fn start_relay(downstream: String) -> (SocketAddr, CancellationToken) {
        let relay = Relay::new(RelayConfig::default().with_downstream(downstream));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        tokio::spawn(async move { relay.serve(listener, token).await });
        (addr, shutdown)
    }

    /// Downstream stand-in: accepts one channel and hands it to `handler`
    async fn fake_worker<F, Fut, T>(handler: F) -> (SocketAddr, JoinHandle<T>)
    where
        F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            handler(ws).await
        });
        (addr, handle)
    }

    async fn connect(relay: SocketAddr, path: &str) -> Box<dyn ExecutionChannel> {
        WebSocketConnector::new(format!("ws://{}{}", relay, path))
            .connect()
            .await
            .unwrap()
    }

    async fn drain(channel: &mut Box<dyn ExecutionChannel>) -> (Vec<String>, u16) {
        let mut texts = Vec::new();
        loop {
            match channel.recv().await {
                ChannelEvent::Text(text) => texts.push(text),
                ChannelEvent::Closed { code, .. } => return (texts, code),
            }
        }
    }

    #[tokio::test]
    async fn test_forwards_in_order_with_close_code() {
        let (worker, worker_task) = fake_worker(|mut ws| async move {
            let open = match ws.next().await {
                Some(Ok(Message::Text(text))) => text,
                other => panic!("unexpected first frame: {:?}", other),
            };
            for line in ["line 1", "line 2", "EXECUTION_ERROR: boom"] {
                ws.send(Message::Text(line.to_string())).await.unwrap();
            }
            ws.close(Some(CloseFrame {
                code: CloseCode::from(4000),
                reason: "".into(),
            }))
            .await
            .unwrap();
            while let Some(Ok(_)) = ws.next().await {}
            open
        })
        .await;
        let (relay, shutdown) = start_relay(format!("http://{}", worker)).await;

        let mut channel = connect(relay, "/api/script/ws/execute").await;
        channel
            .send_text(r#"{"script_path":"train.py","args":[]}"#.to_string())
            .await
            .unwrap();
        let (texts, code) = drain(&mut channel).await;

        assert_eq!(texts, vec!["line 1", "line 2", "EXECUTION_ERROR: boom"]);
        assert_eq!(code, 4000);
        assert_eq!(
            worker_task.await.unwrap(),
            r#"{"script_path":"train.py","args":[]}"#
        );
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_cancel_reaches_worker() {
        let (worker, worker_task) = fake_worker(|mut ws| async move {
            ws.send(Message::Text("started".to_string())).await.unwrap();
            let mut texts = Vec::new();
            let mut close = None;
            while let Some(Ok(message)) = ws.next().await {
                match message {
                    Message::Text(text) => texts.push(text),
                    Message::Close(frame) => {
                        close = frame.map(|f| u16::from(f.code));
                        break;
                    }
                    _ => {}
                }
            }
            (texts, close)
        })
        .await;
        let (relay, shutdown) = start_relay(format!("http://{}", worker)).await;

        let mut channel = connect(relay, "/model-training/api/script/ws/execute").await;
        assert_eq!(channel.recv().await, ChannelEvent::Text("started".to_string()));
        channel.send_text("CANCEL".to_string()).await.unwrap();
        channel.close(4001, "cancelled by user").await.unwrap();

        let (texts, close) = worker_task.await.unwrap();
        assert_eq!(texts, vec!["CANCEL"]);
        assert_eq!(close, Some(4001));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_downstream_unreachable() {
        let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = unused.local_addr().unwrap();
        drop(unused);
        let (relay, shutdown) = start_relay(format!("http://{}", dead)).await;

        let mut channel = connect(relay, "/api/script/ws/execute").await;
        let (texts, code) = drain(&mut channel).await;

        assert_eq!(texts, vec![BACKEND_UNAVAILABLE]);
        assert_eq!(code, close_code::EXECUTION_FAILED);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_executor_retries_when_downstream_unreachable() {
        assert!(BACKEND_UNAVAILABLE.contains(TRANSPORT_CLOSED_MARKER));

        let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = unused.local_addr().unwrap();
        drop(unused);
        let (relay, shutdown) = start_relay(format!("http://{}", dead)).await;

        let sink = Arc::new(MemoryLogSink::new());
        let connector = WebSocketConnector::new(format!("ws://{}/api/script/ws/execute", relay));
        let executor = PipelineExecutor::new(Arc::new(connector), sink.clone()).with_config(ExecutorConfig {
            inter_script_delay: Duration::ZERO,
            retry_delay: Duration::ZERO,
            max_retries: 3,
            ..ExecutorConfig::default()
        });
        let config = PipelineConfig::default()
            .with_stage(Stage::new("train", "Train").with_script(ScriptInvocation::new("train.py")));

        let result = executor.run(&config).await.unwrap();

        assert_eq!(result.state, PipelineState::Failed);
        assert_eq!(result.retries, 3);
        match result.failure {
            Some(RunFailure::Script { message, .. }) => assert_eq!(message, BACKEND_UNAVAILABLE),
            other => panic!("unexpected failure: {:?}", other),
        }
        // one relayed notice per attempt: the first plus three retries
        let notices = sink
            .entries()
            .iter()
            .filter(|e| e.category == LogCategory::Plain && e.text == BACKEND_UNAVAILABLE)
            .count();
        assert_eq!(notices, 4);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_other_paths_refused() {
        let (relay, shutdown) = start_relay("http://127.0.0.1:9".to_string()).await;
        let result = WebSocketConnector::new(format!("ws://{}/api/models", relay))
            .connect()
            .await;
        assert!(result.is_err());
        shutdown.cancel();
    }
}
