// WebSocket Runner
// Execution channels over tokio-tungstenite, directly to a worker or through relay hops

use crate::protocol::close_code;
use crate::runners::{ChannelConnector, ChannelError, ChannelEvent, ExecutionChannel};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Opens a fresh WebSocket per script
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    /// `url` is the full endpoint, e.g. `ws://localhost:3000/api/script/ws/execute`
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl ChannelConnector for WebSocketConnector {
    async fn connect(&self) -> Result<Box<dyn ExecutionChannel>, ChannelError> {
        let (stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| ChannelError::Connect {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;
        debug!(url = %self.url, "execution channel open");
        Ok(Box::new(WebSocketChannel { stream }))
    }
}

pub struct WebSocketChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait::async_trait]
impl ExecutionChannel for WebSocketChannel {
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| ChannelError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> ChannelEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return ChannelEvent::Text(text),
                Some(Ok(Message::Binary(bytes))) => {
                    return ChannelEvent::Text(String::from_utf8_lossy(&bytes).into_owned())
                }
                Some(Ok(Message::Close(frame))) => {
                    // flush the close reply; the peer may already be gone
                    let _ = self.stream.close(None).await;
                    let (code, reason) = match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
                        None => (close_code::NO_STATUS, String::new()),
                    };
                    return ChannelEvent::Closed { code, reason };
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return ChannelEvent::Closed {
                        code: close_code::ABNORMAL,
                        reason: e.to_string(),
                    }
                }
                None => {
                    return ChannelEvent::Closed {
                        code: close_code::ABNORMAL,
                        reason: "stream ended".to_string(),
                    }
                }
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), ChannelError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        self.stream
            .close(Some(frame))
            .await
            .map_err(|e| ChannelError::Send(e.to_string()))
    }
}
