// Runners Module
// Execution channels: one duplex message connection per script invocation

pub mod websocket;

// Re-export key types
pub use websocket::{WebSocketChannel, WebSocketConnector};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("failed to send frame: {0}")]
    Send(String),
}

/// Something that happened on an open channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A text message from the worker
    Text(String),
    /// The channel is gone; `code` is the close code (1006 when the transport
    /// dropped without a close frame). No further events follow.
    Closed { code: u16, reason: String },
}

/// An open execution channel
#[async_trait::async_trait]
pub trait ExecutionChannel: Send {
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError>;

    /// Next event; returns `Closed` once and should not be polled afterwards
    async fn recv(&mut self) -> ChannelEvent;

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), ChannelError>;
}

/// Opens execution channels to a worker
#[async_trait::async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn ExecutionChannel>, ChannelError>;
}
