// Script Outcome
// Close-code semantics: turns (close code, sentinels seen) into success, failure or cancellation

use crate::protocol::message::WireMessage;

use thiserror::Error;

/// WebSocket close codes with protocol meaning
pub mod close_code {
    /// Worker closes with this after `EXECUTION_FINISHED`
    pub const NORMAL: u16 = 1000;
    /// Close frame carried no status
    pub const NO_STATUS: u16 = 1005;
    /// Transport dropped without a close frame
    pub const ABNORMAL: u16 = 1006;
    /// Worker closes with this after `EXECUTION_ERROR`
    pub const EXECUTION_FAILED: u16 = 4000;
    /// Client closes with this after sending `CANCEL`
    pub const USER_CANCELLED: u16 = 4001;
}

/// Phrase carried by rejections that the retry policy treats as transient
pub const TRANSPORT_CLOSED_MARKER: &str = "connection closed unexpectedly";

/// Why a script invocation did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("cancelled by user")]
    Cancelled,

    #[error("{0}")]
    Failed(String),

    #[error("connection closed unexpectedly: {0}")]
    Transport(String),
}

impl ScriptError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScriptError::Cancelled)
    }

    /// Matched on the message, not the variant, so a worker-reported error
    /// describing a dropped connection is retried the same way
    pub fn is_transport_closed(&self) -> bool {
        !self.is_cancelled() && self.to_string().contains(TRANSPORT_CLOSED_MARKER)
    }
}

/// Resolve a channel close into the script's outcome.
///
/// | close code          | finished seen | result                      |
/// |---------------------|---------------|-----------------------------|
/// | user cancel         | any           | cancelled                   |
/// | 1000                | yes           | success                     |
/// | 1006                | yes           | success (teardown race)     |
/// | 4000 / error seen   | any           | failure with sentinel text  |
/// | 4000, no sentinel   | any           | failure with close reason   |
/// | anything else       | any           | success (lost visibility)   |
pub fn resolve_close(
    code: u16,
    finished_seen: bool,
    error: Option<&str>,
    reason: &str,
) -> Result<(), ScriptError> {
    match code {
        close_code::USER_CANCELLED => Err(ScriptError::Cancelled),
        close_code::NORMAL | close_code::ABNORMAL if finished_seen => Ok(()),
        _ if code == close_code::EXECUTION_FAILED || error.is_some() => {
            let message = match error {
                Some(error) => error,
                None if !reason.trim().is_empty() => reason.trim(),
                None => "script execution failed",
            };
            Err(ScriptError::Failed(message.to_string()))
        }
        _ => Ok(()),
    }
}

/// Tracks sentinels seen on one channel
#[derive(Debug, Clone, Default)]
pub struct SentinelTracker {
    finished: bool,
    error: Option<String>,
}

impl SentinelTracker {
    pub fn observe(&mut self, message: &WireMessage) {
        match message {
            WireMessage::Finished => self.finished = true,
            WireMessage::Error(msg) => self.error = Some(msg.clone()),
            _ => {}
        }
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// `reason` is the close frame's reason text, used when no error sentinel arrived
    pub fn resolve(&self, code: u16, reason: &str) -> Result<(), ScriptError> {
        resolve_close(code, self.finished, self.error.as_deref(), reason)
    }
}
