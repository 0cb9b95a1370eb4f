// Wire Messages
// Open frame and sentinel-tagged worker output, decoded once at the channel boundary

use serde::{Deserialize, Serialize};
use std::fmt;

/// Route of the execution endpoint on the worker and on relay hops
pub const EXECUTE_ROUTE: &str = "/api/script/ws/execute";

/// Config API on the worker: `GET` returns the stored document
pub const LOAD_ROUTE: &str = "/api/pipeline/load";
/// Config API on the worker: `POST` replaces the stored document
pub const SAVE_ROUTE: &str = "/api/pipeline/save";

pub const FINISHED_SENTINEL: &str = "EXECUTION_FINISHED";
pub const ERROR_PREFIX: &str = "EXECUTION_ERROR:";
pub const HEARTBEAT_PREFIX: &str = "HEARTBEAT:";

/// Text frame a client sends to stop the running script
pub const CANCEL_FRAME: &str = "CANCEL";

/// Whether a request path addresses `route`, directly or under a mount prefix
/// such as `/model-training/api/script/ws/execute`
pub fn route_matches(path: &str, route: &str) -> bool {
    path == route || (route.starts_with('/') && path.ends_with(route))
}

/// First frame sent by the client on every channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFrame {
    #[serde(default)]
    pub script_path: String,

    #[serde(default)]
    pub args: Vec<String>,
}

impl OpenFrame {
    pub fn new(script_path: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            script_path: script_path.into(),
            args,
        }
    }
}

/// Resource telemetry kinds reported by the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    Initial,
    Monitor,
    Final,
    Error,
}

impl MemoryKind {
    pub const ALL: [MemoryKind; 4] = [
        MemoryKind::Initial,
        MemoryKind::Monitor,
        MemoryKind::Final,
        MemoryKind::Error,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            MemoryKind::Initial => "MEMORY_INITIAL:",
            MemoryKind::Monitor => "MEMORY_MONITOR:",
            MemoryKind::Final => "MEMORY_FINAL:",
            MemoryKind::Error => "MEMORY_ERROR:",
        }
    }
}

/// A worker-to-client text message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// Script exited successfully
    Finished,
    /// Script failed; carries the message after the prefix
    Error(String),
    /// Liveness only, never displayed
    Heartbeat(String),
    /// Resource telemetry
    Memory { kind: MemoryKind, message: String },
    /// Ordinary output
    Line(String),
}

impl WireMessage {
    pub fn decode(text: &str) -> Self {
        let trimmed = text.trim();

        if trimmed == FINISHED_SENTINEL {
            return WireMessage::Finished;
        }
        if let Some(rest) = trimmed.strip_prefix(ERROR_PREFIX) {
            return WireMessage::Error(rest.trim().to_string());
        }
        if let Some(rest) = trimmed.strip_prefix(HEARTBEAT_PREFIX) {
            return WireMessage::Heartbeat(rest.trim().to_string());
        }
        for kind in MemoryKind::ALL {
            if let Some(rest) = trimmed.strip_prefix(kind.prefix()) {
                return WireMessage::Memory {
                    kind,
                    message: rest.trim().to_string(),
                };
            }
        }

        WireMessage::Line(text.to_string())
    }

    pub fn error(message: impl Into<String>) -> Self {
        WireMessage::Error(message.into())
    }

    pub fn memory(kind: MemoryKind, message: impl Into<String>) -> Self {
        WireMessage::Memory {
            kind,
            message: message.into(),
        }
    }

    /// Text form as sent on the wire
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for WireMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireMessage::Finished => write!(f, "{}", FINISHED_SENTINEL),
            WireMessage::Error(msg) => write!(f, "{} {}", ERROR_PREFIX, msg),
            WireMessage::Heartbeat(msg) => write!(f, "{} {}", HEARTBEAT_PREFIX, msg),
            WireMessage::Memory { kind, message } => write!(f, "{} {}", kind.prefix(), message),
            WireMessage::Line(text) => write!(f, "{}", text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_sentinels() {
        assert_eq!(WireMessage::decode("EXECUTION_FINISHED"), WireMessage::Finished);
        assert_eq!(
            WireMessage::decode("EXECUTION_ERROR: disk full"),
            WireMessage::Error("disk full".into())
        );
        assert_eq!(
            WireMessage::decode("HEARTBEAT: Process running..."),
            WireMessage::Heartbeat("Process running...".into())
        );
        assert_eq!(
            WireMessage::decode("MEMORY_MONITOR: Container 3.1GB/15.6GB (19.9%)"),
            WireMessage::memory(MemoryKind::Monitor, "Container 3.1GB/15.6GB (19.9%)")
        );
        assert_eq!(
            WireMessage::decode("MEMORY_ERROR: Monitoring failed"),
            WireMessage::memory(MemoryKind::Error, "Monitoring failed")
        );
    }

    #[test]
    fn test_decode_plain_line_keeps_text() {
        assert_eq!(
            WireMessage::decode("Epoch 1: loss=0.5\r"),
            WireMessage::Line("Epoch 1: loss=0.5\r".into())
        );
        // sentinel text inside a line is not a sentinel
        assert_eq!(
            WireMessage::decode("echo EXECUTION_FINISHED"),
            WireMessage::Line("echo EXECUTION_FINISHED".into())
        );
    }

    #[test]
    fn test_encode_matches_decode() {
        let messages = [
            WireMessage::Finished,
            WireMessage::error("Script failed with exit code 2"),
            WireMessage::memory(MemoryKind::Final, "Container 1GB/2GB (50%)"),
        ];
        for message in messages {
            assert_eq!(WireMessage::decode(&message.encode()), message);
        }
    }

    #[test]
    fn test_open_frame_json() {
        let frame = OpenFrame::new("scripts/train.py", vec!["--epochs".into(), "5".into()]);
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, r#"{"script_path":"scripts/train.py","args":["--epochs","5"]}"#);

        let parsed: OpenFrame = serde_json::from_str(r#"{"args": []}"#).unwrap();
        assert!(parsed.script_path.is_empty());
    }

    #[test]
    fn test_route_matches() {
        assert!(route_matches("/api/script/ws/execute", EXECUTE_ROUTE));
        assert!(route_matches("/model-training/api/script/ws/execute", EXECUTE_ROUTE));
        assert!(!route_matches("/api/script/ws", EXECUTE_ROUTE));
        assert!(!route_matches("/", EXECUTE_ROUTE));
    }
}
