// Execution Protocol Module
// Wire format and close-code semantics of the one-script-per-connection channel

pub mod message;
pub mod outcome;

// Re-export key types
pub use message::{
    route_matches, MemoryKind, OpenFrame, WireMessage, CANCEL_FRAME, EXECUTE_ROUTE,
    FINISHED_SENTINEL, LOAD_ROUTE, SAVE_ROUTE,
};
pub use outcome::{close_code, resolve_close, ScriptError, SentinelTracker, TRANSPORT_CLOSED_MARKER};
