// Pipeline Relay Library
// Transparent WebSocket hop between pipeline clients and the training worker

pub mod config;
pub mod error;
pub mod relay;

// Re-export key types
pub use config::{websocket_base, RelayConfig};
pub use error::{RelayError, RelayResult};
pub use relay::{Relay, BACKEND_UNAVAILABLE};
