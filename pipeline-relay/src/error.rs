// Relay Errors

use thiserror::Error;
use tokio_tungstenite::tungstenite;

pub type RelayResult<T> = Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("inbound handshake failed: {0}")]
    Handshake(#[source] tungstenite::Error),

    #[error("failed to connect to downstream {url}: {source}")]
    Dial {
        url: String,
        #[source]
        source: tungstenite::Error,
    },
}
