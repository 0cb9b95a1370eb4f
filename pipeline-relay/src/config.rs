// Relay Configuration
// Listen address, accepted route and the downstream worker address

use training_pipeline::protocol::EXECUTE_ROUTE;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen: String,
    /// Inbound route; also accepted under a path prefix
    pub upstream_route: String,
    /// Worker base address, `http(s)://`, `ws(s)://` or a bare `host:port`
    pub downstream_base: String,
    /// Path appended to the downstream base
    pub downstream_path: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3000".to_string(),
            upstream_route: EXECUTE_ROUTE.to_string(),
            downstream_base: "http://localhost:3001".to_string(),
            downstream_path: EXECUTE_ROUTE.to_string(),
        }
    }
}

impl RelayConfig {
    pub fn with_listen(mut self, listen: impl Into<String>) -> Self {
        self.listen = listen.into();
        self
    }

    pub fn with_downstream(mut self, base: impl Into<String>) -> Self {
        self.downstream_base = base.into();
        self
    }

    pub fn with_upstream_route(mut self, route: impl Into<String>) -> Self {
        self.upstream_route = route.into();
        self
    }

    pub fn with_downstream_path(mut self, path: impl Into<String>) -> Self {
        self.downstream_path = path.into();
        self
    }

    /// Full WebSocket URL of the downstream execution endpoint
    pub fn downstream_url(&self) -> String {
        let base = websocket_base(&self.downstream_base);
        if self.downstream_path.is_empty() || self.downstream_path.starts_with('/') {
            format!("{}{}", base, self.downstream_path)
        } else {
            format!("{}/{}", base, self.downstream_path)
        }
    }
}

/// Map an HTTP base address to its WebSocket form
pub fn websocket_base(base: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_string()
    } else {
        format!("ws://{}", base)
    }
}
