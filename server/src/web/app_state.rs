use std::sync::Arc;

use crate::config::ServerConfig;
use crate::engine::chat_engine::ChatEngine;

/// Shared state handed to every axum handler.
pub struct AppState {
    pub engine: Arc<ChatEngine>,
    /// Origin allowed by CORS.
    pub public_url: String,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(engine: Arc<ChatEngine>, config: &ServerConfig) -> Self {
        Self {
            engine,
            public_url: config.server.public_url.clone(),
            max_body_bytes: config.server.max_body_kb.saturating_mul(1024),
        }
    }
}
