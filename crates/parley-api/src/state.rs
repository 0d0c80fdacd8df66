//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use parley_chat::{InboundPipeline, Outbound};
use parley_core::config::ParleyConfig;
use parley_queue::WindowScheduler;

/// Shared application state.
///
/// Every field is cheap to clone; handlers get their own copy through
/// axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ParleyConfig>,
    /// Inbound filtering, normalization and enqueueing.
    pub pipeline: Arc<InboundPipeline>,
    /// Transport used by `POST /send`.
    pub outbound: Arc<dyn Outbound>,
    /// Bearer token required on protected routes.
    pub api_token: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: ParleyConfig,
        pipeline: InboundPipeline,
        outbound: Arc<dyn Outbound>,
    ) -> Self {
        let api_token = config.api.api_token.clone();
        Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            outbound,
            api_token,
            start_time: Instant::now(),
        }
    }

    pub fn scheduler(&self) -> &WindowScheduler {
        self.pipeline.scheduler()
    }
}
