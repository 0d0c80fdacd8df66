//! Parley API crate - axum HTTP server and route handlers.
//!
//! Exposes health checks, a manual send endpoint, the inbound message
//! webhook and per-key queue diagnostics.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
