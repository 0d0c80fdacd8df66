//! Per-conversation debounced batching queue.
//!
//! Buffers message fragments per conversation key, waits for a burst to
//! settle, coalesces the burst into units and hands it to a flush handler,
//! with at most one flush in flight per key.

pub mod coalesce;
pub mod error;
pub mod handler;
pub mod scheduler;
pub mod state;

pub use coalesce::{coalesce, DEFAULT_SEPARATOR};
pub use error::{FlushError, QueueError};
pub use handler::{handler_fn, FlushHandler, FnHandler};
pub use scheduler::{SchedulerConfig, WindowPolicy, WindowScheduler};
pub use state::KeyPhase;
