//! Flush handler trait and closure adapter.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parley_core::types::Batch;

use crate::error::FlushError;

/// Consumer of coalesced batches for a conversation key.
///
/// The scheduler calls `flush` with at most one invocation in flight per
/// key. An `Err` (or a panic) is logged and the key's lifecycle continues
/// as if the flush had succeeded; the batch is not retried.
#[async_trait]
pub trait FlushHandler: Send + Sync {
    async fn flush(&self, key: &str, batch: Batch) -> Result<(), FlushError>;
}

/// Adapts an async closure into a [`FlushHandler`].
pub struct FnHandler<F> {
    f: F,
}

/// Wrap `f` as a shareable flush handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<FnHandler<F>>
where
    F: Fn(String, Batch) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), FlushError>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

#[async_trait]
impl<F, Fut> FlushHandler for FnHandler<F>
where
    F: Fn(String, Batch) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), FlushError>> + Send + 'static,
{
    async fn flush(&self, key: &str, batch: Batch) -> Result<(), FlushError> {
        (self.f)(key.to_string(), batch).await
    }
}
