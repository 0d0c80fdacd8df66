//! Debounce window scheduler.
//!
//! Keeps one [`QueueState`] per conversation key in a registry. Each key
//! buffers fragments while its window is open, then coalesces the buffer
//! and hands the batch to the key's flush handler. Keys never block each
//! other: the registry lock is only held for lookups, and a key's own lock
//! is never held across an await.
//!
//! Lock order is key state, then registry. Code holding the registry lock
//! never waits on a key lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use parley_core::config::{DebounceMode, QueueConfig};
use parley_core::types::{Batch, Fragment, FragmentPayload};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::coalesce::{coalesce, DEFAULT_SEPARATOR};
use crate::error::{FlushError, QueueError};
use crate::handler::FlushHandler;
use crate::state::{KeyPhase, QueueState, TimerHandle};

type SharedState = Arc<Mutex<QueueState>>;

/// How arrivals affect an armed debounce window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPolicy {
    /// The window is measured from the first fragment of a burst and is
    /// never extended by later arrivals.
    Fixed,
    /// Each arrival re-arms the window, but the flush never happens later
    /// than `max_wait` after the first fragment of the burst.
    Sliding { max_wait: Duration },
}

/// Scheduler tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub window: Duration,
    pub policy: WindowPolicy,
    /// Separator placed between adjacent text fragments.
    pub separator: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(5_000),
            policy: WindowPolicy::Fixed,
            separator: DEFAULT_SEPARATOR.to_string(),
        }
    }
}

impl From<&QueueConfig> for SchedulerConfig {
    fn from(config: &QueueConfig) -> Self {
        let policy = match config.mode {
            DebounceMode::Fixed => WindowPolicy::Fixed,
            DebounceMode::Sliding => {
                // A cap below the window would turn sliding into a shorter fixed window.
                let max_wait_ms = if config.max_wait_ms < config.window_ms {
                    warn!(
                        window_ms = config.window_ms,
                        max_wait_ms = config.max_wait_ms,
                        "Sliding max_wait_ms is below window_ms, clamping to window_ms"
                    );
                    config.window_ms
                } else {
                    config.max_wait_ms
                };
                WindowPolicy::Sliding {
                    max_wait: Duration::from_millis(max_wait_ms),
                }
            }
        };
        Self {
            window: Duration::from_millis(config.window_ms),
            policy,
            separator: config.text_separator.clone(),
        }
    }
}

/// A batch taken from a key's buffer, ready to hand to its handler.
struct PendingFlush {
    handler: Arc<dyn FlushHandler>,
    batch: Batch,
}

/// Per-key debounced batching scheduler.
///
/// Cheap to clone; clones share the same registry. Timers and flushes run
/// as Tokio tasks, so every method must be called from within a Tokio
/// runtime.
#[derive(Clone)]
pub struct WindowScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    config: SchedulerConfig,
    queues: Mutex<HashMap<String, SharedState>>,
    shutting_down: AtomicBool,
    /// Batches taken from a buffer whose handler has not settled yet.
    in_flight: AtomicUsize,
}

/// Lock a mutex, recovering the data if a previous holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn validate_fragment(fragment: &Fragment) -> Result<(), QueueError> {
    if let FragmentPayload::Image { media, .. } = &fragment.payload {
        if media.data.is_empty() {
            return Err(QueueError::InvalidFragment(
                "image payload is empty".to_string(),
            ));
        }
        if !media.is_image() {
            return Err(QueueError::InvalidFragment(format!(
                "unsupported media type: {}",
                media.mime_type
            )));
        }
    }
    Ok(())
}

impl WindowScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                queues: Mutex::new(HashMap::new()),
                shutting_down: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Add a fragment to `key`'s buffer.
    ///
    /// Creates the key's queue on first use and arms the debounce window if
    /// the key is idle. While a flush is in flight the fragment is only
    /// buffered; it is picked up when that flush completes. `handler`
    /// replaces whatever handler the key had.
    pub fn enqueue(
        &self,
        key: &str,
        mut fragment: Fragment,
        handler: Arc<dyn FlushHandler>,
    ) -> Result<(), QueueError> {
        if key.trim().is_empty() {
            return Err(QueueError::InvalidKey);
        }
        validate_fragment(&fragment)?;

        loop {
            let shared = {
                let mut queues = lock(&self.inner.queues);
                if self.inner.shutting_down.load(Ordering::SeqCst) {
                    return Err(QueueError::ShuttingDown);
                }
                Arc::clone(queues.entry(key.to_string()).or_insert_with(|| {
                    Arc::new(Mutex::new(QueueState::new(Arc::clone(&handler))))
                }))
            };

            let mut state = lock(&shared);
            if state.retired {
                // Reclaimed between lookup and lock; look it up again.
                continue;
            }

            let before = state.phase();
            state.handler = Arc::clone(&handler);
            fragment.arrival_order = state.next_order;
            state.next_order += 1;
            let kind = fragment.kind();
            state.buffer.push(fragment);

            if !state.processing {
                let now = Instant::now();
                if state.timer.is_none() {
                    state.burst_started = now;
                    let delay = self.inner.window_delay(state.burst_started, now);
                    self.inner.arm_timer(key, &mut state, delay);
                } else if let WindowPolicy::Sliding { .. } = self.inner.config.policy {
                    let delay = self.inner.window_delay(state.burst_started, now);
                    self.inner.arm_timer(key, &mut state, delay);
                }
            }

            debug!(
                key,
                kind = %kind,
                buffered = state.buffer.len(),
                "fragment enqueued"
            );
            self.inner.trace_phase(key, before, state.phase());
            return Ok(());
        }
    }

    /// Signal window expiry for `key` right away.
    ///
    /// An armed timer is cancelled and the buffer flushed as if the window
    /// had elapsed. If a flush is already in flight, a follow-up flush is
    /// scheduled to start as soon as it completes. Returns `false` when the
    /// key has no queue.
    pub fn flush_now(&self, key: &str) -> bool {
        let Some(shared) = self.inner.lookup(key) else {
            return false;
        };

        let work = {
            let mut state = lock(&shared);
            if state.retired {
                return false;
            }
            let before = state.phase();
            if let Some(timer) = state.timer.take() {
                timer.cancel();
            }
            let work = self.inner.expire(key, &shared, &mut state);
            self.inner.trace_phase(key, before, state.phase());
            work
        };

        if let Some(work) = work {
            let inner = Arc::clone(&self.inner);
            let key = key.to_string();
            tokio::spawn(async move { inner.drive(key, shared, work).await });
        }
        true
    }

    /// Whether a flush handler is currently running for `key`.
    pub fn is_processing(&self, key: &str) -> bool {
        self.status(key).is_processing()
    }

    /// Current lifecycle phase of `key`. Unknown keys are `Idle`.
    pub fn status(&self, key: &str) -> KeyPhase {
        match self.inner.lookup(key) {
            Some(shared) => lock(&shared).phase(),
            None => KeyPhase::Idle,
        }
    }

    /// Number of keys that currently hold queue state.
    pub fn active_keys(&self) -> usize {
        lock(&self.inner.queues).len()
    }

    /// Stop the scheduler.
    ///
    /// Cancels every armed timer and drops all buffered fragments. Flushes
    /// already in flight run to completion but trigger nothing afterwards.
    /// Later calls to `enqueue` fail with [`QueueError::ShuttingDown`].
    pub fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        let drained: Vec<(String, SharedState)> = lock(&self.inner.queues).drain().collect();

        let keys = drained.len();
        let mut in_flight = 0usize;
        let mut dropped = 0usize;
        for (_key, shared) in drained {
            let mut state = lock(&shared);
            state.retired = true;
            if let Some(timer) = state.timer.take() {
                timer.cancel();
            }
            dropped += state.buffer.len();
            state.buffer.clear();
            if state.processing {
                in_flight += 1;
            }
        }

        info!(
            keys,
            in_flight,
            dropped_fragments = dropped,
            "Window scheduler shut down"
        );
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Number of flushes whose handler is still running, across all keys.
    ///
    /// Unlike [`active_keys`](Self::active_keys) this keeps counting flushes
    /// that outlive a shutdown.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until no flush is in flight, polling every `poll`.
    ///
    /// Returns `false` if flushes were still running after `timeout`.
    pub async fn wait_idle(&self, timeout: Duration, poll: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let running = self.in_flight();
            if running == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                warn!(in_flight = running, "Flushes still running after drain timeout");
                return false;
            }
            debug!(in_flight = running, "waiting for in-flight flushes");
            tokio::time::sleep(poll.min(deadline.saturating_duration_since(Instant::now()))).await;
        }
    }
}

impl Inner {
    fn lookup(&self, key: &str) -> Option<SharedState> {
        lock(&self.queues).get(key).map(Arc::clone)
    }

    /// Delay until the window of a burst started at `burst_started` closes,
    /// measured from `now`.
    fn window_delay(&self, burst_started: Instant, now: Instant) -> Duration {
        let deadline = match self.config.policy {
            WindowPolicy::Fixed => burst_started + self.config.window,
            WindowPolicy::Sliding { max_wait } => {
                (now + self.config.window).min(burst_started + max_wait)
            }
        };
        deadline.saturating_duration_since(now)
    }

    /// Arm (or re-arm) the key's debounce timer.
    fn arm_timer(self: &Arc<Self>, key: &str, state: &mut QueueState, delay: Duration) {
        if let Some(previous) = state.timer.take() {
            previous.cancel();
        }
        state.timer_generation += 1;
        let generation = state.timer_generation;

        let inner = Arc::clone(self);
        let task_key = key.to_string();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.on_timer(task_key, generation).await;
        });
        state.timer = Some(TimerHandle::new(generation, task));
        debug!(key, delay_ms = delay.as_millis() as u64, "debounce window armed");
    }

    async fn on_timer(self: Arc<Self>, key: String, generation: u64) {
        let Some(shared) = self.lookup(&key) else {
            return;
        };

        let work = {
            let mut state = lock(&shared);
            let current = state.timer.as_ref().map(|t| t.generation);
            if state.retired || current != Some(generation) {
                // Superseded by a re-arm or cancelled after waking.
                return;
            }
            let before = state.phase();
            // Dropping our own handle detaches this task.
            state.timer = None;
            let work = self.expire(&key, &shared, &mut state);
            self.trace_phase(&key, before, state.phase());
            work
        };

        if let Some(work) = work {
            self.drive(key, shared, work).await;
        }
    }

    /// Handle window expiry with the key's lock held and its timer cleared.
    fn expire(
        self: &Arc<Self>,
        key: &str,
        shared: &SharedState,
        state: &mut QueueState,
    ) -> Option<PendingFlush> {
        if state.processing {
            if !state.deferred {
                debug!(key, "flush in flight, deferring");
            }
            state.deferred = true;
            return None;
        }
        self.begin_flush(key, shared, state)
    }

    /// Take the buffer and coalesce it into a batch.
    ///
    /// Returns `None` (and reclaims the key) when the buffer coalesces to
    /// nothing.
    fn begin_flush(
        &self,
        key: &str,
        shared: &SharedState,
        state: &mut QueueState,
    ) -> Option<PendingFlush> {
        let fragments = std::mem::take(&mut state.buffer);
        let fragment_count = fragments.len();
        let first_arrival = fragments.first().map_or(0, |f| f.arrival_order);
        let last_arrival = fragments.last().map_or(0, |f| f.arrival_order);
        let units = coalesce(fragments, &self.config.separator);

        if units.is_empty() {
            if fragment_count > 0 {
                debug!(key, fragment_count, "nothing to flush after coalescing");
            }
            self.reclaim(key, shared, state);
            return None;
        }

        state.processing = true;
        state.flushes += 1;
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Some(PendingFlush {
            handler: Arc::clone(&state.handler),
            batch: Batch {
                units,
                fragment_count,
                sequence: state.flushes,
                first_arrival,
                last_arrival,
            },
        })
    }

    /// Run flushes for a key until no follow-up is due.
    async fn drive(self: &Arc<Self>, key: String, shared: SharedState, mut work: PendingFlush) {
        loop {
            let PendingFlush { handler, batch } = work;
            let sequence = batch.sequence;
            info!(
                key = %key,
                sequence,
                units = batch.units.len(),
                fragments = batch.fragment_count,
                first_arrival = batch.first_arrival,
                last_arrival = batch.last_arrival,
                "Flushing batch"
            );

            let started = Instant::now();
            let task_key = key.clone();
            let outcome = tokio::spawn(async move { handler.flush(&task_key, batch).await })
                .await
                .unwrap_or_else(|e| {
                    if e.is_panic() {
                        Err(FlushError::Panicked(e.to_string()))
                    } else {
                        Err(FlushError::Failed(e.to_string()))
                    }
                });
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(()) => info!(key = %key, sequence, elapsed_ms, "Batch flushed"),
                Err(e) => warn!(key = %key, sequence, elapsed_ms, error = %e, "Flush failed"),
            }

            let next = {
                let mut state = lock(&shared);
                let before = state.phase();
                let next = self.complete_flush(&key, &shared, &mut state);
                self.trace_phase(&key, before, state.phase());
                next
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match next {
                Some(next) => work = next,
                None => return,
            }
        }
    }

    /// Settle the key after its handler returned.
    fn complete_flush(
        self: &Arc<Self>,
        key: &str,
        shared: &SharedState,
        state: &mut QueueState,
    ) -> Option<PendingFlush> {
        if state.retired {
            return None;
        }
        state.processing = false;

        if state.deferred {
            state.deferred = false;
            if !state.buffer.is_empty() {
                return self.begin_flush(key, shared, state);
            }
        }

        if state.buffer.is_empty() {
            self.reclaim(key, shared, state);
        } else {
            let now = Instant::now();
            state.burst_started = now;
            let delay = self.window_delay(now, now);
            self.arm_timer(key, state, delay);
        }
        None
    }

    /// Remove an idle key from the registry.
    fn reclaim(&self, key: &str, shared: &SharedState, state: &mut QueueState) {
        if !state.is_reclaimable() {
            return;
        }
        state.retired = true;
        let mut queues = lock(&self.queues);
        if queues.get(key).is_some_and(|current| Arc::ptr_eq(current, shared)) {
            queues.remove(key);
            debug!(key, flushes = state.flushes, "queue reclaimed");
        }
    }

    fn trace_phase(&self, key: &str, before: KeyPhase, after: KeyPhase) {
        if before == after {
            return;
        }
        debug_assert!(
            before.can_transition_to(&after),
            "invalid key phase transition: {} -> {}",
            before,
            after
        );
        debug!("Queue {} phase: {} -> {}", key, before, after);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use parley_core::types::Media;

    fn noop() -> Arc<dyn FlushHandler> {
        handler_fn(|_key, _batch| async { Ok(()) })
    }

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.window, Duration::from_secs(5));
        assert_eq!(config.policy, WindowPolicy::Fixed);
        assert_eq!(config.separator, ", ");
    }

    #[test]
    fn test_config_from_queue_config() {
        let queue = QueueConfig {
            window_ms: 2_000,
            mode: DebounceMode::Sliding,
            max_wait_ms: 8_000,
            text_separator: " | ".to_string(),
        };
        let config = SchedulerConfig::from(&queue);
        assert_eq!(config.window, Duration::from_millis(2_000));
        assert_eq!(
            config.policy,
            WindowPolicy::Sliding {
                max_wait: Duration::from_millis(8_000)
            }
        );
        assert_eq!(config.separator, " | ");

        let fixed = SchedulerConfig::from(&QueueConfig::default());
        assert_eq!(fixed.policy, WindowPolicy::Fixed);
    }

    #[test]
    fn test_config_clamps_sliding_cap_to_window() {
        for max_wait_ms in [0, 1_000] {
            let queue = QueueConfig {
                window_ms: 3_000,
                mode: DebounceMode::Sliding,
                max_wait_ms,
                text_separator: ", ".to_string(),
            };
            let config = SchedulerConfig::from(&queue);
            assert_eq!(
                config.policy,
                WindowPolicy::Sliding {
                    max_wait: Duration::from_millis(3_000)
                }
            );
        }
    }

    #[tokio::test]
    async fn test_enqueue_rejects_empty_key() {
        let scheduler = WindowScheduler::new(SchedulerConfig::default());
        let err = scheduler.enqueue("  ", Fragment::text("x"), noop()).unwrap_err();
        assert!(matches!(err, QueueError::InvalidKey));
        assert_eq!(scheduler.active_keys(), 0);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_empty_image() {
        let scheduler = WindowScheduler::new(SchedulerConfig::default());
        let fragment = Fragment::image("cap", Media::new(Vec::new(), "image/png", "a.png"));
        let err = scheduler.enqueue("k", fragment, noop()).unwrap_err();
        assert!(matches!(err, QueueError::InvalidFragment(_)));
        assert_eq!(scheduler.status("k"), KeyPhase::Idle);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_non_image_media() {
        let scheduler = WindowScheduler::new(SchedulerConfig::default());
        let fragment = Fragment::image("", Media::new(vec![1], "application/pdf", "a.pdf"));
        let err = scheduler.enqueue("k", fragment, noop()).unwrap_err();
        assert!(err.to_string().contains("application/pdf"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_arms_window() {
        let scheduler = WindowScheduler::new(SchedulerConfig::default());
        assert_eq!(scheduler.status("k"), KeyPhase::Idle);

        scheduler.enqueue("k", Fragment::text("hola"), noop()).unwrap();
        assert_eq!(scheduler.status("k"), KeyPhase::Waiting);
        assert!(!scheduler.is_processing("k"));
        assert_eq!(scheduler.active_keys(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_idle_without_flushes() {
        let scheduler = WindowScheduler::new(SchedulerConfig::default());
        scheduler.enqueue("k", Fragment::text("a"), noop()).unwrap();
        assert_eq!(scheduler.in_flight(), 0);
        assert!(
            scheduler
                .wait_idle(Duration::from_secs(1), Duration::from_millis(10))
                .await
        );
    }

    #[tokio::test]
    async fn test_flush_now_unknown_key() {
        let scheduler = WindowScheduler::new(SchedulerConfig::default());
        assert!(!scheduler.flush_now("nobody"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_rejects_enqueue() {
        let scheduler = WindowScheduler::new(SchedulerConfig::default());
        scheduler.enqueue("k", Fragment::text("a"), noop()).unwrap();
        scheduler.shutdown();

        assert!(scheduler.is_shut_down());
        assert_eq!(scheduler.active_keys(), 0);
        assert_eq!(scheduler.status("k"), KeyPhase::Idle);
        let err = scheduler.enqueue("k", Fragment::text("b"), noop()).unwrap_err();
        assert!(matches!(err, QueueError::ShuttingDown));
    }

    #[test]
    fn test_window_delay_fixed() {
        let inner = Inner {
            config: SchedulerConfig::default(),
            queues: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
        };
        let start = Instant::now();
        let later = start + Duration::from_secs(3);
        assert_eq!(inner.window_delay(start, start), Duration::from_secs(5));
        assert_eq!(inner.window_delay(start, later), Duration::from_secs(2));
    }

    #[test]
    fn test_window_delay_sliding_capped() {
        let inner = Inner {
            config: SchedulerConfig {
                window: Duration::from_secs(5),
                policy: WindowPolicy::Sliding {
                    max_wait: Duration::from_secs(12),
                },
                separator: ", ".to_string(),
            },
            queues: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
        };
        let start = Instant::now();
        assert_eq!(inner.window_delay(start, start), Duration::from_secs(5));
        assert_eq!(
            inner.window_delay(start, start + Duration::from_secs(4)),
            Duration::from_secs(5)
        );
        // 8s into the burst: 8 + 5 = 13 exceeds the 12s cap.
        assert_eq!(
            inner.window_delay(start, start + Duration::from_secs(8)),
            Duration::from_secs(4)
        );
        assert_eq!(
            inner.window_delay(start, start + Duration::from_secs(20)),
            Duration::ZERO
        );
    }
}
