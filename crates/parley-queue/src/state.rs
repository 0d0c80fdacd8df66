//! Per-key queue state and its observable lifecycle.
//!
//! Valid phase transitions for a key:
//! - Idle -> Waiting (first fragment arrives, window armed)
//! - Waiting -> Flushing (window expires with units to deliver)
//! - Waiting -> Idle (window expires with nothing but blank text)
//! - Flushing -> FlushDeferred (window signal while the handler runs)
//! - Flushing -> Waiting (handler done, fragments arrived meanwhile)
//! - Flushing -> Idle (handler done, buffer empty, key reclaimed)
//! - FlushDeferred -> Flushing (handler done, deferred flush starts at once)
//! - FlushDeferred -> Idle (handler done, nothing left to flush)

use std::fmt;
use std::sync::Arc;

use parley_core::types::Fragment;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::handler::FlushHandler;

/// Observable lifecycle phase of one conversation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPhase {
    /// No buffered fragments, no timer, no flush in flight.
    Idle,
    /// Fragments buffered and the debounce timer armed.
    Waiting,
    /// The flush handler is running for this key.
    Flushing,
    /// The handler is running and another flush must follow immediately.
    FlushDeferred,
}

impl fmt::Display for KeyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPhase::Idle => write!(f, "Idle"),
            KeyPhase::Waiting => write!(f, "Waiting"),
            KeyPhase::Flushing => write!(f, "Flushing"),
            KeyPhase::FlushDeferred => write!(f, "FlushDeferred"),
        }
    }
}

impl KeyPhase {
    /// Returns whether a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: &KeyPhase) -> bool {
        matches!(
            (self, target),
            (KeyPhase::Idle, KeyPhase::Waiting)
                | (KeyPhase::Waiting, KeyPhase::Flushing)
                | (KeyPhase::Waiting, KeyPhase::Idle)
                | (KeyPhase::Flushing, KeyPhase::FlushDeferred)
                | (KeyPhase::Flushing, KeyPhase::Waiting)
                | (KeyPhase::Flushing, KeyPhase::Idle)
                | (KeyPhase::FlushDeferred, KeyPhase::Flushing)
                | (KeyPhase::FlushDeferred, KeyPhase::Idle)
        )
    }

    /// True while a flush handler is running for the key.
    pub fn is_processing(&self) -> bool {
        matches!(self, KeyPhase::Flushing | KeyPhase::FlushDeferred)
    }
}

/// An armed debounce timer.
///
/// `generation` identifies the arming; a timer task that wakes after it was
/// superseded finds a different generation in the state and does nothing.
pub(crate) struct TimerHandle {
    pub(crate) generation: u64,
    task: JoinHandle<()>,
}

impl TimerHandle {
    pub(crate) fn new(generation: u64, task: JoinHandle<()>) -> Self {
        Self { generation, task }
    }

    pub(crate) fn cancel(self) {
        self.task.abort();
    }
}

/// Mutable bookkeeping for one key.
///
/// Always accessed under the key's own mutex, never across an await.
pub(crate) struct QueueState {
    pub(crate) buffer: Vec<Fragment>,
    pub(crate) timer: Option<TimerHandle>,
    pub(crate) processing: bool,
    pub(crate) deferred: bool,
    /// Most recently supplied handler; replaced on every enqueue.
    pub(crate) handler: Arc<dyn FlushHandler>,
    /// Start of the current burst, used to cap sliding windows.
    pub(crate) burst_started: Instant,
    pub(crate) next_order: u64,
    pub(crate) timer_generation: u64,
    pub(crate) flushes: u64,
    /// Set once the state is removed from the registry (reclaimed or shut
    /// down). Holders of a stale reference must look the key up again.
    pub(crate) retired: bool,
}

impl QueueState {
    pub(crate) fn new(handler: Arc<dyn FlushHandler>) -> Self {
        Self {
            buffer: Vec::new(),
            timer: None,
            processing: false,
            deferred: false,
            handler,
            burst_started: Instant::now(),
            next_order: 0,
            timer_generation: 0,
            flushes: 0,
            retired: false,
        }
    }

    pub(crate) fn phase(&self) -> KeyPhase {
        if self.retired {
            KeyPhase::Idle
        } else if self.processing {
            if self.deferred {
                KeyPhase::FlushDeferred
            } else {
                KeyPhase::Flushing
            }
        } else if self.timer.is_some() {
            KeyPhase::Waiting
        } else {
            KeyPhase::Idle
        }
    }

    /// Nothing buffered, no timer, no flush in flight.
    pub(crate) fn is_reclaimable(&self) -> bool {
        self.buffer.is_empty() && self.timer.is_none() && !self.processing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;

    fn state() -> QueueState {
        QueueState::new(handler_fn(|_key, _batch| async { Ok(()) }))
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(KeyPhase::Idle.to_string(), "Idle");
        assert_eq!(KeyPhase::Waiting.to_string(), "Waiting");
        assert_eq!(KeyPhase::Flushing.to_string(), "Flushing");
        assert_eq!(KeyPhase::FlushDeferred.to_string(), "FlushDeferred");
    }

    #[test]
    fn test_valid_transitions() {
        assert!(KeyPhase::Idle.can_transition_to(&KeyPhase::Waiting));
        assert!(KeyPhase::Waiting.can_transition_to(&KeyPhase::Flushing));
        assert!(KeyPhase::Waiting.can_transition_to(&KeyPhase::Idle));
        assert!(KeyPhase::Flushing.can_transition_to(&KeyPhase::FlushDeferred));
        assert!(KeyPhase::Flushing.can_transition_to(&KeyPhase::Waiting));
        assert!(KeyPhase::Flushing.can_transition_to(&KeyPhase::Idle));
        assert!(KeyPhase::FlushDeferred.can_transition_to(&KeyPhase::Flushing));
        assert!(KeyPhase::FlushDeferred.can_transition_to(&KeyPhase::Idle));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!KeyPhase::Idle.can_transition_to(&KeyPhase::Flushing));
        assert!(!KeyPhase::Idle.can_transition_to(&KeyPhase::FlushDeferred));
        assert!(!KeyPhase::Waiting.can_transition_to(&KeyPhase::FlushDeferred));
        assert!(!KeyPhase::FlushDeferred.can_transition_to(&KeyPhase::Waiting));
        assert!(!KeyPhase::Idle.can_transition_to(&KeyPhase::Idle));
    }

    #[test]
    fn test_is_processing() {
        assert!(!KeyPhase::Idle.is_processing());
        assert!(!KeyPhase::Waiting.is_processing());
        assert!(KeyPhase::Flushing.is_processing());
        assert!(KeyPhase::FlushDeferred.is_processing());
    }

    #[test]
    fn test_phase_derivation() {
        let mut s = state();
        assert_eq!(s.phase(), KeyPhase::Idle);
        assert!(s.is_reclaimable());

        s.processing = true;
        assert_eq!(s.phase(), KeyPhase::Flushing);
        assert!(!s.is_reclaimable());

        s.deferred = true;
        assert_eq!(s.phase(), KeyPhase::FlushDeferred);

        s.retired = true;
        assert_eq!(s.phase(), KeyPhase::Idle);
    }

    #[test]
    fn test_buffered_state_is_not_reclaimable() {
        let mut s = state();
        s.buffer.push(Fragment::text("hola"));
        assert!(!s.is_reclaimable());
    }

    #[test]
    fn test_phase_serializes_snake_case() {
        let json = serde_json::to_string(&KeyPhase::FlushDeferred).unwrap();
        assert_eq!(json, "\"flush_deferred\"");
    }
}
