//! Shared state for one in-flight search: cooperative cancellation and the
//! first-hit cell that concurrent branches race to claim.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Cooperative cancellation handle.
///
/// Cancellation is best-effort only: a set token prevents not-yet-started
/// branches from doing further work, but a branch already past its entry
/// check runs to completion and its result is discarded. Tokens are cheap
/// to clone; clones share the underlying flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// First-hit cell raced by the branches of a single search call.
///
/// The flag alone is not enough: two branches can both observe it unset
/// before either stores, so the winner slot is guarded by a mutex and only
/// the first claimant writes it.
pub(crate) struct FirstHit<F> {
    found: AtomicBool,
    winner: Mutex<Option<F>>,
}

impl<F: Clone> FirstHit<F> {
    pub(crate) fn new() -> Self {
        Self {
            found: AtomicBool::new(false),
            winner: Mutex::new(None),
        }
    }

    /// Cheap pre-check used at every recursive entry point.
    pub(crate) fn is_set(&self) -> bool {
        self.found.load(Ordering::Acquire)
    }

    /// Offer `value` as the search result. The first claimant wins; later
    /// claimants still get their own value back so sequential callers can
    /// short-circuit, but the stored winner is unchanged.
    pub(crate) fn claim(&self, value: F) -> F {
        let mut slot = self.winner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_none() {
            *slot = Some(value.clone());
            self.found.store(true, Ordering::Release);
        }
        value
    }

    /// Take the winning value once all branches have settled.
    pub(crate) fn take(&self) -> Option<F> {
        self.winner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}
