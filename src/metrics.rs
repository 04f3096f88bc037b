// Metrics hooks for the near-duplicate detector.
//
// Callers install a global `DetectorMetrics` implementation via
// [`set_detector_metrics`], then `NearDuplicateDetector` reports outcome and
// latency for each call to `is_near_duplicate`. This keeps instrumentation
// decoupled from any specific metrics backend.
use std::sync::{Arc, RwLock};
use std::time::Duration;

use once_cell::sync::OnceCell;

/// Metrics observer for near-duplicate checks.
pub trait DetectorMetrics: Send + Sync {
    /// Record the outcome of one duplicate check.
    ///
    /// `duplicate` is the boolean returned to the caller, `latency` the
    /// wall-clock duration of the whole check, and `lanes_completed` how
    /// many lane probes had reported before the check returned (fewer than
    /// the lane count when a positive result cut the race short).
    fn record_check(&self, duplicate: bool, latency: Duration, lanes_completed: usize);
}

fn metrics_lock() -> &'static RwLock<Option<Arc<dyn DetectorMetrics>>> {
    static METRICS: OnceCell<RwLock<Option<Arc<dyn DetectorMetrics>>>> = OnceCell::new();
    METRICS.get_or_init(|| RwLock::new(None))
}

pub(crate) fn metrics_recorder() -> Option<Arc<dyn DetectorMetrics>> {
    let guard = metrics_lock()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    guard.clone()
}

/// Install or clear the global detector metrics recorder.
///
/// Typically called once during service startup so all detectors share the
/// same metrics backend.
pub fn set_detector_metrics(recorder: Option<Arc<dyn DetectorMetrics>>) {
    let lock = metrics_lock();
    let mut guard = lock.write().expect("detector metrics lock poisoned");
    *guard = recorder;
}
