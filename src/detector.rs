//! Near-duplicate detection across several fingerprint indices.
//!
//! A detector owns one metric tree per fingerprint kind ("lane"): each lane
//! pairs an encoder that turns a raw item into that kind's fingerprint with
//! a distance function and a match threshold. Adding an item writes every
//! lane; a duplicate check races all lanes concurrently and reports a match
//! as soon as any single lane finds one, cancelling the rest best-effort.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Instant;

use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::error::{DetectorError, EncodeError};
use crate::metric::Distance;
use crate::metrics::metrics_recorder;
use crate::search::CancelToken;
use crate::tree::MetricTree;

#[cfg(test)]
mod tests;

/// One fingerprint kind registered with the detector, with its fingerprint
/// type erased so lanes of different kinds can live in one list.
trait DetectorLane<R>: Send + Sync {
    fn name(&self) -> &str;
    fn validate(&self) -> Result<(), DetectorError>;
    fn add(&self, item: &R, label: Option<&str>) -> Result<(), DetectorError>;
    /// Encode up front, then hand back the tree search as a closure; the
    /// encoder runs on the caller thread so its failure propagates instead
    /// of disappearing inside the race.
    fn probe(&self, item: &R) -> Result<LaneProbe, DetectorError>;
    fn len(&self) -> usize;
}

/// A ready-to-run bounded search over one lane's tree.
struct LaneProbe {
    lane: String,
    run: Box<dyn FnOnce(&CancelToken) -> bool + Send>,
}

struct Lane<R, F> {
    name: String,
    encoder: Box<dyn Fn(&R) -> Result<F, EncodeError> + Send + Sync>,
    tree: Arc<RwLock<MetricTree<F>>>,
    search: SearchConfig,
}

impl<R, F: Clone + Send + Sync> Lane<R, F> {
    fn encode(&self, item: &R) -> Result<F, DetectorError> {
        (self.encoder)(item).map_err(|err| DetectorError::invalid_input(&self.name, err))
    }
}

impl<R, F> DetectorLane<R> for Lane<R, F>
where
    R: 'static,
    F: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<(), DetectorError> {
        self.search.validate().map_err(|err| match err {
            DetectorError::InvalidConfig(msg) => {
                DetectorError::InvalidConfig(format!("lane `{}`: {msg}", self.name))
            }
            other => other,
        })
    }

    fn add(&self, item: &R, label: Option<&str>) -> Result<(), DetectorError> {
        let fingerprint = self.encode(item)?;
        let mut tree = self.tree.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        tree.insert(fingerprint, label);
        Ok(())
    }

    fn probe(&self, item: &R) -> Result<LaneProbe, DetectorError> {
        let fingerprint = self.encode(item)?;
        let tree = Arc::clone(&self.tree);
        let search = self.search.clone();
        Ok(LaneProbe {
            lane: self.name.clone(),
            run: Box::new(move |cancel| {
                let tree = tree.read().unwrap_or_else(|poisoned| poisoned.into_inner());
                tree.search_within_opts(&fingerprint, &search, cancel).is_some()
            }),
        })
    }

    fn len(&self) -> usize {
        self.tree
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// Builder for [`NearDuplicateDetector`].
///
/// Lanes are fixed at build time; the detector grows monotonically for the
/// rest of its life as items are added.
pub struct DetectorBuilder<R> {
    lanes: Vec<Arc<dyn DetectorLane<R>>>,
}

impl<R: 'static> DetectorBuilder<R> {
    pub fn new() -> Self {
        Self { lanes: Vec::new() }
    }

    /// Register a fingerprint kind with the default [`SearchConfig`].
    pub fn lane<F, E, D>(
        self,
        name: impl Into<String>,
        encoder: E,
        metric: D,
        match_threshold: u32,
    ) -> Self
    where
        F: Clone + Send + Sync + 'static,
        E: Fn(&R) -> Result<F, EncodeError> + Send + Sync + 'static,
        D: Distance<F> + 'static,
    {
        self.lane_with(name, encoder, metric, match_threshold, SearchConfig::default())
    }

    /// Register a fingerprint kind with an explicit search configuration,
    /// e.g. a lower parallelism cutoff for a lane with an expensive metric.
    pub fn lane_with<F, E, D>(
        mut self,
        name: impl Into<String>,
        encoder: E,
        metric: D,
        match_threshold: u32,
        search: SearchConfig,
    ) -> Self
    where
        F: Clone + Send + Sync + 'static,
        E: Fn(&R) -> Result<F, EncodeError> + Send + Sync + 'static,
        D: Distance<F> + 'static,
    {
        self.lanes.push(Arc::new(Lane {
            name: name.into(),
            encoder: Box::new(encoder),
            tree: Arc::new(RwLock::new(MetricTree::new(metric, match_threshold))),
            search,
        }));
        self
    }

    pub fn build(self) -> Result<NearDuplicateDetector<R>, DetectorError> {
        if self.lanes.is_empty() {
            return Err(DetectorError::NoLanes);
        }
        let mut seen = HashSet::new();
        for lane in &self.lanes {
            if !seen.insert(lane.name().to_string()) {
                return Err(DetectorError::DuplicateLane(lane.name().to_string()));
            }
            lane.validate()?;
        }
        Ok(NearDuplicateDetector { lanes: self.lanes })
    }
}

impl<R: 'static> Default for DetectorBuilder<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// Multi-index near-duplicate detector.
///
/// Insertion and checking may be called concurrently from any thread; each
/// lane's tree sits behind a `RwLock`, so inserts take the write side and
/// searches the read side.
pub struct NearDuplicateDetector<R> {
    lanes: Vec<Arc<dyn DetectorLane<R>>>,
}

impl<R: 'static> NearDuplicateDetector<R> {
    pub fn builder() -> DetectorBuilder<R> {
        DetectorBuilder::new()
    }

    /// Fingerprint `item` on every lane and store each code in its tree.
    ///
    /// No duplicate check happens here, so duplicates can be added freely;
    /// call [`is_near_duplicate`](Self::is_near_duplicate) first if the
    /// dataset must stay duplicate-free. An encoder failure aborts this
    /// item with [`DetectorError::InvalidInput`]; lanes already written for
    /// it stay written.
    pub fn add(&self, item: &R, label: Option<&str>) -> Result<(), DetectorError> {
        for lane in &self.lanes {
            lane.add(item, label)?;
        }
        Ok(())
    }

    /// Is `item` within any lane's match threshold of something already
    /// indexed?
    ///
    /// All lanes are encoded up front (an encoder failure propagates,
    /// aborting only this check), then raced on one thread per lane with a
    /// shared cancel token. The first positive result wins and the call
    /// returns without waiting for slower lanes; they self-abort at their
    /// next cancellation check. `false` is returned only after every lane
    /// reported no match.
    ///
    /// A lane probe that panics is logged and treated as "found nothing";
    /// the overall result proceeds from the remaining lanes (fail-open).
    pub fn is_near_duplicate(&self, item: &R) -> Result<bool, DetectorError> {
        let start = Instant::now();

        let mut probes = Vec::with_capacity(self.lanes.len());
        for lane in &self.lanes {
            probes.push(lane.probe(item)?);
        }

        let cancel = CancelToken::new();
        let (tx, rx) = mpsc::channel();
        for LaneProbe { lane, run } in probes {
            let tx = tx.clone();
            let cancel = cancel.clone();
            let spawned = thread::Builder::new()
                .name(format!("fpindex-probe-{lane}"))
                .spawn(move || {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| run(&cancel)));
                    // The receiver may be gone already if another lane won.
                    let _ = tx.send((lane, outcome));
                });
            if let Err(err) = spawned {
                warn!(error = %err, "failed to spawn lane probe; treating lane as no match");
            }
        }
        drop(tx);

        let mut duplicate = false;
        let mut completed = 0usize;
        for (lane, outcome) in rx {
            completed += 1;
            match outcome {
                Ok(true) => {
                    cancel.cancel();
                    debug!(%lane, "lane found a match; cancelling remaining probes");
                    duplicate = true;
                    break;
                }
                Ok(false) => {}
                Err(_) => {
                    warn!(%lane, "lane probe panicked; treating lane as no match");
                }
            }
        }

        if let Some(recorder) = metrics_recorder() {
            recorder.record_check(duplicate, start.elapsed(), completed);
        }
        Ok(duplicate)
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Stored fingerprint count per lane, in registration order.
    pub fn sizes(&self) -> Vec<(String, usize)> {
        self.lanes
            .iter()
            .map(|lane| (lane.name().to_string(), lane.len()))
            .collect()
    }
}
