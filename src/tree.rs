//! Metric tree (BK-tree) over opaque fingerprint codes.
//!
//! Every node keys its children by the exact distance between its own value
//! and the child's value, which lets a bounded-radius search discard whole
//! subtrees via the triangle inequality: a child at edge label `c` can only
//! contain a match for a query at distance `d` when `|d - c| <= threshold`.
//!
//! The tree is append-only. There is no deletion, no rebalancing, and no
//! cap on depth or fan-out; many equidistant inserts degrade to a chain,
//! which is an accepted limitation of the structure.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::metric::Distance;
use crate::search::{CancelToken, FirstHit};


/// A stored fingerprint with its children keyed by exact distance.
///
/// Nodes are exclusively owned by their parent (the tree owns the root);
/// `subtree_size` is `1 +` the sum of the children's sizes and exists only
/// to drive the sequential/parallel decision during search. It is refreshed
/// bottom-up along every insertion path, so a momentarily stale value is
/// tolerable.
pub struct MetricNode<F> {
    value: F,
    label: Option<String>,
    children: BTreeMap<u32, MetricNode<F>>,
    subtree_size: usize,
}

impl<F> MetricNode<F> {
    fn leaf(value: F, label: Option<String>) -> Self {
        Self {
            value,
            label,
            children: BTreeMap::new(),
            subtree_size: 1,
        }
    }

    pub fn value(&self) -> &F {
        &self.value
    }

    /// Opaque identifier recorded at insert time (e.g. a source path).
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn subtree_size(&self) -> usize {
        self.subtree_size
    }

    /// Child reached via the given edge label, if any.
    pub fn child(&self, distance: u32) -> Option<&MetricNode<F>> {
        self.children.get(&distance)
    }

    /// Children in ascending edge-label order.
    pub fn children(&self) -> impl Iterator<Item = (u32, &MetricNode<F>)> {
        self.children.iter().map(|(dist, child)| (*dist, child))
    }

    fn refresh_subtree_size(&mut self) {
        self.subtree_size = 1 + self.children.values().map(|c| c.subtree_size).sum::<usize>();
    }
}

/// Append-only metric tree answering "is anything within `match_threshold`
/// of this query?".
///
/// The distance function must be non-negative, symmetric, and satisfy the
/// triangle inequality; pruning correctness depends on it. The tree itself
/// never inspects fingerprint values.
pub struct MetricTree<F> {
    root: Option<MetricNode<F>>,
    metric: Arc<dyn Distance<F>>,
    match_threshold: u32,
}

impl<F: Clone + Send + Sync> MetricTree<F> {
    pub fn new(metric: impl Distance<F> + 'static, match_threshold: u32) -> Self {
        Self {
            root: None,
            metric: Arc::new(metric),
            match_threshold,
        }
    }

    pub fn match_threshold(&self) -> u32 {
        self.match_threshold
    }

    /// Number of stored fingerprints.
    pub fn len(&self) -> usize {
        self.root.as_ref().map_or(0, |root| root.subtree_size)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Root node, for structure inspection. `None` until the first insert.
    pub fn root(&self) -> Option<&MetricNode<F>> {
        self.root.as_ref()
    }

    /// Insert a fingerprint with an optional label.
    ///
    /// Descends from the root; at each node, an existing child at the exact
    /// computed distance means the value recurses into that child, so two
    /// distinct values can never sit as siblings at the same edge label.
    /// Subtree sizes along the insertion path are recomputed bottom-up.
    pub fn insert(&mut self, value: F, label: Option<&str>) {
        let label = label.map(str::to_owned);
        match self.root.as_mut() {
            None => self.root = Some(MetricNode::leaf(value, label)),
            Some(root) => Self::insert_below(&*self.metric, root, value, label),
        }
    }

    fn insert_below(
        metric: &dyn Distance<F>,
        node: &mut MetricNode<F>,
        value: F,
        label: Option<String>,
    ) {
        let dist = metric.distance(&node.value, &value);
        match node.children.entry(dist) {
            Entry::Occupied(mut entry) => {
                Self::insert_below(metric, entry.get_mut(), value, label);
            }
            Entry::Vacant(entry) => {
                entry.insert(MetricNode::leaf(value, label));
            }
        }
        node.refresh_subtree_size();
    }

    /// Find any stored fingerprint within `match_threshold` of `query`,
    /// using the default [`SearchConfig`] and a fresh cancel token.
    pub fn search_within(&self, query: &F) -> Option<F> {
        self.search_within_opts(query, &SearchConfig::default(), &CancelToken::new())
    }

    /// Bounded-radius search with explicit scheduling and cancellation.
    ///
    /// Returns the first stored value found within `match_threshold`, or
    /// `None` when nothing qualifies, the tree is empty, or `cancel` was
    /// set. Exhaustive traversal is not attempted: the search stops
    /// scheduling work as soon as any branch claims a hit. Which of several
    /// qualifying values wins is unspecified and may vary run to run.
    ///
    /// Subtrees at least `parallel_min_subtree` large fan their eligible
    /// children out onto a worker pool of `max_workers` threads scoped to
    /// this call; everything smaller is walked sequentially. The choice
    /// never affects whether a match is found, only how fast.
    pub fn search_within_opts(
        &self,
        query: &F,
        cfg: &SearchConfig,
        cancel: &CancelToken,
    ) -> Option<F> {
        let root = self.root.as_ref()?;

        // Sizes only shrink toward the leaves, so the root alone decides
        // whether this call can need a pool.
        let wants_pool = root.subtree_size >= cfg.parallel_min_subtree && cfg.max_workers > 1;
        let pool = if wants_pool {
            match ThreadPoolBuilder::new().num_threads(cfg.max_workers).build() {
                Ok(pool) => Some(pool),
                Err(err) => {
                    warn!(error = %err, "search worker pool unavailable; falling back to sequential traversal");
                    None
                }
            }
        } else {
            None
        };

        let ctx = SearchCtx {
            metric: &*self.metric,
            threshold: self.match_threshold,
            parallel_min_subtree: if pool.is_some() {
                cfg.parallel_min_subtree
            } else {
                usize::MAX
            },
            first_hit: FirstHit::new(),
            cancel,
            visited: AtomicUsize::new(0),
        };

        let _ = match &pool {
            Some(pool) => pool.install(|| ctx.visit(root, query)),
            None => ctx.visit(root, query),
        };

        let hit = ctx.first_hit.take();
        debug!(
            visited = ctx.visited.load(Ordering::Relaxed),
            tree_len = root.subtree_size,
            matched = hit.is_some(),
            "bounded search finished"
        );
        hit
    }

    /// Check the bottom-up size invariant over the whole tree.
    #[doc(hidden)]
    pub fn subtree_sizes_consistent(&self) -> bool {
        fn check<F>(node: &MetricNode<F>) -> Option<usize> {
            let mut total = 1;
            for child in node.children.values() {
                total += check(child)?;
            }
            (total == node.subtree_size).then_some(total)
        }
        self.root.as_ref().map_or(true, |root| check(root).is_some())
    }
}

/// Per-call search state shared by all branches, sequential or pooled.
struct SearchCtx<'a, F> {
    metric: &'a dyn Distance<F>,
    threshold: u32,
    parallel_min_subtree: usize,
    first_hit: FirstHit<F>,
    cancel: &'a CancelToken,
    visited: AtomicUsize,
}

impl<F: Clone + Send + Sync> SearchCtx<'_, F> {
    fn visit(&self, node: &MetricNode<F>, query: &F) -> Option<F> {
        if self.cancel.is_cancelled() || self.first_hit.is_set() {
            return None;
        }
        self.visited.fetch_add(1, Ordering::Relaxed);

        let dist = self.metric.distance(query, &node.value);
        if dist <= self.threshold {
            return Some(self.first_hit.claim(node.value.clone()));
        }

        // Triangle-inequality pruning: only children whose edge label lies
        // in [dist - threshold, dist + threshold] can contain a match.
        let lo = dist.saturating_sub(self.threshold);
        let hi = dist.saturating_add(self.threshold);

        if node.subtree_size < self.parallel_min_subtree {
            node.children
                .range(lo..=hi)
                .find_map(|(_, child)| self.visit(child, query))
        } else {
            let eligible: Vec<&MetricNode<F>> =
                node.children.range(lo..=hi).map(|(_, child)| child).collect();
            eligible
                .into_par_iter()
                .find_map_any(|child| self.visit(child, query))
        }
    }
}
