//! # fpindex
//!
//! ## Purpose
//!
//! `fpindex` answers one question fast: *does any stored fingerprint lie
//! within distance T of this query?*, without scanning every stored item.
//! Fingerprints are opaque, fixed-format codes produced elsewhere
//! (perceptual hashes, structured digests); the index only ever compares
//! them through a caller-supplied distance function.
//!
//! Two layers:
//! - [`MetricTree`]: an append-only BK-tree with triangle-inequality
//!   pruning and an adaptive sequential/parallel search keyed off subtree
//!   size.
//! - [`NearDuplicateDetector`]: several independently-thresholded trees
//!   ("lanes", one per fingerprint kind) raced concurrently; the first
//!   positive result wins and the rest are cancelled best-effort.
//!
//! The index is deliberately not an exact nearest-neighbor structure: it
//! reports *existence* of a close match, not the closest element, and it
//! offers no deletion, rebalancing, or persistence.
//!
//! ## Core Types
//!
//! - [`Distance`]: the metric seam; implemented by [`Hamming`] and by any
//!   `Fn(&F, &F) -> u32` closure. Must be non-negative, symmetric, and
//!   triangle-inequality; pruning correctness depends on it.
//! - [`MetricTree`] / [`MetricNode`]: the tree and its nodes.
//! - [`SearchConfig`]: subtree cutoff and worker-pool width for one search.
//! - [`CancelToken`]: cooperative, best-effort cancellation.
//! - [`DetectorBuilder`] / [`NearDuplicateDetector`]: multi-lane detection.
//! - [`DetectorMetrics`] / [`set_detector_metrics`]: observability hook.
//!
//! ## Example Usage
//!
//! ```
//! use fpindex::{DetectorBuilder, EncodeError, Hamming};
//!
//! // Toy encoders: real deployments derive the codes from content.
//! let detector = DetectorBuilder::new()
//!     .lane("average", |code: &u64| Ok::<u64, EncodeError>(*code), Hamming, 5)
//!     .lane("gradient", |code: &u64| Ok(code.rotate_left(1)), Hamming, 17)
//!     .build()
//!     .expect("at least one lane");
//!
//! detector.add(&0b0011_u64, Some("photos/cat.png")).unwrap();
//! assert!(detector.is_near_duplicate(&0b0111_u64).unwrap());
//! assert!(!detector.is_near_duplicate(&u64::MAX).unwrap());
//! ```
//!
//! ## Concurrency contract
//!
//! Worker pools are scoped to a single search call; no background threads
//! outlive a call. Which of several qualifying matches wins a race is
//! unspecified: the contract is existence, not determinism. Cancellation
//! stops work that has not started yet; in-flight branches finish and their
//! results are discarded.

pub mod config;
pub mod detector;
pub mod error;
pub mod metric;
pub mod metrics;
pub mod search;
pub mod tree;

pub use crate::config::SearchConfig;
pub use crate::detector::{DetectorBuilder, NearDuplicateDetector};
pub use crate::error::{DetectorError, EncodeError};
pub use crate::metric::{Distance, Hamming};
pub use crate::metrics::{set_detector_metrics, DetectorMetrics};
pub use crate::search::CancelToken;
pub use crate::tree::{MetricNode, MetricTree};
