use super::*;
use std::time::Duration;

use crate::metric::Hamming;
use crate::metrics::{set_detector_metrics, DetectorMetrics};

fn sample_detector() -> NearDuplicateDetector<u64> {
    DetectorBuilder::new()
        .lane("identity", |code: &u64| Ok(*code), Hamming, 2)
        .lane_with(
            "inverted",
            |code: &u64| Ok(!*code),
            Hamming,
            4,
            SearchConfig::new().with_parallel_min_subtree(10),
        )
        .build()
        .expect("two valid lanes")
}

#[test]
fn reports_duplicate_when_any_lane_matches() {
    let detector = sample_detector();
    detector.add(&0b0000u64, Some("origin")).expect("add");
    assert!(detector.is_near_duplicate(&0b0001).expect("check"));
}

#[test]
fn reports_false_when_all_lanes_miss() {
    let detector = sample_detector();
    detector.add(&0b0000u64, None).expect("add");
    // Eight differing bits miss the identity threshold (2) and, after
    // inversion, the inverted threshold (4) as well.
    assert!(!detector.is_near_duplicate(&0xFF).expect("check"));
}

#[test]
fn equivalent_to_or_of_lane_searches() {
    let detector = sample_detector();
    let mut identity_tree = MetricTree::new(Hamming, 2);
    let mut inverted_tree = MetricTree::new(Hamming, 4);

    let mut state = 0xDEADu64;
    let mut next = move || {
        state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    };

    for _ in 0..150 {
        let value = next() & 0xFFFF;
        detector.add(&value, None).expect("add");
        identity_tree.insert(value, None);
        inverted_tree.insert(!value, None);
    }

    for _ in 0..100 {
        let query = next() & 0xFFFF;
        let expected = identity_tree.search_within(&query).is_some()
            || inverted_tree.search_within(&!query).is_some();
        assert_eq!(detector.is_near_duplicate(&query).expect("check"), expected);
    }
}

#[test]
fn encoder_failure_propagates_from_add_and_check() {
    let detector: NearDuplicateDetector<u64> = DetectorBuilder::new()
        .lane(
            "picky",
            |code: &u64| {
                if *code == 13 {
                    Err(EncodeError::new("unlucky number"))
                } else {
                    Ok(*code)
                }
            },
            Hamming,
            2,
        )
        .build()
        .expect("detector");

    detector.add(&7u64, None).expect("valid item");

    match detector.add(&13, None) {
        Err(DetectorError::InvalidInput { lane, reason }) => {
            assert_eq!(lane, "picky");
            assert!(reason.contains("unlucky"));
        }
        other => panic!("expected InvalidInput, got: {other:?}"),
    }
    assert!(detector.is_near_duplicate(&13).is_err());
    // Only the offending item was aborted.
    assert!(detector.is_near_duplicate(&7).expect("check"));
}

#[test]
fn panicking_lane_is_fail_open() {
    let broken = |_: &u64, _: &u64| -> u32 { panic!("broken metric") };
    let detector: NearDuplicateDetector<u64> = DetectorBuilder::new()
        .lane("broken", |code: &u64| Ok(*code), broken, 2)
        .lane("identity", |code: &u64| Ok(*code), Hamming, 2)
        .build()
        .expect("detector");

    // The first insert into each empty tree never calls the metric, so
    // populating the broken lane succeeds.
    detector.add(&0b0000u64, None).expect("add");

    assert!(detector.is_near_duplicate(&0b0001).expect("healthy lane decides"));
}

#[test]
fn all_lanes_failing_yields_false() {
    let broken = |_: &u64, _: &u64| -> u32 { panic!("broken metric") };
    let detector: NearDuplicateDetector<u64> = DetectorBuilder::new()
        .lane("broken", |code: &u64| Ok(*code), broken, 2)
        .build()
        .expect("detector");

    detector.add(&0b0000u64, None).expect("add");
    assert!(!detector.is_near_duplicate(&0b0001).expect("fail-open check"));
}

struct RecordingMetrics {
    events: Arc<RwLock<Vec<(bool, usize)>>>,
}

impl RecordingMetrics {
    fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
        }
    }

    fn snapshot(&self) -> Vec<(bool, usize)> {
        self.events.read().unwrap().clone()
    }
}

impl DetectorMetrics for RecordingMetrics {
    fn record_check(&self, duplicate: bool, _latency: Duration, lanes_completed: usize) {
        self.events.write().unwrap().push((duplicate, lanes_completed));
    }
}

#[test]
fn metrics_recorder_observes_checks() {
    let detector = sample_detector();
    detector.add(&0b0000u64, None).expect("add");

    let metrics = Arc::new(RecordingMetrics::new());
    set_detector_metrics(Some(metrics.clone()));

    assert!(detector.is_near_duplicate(&0b0001).expect("check"));

    let events = metrics.snapshot();
    // Other tests may record concurrently through the shared global, so
    // only assert on a lower bound.
    assert!(events.iter().any(|(duplicate, _)| *duplicate));

    set_detector_metrics(None);
}

#[test]
fn add_populates_every_lane() {
    let detector = sample_detector();
    detector.add(&1u64, Some("one")).expect("add");
    detector.add(&2u64, Some("two")).expect("add");

    assert_eq!(detector.lane_count(), 2);
    assert_eq!(
        detector.sizes(),
        vec![("identity".to_string(), 2), ("inverted".to_string(), 2)]
    );
}

#[test]
fn build_requires_lanes() {
    let result = DetectorBuilder::<u64>::new().build();
    assert!(matches!(result, Err(DetectorError::NoLanes)));
}

#[test]
fn duplicate_lane_name_rejected() {
    let result: Result<NearDuplicateDetector<u64>, _> = DetectorBuilder::new()
        .lane("same", |code: &u64| Ok(*code), Hamming, 2)
        .lane("same", |code: &u64| Ok(!*code), Hamming, 4)
        .build();
    match result {
        Err(DetectorError::DuplicateLane(name)) => assert_eq!(name, "same"),
        other => panic!("expected DuplicateLane, got: {:?}", other.map(|_| ())),
    }
}

#[test]
fn invalid_search_config_rejected() {
    let result: Result<NearDuplicateDetector<u64>, _> = DetectorBuilder::new()
        .lane_with(
            "zero-workers",
            |code: &u64| Ok(*code),
            Hamming,
            2,
            SearchConfig::new().with_max_workers(0),
        )
        .build();
    match result {
        Err(DetectorError::InvalidConfig(msg)) => {
            assert!(msg.contains("zero-workers"));
            assert!(msg.contains("max_workers"));
        }
        other => panic!("expected InvalidConfig, got: {:?}", other.map(|_| ())),
    }
}
