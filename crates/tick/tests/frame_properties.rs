//! Property tests for the streaming frame statistics
//!
//! Arbitrary frame-delta sequences are fed through a tracker and the
//! window invariants are checked afterwards.

use proptest::prelude::*;
use tick::{FrameTracker, TickConfig};

fn feed(deltas_ms: &[f64]) -> FrameTracker {
    let mut tracker = FrameTracker::new(&TickConfig::quiet());
    for delta in deltas_ms {
        tracker.record_frame(delta / 1000.0, None);
    }
    tracker
}

proptest! {
    #[test]
    fn min_max_bound_every_sample(deltas in prop::collection::vec(1.0f64..200.0, 1..400)) {
        let tracker = feed(&deltas);
        let m = tracker.metrics();
        for delta in &deltas {
            let frame_time = delta / 1000.0 * 1000.0;
            prop_assert!(m.min_frame_time <= frame_time);
            prop_assert!(frame_time <= m.max_frame_time);
        }
    }

    #[test]
    fn average_covers_last_window(deltas in prop::collection::vec(1.0f64..200.0, 1..400)) {
        let tracker = feed(&deltas);
        let window: Vec<f64> = deltas
            .iter()
            .rev()
            .take(120)
            .map(|d| d / 1000.0 * 1000.0)
            .collect();

        prop_assert_eq!(tracker.history().len(), window.len());
        let mean = window.iter().sum::<f64>() / window.len() as f64;
        prop_assert!((tracker.metrics().avg_frame_time - mean).abs() < 1e-6);
    }

    #[test]
    fn counters_are_consistent(deltas in prop::collection::vec(1.0f64..200.0, 0..300)) {
        let tracker = feed(&deltas);
        let m = tracker.metrics();
        prop_assert_eq!(m.total_frames, deltas.len() as u64);
        prop_assert!(m.dropped_frames <= m.total_frames);
        prop_assert!(m.long_frames <= m.dropped_frames);
        prop_assert!((0.0..=100.0).contains(&m.frame_budget_compliance));
        prop_assert!((0.0..=100.0).contains(&m.smoothness_score));
    }

    #[test]
    fn blocking_time_is_sum_of_excess(durations in prop::collection::vec(0.0f64..500.0, 0..50)) {
        let expected: f64 = durations.iter().map(|d| (d - 50.0).max(0.0)).sum();
        let total = tick::total_blocking_time(&durations, 50.0);
        prop_assert!((total - expected).abs() < 1e-9);
    }
}

#[test]
fn test_steady_frames() {
    let tracker = feed(&[10.0; 60]);
    let m = tracker.metrics();
    assert_eq!(m.dropped_frames, 0);
    assert_eq!(m.frame_budget_compliance, 100.0);
    assert_eq!(m.smoothness_score, 100.0);
}

#[test]
fn test_smoothness_drops_once_variance_active() {
    let mut tracker = feed(&[10.0; 29]);
    assert_eq!(tracker.metrics().smoothness_score, 100.0);

    tracker.record_frame(0.1, None);
    assert_eq!(tracker.history().len(), 30);
    assert!(tracker.metrics().smoothness_score < 100.0);
}
