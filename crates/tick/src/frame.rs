//! Rolling animation metrics fed by per-frame ticks.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::budget::FrameBudget;
use crate::config::TickConfig;
use crate::entry::SubscriptionId;
use crate::host::{FrameScheduler, HeapProbe};

const BYTES_PER_MB: f64 = 1_048_576.0;

/// Snapshot of animation performance.
///
/// `min_fps` and `min_frame_time` start at infinity and `max_*` at zero; both
/// are corrected by the first sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationMetrics {
    /// Frames per second of the latest frame
    pub fps: f64,
    /// Frames per second implied by the average frame time
    pub avg_fps: f64,
    pub min_fps: f64,
    pub max_fps: f64,
    /// Latest frame time in milliseconds
    pub frame_time: f64,
    /// Mean frame time over the rolling window
    pub avg_frame_time: f64,
    pub min_frame_time: f64,
    pub max_frame_time: f64,
    /// Frames over budget since the last reset
    pub dropped_frames: u64,
    /// Percentage of windowed frames within budget (0-100)
    pub frame_budget_compliance: f64,
    /// Variance-based smoothness (0-100)
    pub smoothness_score: f64,
    /// Heap in use, in MB
    pub memory_used: Option<f64>,
    /// Heap reserved, in MB
    pub memory_total: Option<f64>,
    pub total_frames: u64,
    /// Frames over the long-frame threshold
    pub long_frames: u64,
}

impl Default for AnimationMetrics {
    fn default() -> Self {
        Self {
            fps: 0.0,
            avg_fps: 0.0,
            min_fps: f64::INFINITY,
            max_fps: 0.0,
            frame_time: 0.0,
            avg_frame_time: 0.0,
            min_frame_time: f64::INFINITY,
            max_frame_time: 0.0,
            dropped_frames: 0,
            frame_budget_compliance: 100.0,
            smoothness_score: 100.0,
            memory_used: None,
            memory_total: None,
            total_frames: 0,
            long_frames: 0,
        }
    }
}

impl AnimationMetrics {
    /// Percentage of all tracked frames that were dropped.
    pub fn dropped_frame_percent(&self) -> f64 {
        if self.total_frames > 0 {
            self.dropped_frames as f64 / self.total_frames as f64 * 100.0
        } else {
            0.0
        }
    }

    /// Percentage of all tracked frames that were long.
    pub fn long_frame_percent(&self) -> f64 {
        if self.total_frames > 0 {
            self.long_frames as f64 / self.total_frames as f64 * 100.0
        } else {
            0.0
        }
    }

    /// Heap in use as a percentage of the reserved heap.
    pub fn memory_percent(&self) -> Option<f64> {
        match (self.memory_used, self.memory_total) {
            (Some(used), Some(total)) if total > 0.0 => Some(used / total * 100.0),
            _ => None,
        }
    }
}

/// Fixed-capacity FIFO of frame times.
#[derive(Debug, Clone)]
pub struct FrameTimeHistory {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl FrameTimeHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, returning the evicted oldest one when full.
    pub fn push(&mut self, frame_time: f64) -> Option<f64> {
        let evicted = if self.samples.len() >= self.capacity {
            self.samples.pop_front()
        } else {
            None
        };
        self.samples.push_back(frame_time);
        evicted
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.samples.iter()
    }

    /// Arithmetic mean, or `None` when empty.
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// Population variance around the given mean.
    pub fn variance_around(&self, mean: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|ft| (ft - mean).powi(2)).sum::<f64>() / self.samples.len() as f64
    }

    /// Number of samples within the budget.
    pub fn count_within(&self, budget: &FrameBudget) -> usize {
        self.samples.iter().filter(|ft| budget.within(**ft)).count()
    }
}

/// Map frame-time standard deviation to a 0-100 score.
///
/// 0ms scores 100, 5ms scores 50, 10ms and above score 0.
pub fn smoothness_score(std_dev_ms: f64) -> f64 {
    (100.0 - (std_dev_ms / 5.0) * 50.0).clamp(0.0, 100.0)
}

/// Frames per second for a frame time, rounded; zero for non-positive input.
pub fn fps_for(frame_time_ms: f64) -> f64 {
    if frame_time_ms > 0.0 {
        (1000.0 / frame_time_ms).round()
    } else {
        0.0
    }
}

/// Owns the animation metrics and the frame-time window.
#[derive(Debug)]
pub struct FrameTracker {
    budget: FrameBudget,
    smoothness_min_samples: usize,
    memory_sample_interval: u64,
    metrics: AnimationMetrics,
    history: FrameTimeHistory,
    subscription: Option<SubscriptionId>,
}

impl FrameTracker {
    pub fn new(config: &TickConfig) -> Self {
        Self {
            budget: config.budget,
            smoothness_min_samples: config.smoothness_min_samples,
            memory_sample_interval: config.memory_sample_interval.max(1),
            metrics: AnimationMetrics::default(),
            history: FrameTimeHistory::new(config.history_size),
            subscription: None,
        }
    }

    /// Subscribe to frame ticks. Returns `false` if already active or the
    /// scheduler refused.
    pub fn start(&mut self, scheduler: &mut dyn FrameScheduler) -> bool {
        if self.subscription.is_some() {
            return false;
        }
        match scheduler.subscribe() {
            Ok(id) => {
                self.subscription = Some(id);
                tracing::debug!(target: "tick::frame", subscription = id.0, "frame tracking started");
                true
            }
            Err(err) => {
                tracing::debug!(target: "tick::frame", error = %err, "frame scheduler unavailable");
                false
            }
        }
    }

    /// Unsubscribe from frame ticks. Returns `false` if already inactive.
    pub fn stop(&mut self, scheduler: &mut dyn FrameScheduler) -> bool {
        match self.subscription.take() {
            Some(id) => {
                scheduler.unsubscribe(id);
                tracing::debug!(target: "tick::frame", subscription = id.0, "frame tracking stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn subscription(&self) -> Option<SubscriptionId> {
        self.subscription
    }

    /// Fold one frame into the metrics. Returns the frame time in milliseconds.
    pub fn record_frame(&mut self, delta_seconds: f64, heap: Option<&dyn HeapProbe>) -> f64 {
        let frame_time = delta_seconds * 1000.0;
        let fps = fps_for(frame_time);
        let m = &mut self.metrics;

        m.frame_time = frame_time;
        m.fps = fps;
        m.min_frame_time = m.min_frame_time.min(frame_time);
        m.max_frame_time = m.max_frame_time.max(frame_time);
        m.min_fps = m.min_fps.min(fps);
        m.max_fps = m.max_fps.max(fps);

        if !self.budget.within(frame_time) {
            m.dropped_frames += 1;
        }
        if self.budget.is_long(frame_time) {
            m.long_frames += 1;
        }

        self.history.push(frame_time);

        if let Some(avg) = self.history.mean() {
            m.avg_frame_time = avg;
            m.avg_fps = fps_for(avg);
            m.frame_budget_compliance =
                self.history.count_within(&self.budget) as f64 / self.history.len() as f64 * 100.0;
        }

        if self.history.len() >= self.smoothness_min_samples {
            let std_dev = self.history.variance_around(m.avg_frame_time).sqrt();
            m.smoothness_score = smoothness_score(std_dev);
        }

        m.total_frames += 1;

        if m.total_frames % self.memory_sample_interval == 0 {
            self.sample_memory(heap);
        }

        tracing::trace!(target: "tick::frame", frame_time, fps, "frame recorded");
        frame_time
    }

    /// Refresh the memory fields from the probe, if one exists.
    pub fn sample_memory(&mut self, heap: Option<&dyn HeapProbe>) {
        if let Some(usage) = heap.and_then(|probe| probe.sample()) {
            self.metrics.memory_used = Some(usage.used_bytes as f64 / BYTES_PER_MB);
            self.metrics.memory_total = Some(usage.total_bytes as f64 / BYTES_PER_MB);
        }
    }

    /// Restore the initial metrics and clear the window, then resample memory.
    pub fn reset(&mut self, heap: Option<&dyn HeapProbe>) {
        self.metrics = AnimationMetrics::default();
        self.history.clear();
        self.sample_memory(heap);
    }

    pub fn metrics(&self) -> &AnimationMetrics {
        &self.metrics
    }

    pub fn history(&self) -> &FrameTimeHistory {
        &self.history
    }

    pub fn budget(&self) -> &FrameBudget {
        &self.budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{FixedHeapProbe, ManualScheduler};

    fn tracker() -> FrameTracker {
        FrameTracker::new(&TickConfig::default())
    }

    fn feed(tracker: &mut FrameTracker, frame_times_ms: &[f64]) {
        for ft in frame_times_ms {
            tracker.record_frame(ft / 1000.0, None);
        }
    }

    #[test]
    fn test_initial_metrics() {
        let m = AnimationMetrics::default();
        assert_eq!(m.min_fps, f64::INFINITY);
        assert_eq!(m.max_fps, 0.0);
        assert_eq!(m.frame_budget_compliance, 100.0);
        assert_eq!(m.smoothness_score, 100.0);
        assert!(m.memory_used.is_none());
    }

    #[test]
    fn test_history_fifo() {
        let mut history = FrameTimeHistory::new(3);
        assert_eq!(history.push(1.0), None);
        history.push(2.0);
        history.push(3.0);
        assert_eq!(history.push(4.0), Some(1.0));

        let samples: Vec<f64> = history.iter().copied().collect();
        assert_eq!(samples, vec![2.0, 3.0, 4.0]);
        assert_eq!(history.mean(), Some(3.0));
    }

    #[test]
    fn test_steady_frames() {
        let mut t = tracker();
        feed(&mut t, &[10.0; 60]);

        let m = t.metrics();
        assert_eq!(m.dropped_frames, 0);
        assert_eq!(m.frame_budget_compliance, 100.0);
        assert_eq!(m.smoothness_score, 100.0);
        assert_eq!(m.fps, 100.0);
        assert_eq!(m.avg_fps, 100.0);
        assert_eq!(m.total_frames, 60);
    }

    #[test]
    fn test_smoothness_drops_when_variance_activates() {
        let mut t = tracker();
        let mut samples = vec![10.0; 29];
        samples.push(100.0);
        feed(&mut t, &samples[..29]);
        assert_eq!(t.metrics().smoothness_score, 100.0);

        feed(&mut t, &samples[29..]);
        assert!(t.metrics().smoothness_score < 100.0);
    }

    #[test]
    fn test_dropped_and_long_frames() {
        let mut t = tracker();
        feed(&mut t, &[10.0, 20.0, 60.0, 16.0]);

        let m = t.metrics();
        assert_eq!(m.dropped_frames, 2);
        assert_eq!(m.long_frames, 1);
        assert_eq!(m.frame_budget_compliance, 50.0);
        assert_eq!(m.min_frame_time, 10.0);
        assert_eq!(m.max_frame_time, 60.0);
        assert_eq!(m.min_fps, 17.0);
        assert_eq!(m.max_fps, 100.0);
    }

    #[test]
    fn test_zero_delta() {
        let mut t = tracker();
        t.record_frame(0.0, None);
        assert_eq!(t.metrics().fps, 0.0);
        assert_eq!(t.metrics().min_fps, 0.0);
    }

    #[test]
    fn test_window_eviction() {
        let mut t = FrameTracker::new(&TickConfig::default().with_history_size(4));
        feed(&mut t, &[100.0, 100.0, 10.0, 10.0, 10.0, 10.0]);

        assert_eq!(t.history().len(), 4);
        assert_eq!(t.metrics().avg_frame_time, 10.0);
        assert_eq!(t.metrics().frame_budget_compliance, 100.0);
        // Counters are cumulative, not windowed
        assert_eq!(t.metrics().dropped_frames, 2);
    }

    #[test]
    fn test_memory_sampled_every_interval() {
        let heap = FixedHeapProbe::new(32 * 1_048_576, 64 * 1_048_576);
        let mut t = tracker();

        for _ in 0..59 {
            t.record_frame(0.016, Some(&heap));
        }
        assert!(t.metrics().memory_used.is_none());

        t.record_frame(0.016, Some(&heap));
        assert_eq!(t.metrics().memory_used, Some(32.0));
        assert_eq!(t.metrics().memory_total, Some(64.0));
        assert_eq!(t.metrics().memory_percent(), Some(50.0));
    }

    #[test]
    fn test_reset_resamples_memory() {
        let heap = FixedHeapProbe::new(1_048_576, 2 * 1_048_576);
        let mut t = tracker();
        feed(&mut t, &[40.0; 5]);

        t.reset(Some(&heap));
        let m = t.metrics();
        assert_eq!(m.total_frames, 0);
        assert_eq!(m.dropped_frames, 0);
        assert_eq!(m.memory_used, Some(1.0));
        assert!(t.history().is_empty());
    }

    #[test]
    fn test_start_stop_idempotent() {
        let mut scheduler = ManualScheduler::new();
        let mut t = tracker();

        assert!(t.start(&mut scheduler));
        assert!(!t.start(&mut scheduler));
        assert_eq!(scheduler.active_count(), 1);

        assert!(t.stop(&mut scheduler));
        assert!(!t.stop(&mut scheduler));
        assert_eq!(scheduler.active_count(), 0);
    }

    #[test]
    fn test_smoothness_score_mapping() {
        assert_eq!(smoothness_score(0.0), 100.0);
        assert_eq!(smoothness_score(2.0), 80.0);
        assert_eq!(smoothness_score(5.0), 50.0);
        assert_eq!(smoothness_score(25.0), 0.0);
    }
}
