//! Frame-drop detection and attribution.
//!
//! The detector keeps its own frame-start timestamp, separate from the
//! scheduler's delta. When the gap between two ticks exceeds the dropped
//! frame threshold it snapshots the recent spans and the slowest
//! instrumented functions into a [`FrameDropInfo`].

use std::collections::VecDeque;

use serde::Serialize;

use crate::budget::BudgetOverrun;
use crate::config::TickConfig;
use crate::host::{SpanKind, SpanRecorder, StackCapture};
use crate::instrument::Instrumenter;

// =============================================================================
// Attribution Records
// =============================================================================

/// A recent measure that overlapped the dropped frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMarkInfo {
    pub name: String,
    pub start_time: f64,
    pub duration: f64,
}

/// An instrumented function whose worst call could explain the drop.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlowFunction {
    pub name: String,
    /// Worst observed call time
    pub duration: f64,
    pub avg_time: f64,
    pub call_count: u64,
}

/// Everything gathered about one dropped frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameDropInfo {
    pub frame_time: f64,
    pub timestamp: f64,
    pub frame_number: u64,
    pub slow_functions: Vec<SlowFunction>,
    pub performance_marks: Vec<PerformanceMarkInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

/// Capabilities attribution may consult. Every field is optional.
#[derive(Clone, Copy, Default)]
pub struct AttributionSources<'a> {
    pub spans: Option<&'a dyn SpanRecorder>,
    /// Present only while function instrumentation is enabled
    pub instrumenter: Option<&'a Instrumenter>,
    pub stack: Option<&'a dyn StackCapture>,
    /// Emit the frame-drop report
    pub logging: bool,
}

// =============================================================================
// Detector
// =============================================================================

/// Detects overlong frames and keeps a bounded history of them.
#[derive(Debug)]
pub struct FrameDropDetector {
    enabled: bool,
    last_timestamp: Option<f64>,
    frame_number: u64,
    budget_ms: f64,
    threshold_ms: f64,
    mark_window_ms: f64,
    max_marks: usize,
    max_slow_functions: usize,
    slow_function_threshold_ms: f64,
    max_history: usize,
    history: VecDeque<FrameDropInfo>,
}

impl FrameDropDetector {
    /// Create a disabled detector.
    pub fn new(config: &TickConfig) -> Self {
        Self {
            enabled: false,
            last_timestamp: None,
            frame_number: 0,
            budget_ms: config.budget.frame_ms,
            threshold_ms: config.dropped_frame_threshold(),
            mark_window_ms: config.mark_window_ms,
            max_marks: config.max_performance_marks,
            max_slow_functions: config.max_slow_functions,
            slow_function_threshold_ms: config.slow_function_threshold_ms,
            max_history: config.max_frame_drop_history.max(1),
            history: VecDeque::with_capacity(config.max_frame_drop_history),
        }
    }

    /// Turn detection on or off. Re-enabling re-seeds the frame start so
    /// the disabled period is not measured as one frame.
    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled && !self.enabled {
            self.last_timestamp = None;
        }
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Forget the stored frame start so the next tick re-seeds it.
    pub fn reset_timestamp(&mut self) {
        self.last_timestamp = None;
    }

    /// Frames counted since the timestamp was last seeded.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Process one frame tick at `now`. Returns the recorded drop, if any.
    pub fn tick(&mut self, now: f64, sources: AttributionSources<'_>) -> Option<&FrameDropInfo> {
        if !self.enabled {
            return None;
        }

        let Some(previous) = self.last_timestamp.replace(now) else {
            self.frame_number = 0;
            return None;
        };

        let frame_time = now - previous;
        self.frame_number += 1;

        if frame_time > self.threshold_ms {
            let info = self.attribute(frame_time, now, sources);
            if sources.logging {
                report(&info, self.budget_ms);
            }
            self.push(info);
            return self.history.back();
        }
        None
    }

    /// Build the attribution record for an overlong frame.
    pub fn attribute(&self, frame_time: f64, now: f64, sources: AttributionSources<'_>) -> FrameDropInfo {
        let performance_marks = sources
            .spans
            .map(|spans| self.recent_measures(spans, now))
            .unwrap_or_default();

        let slow_functions = sources
            .instrumenter
            .map(|inst| self.slow_functions(inst))
            .unwrap_or_default();

        let stack_trace = sources.stack.and_then(|s| s.capture());

        FrameDropInfo {
            frame_time,
            timestamp: now,
            frame_number: self.frame_number,
            slow_functions,
            performance_marks,
            stack_trace,
        }
    }

    fn recent_measures(&self, spans: &dyn SpanRecorder, now: f64) -> Vec<PerformanceMarkInfo> {
        let measures = match spans.entries(SpanKind::Measure) {
            Ok(measures) => measures,
            Err(err) => {
                tracing::debug!(target: "tick::drop", error = %err, "span query failed");
                return Vec::new();
            }
        };

        let cutoff = now - self.mark_window_ms;
        let mut recent: Vec<PerformanceMarkInfo> = measures
            .into_iter()
            .filter(|m| m.start_time >= cutoff)
            .map(|m| PerformanceMarkInfo {
                name: m.name,
                start_time: m.start_time,
                duration: m.duration,
            })
            .collect();

        recent.sort_by(|a, b| b.duration.total_cmp(&a.duration));
        recent.truncate(self.max_marks);
        recent
    }

    fn slow_functions(&self, instrumenter: &Instrumenter) -> Vec<SlowFunction> {
        let mut slow: Vec<SlowFunction> = instrumenter
            .stats()
            .into_iter()
            .filter(|s| s.max_time > self.slow_function_threshold_ms)
            .map(|s| SlowFunction {
                name: s.name,
                duration: s.max_time,
                avg_time: s.avg_time,
                call_count: s.call_count,
            })
            .collect();

        slow.sort_by(|a, b| b.duration.total_cmp(&a.duration));
        slow.truncate(self.max_slow_functions);
        slow
    }

    /// Append to the history, evicting the oldest entry when full.
    pub fn push(&mut self, info: FrameDropInfo) {
        if self.history.len() >= self.max_history {
            self.history.pop_front();
        }
        self.history.push_back(info);
    }

    pub fn history(&self) -> impl Iterator<Item = &FrameDropInfo> {
        self.history.iter()
    }

    /// Owned copy of the history, oldest first.
    pub fn snapshot(&self) -> Vec<FrameDropInfo> {
        self.history.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}

/// Log a frame-drop report: the headline, then ranked offenders.
fn report(info: &FrameDropInfo, budget_ms: f64) {
    let overrun = BudgetOverrun::new(info.frame_number, info.frame_time, budget_ms);
    tracing::warn!(
        target: "tick::drop",
        frame_number = info.frame_number,
        frame_time = info.frame_time,
        budget = budget_ms,
        "Frame Drop Detected: {}",
        overrun
    );

    for (i, mark) in info.performance_marks.iter().enumerate() {
        tracing::info!(
            target: "tick::drop",
            rank = i + 1,
            severity = severity(mark.duration),
            "performance mark {}. {} {:.2}ms",
            i + 1,
            mark.name,
            mark.duration
        );
    }

    for (i, func) in info.slow_functions.iter().enumerate() {
        tracing::info!(
            target: "tick::drop",
            rank = i + 1,
            severity = severity(func.duration),
            calls = func.call_count,
            "instrumented {}. {} {:.2}ms",
            i + 1,
            func.name,
            func.duration
        );
    }
}

/// Coarse label for an offender's duration.
fn severity(duration_ms: f64) -> &'static str {
    if duration_ms > 16.0 {
        "high"
    } else if duration_ms > 8.0 {
        "medium"
    } else {
        "low"
    }
}
