//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::budget::FrameBudget;
use crate::error::TickResult;

/// How the largest-contentful-paint value settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LcpPolicy {
    /// Every observed batch overwrites the value.
    #[default]
    LastBatchWins,
    /// The value stops changing after the first input or when the page is hidden.
    FreezeOnInteraction,
}

/// Configuration for the tick engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TickConfig {
    /// Frame budget used for dropped/long frame classification
    pub budget: FrameBudget,
    /// Number of frame-time samples kept in the rolling window
    pub history_size: usize,
    /// Samples required before the smoothness score is computed
    pub smoothness_min_samples: usize,
    /// Heap usage is resampled every this many frames
    pub memory_sample_interval: u64,
    /// Multiple of the frame budget that marks a frame as dropped for attribution
    pub drop_threshold_multiplier: f64,
    /// Maximum frame-drop incidents retained
    pub max_frame_drop_history: usize,
    /// How far back (ms) attribution looks for measures
    pub mark_window_ms: f64,
    /// Measures kept per incident
    pub max_performance_marks: usize,
    /// Instrumented functions kept per incident
    pub max_slow_functions: usize,
    /// Instrumented functions slower than this (max time, ms) are reported
    pub slow_function_threshold_ms: f64,
    /// Long tasks contribute the portion of their duration above this
    pub long_task_threshold_ms: f64,
    /// Frames counted between overlay FPS samples
    pub overlay_sample_frames: u32,
    /// Delay before the deferred vitals dump of the first log event
    pub vitals_settle_delay_ms: f64,
    /// Persistence key for the overlay visibility flag
    pub overlay_storage_key: String,
    /// Master switch for the event log and diagnostic reports
    pub logging_enabled: bool,
    /// Log a "start" event with vitals when the engine is created
    pub log_start_event: bool,
    /// Subscribe to frame ticks when the engine is created
    pub auto_start_frame_tracking: bool,
    /// Aggregate total blocking time on a worker thread
    pub offload_tbt: bool,
    /// Largest-contentful-paint settling behaviour
    pub lcp_policy: LcpPolicy,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            budget: FrameBudget::default(),
            history_size: 120,
            smoothness_min_samples: 30,
            memory_sample_interval: 60,
            drop_threshold_multiplier: 1.5,
            max_frame_drop_history: 50,
            mark_window_ms: 100.0,
            max_performance_marks: 10,
            max_slow_functions: 5,
            slow_function_threshold_ms: 5.0,
            long_task_threshold_ms: 50.0,
            overlay_sample_frames: 10,
            vitals_settle_delay_ms: 1000.0,
            overlay_storage_key: "fps-display-visible".to_string(),
            logging_enabled: true,
            log_start_event: true,
            auto_start_frame_tracking: true,
            offload_tbt: false,
            lcp_policy: LcpPolicy::default(),
        }
    }
}

impl TickConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> TickResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Configuration suited to tests and replays: quiet, and nothing starts on its own.
    pub fn quiet() -> Self {
        Self {
            logging_enabled: false,
            log_start_event: false,
            auto_start_frame_tracking: false,
            ..Self::default()
        }
    }

    /// Set the frame budget.
    pub fn with_budget(mut self, budget: FrameBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Set the rolling window size.
    pub fn with_history_size(mut self, size: usize) -> Self {
        self.history_size = size;
        self
    }

    /// Set the frame-drop history bound.
    pub fn with_max_frame_drop_history(mut self, size: usize) -> Self {
        self.max_frame_drop_history = size;
        self
    }

    /// Enable or disable the event log and reports.
    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.logging_enabled = enabled;
        self
    }

    /// Enable or disable the "start" log event at construction.
    pub fn with_start_event(mut self, enabled: bool) -> Self {
        self.log_start_event = enabled;
        self
    }

    /// Enable or disable frame tracking at construction.
    pub fn with_auto_start(mut self, enabled: bool) -> Self {
        self.auto_start_frame_tracking = enabled;
        self
    }

    /// Enable or disable the total-blocking-time worker.
    pub fn with_offload_tbt(mut self, enabled: bool) -> Self {
        self.offload_tbt = enabled;
        self
    }

    /// Set the largest-contentful-paint policy.
    pub fn with_lcp_policy(mut self, policy: LcpPolicy) -> Self {
        self.lcp_policy = policy;
        self
    }

    /// Set the persistence key for overlay visibility.
    pub fn with_overlay_storage_key(mut self, key: &str) -> Self {
        self.overlay_storage_key = key.to_string();
        self
    }

    /// Frame time above which the drop detector attributes a frame.
    pub fn dropped_frame_threshold(&self) -> f64 {
        self.budget.dropped_frame_threshold(self.drop_threshold_multiplier)
    }
}
