//! Frame budgets and overrun classification

use serde::{Deserialize, Serialize};

/// Milliseconds per frame at 60fps.
pub const FRAME_BUDGET_60FPS: f64 = 16.67;

/// Milliseconds per frame at 30fps.
pub const FRAME_BUDGET_30FPS: f64 = 33.33;

/// Frames slower than this are counted as long frames.
pub const LONG_FRAME_THRESHOLD_MS: f64 = 50.0;

/// Frame budget configuration.
///
/// The budget is the time slice a single display refresh allots to
/// application work. Frames over the budget count as dropped, frames over
/// the long-frame threshold additionally count as long.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FrameBudget {
    /// Time allotted to a single frame in milliseconds.
    pub frame_ms: f64,

    /// Frame time above which a frame is considered long.
    pub long_frame_ms: f64,
}

impl FrameBudget {
    /// Create a budget with a custom frame slice.
    pub fn custom(frame_ms: f64) -> Self {
        Self {
            frame_ms,
            long_frame_ms: LONG_FRAME_THRESHOLD_MS,
        }
    }

    /// Budget for a 60Hz display.
    pub fn for_60fps() -> Self {
        Self::custom(FRAME_BUDGET_60FPS)
    }

    /// Budget for a 30Hz display.
    pub fn for_30fps() -> Self {
        Self::custom(FRAME_BUDGET_30FPS)
    }

    /// Builder method to set the long-frame threshold.
    pub fn with_long_frame(mut self, ms: f64) -> Self {
        self.long_frame_ms = ms;
        self
    }

    /// Target frame rate implied by this budget.
    pub fn target_fps(&self) -> f64 {
        if self.frame_ms > 0.0 {
            (1000.0 / self.frame_ms).round()
        } else {
            0.0
        }
    }

    /// Check whether a frame time fits in the budget.
    pub fn within(&self, frame_ms: f64) -> bool {
        frame_ms <= self.frame_ms
    }

    /// Check whether a frame time is a long frame.
    pub fn is_long(&self, frame_ms: f64) -> bool {
        frame_ms > self.long_frame_ms
    }

    /// Remaining time in the budget (negative when over).
    pub fn headroom(&self, frame_ms: f64) -> f64 {
        self.frame_ms - frame_ms
    }

    /// Frame time above which the drop detector fires.
    pub fn dropped_frame_threshold(&self, multiplier: f64) -> f64 {
        self.frame_ms * multiplier
    }
}

impl Default for FrameBudget {
    /// Default budget targets 60fps.
    fn default() -> Self {
        Self::for_60fps()
    }
}

/// A frame that ran past its budget.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetOverrun {
    /// Sequence number of the frame
    pub frame_number: u64,
    /// Measured frame time in milliseconds
    pub actual_ms: f64,
    /// Budget in milliseconds
    pub budget_ms: f64,
}

impl BudgetOverrun {
    /// Create a new overrun record.
    pub fn new(frame_number: u64, actual_ms: f64, budget_ms: f64) -> Self {
        Self {
            frame_number,
            actual_ms,
            budget_ms,
        }
    }

    /// How far past the budget the frame ran.
    pub fn excess_ms(&self) -> f64 {
        self.actual_ms - self.budget_ms
    }

    /// Ratio of actual to budget (2.0 means twice the budget).
    pub fn ratio(&self) -> f64 {
        self.actual_ms / self.budget_ms
    }
}

impl std::fmt::Display for BudgetOverrun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Frame #{} took {:.2}ms (budget: {:.2}ms)",
            self.frame_number, self.actual_ms, self.budget_ms
        )
    }
}
