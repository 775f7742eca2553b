//! Recorded host traces.
//!
//! A trace describes the host at startup and a time-ordered list of steps.
//! Each step carries the absolute clock reading (`at`, milliseconds) it
//! happened at.

use serde::Deserialize;
use tick::host::{HeapUsage, NavigationTiming};
use tick::{PerformanceEntry, TickConfig};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    /// Engine configuration; defaults apply when absent
    #[serde(default)]
    pub config: Option<TickConfig>,
    /// Clock reading when the engine starts
    #[serde(default)]
    pub start_ms: f64,
    #[serde(default)]
    pub first_hit_marker: Option<f64>,
    #[serde(default)]
    pub navigation: Option<NavigationTiming>,
    #[serde(default)]
    pub buffered_paints: Vec<PerformanceEntry>,
    #[serde(default = "default_dom_ready")]
    pub dom_ready: bool,
    #[serde(default)]
    pub heap: Option<HeapUsage>,
    pub steps: Vec<Step>,
}

fn default_dom_ready() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    pub at: f64,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Action {
    /// A display refresh on the active frame subscription
    Frame {
        #[serde(rename = "deltaMs")]
        delta_ms: f64,
    },
    /// Observer entries, routed to their stream's subscription
    Entries { entries: Vec<PerformanceEntry> },
    Key {
        key: String,
        #[serde(default)]
        shift: bool,
    },
    OverlayRemoved,
    DomContentLoaded,
    VisibilityHidden,
    /// An application event log call
    Log {
        name: String,
        #[serde(default, rename = "showVitals")]
        show_vitals: bool,
    },
    /// A span the host profiler recorded
    Measure {
        name: String,
        #[serde(rename = "startTime")]
        start_time: f64,
        duration: f64,
    },
    /// A timed call of an instrumented function
    Call {
        name: String,
        #[serde(rename = "durationMs")]
        duration_ms: f64,
    },
    StartTracking,
    StopTracking,
    EnableDropDetection,
    EnableInstrumentation,
    ResetAnimation,
}
