//! Typed payloads delivered by the host.

use serde::{Deserialize, Serialize};

/// Identifier for an observer or frame subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

/// Observation stream an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryKind {
    Paint,
    LargestContentfulPaint,
    LayoutShift,
    FirstInput,
    #[serde(rename = "longtask")]
    LongTask,
}

impl EntryKind {
    /// Name of the stream as the host reports it.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Paint => "paint",
            EntryKind::LargestContentfulPaint => "largest-contentful-paint",
            EntryKind::LayoutShift => "layout-shift",
            EntryKind::FirstInput => "first-input",
            EntryKind::LongTask => "longtask",
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of the first-paint entry.
pub const FIRST_PAINT: &str = "first-paint";

/// Name of the first-contentful-paint entry.
pub const FIRST_CONTENTFUL_PAINT: &str = "first-contentful-paint";

/// A single timing observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PerformanceEntry {
    /// A named paint milestone
    #[serde(rename_all = "camelCase")]
    Paint { name: String, start_time: f64 },
    /// A largest-contentful-paint candidate
    #[serde(rename_all = "camelCase")]
    LargestContentfulPaint {
        start_time: f64,
        render_time: Option<f64>,
        load_time: Option<f64>,
    },
    /// A layout shift
    #[serde(rename_all = "camelCase")]
    LayoutShift {
        start_time: f64,
        value: f64,
        had_recent_input: bool,
    },
    /// The first discrete input
    #[serde(rename_all = "camelCase")]
    FirstInput {
        start_time: f64,
        processing_start: Option<f64>,
    },
    /// A task that blocked the main thread
    #[serde(rename = "longtask", rename_all = "camelCase")]
    LongTask { start_time: f64, duration: f64 },
}

impl PerformanceEntry {
    /// Stream this entry belongs to.
    pub fn kind(&self) -> EntryKind {
        match self {
            PerformanceEntry::Paint { .. } => EntryKind::Paint,
            PerformanceEntry::LargestContentfulPaint { .. } => EntryKind::LargestContentfulPaint,
            PerformanceEntry::LayoutShift { .. } => EntryKind::LayoutShift,
            PerformanceEntry::FirstInput { .. } => EntryKind::FirstInput,
            PerformanceEntry::LongTask { .. } => EntryKind::LongTask,
        }
    }

    /// Start time of the entry in milliseconds.
    pub fn start_time(&self) -> f64 {
        match self {
            PerformanceEntry::Paint { start_time, .. }
            | PerformanceEntry::LargestContentfulPaint { start_time, .. }
            | PerformanceEntry::LayoutShift { start_time, .. }
            | PerformanceEntry::FirstInput { start_time, .. }
            | PerformanceEntry::LongTask { start_time, .. } => *start_time,
        }
    }
}

/// Entries delivered together on one subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationBatch {
    pub subscription: SubscriptionId,
    pub entries: Vec<PerformanceEntry>,
}

/// One display refresh.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameTick {
    pub subscription: SubscriptionId,
    /// Seconds elapsed since the previous tick
    pub delta_time: f64,
}

/// A key press.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyEvent {
    pub key: String,
    #[serde(default)]
    pub shift: bool,
}

impl KeyEvent {
    pub fn new(key: &str, shift: bool) -> Self {
        Self {
            key: key.to_string(),
            shift,
        }
    }

    /// Shift+F toggles the FPS overlay.
    pub fn is_overlay_toggle(&self) -> bool {
        self.shift && self.key.eq_ignore_ascii_case("f")
    }
}

/// Whether the engine consumed a key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    /// The host should suppress its default handling
    Handled,
    Ignored,
}

/// Everything the host can push into the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostEvent {
    Observation(ObservationBatch),
    Frame(FrameTick),
    Key(KeyEvent),
    /// The overlay node was removed by someone else (e.g. a content swap)
    OverlayRemoved,
    DomContentLoaded,
    VisibilityHidden,
}
