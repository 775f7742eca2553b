//! Host capabilities consumed by the engine.
//!
//! The engine never talks to a platform directly. Each capability below is
//! implemented by the embedding application (see [`crate::sim`] for the
//! in-memory implementations). Optional capabilities are held as `Option`
//! in [`HostCapabilities`]; a missing one leaves the dependent metric unset.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entry::{EntryKind, PerformanceEntry, SubscriptionId};
use crate::error::TickResult;

/// Monotonic clock in milliseconds.
pub trait Clock: Send + Sync {
    /// Milliseconds since the time origin.
    fn now(&self) -> f64;

    /// Absolute anchor of the monotonic timeline, if known.
    fn time_origin(&self) -> Option<f64> {
        None
    }
}

/// Paint, layout-shift, input and long-task observation.
pub trait ObservationSource {
    /// Start observing a stream. Errors when the host lacks it.
    fn observe(&mut self, kind: EntryKind) -> TickResult<SubscriptionId>;

    /// Stop a subscription. Unknown ids are ignored.
    fn disconnect(&mut self, id: SubscriptionId);
}

/// Per-frame callback scheduling.
pub trait FrameScheduler {
    fn subscribe(&mut self) -> TickResult<SubscriptionId>;

    fn unsubscribe(&mut self, id: SubscriptionId);
}

/// Kind of a recorded span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    Mark,
    Measure,
}

/// A mark or measure held by the span recorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanEntry {
    pub name: String,
    pub kind: SpanKind,
    pub start_time: f64,
    /// Zero for marks
    pub duration: f64,
}

/// Named mark/measure recording.
pub trait SpanRecorder: Send + Sync {
    fn mark(&self, name: &str) -> TickResult<()>;

    /// Record a measure spanning two existing marks.
    fn measure(&self, name: &str, start_mark: &str, end_mark: &str) -> TickResult<()>;

    fn entries(&self, kind: SpanKind) -> TickResult<Vec<SpanEntry>>;

    fn clear_marks(&self, name: &str) -> TickResult<()>;

    fn clear_measures(&self, name: &str) -> TickResult<()>;
}

/// Heap statistics in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeapUsage {
    pub used_bytes: u64,
    pub total_bytes: u64,
}

/// Optional heap usage probe.
pub trait HeapProbe {
    fn sample(&self) -> Option<HeapUsage>;
}

/// Key-value persistence for the overlay flag.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> TickResult<Option<String>>;

    fn set(&mut self, key: &str, value: &str) -> TickResult<()>;
}

/// The single visual node used by the FPS overlay.
pub trait OverlaySurface {
    /// Create and insert the node.
    fn mount(&mut self) -> TickResult<()>;

    fn is_mounted(&self) -> bool;

    fn set_visible(&mut self, visible: bool);

    fn set_text(&mut self, text: &str);

    /// Remove the node. No-op when not mounted.
    fn unmount(&mut self);
}

/// Call-site stack capture.
pub trait StackCapture {
    fn capture(&self) -> Option<String>;
}

/// Navigation timing used for the time-to-interactive estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "form", rename_all = "camelCase")]
pub enum NavigationTiming {
    /// Absolute timestamps relative to navigation start
    #[serde(rename_all = "camelCase")]
    Legacy {
        navigation_start: f64,
        dom_interactive: f64,
        dom_content_loaded_event_end: f64,
    },
    /// Times already relative to the time origin
    #[serde(rename_all = "camelCase")]
    Entry {
        dom_interactive: f64,
        dom_content_loaded_event_end: f64,
    },
}

impl NavigationTiming {
    /// Navigation start of the legacy form.
    pub fn navigation_start(&self) -> Option<f64> {
        match self {
            NavigationTiming::Legacy {
                navigation_start, ..
            } if *navigation_start > 0.0 => Some(*navigation_start),
            _ => None,
        }
    }
}

/// Everything the engine consumes from its host.
pub struct HostCapabilities {
    pub clock: Arc<dyn Clock>,
    pub scheduler: Box<dyn FrameScheduler>,
    pub storage: Box<dyn KeyValueStore>,
    pub observers: Option<Box<dyn ObservationSource>>,
    pub spans: Option<Arc<dyn SpanRecorder>>,
    pub heap: Option<Box<dyn HeapProbe>>,
    pub surface: Option<Box<dyn OverlaySurface>>,
    pub stack: Option<Box<dyn StackCapture>>,
    pub navigation: Option<NavigationTiming>,
    /// Paint entries buffered before the engine was created
    pub buffered_paints: Vec<PerformanceEntry>,
    /// Clock reading recorded by the page before any script loaded
    pub first_hit_marker: Option<f64>,
    /// Whether the document had finished parsing at construction
    pub dom_ready: bool,
}

impl HostCapabilities {
    /// Create a host with only the required capabilities.
    pub fn new(
        clock: Arc<dyn Clock>,
        scheduler: Box<dyn FrameScheduler>,
        storage: Box<dyn KeyValueStore>,
    ) -> Self {
        Self {
            clock,
            scheduler,
            storage,
            observers: None,
            spans: None,
            heap: None,
            surface: None,
            stack: None,
            navigation: None,
            buffered_paints: Vec::new(),
            first_hit_marker: None,
            dom_ready: false,
        }
    }

    pub fn with_observers(mut self, observers: Box<dyn ObservationSource>) -> Self {
        self.observers = Some(observers);
        self
    }

    pub fn with_spans(mut self, spans: Arc<dyn SpanRecorder>) -> Self {
        self.spans = Some(spans);
        self
    }

    pub fn with_heap(mut self, heap: Box<dyn HeapProbe>) -> Self {
        self.heap = Some(heap);
        self
    }

    pub fn with_surface(mut self, surface: Box<dyn OverlaySurface>) -> Self {
        self.surface = Some(surface);
        self
    }

    pub fn with_stack(mut self, stack: Box<dyn StackCapture>) -> Self {
        self.stack = Some(stack);
        self
    }

    pub fn with_navigation(mut self, navigation: NavigationTiming) -> Self {
        self.navigation = Some(navigation);
        self
    }

    pub fn with_buffered_paints(mut self, paints: Vec<PerformanceEntry>) -> Self {
        self.buffered_paints = paints;
        self
    }

    pub fn with_first_hit_marker(mut self, marker: f64) -> Self {
        self.first_hit_marker = Some(marker);
        self
    }

    pub fn with_dom_ready(mut self, ready: bool) -> Self {
        self.dom_ready = ready;
        self
    }
}

impl std::fmt::Debug for HostCapabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostCapabilities")
            .field("observers", &self.observers.is_some())
            .field("spans", &self.spans.is_some())
            .field("heap", &self.heap.is_some())
            .field("surface", &self.surface.is_some())
            .field("stack", &self.stack.is_some())
            .field("navigation", &self.navigation)
            .field("first_hit_marker", &self.first_hit_marker)
            .field("dom_ready", &self.dom_ready)
            .finish()
    }
}
