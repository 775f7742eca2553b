//! In-memory host capabilities.
//!
//! These back the tests and the replay tool, and are usable as-is by native
//! hosts that have no platform timing APIs of their own: the span buffer,
//! for instance, is a complete mark/measure recorder.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::entry::{
    EntryKind, FrameTick, HostEvent, ObservationBatch, PerformanceEntry, SubscriptionId,
};
use crate::error::{TickError, TickResult};
use crate::host::{
    Clock, FrameScheduler, HeapProbe, HeapUsage, HostCapabilities, KeyValueStore,
    ObservationSource, OverlaySurface, SpanEntry, SpanKind, SpanRecorder, StackCapture,
};

pub use crate::clock::MonotonicClock;

// =============================================================================
// Clock
// =============================================================================

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_bits: AtomicU64,
    origin: Option<f64>,
}

impl ManualClock {
    pub fn new(start_ms: f64) -> Self {
        Self {
            now_bits: AtomicU64::new(start_ms.to_bits()),
            origin: None,
        }
    }

    pub fn with_time_origin(mut self, origin_ms: f64) -> Self {
        self.origin = Some(origin_ms);
        self
    }

    pub fn set(&self, now_ms: f64) {
        self.now_bits.store(now_ms.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: f64) {
        let now = self.now() + delta_ms;
        self.set(now);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.now_bits.load(Ordering::SeqCst))
    }

    fn time_origin(&self) -> Option<f64> {
        self.origin
    }
}

// =============================================================================
// Span Buffer
// =============================================================================

/// Mark/measure recorder keeping entries in memory.
pub struct SpanBuffer {
    clock: Arc<dyn Clock>,
    entries: Mutex<Vec<SpanEntry>>,
}

impl SpanBuffer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Record a measure with explicit timing, as a host-side profiler would.
    pub fn record_measure(&self, name: &str, start_time: f64, duration: f64) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(SpanEntry {
                name: name.to_string(),
                kind: SpanKind::Measure,
                start_time,
                duration,
            });
        }
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> TickResult<std::sync::MutexGuard<'_, Vec<SpanEntry>>> {
        self.entries
            .lock()
            .map_err(|_| TickError::Span("span buffer poisoned".to_string()))
    }

    fn clear(&self, name: &str, kind: SpanKind) -> TickResult<()> {
        self.lock()?.retain(|e| !(e.kind == kind && e.name == name));
        Ok(())
    }
}

impl std::fmt::Debug for SpanBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanBuffer").field("len", &self.len()).finish()
    }
}

impl SpanRecorder for SpanBuffer {
    fn mark(&self, name: &str) -> TickResult<()> {
        let start_time = self.clock.now();
        self.lock()?.push(SpanEntry {
            name: name.to_string(),
            kind: SpanKind::Mark,
            start_time,
            duration: 0.0,
        });
        Ok(())
    }

    fn measure(&self, name: &str, start_mark: &str, end_mark: &str) -> TickResult<()> {
        let mut entries = self.lock()?;
        let find = |mark: &str| {
            entries
                .iter()
                .rev()
                .find(|e| e.kind == SpanKind::Mark && e.name == mark)
                .map(|e| e.start_time)
                .ok_or_else(|| TickError::Span(format!("no mark named '{}'", mark)))
        };
        let start = find(start_mark)?;
        let end = find(end_mark)?;

        entries.push(SpanEntry {
            name: name.to_string(),
            kind: SpanKind::Measure,
            start_time: start,
            duration: end - start,
        });
        Ok(())
    }

    fn entries(&self, kind: SpanKind) -> TickResult<Vec<SpanEntry>> {
        Ok(self
            .lock()?
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect())
    }

    fn clear_marks(&self, name: &str) -> TickResult<()> {
        self.clear(name, SpanKind::Mark)
    }

    fn clear_measures(&self, name: &str) -> TickResult<()> {
        self.clear(name, SpanKind::Measure)
    }
}

// =============================================================================
// Storage
// =============================================================================

/// Key-value store held in memory. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a value directly, bypassing the trait.
    pub fn value(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> TickResult<Option<String>> {
        let values = self
            .values
            .lock()
            .map_err(|_| TickError::Storage("store poisoned".to_string()))?;
        Ok(values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> TickResult<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| TickError::Storage("store poisoned".to_string()))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// =============================================================================
// Overlay Surface
// =============================================================================

/// Observable state of a [`HeadlessSurface`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SurfaceState {
    pub mounted: bool,
    pub visible: bool,
    pub text: String,
    pub mount_count: u32,
}

/// An overlay node with no rendering. Clones share state, so a test can keep
/// a handle while the engine owns another.
#[derive(Debug, Clone, Default)]
pub struct HeadlessSurface {
    state: Arc<Mutex<SurfaceState>>,
}

impl HeadlessSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SurfaceState {
        self.state.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Remove the node from outside the engine, as a content swap would.
    pub fn detach(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.mounted = false;
        }
    }

    fn update(&self, f: impl FnOnce(&mut SurfaceState)) {
        if let Ok(mut state) = self.state.lock() {
            f(&mut state);
        }
    }
}

impl OverlaySurface for HeadlessSurface {
    fn mount(&mut self) -> TickResult<()> {
        self.update(|s| {
            s.mounted = true;
            s.mount_count += 1;
            s.text = "FPS: --".to_string();
        });
        Ok(())
    }

    fn is_mounted(&self) -> bool {
        self.state().mounted
    }

    fn set_visible(&mut self, visible: bool) {
        self.update(|s| s.visible = visible);
    }

    fn set_text(&mut self, text: &str) {
        self.update(|s| s.text = text.to_string());
    }

    fn unmount(&mut self) {
        self.update(|s| s.mounted = false);
    }
}

// =============================================================================
// Subscriptions
// =============================================================================

#[derive(Debug, Default)]
struct SubscriptionTable {
    next_id: u64,
    active: HashMap<SubscriptionId, Option<EntryKind>>,
}

impl SubscriptionTable {
    fn add(&mut self, kind: Option<EntryKind>) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.active.insert(id, kind);
        id
    }
}

/// Frame scheduler driven by hand. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct ManualScheduler {
    table: Arc<Mutex<SubscriptionTable>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently active subscriptions.
    pub fn active(&self) -> Vec<SubscriptionId> {
        let mut ids: Vec<_> = self
            .table
            .lock()
            .map(|t| t.active.keys().copied().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn active_count(&self) -> usize {
        self.active().len()
    }
}

impl FrameScheduler for ManualScheduler {
    fn subscribe(&mut self) -> TickResult<SubscriptionId> {
        let mut table = self
            .table
            .lock()
            .map_err(|_| TickError::Unsupported("frame scheduler".to_string()))?;
        Ok(table.add(None))
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        if let Ok(mut table) = self.table.lock() {
            table.active.remove(&id);
        }
    }
}

/// Observation source supporting a configurable set of streams. Clones share state.
#[derive(Debug, Clone)]
pub struct ManualObservers {
    supported: HashSet<EntryKind>,
    table: Arc<Mutex<SubscriptionTable>>,
}

impl ManualObservers {
    /// Support every stream.
    pub fn all() -> Self {
        Self::supporting(&[
            EntryKind::Paint,
            EntryKind::LargestContentfulPaint,
            EntryKind::LayoutShift,
            EntryKind::FirstInput,
            EntryKind::LongTask,
        ])
    }

    pub fn supporting(kinds: &[EntryKind]) -> Self {
        Self {
            supported: kinds.iter().copied().collect(),
            table: Arc::new(Mutex::new(SubscriptionTable::default())),
        }
    }

    /// Active subscription for a stream, if any.
    pub fn subscription(&self, kind: EntryKind) -> Option<SubscriptionId> {
        let table = self.table.lock().ok()?;
        table
            .active
            .iter()
            .find(|(_, k)| **k == Some(kind))
            .map(|(id, _)| *id)
    }

    pub fn active_count(&self) -> usize {
        self.table.lock().map(|t| t.active.len()).unwrap_or(0)
    }
}

impl ObservationSource for ManualObservers {
    fn observe(&mut self, kind: EntryKind) -> TickResult<SubscriptionId> {
        if !self.supported.contains(&kind) {
            return Err(TickError::Unsupported(kind.to_string()));
        }
        let mut table = self
            .table
            .lock()
            .map_err(|_| TickError::Unsupported(kind.to_string()))?;
        Ok(table.add(Some(kind)))
    }

    fn disconnect(&mut self, id: SubscriptionId) {
        if let Ok(mut table) = self.table.lock() {
            table.active.remove(&id);
        }
    }
}

// =============================================================================
// Heap and Stack
// =============================================================================

/// Heap probe reporting a settable value.
#[derive(Debug, Clone, Default)]
pub struct FixedHeapProbe {
    usage: Arc<Mutex<Option<HeapUsage>>>,
}

impl FixedHeapProbe {
    pub fn new(used_bytes: u64, total_bytes: u64) -> Self {
        let probe = Self::default();
        probe.set(used_bytes, total_bytes);
        probe
    }

    pub fn set(&self, used_bytes: u64, total_bytes: u64) {
        if let Ok(mut usage) = self.usage.lock() {
            *usage = Some(HeapUsage {
                used_bytes,
                total_bytes,
            });
        }
    }
}

impl HeapProbe for FixedHeapProbe {
    fn sample(&self) -> Option<HeapUsage> {
        *self.usage.lock().ok()?
    }
}

/// Stack capture using the standard library backtrace.
///
/// Returns `None` unless backtraces are enabled for the process
/// (`RUST_BACKTRACE` / `RUST_LIB_BACKTRACE`).
#[derive(Debug, Clone, Copy, Default)]
pub struct BacktraceCapture;

impl StackCapture for BacktraceCapture {
    fn capture(&self) -> Option<String> {
        let backtrace = Backtrace::capture();
        match backtrace.status() {
            BacktraceStatus::Captured => Some(backtrace.to_string()),
            _ => None,
        }
    }
}

// =============================================================================
// Simulated Host
// =============================================================================

/// A complete in-memory host. Each field shares state with the copy handed
/// to the engine, so the host can be driven and inspected from outside.
#[derive(Debug, Clone)]
pub struct SimHost {
    pub clock: Arc<ManualClock>,
    pub scheduler: ManualScheduler,
    pub observers: ManualObservers,
    pub store: MemoryStore,
    pub surface: HeadlessSurface,
    pub spans: Arc<SpanBuffer>,
    pub heap: FixedHeapProbe,
}

impl SimHost {
    pub fn new(start_ms: f64) -> Self {
        let clock = Arc::new(ManualClock::new(start_ms));
        Self {
            spans: Arc::new(SpanBuffer::new(clock.clone())),
            clock,
            scheduler: ManualScheduler::new(),
            observers: ManualObservers::all(),
            store: MemoryStore::new(),
            surface: HeadlessSurface::new(),
            heap: FixedHeapProbe::default(),
        }
    }

    /// Restrict the observation streams the host offers.
    pub fn with_streams(mut self, kinds: &[EntryKind]) -> Self {
        self.observers = ManualObservers::supporting(kinds);
        self
    }

    /// Capabilities backed by this host, with the document already parsed.
    pub fn capabilities(&self) -> HostCapabilities {
        HostCapabilities::new(
            self.clock.clone(),
            Box::new(self.scheduler.clone()),
            Box::new(self.store.clone()),
        )
        .with_observers(Box::new(self.observers.clone()))
        .with_spans(self.spans.clone())
        .with_heap(Box::new(self.heap.clone()))
        .with_surface(Box::new(self.surface.clone()))
        .with_dom_ready(true)
    }

    /// The active frame subscription, if tracking is running.
    pub fn frame_subscription(&self) -> Option<SubscriptionId> {
        self.scheduler.active().first().copied()
    }

    /// Advance the clock by `delta_ms` and produce the matching frame tick.
    /// Returns `None` when no frame subscription is active.
    pub fn frame(&self, delta_ms: f64) -> Option<HostEvent> {
        self.clock.advance(delta_ms);
        let subscription = self.frame_subscription()?;
        Some(HostEvent::Frame(FrameTick {
            subscription,
            delta_time: delta_ms / 1000.0,
        }))
    }

    /// Deliver entries on the subscription for their stream. Returns `None`
    /// when the batch is empty or the stream is not subscribed.
    pub fn batch(&self, entries: Vec<PerformanceEntry>) -> Option<HostEvent> {
        let kind = entries.first()?.kind();
        let subscription = self.observers.subscription(kind)?;
        Some(HostEvent::Observation(ObservationBatch {
            subscription,
            entries,
        }))
    }
}
