//! The telemetry engine.
//!
//! [`TickEngine`] owns every model (vitals, animation metrics, frame-drop
//! history, instrumentation registry, overlay and event log) and the host
//! capabilities that feed them. Hosts deliver callbacks as [`HostEvent`]s,
//! either directly through [`TickEngine::dispatch`] or from any thread via
//! [`TickEngine::event_sender`] and a later [`TickEngine::pump`] on the
//! owning thread.
//!
//! # Example
//!
//! ```rust
//! use tick::{sim::SimHost, TickConfig, TickEngine};
//!
//! let host = SimHost::new(0.0);
//! let mut engine = TickEngine::new(TickConfig::quiet().with_auto_start(true), host.capabilities());
//!
//! for _ in 0..60 {
//!     if let Some(frame) = host.frame(16.0) {
//!         engine.dispatch(frame);
//!     }
//! }
//!
//! assert_eq!(engine.animation_metrics().total_frames, 60);
//! engine.cleanup();
//! ```

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use crate::clock::LoadOrigin;
use crate::config::TickConfig;
use crate::detector::{AttributionSources, FrameDropDetector, FrameDropInfo};
use crate::entry::{FrameTick, HostEvent, KeyEvent, KeyOutcome};
use crate::event_log::{EventLog, EventLogRecord, RenderTimes};
use crate::frame::{AnimationMetrics, FrameTracker};
use crate::host::{
    Clock, FrameScheduler, HeapProbe, HostCapabilities, ObservationSource, SpanRecorder,
    StackCapture,
};
use crate::instrument::{
    FunctionStatsSnapshot, InstrumentMethods, Instrumented, InstrumentedObject, Instrumenter,
};
use crate::overlay::FpsOverlay;
use crate::report::{self, ReportLine};
use crate::vitals::{VitalsCollector, WebVitals};

/// Runtime performance telemetry for one host.
pub struct TickEngine {
    config: TickConfig,
    clock: Arc<dyn Clock>,
    scheduler: Box<dyn FrameScheduler>,
    observers: Option<Box<dyn ObservationSource>>,
    spans: Option<Arc<dyn SpanRecorder>>,
    heap: Option<Box<dyn HeapProbe>>,
    stack: Option<Box<dyn StackCapture>>,
    origin: LoadOrigin,
    vitals: VitalsCollector,
    frames: FrameTracker,
    detector: FrameDropDetector,
    instrumenter: Instrumenter,
    overlay: FpsOverlay,
    overlay_pending_init: bool,
    log: EventLog,
    vitals_dump_due: Option<f64>,
    events_tx: Sender<HostEvent>,
    events_rx: Receiver<HostEvent>,
}

impl TickEngine {
    /// Build an engine over the host's capabilities.
    ///
    /// Connects every supported observation stream, mounts the overlay once
    /// the document is ready, starts frame tracking when configured to, and
    /// logs the `start` event.
    pub fn new(config: TickConfig, host: HostCapabilities) -> Self {
        let HostCapabilities {
            clock,
            scheduler,
            storage,
            mut observers,
            spans,
            heap,
            surface,
            stack,
            navigation,
            buffered_paints,
            first_hit_marker,
            dom_ready,
        } = host;

        let origin = LoadOrigin::capture(clock.clone(), first_hit_marker, navigation.as_ref());
        let start_time = clock.now();

        let mut vitals = VitalsCollector::new(&config, &buffered_paints, navigation.as_ref());
        match observers.as_deref_mut() {
            Some(source) => vitals.connect(source),
            None => {
                tracing::debug!(target: "tick::engine", "no observation source, vitals limited to buffered entries");
            }
        }

        let mut log = EventLog::new(start_time);
        let mut overlay = FpsOverlay::new(&config, surface, storage);
        if dom_ready {
            log.mark_dom_ready(start_time);
            overlay.init();
        }

        let (events_tx, events_rx) = mpsc::channel();
        let mut engine = Self {
            frames: FrameTracker::new(&config),
            detector: FrameDropDetector::new(&config),
            instrumenter: Instrumenter::new(clock.clone(), spans.clone()),
            config,
            clock,
            scheduler,
            observers,
            spans,
            heap,
            stack,
            origin,
            vitals,
            overlay,
            overlay_pending_init: !dom_ready,
            log,
            vitals_dump_due: None,
            events_tx,
            events_rx,
        };

        if engine.config.auto_start_frame_tracking {
            engine.start_frame_tracking();
        }
        if engine.config.log_start_event {
            engine.log_event("start", true);
        }

        tracing::debug!(target: "tick::engine", js_load_delay = engine.origin.js_load_delay, "engine started");
        engine
    }

    pub fn config(&self) -> &TickConfig {
        &self.config
    }

    // =========================================================================
    // Event Routing
    // =========================================================================

    /// Apply one host event on the calling thread.
    pub fn dispatch(&mut self, event: HostEvent) {
        match event {
            HostEvent::Observation(batch) => {
                let source = self
                    .observers
                    .as_deref_mut()
                    .map(|s| s as &mut dyn ObservationSource);
                self.vitals
                    .handle_batch(batch.subscription, &batch.entries, source);
            }
            HostEvent::Frame(tick) => self.on_frame(tick),
            HostEvent::Key(key) => {
                self.handle_key(&key);
            }
            HostEvent::OverlayRemoved => self.restore_fps_overlay(),
            HostEvent::DomContentLoaded => self.on_dom_content_loaded(),
            HostEvent::VisibilityHidden => self.vitals.on_visibility_hidden(),
        }
        self.poll_timers();
    }

    /// A sender hosts can move to other threads. Events queue until
    /// [`TickEngine::pump`] runs.
    pub fn event_sender(&self) -> Sender<HostEvent> {
        self.events_tx.clone()
    }

    /// Apply every queued event, collect worker results and fire due timers.
    /// Returns the number of events applied.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.dispatch(event);
            applied += 1;
        }
        self.vitals.poll();
        self.poll_timers();
        applied
    }

    /// Block until background aggregation has caught up.
    pub fn settle_workers(&mut self) {
        self.vitals.settle();
    }

    /// Fire the deferred vitals report once its settle delay has passed.
    pub fn poll_timers(&mut self) {
        if let Some(due) = self.vitals_dump_due {
            if self.clock.now() >= due {
                self.vitals_dump_due = None;
                self.show_web_vitals();
            }
        }
    }

    /// Whether a deferred vitals report is waiting.
    pub fn has_pending_vitals_report(&self) -> bool {
        self.vitals_dump_due.is_some()
    }

    /// Route a key press. Only the overlay chord is handled.
    pub fn handle_key(&mut self, key: &KeyEvent) -> KeyOutcome {
        self.overlay.handle_key(key)
    }

    fn on_dom_content_loaded(&mut self) {
        let now = self.clock.now();
        self.log.mark_dom_ready(now);
        if self.overlay_pending_init {
            self.overlay_pending_init = false;
            self.overlay.init();
        }
    }

    fn on_frame(&mut self, tick: FrameTick) {
        if self.frames.subscription() != Some(tick.subscription) {
            tracing::trace!(target: "tick::frame", subscription = tick.subscription.0, "tick for inactive subscription dropped");
            return;
        }

        let now = self.clock.now();
        if self.detector.is_enabled() {
            let sources = AttributionSources {
                spans: self.spans.as_deref(),
                instrumenter: self
                    .instrumenter
                    .is_enabled()
                    .then_some(&self.instrumenter),
                stack: self.stack.as_deref(),
                logging: self.config.logging_enabled,
            };
            self.detector.tick(now, sources);
        }

        self.frames.record_frame(tick.delta_time, self.heap.as_deref());
        self.overlay.on_frame(now);
        self.vitals.poll();
    }

    // =========================================================================
    // Event Log
    // =========================================================================

    /// Log a named application event. The first call also reports load
    /// timings; with `show_vitals` it schedules a vitals report after the
    /// settle delay, later calls report immediately. Returns `None` when
    /// logging is disabled.
    pub fn log_event(&mut self, name: &str, show_vitals: bool) -> Option<EventLogRecord> {
        if !self.config.logging_enabled {
            return None;
        }

        let now = self.clock.now();
        let render = RenderTimes {
            first_render: self.vitals.first_render(),
            fcp: self.vitals.vitals().fcp,
        };
        let record = self.log.add(name, now, &self.origin, render);

        if show_vitals {
            if record.is_first() {
                self.vitals_dump_due = Some(now + self.config.vitals_settle_delay_ms);
            } else {
                self.show_web_vitals();
            }
        }
        Some(record)
    }

    // =========================================================================
    // Snapshots and Reports
    // =========================================================================

    /// Copy of the current page-load metrics.
    pub fn web_vitals(&self) -> WebVitals {
        self.vitals.vitals().clone()
    }

    /// Copy of the current animation metrics.
    pub fn animation_metrics(&self) -> AnimationMetrics {
        self.frames.metrics().clone()
    }

    /// Rate the page-load metrics, logging them when logging is enabled.
    pub fn show_web_vitals(&self) -> Vec<ReportLine> {
        let lines = report::vitals_report(self.vitals.vitals());
        if self.config.logging_enabled {
            report::emit("tick::vitals", &lines);
        }
        lines
    }

    /// Rate the animation metrics, logging them when logging is enabled.
    pub fn show_animation_metrics(&self) -> Vec<ReportLine> {
        let lines = report::animation_report(self.frames.metrics(), self.config.budget.long_frame_ms);
        if self.config.logging_enabled {
            report::emit("tick::frame", &lines);
        }
        lines
    }

    /// Restore the initial animation metrics and resample memory.
    pub fn reset_animation_metrics(&mut self) {
        self.frames.reset(self.heap.as_deref());
    }

    // =========================================================================
    // Frame Tracking and Drop Detection
    // =========================================================================

    /// Subscribe to frame ticks. No-op when already tracking.
    pub fn start_frame_tracking(&mut self) {
        if self.frames.start(self.scheduler.as_mut()) {
            self.overlay.begin_sampling(self.clock.now());
        }
    }

    /// Unsubscribe from frame ticks. No-op when not tracking.
    pub fn stop_frame_tracking(&mut self) {
        self.frames.stop(self.scheduler.as_mut());
        self.detector.reset_timestamp();
    }

    pub fn is_frame_tracking(&self) -> bool {
        self.frames.is_active()
    }

    /// Turn drop detection on or off. Enabling starts frame tracking if
    /// needed.
    pub fn enable_frame_drop_detection(&mut self, enabled: bool) {
        self.detector.set_enabled(enabled);
        if enabled && !self.frames.is_active() {
            self.start_frame_tracking();
        }
    }

    pub fn disable_frame_drop_detection(&mut self) {
        self.detector.set_enabled(false);
    }

    pub fn is_frame_drop_detection_enabled(&self) -> bool {
        self.detector.is_enabled()
    }

    /// Copy of the frame-drop history, oldest first.
    pub fn frame_drop_history(&self) -> Vec<FrameDropInfo> {
        self.detector.snapshot()
    }

    pub fn clear_frame_drop_history(&mut self) {
        self.detector.clear();
    }

    // =========================================================================
    // Instrumentation
    // =========================================================================

    pub fn enable_function_instrumentation(&self, enabled: bool) {
        self.instrumenter.set_enabled(enabled);
    }

    pub fn disable_function_instrumentation(&self) {
        self.instrumenter.set_enabled(false);
    }

    pub fn is_function_instrumentation_enabled(&self) -> bool {
        self.instrumenter.is_enabled()
    }

    /// Wrap a callable so its calls are timed under `name`.
    pub fn instrument_function<F>(&self, f: F, name: &str) -> Instrumented<F> {
        self.instrumenter.instrument(f, name)
    }

    /// Wrap each published method of `target` as `prefix.method`.
    pub fn instrument_object_methods<T: InstrumentMethods>(&self, target: T, prefix: &str) -> InstrumentedObject<T> {
        self.instrumenter.instrument_object(target, prefix)
    }

    /// Handle sharing this engine's registry, usable from other threads.
    pub fn instrumenter(&self) -> &Instrumenter {
        &self.instrumenter
    }

    pub fn instrumented_function_stats(&self) -> Vec<FunctionStatsSnapshot> {
        self.instrumenter.stats()
    }

    pub fn clear_instrumented_function_stats(&self) {
        self.instrumenter.clear();
    }

    // =========================================================================
    // FPS Overlay
    // =========================================================================

    pub fn toggle_fps_overlay(&mut self) {
        self.overlay.toggle();
    }

    pub fn show_fps_overlay(&mut self) {
        self.overlay.show();
    }

    pub fn hide_fps_overlay(&mut self) {
        self.overlay.hide();
    }

    /// Recreate the overlay if it was removed and make sure frames are
    /// being tracked.
    pub fn restore_fps_overlay(&mut self) {
        let now = self.clock.now();
        self.overlay.restore(now);
        if !self.frames.is_active() {
            self.start_frame_tracking();
        }
    }

    /// Stop frame tracking and remove the overlay.
    pub fn cleanup_fps_overlay(&mut self) {
        self.stop_frame_tracking();
        self.overlay.cleanup();
    }

    pub fn fps_overlay(&self) -> &FpsOverlay {
        &self.overlay
    }

    // =========================================================================
    // Load Timing
    // =========================================================================

    /// Milliseconds from navigation start to engine creation.
    pub fn js_load_delay(&self) -> f64 {
        self.origin.js_load_delay
    }

    pub fn time_since_page_load(&self) -> f64 {
        self.origin.time_since_page_load()
    }

    pub fn load_origin(&self) -> &LoadOrigin {
        &self.origin
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Disconnect every observer, stop frame tracking, remove the overlay and
    /// its key handling, and stop background workers. Safe to call repeatedly.
    pub fn cleanup(&mut self) {
        if let Some(source) = self.observers.as_deref_mut() {
            self.vitals.disconnect(source);
        }
        self.cleanup_fps_overlay();
        self.overlay.stop_listening();
        self.overlay_pending_init = false;
        self.vitals_dump_due = None;
        self.vitals.shutdown();
        tracing::debug!(target: "tick::engine", "engine cleaned up");
    }
}

impl std::fmt::Debug for TickEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickEngine")
            .field("origin", &self.origin)
            .field("vitals", self.vitals.vitals())
            .field("tracking", &self.frames.is_active())
            .field("detector", &self.detector.is_enabled())
            .field("instrumenter", &self.instrumenter)
            .field("overlay", &self.overlay)
            .finish()
    }
}
