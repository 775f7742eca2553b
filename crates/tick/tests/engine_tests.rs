//! Integration tests for the telemetry engine
//!
//! Each test drives a complete engine through the in-memory host, the way a
//! real host would deliver observer batches, frame ticks and key presses.

use std::panic::{self, AssertUnwindSafe};

use tick::host::StackCapture;
use tick::sim::SimHost;
use tick::{
    EntryKind, HostEvent, InstrumentMethods, KeyEvent, LcpPolicy, PerformanceEntry, Rating,
    TickConfig, TickEngine,
};

/// Engine plus the host handles that drive it
struct Harness {
    host: SimHost,
    engine: TickEngine,
}

impl Harness {
    fn new(config: TickConfig) -> Self {
        let host = SimHost::new(0.0);
        let engine = TickEngine::new(config, host.capabilities());
        Self { host, engine }
    }

    fn quiet() -> Self {
        Self::new(TickConfig::quiet())
    }

    fn deliver(&mut self, entries: Vec<PerformanceEntry>) {
        let event = self.host.batch(entries).expect("stream subscribed");
        self.engine.dispatch(event);
    }

    fn frames(&mut self, delta_ms: f64, count: usize) {
        for _ in 0..count {
            let event = self.host.frame(delta_ms).expect("frame tracking active");
            self.engine.dispatch(event);
        }
    }
}

fn shift(value: f64, had_recent_input: bool) -> PerformanceEntry {
    PerformanceEntry::LayoutShift {
        start_time: 0.0,
        value,
        had_recent_input,
    }
}

fn long_task(duration: f64) -> PerformanceEntry {
    PerformanceEntry::LongTask {
        start_time: 0.0,
        duration,
    }
}

fn input(start_time: f64, processing_start: f64) -> PerformanceEntry {
    PerformanceEntry::FirstInput {
        start_time,
        processing_start: Some(processing_start),
    }
}

fn lcp(render_time: f64) -> PerformanceEntry {
    PerformanceEntry::LargestContentfulPaint {
        start_time: render_time,
        render_time: Some(render_time),
        load_time: None,
    }
}

// =============================================================================
// Vitals
// =============================================================================

#[test]
fn test_cumulative_layout_shift() {
    let mut h = Harness::quiet();
    h.deliver(vec![shift(0.05, false), shift(0.02, false)]);
    h.deliver(vec![shift(0.01, false), shift(0.3, true)]);

    assert!((h.engine.web_vitals().cls - 0.08).abs() < 1e-12);
}

#[test]
fn test_first_input_delay_recorded_once() {
    let mut h = Harness::quiet();
    let fid_subscription = h.host.observers.subscription(EntryKind::FirstInput).unwrap();

    h.deliver(vec![input(100.0, 130.0)]);
    assert_eq!(h.engine.web_vitals().fid, Some(30.0));
    assert!(h.host.observers.subscription(EntryKind::FirstInput).is_none());

    // A straggler on the old subscription is dropped
    h.engine.dispatch(HostEvent::Observation(tick::ObservationBatch {
        subscription: fid_subscription,
        entries: vec![input(200.0, 400.0)],
    }));
    assert_eq!(h.engine.web_vitals().fid, Some(30.0));
}

#[test]
fn test_total_blocking_time() {
    let mut h = Harness::quiet();
    h.deliver(vec![long_task(80.0)]);
    assert_eq!(h.engine.web_vitals().tbt, 30.0);
    h.deliver(vec![long_task(80.0), long_task(45.0)]);
    assert_eq!(h.engine.web_vitals().tbt, 60.0);
}

#[test]
fn test_total_blocking_time_offloaded() {
    let mut h = Harness::new(TickConfig::quiet().with_offload_tbt(true));
    h.deliver(vec![long_task(80.0)]);
    h.deliver(vec![long_task(150.0)]);

    h.engine.settle_workers();
    assert_eq!(h.engine.web_vitals().tbt, 130.0);
}

#[test]
fn test_lcp_last_batch_wins() {
    let mut h = Harness::quiet();
    h.deliver(vec![lcp(900.0), lcp(1400.0)]);
    h.deliver(vec![input(1500.0, 1510.0)]);
    h.deliver(vec![lcp(2100.0)]);
    assert_eq!(h.engine.web_vitals().lcp, Some(2100.0));
}

#[test]
fn test_lcp_freezes_on_interaction() {
    let mut h = Harness::new(TickConfig::quiet().with_lcp_policy(LcpPolicy::FreezeOnInteraction));
    h.deliver(vec![lcp(1400.0)]);
    h.deliver(vec![input(1500.0, 1510.0)]);
    h.deliver(vec![lcp(2100.0)]);
    assert_eq!(h.engine.web_vitals().lcp, Some(1400.0));
}

#[test]
fn test_lcp_freezes_when_hidden() {
    let mut h = Harness::new(TickConfig::quiet().with_lcp_policy(LcpPolicy::FreezeOnInteraction));
    h.deliver(vec![lcp(1400.0)]);
    h.engine.dispatch(HostEvent::VisibilityHidden);
    h.deliver(vec![lcp(2100.0)]);
    assert_eq!(h.engine.web_vitals().lcp, Some(1400.0));
}

#[test]
fn test_vitals_report_ratings() {
    let mut h = Harness::quiet();
    h.deliver(vec![lcp(4200.0)]);
    h.deliver(vec![shift(0.05, false)]);

    let lines = h.engine.show_web_vitals();
    let lcp_line = lines.iter().find(|l| l.label == "LCP").unwrap();
    assert_eq!(lcp_line.rating, Some(Rating::Poor));
    assert!(lines.iter().all(|l| l.label != "TBT"));
}

// =============================================================================
// Frames and Drops
// =============================================================================

#[test]
fn test_frame_drop_history_capped() {
    let mut h = Harness::quiet();
    h.engine.enable_frame_drop_detection(true);

    h.frames(16.0, 1);
    for _ in 0..55 {
        h.frames(40.0, 1);
    }

    let history = h.engine.frame_drop_history();
    assert_eq!(history.len(), 50);
    assert_eq!(history[0].frame_number, 6);
    assert_eq!(history[49].frame_number, 55);
}

#[test]
fn test_stop_resets_detector_timestamp() {
    let mut h = Harness::quiet();
    h.engine.enable_frame_drop_detection(true);
    h.frames(16.0, 2);

    h.engine.stop_frame_tracking();
    h.host.clock.advance(5000.0);
    h.engine.start_frame_tracking();
    h.frames(16.0, 2);

    assert!(h.engine.frame_drop_history().is_empty());
}

#[test]
fn test_reenabled_detection_ignores_disabled_period() {
    let mut h = Harness::quiet();
    h.engine.enable_frame_drop_detection(true);
    h.frames(16.0, 5);

    h.engine.disable_frame_drop_detection();
    h.frames(16.0, 100);

    h.engine.enable_frame_drop_detection(true);
    h.frames(16.0, 1);

    assert!(h.engine.frame_drop_history().is_empty());

    h.frames(40.0, 1);
    let history = h.engine.frame_drop_history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].frame_time, 40.0);
}

struct PinnedStack;

impl StackCapture for PinnedStack {
    fn capture(&self) -> Option<String> {
        Some("at Editor::paint".to_string())
    }
}

#[test]
fn test_frame_drop_captures_stack() {
    let host = SimHost::new(0.0);
    let capabilities = host.capabilities().with_stack(Box::new(PinnedStack));
    let mut h = Harness {
        engine: TickEngine::new(TickConfig::quiet(), capabilities),
        host,
    };
    h.engine.enable_frame_drop_detection(true);

    h.frames(16.0, 1);
    h.frames(16.0, 1);
    h.frames(45.0, 1);

    let history = h.engine.frame_drop_history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].stack_trace.as_deref(), Some("at Editor::paint"));
}

#[test]
fn test_animation_report_after_frames() {
    let mut h = Harness::new(TickConfig::quiet().with_auto_start(true));
    h.frames(16.0, 30);
    h.frames(60.0, 1);

    let lines = h.engine.show_animation_metrics();
    let long = lines.iter().find(|l| l.label == "Long Frames").unwrap();
    assert!(long.value.starts_with("1 ("));
    let total = lines.last().unwrap();
    assert_eq!(total.value, "31");
}

// =============================================================================
// Instrumentation
// =============================================================================

#[test]
fn test_instrumented_panic_propagates() {
    let h = Harness::quiet();
    h.engine.enable_function_instrumentation(true);

    let clock = h.host.clock.clone();
    let failing = h.engine.instrument_function(
        move |code: u32| -> u32 {
            clock.advance(4.0);
            panic!("failed with {}", code);
        },
        "failing",
    );

    let err = panic::catch_unwind(AssertUnwindSafe(|| failing.call(7))).unwrap_err();
    assert_eq!(err.downcast_ref::<String>().map(String::as_str), Some("failed with 7"));

    let stats = h.engine.instrumented_function_stats();
    assert_eq!(stats[0].call_count, 1);
    assert_eq!(stats[0].total_time, 4.0);
    assert_eq!(stats[0].min_time, 0.0);
}

#[test]
fn test_instrumented_error_counted_and_returned() {
    let h = Harness::quiet();
    h.engine.enable_function_instrumentation(true);

    let clock = h.host.clock.clone();
    let parse = h.engine.instrument_function(
        move |input: &str| -> Result<u32, String> {
            clock.advance(3.0);
            input.parse::<u32>().map_err(|e| format!("{}: {}", input, e))
        },
        "parse",
    );

    assert_eq!(parse.try_call("12"), Ok(12));
    let err = parse.try_call("x").unwrap_err();
    assert!(err.starts_with("x: "));

    let stats = h.engine.instrumented_function_stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].name, "parse");
    assert_eq!(stats[0].call_count, 2);
    assert_eq!(stats[0].total_time, 6.0);
    assert_eq!(stats[0].min_time, 3.0);
    assert_eq!(stats[0].max_time, 3.0);
}

#[test]
fn test_disabled_instrumentation_passthrough() {
    let h = Harness::quiet();
    let f = h.engine.instrument_function(|x: i32| x * 3, "triple");
    assert!(!f.is_instrumented());
    assert_eq!(f.call(3), 9);
    assert!(h.engine.instrumented_function_stats().is_empty());
}

struct Store {
    items: Vec<u32>,
}

impl InstrumentMethods for Store {
    const METHODS: &'static [&'static str] = &["push", "total"];
}

#[test]
fn test_object_methods_instrumented() {
    let h = Harness::quiet();
    h.engine.enable_function_instrumentation(true);

    let mut store = h.engine.instrument_object_methods(Store { items: Vec::new() }, "Store");
    store.invoke_mut("push", |s| s.items.push(4));
    store.invoke_mut("push", |s| s.items.push(6));
    let total: u32 = store.invoke("total", |s| s.items.iter().sum());
    assert_eq!(total, 10);

    let stats = h.engine.instrumented_function_stats();
    let names: Vec<&str> = stats.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Store.push", "Store.total"]);
    assert_eq!(stats[0].call_count, 2);

    h.engine.clear_instrumented_function_stats();
    assert!(h.engine.instrumented_function_stats().is_empty());
}

// =============================================================================
// Overlay, Log and Teardown
// =============================================================================

#[test]
fn test_overlay_survives_content_swap() {
    let mut h = Harness::new(TickConfig::quiet().with_auto_start(true));
    h.engine.show_fps_overlay();
    h.frames(20.0, 12);
    // The window opened at t=0, so the first frame only seeds it
    assert_eq!(h.engine.fps_overlay().fps(), Some(56.0));

    h.engine.cleanup_fps_overlay();
    assert!(!h.engine.is_frame_tracking());

    h.engine.dispatch(HostEvent::OverlayRemoved);
    assert!(h.host.surface.state().mounted);
    assert!(h.engine.is_frame_tracking());
    assert_eq!(h.host.surface.state().text, "FPS: --");
}

#[test]
fn test_overlay_visibility_persists_across_engines() {
    let host = SimHost::new(0.0);
    let mut first = TickEngine::new(TickConfig::quiet(), host.capabilities());
    first.dispatch(HostEvent::Key(KeyEvent::new("F", true)));
    first.cleanup();

    let second = TickEngine::new(TickConfig::quiet(), host.capabilities());
    assert!(second.fps_overlay().is_visible());
}

#[test]
fn test_event_log_first_call() {
    let host = SimHost::new(800.0);
    let caps = host.capabilities().with_first_hit_marker(300.0);
    let mut engine = TickEngine::new(TickConfig::default().with_auto_start(false).with_start_event(false), caps);

    host.clock.advance(200.0);
    let record = engine.log_event("boot", false).unwrap();
    let load = record.load.unwrap();
    assert_eq!(load.js_load_delay, 0.8);
    assert_eq!(load.script_eval_delay, Some(0.5));
    assert_eq!(load.dom_ready, Some(0.0));
    assert!(!engine.has_pending_vitals_report());
}

#[test]
fn test_cleanup_twice() {
    let mut h = Harness::new(TickConfig::default().with_offload_tbt(true));
    h.deliver(vec![long_task(90.0)]);

    h.engine.cleanup();
    h.engine.cleanup();

    assert_eq!(h.host.observers.active_count(), 0);
    assert_eq!(h.host.scheduler.active_count(), 0);
    assert!(!h.host.surface.state().mounted);
    assert_eq!(h.engine.web_vitals().tbt, 40.0);
}
