//! Drives a telemetry engine through a recorded trace.

use anyhow::{bail, Result};
use serde::Serialize;
use tick::host::Clock;
use tick::sim::{BacktraceCapture, SimHost};
use tick::{
    AnimationMetrics, EventLogRecord, FrameDropInfo, FunctionStatsSnapshot, HostEvent, KeyEvent,
    ReportLine, TickConfig, TickEngine, WebVitals,
};

use crate::trace::{Action, Step, Trace};

/// Final engine state after a replay
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub vitals: WebVitals,
    pub animation: AnimationMetrics,
    pub frame_drops: Vec<FrameDropInfo>,
    pub functions: Vec<FunctionStatsSnapshot>,
    pub vitals_report: Vec<ReportLine>,
    pub animation_report: Vec<ReportLine>,
    pub events: Vec<EventLogRecord>,
    /// Steps the host could not deliver (no matching subscription)
    pub skipped_steps: usize,
}

/// Replay options layered over the trace's own configuration
#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    pub config: Option<TickConfig>,
    pub offload_tbt: bool,
    pub detect_drops: bool,
}

struct Replayer {
    host: SimHost,
    engine: TickEngine,
    events: Vec<EventLogRecord>,
    skipped: usize,
}

impl Replayer {
    fn new(trace: &Trace, options: &ReplayOptions) -> Self {
        let mut config = options
            .config
            .clone()
            .or_else(|| trace.config.clone())
            .unwrap_or_default();
        if options.offload_tbt {
            config = config.with_offload_tbt(true);
        }

        let host = SimHost::new(trace.start_ms);
        if let Some(heap) = &trace.heap {
            host.heap.set(heap.used_bytes, heap.total_bytes);
        }

        let mut capabilities = host
            .capabilities()
            .with_dom_ready(trace.dom_ready)
            .with_buffered_paints(trace.buffered_paints.clone())
            .with_stack(Box::new(BacktraceCapture));
        if let Some(navigation) = &trace.navigation {
            capabilities = capabilities.with_navigation(*navigation);
        }
        if let Some(marker) = trace.first_hit_marker {
            capabilities = capabilities.with_first_hit_marker(marker);
        }

        let mut engine = TickEngine::new(config, capabilities);
        if options.detect_drops {
            engine.enable_frame_drop_detection(true);
        }

        Self {
            host,
            engine,
            events: Vec::new(),
            skipped: 0,
        }
    }

    fn deliver(&mut self, event: Option<HostEvent>) {
        match event {
            Some(event) => self.engine.dispatch(event),
            None => self.skipped += 1,
        }
    }

    fn step(&mut self, step: &Step) {
        let now = self.host.clock.now();
        if step.at < now {
            tracing::warn!(target: "tick::replay", at = step.at, now, "Step is behind the clock");
        }

        if let Action::Frame { delta_ms } = &step.action {
            // The frame itself moves the clock forward by its delta
            self.host.clock.set((step.at - delta_ms).max(now));
            let event = self.host.frame(*delta_ms);
            self.deliver(event);
            return;
        }
        self.host.clock.set(step.at.max(now));

        match &step.action {
            Action::Frame { .. } => {}
            Action::Entries { entries } => {
                let event = self.host.batch(entries.clone());
                self.deliver(event);
            }
            Action::Key { key, shift } => {
                self.engine.dispatch(HostEvent::Key(KeyEvent::new(key, *shift)));
            }
            Action::OverlayRemoved => {
                self.host.surface.detach();
                self.engine.dispatch(HostEvent::OverlayRemoved);
            }
            Action::DomContentLoaded => self.engine.dispatch(HostEvent::DomContentLoaded),
            Action::VisibilityHidden => self.engine.dispatch(HostEvent::VisibilityHidden),
            Action::Log { name, show_vitals } => {
                if let Some(record) = self.engine.log_event(name, *show_vitals) {
                    self.events.push(record);
                }
            }
            Action::Measure {
                name,
                start_time,
                duration,
            } => self.host.spans.record_measure(name, *start_time, *duration),
            Action::Call { name, duration_ms } => {
                let instrumenter = self.engine.instrumenter().clone();
                tick::instrument_scope!(instrumenter, name);
                self.host.clock.advance(*duration_ms);
            }
            Action::StartTracking => self.engine.start_frame_tracking(),
            Action::StopTracking => self.engine.stop_frame_tracking(),
            Action::EnableDropDetection => self.engine.enable_frame_drop_detection(true),
            Action::EnableInstrumentation => self.engine.enable_function_instrumentation(true),
            Action::ResetAnimation => self.engine.reset_animation_metrics(),
        }
        self.engine.poll_timers();
    }

    fn finish(mut self) -> Summary {
        self.engine.settle_workers();
        self.engine.pump();
        self.engine.poll_timers();

        let summary = Summary {
            vitals: self.engine.web_vitals(),
            animation: self.engine.animation_metrics(),
            frame_drops: self.engine.frame_drop_history(),
            functions: self.engine.instrumented_function_stats(),
            vitals_report: self.engine.show_web_vitals(),
            animation_report: self.engine.show_animation_metrics(),
            events: self.events,
            skipped_steps: self.skipped,
        };
        self.engine.cleanup();
        summary
    }
}

/// Replay every step of `trace` and summarize the resulting engine state.
pub fn run(trace: &Trace, options: &ReplayOptions) -> Result<Summary> {
    if trace.steps.iter().any(|s| !s.at.is_finite()) {
        bail!("trace contains a step with a non-finite timestamp");
    }

    let mut replayer = Replayer::new(trace, options);
    for step in &trace.steps {
        replayer.step(step);
    }

    let summary = replayer.finish();
    tracing::info!(
        target: "tick::replay",
        steps = trace.steps.len(),
        skipped = summary.skipped_steps,
        drops = summary.frame_drops.len(),
        "Replay finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Trace {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_replay_vitals() {
        let trace = parse(
            r#"{
                "config": { "loggingEnabled": false },
                "steps": [
                    { "at": 100, "action": "entries", "entries": [
                        { "kind": "layout-shift", "startTime": 90, "value": 0.04, "hadRecentInput": false }
                    ]},
                    { "at": 200, "action": "entries", "entries": [
                        { "kind": "longtask", "startTime": 150, "duration": 120 }
                    ]}
                ]
            }"#,
        );

        let summary = run(&trace, &ReplayOptions::default()).unwrap();
        assert_eq!(summary.vitals.cls, 0.04);
        assert_eq!(summary.vitals.tbt, 70.0);
        assert_eq!(summary.skipped_steps, 0);
    }

    #[test]
    fn test_replay_frame_drop_attribution() {
        let trace = parse(
            r#"{
                "config": { "loggingEnabled": false },
                "steps": [
                    { "at": 0, "action": "enableInstrumentation" },
                    { "at": 16, "action": "frame", "deltaMs": 16 },
                    { "at": 20, "action": "call", "name": "layout", "durationMs": 30 },
                    { "at": 60, "action": "frame", "deltaMs": 10 }
                ]
            }"#,
        );

        let options = ReplayOptions {
            detect_drops: true,
            ..ReplayOptions::default()
        };
        let summary = run(&trace, &options).unwrap();
        assert_eq!(summary.frame_drops.len(), 1);
        let drop = &summary.frame_drops[0];
        assert_eq!(drop.slow_functions[0].name, "layout");
        assert_eq!(summary.functions[0].call_count, 1);
    }

    #[test]
    fn test_frames_without_tracking_are_skipped() {
        let trace = parse(
            r#"{
                "config": { "loggingEnabled": false, "autoStartFrameTracking": false },
                "steps": [
                    { "at": 16, "action": "frame", "deltaMs": 16 },
                    { "at": 32, "action": "frame", "deltaMs": 16 }
                ]
            }"#,
        );

        let summary = run(&trace, &ReplayOptions::default()).unwrap();
        assert_eq!(summary.skipped_steps, 2);
        assert_eq!(summary.animation.total_frames, 0);
    }
}
