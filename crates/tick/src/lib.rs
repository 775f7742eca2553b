//! Runtime Performance Telemetry
//!
//! This crate measures how an interactive application loads and animates:
//! - Page-load vitals (FCP, LCP, FID, CLS, TBT, TTI, FMP) from host observation streams
//! - Per-frame animation metrics over a rolling frame-time window
//! - Frame-drop detection with attribution to recent spans and instrumented functions
//! - Function instrumentation with per-name call statistics
//! - An FPS overlay and a timestamped event log
//!
//! The engine never talks to a platform directly. Everything it consumes is a
//! capability trait in [`host`]; [`sim`] implements all of them in memory.
//!
//! # Feature Flags
//!
//! - `telemetry` (default): Logs rated metric reports through `tracing`
//!
//! # Example
//!
//! ```rust
//! use tick::{sim::SimHost, PerformanceEntry, TickConfig, TickEngine};
//!
//! let host = SimHost::new(0.0);
//! let mut engine = TickEngine::new(TickConfig::quiet(), host.capabilities());
//!
//! let shifts = host.batch(vec![PerformanceEntry::LayoutShift {
//!     start_time: 120.0,
//!     value: 0.05,
//!     had_recent_input: false,
//! }]);
//! engine.dispatch(shifts.unwrap());
//!
//! assert_eq!(engine.web_vitals().cls, 0.05);
//! ```

mod budget;
mod clock;
mod config;
mod detector;
mod engine;
mod entry;
mod error;
mod event_log;
mod frame;
pub mod host;
mod instrument;
mod overlay;
mod report;
pub mod sim;
mod tbt;
mod vitals;

pub use budget::*;
pub use clock::{LoadOrigin, MonotonicClock};
pub use config::{LcpPolicy, TickConfig};
pub use detector::{AttributionSources, FrameDropDetector, FrameDropInfo, PerformanceMarkInfo, SlowFunction};
pub use engine::TickEngine;
pub use entry::*;
pub use error::{TickError, TickResult};
pub use event_log::{EventLog, EventLogRecord, LoadDetails, RenderTimes};
pub use frame::{fps_for, smoothness_score, AnimationMetrics, FrameTimeHistory, FrameTracker};
pub use host::HostCapabilities;
pub use instrument::{
    FunctionStats, FunctionStatsSnapshot, InstrumentMethods, InstrumentationRegistry, Instrumented,
    InstrumentedObject, Instrumenter, ScopeTimer,
};
pub use overlay::FpsOverlay;
pub use report::{animation_report, vitals_report, Rating, ReportLine, Thresholds};
pub use tbt::{total_blocking_time, TbtAggregator};
pub use vitals::{estimate_tti, VitalsCollector, WebVitals};
