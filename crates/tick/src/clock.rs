//! Time base and load-origin bookkeeping.

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::host::{Clock, NavigationTiming};

/// A clock backed by [`Instant`], anchored to the wall clock at creation.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
    origin_ms: Option<f64>,
}

impl MonotonicClock {
    /// Create a clock whose zero is now.
    #[inline]
    pub fn new() -> Self {
        let origin_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_secs_f64() * 1000.0);
        Self {
            start: Instant::now(),
            origin_ms,
        }
    }

    /// Create a clock whose zero is an earlier instant (e.g. process start).
    #[inline]
    pub fn since(start: Instant) -> Self {
        Self {
            start,
            ..Self::new()
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    fn time_origin(&self) -> Option<f64> {
        self.origin_ms
    }
}

/// Timing facts established when the engine was created.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadOrigin {
    /// Clock reading when the engine started executing
    pub js_load_delay: f64,
    /// Time from the pre-load marker to engine start, when the marker exists
    pub script_eval_delay: Option<f64>,
    /// Absolute time navigation started
    pub page_load_time: f64,
    #[serde(skip)]
    clock: Arc<dyn Clock>,
}

impl LoadOrigin {
    /// Capture the origin from the current clock reading.
    pub fn capture(
        clock: Arc<dyn Clock>,
        first_hit_marker: Option<f64>,
        navigation: Option<&NavigationTiming>,
    ) -> Self {
        let js_load_delay = clock.now();
        let script_eval_delay = first_hit_marker
            .filter(|marker| *marker != 0.0)
            .map(|marker| js_load_delay - marker);
        let page_load_time = clock
            .time_origin()
            .filter(|origin| *origin != 0.0)
            .or_else(|| navigation.and_then(NavigationTiming::navigation_start))
            .unwrap_or(js_load_delay);

        Self {
            js_load_delay,
            script_eval_delay,
            page_load_time,
            clock,
        }
    }

    /// Milliseconds between navigation start and now.
    pub fn time_since_page_load(&self) -> f64 {
        self.clock.time_origin().unwrap_or(0.0) + self.clock.now() - self.page_load_time
    }
}

impl std::fmt::Debug for LoadOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadOrigin")
            .field("js_load_delay", &self.js_load_delay)
            .field("script_eval_delay", &self.script_eval_delay)
            .field("page_load_time", &self.page_load_time)
            .finish()
    }
}
