//! Timestamped application event log.

use serde::Serialize;

use crate::clock::LoadOrigin;

/// Load timings reported with the first logged event, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadDetails {
    pub js_load_delay: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_eval_delay: Option<f64>,
    /// Relative to the engine start
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dom_ready: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_render: Option<f64>,
}

impl LoadDetails {
    fn lines(&self) -> Vec<String> {
        let mut lines = vec![format!("js → {:.2}s", self.js_load_delay)];
        if let Some(eval) = self.script_eval_delay {
            lines.push(format!("eval → {:.2}s", eval));
        }
        if let Some(dom) = self.dom_ready {
            lines.push(format!("DOM → {:.2}s", dom));
        }
        if let Some(render) = self.first_render {
            lines.push(format!("render → {:.2}s", render));
        }
        lines
    }
}

/// One logged event. Times are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLogRecord {
    pub name: String,
    pub since_start: f64,
    pub since_previous: f64,
    /// Present only on the first event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load: Option<LoadDetails>,
}

impl EventLogRecord {
    pub fn is_first(&self) -> bool {
        self.load.is_some()
    }
}

impl std::fmt::Display for EventLogRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} → {:.2}s", self.name, self.since_start)?;
        match &self.load {
            Some(load) => {
                for line in load.lines() {
                    write!(f, "\n  {}", line)?;
                }
                Ok(())
            }
            None => write!(f, " (Δ {:.2}s)", self.since_previous),
        }
    }
}

/// Page timings the first event reports alongside its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderTimes {
    /// First contentful paint seen by the paint stream
    pub first_render: Option<f64>,
    /// Vitals FCP, used when the paint stream has not reported
    pub fcp: Option<f64>,
}

/// Records elapsed and delta time for named application events.
#[derive(Debug, Clone)]
pub struct EventLog {
    start_time: f64,
    previous_time: f64,
    first_call: bool,
    dom_ready_time: Option<f64>,
}

impl EventLog {
    pub fn new(start_time: f64) -> Self {
        Self {
            start_time,
            previous_time: start_time,
            first_call: true,
            dom_ready_time: None,
        }
    }

    /// Record when the document became ready. Later calls are ignored.
    pub fn mark_dom_ready(&mut self, now: f64) {
        if self.dom_ready_time.is_none() {
            self.dom_ready_time = Some(now);
        }
    }

    pub fn dom_ready_time(&self) -> Option<f64> {
        self.dom_ready_time
    }

    pub fn is_first_call(&self) -> bool {
        self.first_call
    }

    /// Record an event at `now`.
    pub fn add(&mut self, name: &str, now: f64, origin: &LoadOrigin, render: RenderTimes) -> EventLogRecord {
        let since_start = (now - self.start_time) / 1000.0;
        let since_previous = (now - self.previous_time) / 1000.0;

        let load = if self.first_call {
            self.first_call = false;
            Some(LoadDetails {
                js_load_delay: origin.js_load_delay / 1000.0,
                script_eval_delay: origin
                    .script_eval_delay
                    .filter(|d| *d > 0.0)
                    .map(|d| d / 1000.0),
                dom_ready: self
                    .dom_ready_time
                    .map(|t| (t - self.start_time) / 1000.0),
                first_render: render.first_render.or(render.fcp).map(|t| t / 1000.0),
            })
        } else {
            None
        };

        self.previous_time = now;

        let record = EventLogRecord {
            name: name.to_string(),
            since_start,
            since_previous,
            load,
        };
        tracing::info!(target: "tick::log", event = name, since_start, since_previous, "{}", record);
        record
    }
}
