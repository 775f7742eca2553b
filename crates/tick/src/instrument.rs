//! Function instrumentation.
//!
//! Wrapping a callable records a start mark, runs it, records an end mark
//! and a measure, and folds the elapsed time into per-name statistics that
//! the frame-drop attributor reads when a frame overruns.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tick::{Instrumenter, sim::ManualClock};
//!
//! let instrumenter = Instrumenter::new(Arc::new(ManualClock::new(0.0)), None);
//! instrumenter.set_enabled(true);
//!
//! let parse = instrumenter.instrument(|input: &str| input.len(), "parse");
//! assert_eq!(parse.call("hello"), 5);
//! assert_eq!(instrumenter.stats()[0].call_count, 1);
//! ```

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::host::{Clock, SpanRecorder};

/// Running statistics for one instrumented name.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionStats {
    /// Type name of the wrapped callable
    pub original: &'static str,
    pub call_count: u64,
    pub total_time: f64,
    pub max_time: f64,
    /// Infinity until a call completes successfully
    pub min_time: f64,
}

impl FunctionStats {
    fn new(original: &'static str) -> Self {
        Self {
            original,
            call_count: 0,
            total_time: 0.0,
            max_time: 0.0,
            min_time: f64::INFINITY,
        }
    }

    pub fn avg_time(&self) -> f64 {
        self.total_time / self.call_count.max(1) as f64
    }
}

/// Point-in-time view of a registry entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionStatsSnapshot {
    pub name: String,
    pub call_count: u64,
    pub avg_time: f64,
    pub max_time: f64,
    /// Zero when no call has completed successfully
    pub min_time: f64,
    pub total_time: f64,
}

type StatsCell = Arc<Mutex<FunctionStats>>;

/// Named statistics in registration order.
#[derive(Debug, Default)]
pub struct InstrumentationRegistry {
    entries: Vec<(String, StatsCell)>,
}

impl InstrumentationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh entry, replacing any existing entry of the same name.
    /// Wrappers holding the replaced entry keep updating it, detached.
    fn register(&mut self, name: &str, original: &'static str) -> StatsCell {
        let cell = Arc::new(Mutex::new(FunctionStats::new(original)));
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = cell.clone(),
            None => self.entries.push((name.to_string(), cell.clone())),
        }
        cell
    }

    /// Existing entry for a name, registering one if absent.
    fn entry(&mut self, name: &str, original: &'static str) -> StatsCell {
        match self.entries.iter().find(|(n, _)| n == name) {
            Some((_, cell)) => cell.clone(),
            None => self.register(name, original),
        }
    }

    /// Copy of the statistics for a name.
    pub fn get(&self, name: &str) -> Option<FunctionStats> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, cell)| cell.lock().ok().map(|s| s.clone()))
    }

    pub fn snapshot(&self) -> Vec<FunctionStatsSnapshot> {
        self.entries
            .iter()
            .filter_map(|(name, cell)| {
                let stats = cell.lock().ok()?;
                Some(FunctionStatsSnapshot {
                    name: name.clone(),
                    call_count: stats.call_count,
                    avg_time: stats.avg_time(),
                    max_time: stats.max_time,
                    min_time: if stats.min_time.is_finite() {
                        stats.min_time
                    } else {
                        0.0
                    },
                    total_time: stats.total_time,
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Timing hooks shared by every wrapper form.
struct Probe {
    name: String,
    cell: StatsCell,
    clock: Arc<dyn Clock>,
    spans: Option<Arc<dyn SpanRecorder>>,
}

impl Probe {
    fn mark_name(&self) -> String {
        format!("fn:{}", self.name)
    }

    fn begin(&self) -> f64 {
        let start = self.clock.now();
        if let Some(spans) = &self.spans {
            if let Err(err) = spans.mark(&format!("{}:start", self.mark_name())) {
                tracing::trace!(target: "tick::instrument", name = %self.name, error = %err, "start mark failed");
            }
        }
        start
    }

    fn finish_ok(&self, start: f64) {
        let mark = self.mark_name();
        let start_mark = format!("{}:start", mark);
        let end_mark = format!("{}:end", mark);

        if let Some(spans) = &self.spans {
            let recorded = spans
                .mark(&end_mark)
                .and_then(|_| spans.measure(&mark, &start_mark, &end_mark));
            if let Err(err) = recorded {
                tracing::trace!(target: "tick::instrument", name = %self.name, error = %err, "measure failed");
            }
        }

        let duration = self.clock.now() - start;
        if let Ok(mut stats) = self.cell.lock() {
            stats.call_count += 1;
            stats.total_time += duration;
            stats.max_time = stats.max_time.max(duration);
            stats.min_time = stats.min_time.min(duration);
        }

        if let Some(spans) = &self.spans {
            // Cleanup failures are harmless
            let _ = spans.clear_marks(&start_mark);
            let _ = spans.clear_marks(&end_mark);
            let _ = spans.clear_measures(&mark);
        }
    }

    fn finish_err(&self, start: f64) {
        let duration = self.clock.now() - start;
        if let Ok(mut stats) = self.cell.lock() {
            stats.call_count += 1;
            stats.total_time += duration;
        }
        if let Some(spans) = &self.spans {
            let _ = spans.clear_marks(&format!("{}:start", self.mark_name()));
        }
        tracing::trace!(target: "tick::instrument", name = %self.name, duration, "instrumented call failed");
    }

    /// Run `f`, charging its time whether it returns or panics.
    fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let start = self.begin();
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(result) => {
                self.finish_ok(start);
                result
            }
            Err(payload) => {
                self.finish_err(start);
                panic::resume_unwind(payload)
            }
        }
    }

    /// Like [`Probe::run`], also treating `Err` as a failed call.
    fn run_fallible<T, E>(&self, f: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        let start = self.begin();
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(value)) => {
                self.finish_ok(start);
                Ok(value)
            }
            Ok(Err(err)) => {
                self.finish_err(start);
                Err(err)
            }
            Err(payload) => {
                self.finish_err(start);
                panic::resume_unwind(payload)
            }
        }
    }
}

/// A callable that may be instrumented.
///
/// When instrumentation was disabled at wrap time there is no probe and
/// every call goes straight to the inner callable.
pub struct Instrumented<F> {
    inner: F,
    probe: Option<Probe>,
}

impl<F> Instrumented<F> {
    /// Invoke the inner callable through `invoke`, timing the whole call.
    /// Works for any arity: `wrapped.run(|f| f(a, b))`.
    pub fn run<R>(&self, invoke: impl FnOnce(&F) -> R) -> R {
        match &self.probe {
            Some(probe) => probe.run(|| invoke(&self.inner)),
            None => invoke(&self.inner),
        }
    }

    /// Call a single-argument callable. Panics are charged and resumed.
    pub fn call<A, R>(&self, args: A) -> R
    where
        F: Fn(A) -> R,
    {
        self.run(|f| f(args))
    }

    /// Call a fallible single-argument callable. An `Err` is charged as a
    /// failed call and returned unchanged.
    pub fn try_call<A, T, E>(&self, args: A) -> Result<T, E>
    where
        F: Fn(A) -> Result<T, E>,
    {
        match &self.probe {
            Some(probe) => probe.run_fallible(|| (self.inner)(args)),
            None => (self.inner)(args),
        }
    }

    /// Whether calls are being timed.
    pub fn is_instrumented(&self) -> bool {
        self.probe.is_some()
    }

    /// Registry name, when instrumented.
    pub fn name(&self) -> Option<&str> {
        self.probe.as_ref().map(|p| p.name.as_str())
    }

    /// Unwrap the original callable.
    pub fn into_inner(self) -> F {
        self.inner
    }

    /// Convert into a plain closure with the same signature as the original.
    pub fn into_fn<A, R>(self) -> impl Fn(A) -> R
    where
        F: Fn(A) -> R,
    {
        move |args| self.call(args)
    }
}

impl<F> std::fmt::Debug for Instrumented<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instrumented")
            .field("name", &self.name())
            .finish()
    }
}

/// Types that publish the methods instrumentation should time.
pub trait InstrumentMethods {
    /// Method names, used as the suffix of each registry name.
    const METHODS: &'static [&'static str];
}

/// An object whose listed methods are timed under `prefix.method`.
pub struct InstrumentedObject<T> {
    target: T,
    probes: HashMap<&'static str, Probe>,
}

impl<T> InstrumentedObject<T> {
    /// Run a method. Methods that were not instrumented run untimed.
    pub fn invoke<R>(&self, method: &str, f: impl FnOnce(&T) -> R) -> R {
        match self.probes.get(method) {
            Some(probe) => probe.run(|| f(&self.target)),
            None => f(&self.target),
        }
    }

    /// Run a method that needs mutable access.
    pub fn invoke_mut<R>(&mut self, method: &str, f: impl FnOnce(&mut T) -> R) -> R {
        let target = &mut self.target;
        match self.probes.get(method) {
            Some(probe) => probe.run(|| f(target)),
            None => f(target),
        }
    }

    /// Names being timed.
    pub fn instrumented_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.probes.values().map(|p| p.name.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn into_inner(self) -> T {
        self.target
    }
}

/// Records a call on drop, like an instrumented function body.
pub struct ScopeTimer {
    probe: Probe,
    start: f64,
}

impl Drop for ScopeTimer {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.probe.finish_err(self.start);
        } else {
            self.probe.finish_ok(self.start);
        }
    }
}

/// Time the rest of the enclosing scope under a name.
///
/// ```rust
/// # use std::sync::Arc;
/// # use tick::{instrument_scope, Instrumenter, sim::ManualClock};
/// let instrumenter = Instrumenter::new(Arc::new(ManualClock::new(0.0)), None);
/// instrumenter.set_enabled(true);
/// {
///     instrument_scope!(instrumenter, "layout");
/// }
/// assert_eq!(instrumenter.stats()[0].name, "layout");
/// ```
#[macro_export]
macro_rules! instrument_scope {
    ($instrumenter:expr, $name:expr) => {
        let _scope = $instrumenter.scope($name);
    };
}

/// Hands out instrumented wrappers sharing one registry.
#[derive(Clone)]
pub struct Instrumenter {
    registry: Arc<Mutex<InstrumentationRegistry>>,
    enabled: Arc<AtomicBool>,
    clock: Arc<dyn Clock>,
    spans: Option<Arc<dyn SpanRecorder>>,
}

impl Instrumenter {
    /// Create a disabled instrumenter.
    pub fn new(clock: Arc<dyn Clock>, spans: Option<Arc<dyn SpanRecorder>>) -> Self {
        Self {
            registry: Arc::new(Mutex::new(InstrumentationRegistry::new())),
            enabled: Arc::new(AtomicBool::new(false)),
            clock,
            spans,
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn probe(&self, name: String, cell: StatsCell) -> Probe {
        Probe {
            name,
            cell,
            clock: self.clock.clone(),
            spans: self.spans.clone(),
        }
    }

    fn register(&self, name: &str, original: &'static str) -> Option<StatsCell> {
        match self.registry.lock() {
            Ok(mut registry) => Some(registry.register(name, original)),
            Err(_) => {
                tracing::debug!(target: "tick::instrument", name, "registry poisoned, not instrumenting");
                None
            }
        }
    }

    /// Wrap a callable. When disabled the callable is returned untouched and
    /// nothing is registered.
    pub fn instrument<F>(&self, f: F, name: &str) -> Instrumented<F> {
        if !self.is_enabled() {
            return Instrumented {
                inner: f,
                probe: None,
            };
        }
        let probe = self
            .register(name, std::any::type_name::<F>())
            .map(|cell| self.probe(name.to_string(), cell));
        tracing::trace!(target: "tick::instrument", name, "function instrumented");
        Instrumented { inner: f, probe }
    }

    /// Wrap every method `T` publishes, named `prefix.method`. A method
    /// named `new` is treated as the constructor and skipped.
    pub fn instrument_object<T: InstrumentMethods>(&self, target: T, prefix: &str) -> InstrumentedObject<T> {
        let mut probes = HashMap::new();
        if self.is_enabled() {
            for method in T::METHODS.iter().copied().filter(|m| *m != "new") {
                let name = if prefix.is_empty() {
                    method.to_string()
                } else {
                    format!("{}.{}", prefix, method)
                };
                if let Some(cell) = self.register(&name, std::any::type_name::<T>()) {
                    probes.insert(method, self.probe(name, cell));
                }
            }
        }
        InstrumentedObject { target, probes }
    }

    /// Time the caller's scope. Reuses an existing entry for the name.
    /// Returns `None` when disabled.
    pub fn scope(&self, name: &str) -> Option<ScopeTimer> {
        if !self.is_enabled() {
            return None;
        }
        let cell = self.registry.lock().ok()?.entry(name, "scope");
        let probe = self.probe(name.to_string(), cell);
        let start = probe.begin();
        Some(ScopeTimer { probe, start })
    }

    /// Statistics for every registered name, in registration order.
    pub fn stats(&self) -> Vec<FunctionStatsSnapshot> {
        self.registry
            .lock()
            .map(|r| r.snapshot())
            .unwrap_or_default()
    }

    /// Statistics for one name.
    pub fn get(&self, name: &str) -> Option<FunctionStats> {
        self.registry.lock().ok()?.get(name)
    }

    /// Forget every registered name.
    pub fn clear(&self) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.clear();
        }
    }
}

impl std::fmt::Debug for Instrumenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instrumenter")
            .field("enabled", &self.is_enabled())
            .field("registered", &self.registry.lock().map(|r| r.len()).unwrap_or(0))
            .finish()
    }
}
