//! Total blocking time aggregation, optionally on a worker thread.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

/// Blocking time contributed by a set of long tasks.
pub fn total_blocking_time(durations: &[f64], threshold_ms: f64) -> f64 {
    durations
        .iter()
        .filter(|d| **d > threshold_ms)
        .map(|d| d - threshold_ms)
        .sum()
}

/// Keeps a running total on its own thread. Each request is one new long
/// task duration; each result is the total so far.
struct Worker {
    requests: Option<Sender<f64>>,
    results: Receiver<f64>,
    handle: Option<JoinHandle<()>>,
    pending: usize,
}

impl Worker {
    fn spawn(threshold_ms: f64) -> std::io::Result<Self> {
        let (request_tx, request_rx) = mpsc::channel::<f64>();
        let (result_tx, result_rx) = mpsc::channel::<f64>();

        let handle = std::thread::Builder::new()
            .name("tick-tbt".to_string())
            .spawn(move || {
                let mut total = 0.0;
                for duration in request_rx {
                    total += total_blocking_time(&[duration], threshold_ms);
                    if result_tx.send(total).is_err() {
                        break;
                    }
                }
            })?;

        Ok(Self {
            requests: Some(request_tx),
            results: result_rx,
            handle: Some(handle),
            pending: 0,
        })
    }

    fn shutdown(&mut self) {
        self.requests.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::debug!(target: "tick::vitals", "tbt worker panicked");
            }
        }
    }
}

/// Accumulates long-task durations into total blocking time.
///
/// In inline mode the total is updated immediately. In worker mode each
/// duration is posted to a dedicated thread and the total is updated when
/// results are collected; results apply last-write-wins.
pub struct TbtAggregator {
    threshold_ms: f64,
    blocking_times: Vec<f64>,
    total: f64,
    worker: Option<Worker>,
}

impl TbtAggregator {
    /// Aggregator computing on the calling thread.
    pub fn inline(threshold_ms: f64) -> Self {
        Self {
            threshold_ms,
            blocking_times: Vec::new(),
            total: 0.0,
            worker: None,
        }
    }

    /// Aggregator computing on a worker thread, falling back to inline if
    /// the thread cannot be spawned.
    pub fn offloaded(threshold_ms: f64) -> Self {
        let mut aggregator = Self::inline(threshold_ms);
        match Worker::spawn(threshold_ms) {
            Ok(worker) => aggregator.worker = Some(worker),
            Err(err) => {
                tracing::debug!(target: "tick::vitals", error = %err, "tbt worker unavailable, computing inline");
            }
        }
        aggregator
    }

    pub fn is_offloaded(&self) -> bool {
        self.worker.is_some()
    }

    /// Record one long task.
    pub fn record(&mut self, duration: f64) {
        if duration <= self.threshold_ms {
            return;
        }
        self.blocking_times.push(duration - self.threshold_ms);

        if let Some(worker) = self.worker.as_mut() {
            let sent = worker
                .requests
                .as_ref()
                .map(|tx| tx.send(duration).is_ok())
                .unwrap_or(false);
            if sent {
                worker.pending += 1;
                return;
            }
            tracing::debug!(target: "tick::vitals", "tbt worker gone, computing inline");
            self.worker = None;
        }
        self.total = self.blocking_times.iter().sum();
    }

    /// Apply any results the worker has posted, without blocking.
    pub fn poll(&mut self) -> f64 {
        if let Some(worker) = self.worker.as_mut() {
            while let Ok(tbt) = worker.results.try_recv() {
                worker.pending = worker.pending.saturating_sub(1);
                self.total = tbt;
            }
        }
        self.total
    }

    /// Wait for every outstanding worker result.
    pub fn settle(&mut self) -> f64 {
        let mut lost = false;
        if let Some(worker) = self.worker.as_mut() {
            while worker.pending > 0 {
                match worker.results.recv() {
                    Ok(tbt) => {
                        worker.pending -= 1;
                        self.total = tbt;
                    }
                    Err(_) => {
                        lost = true;
                        break;
                    }
                }
            }
        }
        if lost {
            tracing::debug!(target: "tick::vitals", "tbt worker exited early, computing inline");
            self.worker = None;
            self.total = self.blocking_times.iter().sum();
        }
        self.total
    }

    /// Latest known total.
    pub fn total(&self) -> f64 {
        self.total
    }

    /// Blocking time of each long task seen so far.
    pub fn blocking_times(&self) -> &[f64] {
        &self.blocking_times
    }

    /// Stop the worker, keeping the last known total.
    pub fn shutdown(&mut self) {
        self.settle();
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
        }
    }
}

impl Drop for TbtAggregator {
    fn drop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
        }
    }
}

impl std::fmt::Debug for TbtAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TbtAggregator")
            .field("threshold_ms", &self.threshold_ms)
            .field("long_tasks", &self.blocking_times.len())
            .field("total", &self.total)
            .field("offloaded", &self.is_offloaded())
            .finish()
    }
}
