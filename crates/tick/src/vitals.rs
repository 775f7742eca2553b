//! Page-load quality metrics from the host's observation streams.

use serde::{Deserialize, Serialize};

use crate::config::{LcpPolicy, TickConfig};
use crate::entry::{
    EntryKind, PerformanceEntry, SubscriptionId, FIRST_CONTENTFUL_PAINT, FIRST_PAINT,
};
use crate::host::{NavigationTiming, ObservationSource};
use crate::tbt::TbtAggregator;

/// Snapshot of the page-load metrics, all in milliseconds except `cls`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebVitals {
    /// First contentful paint
    pub fcp: Option<f64>,
    /// Largest contentful paint (provisional until the page settles)
    pub lcp: Option<f64>,
    /// First input delay
    pub fid: Option<f64>,
    /// Cumulative layout shift (unitless)
    pub cls: f64,
    /// Total blocking time
    pub tbt: f64,
    /// Time to interactive (navigation-timing estimate)
    pub tti: Option<f64>,
    /// First meaningful paint (approximated by first paint)
    pub fmp: Option<f64>,
}

impl Default for WebVitals {
    fn default() -> Self {
        Self {
            fcp: None,
            lcp: None,
            fid: None,
            cls: 0.0,
            tbt: 0.0,
            tti: None,
            fmp: None,
        }
    }
}

/// Estimate time to interactive from navigation timing.
pub fn estimate_tti(timing: &NavigationTiming) -> Option<f64> {
    match *timing {
        NavigationTiming::Legacy {
            navigation_start,
            dom_interactive,
            dom_content_loaded_event_end,
        } => {
            let interactive = dom_interactive - navigation_start;
            let content_loaded = dom_content_loaded_event_end - navigation_start;
            if interactive > 0.0 {
                Some(interactive)
            } else if content_loaded > 0.0 {
                Some(content_loaded)
            } else {
                None
            }
        }
        NavigationTiming::Entry {
            dom_interactive,
            dom_content_loaded_event_end,
        } => {
            if dom_interactive > 0.0 {
                Some(dom_interactive)
            } else {
                Some(dom_content_loaded_event_end)
            }
        }
    }
}

/// Active subscription ids, one per stream.
#[derive(Debug, Clone, Copy, Default)]
struct Subscriptions {
    paint: Option<SubscriptionId>,
    lcp: Option<SubscriptionId>,
    layout_shift: Option<SubscriptionId>,
    first_input: Option<SubscriptionId>,
    long_task: Option<SubscriptionId>,
}

impl Subscriptions {
    fn slot(&mut self, kind: EntryKind) -> &mut Option<SubscriptionId> {
        match kind {
            EntryKind::Paint => &mut self.paint,
            EntryKind::LargestContentfulPaint => &mut self.lcp,
            EntryKind::LayoutShift => &mut self.layout_shift,
            EntryKind::FirstInput => &mut self.first_input,
            EntryKind::LongTask => &mut self.long_task,
        }
    }

    fn any(&self) -> bool {
        [
            self.paint,
            self.lcp,
            self.layout_shift,
            self.first_input,
            self.long_task,
        ]
        .iter()
        .any(Option::is_some)
    }

    fn kind_of(&self, id: SubscriptionId) -> Option<EntryKind> {
        [
            (self.paint, EntryKind::Paint),
            (self.lcp, EntryKind::LargestContentfulPaint),
            (self.layout_shift, EntryKind::LayoutShift),
            (self.first_input, EntryKind::FirstInput),
            (self.long_task, EntryKind::LongTask),
        ]
        .into_iter()
        .find(|(sub, _)| *sub == Some(id))
        .map(|(_, kind)| kind)
    }
}

const STREAMS: [EntryKind; 5] = [
    EntryKind::Paint,
    EntryKind::LargestContentfulPaint,
    EntryKind::LayoutShift,
    EntryKind::FirstInput,
    EntryKind::LongTask,
];

/// Maintains [`WebVitals`] from observation batches.
#[derive(Debug)]
pub struct VitalsCollector {
    vitals: WebVitals,
    subscriptions: Subscriptions,
    tbt: TbtAggregator,
    lcp_policy: LcpPolicy,
    lcp_frozen: bool,
    first_render: Option<f64>,
}

impl VitalsCollector {
    /// Create a collector, seeding paint metrics from buffered entries and
    /// time to interactive from navigation timing.
    pub fn new(
        config: &TickConfig,
        buffered_paints: &[PerformanceEntry],
        navigation: Option<&NavigationTiming>,
    ) -> Self {
        let tbt = if config.offload_tbt {
            TbtAggregator::offloaded(config.long_task_threshold_ms)
        } else {
            TbtAggregator::inline(config.long_task_threshold_ms)
        };

        let mut collector = Self {
            vitals: WebVitals::default(),
            subscriptions: Subscriptions::default(),
            tbt,
            lcp_policy: config.lcp_policy,
            lcp_frozen: false,
            first_render: None,
        };

        for entry in buffered_paints {
            if let PerformanceEntry::Paint { name, start_time } = entry {
                match name.as_str() {
                    FIRST_CONTENTFUL_PAINT => collector.vitals.fcp = Some(*start_time),
                    FIRST_PAINT => collector.vitals.fmp = Some(*start_time),
                    _ => {}
                }
            }
        }

        collector.vitals.tti = navigation.and_then(estimate_tti);
        collector
    }

    /// Subscribe to every stream the host supports. Unsupported streams are
    /// skipped and their metric stays unset.
    pub fn connect(&mut self, source: &mut dyn ObservationSource) {
        for kind in STREAMS {
            if self.subscriptions.slot(kind).is_some() {
                continue;
            }
            match source.observe(kind) {
                Ok(id) => *self.subscriptions.slot(kind) = Some(id),
                Err(err) => {
                    tracing::debug!(target: "tick::vitals", stream = %kind, error = %err, "observer unavailable");
                }
            }
        }
    }

    /// Disconnect every active subscription. Safe to call repeatedly.
    pub fn disconnect(&mut self, source: &mut dyn ObservationSource) {
        for kind in STREAMS {
            if let Some(id) = self.subscriptions.slot(kind).take() {
                source.disconnect(id);
            }
        }
    }

    /// Stream an active subscription belongs to.
    pub fn stream_for(&self, id: SubscriptionId) -> Option<EntryKind> {
        self.subscriptions.kind_of(id)
    }

    /// Whether any subscription remains active.
    pub fn is_connected(&self) -> bool {
        self.subscriptions.any()
    }

    /// Apply one batch. Batches on unknown or disconnected subscriptions are
    /// dropped. Returns the stream the batch was applied to.
    pub fn handle_batch(
        &mut self,
        subscription: SubscriptionId,
        entries: &[PerformanceEntry],
        source: Option<&mut dyn ObservationSource>,
    ) -> Option<EntryKind> {
        let Some(kind) = self.stream_for(subscription) else {
            tracing::trace!(target: "tick::vitals", subscription = subscription.0, "batch for inactive subscription dropped");
            return None;
        };

        match kind {
            EntryKind::Paint => self.apply_paints(entries),
            EntryKind::LargestContentfulPaint => self.apply_lcp(entries),
            EntryKind::LayoutShift => self.apply_layout_shifts(entries),
            EntryKind::FirstInput => {
                if self.apply_first_input(entries) {
                    if let Some(id) = self.subscriptions.first_input.take() {
                        if let Some(source) = source {
                            source.disconnect(id);
                        }
                    }
                }
            }
            EntryKind::LongTask => self.apply_long_tasks(entries),
        }
        Some(kind)
    }

    fn apply_paints(&mut self, entries: &[PerformanceEntry]) {
        for entry in entries {
            if let PerformanceEntry::Paint { name, start_time } = entry {
                match name.as_str() {
                    FIRST_CONTENTFUL_PAINT => {
                        if self.first_render.is_none() {
                            self.first_render = Some(*start_time);
                        }
                        if self.vitals.fcp.is_none() {
                            self.vitals.fcp = Some(*start_time);
                        }
                    }
                    FIRST_PAINT if self.vitals.fmp.is_none() => {
                        self.vitals.fmp = Some(*start_time);
                    }
                    _ => {}
                }
            }
        }
    }

    fn apply_lcp(&mut self, entries: &[PerformanceEntry]) {
        if self.lcp_frozen {
            return;
        }
        // Candidates arrive in increasing size order; the last one is the largest.
        let last = entries.iter().rev().find_map(|entry| match entry {
            PerformanceEntry::LargestContentfulPaint {
                render_time,
                load_time,
                ..
            } => Some(render_time.or(*load_time)),
            _ => None,
        });
        if let Some(Some(time)) = last {
            self.vitals.lcp = Some(time);
            tracing::trace!(target: "tick::vitals", lcp = time, "lcp candidate");
        }
    }

    fn apply_layout_shifts(&mut self, entries: &[PerformanceEntry]) {
        for entry in entries {
            if let PerformanceEntry::LayoutShift {
                value,
                had_recent_input,
                ..
            } = entry
            {
                if !had_recent_input && *value > 0.0 {
                    self.vitals.cls += value;
                }
            }
        }
    }

    /// Returns true once a delay has been recorded.
    fn apply_first_input(&mut self, entries: &[PerformanceEntry]) -> bool {
        if self.vitals.fid.is_some() {
            return true;
        }
        for entry in entries {
            if let PerformanceEntry::FirstInput {
                start_time,
                processing_start: Some(processing_start),
            } = entry
            {
                self.vitals.fid = Some(processing_start - start_time);
                if self.lcp_policy == LcpPolicy::FreezeOnInteraction {
                    self.freeze_lcp();
                }
                tracing::debug!(target: "tick::vitals", fid = processing_start - start_time, "first input recorded");
                return true;
            }
        }
        false
    }

    fn apply_long_tasks(&mut self, entries: &[PerformanceEntry]) {
        for entry in entries {
            if let PerformanceEntry::LongTask { duration, .. } = entry {
                self.tbt.record(*duration);
            }
        }
        self.vitals.tbt = self.tbt.total();
    }

    /// Stop further LCP updates.
    pub fn freeze_lcp(&mut self) {
        self.lcp_frozen = true;
    }

    /// Called when the page becomes hidden.
    pub fn on_visibility_hidden(&mut self) {
        if self.lcp_policy == LcpPolicy::FreezeOnInteraction {
            self.freeze_lcp();
        }
    }

    /// Collect outstanding worker results without blocking.
    pub fn poll(&mut self) {
        self.vitals.tbt = self.tbt.poll();
    }

    /// Wait for outstanding worker results.
    pub fn settle(&mut self) {
        self.vitals.tbt = self.tbt.settle();
    }

    /// Stop the blocking-time worker.
    pub fn shutdown(&mut self) {
        self.tbt.shutdown();
        self.vitals.tbt = self.tbt.total();
    }

    /// First contentful paint as seen by the live paint stream.
    pub fn first_render(&self) -> Option<f64> {
        self.first_render
    }

    pub fn vitals(&self) -> &WebVitals {
        &self.vitals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::ManualObservers;

    fn connected(config: &TickConfig) -> (VitalsCollector, ManualObservers) {
        let mut observers = ManualObservers::all();
        let mut collector = VitalsCollector::new(config, &[], None);
        collector.connect(&mut observers);
        (collector, observers)
    }

    fn deliver(
        collector: &mut VitalsCollector,
        observers: &mut ManualObservers,
        kind: EntryKind,
        entries: Vec<PerformanceEntry>,
    ) {
        let id = observers.subscription(kind).unwrap_or(SubscriptionId(u64::MAX));
        collector.handle_batch(id, &entries, Some(observers as &mut dyn ObservationSource));
    }

    fn shift(value: f64, had_recent_input: bool) -> PerformanceEntry {
        PerformanceEntry::LayoutShift {
            start_time: 1.0,
            value,
            had_recent_input,
        }
    }

    fn lcp(render_time: Option<f64>, load_time: Option<f64>) -> PerformanceEntry {
        PerformanceEntry::LargestContentfulPaint {
            start_time: 1.0,
            render_time,
            load_time,
        }
    }

    #[test]
    fn test_cls_accumulates() {
        let (mut c, mut o) = connected(&TickConfig::default());
        deliver(
            &mut c,
            &mut o,
            EntryKind::LayoutShift,
            vec![shift(0.05, false), shift(0.02, false), shift(0.01, false)],
        );
        assert!((c.vitals().cls - 0.08).abs() < 1e-9);

        deliver(&mut c, &mut o, EntryKind::LayoutShift, vec![shift(0.5, true)]);
        assert!((c.vitals().cls - 0.08).abs() < 1e-9);
    }

    #[test]
    fn test_fid_recorded_once() {
        let (mut c, mut o) = connected(&TickConfig::default());
        let input = |start, processing| PerformanceEntry::FirstInput {
            start_time: start,
            processing_start: Some(processing),
        };

        let fid_sub = o.subscription(EntryKind::FirstInput).unwrap();
        deliver(&mut c, &mut o, EntryKind::FirstInput, vec![input(100.0, 130.0)]);
        assert_eq!(c.vitals().fid, Some(30.0));
        assert!(o.subscription(EntryKind::FirstInput).is_none());

        // Late delivery on the old id is ignored
        let applied = c.handle_batch(fid_sub, &[input(200.0, 400.0)], None);
        assert_eq!(applied, None);
        assert_eq!(c.vitals().fid, Some(30.0));
    }

    #[test]
    fn test_fid_requires_processing_start() {
        let (mut c, mut o) = connected(&TickConfig::default());
        deliver(
            &mut c,
            &mut o,
            EntryKind::FirstInput,
            vec![PerformanceEntry::FirstInput {
                start_time: 100.0,
                processing_start: None,
            }],
        );
        assert_eq!(c.vitals().fid, None);
        assert!(o.subscription(EntryKind::FirstInput).is_some());
    }

    #[test]
    fn test_tbt_from_long_tasks() {
        let (mut c, mut o) = connected(&TickConfig::default());
        let task = |duration| PerformanceEntry::LongTask {
            start_time: 0.0,
            duration,
        };

        deliver(&mut c, &mut o, EntryKind::LongTask, vec![task(80.0)]);
        assert_eq!(c.vitals().tbt, 30.0);

        deliver(&mut c, &mut o, EntryKind::LongTask, vec![task(80.0), task(45.0)]);
        assert_eq!(c.vitals().tbt, 60.0);
    }

    #[test]
    fn test_tbt_offloaded() {
        let config = TickConfig::default().with_offload_tbt(true);
        let (mut c, mut o) = connected(&config);
        let task = |duration| PerformanceEntry::LongTask {
            start_time: 0.0,
            duration,
        };

        deliver(&mut c, &mut o, EntryKind::LongTask, vec![task(80.0), task(80.0)]);
        c.settle();
        assert_eq!(c.vitals().tbt, 60.0);
    }

    #[test]
    fn test_lcp_last_entry_wins() {
        let (mut c, mut o) = connected(&TickConfig::default());
        deliver(
            &mut c,
            &mut o,
            EntryKind::LargestContentfulPaint,
            vec![lcp(Some(500.0), None), lcp(Some(900.0), None)],
        );
        assert_eq!(c.vitals().lcp, Some(900.0));

        deliver(&mut c, &mut o, EntryKind::LargestContentfulPaint, vec![lcp(None, Some(1200.0))]);
        assert_eq!(c.vitals().lcp, Some(1200.0));

        deliver(&mut c, &mut o, EntryKind::LargestContentfulPaint, vec![lcp(None, None)]);
        assert_eq!(c.vitals().lcp, Some(1200.0));
    }

    #[test]
    fn test_lcp_frozen_on_interaction() {
        let config = TickConfig::default().with_lcp_policy(LcpPolicy::FreezeOnInteraction);
        let (mut c, mut o) = connected(&config);

        deliver(&mut c, &mut o, EntryKind::LargestContentfulPaint, vec![lcp(Some(700.0), None)]);
        deliver(
            &mut c,
            &mut o,
            EntryKind::FirstInput,
            vec![PerformanceEntry::FirstInput {
                start_time: 800.0,
                processing_start: Some(810.0),
            }],
        );
        deliver(&mut c, &mut o, EntryKind::LargestContentfulPaint, vec![lcp(Some(1500.0), None)]);
        assert_eq!(c.vitals().lcp, Some(700.0));
    }

    #[test]
    fn test_paint_first_occurrence_wins() {
        let buffered = vec![PerformanceEntry::Paint {
            name: FIRST_PAINT.to_string(),
            start_time: 90.0,
        }];
        let mut o = ManualObservers::all();
        let mut c = VitalsCollector::new(&TickConfig::default(), &buffered, None);
        c.connect(&mut o);
        assert_eq!(c.vitals().fmp, Some(90.0));

        let paint = |name: &str, t| PerformanceEntry::Paint {
            name: name.to_string(),
            start_time: t,
        };
        deliver(
            &mut c,
            &mut o,
            EntryKind::Paint,
            vec![
                paint(FIRST_PAINT, 95.0),
                paint(FIRST_CONTENTFUL_PAINT, 120.0),
                paint(FIRST_CONTENTFUL_PAINT, 150.0),
            ],
        );
        assert_eq!(c.vitals().fmp, Some(90.0));
        assert_eq!(c.vitals().fcp, Some(120.0));
        assert_eq!(c.first_render(), Some(120.0));
    }

    #[test]
    fn test_unsupported_streams_stay_unset() {
        let mut o = ManualObservers::supporting(&[EntryKind::LongTask]);
        let mut c = VitalsCollector::new(&TickConfig::default(), &[], None);
        c.connect(&mut o);

        assert_eq!(o.active_count(), 1);
        assert!(c.stream_for(SubscriptionId(1)).is_some());
        assert_eq!(c.vitals(), &WebVitals::default());
    }

    #[test]
    fn test_disconnect_idempotent() {
        let (mut c, mut o) = connected(&TickConfig::default());
        assert!(c.is_connected());
        c.disconnect(&mut o);
        c.disconnect(&mut o);
        assert!(!c.is_connected());
        assert_eq!(o.active_count(), 0);
    }

    #[test]
    fn test_tti_estimates() {
        let legacy = NavigationTiming::Legacy {
            navigation_start: 1000.0,
            dom_interactive: 1800.0,
            dom_content_loaded_event_end: 2000.0,
        };
        assert_eq!(estimate_tti(&legacy), Some(800.0));

        let legacy_no_interactive = NavigationTiming::Legacy {
            navigation_start: 1000.0,
            dom_interactive: 0.0,
            dom_content_loaded_event_end: 2000.0,
        };
        assert_eq!(estimate_tti(&legacy_no_interactive), Some(1000.0));

        let legacy_unset = NavigationTiming::Legacy {
            navigation_start: 1000.0,
            dom_interactive: 0.0,
            dom_content_loaded_event_end: 0.0,
        };
        assert_eq!(estimate_tti(&legacy_unset), None);

        let entry = NavigationTiming::Entry {
            dom_interactive: 0.0,
            dom_content_loaded_event_end: 640.0,
        };
        assert_eq!(estimate_tti(&entry), Some(640.0));
    }
}
