//! Rated metric reports.
//!
//! Each metric is rated against a pair of thresholds in the style of the
//! Lighthouse scoring bands. Reports are returned as lines and, with the
//! `telemetry` feature, also logged.

use serde::Serialize;

use crate::frame::AnimationMetrics;
use crate::vitals::WebVitals;

/// Quality band for a metric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rating {
    Good,
    NeedsImprovement,
    Poor,
}

impl Rating {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rating::Good => "good",
            Rating::NeedsImprovement => "needs-improvement",
            Rating::Poor => "poor",
        }
    }
}

impl std::fmt::Display for Rating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Band boundaries. Values at a boundary fall in the better band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Thresholds {
    pub good: f64,
    pub poor: f64,
    /// Larger values are better (frame rates)
    pub higher_is_better: bool,
}

impl Thresholds {
    pub const fn lower_is_better(good: f64, poor: f64) -> Self {
        Self {
            good,
            poor,
            higher_is_better: false,
        }
    }

    pub const fn higher_is_better(good: f64, poor: f64) -> Self {
        Self {
            good,
            poor,
            higher_is_better: true,
        }
    }

    pub fn rate(&self, value: f64) -> Rating {
        if self.higher_is_better {
            if value >= self.good {
                Rating::Good
            } else if value >= self.poor {
                Rating::NeedsImprovement
            } else {
                Rating::Poor
            }
        } else if value <= self.good {
            Rating::Good
        } else if value <= self.poor {
            Rating::NeedsImprovement
        } else {
            Rating::Poor
        }
    }
}

pub const FCP_THRESHOLDS: Thresholds = Thresholds::lower_is_better(1800.0, 3000.0);
pub const LCP_THRESHOLDS: Thresholds = Thresholds::lower_is_better(2500.0, 4000.0);
pub const FID_THRESHOLDS: Thresholds = Thresholds::lower_is_better(100.0, 300.0);
pub const CLS_THRESHOLDS: Thresholds = Thresholds::lower_is_better(0.1, 0.25);
pub const TBT_THRESHOLDS: Thresholds = Thresholds::lower_is_better(200.0, 600.0);

pub const FPS_THRESHOLDS: Thresholds = Thresholds::higher_is_better(55.0, 30.0);
pub const FRAME_TIME_THRESHOLDS: Thresholds = Thresholds::lower_is_better(20.0, 33.33);
pub const DROPPED_PERCENT_THRESHOLDS: Thresholds = Thresholds::lower_is_better(5.0, 20.0);
/// Applied to `100 - compliance`
pub const COMPLIANCE_SHORTFALL_THRESHOLDS: Thresholds = Thresholds::lower_is_better(5.0, 20.0);
/// Applied to `100 - smoothness`
pub const SMOOTHNESS_SHORTFALL_THRESHOLDS: Thresholds = Thresholds::lower_is_better(10.0, 30.0);
pub const LONG_FRAME_PERCENT_THRESHOLDS: Thresholds = Thresholds::lower_is_better(1.0, 5.0);
pub const MEMORY_PERCENT_THRESHOLDS: Thresholds = Thresholds::lower_is_better(50.0, 80.0);

/// One line of a report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportLine {
    pub label: &'static str,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<Rating>,
}

impl ReportLine {
    fn rated(label: &'static str, value: String, rating: Rating) -> Self {
        Self {
            label,
            value,
            rating: Some(rating),
        }
    }
}

impl std::fmt::Display for ReportLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.label, self.value)?;
        if let Some(rating) = self.rating {
            write!(f, " ({})", rating)?;
        }
        Ok(())
    }
}

/// Rated lines for the page-load metrics that have values.
pub fn vitals_report(vitals: &WebVitals) -> Vec<ReportLine> {
    let mut lines = Vec::new();

    if let Some(fcp) = vitals.fcp {
        lines.push(ReportLine::rated("FCP", format!("{:.0}ms", fcp), FCP_THRESHOLDS.rate(fcp)));
    }
    if let Some(lcp) = vitals.lcp {
        lines.push(ReportLine::rated("LCP", format!("{:.0}ms", lcp), LCP_THRESHOLDS.rate(lcp)));
    }
    if let Some(fid) = vitals.fid {
        lines.push(ReportLine::rated("FID", format!("{:.2}ms", fid), FID_THRESHOLDS.rate(fid)));
    }
    lines.push(ReportLine::rated(
        "CLS",
        format!("{:.3}", vitals.cls),
        CLS_THRESHOLDS.rate(vitals.cls),
    ));
    if vitals.tbt > 0.0 {
        lines.push(ReportLine::rated(
            "TBT",
            format!("{:.0}ms", vitals.tbt),
            TBT_THRESHOLDS.rate(vitals.tbt),
        ));
    }

    lines
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Rated lines for the animation metrics.
pub fn animation_report(m: &AnimationMetrics, long_frame_threshold_ms: f64) -> Vec<ReportLine> {
    let mut lines = vec![
        ReportLine::rated(
            "FPS",
            format!(
                "{} ({} current, {}-{} range)",
                m.avg_fps,
                m.fps,
                finite_or_zero(m.min_fps),
                m.max_fps
            ),
            FPS_THRESHOLDS.rate(m.avg_fps),
        ),
        ReportLine::rated(
            "Frame Time",
            format!(
                "{:.2}ms ({:.2}-{:.2}ms)",
                m.avg_frame_time,
                finite_or_zero(m.min_frame_time),
                m.max_frame_time
            ),
            FRAME_TIME_THRESHOLDS.rate(m.avg_frame_time),
        ),
    ];

    let dropped = m.dropped_frame_percent();
    lines.push(ReportLine::rated(
        "Dropped Frames",
        format!("{} ({:.1}%)", m.dropped_frames, dropped),
        DROPPED_PERCENT_THRESHOLDS.rate(dropped),
    ));
    lines.push(ReportLine::rated(
        "Budget Compliance",
        format!("{:.1}%", m.frame_budget_compliance),
        COMPLIANCE_SHORTFALL_THRESHOLDS.rate(100.0 - m.frame_budget_compliance),
    ));
    lines.push(ReportLine::rated(
        "Smoothness",
        format!("{:.1}/100", m.smoothness_score),
        SMOOTHNESS_SHORTFALL_THRESHOLDS.rate(100.0 - m.smoothness_score),
    ));

    if m.long_frames > 0 {
        let long = m.long_frame_percent();
        lines.push(ReportLine::rated(
            "Long Frames",
            format!("{} ({:.1}%, >{}ms)", m.long_frames, long, long_frame_threshold_ms),
            LONG_FRAME_PERCENT_THRESHOLDS.rate(long),
        ));
    }

    if let (Some(used), Some(total), Some(percent)) = (m.memory_used, m.memory_total, m.memory_percent()) {
        lines.push(ReportLine::rated(
            "Memory",
            format!("{:.1}MB / {:.1}MB ({:.1}%)", used, total, percent),
            MEMORY_PERCENT_THRESHOLDS.rate(percent),
        ));
    }

    lines.push(ReportLine {
        label: "Total Frames Tracked",
        value: m.total_frames.to_string(),
        rating: None,
    });

    lines
}

/// Log report lines under a target.
#[cfg(feature = "telemetry")]
pub fn emit(target: &'static str, lines: &[ReportLine]) {
    // tracing needs a literal target, so dispatch on the known ones
    for line in lines {
        let rating = line.rating.map(|r| r.as_str()).unwrap_or("");
        match target {
            "tick::vitals" => tracing::info!(target: "tick::vitals", label = line.label, rating, "{}", line),
            _ => tracing::info!(target: "tick::frame", label = line.label, rating, "{}", line),
        }
    }
}

#[cfg(not(feature = "telemetry"))]
pub fn emit(_target: &'static str, _lines: &[ReportLine]) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lower_is_better() {
        assert_eq!(FCP_THRESHOLDS.rate(1800.0), Rating::Good);
        assert_eq!(FCP_THRESHOLDS.rate(2000.0), Rating::NeedsImprovement);
        assert_eq!(FCP_THRESHOLDS.rate(3001.0), Rating::Poor);
    }

    #[test]
    fn test_higher_is_better() {
        assert_eq!(FPS_THRESHOLDS.rate(60.0), Rating::Good);
        assert_eq!(FPS_THRESHOLDS.rate(45.0), Rating::NeedsImprovement);
        assert_eq!(FPS_THRESHOLDS.rate(20.0), Rating::Poor);
    }

    #[test]
    fn test_rating_serializes_kebab_case() {
        let json = serde_json::to_string(&Rating::NeedsImprovement).unwrap();
        assert_eq!(json, "\"needs-improvement\"");
    }

    #[test]
    fn test_vitals_report_skips_unset() {
        let vitals = WebVitals {
            lcp: Some(2600.0),
            cls: 0.05,
            ..WebVitals::default()
        };
        let lines = vitals_report(&vitals);
        let labels: Vec<&str> = lines.iter().map(|l| l.label).collect();
        assert_eq!(labels, vec!["LCP", "CLS"]);
        assert_eq!(lines[0].to_string(), "LCP 2600ms (needs-improvement)");
        assert_eq!(lines[1].to_string(), "CLS 0.050 (good)");
    }

    #[test]
    fn test_vitals_report_includes_tbt() {
        let vitals = WebVitals {
            tbt: 700.0,
            ..WebVitals::default()
        };
        let lines = vitals_report(&vitals);
        assert_eq!(lines.last().map(|l| l.label), Some("TBT"));
        assert_eq!(lines.last().and_then(|l| l.rating), Some(Rating::Poor));
    }

    #[test]
    fn test_animation_report_initial() {
        let lines = animation_report(&AnimationMetrics::default(), 50.0);
        let labels: Vec<&str> = lines.iter().map(|l| l.label).collect();
        assert_eq!(
            labels,
            vec!["FPS", "Frame Time", "Dropped Frames", "Budget Compliance", "Smoothness", "Total Frames Tracked"]
        );
        assert_eq!(lines[1].value, "0.00ms (0.00-0.00ms)");
    }

    #[test]
    fn test_animation_report_optional_lines() {
        let metrics = AnimationMetrics {
            total_frames: 100,
            long_frames: 3,
            memory_used: Some(60.0),
            memory_total: Some(100.0),
            ..AnimationMetrics::default()
        };
        let lines = animation_report(&metrics, 50.0);

        let long = lines.iter().find(|l| l.label == "Long Frames").unwrap();
        assert_eq!(long.value, "3 (3.0%, >50ms)");
        assert_eq!(long.rating, Some(Rating::NeedsImprovement));

        let memory = lines.iter().find(|l| l.label == "Memory").unwrap();
        assert_eq!(memory.value, "60.0MB / 100.0MB (60.0%)");
        assert_eq!(memory.rating, Some(Rating::NeedsImprovement));
    }
}
