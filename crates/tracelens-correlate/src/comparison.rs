//! Comparison of a focal trace with the traces around it
//!
//! Produces the 2x2 heat-map matrix of signed millisecond deltas:
//!
//! |              | Full duration | Spans average |
//! |--------------|---------------|---------------|
//! | Similar      | focal - mean  | focal - mean  |
//! | All          | focal - mean  | focal - mean  |
//!
//! plus the list of similar traces and a Jaeger comparison link.

use crate::duration::{average, average_span_duration};
use crate::similarity::{find_similar_traces, SimilarityConfig};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracelens_core::format::{format_duration, round_to};
use tracelens_core::{Matrix, Trace, TracelensConfig};
use tracing::debug;

pub const SIMILAR_ROW: usize = 0;
pub const ALL_ROW: usize = 1;
pub const FULL_DURATION_COLUMN: usize = 0;
pub const SPANS_AVERAGE_COLUMN: usize = 1;

/// Similar traces added to a Jaeger comparison link
const MAX_COHORT: usize = 10;

/// Comparison settings
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonConfig {
    pub similarity: SimilarityConfig,

    /// Similar traces listed in the result
    pub max_similar_listed: usize,

    /// Jaeger UI base URL, enables the comparison link
    pub jaeger_url: Option<String>,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            similarity: SimilarityConfig::default(),
            max_similar_listed: 10,
            jaeger_url: None,
        }
    }
}

impl From<&TracelensConfig> for ComparisonConfig {
    fn from(config: &TracelensConfig) -> Self {
        Self {
            similarity: SimilarityConfig::from(&config.similarity),
            max_similar_listed: config.similarity.max_similar_listed,
            jaeger_url: config.jaeger.url.clone(),
        }
    }
}

/// How one duration compares with another
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "micros", rename_all = "snake_case")]
pub enum DurationComparison {
    /// First is faster by this many µs
    Faster(f64),
    /// First is slower by this many µs
    Slower(f64),
    Unavailable,
}

impl DurationComparison {
    /// `<d1_desc> is <delta> faster|slower than <d2_desc>`
    pub fn describe(&self, d1_desc: &str, d2_desc: &str) -> String {
        match self {
            DurationComparison::Faster(d) => format!(
                "{} is {} faster than {}",
                d1_desc,
                format_duration(*d),
                d2_desc
            ),
            DurationComparison::Slower(d) => format!(
                "{} is {} slower than {}",
                d1_desc,
                format_duration(*d),
                d2_desc
            ),
            DurationComparison::Unavailable => "n/a".to_string(),
        }
    }
}

impl fmt::Display for DurationComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DurationComparison::Faster(d) => write!(f, "-{}", format_duration(*d)),
            DurationComparison::Slower(d) => write!(f, "+{}", format_duration(*d)),
            DurationComparison::Unavailable => f.write_str("n/a"),
        }
    }
}

/// Compare `d1` against `d2` (both in µs)
pub fn compared_durations(d1: Option<f64>, d2: Option<f64>) -> DurationComparison {
    match (d1, d2) {
        (Some(d1), Some(d2)) => {
            let diff = d2 - d1;
            if diff >= 0.0 {
                DurationComparison::Faster(diff.abs())
            } else {
                DurationComparison::Slower(diff.abs())
            }
        }
        _ => DurationComparison::Unavailable,
    }
}

/// A similar trace, as listed next to the focal one
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarTrace {
    pub trace_id: String,
    pub short_id: String,
    pub name: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub full_duration: Option<u64>,

    /// Focal trace compared with this one
    pub comparison: DurationComparison,
}

/// Everything computed for one focal trace
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceComparison {
    pub trace_id: String,
    pub short_id: String,
    pub full_duration: Option<u64>,
    pub average_span_duration: Option<f64>,

    /// Rows: similar, all. Columns: full duration, spans average. Values in ms.
    pub matrix: Matrix,

    /// Number of similar traces found
    pub similar_count: usize,

    /// First similar traces, in input order
    pub similar: Vec<SimilarTrace>,

    pub comparison_url: Option<String>,
}

impl TraceComparison {
    /// Tooltip for a matrix cell, `None` when the cell has no data
    pub fn describe_cell(&self, row: usize, column: usize) -> Option<String> {
        let value = self.matrix.get(row, column)?;
        let slow_or_fast = if value > 0.0 { "slower" } else { "faster" };
        let other_or_similar = if row == SIMILAR_ROW { "similar" } else { "other" };
        Some(format!(
            "{} is {}ms {} than the {} traces displayed",
            self.short_id,
            round_to(value.abs(), 2),
            slow_or_fast,
            other_or_similar
        ))
    }
}

fn delta_ms(focal: Option<f64>, group_mean: Option<f64>) -> Option<f64> {
    Some((focal? - group_mean?) / 1000.0)
}

/// Mean full duration of the traces that have one
fn mean_full_duration(traces: &[&Trace]) -> Option<f64> {
    let durations: Vec<u64> = traces.iter().filter_map(|t| t.full_duration()).collect();
    average(&durations, |d| *d as f64)
}

/// Mean of the per-trace average span durations
fn mean_average_span_duration(traces: &[&Trace]) -> Option<f64> {
    let averages: Vec<f64> = traces
        .iter()
        .filter_map(|t| average_span_duration(t))
        .collect();
    average(&averages, |d| *d)
}

/// Jaeger UI link comparing the focal trace with its similar traces
pub fn comparison_url(base_url: &str, focal: &Trace, similar: &[&Trace]) -> Option<String> {
    let first = similar.first()?;
    let base = base_url.trim_end_matches('/');
    let cohort: String = similar
        .iter()
        .take(MAX_COHORT)
        .map(|t| format!("&cohort={}", t.trace_id))
        .collect();
    Some(format!(
        "{}/trace/{}...{}?cohort={}{}",
        base, focal.trace_id, first.trace_id, focal.trace_id, cohort
    ))
}

/// Compare `focal` with the similar traces and with all `others`
///
/// `others` is the population on screen; it may contain the focal trace
/// itself, which then counts towards the "All" row but never as similar.
pub fn build_comparison(
    focal: &Trace,
    others: &[Trace],
    config: &ComparisonConfig,
) -> TraceComparison {
    let similar = find_similar_traces(focal, others, &config.similarity);
    let all: Vec<&Trace> = others.iter().collect();

    let focal_duration = focal.full_duration();
    let focal_average = average_span_duration(focal);

    let mut matrix = Matrix::new(
        vec!["Similar".to_string(), "All".to_string()],
        vec!["Full duration".to_string(), "Spans average".to_string()],
    );
    for (row, group) in [(SIMILAR_ROW, &similar), (ALL_ROW, &all)] {
        matrix.set(
            row,
            FULL_DURATION_COLUMN,
            delta_ms(focal_duration.map(|d| d as f64), mean_full_duration(group)),
        );
        matrix.set(
            row,
            SPANS_AVERAGE_COLUMN,
            delta_ms(focal_average, mean_average_span_duration(group)),
        );
    }

    let comparison_url = config
        .jaeger_url
        .as_deref()
        .and_then(|base| comparison_url(base, focal, &similar));

    let listed = similar
        .iter()
        .take(config.max_similar_listed)
        .map(|t| SimilarTrace {
            trace_id: t.trace_id.clone(),
            short_id: t.short_id().to_string(),
            name: t.name(),
            started_at: t.started_at(),
            full_duration: t.full_duration(),
            comparison: compared_durations(
                focal_duration.map(|d| d as f64),
                t.full_duration().map(|d| d as f64),
            ),
        })
        .collect();

    debug!(
        trace_id = %focal.trace_id,
        others = others.len(),
        similar = similar.len(),
        "Built trace comparison"
    );

    TraceComparison {
        trace_id: focal.trace_id.clone(),
        short_id: focal.short_id().to_string(),
        full_duration: focal_duration,
        average_span_duration: focal_average,
        matrix,
        similar_count: similar.len(),
        similar: listed,
        comparison_url,
    }
}
