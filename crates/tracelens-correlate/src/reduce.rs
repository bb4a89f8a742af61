//! Metrics stats reduction
//!
//! Folds the backend response-time statistics of every proxy span of a trace
//! into one heat-map matrix: one row per recognized statistic, one column per
//! interval. Spans without statistics don't fail the reduction; they only
//! clear the completeness flag.

use serde::Serialize;
use std::collections::BTreeMap;
use tracelens_core::stats::{stat_row, stats_key_for_span};
use tracelens_core::{Matrix, MetricsStats, Span, StatsLookup, Trace};
use tracing::debug;

/// Statistics found for one interval of a span
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalStats<'a> {
    pub interval_index: usize,
    pub stats: &'a MetricsStats,
}

/// Result of [`reduce_metrics_stats`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReducedStats {
    pub matrix: Matrix,

    /// False when at least one proxy span had no statistics at all
    pub is_complete: bool,
}

/// Statistics available for a span, per interval
pub fn span_stats<'a>(
    span: &Span,
    intervals: &[String],
    all_stats: &'a StatsLookup,
) -> Vec<IntervalStats<'a>> {
    intervals
        .iter()
        .enumerate()
        .filter_map(|(interval_index, interval)| {
            let key = stats_key_for_span(span, interval)?;
            all_stats.get(&key).map(|stats| IntervalStats {
                interval_index,
                stats,
            })
        })
        .collect()
}

/// Mean of each statistic over the proxy spans of a trace, per interval
///
/// A trace without proxy spans yields an empty matrix that is complete.
pub fn reduce_metrics_stats(
    trace: &Trace,
    intervals: &[String],
    all_stats: &StatsLookup,
) -> ReducedStats {
    let mut is_complete = true;
    let mut groups: BTreeMap<(&str, usize), Vec<f64>> = BTreeMap::new();

    for span in trace.spans.iter().filter(|s| s.is_proxy()) {
        let found = span_stats(span, intervals, all_stats);
        if found.is_empty() {
            debug!(
                trace_id = %trace.trace_id,
                span_id = %span.span_id,
                operation = %span.operation_name,
                "No metrics stats for proxy span"
            );
            is_complete = false;
            continue;
        }
        for interval_stats in found {
            for stat in &interval_stats.stats.response_times {
                groups
                    .entry((stat.name.as_str(), interval_stats.interval_index))
                    .or_default()
                    .push(stat.value);
            }
        }
    }

    let mut matrix = Matrix::for_stats(intervals);
    for ((name, interval_index), values) in groups {
        let Some(row) = stat_row(name) else {
            debug!(stat = name, "Ignoring unrecognized statistic");
            continue;
        };
        if values.is_empty() {
            continue;
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        matrix.set(row, interval_index, Some(mean));
    }

    ReducedStats {
        matrix,
        is_complete,
    }
}

/// Span duration minus each statistic, in milliseconds
///
/// Positive cells mean the span was slower than the statistic. `None` when the
/// span has no usable duration.
pub fn compare_span_with_stats(
    span: &Span,
    intervals: &[String],
    all_stats: &StatsLookup,
) -> Option<Matrix> {
    let duration_ms = span.duration.filter(|d| *d > 0)? as f64 / 1000.0;
    let mut matrix = Matrix::for_stats(intervals);
    for interval_stats in span_stats(span, intervals, all_stats) {
        for stat in &interval_stats.stats.response_times {
            if let Some(row) = stat_row(&stat.name) {
                matrix.set(
                    row,
                    interval_stats.interval_index,
                    Some(duration_ms - stat.value),
                );
            }
        }
    }
    Some(matrix)
}
