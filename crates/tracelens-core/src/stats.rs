//! Backend telemetry statistics
//!
//! Response-time statistics are fetched externally per (workload, direction,
//! interval) and handed to the engine as a read-only [`StatsLookup`]. This
//! module defines the lookup key and the queries a fetcher needs to fill it.

use crate::trace::{Direction, Span, SpanTarget};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Quantiles requested by default
pub const STATS_QUANTILES: [&str; 3] = ["0.5", "0.9", "0.99"];

/// Recognized statistic names, in matrix row order
pub const STATS_AVG_WITH_QUANTILES: [&str; 4] = ["avg", "0.5", "0.9", "0.99"];

/// A single named statistic (value in milliseconds)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stat {
    pub name: String,
    pub value: f64,
}

impl Stat {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Statistics for one workload/direction/interval
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsStats {
    pub response_times: Vec<Stat>,
}

impl MetricsStats {
    pub fn new(response_times: Vec<Stat>) -> Self {
        Self { response_times }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.response_times
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.value)
    }
}

/// Pre-fetched statistics keyed by [`stats_key`]
pub type StatsLookup = HashMap<String, MetricsStats>;

/// Row index of a statistic name, if recognized
pub fn stat_row(name: &str) -> Option<usize> {
    STATS_AVG_WITH_QUANTILES.iter().position(|s| *s == name)
}

/// Lookup key: `<namespace>:<workload>:<direction>:<interval>`
pub fn stats_key(target: &SpanTarget, direction: Direction, interval: &str) -> String {
    format!(
        "{}:{}:{}:{}",
        target.namespace, target.workload, direction, interval
    )
}

/// Lookup key for a proxy span, when its workload and direction are known
pub fn stats_key_for_span(span: &Span, interval: &str) -> Option<String> {
    let target = span.target()?;
    let direction = span.direction()?;
    Some(stats_key(&target, direction, interval))
}

/// What to fetch for one workload/direction/interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsStatsQuery {
    pub target: SpanTarget,
    pub direction: Direction,
    pub interval: String,
    pub quantiles: Vec<String>,
    pub avg: bool,
}

impl MetricsStatsQuery {
    /// Key the fetched result must be stored under
    pub fn key(&self) -> String {
        stats_key(&self.target, self.direction, &self.interval)
    }
}

/// Queries covering every proxy span of a trace, de-duplicated, in span order
pub fn build_stats_queries(
    spans: &[Span],
    intervals: &[String],
    quantiles: &[String],
) -> Vec<MetricsStatsQuery> {
    let mut seen = HashSet::new();
    let mut queries = Vec::new();

    for span in spans.iter().filter(|s| s.is_proxy()) {
        let (Some(target), Some(direction)) = (span.target(), span.direction()) else {
            debug!(
                span_id = %span.span_id,
                operation = %span.operation_name,
                "Proxy span without workload or direction, no stats query"
            );
            continue;
        };
        for interval in intervals {
            let query = MetricsStatsQuery {
                target: target.clone(),
                direction,
                interval: interval.clone(),
                quantiles: quantiles.to_vec(),
                avg: true,
            };
            if seen.insert(query.key()) {
                queries.push(query);
            }
        }
    }

    queries
}
