//! Trace similarity classification
//!
//! Two traces are compared on two signatures:
//!
//! - how close their span counts are
//! - how close the occurrence counts of their dominant operations are,
//!   looking at the dominant operations of each trace in turn
//!
//! Each signature yields a distance in `[0, 1]`; the mean of the three
//! distances is the similarity score. Lower is more similar.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use tracelens_core::config::{
    SimilaritySettings, DEFAULT_SIMILARITY_THRESHOLD, DEFAULT_TOP_OPERATIONS,
};
use tracelens_core::Trace;
use tracing::trace;

/// Score below which two traces are similar
pub const SIMILARITY_THRESHOLD: f64 = DEFAULT_SIMILARITY_THRESHOLD;

/// Number of dominant operations compared per trace
pub const TOP_OPERATIONS: usize = DEFAULT_TOP_OPERATIONS;

/// How far apart two counts are, normalized to `[0, 1]`
pub fn distance_score(n1: usize, n2: usize) -> f64 {
    n1.abs_diff(n2) as f64 / n1.max(n2).max(1) as f64
}

/// Occurrences of one operation in each of the two compared traces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationOccurrence {
    pub first: usize,
    pub second: usize,
}

/// Operation name -> occurrence counts, for one pair of traces
#[derive(Debug, Default)]
pub struct OperationOccurrenceCounter<'a> {
    counts: BTreeMap<&'a str, OperationOccurrence>,
}

impl<'a> OperationOccurrenceCounter<'a> {
    pub fn new(first: &'a Trace, second: &'a Trace) -> Self {
        let mut counts: BTreeMap<&'a str, OperationOccurrence> = BTreeMap::new();
        for span in &first.spans {
            counts.entry(span.operation_name.as_str()).or_default().first += 1;
        }
        for span in &second.spans {
            counts.entry(span.operation_name.as_str()).or_default().second += 1;
        }
        Self { counts }
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn get(&self, operation: &str) -> Option<OperationOccurrence> {
        self.counts.get(operation).copied()
    }

    /// Mean distance over the `top` most frequent operations, ranked by `rank`
    ///
    /// Ties keep operation-name order.
    fn dominant_score<F>(&self, top: usize, rank: F) -> f64
    where
        F: Fn(&OperationOccurrence) -> usize,
    {
        let mut entries: Vec<&OperationOccurrence> = self.counts.values().collect();
        entries.sort_by_key(|o| Reverse(rank(*o)));

        let total = top.min(entries.len());
        if total == 0 {
            return 0.0;
        }
        let sum: f64 = entries
            .iter()
            .take(total)
            .map(|o| distance_score(o.first, o.second))
            .sum();
        sum / total as f64
    }

    /// Score over the dominant operations of the first trace
    pub fn first_dominant_score(&self, top: usize) -> f64 {
        self.dominant_score(top, |o| o.first)
    }

    /// Score over the dominant operations of the second trace
    pub fn second_dominant_score(&self, top: usize) -> f64 {
        self.dominant_score(top, |o| o.second)
    }
}

/// Similarity tunables
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityConfig {
    pub threshold: f64,
    pub top_operations: usize,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            threshold: SIMILARITY_THRESHOLD,
            top_operations: TOP_OPERATIONS,
        }
    }
}

impl From<&SimilaritySettings> for SimilarityConfig {
    fn from(settings: &SimilaritySettings) -> Self {
        Self {
            threshold: settings.threshold,
            top_operations: settings.top_operations.max(1),
        }
    }
}

impl SimilarityConfig {
    /// Similarity score, `None` when either trace has no spans
    pub fn score(&self, a: &Trace, b: &Trace) -> Option<f64> {
        if a.is_degenerate() || b.is_degenerate() {
            return None;
        }
        let span_count_score = distance_score(a.span_count(), b.span_count());
        let counter = OperationOccurrenceCounter::new(a, b);
        let first = counter.first_dominant_score(self.top_operations);
        let second = counter.second_dominant_score(self.top_operations);
        // (first + second) commutes exactly, so the score is symmetric
        let total = (span_count_score + (first + second)) / 3.0;
        trace!(
            a = %a.trace_id,
            b = %b.trace_id,
            span_count_score,
            first,
            second,
            total,
            "Trace similarity score"
        );
        Some(total)
    }

    pub fn is_similar(&self, a: &Trace, b: &Trace) -> bool {
        self.score(a, b).is_some_and(|s| s < self.threshold)
    }
}

/// Similarity score with the default tunables
pub fn similarity_score(a: &Trace, b: &Trace) -> Option<f64> {
    SimilarityConfig::default().score(a, b)
}

/// Whether two traces are similar, with the default tunables
pub fn is_similar_trace(a: &Trace, b: &Trace) -> bool {
    SimilarityConfig::default().is_similar(a, b)
}

/// Candidates similar to `focal`, excluding `focal` itself, in input order
pub fn find_similar_traces<'a>(
    focal: &Trace,
    candidates: &'a [Trace],
    config: &SimilarityConfig,
) -> Vec<&'a Trace> {
    candidates
        .iter()
        .filter(|t| t.trace_id != focal.trace_id && config.is_similar(t, focal))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracelens_core::Span;

    fn trace_with_ops(id: &str, ops: &[&str]) -> Trace {
        ops.iter()
            .fold(Trace::new(id), |t, op| t.with_span(Span::new(*op)))
    }

    #[test]
    fn test_distance_score() {
        assert_eq!(distance_score(0, 0), 0.0);
        assert_eq!(distance_score(7, 7), 0.0);
        assert_eq!(distance_score(0, 1), 1.0);
        assert_eq!(distance_score(2, 4), 0.5);
        assert_eq!(distance_score(4, 2), 0.5);
    }

    #[test]
    fn test_counter() {
        let a = trace_with_ops("a", &["x", "x", "y"]);
        let b = trace_with_ops("b", &["x", "z"]);
        let counter = OperationOccurrenceCounter::new(&a, &b);
        assert_eq!(counter.len(), 3);
        assert_eq!(
            counter.get("x"),
            Some(OperationOccurrence { first: 2, second: 1 })
        );
        assert_eq!(
            counter.get("z"),
            Some(OperationOccurrence { first: 0, second: 1 })
        );
        assert_eq!(counter.get("w"), None);
    }

    #[test]
    fn test_dominant_scores_rank_independently() {
        // a is dominated by x, b by z
        let a = trace_with_ops("a", &["x", "x", "x", "y"]);
        let b = trace_with_ops("b", &["z", "z", "z", "y"]);
        let counter = OperationOccurrenceCounter::new(&a, &b);
        // top 1 of a: x (3 vs 0) -> 1.0; top 1 of b: z (0 vs 3) -> 1.0
        assert_eq!(counter.first_dominant_score(1), 1.0);
        assert_eq!(counter.second_dominant_score(1), 1.0);
        // top 2 adds y (1 vs 1) -> 0.0
        assert_eq!(counter.first_dominant_score(2), 0.5);
    }

    #[test]
    fn test_identical_shape_scores_zero() {
        let a = trace_with_ops("a", &["x", "y", "y", "z"]);
        let b = trace_with_ops("b", &["y", "z", "x", "y"]);
        assert_eq!(similarity_score(&a, &b), Some(0.0));
        assert!(is_similar_trace(&a, &b));
        assert!(is_similar_trace(&a, &a));
    }

    #[test]
    fn test_degenerate_traces_never_similar() {
        let empty = Trace::new("empty");
        let a = trace_with_ops("a", &["x"]);
        assert_eq!(similarity_score(&empty, &a), None);
        assert!(!is_similar_trace(&empty, &a));
        assert!(!is_similar_trace(&a, &empty));
        assert!(!is_similar_trace(&empty, &empty));
    }

    #[test]
    fn test_different_operations_not_similar() {
        let a = trace_with_ops("a", &["x", "y"]);
        let b = trace_with_ops("b", &["p", "q", "r"]);
        let score = similarity_score(&a, &b).unwrap();
        assert!(score > SIMILARITY_THRESHOLD);
        assert!(!is_similar_trace(&a, &b));
    }

    #[test]
    fn test_empty_operation_names_participate() {
        let a = trace_with_ops("a", &["", ""]);
        let b = trace_with_ops("b", &["", ""]);
        assert!(is_similar_trace(&a, &b));
    }

    #[test]
    fn test_threshold_is_exclusive() {
        // span count 1 vs 2 -> 0.5; op x 1 vs 2 -> 0.5 both sides
        let a = trace_with_ops("a", &["x"]);
        let b = trace_with_ops("b", &["x", "x"]);
        let score = similarity_score(&a, &b).unwrap();
        assert_eq!(score, 0.5);

        let at_threshold = SimilarityConfig {
            threshold: 0.5,
            ..Default::default()
        };
        assert!(!at_threshold.is_similar(&a, &b));
        let above = SimilarityConfig {
            threshold: 0.51,
            ..Default::default()
        };
        assert!(above.is_similar(&a, &b));
    }

    #[test]
    fn test_find_similar_excludes_focal() {
        let focal = trace_with_ops("focal", &["x", "y"]);
        let candidates = vec![
            trace_with_ops("focal", &["x", "y"]),
            trace_with_ops("twin", &["y", "x"]),
            trace_with_ops("other", &["p", "q", "r", "s"]),
            Trace::new("empty"),
        ];
        let similar = find_similar_traces(&focal, &candidates, &SimilarityConfig::default());
        let ids: Vec<&str> = similar.iter().map(|t| t.trace_id.as_str()).collect();
        assert_eq!(ids, vec!["twin"]);
    }

    #[test]
    fn test_config_from_settings() {
        let settings = SimilaritySettings {
            threshold: 0.1,
            top_operations: 0,
            max_similar_listed: 3,
        };
        let config = SimilarityConfig::from(&settings);
        assert_eq!(config.threshold, 0.1);
        assert_eq!(config.top_operations, 1);
    }
}
