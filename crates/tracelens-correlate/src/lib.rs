//! Trace correlation and comparison
//!
//! Relates a focal trace to the traces around it and to backend telemetry:
//!
//! - **Duration**: mean span duration of a trace
//! - **Similarity**: structural similarity between two traces
//! - **Reduce**: per-interval aggregation of backend response-time stats
//! - **Comparison**: heat-map deltas against similar and all traces
//!
//! Every operation is a pure function of its inputs.

pub mod comparison;
pub mod duration;
pub mod reduce;
pub mod similarity;

pub use comparison::{
    build_comparison, compared_durations, ComparisonConfig, DurationComparison, SimilarTrace,
    TraceComparison,
};
pub use duration::{average, average_span_duration};
pub use reduce::{compare_span_with_stats, reduce_metrics_stats, span_stats, ReducedStats};
pub use similarity::{
    distance_score, find_similar_traces, is_similar_trace, similarity_score, SimilarityConfig,
};
pub use tracelens_core::{Matrix, Span, Trace};
