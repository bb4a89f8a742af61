//! Span duration aggregation

use tracelens_core::Trace;

/// Arithmetic mean of `value` over `items`, `None` when empty
pub fn average<T, F>(items: &[T], value: F) -> Option<f64>
where
    F: Fn(&T) -> f64,
{
    if items.is_empty() {
        return None;
    }
    let sum: f64 = items.iter().map(value).sum();
    Some(sum / items.len() as f64)
}

/// Mean duration (µs) of the spans that report a positive duration
///
/// `None` means no span had a usable duration, which is not the same as zero.
pub fn average_span_duration(trace: &Trace) -> Option<f64> {
    let durations: Vec<u64> = trace
        .spans
        .iter()
        .filter_map(|s| s.duration)
        .filter(|d| *d > 0)
        .collect();
    average(&durations, |d| *d as f64)
}
