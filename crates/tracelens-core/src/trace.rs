//! Trace and span model
//!
//! Mirrors the shape the Jaeger query API returns, enriched with the fields the
//! dashboard attaches on top (`type` on spans, `duration` on traces). All
//! durations and timestamps are in microseconds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Errors raised while decoding trace documents
#[derive(Debug, Error)]
pub enum TraceLoadError {
    #[error("Failed to parse trace JSON: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Trace document contains no traces")]
    Empty,
}

/// Origin of a span
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SpanType {
    /// Emitted by an Envoy sidecar proxy
    Envoy,
    /// Emitted by an HTTP instrumentation library
    Http,
    /// Emitted by a TCP instrumentation library
    Tcp,
    #[default]
    Unknown,
}

impl SpanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanType::Envoy => "envoy",
            SpanType::Http => "http",
            SpanType::Tcp => "tcp",
            SpanType::Unknown => "unknown",
        }
    }
}

impl From<String> for SpanType {
    fn from(value: String) -> Self {
        match value.to_lowercase().as_str() {
            "envoy" => SpanType::Envoy,
            "http" => SpanType::Http,
            "tcp" => SpanType::Tcp,
            _ => SpanType::Unknown,
        }
    }
}

impl From<SpanType> for String {
    fn from(value: SpanType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for SpanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Traffic direction of a proxy span, relative to the workload owning the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workload a proxy span was emitted for
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpanTarget {
    pub namespace: String,
    pub workload: String,
}

/// A Jaeger key/value tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,

    /// Jaeger value type (string, bool, int64, ...)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,

    pub value: serde_json::Value,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value_type: Some("string".to_string()),
            value: serde_json::Value::String(value.into()),
        }
    }
}

/// Reference from a span to another span of the same trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanReference {
    /// CHILD_OF or FOLLOWS_FROM
    #[serde(rename = "refType")]
    pub ref_type: String,

    #[serde(rename = "traceID", default)]
    pub trace_id: String,

    #[serde(rename = "spanID")]
    pub span_id: String,
}

/// Process table entry of a trace
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Process {
    #[serde(rename = "serviceName")]
    pub service_name: String,

    #[serde(default)]
    pub tags: Vec<KeyValue>,
}

/// One timed unit of work within a trace
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    /// Span ID
    #[serde(rename = "spanID", default)]
    pub span_id: String,

    /// Operation name
    #[serde(default)]
    pub operation_name: String,

    /// Start time (µs since epoch)
    #[serde(
        default,
        deserialize_with = "lenient_micros",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_time: Option<u64>,

    /// Duration in µs; absent or zero means unknown
    #[serde(
        default,
        deserialize_with = "lenient_micros",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration: Option<u64>,

    /// Originating proxy or library
    #[serde(rename = "type", default)]
    pub span_type: SpanType,

    /// Tags
    #[serde(default)]
    pub tags: Vec<KeyValue>,

    /// Key into the trace's process table
    #[serde(rename = "processID", default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<String>,

    /// Parent references
    #[serde(default)]
    pub references: Vec<SpanReference>,
}

impl Span {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    pub fn with_duration(mut self, duration: u64) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_start_time(mut self, start_time: u64) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn with_type(mut self, span_type: SpanType) -> Self {
        self.span_type = span_type;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(KeyValue::new(key, value));
        self
    }

    /// Look up a string tag
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|kv| kv.key == key)
            .and_then(|kv| kv.value.as_str())
    }

    /// Whether this span was emitted by a sidecar proxy
    ///
    /// Spans without an explicit type fall back to the `component` tag that
    /// Envoy sets on every span it reports.
    pub fn is_proxy(&self) -> bool {
        match self.span_type {
            SpanType::Envoy => true,
            SpanType::Unknown => self.tag("component") == Some("proxy"),
            _ => false,
        }
    }

    /// Workload the proxy belongs to, parsed from the Envoy `node_id` tag
    ///
    /// Format: `sidecar~<ip>~<pod>.<namespace>~<namespace>.svc.cluster.local`
    pub fn target(&self) -> Option<SpanTarget> {
        let node_id = self.tag("node_id")?;
        let pod_and_ns = node_id.split('~').nth(2)?;
        let (pod, namespace) = pod_and_ns.split_once('.')?;
        if pod.is_empty() || namespace.is_empty() {
            return None;
        }
        Some(SpanTarget {
            namespace: namespace.to_string(),
            workload: workload_from_pod(pod),
        })
    }

    /// Direction from the `upstream_cluster` tag (`inbound|9080||...`)
    pub fn direction(&self) -> Option<Direction> {
        let cluster = self.tag("upstream_cluster")?;
        if cluster.starts_with("inbound") {
            Some(Direction::Inbound)
        } else if cluster.starts_with("outbound") {
            Some(Direction::Outbound)
        } else {
            None
        }
    }

    fn end_time(&self) -> Option<u64> {
        Some(self.start_time? + self.duration?)
    }
}

/// Strip the replica-set hash and pod suffix from a pod name
fn workload_from_pod(pod: &str) -> String {
    let parts: Vec<&str> = pod.split('-').collect();
    if parts.len() > 2 {
        parts[..parts.len() - 2].join("-")
    } else {
        pod.to_string()
    }
}

/// A recorded end-to-end request execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    /// Unique trace ID
    #[serde(rename = "traceID")]
    pub trace_id: String,

    /// Total wall-clock duration in µs
    #[serde(
        default,
        deserialize_with = "lenient_micros",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration: Option<u64>,

    /// All spans, in no particular order
    #[serde(default)]
    pub spans: Vec<Span>,

    /// Process table
    #[serde(default)]
    pub processes: HashMap<String, Process>,
}

impl Trace {
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            ..Default::default()
        }
    }

    pub fn with_duration(mut self, duration: u64) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.spans.push(span);
        self
    }

    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    /// A trace without spans can't be compared with anything
    pub fn is_degenerate(&self) -> bool {
        self.spans.is_empty()
    }

    /// Stored duration, or the extent covered by the spans
    pub fn full_duration(&self) -> Option<u64> {
        if self.duration.is_some() {
            return self.duration;
        }
        let start = self.spans.iter().filter_map(|s| s.start_time).min()?;
        let end = self.spans.iter().filter_map(Span::end_time).max()?;
        end.checked_sub(start)
    }

    /// First 7 characters of the trace ID
    pub fn short_id(&self) -> &str {
        match self.trace_id.char_indices().nth(7) {
            Some((idx, _)) => &self.trace_id[..idx],
            None => &self.trace_id,
        }
    }

    pub fn root_span(&self) -> Option<&Span> {
        self.spans.iter().find(|s| s.references.is_empty())
    }

    /// `<service>: <operation>` of the root span
    pub fn name(&self) -> Option<String> {
        let root = self.root_span()?;
        let service = root
            .process_id
            .as_ref()
            .and_then(|id| self.processes.get(id))
            .map(|p| p.service_name.as_str());
        Some(match service {
            Some(service) => format!("{}: {}", service, root.operation_name),
            None => root.operation_name.clone(),
        })
    }

    /// Start of the earliest span
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        let micros = self.spans.iter().filter_map(|s| s.start_time).min()?;
        DateTime::from_timestamp_micros(i64::try_from(micros).ok()?)
    }
}

/// Microsecond field decoder: negative, non-numeric and null values read as
/// unknown instead of failing the whole document
fn lenient_micros<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(micros_from_value))
}

fn micros_from_value(value: &serde_json::Value) -> Option<u64> {
    let serde_json::Value::Number(number) = value else {
        return None;
    };
    number.as_u64().or_else(|| {
        number
            .as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| f.round() as u64)
    })
}

#[derive(Deserialize)]
struct Envelope {
    data: Vec<Trace>,
}

/// Decode a JSON document holding a trace, a list of traces, or a Jaeger
/// API response (`{"data": [...]}`)
///
/// The document shape is picked first so decoding errors name the offending
/// field and position.
pub fn parse_traces(json: &str) -> Result<Vec<Trace>, TraceLoadError> {
    let shape: serde_json::Value = serde_json::from_str(json)?;
    let traces = match &shape {
        serde_json::Value::Object(map) if map.contains_key("data") => {
            serde_json::from_str::<Envelope>(json)?.data
        }
        serde_json::Value::Array(_) => serde_json::from_str::<Vec<Trace>>(json)?,
        _ => vec![serde_json::from_str::<Trace>(json)?],
    };
    if traces.is_empty() {
        return Err(TraceLoadError::Empty);
    }
    Ok(traces)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envoy_span() -> Span {
        Span::new("reviews.bookinfo.svc.cluster.local:9080/*")
            .with_tag(
                "node_id",
                "sidecar~10.244.0.12~reviews-v2-7d79d5bd5d-mpsx2.bookinfo~bookinfo.svc.cluster.local",
            )
            .with_tag(
                "upstream_cluster",
                "inbound|9080||reviews.bookinfo.svc.cluster.local",
            )
            .with_tag("component", "proxy")
    }

    #[test]
    fn test_span_target_from_node_id() {
        let target = envoy_span().target().unwrap();
        assert_eq!(target.namespace, "bookinfo");
        assert_eq!(target.workload, "reviews-v2");
    }

    #[test]
    fn test_span_target_missing_tag() {
        assert!(Span::new("op").target().is_none());
        let bad = Span::new("op").with_tag("node_id", "sidecar~10.0.0.1");
        assert!(bad.target().is_none());
    }

    #[test]
    fn test_span_direction() {
        assert_eq!(envoy_span().direction(), Some(Direction::Inbound));
        let out = Span::new("op").with_tag("upstream_cluster", "outbound|9080||ratings");
        assert_eq!(out.direction(), Some(Direction::Outbound));
        let other = Span::new("op").with_tag("upstream_cluster", "PassthroughCluster");
        assert_eq!(other.direction(), None);
    }

    #[test]
    fn test_is_proxy() {
        assert!(Span::new("a").with_type(SpanType::Envoy).is_proxy());
        assert!(!Span::new("a").with_type(SpanType::Http).is_proxy());
        // Untyped spans fall back to the component tag
        assert!(envoy_span().is_proxy());
        assert!(!Span::new("a").is_proxy());
        assert!(!envoy_span().with_type(SpanType::Tcp).is_proxy());
    }

    #[test]
    fn test_workload_from_short_pod_name() {
        assert_eq!(workload_from_pod("details"), "details");
        assert_eq!(workload_from_pod("a-b"), "a-b");
        assert_eq!(workload_from_pod("a-b-c"), "a");
    }

    #[test]
    fn test_full_duration_fallback() {
        let trace = Trace::new("abc")
            .with_span(Span::new("a").with_start_time(100).with_duration(50))
            .with_span(Span::new("b").with_start_time(120).with_duration(100));
        assert_eq!(trace.full_duration(), Some(120));

        let explicit = trace.clone().with_duration(999);
        assert_eq!(explicit.full_duration(), Some(999));

        assert_eq!(Trace::new("empty").full_duration(), None);
    }

    #[test]
    fn test_short_id() {
        assert_eq!(Trace::new("0123456789abcdef").short_id(), "0123456");
        assert_eq!(Trace::new("abc").short_id(), "abc");
    }

    #[test]
    fn test_parse_jaeger_envelope() {
        let json = r#"{
            "data": [{
                "traceID": "4ef3c2d1a0b9",
                "spans": [{
                    "traceID": "4ef3c2d1a0b9",
                    "spanID": "s1",
                    "operationName": "productpage.bookinfo.svc.cluster.local:9080/productpage",
                    "references": [],
                    "startTime": 1700000000000000,
                    "duration": 4200,
                    "tags": [
                        {"key": "component", "type": "string", "value": "proxy"},
                        {"key": "http.status_code", "type": "string", "value": "200"}
                    ],
                    "processID": "p1"
                }, {
                    "traceID": "4ef3c2d1a0b9",
                    "spanID": "s2",
                    "operationName": "details",
                    "references": [{"refType": "CHILD_OF", "traceID": "4ef3c2d1a0b9", "spanID": "s1"}],
                    "startTime": 1700000000001000,
                    "duration": 800,
                    "tags": [],
                    "processID": "p2",
                    "type": "http"
                }],
                "processes": {
                    "p1": {"serviceName": "productpage.bookinfo", "tags": []},
                    "p2": {"serviceName": "details.bookinfo", "tags": []}
                }
            }],
            "total": 0
        }"#;
        let traces = parse_traces(json).unwrap();
        assert_eq!(traces.len(), 1);
        let trace = &traces[0];
        assert_eq!(trace.span_count(), 2);
        assert!(trace.spans[0].is_proxy());
        assert_eq!(trace.spans[1].span_type, SpanType::Http);
        assert_eq!(trace.full_duration(), Some(4200));
        assert_eq!(
            trace.name().unwrap(),
            "productpage.bookinfo: productpage.bookinfo.svc.cluster.local:9080/productpage"
        );
        assert!(trace.started_at().is_some());
    }

    #[test]
    fn test_parse_single_and_list() {
        let one = r#"{"traceID": "t1", "duration": 25, "spans": [{"operationName": "a", "type": "envoy"}]}"#;
        let traces = parse_traces(one).unwrap();
        assert_eq!(traces[0].duration, Some(25));
        assert_eq!(traces[0].spans[0].span_type, SpanType::Envoy);

        let many = r#"[{"traceID": "t1"}, {"traceID": "t2"}]"#;
        assert_eq!(parse_traces(many).unwrap().len(), 2);
    }

    #[test]
    fn test_parse_out_of_range_durations_as_unknown() {
        let json = r#"[
            {"traceID": "t1", "duration": -30, "spans": [
                {"operationName": "a", "duration": -5, "startTime": -1},
                {"operationName": "b", "duration": 12.6},
                {"operationName": "c", "duration": "20"},
                {"operationName": "d", "duration": null},
                {"operationName": "e", "duration": 7}
            ]},
            {"traceID": "t2", "duration": 25}
        ]"#;
        let traces = parse_traces(json).unwrap();
        assert_eq!(traces.len(), 2);
        let durations: Vec<Option<u64>> = traces[0].spans.iter().map(|s| s.duration).collect();
        assert_eq!(durations, vec![None, Some(13), None, None, Some(7)]);
        assert_eq!(traces[0].spans[0].start_time, None);
        assert_eq!(traces[0].duration, None);
        assert_eq!(traces[1].duration, Some(25));
    }

    #[test]
    fn test_parse_error_names_the_field() {
        let err = parse_traces(r#"{"data": [{"traceID": "t1"}, {"spans": []}]}"#).unwrap_err();
        assert!(err.to_string().contains("traceID"), "{}", err);

        let err = parse_traces(r#"[{"traceID": "t1", "spans": [{"tags": 5}]}]"#).unwrap_err();
        assert!(err.to_string().contains("line 1"), "{}", err);

        assert!(matches!(parse_traces("42"), Err(TraceLoadError::ParseError(_))));
    }

    #[test]
    fn test_parse_empty_document() {
        assert!(matches!(parse_traces("[]"), Err(TraceLoadError::Empty)));
        assert!(matches!(
            parse_traces("not json"),
            Err(TraceLoadError::ParseError(_))
        ));
    }
}
