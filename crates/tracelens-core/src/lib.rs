//! tracelens core - trace model, telemetry stats and configuration
//!
//! This crate provides the foundational types shared by the comparison engine
//! and the command line:
//!
//! - **Traces**: Jaeger-shaped traces and spans, with proxy span helpers
//! - **Stats**: backend response-time statistics, lookup keys and queries
//! - **Matrix**: fixed-shape heat-map grids with a "no data" sentinel
//! - **Format**: human-readable durations and deltas
//! - **Config**: TOML configuration discovery and validation

pub mod config;
pub mod format;
pub mod matrix;
pub mod stats;
pub mod trace;

// Re-export commonly used types
pub use config::{ConfigError, ConfigLoader, TracelensConfig};
pub use matrix::Matrix;
pub use stats::{MetricsStats, MetricsStatsQuery, Stat, StatsLookup};
pub use trace::{Direction, Span, SpanTarget, SpanType, Trace, TraceLoadError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
