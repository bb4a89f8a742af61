//! Human-readable formatting of durations and deltas

use chrono::{DateTime, Utc};

const ONE_MILLISECOND: f64 = 1_000.0;
const ONE_SECOND: f64 = 1_000_000.0;

/// Round to a fixed number of decimals
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    let rounded = (value * factor).round() / factor;
    // avoid printing "-0"
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

/// Format a duration given in microseconds: `850μs`, `12.35ms`, `1.2s`
pub fn format_duration(micros: f64) -> String {
    let sign = if micros < 0.0 { "-" } else { "" };
    let abs = micros.abs();
    let (value, unit) = if abs < ONE_MILLISECOND {
        (abs, "μs")
    } else if abs < ONE_SECOND {
        (abs / ONE_MILLISECOND, "ms")
    } else {
        (abs / ONE_SECOND, "s")
    };
    format!("{}{}{}", sign, round_to(value, 2), unit)
}

/// Heat-map cell label: one decimal, explicit `+` on positive values
pub fn format_delta(value: Option<f64>) -> String {
    match value {
        Some(v) => {
            let rounded = round_to(v, 1);
            if rounded > 0.0 {
                format!("+{}", rounded)
            } else {
                format!("{}", rounded)
            }
        }
        None => "n/a".to_string(),
    }
}

/// Relative age of a timestamp, e.g. `5 minutes ago`
pub fn from_now(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - ts).num_seconds();
    if secs < 0 {
        return "in the future".to_string();
    }
    let minutes = secs / 60;
    let hours = minutes / 60;
    let days = hours / 24;
    match secs {
        0..=44 => "a few seconds ago".to_string(),
        45..=89 => "a minute ago".to_string(),
        _ if minutes < 45 => format!("{} minutes ago", minutes.max(2)),
        _ if minutes < 90 => "an hour ago".to_string(),
        _ if hours < 22 => format!("{} hours ago", hours.max(2)),
        _ if hours < 36 => "a day ago".to_string(),
        _ => format!("{} days ago", days.max(2)),
    }
}
