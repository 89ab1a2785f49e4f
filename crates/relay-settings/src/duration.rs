//! Human-readable duration strings: `"90s"`, `"1h"`, `"2 days"`, `"1h 30m"`,
//! `"1.5h"`.
//!
//! Units and compound forms come from [`humantime`]. On top of that a bare
//! number is read as milliseconds, a single fractional quantity is scaled
//! from its unit, and input is case-insensitive.

use std::time::Duration;

use humantime::DurationError;

use crate::errors::{Result, SettingsError};

/// Parse a duration string. Zero and anything unrepresentable is rejected.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let invalid = |reason| SettingsError::InvalidDuration {
        input: input.to_owned(),
        reason,
    };

    let normalized = input.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return Err(invalid("empty"));
    }

    let duration = if let Ok(millis) = normalized.parse::<u64>() {
        Duration::from_millis(millis)
    } else if let Some((number, unit)) = split_fractional(&normalized) {
        let value: f64 = number.parse().map_err(|_| invalid("malformed number"))?;
        let unit = if unit.is_empty() { "ms" } else { unit };
        let base = humantime::parse_duration(&format!("1{unit}"))
            .map_err(|err| invalid(reason_for(&err)))?;
        Duration::try_from_secs_f64(base.as_secs_f64() * value)
            .map_err(|_| invalid("out of range"))?
    } else {
        humantime::parse_duration(&normalized).map_err(|err| invalid(reason_for(&err)))?
    };

    if duration.is_zero() {
        return Err(invalid("must be positive"));
    }
    Ok(duration)
}

/// Split `"1.5 h"` into `("1.5", "h")` when the leading number has a dot.
fn split_fractional(input: &str) -> Option<(&str, &str)> {
    let split = input
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);
    number
        .contains('.')
        .then(|| (number, unit.trim_start()))
}

fn reason_for(err: &DurationError) -> &'static str {
    match err {
        DurationError::Empty => "empty",
        DurationError::NumberExpected(_) => "missing number",
        DurationError::UnknownUnit { .. } => "unknown unit",
        DurationError::NumberOverflow => "out of range",
        _ => "invalid character",
    }
}
