//! TTL Specification Parsing
//!
//! Writes carry their time-to-live as a textual duration: a number followed by
//! a unit, optionally chained (`"10s"`, `"1500ms"`, `"1.5s"`, `"1h30m"`).
//! The protocol layer builds these from `EX`/`PX` arguments by appending `s` or
//! `ms` to the client-supplied number.
//!
//! An empty specification, or a bare `"0"`, means the key never expires.

use crate::storage::error::{StoreError, StoreResult};
use std::time::Duration;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Longest accepted TTL, in nanoseconds (about 292 years).
const MAX_TTL_NANOS: u128 = i64::MAX as u128;

/// Fractional digits beyond this are ignored; they are below nanosecond
/// precision for every supported unit.
const MAX_FRACTION_DIGITS: usize = 18;

/// Returns the length of one `unit` in nanoseconds.
fn unit_nanos(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "µs" | "μs" => Some(1_000),
        "ms" => Some(1_000_000),
        "s" => Some(NANOS_PER_SEC),
        "m" => Some(60 * NANOS_PER_SEC),
        "h" => Some(3_600 * NANOS_PER_SEC),
        _ => None,
    }
}

/// Parses a TTL specification into a [`Duration`].
///
/// # Errors
///
/// Returns [`StoreError::InvalidTtl`] when the text is not a sequence of
/// `<number><unit>` pairs, uses an unknown unit, is negative, or exceeds
/// `i64::MAX` nanoseconds.
///
/// A negative TTL such as `"-5s"` is an error here. It is not read as "no
/// expiry", so a client cannot cancel expiry with a negative value by mistake.
///
/// # Example
///
/// ```
/// use mukv::storage::parse_ttl;
/// use std::time::Duration;
///
/// assert_eq!(parse_ttl("").unwrap(), Duration::ZERO);
/// assert_eq!(parse_ttl("10s").unwrap(), Duration::from_secs(10));
/// assert_eq!(parse_ttl("250ms").unwrap(), Duration::from_millis(250));
/// assert!(parse_ttl("soon").is_err());
/// ```
pub fn parse_ttl(spec: &str) -> StoreResult<Duration> {
    if spec.is_empty() || spec == "0" {
        return Ok(Duration::ZERO);
    }

    let mut rest = spec.strip_prefix('+').unwrap_or(spec);
    if rest.starts_with('-') {
        return Err(StoreError::invalid_ttl(spec, "TTL must not be negative"));
    }
    if rest.is_empty() {
        return Err(StoreError::invalid_ttl(spec, "missing number"));
    }

    let mut total: u128 = 0;

    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let number = &rest[..number_end];
        rest = &rest[number_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_end];
        rest = &rest[unit_end..];

        if unit.is_empty() {
            return Err(StoreError::invalid_ttl(spec, "missing unit"));
        }
        let scale = unit_nanos(unit)
            .ok_or_else(|| StoreError::invalid_ttl(spec, format!("unknown unit '{}'", unit)))?;

        let component = component_nanos(spec, number, scale)?;
        total = total
            .checked_add(component)
            .ok_or_else(|| StoreError::invalid_ttl(spec, "duration overflows"))?;
    }

    if total > MAX_TTL_NANOS {
        return Err(StoreError::invalid_ttl(spec, "duration overflows"));
    }

    let secs = u64::try_from(total / NANOS_PER_SEC)
        .map_err(|_| StoreError::invalid_ttl(spec, "duration overflows"))?;
    // Always below one billion, so it fits.
    let nanos = (total % NANOS_PER_SEC) as u32;

    Ok(Duration::new(secs, nanos))
}

/// Converts one `<number>` (possibly fractional) of a unit into nanoseconds.
fn component_nanos(spec: &str, number: &str, scale: u128) -> StoreResult<u128> {
    let (whole, fraction) = match number.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (number, ""),
    };

    if whole.is_empty() && fraction.is_empty() {
        return Err(StoreError::invalid_ttl(spec, "missing number"));
    }
    if fraction.contains('.') {
        return Err(StoreError::invalid_ttl(
            spec,
            format!("malformed number '{}'", number),
        ));
    }

    let overflow = || StoreError::invalid_ttl(spec, "duration overflows");

    let whole_value: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| overflow())?
    };
    let mut nanos = whole_value.checked_mul(scale).ok_or_else(overflow)?;

    let fraction = &fraction[..fraction.len().min(MAX_FRACTION_DIGITS)];
    if !fraction.is_empty() {
        let fraction_value: u128 = fraction.parse().map_err(|_| overflow())?;
        let denominator = 10u128.pow(fraction.len() as u32);
        nanos = nanos
            .checked_add(fraction_value * scale / denominator)
            .ok_or_else(overflow)?;
    }

    Ok(nanos)
}
