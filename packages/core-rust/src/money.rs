//! Decimal money strings <-> integer minor units (cents).

use crate::error::DomainError;

const MINOR_PER_MAJOR: i64 = 100;

/// Parses a decimal amount such as `"12"`, `"12.3"` or `"-0.05"` into minor
/// units.
///
/// # Errors
///
/// Returns `ValidationFailed` for empty input, non-digits, more than two
/// fractional digits, or values outside the `i64` minor-unit range.
pub fn parse_amount(input: &str) -> Result<i64, DomainError> {
    let invalid = || DomainError::invalid(format!("invalid amount {input:?}"));

    let s = input.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));

    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    if frac.len() > 2 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    if digits.ends_with('.') {
        return Err(invalid());
    }

    let whole: i64 = whole.parse().map_err(|_| invalid())?;
    let frac: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().map_err(|_| invalid())? * 10,
        _ => frac.parse().map_err(|_| invalid())?,
    };

    let minor = whole
        .checked_mul(MINOR_PER_MAJOR)
        .and_then(|w| w.checked_add(frac))
        .ok_or_else(invalid)?;
    Ok(if negative { -minor } else { minor })
}

/// Renders minor units with exactly two fractional digits.
#[must_use]
pub fn format_minor(minor: i64) -> String {
    let sign = if minor < 0 { "-" } else { "" };
    let abs = minor.unsigned_abs();
    let per = MINOR_PER_MAJOR.unsigned_abs();
    format!("{sign}{}.{:02}", abs / per, abs % per)
}
