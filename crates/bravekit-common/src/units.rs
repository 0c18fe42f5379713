//! Human-readable quantities: byte sizes and ages.

use chrono::{DateTime, Utc};

use crate::error::{BraveError, Result};

const SUFFIXES: [(&str, u64); 8] = [
    ("KiB", 1 << 10),
    ("MiB", 1 << 20),
    ("GiB", 1 << 30),
    ("TiB", 1 << 40),
    ("kB", 1_000),
    ("MB", 1_000_000),
    ("GB", 1_000_000_000),
    ("TB", 1_000_000_000_000),
];

/// Parses quantities like `512MB`, `1GiB` or `1048576` into bytes.
///
/// Suffix matching is case-insensitive for the SI forms (`KB`, `kb`).
///
/// # Errors
///
/// Returns [`BraveError::Validation`] if the number or suffix is malformed.
pub fn parse_bytes(input: &str) -> Result<u64> {
    let s = input.trim();
    let invalid = || BraveError::validation(format!("invalid size quantity {input:?}"));

    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, suffix) = s.split_at(split);
    let value: u64 = digits.parse().map_err(|_| invalid())?;
    let suffix = suffix.trim();
    if suffix.is_empty() || suffix == "B" {
        return Ok(value);
    }

    let multiplier = SUFFIXES
        .iter()
        .find(|(name, _)| {
            *name == suffix || (!name.contains('i') && name.eq_ignore_ascii_case(suffix))
        })
        .map(|(_, m)| *m)
        .ok_or_else(invalid)?;
    value.checked_mul(multiplier).ok_or_else(invalid)
}

/// Formats a byte count with SI units (`1.5 GB`).
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes_si(bytes: u64) -> String {
    const UNIT: u64 = 1000;
    if bytes < UNIT {
        return format!("{bytes} B");
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    let prefix = ['k', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1} {prefix}B", bytes as f64 / div as f64)
}

/// Buckets the age of `modified` relative to `now` into whole days.
#[must_use]
pub fn format_age(modified: DateTime<Utc>, now: DateTime<Utc>) -> String {
    match (now - modified).num_days() {
        days if days > 1 => format!("{days} days ago"),
        1 => "1 day ago".to_string(),
        _ => "just now".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn parse_si_megabytes() {
        assert_eq!(parse_bytes("512MB").expect("parse"), 512_000_000);
    }

    #[test]
    fn parse_binary_gibibytes() {
        assert_eq!(parse_bytes("1GiB").expect("parse"), 1 << 30);
    }

    #[test]
    fn parse_lowercase_si_suffix() {
        assert_eq!(parse_bytes("2gb").expect("parse"), 2_000_000_000);
    }

    #[test]
    fn parse_plain_bytes() {
        assert_eq!(parse_bytes("1048576").expect("parse"), 1_048_576);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_bytes("abc").is_err());
        assert!(parse_bytes("12XB").is_err());
        assert!(parse_bytes("").is_err());
    }

    #[test]
    fn format_small_and_large_counts() {
        assert_eq!(format_bytes_si(999), "999 B");
        assert_eq!(format_bytes_si(1_500), "1.5 kB");
        assert_eq!(format_bytes_si(2_000_000_000), "2.0 GB");
    }

    #[test]
    fn age_buckets_at_day_boundary() {
        let now = Utc::now();
        assert_eq!(format_age(now - Duration::hours(23), now), "just now");
        assert_eq!(format_age(now - Duration::hours(24), now), "1 day ago");
        assert_eq!(format_age(now - Duration::hours(47), now), "1 day ago");
        assert_eq!(format_age(now - Duration::days(3), now), "3 days ago");
    }
}
