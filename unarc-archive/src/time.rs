//! Timestamp conversions shared by the formats.

use chrono::NaiveDate;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Convert seconds (and nanoseconds) relative to the Unix epoch.
///
/// Returns `None` when the value cannot be represented.
pub fn unix_time(secs: i64, nanos: u32) -> Option<SystemTime> {
    let nanos = Duration::from_nanos(u64::from(nanos.min(999_999_999)));
    if secs >= 0 {
        UNIX_EPOCH.checked_add(Duration::from_secs(secs.unsigned_abs()) + nanos)
    } else {
        UNIX_EPOCH
            .checked_sub(Duration::from_secs(secs.unsigned_abs()))?
            .checked_add(nanos)
    }
}

/// Parse a decimal timestamp such as `1700000000.123456789` (pax style).
pub fn parse_decimal_time(value: &str) -> Option<SystemTime> {
    let value = value.trim();
    let (whole, fraction) = match value.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (value, ""),
    };
    let secs: i64 = whole.parse().ok()?;
    let digits: String = fraction
        .chars()
        .take_while(char::is_ascii_digit)
        .take(9)
        .collect();
    let nanos = if digits.is_empty() {
        0
    } else {
        let scale = 10u32.pow(9 - digits.len() as u32);
        digits.parse::<u32>().ok()? * scale
    };
    if secs < 0 && nanos > 0 {
        // -1.5 means one and a half seconds before the epoch
        return unix_time(secs - 1, 1_000_000_000 - nanos);
    }
    unix_time(secs, nanos)
}

/// Convert an MS-DOS date/time pair.
///
/// DOS timestamps carry no zone; they are taken as UTC. Invalid fields
/// (a zero month, for instance) yield `None`.
pub fn dos_time(time: u16, date: u16) -> Option<SystemTime> {
    let year = 1980 + i32::from(date >> 9);
    let month = u32::from((date >> 5) & 0x0f);
    let day = u32::from(date & 0x1f);
    let hours = u32::from(time >> 11);
    let minutes = u32::from((time >> 5) & 0x3f);
    let seconds = u32::from(time & 0x1f) * 2;

    let stamp = NaiveDate::from_ymd_opt(year, month, day)?
        .and_hms_opt(hours, minutes, seconds)?
        .and_utc()
        .timestamp();
    unix_time(stamp, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_time() {
        assert_eq!(unix_time(0, 0), Some(UNIX_EPOCH));
        assert_eq!(
            unix_time(-10, 0),
            UNIX_EPOCH.checked_sub(Duration::from_secs(10))
        );
    }

    #[test]
    fn test_parse_decimal_time() {
        let t = parse_decimal_time("1700000000.25").unwrap();
        let since = t.duration_since(UNIX_EPOCH).unwrap();
        assert_eq!(since.as_secs(), 1_700_000_000);
        assert_eq!(since.subsec_nanos(), 250_000_000);

        assert!(parse_decimal_time("soon").is_none());
    }

    #[test]
    fn test_dos_time() {
        // 2024-01-15 12:30:44
        let date = ((2024 - 1980) << 9) | (1 << 5) | 15;
        let time = (12 << 11) | (30 << 5) | 22;
        let t = dos_time(time, date).unwrap();
        assert_eq!(
            t.duration_since(UNIX_EPOCH).unwrap().as_secs(),
            1_705_321_844
        );

        assert!(dos_time(0, 0).is_none());
    }
}
