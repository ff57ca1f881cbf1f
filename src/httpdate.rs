//! RFC 1123 date parsing for `Date:` and `getlastmodified` values.
//!
//! Only the fixed-length RFC 1123 form is accepted
//! (`Sun, 06 Nov 1994 08:49:37 GMT`). The result is UTC epoch seconds
//! and never consults the local timezone; anything unparseable,
//! including an unknown month name, yields 0.

use chrono::{TimeZone, Utc};

/// Month names matched case-sensitively, per the RFC.
const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Parse an RFC 1123 date into UTC epoch seconds. Returns 0 on any
/// parse failure.
pub fn parse_httpdate(s: &str) -> i64 {
    parse(s).unwrap_or(0)
}

fn parse(s: &str) -> Option<i64> {
    // "Sun, 06 Nov 1994 08:49:37 GMT"
    let parts: Vec<&str> = s.split_whitespace().collect();
    if parts.len() != 6 || !parts[0].ends_with(',') || parts[5] != "GMT" {
        return None;
    }

    let day: u32 = parts[1].parse().ok()?;
    let month = MONTHS.iter().position(|m| *m == parts[2])? as u32 + 1;
    let year: i32 = parts[3].parse().ok()?;

    let mut hms = parts[4].split(':');
    let hour: u32 = hms.next()?.parse().ok()?;
    let min: u32 = hms.next()?.parse().ok()?;
    let sec: u32 = hms.next()?.parse().ok()?;
    if hms.next().is_some() {
        return None;
    }

    Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
        .single()
        .map(|dt| dt.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc1123_reference_date() {
        assert_eq!(parse_httpdate("Sun, 06 Nov 1994 08:49:37 GMT"), 784111777);
    }

    #[test]
    fn test_epoch_start() {
        assert_eq!(parse_httpdate("Thu, 01 Jan 1970 00:00:00 GMT"), 0);
    }

    #[test]
    fn test_unknown_month_yields_zero() {
        assert_eq!(parse_httpdate("Sun, 06 Foo 1994 08:49:37 GMT"), 0);
        // Month matching is case-sensitive.
        assert_eq!(parse_httpdate("Sun, 06 NOV 1994 08:49:37 GMT"), 0);
    }

    #[test]
    fn test_garbage_yields_zero() {
        assert_eq!(parse_httpdate(""), 0);
        assert_eq!(parse_httpdate("not a date"), 0);
        assert_eq!(parse_httpdate("Sun, 06 Nov 1994 08:49:37 PST"), 0);
        assert_eq!(parse_httpdate("Sun 06 Nov 1994 08:49:37 GMT"), 0);
        assert_eq!(parse_httpdate("Sun, 99 Nov 1994 08:49:37 GMT"), 0);
    }
}
