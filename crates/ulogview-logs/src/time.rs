//! Timestamp and duration parsing shared by the builder and the reader

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta};

use ulogview_types::TimestampEncoding;

/// 100-nanosecond ticks per microsecond
const TICKS_PER_MICROSECOND: i64 = 10;

/// Mask of the tick bits in the binary form (the top two bits carry the kind)
const TICKS_MASK: i64 = 0x3FFF_FFFF_FFFF_FFFF;

/// Formats tried, in order, when no explicit format is configured
const DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S%.f",
    "%d/%b/%Y:%H:%M:%S",
    "%b %d %Y %H:%M:%S",
];

fn epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or(NaiveDateTime::MIN)
}

/// Convert a timestamp into its sortable binary form (ticks since 0001-01-01)
pub fn to_binary(timestamp: NaiveDateTime) -> i64 {
    let delta = timestamp - epoch();
    let micros = delta.num_microseconds().unwrap_or(i64::MAX / TICKS_PER_MICROSECOND);
    let sub_micro_ticks = (delta.subsec_nanos().rem_euclid(1000) / 100) as i64;
    micros.saturating_mul(TICKS_PER_MICROSECOND).saturating_add(sub_micro_ticks)
}

/// Convert a binary form produced by [`to_binary`] back into a timestamp
pub fn from_binary(value: i64) -> Option<NaiveDateTime> {
    let ticks = value & TICKS_MASK;
    let delta = TimeDelta::microseconds(ticks / TICKS_PER_MICROSECOND)
        + TimeDelta::nanoseconds((ticks % TICKS_PER_MICROSECOND) * 100);
    epoch().checked_add_signed(delta)
}

/// Parse date/time text in one of the common layouts
pub fn parse_date_time(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    for format in DATE_TIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Parse raw timestamp text the way a log profile describes it
pub fn parse_timestamp(
    s: &str,
    encoding: TimestampEncoding,
    format: Option<&str>,
) -> Option<NaiveDateTime> {
    let s = s.trim();
    match encoding {
        TimestampEncoding::Custom => match format {
            Some(format) => NaiveDateTime::parse_from_str(s, format)
                .ok()
                .or_else(|| parse_date_time(s)),
            None => parse_date_time(s),
        },
        TimestampEncoding::Unix => {
            DateTime::from_timestamp(s.parse().ok()?, 0).map(|dt| dt.naive_utc())
        }
        TimestampEncoding::UnixMilliseconds => {
            DateTime::from_timestamp_millis(s.parse().ok()?).map(|dt| dt.naive_utc())
        }
        TimestampEncoding::UnixMicroseconds => {
            DateTime::from_timestamp_micros(s.parse().ok()?).map(|dt| dt.naive_utc())
        }
    }
}

/// Parse a duration, trying a plain number of milliseconds first
pub fn parse_time_span(s: &str) -> Option<TimeDelta> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<f64>() {
        if !ms.is_finite() {
            return None;
        }
        let nanos = ms * 1_000_000.0;
        if nanos.abs() >= i64::MAX as f64 {
            return None;
        }
        return Some(TimeDelta::nanoseconds(nanos.round() as i64));
    }
    parse_structured_time_span(s)
}

/// Parse `[-][d.]hh:mm[:ss[.fffffff]]`
fn parse_structured_time_span(s: &str) -> Option<TimeDelta> {
    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let mut parts = body.split(':');
    let head = parts.next()?;
    let (days, hours) = match head.split_once('.') {
        Some((d, h)) => (d.parse::<i64>().ok()?, h.parse::<i64>().ok()?),
        None => (0, head.parse::<i64>().ok()?),
    };
    let minutes = parts.next()?.parse::<i64>().ok()?;
    let (seconds, nanos) = match parts.next() {
        Some(sec) => match sec.split_once('.') {
            Some((whole, fraction)) => {
                if fraction.is_empty()
                    || fraction.len() > 7
                    || !fraction.bytes().all(|b| b.is_ascii_digit())
                {
                    return None;
                }
                let padded = format!("{:0<9}", fraction);
                (whole.parse::<i64>().ok()?, padded.parse::<i64>().ok()?)
            }
            None => (sec.parse::<i64>().ok()?, 0),
        },
        None => (0, 0),
    };
    if parts.next().is_some() || hours >= 24 || minutes >= 60 || seconds >= 60 {
        return None;
    }
    if days < 0 || hours < 0 || minutes < 0 || seconds < 0 {
        return None;
    }
    let delta = TimeDelta::try_days(days)?
        + TimeDelta::hours(hours)
        + TimeDelta::minutes(minutes)
        + TimeDelta::seconds(seconds)
        + TimeDelta::nanoseconds(nanos);
    Some(if negative { -delta } else { delta })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_round_trip() {
        let ts = NaiveDateTime::parse_from_str("2024-01-15 10:30:00.1234567", "%Y-%m-%d %H:%M:%S%.f")
            .unwrap();
        let binary = to_binary(ts);
        assert_eq!(from_binary(binary), Some(ts));
        assert!(to_binary(ts) > to_binary(ts - TimeDelta::microseconds(1)));
    }

    #[test]
    fn test_parse_common_layouts() {
        assert!(parse_date_time("2024-01-15 10:30:00").is_some());
        assert!(parse_date_time("2024-01-15T10:30:00.123Z").is_some());
        assert!(parse_date_time("2024/01/15 10:30:00.5").is_some());
        assert!(parse_date_time("not a date").is_none());
    }

    #[test]
    fn test_parse_unix_encodings() {
        let ts = parse_timestamp("1700000000000", TimestampEncoding::UnixMilliseconds, None).unwrap();
        assert_eq!(ts, parse_timestamp("1700000000", TimestampEncoding::Unix, None).unwrap());
    }

    #[test]
    fn test_parse_custom_format() {
        let ts = parse_timestamp("15-01-2024 10:30:00", TimestampEncoding::Custom, Some("%d-%m-%Y %H:%M:%S"));
        assert_eq!(ts, parse_date_time("2024-01-15 10:30:00"));
    }

    #[test]
    fn test_time_span_milliseconds_first() {
        assert_eq!(parse_time_span("1500"), Some(TimeDelta::milliseconds(1500)));
        assert_eq!(parse_time_span("0.5"), Some(TimeDelta::microseconds(500)));
        assert_eq!(parse_time_span("NaN"), None);
    }

    #[test]
    fn test_time_span_structured() {
        assert_eq!(parse_time_span("01:02:03"), Some(TimeDelta::seconds(3723)));
        assert_eq!(
            parse_time_span("1.00:00:00.25"),
            Some(TimeDelta::days(1) + TimeDelta::milliseconds(250))
        );
        assert_eq!(parse_time_span("-00:01"), Some(TimeDelta::minutes(-1)));
        assert_eq!(parse_time_span("25:00:00"), None);
        assert_eq!(parse_time_span("abc"), None);
    }
}
