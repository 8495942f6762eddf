//! Wall-clock helpers and lenient timestamp parsing.
//!
//! All timestamps are naive local wall-clock values. Clients send a mix of
//! RFC 3339 strings (from `Date.toISOString()`), `datetime-local` form values
//! without seconds, and bare dates, so inbound parsing accepts all of them.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Deserializer, de::Error as _};

/// Accepted naive layouts, tried in order.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Current local wall-clock time.
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Parse a client-supplied timestamp.
///
/// Offset-carrying values are converted to local time; naive values are taken
/// as-is; a bare date means midnight.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Local).naive_local());
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN))
}

/// First instant of the calendar day containing `t`.
pub fn start_of_day(t: NaiveDateTime) -> NaiveDateTime {
    t.date().and_time(NaiveTime::MIN)
}

/// Last representable instant of the calendar day containing `t`.
pub fn end_of_day(t: NaiveDateTime) -> NaiveDateTime {
    let last = NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999).unwrap_or(NaiveTime::MIN);
    t.date().and_time(last)
}

/// Deserialize an optional timestamp using [`parse_timestamp`].
pub fn deserialize_opt_timestamp<'de, D>(d: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(d)? {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => parse_timestamp(&s)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {s}"))),
    }
}

/// Deserialize an optional calendar date. Timestamps are accepted and cut to
/// their date.
pub fn deserialize_opt_date<'de, D>(d: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_opt_timestamp(d).map(|t| t.map(|t| t.date()))
}

/// Deserialize a patch timestamp: a present key yields `Some`, with `null`
/// clearing the value. Pair with `#[serde(default)]` so absent keys stay `None`.
pub fn deserialize_patch_timestamp<'de, D>(
    d: D,
) -> Result<Option<Option<NaiveDateTime>>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_opt_timestamp(d).map(Some)
}

/// Deserialize any nullable patch field, distinguishing `null` from absent.
pub fn deserialize_patch<'de, D, T>(d: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(d).map(Some)
}
