//! Timestamp parsing for rows coming back from the store.
//!
//! The store emits three shapes for the same column type:
//! `2025-11-15T00:00:45Z` (or with a `±hh:mm` offset), `2025-11-15T00:00:45.060234`
//! (no zone, fractional seconds of any precision) and `2025-11-15T00:00:45`.
//! Zone-less values are UTC. Fractions beyond microseconds are truncated.

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, SecondsFormat, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid timestamp '{0}'")]
pub struct TimestampError(pub String);

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, TimestampError> {
    let fail = || TimestampError(raw.to_string());
    let s = raw.trim();
    // Shortest accepted form is "YYYY-MM-DDTHH:MM:SS".
    if s.len() < 19 || !s.is_char_boundary(19) {
        return Err(fail());
    }

    let (body, zone) = split_zone(s);
    let (main, fraction) = match body.split_once('.') {
        Some((main, fraction)) => (main, Some(fraction)),
        None => (body, None),
    };

    let main = main.replacen(' ', "T", 1);
    let naive = NaiveDateTime::parse_from_str(&main, "%Y-%m-%dT%H:%M:%S").map_err(|_| fail())?;
    let micros = match fraction {
        Some(digits) => parse_micros(digits).ok_or_else(fail)?,
        None => 0,
    };
    let naive = naive + Duration::microseconds(micros);

    let offset = match zone {
        None => FixedOffset::east_opt(0),
        Some(zone) => parse_offset(zone),
    }
    .ok_or_else(fail)?;

    naive
        .and_local_timezone(offset)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(fail)
}

/// Renders a timestamp the way the store accepts it on writes.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn split_zone(s: &str) -> (&str, Option<&str>) {
    if let Some(body) = s.strip_suffix('Z').or_else(|| s.strip_suffix('z')) {
        return (body, Some("Z"));
    }
    // Offsets can only start after the seconds field.
    match s[19..].find(['+', '-']) {
        Some(pos) => {
            let at = 19 + pos;
            (&s[..at], Some(&s[at..]))
        }
        None => (s, None),
    }
}

fn parse_micros(digits: &str) -> Option<i64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let mut padded: String = digits.chars().take(6).collect();
    while padded.len() < 6 {
        padded.push('0');
    }
    padded.parse().ok()
}

fn parse_offset(zone: &str) -> Option<FixedOffset> {
    if zone == "Z" {
        return FixedOffset::east_opt(0);
    }
    let sign = match zone.as_bytes().first()? {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let digits: String = zone[1..].chars().filter(|c| *c != ':').collect();
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i32>().ok()?, 0),
        4 => (digits[..2].parse::<i32>().ok()?, digits[2..].parse::<i32>().ok()?),
        _ => return None,
    };
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Serde adapter for required timestamp columns.
pub mod flexible {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for nullable timestamp columns.
pub mod flexible_option {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        ts: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => serializer.serialize_str(&super::format_timestamp(ts)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|s| super::parse_timestamp(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
