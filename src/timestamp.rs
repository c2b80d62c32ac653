//! ISO-8601 timestamp helpers for directory payloads.
//!
//! The panel normally sends offset-aware timestamps
//! (`2025-01-01T10:00:00+08:00`). Naive timestamps are interpreted in the
//! team's local offset.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Deserializer};

/// Team-local UTC offset (Asia/Taipei, no DST).
pub const TEAM_UTC_OFFSET_SECS: i32 = 8 * 3600;

fn team_offset() -> FixedOffset {
    FixedOffset::east_opt(TEAM_UTC_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// Parse an ISO-8601 timestamp, falling back to the team offset when the
/// string carries none.
pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()?;
    team_offset()
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Serde adapter for a required timestamp field.
pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp `{raw}`")))
}

/// Serde adapter for an optional / nullable timestamp field.
pub fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => parse(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp `{raw}`"))),
    }
}

/// Discord timestamp markup (`<t:unix:style>`), rendered client-side in the
/// reader's own timezone.
pub fn discord_markup(at: DateTime<Utc>, style: char) -> String {
    format!("<t:{}:{style}>", at.timestamp())
}
