//! Records served by the team panel API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Default lead time for the pre-meeting reminder.
pub const DEFAULT_NOTIFY_OFFSET_SECS: u64 = 300;

/// A registered team member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: i64,
    #[serde(deserialize_with = "de_snowflake")]
    pub discord_id: u64,
    pub real_name: String,
    #[serde(default, rename = "gen")]
    pub generation: Option<i64>,
    #[serde(default)]
    pub jobs: Vec<String>,
    #[serde(default)]
    pub warning_points: i64,
    #[serde(default)]
    pub email_address: Option<String>,
}

/// A scheduled team meeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meeting {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Member id of the host.
    #[serde(default)]
    pub host: Option<i64>,
    #[serde(deserialize_with = "crate::timestamp::deserialize")]
    pub start_time: DateTime<Utc>,
    #[serde(default, deserialize_with = "crate::timestamp::deserialize_opt")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub can_absent: bool,
    /// Reminder lead time in seconds; the panel sends it as a string.
    #[serde(default, deserialize_with = "de_opt_seconds")]
    pub discord_notify_time: Option<u64>,
}

/// A panel announcement, optionally pinned until a deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, deserialize_with = "crate::timestamp::deserialize_opt")]
    pub pin_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_pinned: Option<bool>,
}

impl Announcement {
    /// Pin expiry when the announcement is (still) pinned.
    pub fn pin_expiry(&self) -> Option<DateTime<Utc>> {
        match self.is_pinned {
            Some(false) => None,
            _ => self.pin_until,
        }
    }
}

/// Minimal identifying payload sent with delete/unpin events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "crate::timestamp::deserialize_opt")]
    pub start_time: Option<DateTime<Utc>>,
}

/// Review state of an absence request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbsentStatus {
    Pending,
    Approved,
    Rejected,
    #[serde(other)]
    Unknown,
}

impl AbsentStatus {
    /// Members in this state are still expected to attend.
    pub fn must_attend(self) -> bool {
        matches!(self, Self::Pending | Self::Rejected)
    }
}

/// An absence request against a meeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsentRequest {
    pub id: i64,
    pub meeting: i64,
    pub member: i64,
    #[serde(default)]
    pub reason: String,
    pub status: AbsentStatus,
    #[serde(default)]
    pub reviewer: Option<i64>,
    #[serde(default)]
    pub reviewer_comment: Option<String>,
}

/// Payload for creating an absence request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewAbsentRequest {
    pub meeting: i64,
    pub member: i64,
    pub reason: String,
}

/// Warning-point change applied to a member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarningDetail {
    pub id: i64,
    pub member: i64,
    pub operator: i64,
    pub points: i64,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// New panel login observed for a member account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginNotice {
    pub ip: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub method: String,
    #[serde(deserialize_with = "de_snowflake")]
    pub member_discord_id: u64,
}

/// Discord snowflakes arrive as strings or numbers.
pub(crate) fn de_snowflake<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid snowflake `{s}`"))),
    }
}

fn de_opt_seconds<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Text(String),
    }
    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Num(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid seconds `{s}`"))),
    }
}
