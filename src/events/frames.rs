//! Wire frames exchanged with the panel over the event streams.

use crate::chat::{GuildChannel, GuildRole};
use crate::directory::{AbsentRequest, Announcement, EntityRef, LoginNotice, Meeting, WarningDetail};
use crate::error::{BotError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    AnnouncementPinned(Announcement),
    AnnouncementEdited(Announcement),
    AnnouncementAnnounced(Announcement),
    AnnouncementUnpinned(EntityRef),
    AnnouncementDeleted(EntityRef),
    MeetingCreated(Meeting),
    MeetingEdited(Meeting),
    MeetingDeleted(EntityRef),
    AbsenceSubmitted(AbsentRequest),
    AbsenceReviewed(AbsentRequest),
    WarningPointsAdded(WarningDetail),
    NewLogin(LoginNotice),
    /// `{kind}.request_initial_data`.
    InitialDataRequested { kind: String },
    /// A `type` this build does not know.
    Unknown { kind: String },
}

impl InboundEvent {
    /// Decode one text frame: a JSON object with a `type` discriminator and
    /// the payload nested under a key named after the entity.
    pub fn decode(text: &str) -> Result<Self> {
        let frame: Value = serde_json::from_str(text)?;
        let kind = frame
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| BotError::Decode("frame has no `type` field".into()))?;

        let event = match kind {
            "announcement.pin" => Self::AnnouncementPinned(field(&frame, "announcement")?),
            "announcement.edit" => Self::AnnouncementEdited(field(&frame, "announcement")?),
            "announcement.announce" => Self::AnnouncementAnnounced(field(&frame, "announcement")?),
            "announcement.unpin" => Self::AnnouncementUnpinned(field(&frame, "announcement")?),
            "announcement.delete" => Self::AnnouncementDeleted(field(&frame, "announcement")?),
            "meeting.create" => Self::MeetingCreated(field(&frame, "meeting")?),
            "meeting.edit" => Self::MeetingEdited(field(&frame, "meeting")?),
            "meeting.delete" => Self::MeetingDeleted(field(&frame, "meeting")?),
            "meeting.new_absent_request" => Self::AbsenceSubmitted(field(&frame, "absent_request")?),
            "meeting.review_absent_request" => {
                Self::AbsenceReviewed(field(&frame, "absent_request")?)
            }
            "member.add_warning_points" => Self::WarningPointsAdded(field(&frame, "warning_detail")?),
            // Login notices carry their fields at the top level.
            "auth.new_login" => Self::NewLogin(serde_json::from_value(frame.clone())?),
            other => match other.strip_suffix(".request_initial_data") {
                Some(prefix) => Self::InitialDataRequested {
                    kind: prefix.to_owned(),
                },
                None => Self::Unknown {
                    kind: other.to_owned(),
                },
            },
        };
        Ok(event)
    }

    /// The `type` string this event was decoded from.
    pub fn type_name(&self) -> &str {
        match self {
            Self::AnnouncementPinned(_) => "announcement.pin",
            Self::AnnouncementEdited(_) => "announcement.edit",
            Self::AnnouncementAnnounced(_) => "announcement.announce",
            Self::AnnouncementUnpinned(_) => "announcement.unpin",
            Self::AnnouncementDeleted(_) => "announcement.delete",
            Self::MeetingCreated(_) => "meeting.create",
            Self::MeetingEdited(_) => "meeting.edit",
            Self::MeetingDeleted(_) => "meeting.delete",
            Self::AbsenceSubmitted(_) => "meeting.new_absent_request",
            Self::AbsenceReviewed(_) => "meeting.review_absent_request",
            Self::WarningPointsAdded(_) => "member.add_warning_points",
            Self::NewLogin(_) => "auth.new_login",
            Self::InitialDataRequested { .. } => "request_initial_data",
            Self::Unknown { kind } => kind,
        }
    }
}

fn field<T: DeserializeOwned>(frame: &Value, key: &str) -> Result<T> {
    let value = frame
        .get(key)
        .ok_or_else(|| BotError::Decode(format!("frame has no `{key}` payload")))?;
    T::deserialize(value).map_err(|e| BotError::Decode(format!("bad `{key}` payload: {e}")))
}

/// Frame sent back to the panel over a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum OutboundFrame {
    #[serde(rename = "announcement.unpin")]
    AnnouncementUnpin { announcement_id: i64 },
    #[serde(rename = "test.message")]
    TestMessage { message: String },
    #[serde(rename = "roles_update")]
    RolesUpdate { roles: Vec<GuildRole> },
    #[serde(rename = "channels_update")]
    ChannelsUpdate { channels: Vec<GuildChannel> },
}

impl OutboundFrame {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
