//! Task model shared by the registry, the mapper and the reload procedure.

use crate::directory::{Announcement, Meeting};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of entity that owns scheduled tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Announcement,
    Meeting,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::Announcement, EntityKind::Meeting];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Announcement => "announcement",
            Self::Meeting => "meeting",
        }
    }

    /// Kind whose events arrive on the given stream channel.
    pub fn for_channel(channel: &str) -> Option<Self> {
        match channel {
            "announcement" => Some(Self::Announcement),
            "meeting" => Some(Self::Meeting),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry key of one entity. Ids are only unique within a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: i64,
}

impl EntityKey {
    pub fn announcement(id: i64) -> Self {
        Self {
            kind: EntityKind::Announcement,
            id,
        }
    }

    pub fn meeting(id: i64) -> Self {
        Self {
            kind: EntityKind::Meeting,
            id,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// Semantic name of a deferred action; at most one task per name per entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskName {
    /// Pre-start meeting reminder.
    Notify,
    /// Meeting start notice.
    Start,
    /// Announcement pin expiry.
    Unpin,
}

impl TaskName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Notify => "notify",
            Self::Start => "start",
            Self::Unpin => "unpin",
        }
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a task. Terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Scheduled,
    Fired,
    Cancelled,
}

/// Work performed when a task fires. Carries the entity payload by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredAction {
    MeetingReminder(Meeting),
    MeetingStart(Meeting),
    Unpin(Announcement),
}

impl DeferredAction {
    /// Reminders lose their meaning once grossly late; state changes do not.
    pub fn is_reminder(&self) -> bool {
        matches!(self, Self::MeetingReminder(_) | Self::MeetingStart(_))
    }

    /// Name of the task this action runs under.
    pub fn task_name(&self) -> TaskName {
        match self {
            Self::MeetingReminder(_) => TaskName::Notify,
            Self::MeetingStart(_) => TaskName::Start,
            Self::Unpin(_) => TaskName::Unpin,
        }
    }
}

/// A task as held by (or removed from) the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task<A> {
    pub key: EntityKey,
    pub name: TaskName,
    pub fire_time: DateTime<Utc>,
    pub action: A,
    pub status: TaskStatus,
}

/// Registry listing entry: the `(entity, task name, fire time)` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct TaskEntry {
    pub key: EntityKey,
    pub name: TaskName,
    pub fire_time: DateTime<Utc>,
}

/// A task derived from an entity, not yet registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTask {
    pub name: TaskName,
    pub fire_time: DateTime<Utc>,
    pub action: DeferredAction,
}

/// Registry mutation produced by the event mapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryOp {
    Schedule { key: EntityKey, task: PlannedTask },
    Cancel { key: EntityKey, name: TaskName },
    CancelAll { key: EntityKey },
}

impl RegistryOp {
    pub fn key(&self) -> EntityKey {
        match self {
            Self::Schedule { key, .. } | Self::Cancel { key, .. } | Self::CancelAll { key } => *key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_render_kind_and_id() {
        assert_eq!(EntityKey::meeting(42).to_string(), "meeting#42");
        assert_eq!(TaskName::Unpin.to_string(), "unpin");
        assert_ne!(EntityKey::meeting(1), EntityKey::announcement(1));
    }

    #[test]
    fn channel_names_map_to_kinds() {
        assert_eq!(EntityKind::for_channel("meeting"), Some(EntityKind::Meeting));
        assert_eq!(EntityKind::for_channel("member"), None);
    }
}
