//! Derivation rules: which deferred tasks an entity implies, and when they fire.
//!
//! One table for every entity kind; the mapper and the reload procedure both
//! go through [`ScheduledEntity`] so live events and reloads agree.

use super::tasks::{DeferredAction, EntityKey, PlannedTask, TaskName};
use crate::config::SchedulerConfig;
use crate::directory::{Announcement, Meeting};
use chrono::{DateTime, Duration, Utc};

/// Timing parameters applied to every derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivationRules {
    /// Reminder lead time for meetings that do not carry their own.
    pub default_notify_offset: Duration,
    /// Distance from now an already-past reminder is moved to.
    pub clamp_delay: Duration,
}

impl Default for DerivationRules {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for DerivationRules {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            default_notify_offset: seconds(config.default_notify_offset_secs),
            clamp_delay: seconds(config.clamp_delay_secs.max(1)),
        }
    }
}

/// Offsets beyond a year are treated as a year.
const MAX_OFFSET_SECS: u64 = 366 * 24 * 3600;

fn seconds(secs: u64) -> Duration {
    Duration::seconds(i64::try_from(secs.min(MAX_OFFSET_SECS)).unwrap_or_default())
}

/// An entity with a lifecycle clock.
pub trait ScheduledEntity {
    fn key(&self) -> EntityKey;

    /// The timestamp that decides whether the entity is still relevant.
    fn primary_due_time(&self) -> Option<DateTime<Utc>>;

    /// Pin-style entities are rescheduled on every edit, even when the due
    /// time is already past.
    fn pin_style(&self) -> bool;

    /// Tasks implied by the entity as of `now`.
    fn derive(&self, now: DateTime<Utc>, rules: &DerivationRules) -> Vec<PlannedTask>;

    /// Action to run in place of scheduling once the due time has passed.
    fn expire_action(&self) -> Option<DeferredAction>;

    fn is_past(&self, now: DateTime<Utc>) -> bool {
        self.primary_due_time().is_some_and(|due| due <= now)
    }
}

impl ScheduledEntity for Meeting {
    fn key(&self) -> EntityKey {
        EntityKey::meeting(self.id)
    }

    fn primary_due_time(&self) -> Option<DateTime<Utc>> {
        Some(self.start_time)
    }

    fn pin_style(&self) -> bool {
        false
    }

    fn derive(&self, now: DateTime<Utc>, rules: &DerivationRules) -> Vec<PlannedTask> {
        let start = self.start_time;
        if start <= now {
            return Vec::new();
        }
        let offset = self
            .discord_notify_time
            .map(seconds)
            .unwrap_or(rules.default_notify_offset);
        let mut notify_at = start - offset;
        if notify_at <= now {
            notify_at = (now + rules.clamp_delay).min(start);
        }
        vec![
            PlannedTask {
                name: TaskName::Notify,
                fire_time: notify_at,
                action: DeferredAction::MeetingReminder(self.clone()),
            },
            PlannedTask {
                name: TaskName::Start,
                fire_time: start,
                action: DeferredAction::MeetingStart(self.clone()),
            },
        ]
    }

    fn expire_action(&self) -> Option<DeferredAction> {
        None
    }
}

impl ScheduledEntity for Announcement {
    fn key(&self) -> EntityKey {
        EntityKey::announcement(self.id)
    }

    fn primary_due_time(&self) -> Option<DateTime<Utc>> {
        self.pin_expiry()
    }

    fn pin_style(&self) -> bool {
        true
    }

    fn derive(&self, _now: DateTime<Utc>, _rules: &DerivationRules) -> Vec<PlannedTask> {
        self.pin_expiry()
            .map(|until| PlannedTask {
                name: TaskName::Unpin,
                fire_time: until,
                action: DeferredAction::Unpin(self.clone()),
            })
            .into_iter()
            .collect()
    }

    fn expire_action(&self) -> Option<DeferredAction> {
        self.pin_expiry()
            .map(|_| DeferredAction::Unpin(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use chrono::TimeZone;

    fn meeting(start: DateTime<Utc>, notify: Option<u64>) -> Meeting {
        Meeting {
            id: 42,
            name: "Weekly sync".into(),
            description: String::new(),
            host: Some(1),
            start_time: start,
            end_time: None,
            location: "Lab".into(),
            can_absent: true,
            discord_notify_time: notify,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 1, 50, 0).unwrap()
    }

    #[test]
    fn meeting_derives_notify_and_start() {
        let m = meeting(now() + Duration::minutes(10), Some(300));
        let tasks = m.derive(now(), &DerivationRules::default());
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].name, TaskName::Notify);
        assert_eq!(tasks[0].fire_time, now() + Duration::minutes(5));
        assert_eq!(tasks[1].name, TaskName::Start);
        assert_eq!(tasks[1].fire_time, now() + Duration::minutes(10));
    }

    #[test]
    fn late_reminder_is_clamped_into_the_future() {
        let m = meeting(now() + Duration::seconds(60), Some(300));
        let tasks = m.derive(now(), &DerivationRules::default());
        let notify = tasks[0].fire_time;
        assert!(notify > now());
        assert_eq!(notify, now() + Duration::seconds(5));
        assert!(notify <= m.start_time);
    }

    #[test]
    fn clamp_never_passes_start() {
        let m = meeting(now() + Duration::seconds(2), None);
        let tasks = m.derive(now(), &DerivationRules::default());
        assert_eq!(tasks[0].fire_time, m.start_time);
    }

    #[test]
    fn started_meeting_derives_nothing() {
        let m = meeting(now() - Duration::seconds(1), None);
        assert!(m.derive(now(), &DerivationRules::default()).is_empty());
        assert!(m.is_past(now()));
        assert!(m.expire_action().is_none());
    }

    #[test]
    fn past_pin_still_derives_unpin() {
        let ann = Announcement {
            id: 5,
            title: "t".into(),
            content: "c".into(),
            pin_until: Some(now() - Duration::hours(1)),
            is_pinned: Some(true),
        };
        let tasks = ann.derive(now(), &DerivationRules::default());
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name, TaskName::Unpin);
        assert!(ann.is_past(now()));
        assert!(matches!(ann.expire_action(), Some(DeferredAction::Unpin(_))));
    }
}
