//! Event-to-task mapping.
//!
//! Pure: given an inbound event and the current time, decide which relay
//! actions to send now and which registry mutations to apply. All entity
//! kinds go through the same [`ScheduledEntity`] derivation.

use super::frames::InboundEvent;
use crate::directory::{AbsentRequest, Announcement, EntityRef, LoginNotice, Meeting, WarningDetail};
use crate::scheduler::{DerivationRules, EntityKey, RegistryOp, ScheduledEntity};
use chrono::{DateTime, Utc};

/// Notification to send immediately, with no scheduling side effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayAction {
    MeetingAnnounced { meeting: Meeting, edited: bool },
    MeetingCancelled(EntityRef),
    AnnouncementPosted(Announcement),
    AbsenceSubmitted(AbsentRequest),
    AbsenceReviewed(AbsentRequest),
    WarningPoints(WarningDetail),
    NewLogin(LoginNotice),
    /// Push guild roles/channels back over the stream of `kind`.
    InitialData { kind: String },
}

impl RelayAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MeetingAnnounced { .. } => "meeting_announced",
            Self::MeetingCancelled(_) => "meeting_cancelled",
            Self::AnnouncementPosted(_) => "announcement_posted",
            Self::AbsenceSubmitted(_) => "absence_submitted",
            Self::AbsenceReviewed(_) => "absence_reviewed",
            Self::WarningPoints(_) => "warning_points",
            Self::NewLogin(_) => "new_login",
            Self::InitialData { .. } => "initial_data",
        }
    }
}

/// Everything one event implies. Relays are issued before `ops` are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventPlan {
    pub relays: Vec<RelayAction>,
    pub ops: Vec<RegistryOp>,
}

impl EventPlan {
    pub fn is_empty(&self) -> bool {
        self.relays.is_empty() && self.ops.is_empty()
    }

    fn relay(action: RelayAction) -> Self {
        Self {
            relays: vec![action],
            ops: Vec::new(),
        }
    }
}

/// Map one event to its relays and registry operations.
pub fn plan(event: InboundEvent, now: DateTime<Utc>, rules: &DerivationRules) -> EventPlan {
    match event {
        InboundEvent::MeetingCreated(meeting) => announce_meeting(meeting, false, now, rules),
        InboundEvent::MeetingEdited(meeting) => announce_meeting(meeting, true, now, rules),
        InboundEvent::MeetingDeleted(meeting) => {
            let ops = vec![RegistryOp::CancelAll {
                key: EntityKey::meeting(meeting.id),
            }];
            // Deleting a meeting that already happened is housekeeping.
            let already_held = meeting.start_time.is_some_and(|start| start <= now);
            let relays = if already_held {
                Vec::new()
            } else {
                vec![RelayAction::MeetingCancelled(meeting)]
            };
            EventPlan { relays, ops }
        }
        InboundEvent::AnnouncementPinned(announcement)
        | InboundEvent::AnnouncementEdited(announcement) => EventPlan {
            relays: Vec::new(),
            ops: upsert_ops(&announcement, now, rules).unwrap_or_default(),
        },
        InboundEvent::AnnouncementAnnounced(announcement) => {
            EventPlan::relay(RelayAction::AnnouncementPosted(announcement))
        }
        InboundEvent::AnnouncementUnpinned(announcement)
        | InboundEvent::AnnouncementDeleted(announcement) => EventPlan {
            relays: Vec::new(),
            ops: vec![RegistryOp::CancelAll {
                key: EntityKey::announcement(announcement.id),
            }],
        },
        InboundEvent::AbsenceSubmitted(request) => {
            EventPlan::relay(RelayAction::AbsenceSubmitted(request))
        }
        InboundEvent::AbsenceReviewed(request) => {
            EventPlan::relay(RelayAction::AbsenceReviewed(request))
        }
        InboundEvent::WarningPointsAdded(detail) => {
            EventPlan::relay(RelayAction::WarningPoints(detail))
        }
        InboundEvent::NewLogin(notice) => EventPlan::relay(RelayAction::NewLogin(notice)),
        InboundEvent::InitialDataRequested { kind } => {
            EventPlan::relay(RelayAction::InitialData { kind })
        }
        InboundEvent::Unknown { .. } => EventPlan::default(),
    }
}

fn announce_meeting(
    meeting: Meeting,
    edited: bool,
    now: DateTime<Utc>,
    rules: &DerivationRules,
) -> EventPlan {
    match upsert_ops(&meeting, now, rules) {
        Some(ops) => EventPlan {
            relays: vec![RelayAction::MeetingAnnounced { meeting, edited }],
            ops,
        },
        None => EventPlan::default(),
    }
}

/// Replace the entity's task set with its derivation, or `None` when the
/// entity is already past and not pin-style.
pub fn upsert_ops<E: ScheduledEntity>(
    entity: &E,
    now: DateTime<Utc>,
    rules: &DerivationRules,
) -> Option<Vec<RegistryOp>> {
    if !entity.pin_style() && entity.is_past(now) {
        return None;
    }
    let key = entity.key();
    let mut ops = vec![RegistryOp::CancelAll { key }];
    ops.extend(
        entity
            .derive(now, rules)
            .into_iter()
            .map(|task| RegistryOp::Schedule { key, task }),
    );
    Some(ops)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::scheduler::TaskName;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 1, 50, 0).unwrap()
    }

    fn meeting(start: DateTime<Utc>) -> Meeting {
        Meeting {
            id: 42,
            name: "Kickoff".into(),
            description: String::new(),
            host: Some(7),
            start_time: start,
            end_time: None,
            location: "Lab".into(),
            can_absent: true,
            discord_notify_time: Some(300),
        }
    }

    fn scheduled(plan: &EventPlan) -> Vec<(TaskName, DateTime<Utc>)> {
        plan.ops
            .iter()
            .filter_map(|op| match op {
                RegistryOp::Schedule { task, .. } => Some((task.name, task.fire_time)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn past_meeting_create_is_skipped_entirely() {
        let plan = plan(
            InboundEvent::MeetingCreated(meeting(now() - Duration::minutes(1))),
            now(),
            &DerivationRules::default(),
        );
        assert!(plan.is_empty());
    }

    #[test]
    fn meeting_edit_relays_and_replaces_tasks() {
        let start = now() + Duration::minutes(30);
        let plan = plan(
            InboundEvent::MeetingEdited(meeting(start)),
            now(),
            &DerivationRules::default(),
        );
        assert!(matches!(
            plan.relays.as_slice(),
            [RelayAction::MeetingAnnounced { edited: true, .. }]
        ));
        assert_eq!(
            plan.ops.first(),
            Some(&RegistryOp::CancelAll {
                key: EntityKey::meeting(42)
            })
        );
        assert_eq!(
            scheduled(&plan),
            vec![
                (TaskName::Notify, start - Duration::minutes(5)),
                (TaskName::Start, start)
            ]
        );
    }

    #[test]
    fn deleting_a_held_meeting_cancels_silently() {
        let plan = plan(
            InboundEvent::MeetingDeleted(EntityRef {
                id: 42,
                name: None,
                start_time: Some(now() - Duration::hours(1)),
            }),
            now(),
            &DerivationRules::default(),
        );
        assert!(plan.relays.is_empty());
        assert_eq!(plan.ops.len(), 1);
    }

    #[test]
    fn pin_with_past_expiry_still_schedules_unpin() {
        let ann = Announcement {
            id: 5,
            title: "Robot shipped".into(),
            content: String::new(),
            pin_until: Some(now() - Duration::minutes(3)),
            is_pinned: Some(true),
        };
        let plan = plan(
            InboundEvent::AnnouncementEdited(ann),
            now(),
            &DerivationRules::default(),
        );
        assert!(plan.relays.is_empty());
        assert_eq!(
            scheduled(&plan),
            vec![(TaskName::Unpin, now() - Duration::minutes(3))]
        );
    }

    #[test]
    fn edit_that_unpins_only_cancels() {
        let ann = Announcement {
            id: 5,
            title: String::new(),
            content: String::new(),
            pin_until: Some(now() + Duration::days(1)),
            is_pinned: Some(false),
        };
        let plan = plan(
            InboundEvent::AnnouncementEdited(ann),
            now(),
            &DerivationRules::default(),
        );
        assert_eq!(
            plan.ops,
            vec![RegistryOp::CancelAll {
                key: EntityKey::announcement(5)
            }]
        );
    }

    #[test]
    fn sub_resource_events_only_relay() {
        let plan = plan(
            InboundEvent::AbsenceReviewed(AbsentRequest {
                id: 1,
                meeting: 42,
                member: 3,
                reason: "exam".into(),
                status: crate::directory::AbsentStatus::Approved,
                reviewer: Some(9),
                reviewer_comment: None,
            }),
            now(),
            &DerivationRules::default(),
        );
        assert!(plan.ops.is_empty());
        assert_eq!(plan.relays.len(), 1);
        assert_eq!(plan.relays[0].name(), "absence_reviewed");
    }

    #[test]
    fn unknown_event_maps_to_nothing() {
        let plan = plan(
            InboundEvent::Unknown {
                kind: "robot.explode".into(),
            },
            now(),
            &DerivationRules::default(),
        );
        assert!(plan.is_empty());
    }
}
