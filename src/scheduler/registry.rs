//! Timer registry: per-entity, named, cancellable deferred tasks.
//!
//! Tasks live in a two-level map (entity, then task name) so that at most one
//! task exists per `(entity, name)`. A min-heap of deadlines orders firing;
//! heap entries are invalidated lazily by sequence number, so replacing or
//! cancelling a task never has to search the heap.

use super::tasks::{EntityKey, EntityKind, Task, TaskEntry, TaskName, TaskStatus};
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use tracing::debug;

/// Heap slack tolerated before stale deadlines are compacted away.
const HEAP_SLACK: usize = 64;

#[derive(Debug)]
struct Slot<A> {
    seq: u64,
    fire_time: DateTime<Utc>,
    action: A,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Deadline {
    fire_time: DateTime<Utc>,
    seq: u64,
    key: EntityKey,
    name: TaskName,
}

/// Owned timer registry. Mutated only by its owner.
#[derive(Debug)]
pub struct TimerRegistry<A> {
    entities: HashMap<EntityKey, HashMap<TaskName, Slot<A>>>,
    deadlines: BinaryHeap<Reverse<Deadline>>,
    next_seq: u64,
    live: usize,
}

impl<A> Default for TimerRegistry<A> {
    fn default() -> Self {
        Self {
            entities: HashMap::new(),
            deadlines: BinaryHeap::new(),
            next_seq: 0,
            live: 0,
        }
    }
}

impl<A> TimerRegistry<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task, cancelling any existing task at `(key, name)` first.
    pub fn schedule(
        &mut self,
        key: EntityKey,
        name: TaskName,
        fire_time: DateTime<Utc>,
        action: A,
    ) {
        if self.cancel(key, name).is_some() {
            debug!(entity = %key, task = %name, "replacing scheduled task");
        }
        self.next_seq += 1;
        let seq = self.next_seq;
        self.entities.entry(key).or_default().insert(
            name,
            Slot {
                seq,
                fire_time,
                action,
            },
        );
        self.live += 1;
        self.deadlines.push(Reverse(Deadline {
            fire_time,
            seq,
            key,
            name,
        }));
        self.compact_if_needed();
        debug!(entity = %key, task = %name, %fire_time, "task scheduled");
    }

    /// Cancel and remove one task. No-op when absent.
    pub fn cancel(&mut self, key: EntityKey, name: TaskName) -> Option<Task<A>> {
        let tasks = self.entities.get_mut(&key)?;
        let slot = tasks.remove(&name)?;
        if tasks.is_empty() {
            self.entities.remove(&key);
        }
        self.live -= 1;
        Some(into_task(key, name, slot, TaskStatus::Cancelled))
    }

    /// Cancel every task of one entity and drop its entry.
    pub fn cancel_all(&mut self, key: EntityKey) -> Vec<Task<A>> {
        let Some(tasks) = self.entities.remove(&key) else {
            return Vec::new();
        };
        self.live -= tasks.len();
        let mut cancelled: Vec<Task<A>> = tasks
            .into_iter()
            .map(|(name, slot)| into_task(key, name, slot, TaskStatus::Cancelled))
            .collect();
        cancelled.sort_by_key(|t| t.name);
        if !cancelled.is_empty() {
            debug!(entity = %key, count = cancelled.len(), "entity tasks cancelled");
        }
        cancelled
    }

    /// Cancel every task of every entity of one kind.
    pub fn cancel_kind(&mut self, kind: EntityKind) -> usize {
        let keys: Vec<EntityKey> = self.entities.keys().filter(|k| k.kind == kind).copied().collect();
        keys.into_iter().map(|key| self.cancel_all(key).len()).sum()
    }

    /// Cancel and clear the whole registry.
    pub fn cancel_every(&mut self) -> usize {
        let count = self.live;
        self.entities.clear();
        self.deadlines.clear();
        self.live = 0;
        debug!(count, "registry cleared");
        count
    }

    /// Remove and return every task due at `now`, in fire-time order, marked
    /// [`TaskStatus::Fired`].
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<Task<A>> {
        let mut due = Vec::new();
        while let Some(Reverse(head)) = self.deadlines.peek() {
            if head.fire_time > now {
                break;
            }
            let Some(Reverse(deadline)) = self.deadlines.pop() else {
                break;
            };
            if !self.is_current(&deadline) {
                continue;
            }
            let Some(tasks) = self.entities.get_mut(&deadline.key) else {
                continue;
            };
            let Some(slot) = tasks.remove(&deadline.name) else {
                continue;
            };
            if tasks.is_empty() {
                self.entities.remove(&deadline.key);
            }
            self.live -= 1;
            due.push(into_task(deadline.key, deadline.name, slot, TaskStatus::Fired));
        }
        due
    }

    /// Earliest pending fire time, discarding stale heap heads on the way.
    pub fn next_deadline(&mut self) -> Option<DateTime<Utc>> {
        while let Some(Reverse(head)) = self.deadlines.peek() {
            if self.is_current(head) {
                return Some(head.fire_time);
            }
            self.deadlines.pop();
        }
        None
    }

    pub fn has_entity(&self, key: EntityKey) -> bool {
        self.entities.contains_key(&key)
    }

    /// Entities with at least one task, of the given kind.
    pub fn keys_of(&self, kind: EntityKind) -> Vec<EntityKey> {
        let mut keys: Vec<EntityKey> = self.entities.keys().filter(|k| k.kind == kind).copied().collect();
        keys.sort();
        keys
    }

    /// Sorted listing of every scheduled task.
    pub fn snapshot(&self) -> Vec<TaskEntry> {
        let mut entries: Vec<TaskEntry> = self
            .entities
            .iter()
            .flat_map(|(key, tasks)| {
                tasks.iter().map(|(name, slot)| TaskEntry {
                    key: *key,
                    name: *name,
                    fire_time: slot.fire_time,
                })
            })
            .collect();
        entries.sort();
        entries
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    fn is_current(&self, deadline: &Deadline) -> bool {
        self.entities
            .get(&deadline.key)
            .and_then(|tasks| tasks.get(&deadline.name))
            .is_some_and(|slot| slot.seq == deadline.seq)
    }

    fn compact_if_needed(&mut self) {
        if self.deadlines.len() <= self.live * 2 + HEAP_SLACK {
            return;
        }
        let deadlines = std::mem::take(&mut self.deadlines);
        self.deadlines = deadlines
            .into_iter()
            .filter(|Reverse(d)| self.is_current(d))
            .collect();
    }
}

fn into_task<A>(key: EntityKey, name: TaskName, slot: Slot<A>, status: TaskStatus) -> Task<A> {
    Task {
        key,
        name,
        fire_time: slot.fire_time,
        action: slot.action,
        status,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 1, 50, 0).unwrap()
    }

    #[test]
    fn rescheduling_replaces_instead_of_duplicating() {
        let mut reg = TimerRegistry::new();
        let key = EntityKey::meeting(42);
        reg.schedule(key, TaskName::Notify, t0() + Duration::minutes(5), "first");
        reg.schedule(key, TaskName::Start, t0() + Duration::minutes(10), "first");
        reg.schedule(key, TaskName::Notify, t0() + Duration::minutes(6), "second");
        reg.schedule(key, TaskName::Start, t0() + Duration::minutes(11), "second");

        assert_eq!(reg.len(), 2);
        let due = reg.take_due(t0() + Duration::hours(1));
        assert_eq!(due.len(), 2);
        assert!(due.iter().all(|t| t.action == "second"));
        assert!(due.iter().all(|t| t.status == TaskStatus::Fired));
        assert!(reg.is_empty());
    }

    #[test]
    fn cancel_all_prunes_entity() {
        let mut reg = TimerRegistry::new();
        let key = EntityKey::meeting(7);
        reg.schedule(key, TaskName::Notify, t0(), ());
        reg.schedule(key, TaskName::Start, t0(), ());
        let cancelled = reg.cancel_all(key);
        assert_eq!(cancelled.len(), 2);
        assert!(cancelled.iter().all(|t| t.status == TaskStatus::Cancelled));
        assert!(!reg.has_entity(key));
        assert!(reg.take_due(t0() + Duration::days(1)).is_empty());
        assert!(reg.cancel_all(key).is_empty());
    }

    #[test]
    fn cancelling_last_task_prunes_inner_map() {
        let mut reg = TimerRegistry::new();
        let key = EntityKey::announcement(3);
        reg.schedule(key, TaskName::Unpin, t0(), ());
        assert!(reg.cancel(key, TaskName::Unpin).is_some());
        assert!(reg.cancel(key, TaskName::Unpin).is_none());
        assert!(!reg.has_entity(key));
    }

    #[test]
    fn take_due_only_returns_due_tasks_in_order() {
        let mut reg = TimerRegistry::new();
        reg.schedule(EntityKey::meeting(1), TaskName::Start, t0() + Duration::seconds(30), 1);
        reg.schedule(EntityKey::meeting(2), TaskName::Start, t0() + Duration::seconds(10), 2);
        reg.schedule(EntityKey::meeting(3), TaskName::Start, t0() + Duration::seconds(90), 3);

        let due = reg.take_due(t0() + Duration::seconds(30));
        assert_eq!(due.iter().map(|t| t.action).collect::<Vec<_>>(), vec![2, 1]);
        assert_eq!(reg.next_deadline(), Some(t0() + Duration::seconds(90)));
        assert!(reg.has_entity(EntityKey::meeting(3)));
        assert!(!reg.has_entity(EntityKey::meeting(1)));
    }

    #[test]
    fn next_deadline_skips_replaced_entries() {
        let mut reg = TimerRegistry::new();
        let key = EntityKey::meeting(1);
        reg.schedule(key, TaskName::Notify, t0(), ());
        reg.schedule(key, TaskName::Notify, t0() + Duration::minutes(1), ());
        assert_eq!(reg.next_deadline(), Some(t0() + Duration::minutes(1)));
        reg.cancel(key, TaskName::Notify);
        assert_eq!(reg.next_deadline(), None);
    }

    #[test]
    fn cancel_kind_leaves_other_kinds() {
        let mut reg = TimerRegistry::new();
        reg.schedule(EntityKey::meeting(1), TaskName::Start, t0(), ());
        reg.schedule(EntityKey::meeting(2), TaskName::Notify, t0(), ());
        reg.schedule(EntityKey::announcement(1), TaskName::Unpin, t0(), ());
        assert_eq!(reg.cancel_kind(EntityKind::Meeting), 2);
        assert_eq!(reg.keys_of(EntityKind::Announcement), vec![EntityKey::announcement(1)]);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn heap_is_compacted_under_churn() {
        let mut reg = TimerRegistry::new();
        let key = EntityKey::meeting(1);
        for i in 0..1000 {
            reg.schedule(key, TaskName::Notify, t0() + Duration::seconds(i), ());
        }
        assert_eq!(reg.len(), 1);
        assert!(reg.deadlines.len() <= 2 + HEAP_SLACK + 1);
        assert_eq!(reg.snapshot().len(), 1);
    }
}
