//! Scheduler loop.
//!
//! A single tokio task owns the [`TimerRegistry`]. Everything else talks to it
//! through a cloneable [`SchedulerHandle`], so registry mutations are
//! serialized and each message is applied without an intervening await.
//! Commands are drained before due timers are checked; a cancel that reaches
//! the loop before the fire check therefore always wins.

use super::registry::TimerRegistry;
use super::tasks::{
    DeferredAction, EntityKey, EntityKind, PlannedTask, RegistryOp, Task, TaskEntry, TaskName,
};
use crate::clock::{self, Clock};
use crate::config::SchedulerConfig;
use crate::error::{BotError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Performs the side effect of a fired task.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, key: EntityKey, name: TaskName, action: DeferredAction) -> Result<()>;
}

/// Tasks for one fetched entity, as computed by a reload.
#[derive(Debug, Clone)]
pub struct ReloadEntry {
    pub key: EntityKey,
    pub tasks: Vec<PlannedTask>,
}

enum SchedulerCommand {
    Apply {
        ops: Vec<RegistryOp>,
        done: oneshot::Sender<()>,
    },
    BeginReload {
        reply: oneshot::Sender<u64>,
    },
    Replace {
        kinds: Vec<EntityKind>,
        entries: Vec<ReloadEntry>,
        since: u64,
        reply: oneshot::Sender<Vec<EntityKey>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<TaskEntry>>,
    },
}

/// Cloneable front end of the scheduler loop.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<SchedulerCommand>,
}

fn loop_gone() -> BotError {
    BotError::Scheduler("scheduler loop is not running".into())
}

impl SchedulerHandle {
    /// Apply mapper output in order, as one unit.
    pub async fn apply(&self, ops: Vec<RegistryOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let (done, rx) = oneshot::channel();
        self.tx
            .send(SchedulerCommand::Apply { ops, done })
            .map_err(|_| loop_gone())?;
        rx.await.map_err(|_| loop_gone())
    }

    /// Mark the start of a reload; returns the mutation epoch to pass to
    /// [`replace`](Self::replace).
    pub async fn begin_reload(&self) -> Result<u64> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SchedulerCommand::BeginReload { reply })
            .map_err(|_| loop_gone())?;
        rx.await.map_err(|_| loop_gone())
    }

    /// Atomically swap the tasks of `kinds` for `entries`.
    ///
    /// Entities mutated by live events since `since` keep their current tasks;
    /// their keys are returned.
    pub async fn replace(
        &self,
        kinds: Vec<EntityKind>,
        entries: Vec<ReloadEntry>,
        since: u64,
    ) -> Result<Vec<EntityKey>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SchedulerCommand::Replace {
                kinds,
                entries,
                since,
                reply,
            })
            .map_err(|_| loop_gone())?;
        rx.await.map_err(|_| loop_gone())
    }

    /// Listing of every scheduled task.
    pub async fn snapshot(&self) -> Result<Vec<TaskEntry>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SchedulerCommand::Snapshot { reply })
            .map_err(|_| loop_gone())?;
        rx.await.map_err(|_| loop_gone())
    }
}

/// Owner of the timer registry.
pub struct Scheduler {
    registry: TimerRegistry<DeferredAction>,
    rx: mpsc::UnboundedReceiver<SchedulerCommand>,
    clock: Arc<dyn Clock>,
    executor: Arc<dyn ActionExecutor>,
    /// Maximum lateness of a reminder. Fires are one-shot at their deadline,
    /// so only late fires are guarded; there is no early-fire check.
    staleness_window: chrono::Duration,
    action_timeout: Duration,
    /// Mutation epoch, bumped by every applied event.
    epoch: u64,
    /// Epoch of the last live mutation per entity.
    touched: HashMap<EntityKey, u64>,
    in_flight: JoinSet<()>,
}

impl Scheduler {
    pub fn new(
        config: &SchedulerConfig,
        clock: Arc<dyn Clock>,
        executor: Arc<dyn ActionExecutor>,
    ) -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let staleness_secs = i64::try_from(config.staleness_window_secs).unwrap_or(i64::MAX / 1000);
        let scheduler = Self {
            registry: TimerRegistry::new(),
            rx,
            clock,
            executor,
            staleness_window: chrono::Duration::seconds(staleness_secs.min(i64::MAX / 1000)),
            action_timeout: config.action_timeout(),
            epoch: 0,
            touched: HashMap::new(),
            in_flight: JoinSet::new(),
        };
        (scheduler, SchedulerHandle { tx })
    }

    /// Start the scheduler loop. It ends once every handle is dropped.
    pub fn run(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run_loop())
    }

    async fn run_loop(mut self) {
        info!("scheduler started");
        loop {
            let wait = self
                .registry
                .next_deadline()
                .map(|at| clock::until(self.clock.now(), at));

            tokio::select! {
                biased;

                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    if let Err(e) = joined {
                        warn!("deferred action task panicked: {e}");
                    }
                }
                () = sleep_or_forever(wait) => self.fire_due(),
            }
        }
        let pending = self.registry.cancel_every();
        info!(pending, "scheduler stopped");
        while self.in_flight.join_next().await.is_some() {}
    }

    fn handle(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::Apply { ops, done } => {
                self.epoch += 1;
                for op in ops {
                    self.touched.insert(op.key(), self.epoch);
                    self.apply_op(op);
                }
                let _ = done.send(());
            }
            SchedulerCommand::BeginReload { reply } => {
                let _ = reply.send(self.epoch);
            }
            SchedulerCommand::Replace {
                kinds,
                entries,
                since,
                reply,
            } => {
                let preserved = self.replace(&kinds, entries, since);
                let _ = reply.send(preserved);
            }
            SchedulerCommand::Snapshot { reply } => {
                let _ = reply.send(self.registry.snapshot());
            }
        }
    }

    fn apply_op(&mut self, op: RegistryOp) {
        match op {
            RegistryOp::Schedule { key, task } => {
                self.registry
                    .schedule(key, task.name, task.fire_time, task.action);
            }
            RegistryOp::Cancel { key, name } => {
                self.registry.cancel(key, name);
            }
            RegistryOp::CancelAll { key } => {
                self.registry.cancel_all(key);
            }
        }
    }

    fn replace(&mut self, kinds: &[EntityKind], entries: Vec<ReloadEntry>, since: u64) -> Vec<EntityKey> {
        let preserved: HashSet<EntityKey> = self
            .touched
            .iter()
            .filter(|(key, epoch)| **epoch > since && kinds.contains(&key.kind))
            .map(|(key, _)| *key)
            .collect();
        // Only one reload runs at a time; older marks are no longer needed.
        self.touched.retain(|_, epoch| *epoch > since);

        let full = EntityKind::ALL.iter().all(|k| kinds.contains(k));
        let cleared = if full && preserved.is_empty() {
            self.registry.cancel_every()
        } else {
            let mut cleared = 0;
            for kind in kinds {
                for key in self.registry.keys_of(*kind) {
                    if !preserved.contains(&key) {
                        cleared += self.registry.cancel_all(key).len();
                    }
                }
            }
            cleared
        };

        let mut scheduled = 0;
        for entry in entries {
            if preserved.contains(&entry.key) || !kinds.contains(&entry.key.kind) {
                continue;
            }
            for task in entry.tasks {
                self.registry
                    .schedule(entry.key, task.name, task.fire_time, task.action);
                scheduled += 1;
            }
        }
        info!(
            cleared,
            scheduled,
            preserved = preserved.len(),
            "registry rebuilt"
        );

        let mut preserved: Vec<EntityKey> = preserved.into_iter().collect();
        preserved.sort();
        preserved
    }

    fn fire_due(&mut self) {
        let now = self.clock.now();
        for task in self.registry.take_due(now) {
            let lateness = now - task.fire_time;
            if task.action.is_reminder() && lateness > self.staleness_window {
                warn!(
                    entity = %task.key,
                    task = %task.name,
                    late_secs = lateness.num_seconds(),
                    "dropping stale reminder"
                );
                continue;
            }
            self.spawn_action(task);
        }
    }

    fn spawn_action(&mut self, task: Task<DeferredAction>) {
        let executor = Arc::clone(&self.executor);
        let timeout = self.action_timeout;
        let Task {
            key, name, action, ..
        } = task;
        debug!(entity = %key, task = %name, "task fired");
        self.in_flight.spawn(async move {
            match tokio::time::timeout(timeout, executor.execute(key, name, action)).await {
                Ok(Ok(())) => debug!(entity = %key, task = %name, "deferred action done"),
                Ok(Err(e)) => warn!(entity = %key, task = %name, "deferred action failed: {e}"),
                Err(_) => warn!(entity = %key, task = %name, ?timeout, "deferred action timed out"),
            }
        });
    }
}

async fn sleep_or_forever(wait: Option<Duration>) {
    match wait {
        Some(wait) => tokio::time::sleep(wait).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::directory::Meeting;
    use crate::test_utils::{PausedClock, RecordingExecutor};
    use chrono::{DateTime, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 1, 50, 0).unwrap()
    }

    fn meeting(id: i64) -> Meeting {
        Meeting {
            id,
            name: "Sync".into(),
            description: String::new(),
            host: None,
            start_time: t0() + chrono::Duration::minutes(10),
            end_time: None,
            location: String::new(),
            can_absent: false,
            discord_notify_time: None,
        }
    }

    fn start(
        executor: &Arc<RecordingExecutor>,
        clock: Arc<PausedClock>,
    ) -> (SchedulerHandle, tokio::task::JoinHandle<()>) {
        let (scheduler, handle) =
            Scheduler::new(&SchedulerConfig::default(), clock, executor.clone());
        (handle, scheduler.run())
    }

    fn schedule(key: EntityKey, name: TaskName, at: DateTime<Utc>, m: &Meeting) -> RegistryOp {
        RegistryOp::Schedule {
            key,
            task: PlannedTask {
                name,
                fire_time: at,
                action: DeferredAction::MeetingStart(m.clone()),
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn due_task_fires_once_and_is_removed() {
        let executor = Arc::new(RecordingExecutor::default());
        let clock = Arc::new(PausedClock::starting_at(t0()));
        let (handle, _join) = start(&executor, clock);
        let key = EntityKey::meeting(1);
        handle
            .apply(vec![schedule(key, TaskName::Start, t0() + chrono::Duration::seconds(30), &meeting(1))])
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(executor.fired().is_empty());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(executor.fired(), vec![(key, TaskName::Start)]);
        assert!(handle.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_deadline_prevents_fire() {
        let executor = Arc::new(RecordingExecutor::default());
        let clock = Arc::new(PausedClock::starting_at(t0()));
        let (handle, _join) = start(&executor, clock);
        let key = EntityKey::meeting(2);
        handle
            .apply(vec![schedule(key, TaskName::Start, t0() + chrono::Duration::seconds(5), &meeting(2))])
            .await
            .unwrap();
        handle.apply(vec![RegistryOp::CancelAll { key }]).await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(executor.fired().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn replace_preserves_entities_touched_mid_reload() {
        let executor = Arc::new(RecordingExecutor::default());
        let clock = Arc::new(PausedClock::starting_at(t0()));
        let (handle, _join) = start(&executor, clock);
        let live = EntityKey::meeting(1);
        let stale = EntityKey::meeting(2);
        let far = t0() + chrono::Duration::hours(1);
        handle
            .apply(vec![schedule(stale, TaskName::Start, far, &meeting(2))])
            .await
            .unwrap();

        let since = handle.begin_reload().await.unwrap();
        handle
            .apply(vec![schedule(live, TaskName::Start, far, &meeting(1))])
            .await
            .unwrap();

        let entries = vec![ReloadEntry {
            key: live,
            tasks: vec![PlannedTask {
                name: TaskName::Notify,
                fire_time: far,
                action: DeferredAction::MeetingReminder(meeting(1)),
            }],
        }];
        let preserved = handle
            .replace(vec![EntityKind::Meeting], entries, since)
            .await
            .unwrap();
        assert_eq!(preserved, vec![live]);

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].key, live);
        assert_eq!(snapshot[0].name, TaskName::Start);
    }
}
