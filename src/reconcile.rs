//! Registry reconciliation against the panel.
//!
//! A reload fetches every live entity of the requested kinds, then swaps the
//! registry contents for those kinds in one scheduler message. Entities whose
//! due time has passed get their expire action run straight away instead of a
//! task. If any fetch fails the registry is left exactly as it was.

use crate::clock::Clock;
use crate::directory::Directory;
use crate::error::{BotError, Result};
use crate::scheduler::{
    ActionExecutor, DeferredAction, DerivationRules, EntityKey, EntityKind, ReloadEntry,
    ScheduledEntity, SchedulerHandle,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Outcome of one reload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadReport {
    pub kinds: Vec<EntityKind>,
    /// Entities fetched from the panel.
    pub fetched: usize,
    /// Tasks registered by the rebuild.
    pub scheduled: usize,
    /// Past-due entities whose expire action ran.
    pub expired: usize,
    /// Expire actions that failed or timed out.
    pub failed_expirations: usize,
    /// Entities changed by live events while the reload ran; left untouched.
    pub preserved: Vec<EntityKey>,
}

impl ReloadReport {
    pub fn summary(&self) -> String {
        format!(
            "fetched {} entities, scheduled {} tasks, expired {} ({} failed), kept {} live updates",
            self.fetched,
            self.scheduled,
            self.expired,
            self.failed_expirations,
            self.preserved.len()
        )
    }
}

/// Runs reloads, one at a time.
pub struct Reconciler {
    directory: Arc<dyn Directory>,
    scheduler: SchedulerHandle,
    executor: Arc<dyn ActionExecutor>,
    clock: Arc<dyn Clock>,
    rules: DerivationRules,
    action_timeout: Duration,
    gate: Mutex<()>,
}

/// Entities split by what the reload does with them.
#[derive(Default)]
struct Plan {
    entries: Vec<ReloadEntry>,
    expired: Vec<(EntityKey, DeferredAction)>,
    fetched: usize,
}

impl Plan {
    fn add<E: ScheduledEntity>(&mut self, entity: &E, now: DateTime<Utc>, rules: &DerivationRules) {
        self.fetched += 1;
        let key = entity.key();
        if entity.is_past(now) {
            match entity.expire_action() {
                Some(action) => self.expired.push((key, action)),
                None => debug!(entity = %key, "past entity has nothing to expire"),
            }
            return;
        }
        let tasks = entity.derive(now, rules);
        if !tasks.is_empty() {
            self.entries.push(ReloadEntry { key, tasks });
        }
    }
}

impl Reconciler {
    pub fn new(
        directory: Arc<dyn Directory>,
        scheduler: SchedulerHandle,
        executor: Arc<dyn ActionExecutor>,
        clock: Arc<dyn Clock>,
        rules: DerivationRules,
        action_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            scheduler,
            executor,
            clock,
            rules,
            action_timeout,
            gate: Mutex::new(()),
        }
    }

    /// Reload every entity kind.
    pub async fn reload_all(&self) -> Result<ReloadReport> {
        self.reload(&EntityKind::ALL).await
    }

    /// Rebuild the tasks of `kinds` from the panel.
    ///
    /// # Errors
    ///
    /// Returns the directory error when a fetch fails; nothing has been
    /// changed in that case. `Scheduler` when the scheduler loop is gone.
    pub async fn reload(&self, kinds: &[EntityKind]) -> Result<ReloadReport> {
        let _exclusive = self.gate.lock().await;
        let since = self.scheduler.begin_reload().await?;

        let mut plan = Plan::default();
        let outcome = self.fetch_into(kinds, &mut plan).await;
        if let Err(e) = outcome {
            error!(kinds = ?kinds, "reload aborted, registry unchanged: {e}");
            return Err(e);
        }

        let scheduled_by_key: Vec<(EntityKey, usize)> =
            plan.entries.iter().map(|e| (e.key, e.tasks.len())).collect();
        let preserved = self
            .scheduler
            .replace(kinds.to_vec(), plan.entries, since)
            .await?;
        let scheduled = scheduled_by_key
            .iter()
            .filter(|(key, _)| !preserved.contains(key))
            .map(|(_, n)| n)
            .sum();

        let mut report = ReloadReport {
            kinds: kinds.to_vec(),
            fetched: plan.fetched,
            scheduled,
            ..ReloadReport::default()
        };
        for (key, action) in plan.expired {
            if preserved.contains(&key) {
                continue;
            }
            report.expired += 1;
            if let Err(e) = self.expire(key, action).await {
                report.failed_expirations += 1;
                warn!(entity = %key, "expire action failed: {e}");
            }
        }
        report.preserved = preserved;
        info!(kinds = ?kinds, "reload finished: {}", report.summary());
        Ok(report)
    }

    async fn fetch_into(&self, kinds: &[EntityKind], plan: &mut Plan) -> Result<()> {
        for kind in kinds {
            match kind {
                EntityKind::Meeting => {
                    let meetings = self.directory.list_upcoming_meetings().await?;
                    let now = self.clock.now();
                    for meeting in &meetings {
                        plan.add(meeting, now, &self.rules);
                    }
                }
                EntityKind::Announcement => {
                    let announcements = self.directory.list_pinned_announcements().await?;
                    let now = self.clock.now();
                    for announcement in &announcements {
                        plan.add(announcement, now, &self.rules);
                    }
                }
            }
        }
        Ok(())
    }

    async fn expire(&self, key: EntityKey, action: DeferredAction) -> Result<()> {
        let name = action.task_name();
        tokio::time::timeout(self.action_timeout, self.executor.execute(key, name, action))
            .await
            .map_err(|_| BotError::Timeout(format!("expiring {key} exceeded {:?}", self.action_timeout)))?
    }
}
