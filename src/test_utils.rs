//! In-process fakes shared by unit and integration tests.
//!
//! Integration tests reach these through the `test-utils` feature.

use crate::chat::{ChatPlatform, GuildChannel, GuildRole, OutboundMessage};
use crate::clock::Clock;
use crate::directory::{
    AbsentRequest, AbsentStatus, Announcement, Directory, Meeting, Member, NewAbsentRequest,
};
use crate::error::{BotError, Result};
use crate::scheduler::{ActionExecutor, DeferredAction, EntityKey, TaskName};
use crate::stream::{ConnectionStatus, StreamOutbox};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *lock(&self.now) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = lock(&self.now);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

/// Wall clock driven by tokio's (pausable) timer, so `tokio::time::advance`
/// and auto-advance under `start_paused` move it too.
#[derive(Debug)]
pub struct PausedClock {
    wall_origin: DateTime<Utc>,
    origin: tokio::time::Instant,
}

impl PausedClock {
    pub fn starting_at(wall_origin: DateTime<Utc>) -> Self {
        Self {
            wall_origin,
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Clock for PausedClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = tokio::time::Instant::now().duration_since(self.origin);
        self.wall_origin
            + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
    }
}

#[derive(Debug, Default)]
struct ChatLog {
    channel_posts: Vec<(u64, OutboundMessage)>,
    directs: Vec<(u64, OutboundMessage)>,
    refused: HashSet<u64>,
    fail_channel_sends: bool,
    roles: Vec<GuildRole>,
    channels: Vec<GuildChannel>,
}

/// Chat platform that records every send.
#[derive(Debug, Default)]
pub struct RecordingChat {
    log: Mutex<ChatLog>,
}

impl RecordingChat {
    /// Make DMs to `user_id` fail as if the user blocked them.
    pub fn refuse_direct(&self, user_id: u64) {
        lock(&self.log).refused.insert(user_id);
    }

    /// Make every channel post fail with `RemoteUnavailable`.
    pub fn fail_channel_sends(&self, fail: bool) {
        lock(&self.log).fail_channel_sends = fail;
    }

    pub fn set_guild(&self, roles: Vec<GuildRole>, channels: Vec<GuildChannel>) {
        let mut log = lock(&self.log);
        log.roles = roles;
        log.channels = channels;
    }

    /// Successful channel posts, in order.
    pub fn channel_posts(&self) -> Vec<(u64, OutboundMessage)> {
        lock(&self.log).channel_posts.clone()
    }

    /// Successful DMs, in order.
    pub fn directs(&self) -> Vec<(u64, OutboundMessage)> {
        lock(&self.log).directs.clone()
    }
}

#[async_trait]
impl ChatPlatform for RecordingChat {
    async fn send_to_channel(&self, channel_id: u64, message: &OutboundMessage) -> Result<()> {
        let mut log = lock(&self.log);
        if log.fail_channel_sends {
            return Err(BotError::RemoteUnavailable(format!(
                "channel {channel_id} unavailable"
            )));
        }
        log.channel_posts.push((channel_id, message.clone()));
        Ok(())
    }

    async fn send_direct(&self, user_id: u64, message: &OutboundMessage) -> Result<()> {
        let mut log = lock(&self.log);
        if log.refused.contains(&user_id) {
            return Err(BotError::NotificationDelivery(format!(
                "user {user_id} does not accept direct messages"
            )));
        }
        log.directs.push((user_id, message.clone()));
        Ok(())
    }

    async fn list_roles(&self) -> Result<Vec<GuildRole>> {
        Ok(lock(&self.log).roles.clone())
    }

    async fn list_channels(&self) -> Result<Vec<GuildChannel>> {
        Ok(lock(&self.log).channels.clone())
    }
}

#[derive(Debug, Default)]
struct DirectoryData {
    members: BTreeMap<i64, Member>,
    meetings: BTreeMap<i64, Meeting>,
    announcements: BTreeMap<i64, Announcement>,
    absent_requests: Vec<AbsentRequest>,
    unavailable: bool,
}

/// Directory backed by in-memory records.
///
/// Every stored meeting counts as upcoming and every stored announcement as
/// pinned; the caller decides what is past.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    data: Mutex<DirectoryData>,
}

impl StaticDirectory {
    pub fn add_member(&self, member: Member) {
        lock(&self.data).members.insert(member.id, member);
    }

    pub fn add_meeting(&self, meeting: Meeting) {
        lock(&self.data).meetings.insert(meeting.id, meeting);
    }

    pub fn remove_meeting(&self, id: i64) {
        lock(&self.data).meetings.remove(&id);
    }

    pub fn add_announcement(&self, announcement: Announcement) {
        lock(&self.data)
            .announcements
            .insert(announcement.id, announcement);
    }

    pub fn remove_announcement(&self, id: i64) {
        lock(&self.data).announcements.remove(&id);
    }

    pub fn add_absent_request(&self, request: AbsentRequest) {
        lock(&self.data).absent_requests.push(request);
    }

    pub fn absent_requests(&self) -> Vec<AbsentRequest> {
        lock(&self.data).absent_requests.clone()
    }

    /// Make every call fail with `RemoteUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        lock(&self.data).unavailable = unavailable;
    }

    fn data(&self) -> Result<MutexGuard<'_, DirectoryData>> {
        let data = lock(&self.data);
        if data.unavailable {
            return Err(BotError::RemoteUnavailable("503 Service Unavailable".into()));
        }
        Ok(data)
    }
}

fn not_found(what: &str, id: i64) -> BotError {
    BotError::RemoteUnavailable(format!("{what} {id}: 404 Not Found"))
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn get_member(&self, id: i64) -> Result<Member> {
        self.data()?
            .members
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("member", id))
    }

    async fn search_members_by_discord(&self, discord_id: u64) -> Result<Vec<Member>> {
        Ok(self
            .data()?
            .members
            .values()
            .filter(|m| m.discord_id == discord_id)
            .cloned()
            .collect())
    }

    async fn list_warned_members(&self) -> Result<Vec<Member>> {
        Ok(self
            .data()?
            .members
            .values()
            .filter(|m| m.warning_points != 0)
            .cloned()
            .collect())
    }

    async fn index_members(&self) -> Result<usize> {
        Ok(self.data()?.members.len())
    }

    async fn get_meeting(&self, id: i64) -> Result<Meeting> {
        self.data()?
            .meetings
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("meeting", id))
    }

    async fn list_upcoming_meetings(&self) -> Result<Vec<Meeting>> {
        Ok(self.data()?.meetings.values().cloned().collect())
    }

    async fn list_pinned_announcements(&self) -> Result<Vec<Announcement>> {
        Ok(self.data()?.announcements.values().cloned().collect())
    }

    async fn list_absent_requests(&self, meeting_id: i64) -> Result<Vec<AbsentRequest>> {
        Ok(self
            .data()?
            .absent_requests
            .iter()
            .filter(|r| r.meeting == meeting_id)
            .cloned()
            .collect())
    }

    async fn create_absent_request(&self, request: &NewAbsentRequest) -> Result<AbsentRequest> {
        let mut data = self.data()?;
        let id = data.absent_requests.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        let created = AbsentRequest {
            id,
            meeting: request.meeting,
            member: request.member,
            reason: request.reason.clone(),
            status: AbsentStatus::Pending,
            reviewer: None,
            reviewer_comment: None,
        };
        data.absent_requests.push(created.clone());
        Ok(created)
    }
}

/// Executor that records what fired instead of doing it.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    fired: Mutex<Vec<(EntityKey, TaskName, DeferredAction)>>,
}

impl RecordingExecutor {
    pub fn fired(&self) -> Vec<(EntityKey, TaskName)> {
        lock(&self.fired)
            .iter()
            .map(|(key, name, _)| (*key, *name))
            .collect()
    }

    pub fn actions(&self) -> Vec<DeferredAction> {
        lock(&self.fired)
            .iter()
            .map(|(_, _, action)| action.clone())
            .collect()
    }
}

#[async_trait]
impl ActionExecutor for RecordingExecutor {
    async fn execute(&self, key: EntityKey, name: TaskName, action: DeferredAction) -> Result<()> {
        lock(&self.fired).push((key, name, action));
        Ok(())
    }
}

/// Outbox of a stream that is reported connected without any socket.
///
/// Frames queued on the outbox arrive as encoded text on the receiver. The
/// status sender must be kept alive for the outbox to stay connected.
pub fn connected_outbox(
    channel: &str,
) -> (
    StreamOutbox,
    mpsc::UnboundedReceiver<String>,
    watch::Sender<ConnectionStatus>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connected);
    (StreamOutbox::new(channel.to_owned(), tx, status_rx), rx, status_tx)
}
