//! Relay actions and deferred-action bodies.
//!
//! [`Relay`] turns mapper output into chat messages and stream frames. It is
//! also the scheduler's [`ActionExecutor`]: a fired `notify`, `start` or
//! `unpin` task ends up in [`Relay::perform`].
//!
//! Lookups that only decorate a message (host, reviewer, operator) degrade to
//! a placeholder on failure. Lookups the message cannot exist without (the
//! meeting behind an absence request, the member to DM) fail the relay with
//! `RemoteUnavailable`.

pub mod fanout;
pub mod render;

use crate::chat::{ChatPlatform, OutboundMessage};
use crate::clock::Clock;
use crate::config::{BotConfig, ChannelsConfig};
use crate::directory::{AbsentStatus, Announcement, Directory, Meeting};
use crate::error::{BotError, Result};
use crate::events::{OutboundFrame, RelayAction};
use crate::scheduler::{ActionExecutor, DeferredAction, EntityKey, EntityKind, TaskName};
use crate::stream::StreamOutbox;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use fanout::{FanoutReport, direct_to_all};

/// Sends notifications for relay actions and fired tasks.
pub struct Relay {
    chat: Arc<dyn ChatPlatform>,
    directory: Arc<dyn Directory>,
    clock: Arc<dyn Clock>,
    channels: ChannelsConfig,
    panel_url: String,
    action_timeout: Duration,
    outboxes: HashMap<String, StreamOutbox>,
}

impl Relay {
    pub fn new(
        chat: Arc<dyn ChatPlatform>,
        directory: Arc<dyn Directory>,
        clock: Arc<dyn Clock>,
        config: &BotConfig,
    ) -> Self {
        Self {
            chat,
            directory,
            clock,
            channels: config.channels.clone(),
            panel_url: config.directory.panel_url.clone(),
            action_timeout: config.scheduler.action_timeout(),
            outboxes: HashMap::new(),
        }
    }

    /// Register the outbox of one stream so frames can be pushed back on it.
    #[must_use]
    pub fn with_outbox(mut self, outbox: StreamOutbox) -> Self {
        self.outboxes.insert(outbox.channel().to_owned(), outbox);
        self
    }

    fn outbox(&self, channel: &str) -> Result<&StreamOutbox> {
        self.outboxes
            .get(channel)
            .ok_or_else(|| BotError::ConnectionLost(format!("no `{channel}` stream configured")))
    }

    /// Send the immediate notification for one mapped event, bounded by the
    /// action timeout.
    ///
    /// # Errors
    ///
    /// `Timeout` when the relay does not finish in time, otherwise whatever
    /// the directory lookup or channel send failed with. Undeliverable DMs
    /// are logged and do not fail the relay.
    pub async fn relay(&self, action: RelayAction) -> Result<()> {
        let name = action.name();
        let timeout = self.action_timeout;
        tokio::time::timeout(timeout, self.relay_unbounded(action))
            .await
            .map_err(|_| BotError::Timeout(format!("relay `{name}` exceeded {timeout:?}")))?
    }

    async fn relay_unbounded(&self, action: RelayAction) -> Result<()> {
        match action {
            RelayAction::MeetingAnnounced { meeting, edited } => {
                let host = self.discord_id_of(meeting.host).await;
                let mut message =
                    OutboundMessage::embed(render::meeting_announced(&meeting, host, edited));
                if let Some(link) = render::meeting_link(&self.panel_url, meeting.id) {
                    message = message.with_button("Open on web panel", link);
                }
                self.chat
                    .send_to_channel(self.channels.meeting_notify, &message)
                    .await?;
                info!(meeting_id = meeting.id, edited, "meeting announced");
            }
            RelayAction::MeetingCancelled(meeting) => {
                let message = OutboundMessage::embed(render::meeting_cancelled(&meeting));
                self.chat
                    .send_to_channel(self.channels.meeting_notify, &message)
                    .await?;
                info!(meeting_id = meeting.id, "meeting cancellation relayed");
            }
            RelayAction::AnnouncementPosted(announcement) => {
                self.chat
                    .send_to_channel(
                        self.channels.announcement,
                        &render::announcement_post(&announcement),
                    )
                    .await?;
                info!(announcement_id = announcement.id, "announcement posted");
            }
            RelayAction::AbsenceSubmitted(request) => {
                let meeting = self.directory.get_meeting(request.meeting).await?;
                let member = self.discord_id_of(Some(request.member)).await;
                let mut message = OutboundMessage::embed(render::absence_submitted(
                    &meeting, member, &request,
                ));
                if let Some(link) = render::meeting_link(&self.panel_url, meeting.id) {
                    message = message.with_button("Review on web panel", link);
                }
                self.chat
                    .send_to_channel(self.channels.absent_request, &message)
                    .await?;
                info!(request_id = request.id, meeting_id = meeting.id, "absence request relayed");
            }
            RelayAction::AbsenceReviewed(request) => {
                let meeting = self.directory.get_meeting(request.meeting).await?;
                let member = self.directory.lookup_member(request.member).await?;
                let reviewer = self.discord_id_of(request.reviewer).await;
                let message =
                    OutboundMessage::embed(render::absence_reviewed(&meeting, reviewer, &request));
                self.direct(member.discord_id, &message).await?;
            }
            RelayAction::WarningPoints(detail) => {
                // Fresh fetch so the total reflects this change.
                let member = self.directory.get_member(detail.member).await?;
                let operator = self.discord_id_of(Some(detail.operator)).await;
                let message = OutboundMessage::embed(render::warning_points(
                    &detail,
                    Some(member.warning_points),
                    operator,
                ));
                self.direct(member.discord_id, &message).await?;
            }
            RelayAction::NewLogin(notice) => {
                let message = OutboundMessage::embed(render::new_login(&notice, self.clock.now()));
                self.direct(notice.member_discord_id, &message).await?;
            }
            RelayAction::InitialData { kind } => {
                let outbox = self.outbox(&kind)?;
                let roles = self.chat.list_roles().await?;
                let channels = self.chat.list_channels().await?;
                let (role_count, channel_count) = (roles.len(), channels.len());
                outbox.send(&OutboundFrame::RolesUpdate { roles })?;
                outbox.send(&OutboundFrame::ChannelsUpdate { channels })?;
                info!(stream = %kind, role_count, channel_count, "initial data pushed");
            }
        }
        Ok(())
    }

    /// Run the side effect of a deferred action.
    ///
    /// # Errors
    ///
    /// Fails when the channel post or stream frame could not be sent.
    /// Per-recipient DM failures only show up in the fan-out log.
    pub async fn perform(&self, action: DeferredAction) -> Result<()> {
        match action {
            DeferredAction::MeetingReminder(meeting) => self.remind(&meeting).await,
            DeferredAction::MeetingStart(meeting) => self.announce_start(&meeting).await,
            DeferredAction::Unpin(announcement) => self.unpin(&announcement),
        }
    }

    async fn remind(&self, meeting: &Meeting) -> Result<()> {
        let message = OutboundMessage::everyone(render::meeting_reminder(meeting));
        self.chat
            .send_to_channel(self.channels.meeting_notify, &message)
            .await?;
        info!(meeting_id = meeting.id, "meeting reminder sent");

        let requests = match self.directory.list_absent_requests(meeting.id).await {
            Ok(requests) => requests,
            Err(e) => {
                warn!(meeting_id = meeting.id, "skipping absentee reminders: {e}");
                return Ok(());
            }
        };
        let mut recipients = Vec::new();
        for request in requests.iter().filter(|r| r.status.must_attend()) {
            match self.directory.lookup_member(request.member).await {
                Ok(member) => recipients.push((
                    member.discord_id,
                    OutboundMessage::embed(render::attendance_required(meeting, request.status)),
                )),
                Err(e) => warn!(member_id = request.member, "cannot resolve absentee: {e}"),
            }
        }
        if !recipients.is_empty() {
            direct_to_all(self.chat.as_ref(), &recipients, "attendance reminder").await;
        }
        Ok(())
    }

    async fn announce_start(&self, meeting: &Meeting) -> Result<()> {
        let host = self.discord_id_of(meeting.host).await;
        let absentees = match self.directory.list_absent_requests(meeting.id).await {
            Ok(requests) => {
                let mut absentees = Vec::new();
                for request in requests
                    .iter()
                    .filter(|r| r.status == AbsentStatus::Approved)
                {
                    match self.directory.lookup_member(request.member).await {
                        Ok(member) => absentees.push((member.discord_id, member.real_name)),
                        Err(e) => warn!(member_id = request.member, "cannot resolve absentee: {e}"),
                    }
                }
                absentees
            }
            Err(e) => {
                warn!(meeting_id = meeting.id, "absentee list unavailable: {e}");
                Vec::new()
            }
        };
        let message =
            OutboundMessage::everyone(render::meeting_started(meeting, host, &absentees));
        self.chat
            .send_to_channel(self.channels.meeting_notify, &message)
            .await?;
        info!(meeting_id = meeting.id, excused = absentees.len(), "meeting start announced");
        Ok(())
    }

    fn unpin(&self, announcement: &Announcement) -> Result<()> {
        self.outbox(EntityKind::Announcement.as_str())?
            .send(&OutboundFrame::AnnouncementUnpin {
                announcement_id: announcement.id,
            })?;
        info!(announcement_id = announcement.id, "unpin sent");
        Ok(())
    }

    /// DM one user; an unreachable user is a warning, not a failure.
    async fn direct(&self, user_id: u64, message: &OutboundMessage) -> Result<()> {
        match self.chat.send_direct(user_id, message).await {
            Err(BotError::NotificationDelivery(reason)) => {
                warn!(user_id, "direct message not delivered: {reason}");
                Ok(())
            }
            other => other,
        }
    }

    /// Discord id of a panel member, `None` when unknown or unresolvable.
    async fn discord_id_of(&self, member_id: Option<i64>) -> Option<u64> {
        let id = member_id?;
        match self.directory.lookup_member(id).await {
            Ok(member) => Some(member.discord_id),
            Err(e) => {
                debug!(member_id = id, "member lookup failed: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl ActionExecutor for Relay {
    async fn execute(&self, key: EntityKey, name: TaskName, action: DeferredAction) -> Result<()> {
        debug!(entity = %key, task = %name, "performing deferred action");
        self.perform(action).await
    }
}
