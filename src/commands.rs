//! Prefix commands typed in the guild or in DMs.
//!
//! Parsing is pure ([`Command::parse`]); [`CommandRouter`] executes a parsed
//! command against the directory, reconciler and streams and turns the
//! outcome into a reply. Rejections (`BotError::Command`) render as a short
//! notice, any other failure as the generic failure notice.

use crate::chat::{COLOR_ERROR, ChatPlatform, Embed, InboundCommand, OutboundMessage};
use crate::clock::Clock;
use crate::config::BotConfig;
use crate::directory::{Directory, Meeting, Member, NewAbsentRequest};
use crate::error::{BotError, Result};
use crate::events::OutboundFrame;
use crate::reconcile::Reconciler;
use crate::relay::render;
use crate::scheduler::EntityKind;
use crate::stream::StreamOutbox;
use crate::timestamp::discord_markup;
use std::ops::RangeInclusive;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Members shown by `warned`.
const WARNED_LIMIT: usize = 25;
/// Absence must be requested at least this long before the start.
const ABSENCE_CUTOFF_MINUTES: i64 = 5;
const REASON_CHARS: RangeInclusive<usize> = 5..=100;
const MEDALS: [&str; 3] = ["🥇", "🥈", "🥉"];

/// A recognised command with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Help,
    /// Profile of the mentioned user, or of the author.
    Member { target: Option<u64> },
    Warned,
    Meeting { id: i64 },
    Absent { meeting_id: i64, reason: String },
    Reload { kinds: Vec<EntityKind> },
    AnnounceTest,
}

impl Command {
    /// Parse a message. `None` when it is not addressed to the bot or names
    /// no known command.
    pub fn parse(prefix: &str, content: &str, mentions: &[u64]) -> Option<Result<Self>> {
        let body = content.trim().strip_prefix(prefix)?;
        let mut words = body.split_whitespace();
        let name = words.next()?.to_lowercase();
        let command = match name.as_str() {
            "ping" => Ok(Self::Ping),
            "help" => Ok(Self::Help),
            "member" => Ok(Self::Member {
                target: mentions.first().copied(),
            }),
            "warned" => Ok(Self::Warned),
            "meeting" => parse_id(words.next()).map(|id| Self::Meeting { id }),
            "absent" => parse_id(words.next()).map(|meeting_id| Self::Absent {
                meeting_id,
                reason: words.collect::<Vec<_>>().join(" "),
            }),
            "reload" => match words.next() {
                None | Some("all") => Ok(Self::Reload {
                    kinds: EntityKind::ALL.to_vec(),
                }),
                Some("meetings" | "meeting") => Ok(Self::Reload {
                    kinds: vec![EntityKind::Meeting],
                }),
                Some("announcements" | "announcement") => Ok(Self::Reload {
                    kinds: vec![EntityKind::Announcement],
                }),
                Some(other) => Err(BotError::Command(format!(
                    "unknown reload target `{other}` (use meetings or announcements)"
                ))),
            },
            "announce-test" => Ok(Self::AnnounceTest),
            _ => return None,
        };
        Some(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Help => "help",
            Self::Member { .. } => "member",
            Self::Warned => "warned",
            Self::Meeting { .. } => "meeting",
            Self::Absent { .. } => "absent",
            Self::Reload { .. } => "reload",
            Self::AnnounceTest => "announce-test",
        }
    }

    fn operator_only(&self) -> bool {
        matches!(self, Self::Reload { .. } | Self::AnnounceTest)
    }
}

fn parse_id(word: Option<&str>) -> Result<i64> {
    let word = word.ok_or_else(|| BotError::Command("a meeting id is required".into()))?;
    word.trim_start_matches('#')
        .parse()
        .map_err(|_| BotError::Command(format!("`{word}` is not a meeting id")))
}

/// Executes commands and replies in the channel they came from.
pub struct CommandRouter {
    chat: Arc<dyn ChatPlatform>,
    directory: Arc<dyn Directory>,
    reconciler: Arc<Reconciler>,
    clock: Arc<dyn Clock>,
    announcement_outbox: Option<StreamOutbox>,
    prefix: String,
    owner_ids: Vec<u64>,
    staff_role_id: Option<u64>,
}

impl CommandRouter {
    pub fn new(
        chat: Arc<dyn ChatPlatform>,
        directory: Arc<dyn Directory>,
        reconciler: Arc<Reconciler>,
        clock: Arc<dyn Clock>,
        config: &BotConfig,
    ) -> Self {
        Self {
            chat,
            directory,
            reconciler,
            clock,
            announcement_outbox: None,
            prefix: config.commands.prefix.clone(),
            owner_ids: config.discord.owner_ids.clone(),
            staff_role_id: config.discord.staff_role_id,
        }
    }

    #[must_use]
    pub fn with_announcement_outbox(mut self, outbox: StreamOutbox) -> Self {
        self.announcement_outbox = Some(outbox);
        self
    }

    /// Serve commands until the inbound channel closes.
    pub async fn run(self, mut inbound: mpsc::Receiver<InboundCommand>) {
        while let Some(command) = inbound.recv().await {
            let Some(reply) = self.respond(&command).await else {
                continue;
            };
            if let Err(e) = self.chat.send_to_channel(command.channel_id, &reply).await {
                warn!(channel_id = command.channel_id, "command reply not delivered: {e}");
            }
        }
        debug!("command inbox closed");
    }

    /// Reply for one inbound message, `None` when it is not a command.
    pub async fn respond(&self, inbound: &InboundCommand) -> Option<OutboundMessage> {
        let parsed = Command::parse(&self.prefix, &inbound.content, &inbound.mentions)?;
        let outcome = match parsed {
            Ok(command) => {
                info!(author_id = inbound.author_id, command = command.name(), "command received");
                self.execute(command, inbound).await
            }
            Err(e) => Err(e),
        };
        Some(match outcome {
            Ok(reply) => reply,
            Err(BotError::Command(reason)) => OutboundMessage::embed(
                Embed::new("Command rejected")
                    .description(reason)
                    .color(COLOR_ERROR),
            ),
            Err(e) => {
                warn!(author_id = inbound.author_id, kind = e.kind_name(), "command failed: {e}");
                OutboundMessage::embed(render::failure_notice(&e))
            }
        })
    }

    fn is_operator(&self, inbound: &InboundCommand) -> bool {
        self.owner_ids.contains(&inbound.author_id)
            || self
                .staff_role_id
                .is_some_and(|role| inbound.author_roles.contains(&role))
    }

    async fn execute(&self, command: Command, inbound: &InboundCommand) -> Result<OutboundMessage> {
        if command.operator_only() && !self.is_operator(inbound) {
            return Err(BotError::Command(format!(
                "`{}` is limited to bot operators",
                command.name()
            )));
        }
        match command {
            Command::Ping => Ok(OutboundMessage::text("Pong!")),
            Command::Help => Ok(OutboundMessage::embed(self.help())),
            Command::Member { target } => {
                self.member_profile(target.unwrap_or(inbound.author_id))
                    .await
            }
            Command::Warned => self.warned().await,
            Command::Meeting { id } => {
                let meeting = self.directory.get_meeting(id).await?;
                let host = match meeting.host {
                    Some(host) => self.directory.lookup_member(host).await.ok(),
                    None => None,
                };
                Ok(OutboundMessage::embed(meeting_details(
                    &meeting,
                    host.map(|m| m.discord_id),
                )))
            }
            Command::Absent { meeting_id, reason } => {
                self.request_absence(inbound.author_id, meeting_id, reason)
                    .await
            }
            Command::Reload { kinds } => {
                let report = self.reconciler.reload(&kinds).await?;
                let kinds: Vec<&str> = report.kinds.iter().map(|k| k.as_str()).collect();
                Ok(OutboundMessage::embed(
                    Embed::new("Reload finished")
                        .field("Kinds", kinds.join(", "), false)
                        .field("Fetched", report.fetched.to_string(), true)
                        .field("Scheduled", report.scheduled.to_string(), true)
                        .field(
                            "Expired",
                            format!("{} ({} failed)", report.expired, report.failed_expirations),
                            true,
                        )
                        .field("Kept live updates", report.preserved.len().to_string(), true),
                ))
            }
            Command::AnnounceTest => {
                let outbox = self.announcement_outbox.as_ref().ok_or_else(|| {
                    BotError::ConnectionLost("announcement stream is not configured".into())
                })?;
                outbox.send(&OutboundFrame::TestMessage {
                    message: "test message from the bot".into(),
                })?;
                Ok(OutboundMessage::text("Test frame sent over the announcement stream."))
            }
        }
    }

    fn help(&self) -> Embed {
        let p = &self.prefix;
        Embed::new("Commands").description(format!(
            "`{p}ping`: check the bot is alive\n\
             `{p}member [@user]`: member profile\n\
             `{p}warned`: warning point leaderboard\n\
             `{p}meeting <id>`: meeting details\n\
             `{p}absent <meeting id> <reason>`: request absence\n\
             `{p}reload [meetings|announcements]`: rebuild reminders (operators)\n\
             `{p}announce-test`: send a test frame (operators)"
        ))
    }

    async fn registered_member(&self, discord_id: u64) -> Result<Option<Member>> {
        Ok(self
            .directory
            .search_members_by_discord(discord_id)
            .await?
            .into_iter()
            .next())
    }

    async fn member_profile(&self, discord_id: u64) -> Result<OutboundMessage> {
        let Some(member) = self.registered_member(discord_id).await? else {
            return Ok(OutboundMessage::text(format!(
                "{} is not registered on the web panel.",
                render::mention(Some(discord_id))
            )));
        };
        let jobs = if member.jobs.is_empty() {
            "none".to_owned()
        } else {
            member.jobs.join(", ")
        };
        let mut embed = Embed::new(&member.real_name)
            .field("Discord", render::mention(Some(member.discord_id)), true)
            .field("Jobs", jobs, true)
            .field("Warning points", member.warning_points.to_string(), true);
        if let Some(generation) = member.generation {
            embed = embed.field("Generation", generation.to_string(), true);
        }
        Ok(OutboundMessage::embed(embed))
    }

    async fn warned(&self) -> Result<OutboundMessage> {
        let mut members = self.directory.list_warned_members().await?;
        members.retain(|m| m.warning_points != 0);
        if members.is_empty() {
            return Ok(OutboundMessage::text("Nobody has warning points. Nice!"));
        }
        members.sort_by(|a, b| b.warning_points.cmp(&a.warning_points));
        Ok(OutboundMessage::embed(
            Embed::new("Warning points").description(warned_board(&members)),
        ))
    }

    async fn request_absence(
        &self,
        author_id: u64,
        meeting_id: i64,
        reason: String,
    ) -> Result<OutboundMessage> {
        let reason = reason.trim().to_owned();
        if !REASON_CHARS.contains(&reason.chars().count()) {
            return Err(BotError::Command(format!(
                "the reason must be {} to {} characters long",
                REASON_CHARS.start(),
                REASON_CHARS.end()
            )));
        }
        let meeting = self.directory.get_meeting(meeting_id).await?;
        if !meeting.can_absent {
            return Err(BotError::Command(format!(
                "meeting `#{meeting_id}` does not accept absence requests"
            )));
        }
        let cutoff = self.clock.now() + chrono::Duration::minutes(ABSENCE_CUTOFF_MINUTES);
        if meeting.start_time <= cutoff {
            return Err(BotError::Command(format!(
                "absence must be requested more than {ABSENCE_CUTOFF_MINUTES} minutes before the start"
            )));
        }
        let member = self.registered_member(author_id).await?.ok_or_else(|| {
            BotError::Command("you are not registered on the web panel".into())
        })?;
        let existing = self.directory.list_absent_requests(meeting_id).await?;
        if existing.iter().any(|r| r.member == member.id) {
            return Err(BotError::Command(format!(
                "you already requested absence for meeting `#{meeting_id}`"
            )));
        }

        let created = self
            .directory
            .create_absent_request(&NewAbsentRequest {
                meeting: meeting_id,
                member: member.id,
                reason,
            })
            .await?;
        info!(request_id = created.id, meeting_id, member_id = member.id, "absence requested");
        Ok(OutboundMessage::embed(
            Embed::new("Absence requested")
                .description("Your request was submitted and is waiting for review.")
                .field("Meeting", format!("{} (`#{}`)", meeting.name, meeting.id), false)
                .field("Reason", &created.reason, false),
        ))
    }
}

fn meeting_details(meeting: &Meeting, host: Option<u64>) -> Embed {
    let mut embed = Embed::new(&meeting.name)
        .description(format!("Meeting `#{}`", meeting.id))
        .field("Host", render::mention(host), true)
        .field("Location", &meeting.location, true)
        .field("Start", discord_markup(meeting.start_time, 'F'), false);
    if let Some(end) = meeting.end_time {
        embed = embed.field("End", discord_markup(end, 'F'), false);
    }
    if !meeting.description.is_empty() {
        embed = embed.field("About", &meeting.description, false);
    }
    embed.field(
        "Absence",
        if meeting.can_absent { "allowed" } else { "not allowed" },
        true,
    )
}

/// Ranked list, highest points first, medals for the top three.
fn warned_board(sorted: &[Member]) -> String {
    sorted
        .iter()
        .take(WARNED_LIMIT)
        .enumerate()
        .map(|(rank, member)| {
            let place = MEDALS
                .get(rank)
                .map_or_else(|| format!("{}.", rank + 1), |medal| (*medal).to_owned());
            format!(
                "{place} {} ({}): `{}` points\n",
                render::mention(Some(member.discord_id)),
                member.real_name,
                member.warning_points
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::config::SchedulerConfig;
    use crate::directory::AbsentStatus;
    use crate::scheduler::{DerivationRules, Scheduler};
    use crate::test_utils::{ManualClock, RecordingChat, RecordingExecutor, StaticDirectory};
    use chrono::{DateTime, TimeZone, Utc};
    use std::time::Duration;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 1, 0, 0).unwrap()
    }

    fn member(id: i64, discord_id: u64, points: i64) -> Member {
        Member {
            id,
            discord_id,
            real_name: format!("member{id}"),
            generation: Some(12),
            jobs: vec!["Mechanical".into()],
            warning_points: points,
            email_address: None,
        }
    }

    fn meeting(id: i64, minutes_ahead: i64, can_absent: bool) -> Meeting {
        Meeting {
            id,
            name: "Build".into(),
            description: String::new(),
            host: None,
            start_time: now() + chrono::Duration::minutes(minutes_ahead),
            end_time: None,
            location: "Lab".into(),
            can_absent,
            discord_notify_time: None,
        }
    }

    fn inbound(author_id: u64, content: &str) -> InboundCommand {
        InboundCommand {
            author_id,
            author_roles: Vec::new(),
            channel_id: 55,
            guild_id: Some(1),
            content: content.into(),
            mentions: Vec::new(),
        }
    }

    fn router(directory: Arc<StaticDirectory>) -> CommandRouter {
        let clock = Arc::new(ManualClock::new(now()));
        let executor = Arc::new(RecordingExecutor::default());
        let (scheduler, handle) =
            Scheduler::new(&SchedulerConfig::default(), clock.clone(), executor.clone());
        scheduler.run();
        let reconciler = Arc::new(Reconciler::new(
            directory.clone(),
            handle,
            executor,
            clock.clone(),
            DerivationRules::default(),
            Duration::from_secs(5),
        ));
        let mut config = BotConfig::default();
        config.discord.owner_ids = vec![1];
        CommandRouter::new(
            Arc::new(RecordingChat::default()),
            directory,
            reconciler,
            clock,
            &config,
        )
    }

    fn title(reply: &OutboundMessage) -> &str {
        reply.embed.as_ref().map_or("", |e| e.title.as_str())
    }

    #[test]
    fn parse_recognises_prefix_and_arguments() {
        assert!(Command::parse("!", "hello", &[]).is_none());
        assert!(Command::parse("!", "!unknown", &[]).is_none());
        assert_eq!(Command::parse("!", "!ping", &[]).unwrap().unwrap(), Command::Ping);
        assert_eq!(
            Command::parse("!", "!absent #42 family dinner", &[]).unwrap().unwrap(),
            Command::Absent {
                meeting_id: 42,
                reason: "family dinner".into()
            }
        );
        assert_eq!(
            Command::parse("!", "!member <@9>", &[9]).unwrap().unwrap(),
            Command::Member { target: Some(9) }
        );
        assert!(Command::parse("!", "!meeting abc", &[]).unwrap().is_err());
    }

    #[tokio::test]
    async fn absence_request_is_validated_then_created() {
        let directory = Arc::new(StaticDirectory::default());
        directory.add_member(member(3, 300, 0));
        directory.add_meeting(meeting(42, 60, true));
        directory.add_meeting(meeting(43, 60, false));
        directory.add_meeting(meeting(44, 3, true));
        let router = router(directory.clone());

        let short = router.respond(&inbound(300, "!absent 42 no")).await.unwrap();
        assert_eq!(title(&short), "Command rejected");
        let closed = router.respond(&inbound(300, "!absent 43 doctor visit")).await.unwrap();
        assert_eq!(title(&closed), "Command rejected");
        let late = router.respond(&inbound(300, "!absent 44 doctor visit")).await.unwrap();
        assert_eq!(title(&late), "Command rejected");
        let stranger = router.respond(&inbound(999, "!absent 42 doctor visit")).await.unwrap();
        assert_eq!(title(&stranger), "Command rejected");

        let ok = router.respond(&inbound(300, "!absent 42 doctor visit")).await.unwrap();
        assert_eq!(title(&ok), "Absence requested");
        let requests = directory.absent_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].status, AbsentStatus::Pending);

        let again = router.respond(&inbound(300, "!absent 42 doctor visit")).await.unwrap();
        assert_eq!(title(&again), "Command rejected");
        assert_eq!(directory.absent_requests().len(), 1);
    }

    #[tokio::test]
    async fn warned_board_is_sorted_with_medals() {
        let directory = Arc::new(StaticDirectory::default());
        directory.add_member(member(1, 100, 2));
        directory.add_member(member(2, 200, 9));
        directory.add_member(member(3, 300, 0));
        directory.add_member(member(4, 400, 5));
        directory.add_member(member(5, 500, 1));
        let router = router(directory);

        let reply = router.respond(&inbound(7, "!warned")).await.unwrap();
        let board = reply.embed.unwrap().description.unwrap();
        let lines: Vec<&str> = board.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("🥇 <@200>"));
        assert!(lines[1].starts_with("🥈 <@400>"));
        assert!(lines[2].starts_with("🥉 <@100>"));
        assert!(lines[3].starts_with("4. <@500>"));
    }

    #[tokio::test]
    async fn operator_commands_need_permission() {
        let directory = Arc::new(StaticDirectory::default());
        let router = router(directory);

        let denied = router.respond(&inbound(2, "!reload")).await.unwrap();
        assert_eq!(title(&denied), "Command rejected");
        let allowed = router.respond(&inbound(1, "!reload meetings")).await.unwrap();
        assert_eq!(title(&allowed), "Reload finished");
    }

    #[tokio::test]
    async fn remote_failures_render_failure_notice() {
        let directory = Arc::new(StaticDirectory::default());
        directory.set_unavailable(true);
        let router = router(directory);

        let reply = router.respond(&inbound(2, "!member")).await.unwrap();
        assert_eq!(title(&reply), "Something went wrong");
        assert!(
            reply
                .embed
                .unwrap()
                .field_value("Error")
                .unwrap()
                .contains("RemoteUnavailable")
        );
    }
}
