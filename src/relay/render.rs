//! Notification text and embeds.

use crate::chat::message::{COLOR_ERROR, Embed, OutboundMessage, truncate_chars, MAX_CONTENT_CHARS};
use crate::directory::{
    AbsentRequest, AbsentStatus, Announcement, EntityRef, LoginNotice, Meeting, WarningDetail,
};
use crate::error::BotError;
use crate::timestamp::discord_markup;
use chrono::{DateTime, Utc};

/// `<@id>` user mention, or a placeholder when the user is unknown.
pub fn mention(discord_id: Option<u64>) -> String {
    match discord_id {
        Some(id) => format!("<@{id}>"),
        None => "*unknown member*".to_owned(),
    }
}

fn meeting_label(meeting: &Meeting) -> String {
    format!("{} (`#{}`)", meeting.name, meeting.id)
}

pub fn meeting_link(panel_url: &str, meeting_id: i64) -> Option<String> {
    let base = panel_url.trim_end_matches('/');
    (!base.is_empty()).then(|| format!("{base}/meeting/{meeting_id}/"))
}

/// Posted when a meeting is created or edited.
pub fn meeting_announced(meeting: &Meeting, host: Option<u64>, edited: bool) -> Embed {
    let (title, description) = if edited {
        (
            "Meeting updated",
            format!("Details of meeting `#{}` have changed.", meeting.id),
        )
    } else {
        (
            "New meeting",
            format!("Meeting `#{}` has been scheduled.", meeting.id),
        )
    };
    let absence = if meeting.can_absent {
        ("Absence allowed", "Members may request absence on the web panel.")
    } else {
        (
            "Absence not allowed",
            "Absence requests are disabled for this meeting. Contact the leads directly if you cannot attend.",
        )
    };
    let mut embed = Embed::new(title)
        .description(description)
        .field("Name", &meeting.name, false)
        .field(absence.0, absence.1, false)
        .field("Host", mention(host), false)
        .field("Start", discord_markup(meeting.start_time, 'F'), false);
    if let Some(end) = meeting.end_time {
        embed = embed.field("End", discord_markup(end, 'F'), false);
    }
    embed
        .field("Location", &meeting.location, false)
        .footer("Edit, request absence or review requests on the web panel.")
}

pub fn meeting_cancelled(meeting: &EntityRef) -> Embed {
    let mut embed = Embed::new("Meeting cancelled")
        .description(format!("Meeting `#{}` has been cancelled.", meeting.id))
        .color(COLOR_ERROR);
    if let Some(name) = &meeting.name {
        embed = embed.field("Name", name, false);
    }
    embed
}

/// Announcement mirrored from the panel, pinging everyone.
pub fn announcement_post(announcement: &Announcement) -> OutboundMessage {
    let text = format!(
        "@everyone\n> Synced from the team web panel.\n# {}\n{}\n",
        announcement.title, announcement.content
    );
    OutboundMessage {
        content: truncate_chars(&text, MAX_CONTENT_CHARS),
        mention_everyone: true,
        ..OutboundMessage::default()
    }
}

/// Channel reminder shortly before the start.
pub fn meeting_reminder(meeting: &Meeting) -> Embed {
    let mut embed = Embed::new("Meeting starting soon!").description(format!(
        "Meeting **{}** (`#{}`) starts {}!",
        meeting.name,
        meeting.id,
        discord_markup(meeting.start_time, 'R')
    ));
    if !meeting.description.is_empty() {
        embed = embed.field("About", &meeting.description, false);
    }
    embed.field("Location", &meeting.location, false)
}

/// DM to a member whose absence does not excuse them.
pub fn attendance_required(meeting: &Meeting, status: AbsentStatus) -> Embed {
    let why = match status {
        AbsentStatus::Pending => "has not been reviewed yet",
        _ => "was not approved",
    };
    Embed::new("Please attend the meeting")
        .description(format!(
            "Your absence request **{why}**, so you are still expected to attend.\nIf you cannot make it, tell the leads right away."
        ))
        .field("Meeting", meeting_label(meeting), false)
        .field("Start", discord_markup(meeting.start_time, 'R'), false)
}

/// Channel notice at the start time. `absentees` pairs Discord ids with names.
pub fn meeting_started(meeting: &Meeting, host: Option<u64>, absentees: &[(u64, String)]) -> Embed {
    let mut embed = Embed::new("Meeting started!").description(format!(
        "Meeting **{}** (`#{}`) started at {}!",
        meeting.name,
        meeting.id,
        discord_markup(meeting.start_time, 'F')
    ));
    if !meeting.description.is_empty() {
        embed = embed.field("About", &meeting.description, false);
    }
    embed = embed
        .field("Host", mention(host), false)
        .field("Location", &meeting.location, false);
    if !absentees.is_empty() {
        let list: String = absentees
            .iter()
            .map(|(id, name)| format!("<@{id}> ({name})\n"))
            .collect();
        embed = embed.field("Excused", list, false);
    }
    embed
}

/// Staff notice for a new absence request.
pub fn absence_submitted(meeting: &Meeting, member: Option<u64>, request: &AbsentRequest) -> Embed {
    Embed::new("New absence request")
        .description("A new absence request is waiting for review on the web panel.")
        .field("Meeting", meeting_label(meeting), false)
        .field("Member", mention(member), false)
        .field("Reason", &request.reason, false)
}

/// DM with the review outcome.
pub fn absence_reviewed(meeting: &Meeting, reviewer: Option<u64>, request: &AbsentRequest) -> Embed {
    let outcome = match request.status {
        AbsentStatus::Approved => "✅ Approved",
        AbsentStatus::Rejected => "❌ Rejected",
        _ => "Unknown",
    };
    let mut embed = Embed::new("Absence request reviewed")
        .description("Your absence request has been reviewed:")
        .field("Meeting", meeting_label(meeting), false)
        .field("Reviewer", mention(reviewer), false)
        .field("Result", outcome, false);
    if let Some(comment) = request.reviewer_comment.as_deref().filter(|c| !c.is_empty()) {
        embed = embed.field("Comment", comment, false);
    }
    embed.footer("If you disagree with the result, contact the leads directly.")
}

/// DM after warning points were added or removed.
pub fn warning_points(detail: &WarningDetail, total: Option<i64>, operator: Option<u64>) -> Embed {
    let removal = detail.points < 0;
    let action = if removal { "Points removed" } else { "Points added" };
    let mut embed = Embed::new(format!("{action} notice"))
        .description(format!(
            "A lead just applied a **{}** operation to your record:",
            action.to_lowercase()
        ))
        .field("Points", format!("`{}`", detail.points), false)
        .field(
            "Total after change",
            total.map_or_else(|| "unknown".to_owned(), |t| format!("`{t}`")),
            false,
        )
        .field("Operator", mention(operator), false)
        .field("Reason", &detail.reason, false);
    if let Some(notes) = detail.notes.as_deref().filter(|n| !n.is_empty()) {
        embed = embed.field("Notes", notes, false);
    }
    embed.footer("Contact the leads if you have questions.")
}

/// DM about a new panel login.
pub fn new_login(notice: &LoginNotice, at: DateTime<Utc>) -> Embed {
    Embed::new("New login")
        .description(
            "Someone signed in to your web panel account. Make sure it was you.\n\
             If you suspect your account is compromised, change your password and tell an admin.",
        )
        .field("IP address", format!("`{}`", notice.ip), false)
        .field("User agent", format!("```{}```", notice.user_agent), false)
        .field("Method", &notice.method, false)
        .timestamp(at)
}

/// Generic failure notice with the error kind and message for diagnosis.
pub fn failure_notice(err: &BotError) -> Embed {
    Embed::new("Something went wrong")
        .description("The request could not be completed.")
        .color(COLOR_ERROR)
        .field("Error", format!("```{}: {}```", err.kind_name(), err), false)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use chrono::TimeZone;

    fn meeting() -> Meeting {
        Meeting {
            id: 42,
            name: "Kickoff".into(),
            description: String::new(),
            host: Some(7),
            start_time: Utc.with_ymd_and_hms(2025, 1, 1, 2, 0, 0).unwrap(),
            end_time: None,
            location: "Lab".into(),
            can_absent: false,
            discord_notify_time: None,
        }
    }

    #[test]
    fn announcement_mentions_host_and_start() {
        let embed = meeting_announced(&meeting(), Some(601), false);
        assert_eq!(embed.title, "New meeting");
        assert_eq!(embed.field_value("Host"), Some("<@601>"));
        assert_eq!(embed.field_value("Start"), Some("<t:1735696800:F>"));
        assert!(embed.field_value("Absence not allowed").is_some());
        assert!(embed.field_value("End").is_none());
    }

    #[test]
    fn started_lists_excused_members() {
        let embed = meeting_started(&meeting(), None, &[(5, "Lin".into()), (6, "Chen".into())]);
        assert_eq!(embed.field_value("Host"), Some("*unknown member*"));
        assert_eq!(embed.field_value("Excused"), Some("<@5> (Lin)\n<@6> (Chen)\n"));
        assert!(embed.field_value("About").is_none());
    }

    #[test]
    fn long_announcements_are_truncated() {
        let ann = Announcement {
            id: 1,
            title: "Season recap".into(),
            content: "x".repeat(5000),
            pin_until: None,
            is_pinned: None,
        };
        let msg = announcement_post(&ann);
        assert_eq!(msg.content.chars().count(), MAX_CONTENT_CHARS);
        assert!(msg.content.starts_with("@everyone"));
        assert!(msg.mention_everyone);
    }

    #[test]
    fn negative_points_render_as_removal() {
        let detail = WarningDetail {
            id: 1,
            member: 3,
            operator: 9,
            points: -2,
            reason: "helped clean up".into(),
            notes: Some(String::new()),
        };
        let embed = warning_points(&detail, Some(4), Some(900));
        assert_eq!(embed.title, "Points removed notice");
        assert!(embed.field_value("Notes").is_none());
        assert_eq!(embed.field_value("Total after change"), Some("`4`"));
    }

    #[test]
    fn failure_notice_names_error_kind() {
        let embed = failure_notice(&BotError::RemoteUnavailable("502".into()));
        assert!(embed.field_value("Error").unwrap().contains("RemoteUnavailable"));
    }

    #[test]
    fn meeting_links_need_a_panel_url() {
        assert_eq!(meeting_link("", 3), None);
        assert_eq!(
            meeting_link("https://panel.example/", 3).as_deref(),
            Some("https://panel.example/meeting/3/")
        );
    }
}
