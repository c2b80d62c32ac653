//! Remote directory client: typed access to the team panel REST API.
//!
//! The scheduler and relays only depend on the [`Directory`] trait; the HTTP
//! transport lives in [`http`]. Every method fails with
//! [`BotError::RemoteUnavailable`](crate::error::BotError::RemoteUnavailable)
//! on a non-success status, and callers treat that as recoverable.

pub mod http;
pub mod types;

use crate::error::Result;
use async_trait::async_trait;

pub use http::HttpDirectory;
pub use types::{
    AbsentRequest, AbsentStatus, Announcement, EntityRef, LoginNotice, Meeting, Member,
    NewAbsentRequest, WarningDetail,
};

/// Call contract of the team panel API.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Fetch one member, always hitting the API.
    async fn get_member(&self, id: i64) -> Result<Member>;

    /// Fetch one member, preferring the local member index.
    async fn lookup_member(&self, id: i64) -> Result<Member> {
        self.get_member(id).await
    }

    /// Members registered under a Discord account.
    async fn search_members_by_discord(&self, discord_id: u64) -> Result<Vec<Member>>;

    /// Members with non-zero warning points.
    async fn list_warned_members(&self) -> Result<Vec<Member>>;

    /// Refresh the local member index; returns the number of members indexed.
    async fn index_members(&self) -> Result<usize>;

    async fn get_meeting(&self, id: i64) -> Result<Meeting>;

    /// Meetings that have not started yet.
    async fn list_upcoming_meetings(&self) -> Result<Vec<Meeting>>;

    /// Announcements currently pinned on the panel.
    async fn list_pinned_announcements(&self) -> Result<Vec<Announcement>>;

    /// Absence requests filed against a meeting.
    async fn list_absent_requests(&self, meeting_id: i64) -> Result<Vec<AbsentRequest>>;

    async fn create_absent_request(&self, request: &NewAbsentRequest) -> Result<AbsentRequest>;
}
