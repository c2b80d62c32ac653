//! reqwest-backed [`Directory`] implementation.

use super::Directory;
use super::types::{AbsentRequest, Announcement, Meeting, Member, NewAbsentRequest};
use crate::config::DirectoryConfig;
use crate::error::{BotError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

/// HTTP client for the team panel API.
///
/// Keeps an in-memory member index so relays can resolve Discord ids without a
/// round trip per notification.
pub struct HttpDirectory {
    base_url: String,
    token: String,
    client: reqwest::Client,
    members: RwLock<HashMap<i64, Member>>,
}

impl HttpDirectory {
    pub fn new(config: &DirectoryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| BotError::Config(format!("cannot build HTTP client: {e}")))?;
        let mut base_url = config.api_url.trim().to_owned();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Ok(Self {
            base_url,
            token: config.api_token.clone(),
            client,
            members: RwLock::new(HashMap::new()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.header("Authorization", format!("Token {}", self.token))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        what: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self
            .authorized(self.client.get(self.url(path)))
            .query(query)
            .send()
            .await?;
        decode(what, StatusCode::OK, response).await
    }

    fn remember(&self, member: &Member) {
        let mut index = match self.members.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        index.insert(member.id, member.clone());
    }

    fn indexed(&self, id: i64) -> Option<Member> {
        let index = match self.members.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        index.get(&id).cloned()
    }
}

async fn decode<T: DeserializeOwned>(
    what: &str,
    expected: StatusCode,
    response: reqwest::Response,
) -> Result<T> {
    let status = response.status();
    if status != expected {
        let body = response.text().await.unwrap_or_default();
        return Err(BotError::RemoteUnavailable(format!(
            "failed to {what}: {status} ({body})"
        )));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| BotError::Decode(format!("failed to {what}: {e}")))
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn get_member(&self, id: i64) -> Result<Member> {
        let member: Member = self
            .get_json("fetch member info", &format!("members/{id}/"), &[])
            .await?;
        self.remember(&member);
        Ok(member)
    }

    async fn lookup_member(&self, id: i64) -> Result<Member> {
        if let Some(member) = self.indexed(id) {
            return Ok(member);
        }
        self.get_member(id).await
    }

    async fn search_members_by_discord(&self, discord_id: u64) -> Result<Vec<Member>> {
        self.get_json(
            "search members",
            "members/",
            &[("discord_id", discord_id.to_string())],
        )
        .await
    }

    async fn list_warned_members(&self) -> Result<Vec<Member>> {
        self.get_json("fetch warned members", "members/bad_guys/", &[])
            .await
    }

    async fn index_members(&self) -> Result<usize> {
        let members: Vec<Member> = self.get_json("index members", "members/", &[]).await?;
        let count = members.len();
        let mut index = match self.members.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        index.clear();
        index.extend(members.into_iter().map(|m| (m.id, m)));
        tracing::info!(count, "member index refreshed");
        Ok(count)
    }

    async fn get_meeting(&self, id: i64) -> Result<Meeting> {
        self.get_json("fetch meeting info", &format!("meetings/{id}/"), &[])
            .await
    }

    async fn list_upcoming_meetings(&self) -> Result<Vec<Meeting>> {
        self.get_json("fetch upcoming meetings", "meetings/upcoming/", &[])
            .await
    }

    async fn list_pinned_announcements(&self) -> Result<Vec<Announcement>> {
        self.get_json("fetch pinned announcements", "announcements/pinned/", &[])
            .await
    }

    async fn list_absent_requests(&self, meeting_id: i64) -> Result<Vec<AbsentRequest>> {
        self.get_json(
            "fetch absent requests",
            "absent_requests/",
            &[("meeting__id", meeting_id.to_string())],
        )
        .await
    }

    async fn create_absent_request(&self, request: &NewAbsentRequest) -> Result<AbsentRequest> {
        let response = self
            .authorized(self.client.post(self.url("absent_requests/")))
            .json(request)
            .send()
            .await?;
        decode("create absent request", StatusCode::CREATED, response).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn config(url: &str) -> DirectoryConfig {
        DirectoryConfig {
            api_url: url.to_owned(),
            api_token: "secret".to_owned(),
            request_timeout_secs: 5,
            ..DirectoryConfig::default()
        }
    }

    #[test]
    fn base_url_gets_trailing_slash() {
        let dir = HttpDirectory::new(&config("https://panel.example/api")).unwrap();
        assert_eq!(dir.url("members/3/"), "https://panel.example/api/members/3/");
        assert_eq!(dir.url("/meetings/"), "https://panel.example/api/meetings/");
    }

    #[test]
    fn index_starts_empty() {
        let dir = HttpDirectory::new(&config("http://localhost/")).unwrap();
        assert!(dir.indexed(1).is_none());
    }
}
