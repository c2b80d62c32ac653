use super::message::OutboundMessage;
use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;

/// A text command typed by a guild member or in a DM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundCommand {
    pub author_id: u64,
    /// Guild roles of the author (empty in DMs).
    pub author_roles: Vec<u64>,
    pub channel_id: u64,
    pub guild_id: Option<u64>,
    pub content: String,
    /// Users mentioned in the message, in order.
    pub mentions: Vec<u64>,
}

/// Guild role as reported back to the panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuildRole {
    pub id: String,
    pub name: String,
}

/// Guild channel as reported back to the panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuildChannel {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: u8,
}

/// Chat platform contract. Relays and commands only talk to this trait.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Post a message to a guild channel.
    async fn send_to_channel(&self, channel_id: u64, message: &OutboundMessage) -> Result<()>;

    /// Send a direct message to a user.
    ///
    /// Fails with `NotificationDelivery` when the user does not accept DMs.
    async fn send_direct(&self, user_id: u64, message: &OutboundMessage) -> Result<()>;

    async fn list_roles(&self) -> Result<Vec<GuildRole>>;

    async fn list_channels(&self) -> Result<Vec<GuildChannel>>;
}
