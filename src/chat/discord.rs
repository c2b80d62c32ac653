use super::message::OutboundMessage;
use super::traits::{ChatPlatform, GuildChannel, GuildRole, InboundCommand};
use crate::config::DiscordConfig;
use crate::error::{BotError, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

const DISCORD_API: &str = "https://discord.com/api/v10/";

/// JSON error code Discord returns when a user does not accept DMs.
const CANNOT_MESSAGE_USER: u64 = 50007;

// GUILDS | GUILD_MESSAGES | DIRECT_MESSAGES | MESSAGE_CONTENT
const GATEWAY_INTENTS: u64 = 1 | 512 | 4096 | 32768;

/// Discord adapter: REST API for sends, gateway websocket for commands.
pub struct DiscordChat {
    bot_token: String,
    guild_id: Option<u64>,
    base_url: String,
    client: reqwest::Client,
}

impl DiscordChat {
    pub fn new(config: &DiscordConfig) -> Self {
        Self {
            bot_token: config.bot_token.clone(),
            guild_id: config.guild_id,
            base_url: DISCORD_API.to_owned(),
            client: reqwest::Client::new(),
        }
    }

    /// Point REST calls at another host (used against mock servers).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        self.base_url = base_url;
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bot {}", self.bot_token))
    }

    async fn post_message(&self, channel_id: u64, message: &OutboundMessage) -> Result<()> {
        let response = self
            .request(reqwest::Method::POST, &format!("channels/{channel_id}/messages"))
            .json(&message.to_discord_json())
            .send()
            .await
            .map_err(|e| BotError::NotificationDelivery(e.to_string()))?;

        if response.status().is_success() {
            return Ok(());
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let code = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("code").and_then(Value::as_u64));
        if code == Some(CANNOT_MESSAGE_USER) {
            return Err(BotError::NotificationDelivery(format!(
                "recipient does not accept direct messages (channel {channel_id})"
            )));
        }
        Err(BotError::NotificationDelivery(format!(
            "discord send failed ({status}): {body}"
        )))
    }

    async fn open_dm(&self, user_id: u64) -> Result<u64> {
        let response = self
            .request(reqwest::Method::POST, "users/@me/channels")
            .json(&json!({ "recipient_id": user_id.to_string() }))
            .send()
            .await
            .map_err(|e| BotError::NotificationDelivery(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            return Err(BotError::NotificationDelivery(format!(
                "cannot open DM with {user_id} ({status})"
            )));
        }
        let channel: Value = response.json().await?;
        snowflake(&channel, "id")
            .ok_or_else(|| BotError::Decode("DM channel response carries no id".into()))
    }

    async fn guild_get(&self, what: &str) -> Result<Vec<Value>> {
        let guild_id = self
            .guild_id
            .ok_or_else(|| BotError::Config("discord.guild_id is not set".into()))?;
        let response = self
            .request(reqwest::Method::GET, &format!("guilds/{guild_id}/{what}"))
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            return Err(BotError::RemoteUnavailable(format!(
                "discord guild {what} failed ({status})"
            )));
        }
        Ok(response.json().await?)
    }

    /// Connect to the gateway and forward message events until the socket
    /// drops. Callers reconnect.
    pub async fn run(&self, inbound_tx: mpsc::Sender<InboundCommand>) -> Result<()> {
        if self.bot_token.trim().is_empty() {
            return Err(BotError::Config("discord bot token is empty".into()));
        }

        let gateway_resp: Value = self
            .request(reqwest::Method::GET, "gateway/bot")
            .send()
            .await?
            .json()
            .await?;
        let gateway_url = gateway_resp
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or("wss://gateway.discord.gg");
        let ws_url = format!("{gateway_url}/?v=10&encoding=json");

        let (stream, _) = tokio_tungstenite::connect_async(ws_url.as_str())
            .await
            .map_err(|e| BotError::ConnectionLost(format!("gateway handshake: {e}")))?;
        let (mut write, mut read) = stream.split();

        let hello = match read.next().await {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(_)) => return Err(BotError::Decode("unexpected gateway hello".into())),
            Some(Err(e)) => return Err(BotError::ConnectionLost(e.to_string())),
            None => return Err(BotError::ConnectionLost("gateway closed before hello".into())),
        };
        let hello: Value = serde_json::from_str(&hello)?;
        let heartbeat_interval_ms = hello
            .pointer("/d/heartbeat_interval")
            .and_then(Value::as_u64)
            .unwrap_or(41_250);

        let identify = json!({
            "op": 2,
            "d": {
                "token": self.bot_token,
                "intents": GATEWAY_INTENTS,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "robomania-bot",
                    "device": "robomania-bot"
                }
            }
        });
        write
            .send(Message::Text(identify.to_string()))
            .await
            .map_err(|e| BotError::ConnectionLost(e.to_string()))?;

        let mut heartbeat =
            tokio::time::interval(std::time::Duration::from_millis(heartbeat_interval_ms));
        let mut last_seq: Option<u64> = None;
        let mut bot_user_id: Option<u64> = None;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    let beat = json!({ "op": 1, "d": last_seq });
                    write
                        .send(Message::Text(beat.to_string()))
                        .await
                        .map_err(|e| BotError::ConnectionLost(format!("gateway heartbeat: {e}")))?;
                }
                maybe_msg = read.next() => {
                    let raw = match maybe_msg {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) | None => {
                            return Err(BotError::ConnectionLost("gateway closed".into()));
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(BotError::ConnectionLost(e.to_string())),
                    };
                    let Ok(payload) = serde_json::from_str::<Value>(&raw) else {
                        continue;
                    };
                    if let Some(seq) = payload.get("s").and_then(Value::as_u64) {
                        last_seq = Some(seq);
                    }
                    // op 7 = reconnect, op 9 = invalid session
                    match payload.get("op").and_then(Value::as_u64) {
                        Some(7) | Some(9) => {
                            return Err(BotError::ConnectionLost("gateway requested reconnect".into()));
                        }
                        _ => {}
                    }
                    let Some(data) = payload.get("d") else {
                        continue;
                    };
                    match payload.get("t").and_then(Value::as_str) {
                        Some("READY") => {
                            bot_user_id = data.get("user").and_then(|u| snowflake(u, "id"));
                            tracing::info!(bot_user_id = ?bot_user_id, "discord gateway ready");
                        }
                        Some("MESSAGE_CREATE") => {
                            let Some(command) = parse_message_create(data, bot_user_id) else {
                                continue;
                            };
                            if inbound_tx.send(command).await.is_err() {
                                return Ok(());
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

/// Discord encodes snowflakes as strings.
fn snowflake(value: &Value, key: &str) -> Option<u64> {
    match value.get(key)? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

fn parse_message_create(data: &Value, bot_user_id: Option<u64>) -> Option<InboundCommand> {
    let author = data.get("author")?;
    let author_id = snowflake(author, "id")?;
    if Some(author_id) == bot_user_id {
        return None;
    }
    if author.get("bot").and_then(Value::as_bool).unwrap_or(false) {
        return None;
    }
    let content = data.get("content").and_then(Value::as_str)?.trim();
    if content.is_empty() {
        return None;
    }
    let author_roles = data
        .pointer("/member/roles")
        .and_then(Value::as_array)
        .map(|roles| {
            roles
                .iter()
                .filter_map(|r| r.as_str().and_then(|s| s.parse().ok()))
                .collect()
        })
        .unwrap_or_default();
    let mentions = data
        .get("mentions")
        .and_then(Value::as_array)
        .map(|users| users.iter().filter_map(|u| snowflake(u, "id")).collect())
        .unwrap_or_default();
    Some(InboundCommand {
        author_id,
        author_roles,
        channel_id: snowflake(data, "channel_id")?,
        guild_id: snowflake(data, "guild_id"),
        content: content.to_owned(),
        mentions,
    })
}

#[async_trait]
impl ChatPlatform for DiscordChat {
    async fn send_to_channel(&self, channel_id: u64, message: &OutboundMessage) -> Result<()> {
        self.post_message(channel_id, message).await
    }

    async fn send_direct(&self, user_id: u64, message: &OutboundMessage) -> Result<()> {
        let dm_channel = self.open_dm(user_id).await?;
        self.post_message(dm_channel, message).await
    }

    async fn list_roles(&self) -> Result<Vec<GuildRole>> {
        let roles = self.guild_get("roles").await?;
        Ok(roles
            .iter()
            .filter_map(|r| {
                Some(GuildRole {
                    id: r.get("id")?.as_str()?.to_owned(),
                    name: r.get("name")?.as_str()?.to_owned(),
                })
            })
            .collect())
    }

    async fn list_channels(&self) -> Result<Vec<GuildChannel>> {
        let channels = self.guild_get("channels").await?;
        Ok(channels
            .iter()
            .filter_map(|c| {
                Some(GuildChannel {
                    id: c.get("id")?.as_str()?.to_owned(),
                    name: c.get("name")?.as_str()?.to_owned(),
                    kind: u8::try_from(c.get("type")?.as_u64()?).ok()?,
                })
            })
            .collect())
    }
}
