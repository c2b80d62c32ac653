//! Configuration types for the bot.
//!
//! Loaded from TOML with every section defaulted, then overridden from the
//! process environment (the deployment keeps secrets in `TOKEN.env`).

use crate::error::{BotError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level bot configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Chat platform credentials and guild settings.
    pub discord: DiscordConfig,
    /// Channels notifications are posted to.
    pub channels: ChannelsConfig,
    /// Team panel REST API.
    pub directory: DirectoryConfig,
    /// Panel event streams.
    pub stream: StreamConfig,
    /// Timer registry behaviour.
    pub scheduler: SchedulerConfig,
    /// Interactive command surface.
    pub commands: CommandsConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

/// Discord credentials and guild settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    /// Bot token (usually supplied through `DISCORD_TOKEN`).
    pub bot_token: String,
    /// Guild whose roles/channels are reported back to the panel.
    pub guild_id: Option<u64>,
    /// Users allowed to run operator commands.
    pub owner_ids: Vec<u64>,
    /// Role allowed to run operator commands.
    pub staff_role_id: Option<u64>,
}

/// Channel ids notifications are posted to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    /// Announcement posts.
    pub announcement: u64,
    /// Meeting announcements and reminders.
    pub meeting_notify: u64,
    /// New absence requests for staff review.
    pub absent_request: u64,
}

/// Team panel REST API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Base URL, e.g. `https://panel.example/api/`.
    pub api_url: String,
    /// API token sent as `Authorization: Token <token>`.
    pub api_token: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Web panel base URL used for link buttons (empty = no buttons).
    pub panel_url: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_token: String::new(),
            request_timeout_secs: 15,
            panel_url: String::new(),
        }
    }
}

/// Panel event stream settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Websocket base URL; the channel name and a trailing `/` are appended.
    pub ws_url: String,
    /// Channels to subscribe to.
    pub channels: Vec<String>,
    /// Delay before the first retry is doubled, in seconds.
    pub base_retry_delay_secs: u64,
    /// Consecutive failures after which a stream gives up.
    pub max_retries: u32,
    /// Upper bound on a single retry delay, in seconds (0 = unbounded).
    pub max_retry_delay_secs: u64,
    /// Handshake timeout in seconds.
    pub connect_timeout_secs: u64,
    /// `User-Agent` header sent with the handshake.
    pub user_agent: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ws_url: String::new(),
            channels: ["announcement", "meeting", "member", "auth"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
            base_retry_delay_secs: 2,
            max_retries: 15,
            max_retry_delay_secs: 3600,
            connect_timeout_secs: 20,
            user_agent: format!("robomania-bot/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl StreamConfig {
    pub fn base_retry_delay(&self) -> Duration {
        Duration::from_secs(self.base_retry_delay_secs)
    }

    /// `None` when unbounded.
    pub fn max_retry_delay(&self) -> Option<Duration> {
        (self.max_retry_delay_secs > 0).then(|| Duration::from_secs(self.max_retry_delay_secs))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

/// Timer registry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Reminder lead time when a meeting does not carry its own.
    pub default_notify_offset_secs: u64,
    /// How far in the future an already-due reminder is pushed.
    pub clamp_delay_secs: u64,
    /// Reminders fired later than this past their fire time are dropped.
    pub staleness_window_secs: u64,
    /// Upper bound on a single relay or deferred action.
    pub action_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_notify_offset_secs: crate::directory::types::DEFAULT_NOTIFY_OFFSET_SECS,
            clamp_delay_secs: 5,
            staleness_window_secs: 1000,
            action_timeout_secs: 30,
        }
    }
}

impl SchedulerConfig {
    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs.max(1))
    }
}

/// Interactive command settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    /// Prefix that marks a message as a command.
    pub prefix: String,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            prefix: "!".to_owned(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    pub level: String,
    /// Directory for daily-rolling log files (None = stderr only).
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "robomania=info".to_owned(),
            log_dir: None,
        }
    }
}

impl BotConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| BotError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| BotError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path.
    ///
    /// Resolves to `dirs::config_dir()/robomania/config.toml`. Override the
    /// directory with the `ROBOMANIA_CONFIG_DIR` environment variable.
    pub fn default_config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    fn config_dir() -> PathBuf {
        if let Some(override_dir) = std::env::var_os("ROBOMANIA_CONFIG_DIR") {
            return PathBuf::from(override_dir);
        }
        dirs::config_dir()
            .map(|d| d.join("robomania"))
            .unwrap_or_else(|| PathBuf::from("/tmp/robomania-config"))
    }

    /// Apply overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Config`] when a channel id variable is not numeric.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("DISCORD_TOKEN") {
            self.discord.bot_token = token;
        }
        if let Some(token) = get("ROBOWEB_API_TOKEN") {
            self.directory.api_token = token;
        }
        if let Some(url) = get("ROBOWEB_API_URL") {
            self.directory.api_url = url;
        }
        if let Some(url) = get("WS_URL") {
            self.stream.ws_url = url;
        }
        for (key, slot) in [
            ("ANNOUNCE_CHANNEL_ID", &mut self.channels.announcement),
            ("NOTIFY_CHANNEL_ID", &mut self.channels.meeting_notify),
            ("ABSENT_REQ_CHANNEL_ID", &mut self.channels.absent_request),
        ] {
            if let Some(raw) = get(key) {
                *slot = raw
                    .trim()
                    .parse()
                    .map_err(|_| BotError::Config(format!("{key} is not a channel id: {raw}")))?;
            }
        }
        Ok(())
    }

    /// Check that everything needed to connect is present.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Config`] naming the first missing setting.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("discord.bot_token", self.discord.bot_token.is_empty()),
            ("directory.api_url", self.directory.api_url.is_empty()),
            ("directory.api_token", self.directory.api_token.is_empty()),
            ("stream.ws_url", self.stream.ws_url.is_empty()),
        ];
        if let Some((name, _)) = required.iter().find(|(_, missing)| *missing) {
            return Err(BotError::Config(format!("{name} is not set")));
        }
        if self.stream.max_retries == 0 {
            return Err(BotError::Config("stream.max_retries must be at least 1".into()));
        }
        if self.stream.base_retry_delay_secs == 0 {
            return Err(BotError::Config(
                "stream.base_retry_delay_secs must be at least 1".into(),
            ));
        }
        if self.stream.channels.is_empty() {
            return Err(BotError::Config("stream.channels is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use std::collections::HashMap;

    fn complete() -> BotConfig {
        let mut config = BotConfig::default();
        config.discord.bot_token = "discord".into();
        config.directory.api_url = "https://panel.example/api/".into();
        config.directory.api_token = "panel".into();
        config.stream.ws_url = "wss://panel.example/ws/".into();
        config
    }

    #[test]
    fn defaults_match_reconnect_policy() {
        let config = BotConfig::default();
        assert_eq!(config.stream.base_retry_delay_secs, 2);
        assert_eq!(config.stream.max_retries, 15);
        assert_eq!(config.scheduler.default_notify_offset_secs, 300);
        assert_eq!(config.scheduler.staleness_window_secs, 1000);
        assert_eq!(config.commands.prefix, "!");
        assert!(config.stream.channels.iter().any(|c| c == "meeting"));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: BotConfig = toml::from_str(
            r#"
            [stream]
            ws_url = "wss://panel.example/ws/"
            max_retries = 3

            [channels]
            announcement = 11
            "#,
        )
        .unwrap();
        assert_eq!(config.stream.max_retries, 3);
        assert_eq!(config.stream.base_retry_delay_secs, 2);
        assert_eq!(config.channels.announcement, 11);
        assert_eq!(config.channels.meeting_notify, 0);
        assert_eq!(config.directory.request_timeout_secs, 15);
    }

    #[test]
    fn from_file_nonexistent_returns_error() {
        let result = BotConfig::from_file(Path::new("/nonexistent/path/config.toml"));
        assert!(matches!(result, Err(BotError::Io(_))));
    }

    #[test]
    fn default_config_path_ends_with_config_toml() {
        let path = BotConfig::default_config_path();
        let path_str = path.to_string_lossy();
        assert!(path_str.ends_with("config.toml"));
        assert!(path_str.contains("robomania"));
    }

    #[test]
    fn env_overrides_replace_secrets_and_channels() {
        let vars: HashMap<&str, &str> = [
            ("DISCORD_TOKEN", "tok"),
            ("ROBOWEB_API_URL", "http://localhost:8000/api/"),
            ("NOTIFY_CHANNEL_ID", "123456"),
            ("WS_URL", "   "),
        ]
        .into_iter()
        .collect();
        let mut config = BotConfig::default();
        config
            .apply_overrides_from(|k| vars.get(k).map(|v| (*v).to_owned()))
            .unwrap();
        assert_eq!(config.discord.bot_token, "tok");
        assert_eq!(config.directory.api_url, "http://localhost:8000/api/");
        assert_eq!(config.channels.meeting_notify, 123_456);
        assert!(config.stream.ws_url.is_empty());
    }

    #[test]
    fn non_numeric_channel_override_is_rejected() {
        let mut config = BotConfig::default();
        let err = config
            .apply_overrides_from(|k| (k == "ANNOUNCE_CHANNEL_ID").then(|| "general".to_owned()))
            .unwrap_err();
        assert!(err.to_string().contains("ANNOUNCE_CHANNEL_ID"));
    }

    #[test]
    fn validate_names_first_missing_setting() {
        assert!(complete().validate().is_ok());

        let mut config = complete();
        config.directory.api_token.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("directory.api_token"));

        let mut config = complete();
        config.stream.max_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_max_delay_means_unbounded() {
        let mut stream = StreamConfig::default();
        assert_eq!(stream.max_retry_delay(), Some(Duration::from_secs(3600)));
        stream.max_retry_delay_secs = 0;
        assert!(stream.max_retry_delay().is_none());
    }
}
