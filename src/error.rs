//! Error types for the bot.

/// Top-level error type shared by the scheduler, streams and relays.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// Transient socket failure; triggers reconnect with backoff.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Malformed inbound frame or payload.
    #[error("decode error: {0}")]
    Decode(String),

    /// The remote directory API answered with a failure or was unreachable.
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// A chat message could not be delivered to one recipient.
    #[error("notification delivery failed: {0}")]
    NotificationDelivery(String),

    /// The event stream exhausted its reconnect budget.
    #[error("max retries exceeded on `{channel}` stream after {attempts} attempts")]
    MaxRetriesExceeded {
        /// Stream channel name.
        channel: String,
        /// Number of consecutive failures observed.
        attempts: u32,
    },

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// The scheduler loop is gone (shut down or panicked).
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// An awaited operation exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Interactive command rejected (bad arguments, permissions).
    #[error("command error: {0}")]
    Command(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BotError {
    /// Variant name rendered next to the message in user-visible failure notices.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::ConnectionLost(_) => "ConnectionLost",
            Self::Decode(_) => "DecodeError",
            Self::RemoteUnavailable(_) => "RemoteUnavailable",
            Self::NotificationDelivery(_) => "NotificationDeliveryFailure",
            Self::MaxRetriesExceeded { .. } => "MaxRetriesExceeded",
            Self::Config(_) => "ConfigError",
            Self::Scheduler(_) => "SchedulerError",
            Self::Timeout(_) => "Timeout",
            Self::Command(_) => "CommandError",
            Self::Io(_) => "IoError",
        }
    }

    /// Whether the failure should be retried by the caller rather than surfaced.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost(_) | Self::RemoteUnavailable(_) | Self::Timeout(_)
        )
    }
}

impl From<serde_json::Error> for BotError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for BotError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::RemoteUnavailable(err.to_string())
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, BotError>;
