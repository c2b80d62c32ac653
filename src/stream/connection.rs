//! Reconnecting websocket subscription to one panel event channel.

use super::backoff::{ConnectionState, ConnectionStatus};
use super::outbox::StreamOutbox;
use crate::config::StreamConfig;
use crate::error::{BotError, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Keepalive ping cadence on an idle connection.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Consumer of one stream's frames.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    /// Called after every successful handshake.
    async fn on_connected(&self, channel: &str);

    /// Called for every inbound text frame, in arrival order.
    async fn handle_frame(&self, channel: &str, text: &str);
}

/// One reconnecting subscription.
pub struct EventStream {
    channel: String,
    url: String,
    authorization: HeaderValue,
    user_agent: HeaderValue,
    connect_timeout: Duration,
    state: ConnectionState,
    status_tx: watch::Sender<ConnectionStatus>,
    outbound_rx: mpsc::UnboundedReceiver<String>,
}

impl EventStream {
    /// Build the stream for `channel` and the outbox that writes to it.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Config`] when the URL or credentials cannot be
    /// used in a handshake.
    pub fn new(config: &StreamConfig, token: &str, channel: &str) -> Result<(Self, StreamOutbox)> {
        let url = format!("{}{channel}/", config.ws_url);
        url::Url::parse(&url).map_err(|e| BotError::Config(format!("invalid stream url {url}: {e}")))?;
        let authorization = HeaderValue::from_str(&format!("Token {token}"))
            .map_err(|_| BotError::Config("stream token is not a valid header value".into()))?;
        let user_agent = HeaderValue::from_str(&config.user_agent)
            .map_err(|_| BotError::Config("stream.user_agent is not a valid header value".into()))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let stream = Self {
            channel: channel.to_owned(),
            url,
            authorization,
            user_agent,
            connect_timeout: config.connect_timeout(),
            state: ConnectionState::new(
                config.base_retry_delay(),
                config.max_retries,
                config.max_retry_delay(),
            ),
            status_tx,
            outbound_rx,
        };
        let outbox = StreamOutbox::new(channel.to_owned(), outbound_tx, status_rx);
        Ok((stream, outbox))
    }

    /// Override the backoff base and cap.
    #[must_use]
    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Option<Duration>) -> Self {
        self.state = ConnectionState::new(base_delay, self.state.max_retries(), max_delay);
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Keep the subscription alive until cancelled or the retry budget runs
    /// out.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::MaxRetriesExceeded`] once the stream gives up.
    pub async fn run(
        mut self,
        handler: Arc<dyn FrameHandler>,
        cancel: CancellationToken,
    ) -> Result<()> {
        loop {
            self.state.connecting();
            self.publish();

            let outcome = tokio::select! {
                () = cancel.cancelled() => break,
                outcome = self.session(handler.as_ref()) => outcome,
            };
            let err = match outcome {
                Ok(()) => BotError::ConnectionLost("closed by server".into()),
                Err(e) => e,
            };

            let Some(delay) = self.state.record_failure() else {
                self.publish();
                error!(
                    channel = %self.channel,
                    attempts = self.state.retry_count,
                    "giving up on event stream: {err}"
                );
                return Err(BotError::MaxRetriesExceeded {
                    channel: self.channel.clone(),
                    attempts: self.state.retry_count,
                });
            };
            self.publish();
            warn!(
                channel = %self.channel,
                retry_count = self.state.retry_count,
                retry_in = ?delay,
                "event stream failed: {err}"
            );

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }
        self.state.status = ConnectionStatus::Disconnected;
        self.publish();
        info!(channel = %self.channel, "event stream stopped");
        Ok(())
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.state.status);
    }

    /// One connection: handshake, then receive until the socket fails.
    async fn session(&mut self, handler: &dyn FrameHandler) -> Result<()> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| BotError::ConnectionLost(format!("bad handshake request: {e}")))?;
        request
            .headers_mut()
            .insert("Authorization", self.authorization.clone());
        request
            .headers_mut()
            .insert("User-Agent", self.user_agent.clone());

        let (ws, _) = tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(request))
            .await
            .map_err(|_| BotError::ConnectionLost(format!("handshake timed out after {:?}", self.connect_timeout)))?
            .map_err(|e| BotError::ConnectionLost(format!("handshake: {e}")))?;
        let (mut write, mut read) = ws.split();

        self.state.connected();
        self.publish();
        info!(channel = %self.channel, "event stream connected");
        handler.on_connected(&self.channel).await;

        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await;

        loop {
            tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!(channel = %self.channel, bytes = text.len(), "frame received");
                        handler.handle_frame(&self.channel, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(BotError::ConnectionLost(format!("read: {e}"))),
                },
                Some(text) = self.outbound_rx.recv() => {
                    write
                        .send(Message::Text(text))
                        .await
                        .map_err(|e| BotError::ConnectionLost(format!("send: {e}")))?;
                }
                _ = ping.tick() => {
                    write
                        .send(Message::Ping(Vec::new()))
                        .await
                        .map_err(|e| BotError::ConnectionLost(format!("ping: {e}")))?;
                }
            }
        }
    }
}
