use super::backoff::ConnectionStatus;
use crate::error::{BotError, Result};
use crate::events::OutboundFrame;
use tokio::sync::{mpsc, watch};

/// Sending half of a stream: queues frames for the live connection.
#[derive(Debug, Clone)]
pub struct StreamOutbox {
    channel: String,
    tx: mpsc::UnboundedSender<String>,
    status: watch::Receiver<ConnectionStatus>,
}

impl StreamOutbox {
    pub(crate) fn new(
        channel: String,
        tx: mpsc::UnboundedSender<String>,
        status: watch::Receiver<ConnectionStatus>,
    ) -> Self {
        Self {
            channel,
            tx,
            status,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Queue a frame. Fails with `ConnectionLost` unless the stream is
    /// connected right now.
    pub fn send(&self, frame: &OutboundFrame) -> Result<()> {
        let status = self.status();
        if status != ConnectionStatus::Connected {
            return Err(BotError::ConnectionLost(format!(
                "`{}` stream is {status:?}",
                self.channel
            )));
        }
        let text = frame.encode()?;
        self.tx
            .send(text)
            .map_err(|_| BotError::ConnectionLost(format!("`{}` stream has stopped", self.channel)))
    }

    /// Wait until the stream reports `status`.
    pub async fn wait_for(&mut self, status: ConnectionStatus) -> Result<()> {
        self.status
            .wait_for(|s| *s == status)
            .await
            .map(|_| ())
            .map_err(|_| BotError::ConnectionLost(format!("`{}` stream has stopped", self.channel)))
    }
}
