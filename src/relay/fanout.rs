//! Best-effort delivery to many recipients.

use crate::chat::{ChatPlatform, OutboundMessage};
use crate::error::BotError;
use tracing::{info, warn};

/// Outcome of one fan-out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    /// Recipient ids paired with the reason delivery failed.
    pub failed: Vec<(u64, String)>,
}

impl FanoutReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed.len()
    }

    fn record(&mut self, user_id: u64, outcome: Result<(), BotError>) {
        match outcome {
            Ok(()) => self.delivered += 1,
            Err(e) => {
                warn!(user_id, kind = e.kind_name(), "direct message not delivered: {e}");
                self.failed.push((user_id, e.to_string()));
            }
        }
    }
}

/// DM every recipient independently. Failures are logged and collected;
/// they never stop the remaining sends.
pub async fn direct_to_all(
    chat: &dyn ChatPlatform,
    recipients: &[(u64, OutboundMessage)],
    purpose: &str,
) -> FanoutReport {
    let mut report = FanoutReport::default();
    for (user_id, message) in recipients {
        let outcome = chat.send_direct(*user_id, message).await;
        report.record(*user_id, outcome);
    }
    info!(
        purpose,
        delivered = report.delivered,
        failed = report.failed.len(),
        "fan-out finished"
    );
    report
}
