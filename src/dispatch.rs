//! Frame dispatch: decode, map, relay, then mutate the registry.

use crate::clock::Clock;
use crate::events::{EventPlan, InboundEvent, plan};
use crate::reconcile::Reconciler;
use crate::relay::Relay;
use crate::scheduler::{DerivationRules, EntityKind, SchedulerHandle};
use crate::stream::FrameHandler;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Consumer of every panel stream.
pub struct Dispatcher {
    relay: Arc<Relay>,
    scheduler: SchedulerHandle,
    reconciler: Arc<Reconciler>,
    clock: Arc<dyn Clock>,
    rules: DerivationRules,
}

impl Dispatcher {
    pub fn new(
        relay: Arc<Relay>,
        scheduler: SchedulerHandle,
        reconciler: Arc<Reconciler>,
        clock: Arc<dyn Clock>,
        rules: DerivationRules,
    ) -> Self {
        Self {
            relay,
            scheduler,
            reconciler,
            clock,
            rules,
        }
    }

    /// Handle one text frame. Returns the plan that was carried out, or
    /// `None` when the frame was dropped.
    ///
    /// Relays go out before registry operations are applied. A failed relay
    /// is logged and does not stop the registry update.
    pub async fn dispatch(&self, channel: &str, text: &str) -> Option<EventPlan> {
        let event = match InboundEvent::decode(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(channel, "dropping malformed frame: {e}");
                return None;
            }
        };
        if let InboundEvent::Unknown { kind } = &event {
            info!(channel, event = %kind, "ignoring unknown event type");
            return None;
        }
        let event_type = event.type_name().to_owned();
        let plan = plan(event, self.clock.now(), &self.rules);
        debug!(
            channel,
            event = %event_type,
            relays = plan.relays.len(),
            ops = plan.ops.len(),
            "event mapped"
        );

        for action in &plan.relays {
            let name = action.name();
            if let Err(e) = self.relay.relay(action.clone()).await {
                warn!(
                    channel,
                    event = %event_type,
                    relay = name,
                    kind = e.kind_name(),
                    "relay failed: {e}"
                );
            }
        }
        if let Err(e) = self.scheduler.apply(plan.ops.clone()).await {
            error!(channel, event = %event_type, "registry update lost: {e}");
        }
        Some(plan)
    }
}

#[async_trait]
impl FrameHandler for Dispatcher {
    async fn on_connected(&self, channel: &str) {
        // Events may have been missed while disconnected.
        let Some(kind) = EntityKind::for_channel(channel) else {
            return;
        };
        let reconciler = Arc::clone(&self.reconciler);
        tokio::spawn(async move {
            match reconciler.reload(&[kind]).await {
                Ok(report) => debug!(%kind, "reconnect reload done: {}", report.summary()),
                Err(e) => warn!(%kind, "reconnect reload failed: {e}"),
            }
        });
    }

    async fn handle_frame(&self, channel: &str, text: &str) {
        self.dispatch(channel, text).await;
    }
}
