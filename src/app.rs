//! Runtime wiring.
//!
//! Builds every component from [`BotConfig`] and runs them on the current
//! runtime: one event stream task per panel channel, the scheduler loop, the
//! Discord gateway and the command router. Returns when `shutdown` fires or
//! every stream has given up.

use crate::chat::{DiscordChat, InboundCommand};
use crate::clock::{Clock, SystemClock};
use crate::commands::CommandRouter;
use crate::config::BotConfig;
use crate::directory::{Directory, HttpDirectory};
use crate::dispatch::Dispatcher;
use crate::error::{BotError, Result};
use crate::reconcile::Reconciler;
use crate::relay::Relay;
use crate::scheduler::{DerivationRules, EntityKind, Scheduler};
use crate::stream::{ConnectionState, EventStream, FrameHandler};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const GATEWAY_BASE_DELAY: Duration = Duration::from_secs(1);
const GATEWAY_MAX_DELAY: Duration = Duration::from_secs(60);
const COMMAND_QUEUE: usize = 64;

/// Run the bot until `shutdown` is cancelled.
///
/// # Errors
///
/// Fails on unusable configuration. Returns
/// [`BotError::MaxRetriesExceeded`] when every event stream has given up.
pub async fn run(config: BotConfig, shutdown: CancellationToken) -> Result<()> {
    config.validate()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let directory = Arc::new(HttpDirectory::new(&config.directory)?);
    let discord = Arc::new(DiscordChat::new(&config.discord));

    let mut relay = Relay::new(discord.clone(), directory.clone(), clock.clone(), &config);
    let mut announcement_outbox = None;
    let mut streams = Vec::new();
    for channel in &config.stream.channels {
        let (stream, outbox) =
            EventStream::new(&config.stream, &config.directory.api_token, channel)?;
        if channel == EntityKind::Announcement.as_str() {
            announcement_outbox = Some(outbox.clone());
        }
        relay = relay.with_outbox(outbox);
        streams.push(stream);
    }
    let relay = Arc::new(relay);

    let (scheduler, handle) = Scheduler::new(&config.scheduler, clock.clone(), relay.clone());
    let scheduler_task = scheduler.run();
    let rules = DerivationRules::from(&config.scheduler);
    let reconciler = Arc::new(Reconciler::new(
        directory.clone(),
        handle.clone(),
        relay.clone(),
        clock.clone(),
        rules,
        config.scheduler.action_timeout(),
    ));

    match directory.index_members().await {
        Ok(count) => info!(count, "member index built"),
        Err(e) => warn!("member index unavailable, falling back to lookups: {e}"),
    }
    match reconciler.reload_all().await {
        Ok(report) => info!("startup reload: {}", report.summary()),
        Err(e) => warn!("startup reload failed, waiting for stream handshakes: {e}"),
    }

    let dispatcher: Arc<dyn FrameHandler> = Arc::new(Dispatcher::new(
        relay,
        handle,
        reconciler.clone(),
        clock.clone(),
        rules,
    ));
    let mut stream_tasks = JoinSet::new();
    for stream in streams {
        let handler = Arc::clone(&dispatcher);
        let cancel = shutdown.child_token();
        stream_tasks.spawn(stream.run(handler, cancel));
    }

    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
    let mut router = CommandRouter::new(
        discord.clone(),
        directory,
        reconciler,
        clock,
        &config,
    );
    if let Some(outbox) = announcement_outbox {
        router = router.with_announcement_outbox(outbox);
    }
    let router_task = tokio::spawn(router.run(command_rx));
    let gateway_task = tokio::spawn(gateway_loop(discord, command_tx, shutdown.child_token()));
    info!(streams = stream_tasks.len(), "bot running");

    let outcome = supervise(&mut stream_tasks, &shutdown).await;

    shutdown.cancel();
    while stream_tasks.join_next().await.is_some() {}
    gateway_task.abort();
    router_task.abort();
    scheduler_task.abort();
    info!("bot stopped");
    outcome
}

/// Wait for shutdown, logging streams that give up. Errors once none are left.
async fn supervise(
    streams: &mut JoinSet<Result<()>>,
    shutdown: &CancellationToken,
) -> Result<()> {
    let mut last_failure = None;
    loop {
        tokio::select! {
            () = shutdown.cancelled() => return Ok(()),
            joined = streams.join_next() => match joined {
                Some(Ok(Ok(()))) => {}
                Some(Ok(Err(e))) => {
                    error!(remaining = streams.len(), "event stream stopped for good: {e}");
                    last_failure = Some(e);
                }
                Some(Err(e)) => error!("event stream task panicked: {e}"),
                None => {
                    return Err(last_failure.unwrap_or_else(|| {
                        BotError::ConnectionLost("every event stream stopped".into())
                    }));
                }
            },
        }
    }
}

/// Keep the gateway session up. Token errors end the loop; dropped sessions
/// (including gateway-requested reconnects) retry with capped backoff.
async fn gateway_loop(
    discord: Arc<DiscordChat>,
    commands: mpsc::Sender<InboundCommand>,
    cancel: CancellationToken,
) {
    let mut state = ConnectionState::new(GATEWAY_BASE_DELAY, u32::MAX, Some(GATEWAY_MAX_DELAY));
    loop {
        state.connecting();
        let outcome = tokio::select! {
            () = cancel.cancelled() => return,
            outcome = discord.run(commands.clone()) => outcome,
        };
        let delay = match outcome {
            Ok(()) => {
                info!("command router stopped, closing gateway");
                return;
            }
            Err(BotError::Config(e)) => {
                error!("gateway disabled: {e}");
                return;
            }
            Err(e) => {
                let Some(delay) = state.record_failure() else {
                    return;
                };
                warn!(retry_count = state.retry_count, retry_in = ?delay, "gateway session failed: {e}");
                delay
            }
        };
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
    }
}
