//! Robomania: Discord bot for the robotics team web panel.
//!
//! The panel pushes announcement, meeting, member and login events over
//! websocket streams. The bot relays them into Discord and keeps a registry of
//! deferred actions (meeting reminders, meeting start notices, announcement
//! unpins) that is rebuilt from the panel API after every reconnect.
//!
//! # Architecture
//!
//! - **stream**: reconnecting event streams with exponential backoff
//! - **events**: frame decoding and the event-to-task mapper
//! - **scheduler**: timer registry owned by a single scheduler loop
//! - **reconcile**: registry rebuild from authoritative panel state
//! - **relay**: notification rendering and deferred-action bodies
//! - **directory** / **chat**: the panel REST API and Discord collaborators

pub mod app;
pub mod chat;
pub mod clock;
pub mod commands;
pub mod config;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod reconcile;
pub mod relay;
pub mod scheduler;
pub mod stream;
pub mod timestamp;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::BotConfig;
pub use error::{BotError, Result};
pub use reconcile::{Reconciler, ReloadReport};
pub use scheduler::{Scheduler, SchedulerHandle};
