//! Reconnecting panel event streams.
//!
//! One [`EventStream`] per channel (`announcement`, `meeting`, `member`,
//! `auth`). Each reconnects with exponential backoff and hands every text
//! frame to a [`FrameHandler`]; frames going back to the panel are queued on
//! the matching [`StreamOutbox`].

pub mod backoff;
pub mod connection;
pub mod outbox;

pub use backoff::{ConnectionState, ConnectionStatus};
pub use connection::{EventStream, FrameHandler};
pub use outbox::StreamOutbox;
