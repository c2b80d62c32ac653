//! Panel events: wire frames and the event-to-task mapper.

pub mod frames;
pub mod mapper;

pub use frames::{InboundEvent, OutboundFrame};
pub use mapper::{EventPlan, RelayAction, plan, upsert_ops};
