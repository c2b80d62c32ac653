//! Chat platform collaborator: message model, platform trait and the Discord
//! adapter (REST for sends, gateway websocket for inbound commands).

pub mod discord;
pub mod message;
pub mod traits;

pub use discord::DiscordChat;
pub use message::{COLOR_DEFAULT, COLOR_ERROR, Embed, EmbedField, OutboundMessage};
pub use traits::{ChatPlatform, GuildChannel, GuildRole, InboundCommand};
