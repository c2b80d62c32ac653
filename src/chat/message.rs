//! Outbound chat message model and its Discord wire form.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

/// Discord rejects message content above this many characters.
pub const MAX_CONTENT_CHARS: usize = 2000;

/// Brand color used for routine notices.
pub const COLOR_DEFAULT: u32 = 0x01_2A5E;
/// Color used for failure and cancellation notices.
pub const COLOR_ERROR: u32 = 0xF1_411C;

/// One `name: value` row of an embed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Rich embed attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Embed {
    pub title: String,
    pub description: Option<String>,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    pub footer: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Embed {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            color: COLOR_DEFAULT,
            fields: Vec::new(),
            footer: None,
            timestamp: None,
        }
    }

    #[must_use]
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    #[must_use]
    pub fn color(mut self, color: u32) -> Self {
        self.color = color;
        self
    }

    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }

    #[must_use]
    pub fn footer(mut self, text: impl Into<String>) -> Self {
        self.footer = Some(text.into());
        self
    }

    #[must_use]
    pub fn timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.timestamp = Some(at);
        self
    }

    /// Value of the first field with this name.
    pub fn field_value(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }

    fn to_json(&self) -> Value {
        let mut body = json!({
            "title": self.title,
            "color": self.color,
            "fields": self.fields.iter().map(|f| json!({
                "name": f.name,
                "value": f.value,
                "inline": f.inline,
            })).collect::<Vec<_>>(),
        });
        if let Some(description) = &self.description {
            body["description"] = json!(description);
        }
        if let Some(footer) = &self.footer {
            body["footer"] = json!({ "text": footer });
        }
        if let Some(at) = self.timestamp {
            body["timestamp"] = json!(at.to_rfc3339());
        }
        body
    }
}

/// URL button rendered under a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkButton {
    pub label: String,
    pub url: String,
}

/// A message ready to be posted to a channel or sent as a DM.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundMessage {
    pub content: String,
    pub embed: Option<Embed>,
    pub buttons: Vec<LinkButton>,
    /// Allow `@everyone` in `content` to ping.
    pub mention_everyone: bool,
}

impl OutboundMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: truncate_chars(&content.into(), MAX_CONTENT_CHARS),
            ..Self::default()
        }
    }

    pub fn embed(embed: Embed) -> Self {
        Self {
            embed: Some(embed),
            ..Self::default()
        }
    }

    /// `@everyone` ping followed by the embed.
    pub fn everyone(embed: Embed) -> Self {
        Self {
            content: "@everyone".to_owned(),
            embed: Some(embed),
            mention_everyone: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_button(mut self, label: impl Into<String>, url: impl Into<String>) -> Self {
        self.buttons.push(LinkButton {
            label: label.into(),
            url: url.into(),
        });
        self
    }

    /// Discord `POST /channels/{id}/messages` body.
    pub fn to_discord_json(&self) -> Value {
        let parse = if self.mention_everyone {
            vec!["everyone", "users"]
        } else {
            vec!["users"]
        };
        let mut body = json!({
            "content": self.content,
            "allowed_mentions": { "parse": parse },
        });
        if let Some(embed) = &self.embed {
            body["embeds"] = json!([embed.to_json()]);
        }
        if !self.buttons.is_empty() {
            // Action row (type 1) of link buttons (type 2, style 5).
            let buttons: Vec<Value> = self
                .buttons
                .iter()
                .map(|b| json!({ "type": 2, "style": 5, "label": b.label, "url": b.url }))
                .collect();
            body["components"] = json!([{ "type": 1, "components": buttons }]);
        }
        body
    }
}

/// Truncate to at most `max` characters, marking the cut with an ellipsis.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_owned();
    }
    let mut out: String = text.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}
