//! Bot API objects, reduced to the fields the adapter reads.
//!
//! [`Update`] keeps every payload it does not model in [`Update::extra`] so
//! that unsupported update kinds can still be handed to the robot verbatim.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Message-like fields in the order they are inspected.
pub const MESSAGE_FIELDS: [&str; 4] = [
    "message",
    "edited_message",
    "channel_post",
    "edited_channel_post",
];

/// Update kinds with no dedicated handling, in the order they are inspected.
pub const UNSUPPORTED_FIELDS: [&str; 14] = [
    "inline_query",
    "chosen_inline_result",
    "callback_query",
    "shipping_query",
    "pre_checkout_query",
    "poll",
    "poll_answer",
    "my_chat_member",
    "chat_member",
    "chat_join_request",
    "message_reaction",
    "message_reaction_count",
    "chat_boost",
    "removed_chat_boost",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_post: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_channel_post: Option<Message>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Update {
    /// The first message-like payload, with the field it came from.
    pub fn message_like(&self) -> Option<(&'static str, &Message)> {
        let candidates = [
            &self.message,
            &self.edited_message,
            &self.channel_post,
            &self.edited_channel_post,
        ];
        MESSAGE_FIELDS
            .iter()
            .zip(candidates)
            .find_map(|(field, msg)| msg.as_ref().map(|m| (*field, m)))
    }

    /// The first unsupported payload, with the field it came from.
    /// Explicit `null` values count as absent.
    pub fn unsupported(&self) -> Option<(&'static str, &Value)> {
        UNSUPPORTED_FIELDS.iter().find_map(|field| {
            self.extra
                .get(*field)
                .filter(|v| !v.is_null())
                .map(|v| (*field, v))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_chat: Option<Chat>,
    pub chat: Chat,
    #[serde(default)]
    pub date: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

impl Message {
    pub fn body(&self) -> &str {
        self.text
            .as_deref()
            .or(self.caption.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: ChatKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
    #[serde(other)]
    Unknown,
}
