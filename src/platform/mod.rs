pub mod telegram;

use std::sync::Arc;

use serde_json::Value;

use crate::telegram::Update;
use crate::users::UserRecord;

/// A text message addressed to the robot, already normalized.
#[derive(Debug, Clone)]
pub struct TextMessage {
    pub text: String,
    pub user: UserRecord,
    /// Telegram message id, used to thread replies.
    pub id: i64,
    /// Chat the message was posted in.
    pub room: i64,
    pub update: Arc<Update>,
}

/// Any update the robot has no dedicated message type for.
#[derive(Debug, Clone)]
pub struct CatchAllMessage {
    /// Update field that matched, if any.
    pub field: Option<&'static str>,
    pub payload: Option<Value>,
    pub user: Option<UserRecord>,
    pub update: Arc<Update>,
}

#[derive(Debug, Clone)]
pub enum Message {
    Text(TextMessage),
    CatchAll(CatchAllMessage),
}

impl Message {
    pub fn user(&self) -> Option<&UserRecord> {
        match self {
            Message::Text(m) => Some(&m.user),
            Message::CatchAll(m) => m.user.as_ref(),
        }
    }
}

/// Where an outgoing message goes.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub room: i64,
    pub user: Option<UserRecord>,
    /// Message being answered; `reply` threads to it.
    pub message_id: Option<i64>,
}

impl Envelope {
    pub fn to_room(room: i64) -> Self {
        Self {
            room,
            user: None,
            message_id: None,
        }
    }
}

impl From<&TextMessage> for Envelope {
    fn from(message: &TextMessage) -> Self {
        Self {
            room: message.room,
            user: Some(message.user.clone()),
            message_id: Some(message.id),
        }
    }
}
