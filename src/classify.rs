//! Turns raw updates into robot messages.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::dispatch::UpdateHandler;
use crate::platform::{CatchAllMessage, Message, TextMessage};
use crate::robot::Robot;
use crate::telegram::{ChatKind, Message as TgMessage, Update, User};
use crate::users::{diff_and_merge, UserRecord};

/// `text` without a leading `prefix`, compared case-insensitively.
fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let mut chars = text.char_indices();
    let mut end = 0;
    for p in prefix.chars() {
        let (idx, c) = chars.next()?;
        if !c.to_lowercase().eq(p.to_lowercase()) {
            return None;
        }
        end = idx + c.len_utf8();
    }
    Some(&text[end..])
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Normalize addressing so the robot's own mention detection matches.
///
/// `@<bot_username>` at the start becomes `"<robot_name>: "`. In a private
/// chat, text not already starting with the robot name gets that prefix.
/// Applying the rewrite to its own output changes nothing.
pub fn rewrite_text(text: &str, bot_username: &str, robot_name: &str, private: bool) -> String {
    if !bot_username.is_empty() {
        let mention = text
            .strip_prefix('@')
            .and_then(|t| strip_prefix_ignore_case(t, bot_username))
            .filter(|rest| !rest.starts_with(is_word_char));

        if let Some(rest) = mention {
            let rest = rest.trim_start_matches(|c: char| c == ',' || c == ':' || c.is_whitespace());
            return if rest.is_empty() {
                format!("{}:", robot_name)
            } else {
                format!("{}: {}", robot_name, rest)
            };
        }
    }

    if private && strip_prefix_ignore_case(text, robot_name).is_none() {
        return format!("{}: {}", robot_name, text);
    }

    text.to_string()
}

/// Classifies updates for one robot and feeds the results to it.
pub struct Classifier<R> {
    robot: Arc<R>,
    bot_username: String,
}

impl<R: Robot> Classifier<R> {
    pub fn new(robot: Arc<R>, bot_username: impl Into<String>) -> Self {
        Self {
            robot,
            bot_username: bot_username.into(),
        }
    }

    /// Exactly one message per update. Shapes nobody enumerated degrade to an
    /// untagged catch-all instead of failing.
    pub async fn classify(&self, update: Update) -> Message {
        let update = Arc::new(update);

        if let Some((field, msg)) = update.message_like() {
            let user = self.sync_sender(msg).await;
            let text = rewrite_text(
                msg.body(),
                &self.bot_username,
                self.robot.name(),
                msg.chat.kind == ChatKind::Private,
            );
            debug!(
                "Telegram: {} #{} from {} in chat {}",
                field, msg.message_id, user.id, msg.chat.id
            );
            return Message::Text(TextMessage {
                text,
                user,
                id: msg.message_id,
                room: msg.chat.id,
                update: Arc::clone(&update),
            });
        }

        if let Some((field, payload)) = update.unsupported() {
            let user = payload.get("from").and_then(|from| {
                match serde_json::from_value::<User>(from.clone()) {
                    Ok(from) => Some(UserRecord::from_telegram(&from, None)),
                    Err(e) => {
                        debug!(
                            "Telegram: update {} has an unreadable {}.from - {}",
                            update.update_id, field, e
                        );
                        None
                    }
                }
            });
            debug!("Telegram: update {} is a {}", update.update_id, field);
            return Message::CatchAll(CatchAllMessage {
                field: Some(field),
                payload: Some(payload.clone()),
                user,
                update: Arc::clone(&update),
            });
        }

        warn!(
            "Telegram: unrecognized update {} with fields {:?}",
            update.update_id,
            update.extra.keys().collect::<Vec<_>>()
        );
        Message::CatchAll(CatchAllMessage {
            field: None,
            payload: None,
            user: None,
            update,
        })
    }

    /// Resolve the sender against the robot's user store, merging anything
    /// new we learned about them.
    async fn sync_sender(&self, msg: &TgMessage) -> UserRecord {
        let observed = match (&msg.from, &msg.sender_chat) {
            (Some(from), _) => UserRecord::from_telegram(from, Some(msg.chat.id)),
            (None, Some(sender)) => UserRecord::from_chat(sender, msg.chat.id),
            (None, None) => UserRecord::from_chat(&msg.chat, msg.chat.id),
        };

        let users = self.robot.users();
        let known = users.user_for_id(observed.clone()).await;
        let changes = diff_and_merge(users, &known, &observed).await;
        if changes.is_empty() {
            return known;
        }

        debug!("Telegram: user {} changed {} attribute(s)", observed.id, changes.len());
        users.get(observed.id).await.unwrap_or(observed)
    }
}

#[async_trait]
impl<R: Robot> UpdateHandler for Classifier<R> {
    async fn handle_update(&self, update: Update) {
        let message = self.classify(update).await;
        self.robot.receive(message).await;
    }
}
