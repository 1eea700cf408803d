pub mod api;
pub mod types;

pub use api::{BotApi, TelegramApi};
pub use types::{Chat, ChatKind, Message, Update, User};
