//! Telegram adapter for a Hubot-style chat robot.
//!
//! [`TelegramAdapter`] long-polls the Bot API, classifies every update into a
//! [`Message`] for the [`Robot`], keeps the robot's [`UserStore`] in sync with
//! what Telegram reports about senders, and sends the robot's answers back.

pub mod classify;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod platform;
pub mod poller;
pub mod robot;
pub mod telegram;
pub mod users;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::AdapterError;
pub use platform::telegram::TelegramAdapter;
pub use platform::{CatchAllMessage, Envelope, Message, TextMessage};
pub use robot::{AdapterEvent, Robot};
pub use users::{UserRecord, UserStore};
