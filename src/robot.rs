use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AdapterError;
use crate::platform::Message;
use crate::users::UserStore;

/// The chat-bot framework the adapter feeds.
#[async_trait]
pub trait Robot: Send + Sync + 'static {
    /// Name the robot answers to, e.g. `"Hubot"` in `"Hubot: ping"`.
    fn name(&self) -> &str;

    fn users(&self) -> &UserStore;

    /// Hand a classified message to the robot's pipeline.
    async fn receive(&self, message: Message);
}

/// Lifecycle notifications broadcast to the host.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    Connected,
    Disconnected,
    /// A recoverable polling failure. The loop keeps running.
    ClientError(Arc<AdapterError>),
}
