use std::time::Duration;

use thiserror::Error;

/// Errors raised by the Telegram adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The bot token is missing from both the environment and the config file.
    #[error("environment `HUBOT_TELEGRAM_TOKEN` is required.")]
    MissingToken,
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The Telegram API answered with `ok: false`.
    #[error("Telegram API error: {description}")]
    Api {
        code: Option<i64>,
        description: String,
    },
    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The response body could not be decoded.
    #[error("JSON parse error: {0}")]
    Decode(#[from] serde_json::Error),
    /// `getUpdates` did not answer within the request timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("adapter is already running")]
    AlreadyRunning,
    /// `run` after `close`: a closed adapter does not restart.
    #[error("adapter has been closed")]
    Closed,
}
