use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::TelegramConfig;
use crate::error::AdapterError;
use crate::telegram::types::{Update, User};

/// Extra seconds allowed on top of the long-poll timeout so the socket
/// outlives the time Telegram holds the request.
const POLL_TIMEOUT_MARGIN_SECS: u64 = 10;

/// The remote operations the adapter needs from the Bot API.
#[async_trait]
pub trait TelegramApi: Send + Sync + 'static {
    async fn get_me(&self) -> Result<User, AdapterError>;

    async fn delete_webhook(&self) -> Result<(), AdapterError>;

    /// Fetch updates with `update_id >= offset`. `long_poll_secs` of zero
    /// asks for an immediate answer.
    async fn get_updates(
        &self,
        offset: Option<i64>,
        long_poll_secs: u32,
    ) -> Result<Vec<Update>, AdapterError>;

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), AdapterError>;

    async fn reply_to_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), AdapterError>;
}

/// Bot API response envelope.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

/// [`TelegramApi`] over HTTPS, one JSON POST per method.
pub struct BotApi {
    client: reqwest::Client,
    base_url: String,
}

impl BotApi {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!(
                "{}/bot{}",
                config.api_url.trim_end_matches('/'),
                config.bot_token
            ),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<T, AdapterError> {
        let url = format!("{}/{}", self.base_url, method);
        debug!("Calling Telegram method {}", method);

        let mut request = self.client.post(&url).json(&params);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        // Telegram reports failures in the body with a non-2xx status, so the
        // envelope is decoded before looking at the status code.
        let body = request.send().await?.bytes().await?;
        let response: ApiResponse<T> = serde_json::from_slice(&body)?;

        if !response.ok {
            return Err(AdapterError::Api {
                code: response.error_code,
                description: response
                    .description
                    .unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        response.result.ok_or_else(|| AdapterError::Api {
            code: None,
            description: format!("{} returned no result", method),
        })
    }
}

#[async_trait]
impl TelegramApi for BotApi {
    async fn get_me(&self) -> Result<User, AdapterError> {
        self.call("getMe", json!({}), None).await
    }

    async fn delete_webhook(&self) -> Result<(), AdapterError> {
        let _: bool = self.call("deleteWebhook", json!({}), None).await?;
        Ok(())
    }

    async fn get_updates(
        &self,
        offset: Option<i64>,
        long_poll_secs: u32,
    ) -> Result<Vec<Update>, AdapterError> {
        let mut params = json!({ "timeout": long_poll_secs });
        if let Some(off) = offset {
            params["offset"] = json!(off);
        }
        let http_timeout =
            Duration::from_secs(u64::from(long_poll_secs).saturating_add(POLL_TIMEOUT_MARGIN_SECS));

        self.call("getUpdates", params, Some(http_timeout)).await
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), AdapterError> {
        let _: serde_json::Value = self
            .call(
                "sendMessage",
                json!({ "chat_id": chat_id, "text": text }),
                None,
            )
            .await?;
        Ok(())
    }

    async fn reply_to_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), AdapterError> {
        let params = json!({
            "chat_id": chat_id,
            "text": text,
            "reply_parameters": {
                "message_id": message_id,
                "allow_sending_without_reply": true
            }
        });
        let _: serde_json::Value = self.call("sendMessage", params, None).await?;
        Ok(())
    }
}
