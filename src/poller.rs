use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::TelegramConfig;
use crate::dispatch::Dispatcher;
use crate::error::AdapterError;
use crate::robot::AdapterEvent;
use crate::telegram::{TelegramApi, Update};

/// Errors back off for this many polling intervals.
const BACKOFF_FACTOR: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollSettings {
    pub interval: Duration,
    pub request_timeout: Duration,
    pub long_poll_secs: u32,
}

impl PollSettings {
    pub fn from_config(config: &TelegramConfig) -> Self {
        Self {
            interval: config.interval(),
            request_timeout: config.request_timeout(),
            long_poll_secs: config.long_poll_timeout,
        }
    }

    pub fn backoff(&self) -> Duration {
        self.interval
            .checked_mul(BACKOFF_FACTOR)
            .unwrap_or(Duration::MAX)
    }
}

/// Sleep for `duration` unless cancelled first. Returns false on cancellation.
async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Owns the update offset and the polling loop.
pub struct Poller<A> {
    api: Arc<A>,
    offset: Option<i64>,
    settings: PollSettings,
    events: broadcast::Sender<AdapterEvent>,
}

impl<A: TelegramApi> Poller<A> {
    pub fn new(api: Arc<A>, settings: PollSettings, events: broadcast::Sender<AdapterEvent>) -> Self {
        Self {
            api,
            offset: None,
            settings,
            events,
        }
    }

    /// Next `update_id` to ask for, once anything has been received.
    pub fn offset(&self) -> Option<i64> {
        self.offset
    }

    fn emit(&self, event: AdapterEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    /// Move the offset past the highest id in `updates`. Never moves backward.
    fn advance(&mut self, updates: &[Update]) {
        if let Some(max) = updates.iter().map(|u| u.update_id).max() {
            let next = max.saturating_add(1);
            self.offset = Some(self.offset.map_or(next, |current| current.max(next)));
        }
    }

    /// One bounded `getUpdates` round trip. The offset advances as soon as
    /// the batch arrives, before anything is dispatched.
    pub async fn fetch(&mut self) -> Result<Vec<Update>, AdapterError> {
        let request = self.api.get_updates(self.offset, self.settings.long_poll_secs);
        let updates = tokio::time::timeout(self.settings.request_timeout, request)
            .await
            .map_err(|_| AdapterError::Timeout(self.settings.request_timeout))??;

        self.advance(&updates);
        Ok(updates)
    }

    /// Poll until `cancel` fires, handing every batch to `dispatcher`.
    ///
    /// Failures are reported as [`AdapterEvent::ClientError`] and retried after
    /// a backoff; only cancellation ends the loop, which then emits a single
    /// [`AdapterEvent::Disconnected`] and drains the dispatcher.
    pub async fn start(
        mut self,
        reset_webhook: bool,
        dispatcher: Dispatcher,
        cancel: CancellationToken,
    ) {
        if reset_webhook {
            if let Err(e) = self.api.delete_webhook().await {
                warn!("Telegram: could not delete webhook - {}", e);
                self.emit(AdapterEvent::ClientError(Arc::new(e)));
            }
        }

        info!("Telegram: Start polling...");
        loop {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.fetch() => result,
            };

            match fetched {
                Ok(updates) => {
                    if !updates.is_empty() {
                        debug!(
                            "Telegram: received {} update(s), next offset {:?}",
                            updates.len(),
                            self.offset
                        );
                        let queued = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => break,
                            queued = dispatcher.submit(updates) => queued,
                        };
                        if !queued {
                            warn!("Telegram: dispatcher is closed, dropping batch");
                        }
                    }
                    if !pause(self.settings.interval, &cancel).await {
                        break;
                    }
                }
                Err(e) => {
                    error!("Telegram: client error - {}", e);
                    self.emit(AdapterEvent::ClientError(Arc::new(e)));
                    if !pause(self.settings.backoff(), &cancel).await {
                        break;
                    }
                }
            }
        }

        self.emit(AdapterEvent::Disconnected);
        debug!("Telegram: Polling Received Cancellation.");

        dispatcher.shutdown().await;
        info!("Telegram: Stop polling...");
    }
}
