use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::classify::Classifier;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::AdapterError;
use crate::platform::Envelope;
use crate::poller::{PollSettings, Poller};
use crate::robot::{AdapterEvent, Robot};
use crate::telegram::{BotApi, TelegramApi};
use crate::users::UserRecord;

/// Telegram rejects messages longer than this.
const MAX_MESSAGE_LEN: usize = 4096;

const EVENT_CAPACITY: usize = 64;

/// Split long messages for Telegram's message size limit
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }

    chunks
}

/// Pieces of `text` worth sending: split to size, blank ones dropped.
fn chunks(text: &str) -> impl Iterator<Item = String> {
    split_message(text, MAX_MESSAGE_LEN)
        .into_iter()
        .filter(|chunk| !chunk.trim().is_empty())
}

/// Connects a [`Robot`] to Telegram through long polling.
pub struct TelegramAdapter<R, A = BotApi> {
    robot: Arc<R>,
    api: Arc<A>,
    config: Config,
    events: broadcast::Sender<AdapterEvent>,
    cancel: CancellationToken,
    stream: Mutex<Option<JoinHandle<()>>>,
}

impl<R: Robot> TelegramAdapter<R, BotApi> {
    /// Adapter talking to the real Bot API. Fails if the token is missing.
    pub fn new(robot: Arc<R>, config: Config) -> Result<Self, AdapterError> {
        let api = Arc::new(BotApi::new(&config.telegram));
        Self::with_api(robot, config, api)
    }
}

impl<R: Robot, A: TelegramApi> TelegramAdapter<R, A> {
    pub fn with_api(robot: Arc<R>, config: Config, api: Arc<A>) -> Result<Self, AdapterError> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            robot,
            api,
            config,
            events,
            cancel: CancellationToken::new(),
            stream: Mutex::new(None),
        })
    }

    /// Receive `Connected`, `Disconnected` and `ClientError` notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<AdapterEvent> {
        self.events.subscribe()
    }

    /// Check the bot identity, start polling in the background and emit
    /// `Connected`. Returns once the polling task is running.
    pub async fn run(&self) -> Result<(), AdapterError> {
        let mut stream = self.stream.lock().await;
        if self.cancel.is_cancelled() {
            return Err(AdapterError::Closed);
        }
        if stream.is_some() {
            return Err(AdapterError::AlreadyRunning);
        }

        let me = self.api.get_me().await?;
        let username = me.username.clone().unwrap_or_default();
        info!("Connected to Telegram as Bot {}(@{})", me.first_name, username);

        let robot_name = self.robot.name();
        if username.to_lowercase() != robot_name.to_lowercase() {
            warn!(
                "Inconsistent bot name found: {} from Telegram, {} from Hubot.\n\
                 It will run into problem when using @mention.",
                username, robot_name
            );
        }

        let classifier = Arc::new(Classifier::new(Arc::clone(&self.robot), username));
        let dispatcher = Dispatcher::spawn(
            classifier,
            self.config.dispatch.workers,
            self.config.dispatch.queue_capacity,
        );
        let poller = Poller::new(
            Arc::clone(&self.api),
            PollSettings::from_config(&self.config.telegram),
            self.events.clone(),
        );

        // Announced before the task exists so it precedes any event the
        // poller emits.
        let _ = self.events.send(AdapterEvent::Connected);
        *stream = Some(tokio::spawn(poller.start(
            self.config.telegram.reset_webhook,
            dispatcher,
            self.cancel.clone(),
        )));
        Ok(())
    }

    /// Ask the polling loop to stop. It exits at its next suspension point.
    /// The adapter cannot be run again afterwards.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Wait for the polling task to finish, e.g. after [`close`](Self::close).
    pub async fn wait(&self) {
        let handle = self.stream.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Telegram: polling task failed - {}", e);
            }
        }
    }

    /// Post each string to the envelope's chat. Blank strings are skipped,
    /// Telegram rejects them.
    pub async fn send(&self, envelope: &Envelope, strings: &[&str]) -> Result<(), AdapterError> {
        for text in strings {
            for chunk in chunks(text) {
                self.api.send_message(envelope.room, &chunk).await?;
            }
        }
        debug!("Telegram: sent {} message(s) to {}", strings.len(), envelope.room);
        Ok(())
    }

    /// Post each string as a reply to the envelope's message, or plainly if
    /// the envelope does not name one.
    pub async fn reply(&self, envelope: &Envelope, strings: &[&str]) -> Result<(), AdapterError> {
        let Some(message_id) = envelope.message_id else {
            return self.send(envelope, strings).await;
        };

        for text in strings {
            for chunk in chunks(text) {
                self.api
                    .reply_to_message(envelope.room, message_id, &chunk)
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn user_from_id(&self, id: i64) -> Option<UserRecord> {
        self.robot.users().get(id).await
    }
}
