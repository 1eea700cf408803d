//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Notify};
use tokio::time::Instant;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use crate::error::AdapterError;
use crate::platform::Message;
use crate::robot::{AdapterEvent, Robot};
use crate::telegram::{TelegramApi, Update, User};
use crate::users::UserStore;

/// Scripted answer to one `getUpdates` call.
pub enum Fetch {
    Updates(Vec<Update>),
    Fail(AdapterError),
    /// Never answers.
    Hang,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub chat_id: i64,
    pub reply_to: Option<i64>,
    pub text: String,
}

pub struct MockApi {
    me: User,
    script: Mutex<VecDeque<Fetch>>,
    fetches: Mutex<Vec<(Option<i64>, Instant)>>,
    fetched: Notify,
    webhook_deleted: AtomicBool,
    fail_webhook_delete: bool,
    sent: Mutex<Vec<Sent>>,
}

impl MockApi {
    /// Once the script runs out every further fetch hangs.
    pub fn new(script: Vec<Fetch>) -> Self {
        Self {
            me: User {
                id: 4242,
                is_bot: true,
                first_name: "Sample".to_string(),
                last_name: None,
                username: Some("samplebot".to_string()),
            },
            script: Mutex::new(script.into()),
            fetches: Mutex::new(Vec::new()),
            fetched: Notify::new(),
            webhook_deleted: AtomicBool::new(false),
            fail_webhook_delete: false,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn with_username(mut self, username: &str) -> Self {
        self.me.username = Some(username.to_string());
        self
    }

    pub fn failing_webhook_delete(mut self) -> Self {
        self.fail_webhook_delete = true;
        self
    }

    pub fn offsets(&self) -> Vec<Option<i64>> {
        self.fetches.lock().unwrap().iter().map(|(o, _)| *o).collect()
    }

    pub fn fetch_times(&self) -> Vec<Instant> {
        self.fetches.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }

    pub async fn wait_for_fetches(&self, n: usize) {
        while self.fetch_count() < n {
            self.fetched.notified().await;
        }
    }

    pub fn webhook_deleted(&self) -> bool {
        self.webhook_deleted.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelegramApi for MockApi {
    async fn get_me(&self) -> Result<User, AdapterError> {
        Ok(self.me.clone())
    }

    async fn delete_webhook(&self) -> Result<(), AdapterError> {
        if self.fail_webhook_delete {
            return Err(AdapterError::Api {
                code: Some(401),
                description: "Unauthorized".to_string(),
            });
        }
        self.webhook_deleted.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn get_updates(
        &self,
        offset: Option<i64>,
        _long_poll_secs: u32,
    ) -> Result<Vec<Update>, AdapterError> {
        self.fetches.lock().unwrap().push((offset, Instant::now()));
        self.fetched.notify_one();

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Fetch::Updates(updates)) => Ok(updates),
            Some(Fetch::Fail(e)) => Err(e),
            Some(Fetch::Hang) | None => std::future::pending().await,
        }
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), AdapterError> {
        self.sent.lock().unwrap().push(Sent {
            chat_id,
            reply_to: None,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn reply_to_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), AdapterError> {
        self.sent.lock().unwrap().push(Sent {
            chat_id,
            reply_to: Some(message_id),
            text: text.to_string(),
        });
        Ok(())
    }
}

/// Robot that keeps everything it receives.
pub struct RecordingRobot {
    name: String,
    users: UserStore,
    received: Mutex<Vec<Message>>,
    arrived: Notify,
}

impl RecordingRobot {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            users: UserStore::new(),
            received: Mutex::new(Vec::new()),
            arrived: Notify::new(),
        }
    }

    pub fn received(&self) -> Vec<Message> {
        self.received.lock().unwrap().clone()
    }

    pub async fn wait_for(&self, n: usize) {
        while self.received.lock().unwrap().len() < n {
            self.arrived.notified().await;
        }
    }
}

#[async_trait]
impl Robot for RecordingRobot {
    fn name(&self) -> &str {
        &self.name
    }

    fn users(&self) -> &UserStore {
        &self.users
    }

    async fn receive(&self, message: Message) {
        self.received.lock().unwrap().push(message);
        self.arrived.notify_one();
    }
}

/// Updates carrying nothing but their ids.
pub fn update_batch(ids: &[i64]) -> Vec<Update> {
    ids.iter()
        .map(|id| serde_json::from_value(serde_json::json!({ "update_id": id })).unwrap())
        .collect()
}

pub async fn next_event(events: &mut broadcast::Receiver<AdapterEvent>) -> AdapterEvent {
    tokio::time::timeout(Duration::from_secs(300), events.recv())
        .await
        .expect("no adapter event")
        .expect("event channel closed")
}

/// Tracing layer counting events at one level.
pub struct LevelCounter {
    level: tracing::Level,
    count: Arc<AtomicUsize>,
}

impl<S: tracing::Subscriber> Layer<S> for LevelCounter {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == self.level {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Install a thread-local subscriber counting `level` events. Keep the guard
/// alive for as long as events should be counted.
pub fn count_events(
    level: tracing::Level,
) -> (Arc<AtomicUsize>, tracing::subscriber::DefaultGuard) {
    let count = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(LevelCounter {
        level,
        count: Arc::clone(&count),
    });
    (count, tracing::subscriber::set_default(subscriber))
}
