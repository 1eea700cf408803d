use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hubot_telegram::{
    AdapterEvent, Config, Envelope, Message, Robot, TelegramAdapter, TextMessage, UserStore,
};

/// Answers every message addressed to it with the message itself.
struct EchoRobot {
    name: String,
    users: UserStore,
    inbox: mpsc::UnboundedSender<TextMessage>,
}

impl EchoRobot {
    /// The command part of `"<name>: command"`, if the text is addressed to us.
    fn command<'a>(&self, text: &'a str) -> Option<&'a str> {
        let (target, rest) = text.split_once(':')?;
        if target.trim().to_lowercase() == self.name.to_lowercase() {
            Some(rest.trim())
        } else {
            None
        }
    }
}

#[async_trait]
impl Robot for EchoRobot {
    fn name(&self) -> &str {
        &self.name
    }

    fn users(&self) -> &UserStore {
        &self.users
    }

    async fn receive(&self, message: Message) {
        match message {
            Message::Text(text) => {
                if self.command(&text.text).is_some() && self.inbox.send(text).is_err() {
                    warn!("Echo loop has stopped, dropping message");
                }
            }
            Message::CatchAll(other) => {
                debug!("Ignoring {:?} update {}", other.field, other.update.update_id);
            }
        }
    }
}

async fn log_events(mut events: broadcast::Receiver<AdapterEvent>) {
    loop {
        match events.recv().await {
            Ok(AdapterEvent::Connected) => info!("Adapter connected"),
            Ok(AdapterEvent::Disconnected) => info!("Adapter disconnected"),
            Ok(AdapterEvent::ClientError(e)) => warn!("Adapter client error: {}", e),
            Err(broadcast::error::RecvError::Lagged(n)) => warn!("Missed {} adapter events", n),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hubot_telegram=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Robot name: {}", config.robot.name);
    info!("  Poll interval: {}s", config.telegram.interval);
    info!("  Dispatch workers: {}", config.dispatch.workers);

    let (inbox_tx, mut inbox) = mpsc::unbounded_channel();
    let robot = Arc::new(EchoRobot {
        name: config.robot.name.clone(),
        users: UserStore::new(),
        inbox: inbox_tx,
    });

    let adapter = TelegramAdapter::new(Arc::clone(&robot), config)
        .context("Failed to create Telegram adapter")?;
    tokio::spawn(log_events(adapter.subscribe()));

    info!("Bot is starting...");
    adapter
        .run()
        .await
        .context("Failed to connect to Telegram")?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down...");
                break;
            }
            Some(message) = inbox.recv() => {
                let Some(command) = robot.command(&message.text) else {
                    continue;
                };
                let answer = if command.is_empty() { "?" } else { command };
                if let Err(e) = adapter.reply(&Envelope::from(&message), &[answer]).await {
                    error!("Failed to reply in chat {}: {}", message.room, e);
                }
            }
        }
    }

    adapter.close();
    adapter.wait().await;

    Ok(())
}
