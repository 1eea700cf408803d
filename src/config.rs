use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::AdapterError;

pub const TOKEN_VAR: &str = "HUBOT_TELEGRAM_TOKEN";
pub const INTERVAL_VAR: &str = "HUBOT_TELEGRAM_INTERVAL";

/// Accepted range for the polling interval.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);
pub const MAX_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub robot: RobotConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Pause between two successful polls, in seconds. Errors back off for ten times as long.
    #[serde(default = "default_interval")]
    pub interval: f64,
    /// Upper bound on a single `getUpdates` round trip, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    /// Server-side long-poll timeout passed to `getUpdates`, in seconds.
    #[serde(default)]
    pub long_poll_timeout: u32,
    #[serde(default = "default_reset_webhook")]
    pub reset_webhook: bool,
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispatchConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RobotConfig {
    #[serde(default = "default_robot_name")]
    pub name: String,
}

fn default_interval() -> f64 {
    0.5
}

fn default_request_timeout() -> u64 {
    20
}

fn default_reset_webhook() -> bool {
    true
}

fn default_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    64
}

fn default_robot_name() -> String {
    "Hubot".to_string()
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            interval: default_interval(),
            request_timeout: default_request_timeout(),
            long_poll_timeout: 0,
            reset_webhook: default_reset_webhook(),
            api_url: default_api_url(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            name: default_robot_name(),
        }
    }
}

impl TelegramConfig {
    /// Polling interval, clamped to `MIN_INTERVAL..=MAX_INTERVAL`. Values that
    /// are not a duration at all fall back to the default.
    pub fn interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.interval)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_interval()))
            .clamp(MIN_INTERVAL, MAX_INTERVAL)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

impl Config {
    /// Read a TOML config file, then let the environment override it.
    /// A missing file is not an error: the environment alone may be enough.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: Config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override file values with `HUBOT_TELEGRAM_*` variables from `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup(TOKEN_VAR).filter(|t| !t.trim().is_empty()) {
            self.telegram.bot_token = token.trim().to_string();
        }

        if let Some(raw) = lookup(INTERVAL_VAR) {
            self.telegram.interval = raw
                .trim()
                .parse()
                .with_context(|| format!("{} must be a number of seconds, got {:?}", INTERVAL_VAR, raw))?;
        }

        Ok(())
    }

    /// Reject configurations the adapter cannot start with.
    pub fn validate(&self) -> std::result::Result<(), AdapterError> {
        let tg = &self.telegram;
        if tg.bot_token.is_empty() {
            return Err(AdapterError::MissingToken);
        }
        let interval_ok = Duration::try_from_secs_f64(tg.interval)
            .is_ok_and(|d| (MIN_INTERVAL..=MAX_INTERVAL).contains(&d));
        if !interval_ok {
            return Err(AdapterError::Config(format!(
                "interval must be between {}s and {}s, got {}",
                MIN_INTERVAL.as_secs_f64(),
                MAX_INTERVAL.as_secs(),
                tg.interval
            )));
        }
        if tg.request_timeout <= u64::from(tg.long_poll_timeout) {
            return Err(AdapterError::Config(format!(
                "request_timeout ({}s) must exceed long_poll_timeout ({}s)",
                tg.request_timeout, tg.long_poll_timeout
            )));
        }
        if self.dispatch.workers == 0 || self.dispatch.queue_capacity == 0 {
            return Err(AdapterError::Config(
                "dispatch workers and queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
