use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::telegram::{Chat, User};

/// A chat participant as the robot knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Chat the user was last seen in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<i64>,
}

impl UserRecord {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            first_name: None,
            last_name: None,
            username: None,
            room: None,
        }
    }

    /// Record for a Telegram user seen in `room`. The display name is the
    /// username when there is one, else the full name.
    pub fn from_telegram(user: &User, room: Option<i64>) -> Self {
        let name = match &user.username {
            Some(username) => username.clone(),
            None => match &user.last_name {
                Some(last) => format!("{} {}", user.first_name, last),
                None => user.first_name.clone(),
            },
        };
        Self {
            id: user.id,
            name,
            first_name: Some(user.first_name.clone()),
            last_name: user.last_name.clone(),
            username: user.username.clone(),
            room,
        }
    }

    /// Record for a chat posting on its own behalf (channels, anonymous admins).
    pub fn from_chat(chat: &Chat, room: i64) -> Self {
        let name = chat
            .title
            .clone()
            .or_else(|| chat.username.clone())
            .unwrap_or_else(|| chat.id.to_string());
        Self {
            id: chat.id,
            name,
            first_name: None,
            last_name: None,
            username: chat.username.clone(),
            room: Some(room),
        }
    }
}

/// One attribute value that differs from what was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAttr {
    Name(String),
    FirstName(String),
    LastName(String),
    Username(String),
    Room(i64),
}

impl UserAttr {
    pub fn key(&self) -> &'static str {
        match self {
            UserAttr::Name(_) => "name",
            UserAttr::FirstName(_) => "first_name",
            UserAttr::LastName(_) => "last_name",
            UserAttr::Username(_) => "username",
            UserAttr::Room(_) => "room",
        }
    }
}

/// Attributes present in a fresh observation that the old record lacks or
/// holds with another value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserChanges(Vec<UserAttr>);

impl UserChanges {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UserAttr> {
        self.0.iter()
    }

    pub fn get(&self, key: &str) -> Option<&UserAttr> {
        self.0.iter().find(|attr| attr.key() == key)
    }

    pub fn apply_to(&self, record: &mut UserRecord) {
        for attr in &self.0 {
            match attr {
                UserAttr::Name(v) => record.name = v.clone(),
                UserAttr::FirstName(v) => record.first_name = Some(v.clone()),
                UserAttr::LastName(v) => record.last_name = Some(v.clone()),
                UserAttr::Username(v) => record.username = Some(v.clone()),
                UserAttr::Room(v) => record.room = Some(*v),
            }
        }
    }
}

fn changed<T: PartialEq + Clone>(old: &Option<T>, new: &Option<T>) -> Option<T> {
    match new {
        Some(value) if old.as_ref() != Some(value) => Some(value.clone()),
        _ => None,
    }
}

/// Compare two records attribute by attribute. Attributes missing from `new`
/// are not changes, so an observation never clears what is already known.
pub fn diff(old: &UserRecord, new: &UserRecord) -> UserChanges {
    let mut attrs = Vec::new();
    if old.name != new.name {
        attrs.push(UserAttr::Name(new.name.clone()));
    }
    if let Some(v) = changed(&old.first_name, &new.first_name) {
        attrs.push(UserAttr::FirstName(v));
    }
    if let Some(v) = changed(&old.last_name, &new.last_name) {
        attrs.push(UserAttr::LastName(v));
    }
    if let Some(v) = changed(&old.username, &new.username) {
        attrs.push(UserAttr::Username(v));
    }
    if let Some(v) = changed(&old.room, &new.room) {
        attrs.push(UserAttr::Room(v));
    }
    UserChanges(attrs)
}

/// The robot's shared user table, keyed by Telegram id.
#[derive(Debug, Default)]
pub struct UserStore {
    users: RwLock<HashMap<i64, UserRecord>>,
}

impl UserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: i64) -> Option<UserRecord> {
        self.users.read().await.get(&id).cloned()
    }

    /// Stored record for `seed.id`, inserting `seed` if the id is unknown.
    pub async fn user_for_id(&self, seed: UserRecord) -> UserRecord {
        let mut users = self.users.write().await;
        users.entry(seed.id).or_insert(seed).clone()
    }

    /// Apply `changes` to the record stored under `id`. Returns false when
    /// no such record exists.
    pub async fn merge(&self, id: i64, changes: &UserChanges) -> bool {
        let mut users = self.users.write().await;
        match users.get_mut(&id) {
            Some(record) => {
                changes.apply_to(record);
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }
}

/// Diff `old` against `new` and merge any changes into the stored record for
/// `new.id`. The changes are returned whether or not a merge took place.
pub async fn diff_and_merge(store: &UserStore, old: &UserRecord, new: &UserRecord) -> UserChanges {
    let changes = diff(old, new);
    if !changes.is_empty() && !store.merge(new.id, &changes).await {
        debug!("User {} is not in the store, {} change(s) not merged", new.id, changes.len());
    }
    changes
}
