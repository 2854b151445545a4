//! Notification Center - toast-style messages keyed by flow
//!
//! Posting under an existing key replaces that entry, so a flow moves its one
//! notification from Loading to Success or Error instead of stacking new ones.
//! Identical reposts are dropped.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationLevel {
    Loading,
    Success,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub key: String,
    pub level: NotificationLevel,
    pub message: String,
    /// Ordering among live notifications
    pub seq: u64,
}

/// Change delivered to subscribers
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NotificationEvent {
    Posted(Notification),
    Dismissed(String),
}

pub struct NotificationCenter {
    entries: DashMap<String, Notification>,
    sender: broadcast::Sender<NotificationEvent>,
    next_seq: AtomicU64,
}

impl NotificationCenter {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            entries: DashMap::new(),
            sender,
            next_seq: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.sender.subscribe()
    }

    /// Post or replace the notification under `key`
    ///
    /// Returns false when the same level and message are already showing.
    pub fn post(&self, key: &str, level: NotificationLevel, message: impl Into<String>) -> bool {
        let message = message.into();
        if let Some(existing) = self.entries.get(key) {
            if existing.level == level && existing.message == message {
                return false;
            }
        }

        let notification = Notification {
            key: key.to_string(),
            level,
            message,
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
        };
        self.entries.insert(key.to_string(), notification.clone());

        // No subscribers is fine
        let _ = self.sender.send(NotificationEvent::Posted(notification));
        true
    }

    pub fn loading(&self, key: &str, message: impl Into<String>) -> bool {
        self.post(key, NotificationLevel::Loading, message)
    }

    pub fn success(&self, key: &str, message: impl Into<String>) -> bool {
        self.post(key, NotificationLevel::Success, message)
    }

    pub fn error(&self, key: &str, message: impl Into<String>) -> bool {
        self.post(key, NotificationLevel::Error, message)
    }

    pub fn get(&self, key: &str) -> Option<Notification> {
        self.entries.get(key).map(|n| n.value().clone())
    }

    pub fn dismiss(&self, key: &str) -> bool {
        if self.entries.remove(key).is_some() {
            let _ = self.sender.send(NotificationEvent::Dismissed(key.to_string()));
            true
        } else {
            false
        }
    }

    /// Live notifications, oldest first
    pub fn active(&self) -> Vec<Notification> {
        let mut all: Vec<Notification> = self.entries.iter().map(|n| n.value().clone()).collect();
        all.sort_by_key(|n| n.seq);
        all
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new()
    }
}
