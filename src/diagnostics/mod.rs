//! Operator-facing diagnostic log.
//!
//! A bounded ring buffer of recent connection transitions, decoded messages
//! and local failures. Recording is a side channel: it never blocks the
//! caller and never fails.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;
use uuid::Uuid;


/// Diagnostic entry category
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticCategory {
    Connection,
    Message,
    Decode,
    Eviction,
    Persistence,
}

#[derive(Clone, Debug, Serialize)]
pub struct DiagnosticEntry {
    /// UUIDv7 (time-ordered)
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub category: DiagnosticCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

pub struct DiagnosticLog {
    entries: Mutex<VecDeque<DiagnosticEntry>>,
    capacity: usize,
    tx: broadcast::Sender<DiagnosticEntry>,
}

impl DiagnosticLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(256);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            tx,
        }
    }

    pub fn record(&self, category: DiagnosticCategory, message: impl Into<String>) {
        self.push(category, message.into(), None);
    }

    pub fn record_with(
        &self,
        category: DiagnosticCategory,
        message: impl Into<String>,
        payload: Value,
    ) {
        self.push(category, message.into(), Some(payload));
    }

    fn push(&self, category: DiagnosticCategory, message: String, payload: Option<Value>) {
        let entry = DiagnosticEntry {
            id: Uuid::now_v7().to_string(),
            timestamp: Utc::now(),
            category,
            message,
            payload,
        };

        {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }

        // No subscribers is fine
        let _ = self.tx.send(entry);
    }

    /// Most recent entries, oldest first, at most `limit`
    pub fn recent(&self, limit: usize) -> Vec<DiagnosticEntry> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn entries(&self) -> Vec<DiagnosticEntry> {
        self.recent(self.capacity)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiagnosticEntry> {
        self.tx.subscribe()
    }
}

impl Default for DiagnosticLog {
    fn default() -> Self {
        Self::new(500)
    }
}
