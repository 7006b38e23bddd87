//! Fire-and-forget persistence pipeline.
//!
//! The live update path only ever calls [`PersistenceQueue::enqueue`], which
//! never waits: when the queue is full the observation is dropped and logged.
//! [`PersistenceWriter`] drains the queue in batches on a background task.

use super::{HistoryStore, ObjectRecord, TrackPoint};
use crate::diagnostics::{DiagnosticCategory, DiagnosticLog};
use crate::state::TrackedEntity;
use anyhow::{Context, Result};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One observation to persist
#[derive(Clone, Debug)]
pub struct PersistJob {
    pub record: ObjectRecord,
    pub point: TrackPoint,
}

impl From<&TrackedEntity> for PersistJob {
    fn from(entity: &TrackedEntity) -> Self {
        Self {
            record: ObjectRecord::from(entity),
            point: TrackPoint::from(entity),
        }
    }
}

/// Sending half handed to the tracking store
#[derive(Clone)]
pub struct PersistenceQueue {
    tx: mpsc::Sender<PersistJob>,
    dropped: Arc<AtomicU64>,
}

impl PersistenceQueue {
    /// Queue plus the receiver the writer consumes
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<PersistJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Schedules a write without waiting; returns false if the job was dropped
    pub fn enqueue(&self, job: PersistJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    entity_id = %job.point.entity_id,
                    dropped_total = dropped,
                    "Persistence queue full, dropping observation"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                debug!(
                    entity_id = %job.point.entity_id,
                    "Persistence writer stopped, dropping observation"
                );
                false
            }
        }
    }

    /// Total observations dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Background task committing queued observations in batches
pub struct PersistenceWriter {
    store: Arc<HistoryStore>,
    diagnostics: Arc<DiagnosticLog>,
    batch_size: usize,
}

impl PersistenceWriter {
    pub fn new(
        store: Arc<HistoryStore>,
        diagnostics: Arc<DiagnosticLog>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            diagnostics,
            batch_size: batch_size.max(1),
        }
    }

    pub fn spawn(self, rx: mpsc::Receiver<PersistJob>) -> JoinHandle<()> {
        tokio::spawn(self.run(rx))
    }

    /// Runs until every queue sender is dropped
    pub async fn run(self, mut rx: mpsc::Receiver<PersistJob>) {
        info!(
            store = %self.store.store_name(),
            batch_size = self.batch_size,
            "Persistence writer started"
        );

        let mut batch = Vec::with_capacity(self.batch_size);

        while let Some(job) = rx.recv().await {
            batch.push(job);
            while batch.len() < self.batch_size {
                match rx.try_recv() {
                    Ok(job) => batch.push(job),
                    Err(_) => break,
                }
            }

            let jobs = std::mem::replace(&mut batch, Vec::with_capacity(self.batch_size));
            let count = jobs.len();

            if let Err(e) = self.write_batch(jobs).await {
                error!(error = %e, jobs = count, "Failed to persist observation batch");
                self.diagnostics.record_with(
                    DiagnosticCategory::Persistence,
                    "Failed to persist observation batch",
                    json!({ "error": format!("{:#}", e), "jobs": count }),
                );
            }
        }

        info!("Persistence writer stopped");
    }

    async fn write_batch(&self, jobs: Vec<PersistJob>) -> Result<()> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || commit_batch(&store, jobs))
            .await
            .context("Persistence task panicked")?
    }
}

/// Coalesces records per entity and commits the batch in one transaction.
///
/// Records keep the earliest `first_seen_at` and the latest `last_seen_at`
/// seen within the batch.
pub(crate) fn commit_batch(store: &HistoryStore, jobs: Vec<PersistJob>) -> Result<()> {
    let mut records: HashMap<String, ObjectRecord> = HashMap::new();
    let mut points = Vec::with_capacity(jobs.len());

    for PersistJob { record, point } in jobs {
        points.push(point);
        match records.get_mut(&record.id) {
            Some(existing) => {
                existing.first_seen_at = existing.first_seen_at.min(record.first_seen_at);
                if record.last_seen_at >= existing.last_seen_at {
                    existing.last_seen_at = record.last_seen_at;
                    existing.display_name = record.display_name;
                    existing.kind = record.kind;
                    if record.source_id.is_some() {
                        existing.source_id = record.source_id;
                    }
                }
            }
            None => {
                records.insert(record.id.clone(), record);
            }
        }
    }

    let records: Vec<ObjectRecord> = records.into_values().collect();
    let written = store.record_observations(&records, &points)?;

    debug!(
        records = records.len(),
        points = written,
        "Persisted observation batch"
    );
    Ok(())
}
