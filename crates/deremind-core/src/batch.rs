//! Buffered write-back of reminder updates and deletes.
//!
//! Operations are queued in submission order and applied in batches. A flush
//! drains up to `batch_size` operations, keeps only the last operation per id,
//! and issues at most one bulk update and one bulk delete. If a bulk call
//! fails every item is retried on its own; an item that still fails is
//! logged and dropped. Only one flush is in flight at a time, so a retry
//! can never overwrite a newer write for the same id.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, warn};

use crate::reminder::{Reminder, ReminderId};
use crate::storage::GatedStore;

/// A buffered intent against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Update(Reminder),
    Delete(ReminderId),
}

impl WriteOp {
    pub fn id(&self) -> ReminderId {
        match self {
            WriteOp::Update(r) => r.id,
            WriteOp::Delete(id) => *id,
        }
    }
}

/// Counts from one or more flushes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    pub updated: usize,
    pub deleted: usize,
    pub dropped: usize,
}

impl FlushReport {
    pub fn merge(&mut self, other: FlushReport) {
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.dropped += other.dropped;
    }

    pub fn is_empty(&self) -> bool {
        self.updated == 0 && self.deleted == 0 && self.dropped == 0
    }
}

#[derive(Debug, Default)]
pub struct BatchWriteBuffer {
    pending: Mutex<VecDeque<WriteOp>>,
    flushing: tokio::sync::Mutex<()>,
}

impl BatchWriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<WriteOp>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn enqueue(&self, op: WriteOp) {
        debug!(id = op.id(), "buffered write");
        self.lock().push_back(op);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Take up to `n` operations from the front of the queue.
    pub fn drain_up_to(&self, n: usize) -> Vec<WriteOp> {
        let mut pending = self.lock();
        let take = n.min(pending.len());
        pending.drain(..take).collect()
    }

    /// Apply one batch of at most `batch_size` operations.
    pub async fn flush(&self, store: &GatedStore, batch_size: usize) -> FlushReport {
        // Held from drain to the last retry
        let _flushing = self.flushing.lock().await;
        let ops = self.drain_up_to(batch_size);
        if ops.is_empty() {
            return FlushReport::default();
        }
        let (updates, deletes) = coalesce(ops);

        let mut report = FlushReport::default();
        if !updates.is_empty() {
            apply_updates(store, &updates, &mut report).await;
        }
        if !deletes.is_empty() {
            apply_deletes(store, &deletes, &mut report).await;
        }
        debug!(
            updated = report.updated,
            deleted = report.deleted,
            dropped = report.dropped,
            "flushed write buffer"
        );
        report
    }

    /// Flush batches until the queue is empty.
    pub async fn flush_all(&self, store: &GatedStore, batch_size: usize) -> FlushReport {
        let mut total = FlushReport::default();
        while !self.is_empty() {
            total.merge(self.flush(store, batch_size).await);
        }
        total
    }
}

/// Keep the last operation per id, preserving first-seen order.
fn coalesce(ops: Vec<WriteOp>) -> (Vec<Reminder>, Vec<ReminderId>) {
    let mut order = Vec::new();
    let mut last: HashMap<ReminderId, WriteOp> = HashMap::new();
    for op in ops {
        let id = op.id();
        if last.insert(id, op).is_none() {
            order.push(id);
        }
    }

    let mut updates = Vec::new();
    let mut deletes = Vec::new();
    for id in order {
        match last.remove(&id) {
            Some(WriteOp::Update(reminder)) => updates.push(reminder),
            Some(WriteOp::Delete(id)) => deletes.push(id),
            None => {}
        }
    }
    (updates, deletes)
}

async fn apply_updates(store: &GatedStore, updates: &[Reminder], report: &mut FlushReport) {
    match store.bulk_update(updates).await {
        Ok(()) => report.updated += updates.len(),
        Err(e) => {
            warn!(
                error = %e,
                transient = e.is_transient(),
                count = updates.len(),
                "bulk update failed, retrying per item"
            );
            for reminder in updates {
                match store.bulk_update(std::slice::from_ref(reminder)).await {
                    Ok(()) => report.updated += 1,
                    Err(e) => {
                        error!(id = reminder.id, error = %e, "dropping buffered update");
                        report.dropped += 1;
                    }
                }
            }
        }
    }
}

async fn apply_deletes(store: &GatedStore, ids: &[ReminderId], report: &mut FlushReport) {
    match store.bulk_delete(ids).await {
        Ok(()) => report.deleted += ids.len(),
        Err(e) => {
            warn!(
                error = %e,
                transient = e.is_transient(),
                count = ids.len(),
                "bulk delete failed, retrying per item"
            );
            for id in ids {
                match store.bulk_delete(std::slice::from_ref(id)).await {
                    Ok(()) => report.deleted += 1,
                    Err(e) => {
                        error!(id, error = %e, "dropping buffered delete");
                        report.dropped += 1;
                    }
                }
            }
        }
    }
}
