//! Single-slot admission gate in front of the store.
//!
//! The backing store is one file-backed database that degrades badly under
//! concurrent writers, so every engine component talks to it through this
//! wrapper and waits for the single permit.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Semaphore;

use super::ReminderStore;
use crate::error::StoreError;
use crate::reminder::{NewReminder, Reminder, ReminderId};

#[derive(Clone)]
pub struct GatedStore {
    store: Arc<dyn ReminderStore>,
    permit: Arc<Semaphore>,
}

impl GatedStore {
    pub fn new(store: Arc<dyn ReminderStore>) -> Self {
        Self {
            store,
            permit: Arc::new(Semaphore::new(1)),
        }
    }

    async fn admit(&self) -> Result<tokio::sync::SemaphorePermit<'_>, StoreError> {
        self.permit
            .acquire()
            .await
            .map_err(|_| StoreError::Join("store gate closed".into()))
    }

    pub async fn load_pending(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>, StoreError> {
        let _permit = self.admit().await?;
        self.store.load_pending(now).await
    }

    pub async fn load_completed_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Reminder>, StoreError> {
        let _permit = self.admit().await?;
        self.store.load_completed_since(since).await
    }

    pub async fn insert(&self, draft: &NewReminder) -> Result<ReminderId, StoreError> {
        let _permit = self.admit().await?;
        self.store.insert(draft).await
    }

    pub async fn bulk_update(&self, reminders: &[Reminder]) -> Result<(), StoreError> {
        let _permit = self.admit().await?;
        self.store.bulk_update(reminders).await
    }

    pub async fn bulk_delete(&self, ids: &[ReminderId]) -> Result<(), StoreError> {
        let _permit = self.admit().await?;
        self.store.bulk_delete(ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Counts how many calls overlap.
    #[derive(Default)]
    struct OverlapCounter {
        in_flight: AtomicUsize,
        max_seen: AtomicUsize,
    }

    impl OverlapCounter {
        async fn enter(&self) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ReminderStore for OverlapCounter {
        async fn load_pending(&self, _now: DateTime<Utc>) -> Result<Vec<Reminder>, StoreError> {
            self.enter().await;
            Ok(Vec::new())
        }
        async fn insert(&self, _draft: &NewReminder) -> Result<ReminderId, StoreError> {
            self.enter().await;
            Ok(1)
        }
        async fn bulk_update(&self, _reminders: &[Reminder]) -> Result<(), StoreError> {
            self.enter().await;
            Ok(())
        }
        async fn bulk_delete(&self, _ids: &[ReminderId]) -> Result<(), StoreError> {
            self.enter().await;
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn only_one_call_in_flight() {
        let counter = Arc::new(OverlapCounter::default());
        let gate = GatedStore::new(counter.clone());

        let mut handles = Vec::new();
        for i in 0..8 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    gate.bulk_delete(&[i]).await.unwrap();
                } else {
                    gate.load_pending(Utc::now()).await.unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(counter.max_seen.load(Ordering::SeqCst), 1);
    }
}
