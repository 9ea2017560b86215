mod config;
pub mod database;
mod gate;
pub mod migrations;

pub use config::EngineConfig;
pub use database::SqliteReminderStore;
pub use gate::GatedStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

use crate::error::StoreError;
use crate::reminder::{NewReminder, Reminder, ReminderId};

/// Durable reminder storage.
///
/// The engine never touches a store directly; every call goes through a
/// [`GatedStore`] so that at most one operation is in flight at a time.
#[async_trait]
pub trait ReminderStore: Send + Sync {
    /// Every reminder that is not completed, ordered by `(due_at, id)`.
    async fn load_pending(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>, StoreError>;

    /// Completed reminders due after `since`, kept in the view for display.
    async fn load_completed_since(
        &self,
        _since: DateTime<Utc>,
    ) -> Result<Vec<Reminder>, StoreError> {
        Ok(Vec::new())
    }

    /// Insert a new reminder and return the assigned id.
    async fn insert(&self, draft: &NewReminder) -> Result<ReminderId, StoreError>;

    /// Overwrite the mutable fields of every given reminder, matched by id.
    async fn bulk_update(&self, reminders: &[Reminder]) -> Result<(), StoreError>;

    /// Delete every reminder in the id set. Unknown ids are ignored.
    async fn bulk_delete(&self, ids: &[ReminderId]) -> Result<(), StoreError>;
}

/// Returns `~/.config/deremind[-dev]/` based on DEREMIND_ENV.
///
/// Set DEREMIND_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> std::io::Result<PathBuf> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("DEREMIND_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("deremind-dev")
    } else {
        base_dir.join("deremind")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
