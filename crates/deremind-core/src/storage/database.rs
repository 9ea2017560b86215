//! SQLite-backed reminder storage.
//!
//! The connection lives behind a mutex and every async trait call runs its
//! statements on the blocking pool. The synchronous methods are public so
//! one-shot tools can use the store without a runtime.

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use super::{data_dir, migrations, ReminderStore};
use crate::error::StoreError;
use crate::reminder::{NewReminder, Reminder, ReminderId};

const SELECT_COLUMNS: &str =
    "SELECT id, title, description, due_at, is_completed, is_repeating, repeat_interval_ms FROM reminders";

/// Format a timestamp for storage. Fixed width, so text order is time order.
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse datetime from RFC3339 string with fallback to current time
fn parse_datetime_fallback(dt_str: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(dt_str)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!("unparseable due_at '{dt_str}' ({e}), treating as due now");
            Utc::now()
        })
}

fn row_to_reminder(row: &rusqlite::Row) -> Result<Reminder, rusqlite::Error> {
    let due_at_str: String = row.get(3)?;
    Ok(Reminder {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        due_at: parse_datetime_fallback(&due_at_str),
        is_completed: row.get(4)?,
        is_repeating: row.get(5)?,
        repeat_interval: Duration::milliseconds(row.get(6)?),
    })
}

/// SQLite database holding the `reminders` table.
#[derive(Clone)]
pub struct SqliteReminderStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteReminderStore {
    /// Open the database at `~/.config/deremind/reminders.db`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, StoreError> {
        let dir = data_dir().map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        Self::open_at(&dir.join("reminders.db"))
    }

    /// Open (creating if needed) the database at `path`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open_at(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|source| StoreError::OpenFailed {
            path: PathBuf::from(path),
            source,
        })?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub fn open_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        migrations::migrate(&conn).map_err(|e| StoreError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a reminder and return its id.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub fn insert_reminder(&self, draft: &NewReminder) -> Result<ReminderId, StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO reminders (title, description, due_at, is_completed, is_repeating, repeat_interval_ms)
             VALUES (?1, ?2, ?3, 0, ?4, ?5)",
            params![
                draft.title,
                draft.description,
                format_datetime(draft.due_at),
                draft.is_repeating,
                draft.repeat_interval.num_milliseconds(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_reminder(&self, id: ReminderId) -> Result<Option<Reminder>, StoreError> {
        let conn = self.lock();
        let reminder = conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id],
                row_to_reminder,
            )
            .optional()?;
        Ok(reminder)
    }

    /// All reminders, completed or not, ordered by due time.
    pub fn list_reminders(&self) -> Result<Vec<Reminder>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY due_at, id"))?;
        let rows = stmt.query_map([], row_to_reminder)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn pending_reminders(&self) -> Result<Vec<Reminder>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS} WHERE is_completed = 0 ORDER BY due_at, id"
        ))?;
        let rows = stmt.query_map([], row_to_reminder)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn completed_since(&self, since: DateTime<Utc>) -> Result<Vec<Reminder>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS} WHERE is_completed = 1 AND due_at > ?1 ORDER BY due_at, id"
        ))?;
        let rows = stmt.query_map(params![format_datetime(since)], row_to_reminder)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Overwrite every given reminder inside one transaction.
    ///
    /// # Errors
    /// Returns an error if any statement fails; nothing is written then.
    pub fn update_reminders(&self, reminders: &[Reminder]) -> Result<(), StoreError> {
        if reminders.is_empty() {
            return Ok(());
        }
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE reminders
                 SET title = ?1, description = ?2, due_at = ?3, is_completed = ?4,
                     is_repeating = ?5, repeat_interval_ms = ?6
                 WHERE id = ?7",
            )?;
            for r in reminders {
                let changed = stmt.execute(params![
                    r.title,
                    r.description,
                    format_datetime(r.due_at),
                    r.is_completed,
                    r.is_repeating,
                    r.repeat_interval.num_milliseconds(),
                    r.id,
                ])?;
                if changed == 0 {
                    debug!(id = r.id, "update matched no row");
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Delete every id in one statement.
    pub fn delete_reminders(&self, ids: &[ReminderId]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let conn = self.lock();
        let deleted = conn.execute(
            &format!("DELETE FROM reminders WHERE id IN ({placeholders})"),
            params_from_iter(ids.iter()),
        )?;
        Ok(deleted)
    }
}

#[async_trait]
impl ReminderStore for SqliteReminderStore {
    async fn load_pending(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>, StoreError> {
        let store = self.clone();
        let pending = tokio::task::spawn_blocking(move || store.pending_reminders()).await??;
        let overdue = pending.iter().filter(|r| r.due_at <= now).count();
        debug!(pending = pending.len(), overdue, "loaded pending reminders");
        Ok(pending)
    }

    async fn load_completed_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Reminder>, StoreError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.completed_since(since)).await?
    }

    async fn insert(&self, draft: &NewReminder) -> Result<ReminderId, StoreError> {
        let store = self.clone();
        let draft = draft.clone();
        tokio::task::spawn_blocking(move || store.insert_reminder(&draft)).await?
    }

    async fn bulk_update(&self, reminders: &[Reminder]) -> Result<(), StoreError> {
        let store = self.clone();
        let reminders = reminders.to_vec();
        tokio::task::spawn_blocking(move || store.update_reminders(&reminders)).await?
    }

    async fn bulk_delete(&self, ids: &[ReminderId]) -> Result<(), StoreError> {
        let store = self.clone();
        let ids = ids.to_vec();
        tokio::task::spawn_blocking(move || store.delete_reminders(&ids).map(|_| ())).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, h, m, 0).unwrap()
    }

    #[test]
    fn insert_and_get() {
        let db = SqliteReminderStore::open_memory().unwrap();
        let draft = NewReminder::repeating("Standup", at(9, 30), Duration::days(1))
            .with_description("daily sync");
        let id = db.insert_reminder(&draft).unwrap();

        let loaded = db.get_reminder(id).unwrap().unwrap();
        assert_eq!(loaded, draft.into_reminder(id));
        assert!(db.get_reminder(id + 100).unwrap().is_none());
    }

    #[test]
    fn pending_excludes_completed_and_orders_by_due() {
        let db = SqliteReminderStore::open_memory().unwrap();
        let late = db.insert_reminder(&NewReminder::once("late", at(18, 0))).unwrap();
        let early = db.insert_reminder(&NewReminder::once("early", at(7, 0))).unwrap();
        let done = db.insert_reminder(&NewReminder::once("done", at(8, 0))).unwrap();

        let mut completed = db.get_reminder(done).unwrap().unwrap();
        completed.is_completed = true;
        db.update_reminders(&[completed]).unwrap();

        let ids: Vec<_> = db.pending_reminders().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![early, late]);
    }

    #[test]
    fn completed_since_filters_by_due_time() {
        let db = SqliteReminderStore::open_memory().unwrap();
        let old = db.insert_reminder(&NewReminder::once("old", at(6, 0))).unwrap();
        let recent = db.insert_reminder(&NewReminder::once("recent", at(12, 0))).unwrap();
        let mut batch = Vec::new();
        for id in [old, recent] {
            let mut r = db.get_reminder(id).unwrap().unwrap();
            r.is_completed = true;
            batch.push(r);
        }
        db.update_reminders(&batch).unwrap();

        let ids: Vec<_> = db.completed_since(at(10, 0)).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![recent]);
    }

    #[test]
    fn bulk_update_writes_all_fields() {
        let db = SqliteReminderStore::open_memory().unwrap();
        let id = db.insert_reminder(&NewReminder::once("draft", at(9, 0))).unwrap();

        let mut edited = db.get_reminder(id).unwrap().unwrap();
        edited.title = "final".into();
        edited.due_at = at(10, 15);
        edited.is_repeating = true;
        edited.repeat_interval = Duration::minutes(20);
        db.update_reminders(std::slice::from_ref(&edited)).unwrap();

        assert_eq!(db.get_reminder(id).unwrap().unwrap(), edited);
    }

    #[test]
    fn bulk_delete_by_id_set() {
        let db = SqliteReminderStore::open_memory().unwrap();
        let a = db.insert_reminder(&NewReminder::once("a", at(9, 0))).unwrap();
        let b = db.insert_reminder(&NewReminder::once("b", at(9, 5))).unwrap();
        let c = db.insert_reminder(&NewReminder::once("c", at(9, 10))).unwrap();

        assert_eq!(db.delete_reminders(&[a, c, 999]).unwrap(), 2);
        let ids: Vec<_> = db.list_reminders().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![b]);
    }

    #[test]
    fn invalid_due_at_falls_back_to_now() {
        let db = SqliteReminderStore::open_memory().unwrap();
        let id = db.insert_reminder(&NewReminder::once("broken", at(9, 0))).unwrap();
        db.lock()
            .execute("UPDATE reminders SET due_at = 'garbage' WHERE id = ?1", params![id])
            .unwrap();

        let before = Utc::now();
        let loaded = db.get_reminder(id).unwrap().unwrap();
        assert!(loaded.due_at >= before);
    }

    #[test]
    fn file_database_persists_across_opens() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("reminders.db");
        let id = {
            let db = SqliteReminderStore::open_at(&path).unwrap();
            db.insert_reminder(&NewReminder::once("survives", at(11, 0))).unwrap()
        };
        let db = SqliteReminderStore::open_at(&path).unwrap();
        assert_eq!(db.get_reminder(id).unwrap().unwrap().title, "survives");
    }

    #[tokio::test]
    async fn async_trait_round_trip() {
        let db = SqliteReminderStore::open_memory().unwrap();
        let id = db.insert(&NewReminder::once("async", at(9, 0))).await.unwrap();
        let mut pending = db.load_pending(at(10, 0)).await.unwrap();
        assert_eq!(pending.len(), 1);

        pending[0].is_completed = true;
        db.bulk_update(&pending).await.unwrap();
        assert!(db.load_pending(at(10, 0)).await.unwrap().is_empty());
        assert_eq!(db.load_completed_since(at(0, 0)).await.unwrap().len(), 1);

        db.bulk_delete(&[id]).await.unwrap();
        assert!(db.list_reminders().unwrap().is_empty());
    }
}
