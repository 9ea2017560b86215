//! Reminder entity and repeat arithmetic.
//!
//! Two different advance rules exist on purpose:
//!
//! - [`catch_up`] is used when a repeating reminder is found in the past
//!   (startup recovery, background reconciliation) and jumps straight to the
//!   first occurrence after `now` without visiting the missed ones.
//! - [`advance_once`] is used when a live timer fires; the timer only fires
//!   when the reminder is genuinely due, so one interval is enough.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Store-assigned reminder identifier (SQLite rowid).
pub type ReminderId = i64;

/// Fallback applied to persisted repeating reminders whose interval is not
/// positive. Such rows can only come from outside the engine.
const INVALID_INTERVAL_FALLBACK_HOURS: i64 = 1;

/// A user-scheduled alert with optional repetition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: ReminderId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub due_at: DateTime<Utc>,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub is_repeating: bool,
    #[serde(with = "duration_millis", default = "zero_interval")]
    pub repeat_interval: Duration,
}

/// Draft accepted by `ReminderEngine::add`; the id is assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReminder {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub due_at: DateTime<Utc>,
    #[serde(default)]
    pub is_repeating: bool,
    #[serde(with = "duration_millis", default = "zero_interval")]
    pub repeat_interval: Duration,
}

fn zero_interval() -> Duration {
    Duration::zero()
}

impl NewReminder {
    /// One-shot reminder.
    pub fn once(title: impl Into<String>, due_at: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            due_at,
            is_repeating: false,
            repeat_interval: Duration::zero(),
        }
    }

    /// Reminder that repeats every `interval` starting at `due_at`.
    pub fn repeating(title: impl Into<String>, due_at: DateTime<Utc>, interval: Duration) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            due_at,
            is_repeating: true,
            repeat_interval: interval,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// # Errors
    /// Returns an error for an empty title or a repeating draft without a
    /// positive interval.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_fields(&self.title, self.is_repeating, self.repeat_interval)
    }

    /// Materialize the draft once the store has assigned an id.
    pub fn into_reminder(self, id: ReminderId) -> Reminder {
        Reminder {
            id,
            title: self.title,
            description: self.description,
            due_at: self.due_at,
            is_completed: false,
            is_repeating: self.is_repeating,
            repeat_interval: self.repeat_interval,
        }
    }
}

impl Reminder {
    /// # Errors
    /// Same rules as [`NewReminder::validate`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_fields(&self.title, self.is_repeating, self.repeat_interval)
    }

    /// Whether the scheduler should ever hold a timer for this reminder.
    pub fn is_schedulable(&self) -> bool {
        !self.is_completed
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_at <= now
    }

    /// Interval used by the repeat arithmetic, `None` for one-shot reminders.
    pub fn effective_interval(&self) -> Option<Duration> {
        self.is_repeating.then_some(self.repeat_interval)
    }
}

fn validate_fields(title: &str, is_repeating: bool, interval: Duration) -> Result<(), ValidationError> {
    if title.trim().is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    if is_repeating && interval <= Duration::zero() {
        return Err(ValidationError::NonPositiveInterval {
            millis: interval.num_milliseconds(),
        });
    }
    Ok(())
}

/// Smallest `due_at + k * interval` strictly after `now`.
///
/// `k = floor((now - due_at) / interval) + 1`, which is the ceiling of the
/// elapsed intervals except on an exact multiple, where the ceiling would
/// land on `now` itself. The result is congruent to `due_at` modulo
/// `interval`. Returns `due_at` unchanged when it is already in the future.
pub fn catch_up(due_at: DateTime<Utc>, interval: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
    if due_at > now {
        return due_at;
    }
    let interval_ms = interval.num_milliseconds();
    if interval_ms <= 0 {
        return now + Duration::hours(INVALID_INTERVAL_FALLBACK_HOURS);
    }

    let elapsed_ms = (now - due_at).num_milliseconds();
    let k = elapsed_ms / interval_ms + 1;
    let mut next = due_at + Duration::milliseconds(interval_ms.saturating_mul(k));
    // Sub-millisecond remainders are truncated by num_milliseconds
    while next <= now {
        next += interval;
    }
    next
}

/// Next occurrence after a live fire: exactly one interval later.
pub fn advance_once(due_at: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    if interval <= Duration::zero() {
        return due_at + Duration::hours(INVALID_INTERVAL_FALLBACK_HOURS);
    }
    due_at + interval
}

/// Serde helper: `chrono::Duration` as integer milliseconds.
pub mod duration_millis {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(value.num_milliseconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = i64::deserialize(deserializer)?;
        Ok(Duration::milliseconds(millis))
    }
}
