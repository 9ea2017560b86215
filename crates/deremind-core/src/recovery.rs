//! Startup recovery.
//!
//! Classification is a pure function of the persisted reminders and the
//! current time: running it twice over the same input yields the same plan.
//! Side effects (arming timers, persisting advanced reminders, notifying) are
//! applied by the engine. Overdue notifications are deduplicated separately
//! by the session-scoped [`OverdueLedger`].

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::reminder::{catch_up, Reminder, ReminderId};
use crate::storage::GatedStore;

/// What to do with a single pending reminder at time `now`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Due in the future; arm a timer for `due_at`.
    Schedule(Reminder),
    /// Repeating and past due; `reminder.due_at` is already the first
    /// occurrence after `now`. Must be persisted before it is armed.
    Advance {
        reminder: Reminder,
        previous_due_at: DateTime<Utc>,
    },
    /// One-shot and past due; notify once, leave it pending and unscheduled.
    Overdue(Reminder),
    /// Completed; never scheduled.
    Skip,
}

/// Classify one reminder against `now`.
pub fn classify_one(reminder: &Reminder, now: DateTime<Utc>) -> Disposition {
    if !reminder.is_schedulable() {
        return Disposition::Skip;
    }
    if !reminder.is_due(now) {
        return Disposition::Schedule(reminder.clone());
    }
    match reminder.effective_interval() {
        Some(interval) => {
            let mut advanced = reminder.clone();
            advanced.due_at = catch_up(reminder.due_at, interval, now);
            Disposition::Advance {
                reminder: advanced,
                previous_due_at: reminder.due_at,
            }
        }
        None => Disposition::Overdue(reminder.clone()),
    }
}

/// Outcome of classifying every pending reminder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryPlan {
    /// Every reminder that gets a timer, with its final `due_at`.
    pub to_schedule: Vec<Reminder>,
    /// Repeating reminders whose `due_at` was advanced; also in `to_schedule`.
    pub to_persist: Vec<Reminder>,
    /// One-shot reminders found past due.
    pub to_notify_overdue: Vec<Reminder>,
}

impl RecoveryPlan {
    /// Every classified reminder as it should appear in the in-memory view.
    pub fn reminders(&self) -> impl Iterator<Item = &Reminder> {
        self.to_schedule.iter().chain(self.to_notify_overdue.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.to_schedule.is_empty() && self.to_notify_overdue.is_empty()
    }
}

pub struct RecoveryCoordinator;

impl RecoveryCoordinator {
    /// Pure classification of `reminders` at `now`. Completed reminders are
    /// dropped from the plan.
    pub fn classify(reminders: Vec<Reminder>, now: DateTime<Utc>) -> RecoveryPlan {
        let mut plan = RecoveryPlan::default();
        for reminder in &reminders {
            match classify_one(reminder, now) {
                Disposition::Schedule(r) => plan.to_schedule.push(r),
                Disposition::Advance { reminder, .. } => {
                    plan.to_persist.push(reminder.clone());
                    plan.to_schedule.push(reminder);
                }
                Disposition::Overdue(r) => plan.to_notify_overdue.push(r),
                Disposition::Skip => {}
            }
        }
        plan
    }

    /// Load every pending reminder through the gate and classify it.
    ///
    /// # Errors
    /// Returns the store error if the pending set cannot be loaded.
    pub async fn recover(store: &GatedStore, now: DateTime<Utc>) -> Result<RecoveryPlan, StoreError> {
        let pending = store.load_pending(now).await?;
        let plan = Self::classify(pending, now);
        if plan.is_empty() {
            debug!("no pending reminders to recover");
            return Ok(plan);
        }
        info!(
            scheduled = plan.to_schedule.len(),
            advanced = plan.to_persist.len(),
            overdue = plan.to_notify_overdue.len(),
            "recovery classified pending reminders"
        );
        Ok(plan)
    }
}

/// Ids already notified overdue during this process session.
#[derive(Debug, Default)]
pub struct OverdueLedger {
    notified: HashSet<ReminderId>,
}

impl OverdueLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id`. Returns `true` only the first time.
    pub fn mark(&mut self, id: ReminderId) -> bool {
        self.notified.insert(id)
    }

    pub fn forget(&mut self, id: ReminderId) {
        self.notified.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reminder::NewReminder;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 10, 9, 0, 0).unwrap()
    }

    fn sample(now: DateTime<Utc>) -> Vec<Reminder> {
        let mut done = NewReminder::once("Done already", now - Duration::hours(3)).into_reminder(4);
        done.is_completed = true;
        vec![
            NewReminder::repeating("Stand up", now - Duration::minutes(90), Duration::minutes(60))
                .into_reminder(1),
            NewReminder::once("Call dentist", now - Duration::minutes(5)).into_reminder(2),
            NewReminder::once("Lunch", now + Duration::hours(3)).into_reminder(3),
            done,
        ]
    }

    #[test]
    fn classifies_every_case() {
        let now = now();
        let plan = RecoveryCoordinator::classify(sample(now), now);

        let scheduled: Vec<_> = plan.to_schedule.iter().map(|r| (r.id, r.due_at)).collect();
        assert_eq!(
            scheduled,
            vec![(1, now + Duration::minutes(30)), (3, now + Duration::hours(3))]
        );
        assert_eq!(plan.to_persist.len(), 1);
        assert_eq!(plan.to_persist[0].due_at, now + Duration::minutes(30));

        assert_eq!(plan.to_notify_overdue.len(), 1);
        let overdue = &plan.to_notify_overdue[0];
        assert_eq!(overdue.id, 2);
        assert_eq!(overdue.due_at, now - Duration::minutes(5));
        assert!(!overdue.is_completed);

        assert_eq!(plan.reminders().count(), 3);
    }

    #[test]
    fn classification_is_idempotent() {
        let now = now();
        let first = RecoveryCoordinator::classify(sample(now), now);
        let second = RecoveryCoordinator::classify(sample(now), now);
        assert_eq!(first, second);
    }

    #[test]
    fn due_exactly_now_counts_as_past() {
        let now = now();
        let reminder = NewReminder::once("Now", now).into_reminder(1);
        assert_eq!(classify_one(&reminder, now), Disposition::Overdue(reminder));
    }

    #[test]
    fn ledger_notifies_once_until_forgotten() {
        let mut ledger = OverdueLedger::new();
        assert!(ledger.mark(2));
        assert!(!ledger.mark(2));
        ledger.forget(2);
        assert!(ledger.mark(2));
    }

    #[tokio::test]
    async fn recover_reads_through_the_gate() {
        let store = crate::storage::SqliteReminderStore::open_memory().unwrap();
        let now = now();
        store
            .insert_reminder(&NewReminder::once("Old", now - Duration::days(1)))
            .unwrap();
        store
            .insert_reminder(&NewReminder::once("New", now + Duration::days(1)))
            .unwrap();

        let gate = GatedStore::new(std::sync::Arc::new(store));
        let plan = RecoveryCoordinator::recover(&gate, now).await.unwrap();
        assert_eq!(plan.to_schedule.len(), 1);
        assert_eq!(plan.to_notify_overdue.len(), 1);
    }

    proptest! {
        #[test]
        fn advanced_reminders_land_after_now_in_phase(
            overdue_min in 0i64..100_000,
            interval_min in 1i64..10_000,
        ) {
            let now = now();
            let due = now - Duration::minutes(overdue_min);
            let reminder = NewReminder::repeating("r", due, Duration::minutes(interval_min))
                .into_reminder(1);
            let plan = RecoveryCoordinator::classify(vec![reminder], now);

            prop_assert_eq!(plan.to_schedule.len(), 1);
            let next = plan.to_schedule[0].due_at;
            prop_assert!(next > now);
            prop_assert_eq!((next - due).num_minutes() % interval_min, 0);
            prop_assert!(plan.to_notify_overdue.is_empty());
        }
    }
}
