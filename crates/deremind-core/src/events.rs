use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reconciler::ReconcileReport;
use crate::reminder::{Reminder, ReminderId};

/// Every observable state change in the engine produces an Event.
/// Hosts subscribe through `ReminderEngine::subscribe`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// Startup recovery finished and the scheduler is seeded.
    RecoveryCompleted {
        scheduled: usize,
        advanced: usize,
        overdue: usize,
        at: DateTime<Utc>,
    },
    ReminderAdded {
        reminder: Reminder,
        at: DateTime<Utc>,
    },
    ReminderUpdated {
        reminder: Reminder,
        at: DateTime<Utc>,
    },
    ReminderCompleted {
        id: ReminderId,
        at: DateTime<Utc>,
    },
    ReminderDeleted {
        id: ReminderId,
        at: DateTime<Utc>,
    },
    /// A live timer fired and the sink was asked to deliver it.
    ReminderFired {
        reminder: Reminder,
        at: DateTime<Utc>,
    },
    /// A reminder was found past due while nothing was watching it.
    ReminderOverdue {
        reminder: Reminder,
        at: DateTime<Utc>,
    },
    /// A repeating reminder moved to its next occurrence.
    ReminderAdvanced {
        id: ReminderId,
        previous_due_at: DateTime<Utc>,
        due_at: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    Reconciled {
        report: ReconcileReport,
        at: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged_by_type() {
        let event = Event::ReminderDeleted {
            id: 4,
            at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ReminderDeleted");
        assert_eq!(json["id"], 4);
    }
}
