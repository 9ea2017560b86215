//! In-memory copy of every reminder the engine knows about.

use std::collections::HashMap;

use crate::reminder::{Reminder, ReminderId};

#[derive(Debug, Default)]
pub struct ReminderView {
    by_id: HashMap<ReminderId, Reminder>,
}

impl ReminderView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace; returns the previous copy.
    pub fn insert(&mut self, reminder: Reminder) -> Option<Reminder> {
        self.by_id.insert(reminder.id, reminder)
    }

    pub fn get(&self, id: ReminderId) -> Option<&Reminder> {
        self.by_id.get(&id)
    }

    pub fn get_mut(&mut self, id: ReminderId) -> Option<&mut Reminder> {
        self.by_id.get_mut(&id)
    }

    pub fn remove(&mut self, id: ReminderId) -> Option<Reminder> {
        self.by_id.remove(&id)
    }

    /// Every reminder ordered by `(due_at, id)`.
    pub fn snapshot(&self) -> Vec<Reminder> {
        let mut all: Vec<Reminder> = self.by_id.values().cloned().collect();
        all.sort_by_key(|r| (r.due_at, r.id));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reminder::NewReminder;
    use chrono::{Duration, Utc};

    #[test]
    fn snapshot_is_time_ordered() {
        let now = Utc::now();
        let mut view = ReminderView::new();
        view.insert(NewReminder::once("later", now + Duration::hours(2)).into_reminder(1));
        view.insert(NewReminder::once("sooner", now + Duration::hours(1)).into_reminder(2));
        view.insert(NewReminder::once("tie", now + Duration::hours(1)).into_reminder(3));

        let ids: Vec<_> = view.snapshot().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
        assert!(view.remove(2).is_some());
        assert!(view.get(2).is_none());
        assert_eq!(view.snapshot().len(), 2);
    }
}
