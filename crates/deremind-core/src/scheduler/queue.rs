//! Deadline-ordered queue of pending timer entries.
//!
//! Pure data structure with no locking or time source of its own. Entries are
//! ordered by `(fire_at, id)`; the id only breaks exact ties. An id index
//! guarantees at most one entry per reminder.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

use crate::reminder::ReminderId;

/// An entry removed from the queue because it is due.
pub struct DueEntry<C> {
    pub id: ReminderId,
    pub fire_at: DateTime<Utc>,
    pub callback: C,
}

pub struct TimerQueue<C> {
    by_deadline: BTreeMap<(DateTime<Utc>, ReminderId), C>,
    by_id: HashMap<ReminderId, DateTime<Utc>>,
}

impl<C> TimerQueue<C> {
    pub fn new() -> Self {
        Self {
            by_deadline: BTreeMap::new(),
            by_id: HashMap::new(),
        }
    }

    /// Insert an entry, retiring any existing entry for the same id first.
    ///
    /// Returns the fire time of the retired entry, if there was one.
    pub fn insert(
        &mut self,
        id: ReminderId,
        fire_at: DateTime<Utc>,
        callback: C,
    ) -> Option<DateTime<Utc>> {
        let replaced = self.remove(id);
        self.by_deadline.insert((fire_at, id), callback);
        self.by_id.insert(id, fire_at);
        replaced
    }

    /// Remove the entry for `id`. Returns its fire time if it existed.
    pub fn remove(&mut self, id: ReminderId) -> Option<DateTime<Utc>> {
        let fire_at = self.by_id.remove(&id)?;
        self.by_deadline.remove(&(fire_at, id));
        Some(fire_at)
    }

    pub fn contains(&self, id: ReminderId) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn fire_at(&self, id: ReminderId) -> Option<DateTime<Utc>> {
        self.by_id.get(&id).copied()
    }

    /// Earliest pending fire time.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.by_deadline.keys().next().map(|(at, _)| *at)
    }

    /// Remove and return every entry with `fire_at <= now`, earliest first.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<DueEntry<C>> {
        let mut due = Vec::new();
        while let Some(entry) = self.by_deadline.first_entry() {
            let (fire_at, id) = *entry.key();
            if fire_at > now {
                break;
            }
            let callback = entry.remove();
            self.by_id.remove(&id);
            due.push(DueEntry {
                id,
                fire_at,
                callback,
            });
        }
        due
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// `(id, fire_at)` for every entry, in deadline order.
    pub fn entries(&self) -> Vec<(ReminderId, DateTime<Utc>)> {
        self.by_deadline.keys().map(|(at, id)| (*id, *at)).collect()
    }

    pub fn clear(&mut self) {
        self.by_deadline.clear();
        self.by_id.clear();
    }
}

impl<C> Default for TimerQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(min: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap() + Duration::minutes(min)
    }

    #[test]
    fn next_deadline_tracks_minimum() {
        let mut q: TimerQueue<()> = TimerQueue::new();
        assert!(q.next_deadline().is_none());
        q.insert(1, t(30), ());
        q.insert(2, t(10), ());
        q.insert(3, t(20), ());
        assert_eq!(q.next_deadline(), Some(t(10)));

        q.remove(2);
        assert_eq!(q.next_deadline(), Some(t(20)));
    }

    #[test]
    fn insert_replaces_existing_entry_for_id() {
        let mut q = TimerQueue::new();
        assert_eq!(q.insert(7, t(5), "first"), None);
        assert_eq!(q.insert(7, t(15), "second"), Some(t(5)));
        assert_eq!(q.len(), 1);
        assert_eq!(q.fire_at(7), Some(t(15)));

        let due = q.pop_due(t(60));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].callback, "second");
    }

    #[test]
    fn pop_due_takes_all_elapsed_entries_in_order() {
        let mut q = TimerQueue::new();
        q.insert(3, t(10), 'c');
        q.insert(1, t(10), 'a');
        q.insert(2, t(5), 'b');
        q.insert(4, t(11), 'd');

        let due: Vec<_> = q.pop_due(t(10)).into_iter().map(|e| (e.id, e.callback)).collect();
        assert_eq!(due, vec![(2, 'b'), (1, 'a'), (3, 'c')]);
        assert_eq!(q.entries(), vec![(4, t(11))]);
        assert!(q.contains(4));
        assert!(!q.contains(1));
    }

    #[test]
    fn remove_unknown_id_is_noop() {
        let mut q: TimerQueue<()> = TimerQueue::new();
        q.insert(1, t(1), ());
        assert_eq!(q.remove(99), None);
        assert_eq!(q.len(), 1);
        q.clear();
        assert!(q.is_empty());
    }
}
