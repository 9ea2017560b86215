//! Background reconciliation between the in-memory view and the timer queue.
//!
//! A pass reads only the view, never the store. It cancels timers for
//! reminders that are gone or completed, re-arms timers whose deadline no
//! longer matches the reminder, and runs the recovery classification for
//! pending reminders without a timer. Reminders beyond the horizon are left
//! for a later pass.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::Command;
use crate::recovery::{classify_one, Disposition, OverdueLedger};
use crate::reminder::{Reminder, ReminderId};

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Untracked reminders that received a timer.
    pub scheduled: usize,
    /// Tracked reminders whose timer was moved to the current `due_at`.
    pub rescheduled: usize,
    /// Timers removed because their reminder is gone or completed.
    pub cancelled: usize,
    /// Repeating reminders fast-forwarded past now.
    pub advanced: usize,
    pub overdue_notified: usize,
    /// Pending reminders beyond the horizon, left without a timer.
    pub deferred: usize,
}

/// Changes one pass wants applied, in application order.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ReconcileActions {
    pub cancel: Vec<ReminderId>,
    pub arm: Vec<(ReminderId, DateTime<Utc>)>,
    /// Advanced copies paired with the `due_at` they replace.
    pub advance: Vec<(Reminder, DateTime<Utc>)>,
    pub notify_overdue: Vec<Reminder>,
    pub report: ReconcileReport,
}

/// Compute one pass.
///
/// `timers` maps every id holding a timer to its fire time. `firing` holds
/// entries the timer already popped whose fire the worker has not handled
/// yet; a reminder still due at that time is left alone. Ids newly found
/// overdue are recorded in `ledger`; ids already in it are skipped.
pub(crate) fn plan(
    view: &[Reminder],
    timers: &HashMap<ReminderId, DateTime<Utc>>,
    firing: &HashMap<ReminderId, DateTime<Utc>>,
    ledger: &mut OverdueLedger,
    now: DateTime<Utc>,
    horizon: Duration,
) -> ReconcileActions {
    let mut actions = ReconcileActions::default();
    let limit = now + horizon;

    let live: HashSet<ReminderId> = view
        .iter()
        .filter(|r| r.is_schedulable())
        .map(|r| r.id)
        .collect();
    let mut orphaned: Vec<ReminderId> = timers
        .keys()
        .copied()
        .filter(|id| !live.contains(id))
        .collect();
    orphaned.sort_unstable();
    actions.report.cancelled = orphaned.len();
    actions.cancel = orphaned;

    for reminder in view.iter().filter(|r| r.is_schedulable()) {
        if firing.get(&reminder.id) == Some(&reminder.due_at) {
            continue;
        }
        if let Some(&fire_at) = timers.get(&reminder.id) {
            if fire_at == reminder.due_at {
                continue;
            }
            if reminder.due_at > now && reminder.due_at <= limit {
                actions.arm.push((reminder.id, reminder.due_at));
                actions.report.rescheduled += 1;
                continue;
            }
            // The timer is wrong and cannot simply be moved
            actions.cancel.push(reminder.id);
            actions.report.cancelled += 1;
        }

        match classify_one(reminder, now) {
            Disposition::Schedule(r) => {
                if r.due_at <= limit {
                    actions.arm.push((r.id, r.due_at));
                    actions.report.scheduled += 1;
                } else {
                    actions.report.deferred += 1;
                }
            }
            Disposition::Advance {
                reminder: advanced,
                previous_due_at,
            } => {
                actions.report.advanced += 1;
                if advanced.due_at <= limit {
                    actions.arm.push((advanced.id, advanced.due_at));
                } else {
                    actions.report.deferred += 1;
                }
                actions.advance.push((advanced, previous_due_at));
            }
            Disposition::Overdue(r) => {
                if ledger.mark(r.id) {
                    actions.report.overdue_notified += 1;
                    actions.notify_overdue.push(r);
                }
            }
            Disposition::Skip => {}
        }
    }

    actions
}

/// Ask the engine worker for a pass every `interval` until cancelled.
pub(crate) async fn run_periodic(
    commands: mpsc::UnboundedSender<Command>,
    interval: std::time::Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; startup recovery already ran
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if commands.send(Command::Reconcile { reply: None }).is_err() {
                    break;
                }
                debug!("periodic reconciliation requested");
            }
        }
    }
    info!("reconciler stopped");
}
