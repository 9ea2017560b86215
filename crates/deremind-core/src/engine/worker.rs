//! The mutation worker.
//!
//! Every change to the view, the timer queue and the overdue ledger happens
//! on this one task, in the order commands arrive. Timer callbacks only send
//! a [`Command::Fire`] message back here, after recording the entry in the
//! shared firing map so a reconciliation pass that runs first leaves it be.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::view::ReminderView;
use crate::batch::{BatchWriteBuffer, WriteOp};
use crate::clock::Clock;
use crate::error::{CoreError, Result};
use crate::events::Event;
use crate::notify::NotificationSink;
use crate::reconciler::{self, ReconcileReport};
use crate::recovery::{OverdueLedger, RecoveryPlan};
use crate::reminder::{advance_once, NewReminder, Reminder, ReminderId};
use crate::scheduler::TimerScheduler;
use crate::storage::{EngineConfig, GatedStore};

pub(crate) enum Command {
    Add {
        draft: NewReminder,
        reply: oneshot::Sender<Result<Reminder>>,
    },
    Update {
        reminder: Reminder,
        reply: oneshot::Sender<Result<Reminder>>,
    },
    Complete {
        id: ReminderId,
        reply: oneshot::Sender<bool>,
    },
    Delete {
        id: ReminderId,
        reply: oneshot::Sender<bool>,
    },
    Reconcile {
        reply: Option<oneshot::Sender<ReconcileReport>>,
    },
    Fire {
        id: ReminderId,
        fire_at: DateTime<Utc>,
    },
}

/// Entries popped by the timer whose `Command::Fire` is not handled yet.
pub(crate) type FiringMap = Arc<Mutex<HashMap<ReminderId, DateTime<Utc>>>>;

fn lock_firing(firing: &FiringMap) -> MutexGuard<'_, HashMap<ReminderId, DateTime<Utc>>> {
    firing.lock().unwrap_or_else(|e| e.into_inner())
}

/// State reachable from both the worker and the engine handle.
pub(crate) struct EngineShared {
    pub view: Mutex<ReminderView>,
    pub timers: TimerScheduler,
    pub firing: FiringMap,
    pub buffer: BatchWriteBuffer,
    pub store: GatedStore,
    pub sink: Arc<dyn NotificationSink>,
    pub clock: Arc<dyn Clock>,
    pub config: EngineConfig,
    pub events: broadcast::Sender<Event>,
}

impl EngineShared {
    pub fn lock_view(&self) -> MutexGuard<'_, ReminderView> {
        self.view.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn emit(&self, event: Event) {
        // Err only means nobody is subscribed
        let _ = self.events.send(event);
    }
}

pub(crate) struct Worker {
    shared: Arc<EngineShared>,
    commands: mpsc::WeakUnboundedSender<Command>,
    ledger: OverdueLedger,
}

impl Worker {
    pub fn new(shared: Arc<EngineShared>, commands: mpsc::WeakUnboundedSender<Command>) -> Self {
        Self {
            shared,
            commands,
            ledger: OverdueLedger::new(),
        }
    }

    /// Seed the view and the timer queue from a recovery plan.
    pub async fn apply_recovery(&mut self, plan: RecoveryPlan, completed: Vec<Reminder>, now: DateTime<Utc>) {
        {
            let mut view = self.shared.lock_view();
            for reminder in completed {
                view.insert(reminder);
            }
            for reminder in plan.reminders() {
                view.insert(reminder.clone());
            }
        }

        let scheduled = plan
            .to_schedule
            .iter()
            .filter(|r| self.arm_if_due_soon(r, now))
            .count();

        for reminder in &plan.to_persist {
            self.shared.buffer.enqueue(WriteOp::Update(reminder.clone()));
        }
        if !plan.to_persist.is_empty() {
            let report = self
                .shared
                .buffer
                .flush_all(&self.shared.store, self.shared.config.batch_size)
                .await;
            debug!(updated = report.updated, dropped = report.dropped, "persisted advanced reminders");
        }

        let mut overdue = 0;
        for reminder in &plan.to_notify_overdue {
            if self.ledger.mark(reminder.id) {
                self.notify_overdue(reminder, now).await;
                overdue += 1;
            }
        }

        info!(
            scheduled,
            advanced = plan.to_persist.len(),
            overdue,
            deferred = plan.to_schedule.len() - scheduled,
            "recovery applied"
        );
        self.shared.emit(Event::RecoveryCompleted {
            scheduled,
            advanced: plan.to_persist.len(),
            overdue,
            at: now,
        });
    }

    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, cancel: CancellationToken) {
        loop {
            let command = tokio::select! {
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            self.handle(command).await;
        }
        info!("engine worker stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Add { draft, reply } => {
                let _ = reply.send(self.add(draft).await);
            }
            Command::Update { reminder, reply } => {
                let _ = reply.send(self.update(reminder));
            }
            Command::Complete { id, reply } => {
                let _ = reply.send(self.complete(id));
            }
            Command::Delete { id, reply } => {
                let _ = reply.send(self.delete(id));
            }
            Command::Reconcile { reply } => {
                let report = self.reconcile().await;
                if let Some(reply) = reply {
                    let _ = reply.send(report);
                }
            }
            Command::Fire { id, fire_at } => self.on_fire(id, fire_at).await,
        }
    }

    fn arm(&self, id: ReminderId, fire_at: DateTime<Utc>) {
        let commands = self.commands.clone();
        let firing = self.shared.firing.clone();
        self.shared.timers.schedule(id, fire_at, move || {
            let commands = commands.upgrade().ok_or(CoreError::EngineStopped)?;
            lock_firing(&firing).insert(id, fire_at);
            commands
                .send(Command::Fire { id, fire_at })
                .map_err(|_| CoreError::EngineStopped)
        });
    }

    /// Arm a pending reminder that is due after `now` and within the horizon.
    fn arm_if_due_soon(&self, reminder: &Reminder, now: DateTime<Utc>) -> bool {
        if !reminder.is_schedulable() || reminder.is_due(now) {
            return false;
        }
        if reminder.due_at > now + self.shared.config.horizon() {
            debug!(id = reminder.id, due_at = %reminder.due_at, "beyond horizon, deferred");
            return false;
        }
        self.arm(reminder.id, reminder.due_at);
        true
    }

    async fn add(&mut self, draft: NewReminder) -> Result<Reminder> {
        draft.validate()?;
        let id = self.shared.store.insert(&draft).await?;
        let reminder = draft.into_reminder(id);
        let now = self.shared.clock.now();

        self.shared.lock_view().insert(reminder.clone());
        if !self.arm_if_due_soon(&reminder, now) && reminder.is_due(now) {
            debug!(id, "added reminder already due, left to reconciliation");
        }
        info!(id, due_at = %reminder.due_at, "reminder added");
        self.shared.emit(Event::ReminderAdded {
            reminder: reminder.clone(),
            at: now,
        });
        Ok(reminder)
    }

    fn update(&mut self, reminder: Reminder) -> Result<Reminder> {
        reminder.validate()?;
        let id = reminder.id;
        let previous = {
            let mut view = self.shared.lock_view();
            if view.get(id).is_none() {
                return Err(CoreError::NotFound(id));
            }
            view.insert(reminder.clone())
        };
        if previous.map(|p| p.due_at) != Some(reminder.due_at) {
            self.ledger.forget(id);
        }

        let now = self.shared.clock.now();
        self.shared.timers.cancel(id);
        self.arm_if_due_soon(&reminder, now);
        self.shared.buffer.enqueue(WriteOp::Update(reminder.clone()));
        info!(id, due_at = %reminder.due_at, "reminder updated");
        self.shared.emit(Event::ReminderUpdated {
            reminder: reminder.clone(),
            at: now,
        });
        Ok(reminder)
    }

    fn complete(&mut self, id: ReminderId) -> bool {
        let completed = {
            let mut view = self.shared.lock_view();
            match view.get_mut(id) {
                Some(reminder) if !reminder.is_completed => {
                    reminder.is_completed = true;
                    Some(reminder.clone())
                }
                _ => None,
            }
        };
        let Some(reminder) = completed else {
            debug!(id, "complete ignored for unknown or completed reminder");
            return false;
        };

        self.shared.timers.cancel(id);
        self.shared.buffer.enqueue(WriteOp::Update(reminder));
        info!(id, "reminder completed");
        self.shared.emit(Event::ReminderCompleted {
            id,
            at: self.shared.clock.now(),
        });
        true
    }

    fn delete(&mut self, id: ReminderId) -> bool {
        let removed = self.shared.lock_view().remove(id);
        self.shared.timers.cancel(id);
        self.ledger.forget(id);
        if removed.is_none() {
            debug!(id, "delete ignored for unknown reminder");
            return false;
        }

        self.shared.buffer.enqueue(WriteOp::Delete(id));
        info!(id, "reminder deleted");
        self.shared.emit(Event::ReminderDeleted {
            id,
            at: self.shared.clock.now(),
        });
        true
    }

    async fn on_fire(&mut self, id: ReminderId, fire_at: DateTime<Utc>) {
        {
            let mut firing = lock_firing(&self.shared.firing);
            if firing.get(&id) == Some(&fire_at) {
                firing.remove(&id);
            }
        }
        let current = self.shared.lock_view().get(id).cloned();
        let Some(reminder) = current else {
            debug!(id, "fire for removed reminder ignored");
            return;
        };
        if reminder.is_completed {
            debug!(id, "fire for completed reminder ignored");
            return;
        }
        if reminder.due_at != fire_at {
            debug!(id, %fire_at, due_at = %reminder.due_at, "stale fire ignored");
            return;
        }

        if let Err(e) = self.shared.sink.notify_due(&reminder).await {
            warn!(id, error = %e, "due notification failed");
        }
        let now = self.shared.clock.now();
        self.shared.emit(Event::ReminderFired {
            reminder: reminder.clone(),
            at: now,
        });

        let Some(interval) = reminder.effective_interval() else {
            // Delivered; later passes must not report it overdue
            self.ledger.mark(id);
            return;
        };
        let next = advance_once(reminder.due_at, interval);
        let advanced = {
            let mut view = self.shared.lock_view();
            view.get_mut(id).map(|r| {
                r.due_at = next;
                r.clone()
            })
        };
        let Some(advanced) = advanced else {
            return;
        };

        if next <= now + self.shared.config.horizon() {
            self.arm(id, next);
        }
        self.shared.buffer.enqueue(WriteOp::Update(advanced));
        debug!(id, previous = %reminder.due_at, %next, "repeating reminder advanced");
        self.shared.emit(Event::ReminderAdvanced {
            id,
            previous_due_at: reminder.due_at,
            due_at: next,
            at: now,
        });
    }

    async fn reconcile(&mut self) -> ReconcileReport {
        let now = self.shared.clock.now();
        let view = self.shared.lock_view().snapshot();
        let timers: HashMap<ReminderId, DateTime<Utc>> =
            self.shared.timers.entries().into_iter().collect();
        let firing = lock_firing(&self.shared.firing).clone();

        let actions = reconciler::plan(
            &view,
            &timers,
            &firing,
            &mut self.ledger,
            now,
            self.shared.config.horizon(),
        );

        for id in &actions.cancel {
            self.shared.timers.cancel(*id);
        }
        for (advanced, previous_due_at) in &actions.advance {
            self.shared.lock_view().insert(advanced.clone());
            self.shared.buffer.enqueue(WriteOp::Update(advanced.clone()));
            self.shared.emit(Event::ReminderAdvanced {
                id: advanced.id,
                previous_due_at: *previous_due_at,
                due_at: advanced.due_at,
                at: now,
            });
        }
        for (id, fire_at) in &actions.arm {
            self.arm(*id, *fire_at);
        }
        for reminder in &actions.notify_overdue {
            self.notify_overdue(reminder, now).await;
        }

        let report = actions.report;
        info!(
            scheduled = report.scheduled,
            rescheduled = report.rescheduled,
            cancelled = report.cancelled,
            advanced = report.advanced,
            overdue = report.overdue_notified,
            deferred = report.deferred,
            next_deadline = ?self.shared.timers.next_deadline(),
            "reconciliation pass finished"
        );
        self.shared.emit(Event::Reconciled { report, at: now });
        report
    }

    async fn notify_overdue(&self, reminder: &Reminder, now: DateTime<Utc>) {
        if let Err(e) = self.shared.sink.notify_overdue(reminder).await {
            warn!(id = reminder.id, error = %e, "overdue notification failed");
        }
        self.shared.emit(Event::ReminderOverdue {
            reminder: reminder.clone(),
            at: now,
        });
    }
}
