//! The reminder engine.
//!
//! [`ReminderEngine`] is a cheap handle in front of a single worker task that
//! owns every mutation. Starting the engine runs recovery against the store,
//! seeds the timer queue, and spawns three tasks:
//!
//! - the mutation worker
//! - the periodic write-buffer flush
//! - the periodic reconciliation request
//!
//! Reads (`reminders`, `get`, `is_scheduled`) take the view or queue lock
//! directly and never wait for the worker.

mod view;
mod worker;

pub(crate) use worker::Command;

use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::batch::{BatchWriteBuffer, FlushReport};
use crate::clock::Clock;
use crate::error::{CoreError, Result};
use crate::events::Event;
use crate::notify::NotificationSink;
use crate::reconciler::{self, ReconcileReport};
use crate::recovery::RecoveryCoordinator;
use crate::reminder::{NewReminder, Reminder, ReminderId};
use crate::scheduler::TimerScheduler;
use crate::storage::{EngineConfig, GatedStore, ReminderStore};
use view::ReminderView;
use worker::{EngineShared, Worker};

pub struct ReminderEngine {
    shared: Arc<EngineShared>,
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    startup_events: Mutex<Option<broadcast::Receiver<Event>>>,
}

impl ReminderEngine {
    /// Recover from `store` and start the background tasks.
    ///
    /// # Errors
    /// Returns an error if the config is invalid or the pending reminders
    /// cannot be loaded.
    pub async fn start(
        store: Arc<dyn ReminderStore>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let store = GatedStore::new(store);
        let now = clock.now();

        let plan = RecoveryCoordinator::recover(&store, now).await?;
        let completed = match store
            .load_completed_since(now - config.completed_retention())
            .await
        {
            Ok(completed) => completed,
            Err(e) => {
                warn!(error = %e, "could not load recently completed reminders");
                Vec::new()
            }
        };

        let cancel = CancellationToken::new();
        let (events, startup_events) = broadcast::channel(config.event_capacity);
        let shared = Arc::new(EngineShared {
            view: Mutex::new(ReminderView::new()),
            timers: TimerScheduler::start_with_cancellation(clock.clone(), cancel.child_token()),
            firing: Arc::default(),
            buffer: BatchWriteBuffer::new(),
            store,
            sink,
            clock,
            config,
            events,
        });

        let (commands, command_rx) = mpsc::unbounded_channel();
        let mut worker = Worker::new(shared.clone(), commands.downgrade());
        worker.apply_recovery(plan, completed, now).await;

        let tasks = vec![
            tokio::spawn(worker.run(command_rx, cancel.clone())),
            tokio::spawn(flush_periodically(shared.clone(), cancel.clone())),
            tokio::spawn(reconciler::run_periodic(
                commands.clone(),
                shared.config.reconcile_interval(),
                cancel.clone(),
            )),
        ];
        info!("reminder engine started");

        Ok(Self {
            shared,
            commands,
            cancel,
            tasks: Mutex::new(tasks),
            startup_events: Mutex::new(Some(startup_events)),
        })
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| CoreError::EngineStopped)?;
        rx.await.map_err(|_| CoreError::EngineStopped)
    }

    /// # Errors
    /// Returns a validation error, a store error if the insert fails, or
    /// `EngineStopped`.
    pub async fn add(&self, draft: NewReminder) -> Result<Reminder> {
        self.request(|reply| Command::Add { draft, reply }).await?
    }

    /// Replace a reminder's fields and re-arm its timer.
    ///
    /// # Errors
    /// Returns `NotFound` for an id the engine does not hold.
    pub async fn update(&self, reminder: Reminder) -> Result<Reminder> {
        self.request(|reply| Command::Update { reminder, reply }).await?
    }

    /// Mark completed and cancel its timer. `false` if unknown or already
    /// completed.
    pub async fn complete(&self, id: ReminderId) -> Result<bool> {
        self.request(|reply| Command::Complete { id, reply }).await
    }

    /// `false` if the id is unknown.
    pub async fn delete(&self, id: ReminderId) -> Result<bool> {
        self.request(|reply| Command::Delete { id, reply }).await
    }

    /// Run a reconciliation pass now.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        self.request(|reply| Command::Reconcile { reply: Some(reply) })
            .await
    }

    /// Write every buffered operation to the store.
    pub async fn flush(&self) -> FlushReport {
        self.shared
            .buffer
            .flush_all(&self.shared.store, self.shared.config.batch_size)
            .await
    }

    /// Snapshot of the view ordered by `(due_at, id)`.
    pub fn reminders(&self) -> Vec<Reminder> {
        self.shared.lock_view().snapshot()
    }

    pub fn get(&self, id: ReminderId) -> Option<Reminder> {
        self.shared.lock_view().get(id).cloned()
    }

    pub fn is_scheduled(&self, id: ReminderId) -> bool {
        self.shared.timers.is_scheduled(id)
    }

    pub fn scheduled_count(&self) -> usize {
        self.shared.timers.len()
    }

    pub fn pending_writes(&self) -> usize {
        self.shared.buffer.len()
    }

    /// Subscribe to engine events.
    ///
    /// The first receiver handed out also holds the events emitted while
    /// the engine was starting, such as `RecoveryCompleted`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        let startup = self
            .startup_events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        startup.unwrap_or_else(|| self.shared.events.subscribe())
    }

    /// Re-evaluate the earliest deadline, e.g. after the clock jumped.
    pub fn poke(&self) {
        self.shared.timers.poke();
    }

    /// Stop every task and drop pending timers. Buffered writes that were
    /// not flushed are discarded.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.shared.timers.shutdown();
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "engine task ended abnormally");
            }
        }
        let unflushed = self.shared.buffer.len();
        if unflushed > 0 {
            debug!(unflushed, "discarding buffered writes on shutdown");
        }
        info!("reminder engine stopped");
    }
}

impl Drop for ReminderEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn flush_periodically(shared: Arc<EngineShared>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(shared.config.flush_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let report = shared.buffer.flush(&shared.store, shared.config.batch_size).await;
                if report.is_empty() {
                    continue;
                }
                if report.dropped > 0 {
                    warn!(dropped = report.dropped, "buffered writes dropped during flush");
                } else {
                    debug!(updated = report.updated, deleted = report.deleted, "periodic flush");
                }
            }
        }
    }
    debug!("flush task stopped");
}
