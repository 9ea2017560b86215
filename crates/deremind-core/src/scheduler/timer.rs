//! Priority-queue timer driven by a single wake task.
//!
//! Only one sleep is ever armed: the wake task sleeps until the earliest
//! deadline in the queue and is re-armed through a [`Notify`] after every
//! insert or removal. When it wakes it pops every entry that is due, so a
//! late wake-up delivers all the entries it overslept, and it runs the
//! callbacks outside the queue lock.

use chrono::{DateTime, Utc};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::queue::TimerQueue;
use crate::clock::Clock;
use crate::error::{CoreError, SchedulingFault};
use crate::reminder::ReminderId;

/// Work run when an entry comes due. Must not block.
pub type FireCallback = Box<dyn FnOnce() -> Result<(), CoreError> + Send + 'static>;

struct Shared {
    queue: Mutex<TimerQueue<FireCallback>>,
    rearm: Notify,
    clock: Arc<dyn Clock>,
}

impl Shared {
    fn lock_queue(&self) -> MutexGuard<'_, TimerQueue<FireCallback>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fire_due(&self) -> usize {
        let now = self.clock.now();
        let due = self.lock_queue().pop_due(now);
        let fired = due.len();

        for entry in due {
            let id = entry.id;
            match panic::catch_unwind(AssertUnwindSafe(entry.callback)) {
                Ok(Ok(())) => debug!(id, fire_at = %entry.fire_at, "timer fired"),
                Ok(Err(e)) => {
                    let fault = SchedulingFault::CallbackFailed {
                        id,
                        message: e.to_string(),
                    };
                    error!("{fault}");
                }
                Err(payload) => {
                    let fault = SchedulingFault::CallbackPanicked {
                        id,
                        message: panic_message(payload.as_ref()),
                    };
                    error!("{fault}");
                }
            }
        }
        fired
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

async fn drive(shared: Arc<Shared>, cancel: CancellationToken) {
    loop {
        let deadline = shared.lock_queue().next_deadline();
        let wait = deadline.map(|at| {
            (at - shared.clock.now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO)
        });

        let sleep = async {
            match wait {
                Some(delay) => tokio::time::sleep(delay).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = shared.rearm.notified() => {}
            _ = sleep => {
                shared.fire_due();
            }
        }
    }
    debug!("timer wake task stopped");
}

/// Owns every live timer entry. Requires a running tokio runtime.
pub struct TimerScheduler {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl TimerScheduler {
    /// Start a scheduler with its own cancellation token.
    pub fn start(clock: Arc<dyn Clock>) -> Self {
        Self::start_with_cancellation(clock, CancellationToken::new())
    }

    /// Start a scheduler whose wake task stops when `cancel` is cancelled.
    pub fn start_with_cancellation(clock: Arc<dyn Clock>, cancel: CancellationToken) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(TimerQueue::new()),
            rearm: Notify::new(),
            clock,
        });
        let driver = tokio::spawn(drive(shared.clone(), cancel.clone()));
        Self {
            shared,
            cancel,
            driver: Mutex::new(Some(driver)),
        }
    }

    /// Arm a timer for `id`, replacing any entry the id already holds.
    pub fn schedule<F>(&self, id: ReminderId, fire_at: DateTime<Utc>, callback: F)
    where
        F: FnOnce() -> Result<(), CoreError> + Send + 'static,
    {
        let replaced = self.shared.lock_queue().insert(id, fire_at, Box::new(callback));
        if let Some(previous) = replaced {
            debug!(id, %previous, %fire_at, "replaced stale timer entry");
        } else {
            debug!(id, %fire_at, "timer scheduled");
        }
        self.shared.rearm.notify_one();
    }

    /// Remove the entry for `id`. Returns whether one existed.
    pub fn cancel(&self, id: ReminderId) -> bool {
        let removed = self.shared.lock_queue().remove(id).is_some();
        if removed {
            debug!(id, "timer cancelled");
            self.shared.rearm.notify_one();
        }
        removed
    }

    pub fn is_scheduled(&self, id: ReminderId) -> bool {
        self.shared.lock_queue().contains(id)
    }

    pub fn fire_at(&self, id: ReminderId) -> Option<DateTime<Utc>> {
        self.shared.lock_queue().fire_at(id)
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.shared.lock_queue().next_deadline()
    }

    /// `(id, fire_at)` for every live entry, in deadline order.
    pub fn entries(&self) -> Vec<(ReminderId, DateTime<Utc>)> {
        self.shared.lock_queue().entries()
    }

    pub fn len(&self) -> usize {
        self.shared.lock_queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.lock_queue().is_empty()
    }

    /// Make the wake task re-read the deadline, e.g. after the clock moved.
    pub fn poke(&self) {
        self.shared.rearm.notify_one();
    }

    /// Run every due entry on the calling thread. Returns how many fired.
    pub fn fire_due(&self) -> usize {
        let fired = self.shared.fire_due();
        self.shared.rearm.notify_one();
        fired
    }

    /// Stop the wake task and drop every pending entry.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.shared.lock_queue().clear();
        let driver = self.driver.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = driver {
            handle.abort();
        }
    }
}

impl Drop for TimerScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
