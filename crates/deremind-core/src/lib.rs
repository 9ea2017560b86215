//! # deRemind Core Library
//!
//! This library provides the reminder scheduling and recovery engine behind
//! deRemind. Hosts (the `deremind-cli` binary, or a desktop shell) create a
//! [`ReminderEngine`] over a [`ReminderStore`] and a [`NotificationSink`] and
//! drive it through async calls; everything else runs in background tasks.
//!
//! ## Architecture
//!
//! - **Engine**: one worker task owns every mutation of the in-memory view and
//!   the timer queue, so operations on the same reminder apply in order
//! - **Scheduler**: a deadline-ordered priority queue with a single tokio wake
//!   task instead of one timer per reminder
//! - **Recovery**: on start, reminders that came due while the process was not
//!   running are notified once or fast-forwarded to their next occurrence
//! - **Reconciler**: an hourly pass that repairs drift between the view and the
//!   timer queue and arms reminders that entered the look-ahead horizon
//! - **Storage**: SQLite-backed reminder persistence behind a single-permit
//!   gate, write-back batching, TOML-based configuration
//!
//! ## Key Components
//!
//! - [`ReminderEngine`]: Public entry point
//! - [`TimerScheduler`]: Timer queue and wake task
//! - [`RecoveryCoordinator`]: Startup classification
//! - [`SqliteReminderStore`]: Default store
//! - [`EngineConfig`]: Engine configuration management

pub mod batch;
pub mod clock;
pub mod engine;
pub mod error;
pub mod events;
pub mod notify;
pub mod reconciler;
pub mod recovery;
pub mod reminder;
pub mod scheduler;
pub mod storage;

pub use batch::{BatchWriteBuffer, FlushReport, WriteOp};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::ReminderEngine;
pub use error::{ConfigError, CoreError, NotifyError, SchedulingFault, StoreError, ValidationError};
pub use events::Event;
pub use notify::{ChannelSink, LogSink, Notification, NotificationSink};
pub use reconciler::ReconcileReport;
pub use recovery::{OverdueLedger, RecoveryCoordinator, RecoveryPlan};
pub use reminder::{NewReminder, Reminder, ReminderId};
pub use scheduler::TimerScheduler;
pub use storage::{EngineConfig, GatedStore, ReminderStore, SqliteReminderStore};
