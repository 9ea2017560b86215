//! Timer scheduling.
//!
//! A single deadline-ordered queue holds at most one entry per reminder, and a
//! single tokio task sleeps until the earliest entry.

mod queue;
mod timer;

pub use queue::{DueEntry, TimerQueue};
pub use timer::{FireCallback, TimerScheduler};
