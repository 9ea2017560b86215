//! One-shot reminder commands.
//!
//! These talk to the store directly. A running `deremind-cli run` host picks
//! the changes up on its next start.

use chrono::{DateTime, Duration, Local, Utc};
use clap::Subcommand;
use deremind_core::{NewReminder, Reminder, ReminderId, SqliteReminderStore};

#[derive(Subcommand)]
pub enum ReminderAction {
    /// Create a new reminder
    Add {
        /// Reminder title
        title: String,
        /// Due in this many minutes from now
        #[arg(long = "in", value_name = "MINUTES", conflicts_with = "at", required_unless_present = "at")]
        in_minutes: Option<i64>,
        /// Due at an RFC 3339 timestamp (e.g. 2026-05-04T09:00:00+02:00)
        #[arg(long)]
        at: Option<String>,
        /// Reminder description
        #[arg(long, default_value = "")]
        description: String,
        /// Repeat every this many minutes
        #[arg(long, value_name = "MINUTES")]
        every: Option<i64>,
    },
    /// List reminders
    List {
        /// Include completed reminders
        #[arg(long)]
        all: bool,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Get reminder details
    Get {
        /// Reminder ID
        id: ReminderId,
    },
    /// Mark a reminder completed
    Complete {
        /// Reminder ID
        id: ReminderId,
    },
    /// Delete a reminder
    Delete {
        /// Reminder ID
        id: ReminderId,
    },
}

pub fn run(action: ReminderAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ReminderAction::Add {
            title,
            in_minutes,
            at,
            description,
            every,
        } => {
            let due_at = resolve_due(in_minutes, at.as_deref(), Utc::now())?;
            let draft = match every {
                Some(minutes) => NewReminder::repeating(title, due_at, minutes_arg("--every", minutes)?),
                None => NewReminder::once(title, due_at),
            }
            .with_description(description);
            draft.validate()?;

            let store = SqliteReminderStore::open()?;
            let id = store.insert_reminder(&draft)?;
            let reminder = draft.into_reminder(id);
            println!("Reminder created: {id}");
            println!("{}", serde_json::to_string_pretty(&reminder)?);
        }
        ReminderAction::List { all, json } => {
            let store = SqliteReminderStore::open()?;
            let reminders = if all {
                store.list_reminders()?
            } else {
                store.pending_reminders()?
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&reminders)?);
            } else {
                for reminder in &reminders {
                    println!("{}", format_row(reminder));
                }
            }
        }
        ReminderAction::Get { id } => {
            let store = SqliteReminderStore::open()?;
            match store.get_reminder(id)? {
                Some(reminder) => println!("{}", serde_json::to_string_pretty(&reminder)?),
                None => println!("Reminder not found: {id}"),
            }
        }
        ReminderAction::Complete { id } => {
            let store = SqliteReminderStore::open()?;
            match store.get_reminder(id)? {
                Some(mut reminder) => {
                    reminder.is_completed = true;
                    store.update_reminders(std::slice::from_ref(&reminder))?;
                    println!("Reminder completed: {id}");
                }
                None => println!("Reminder not found: {id}"),
            }
        }
        ReminderAction::Delete { id } => {
            let store = SqliteReminderStore::open()?;
            if store.delete_reminders(&[id])? > 0 {
                println!("Reminder deleted: {id}");
            } else {
                println!("Reminder not found: {id}");
            }
        }
    }
    Ok(())
}

fn minutes_arg(flag: &str, minutes: i64) -> Result<Duration, String> {
    Duration::try_minutes(minutes).ok_or_else(|| format!("{flag} {minutes} is out of range"))
}

fn resolve_due(
    in_minutes: Option<i64>,
    at: Option<&str>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, String> {
    match (in_minutes, at) {
        (Some(minutes), _) => now
            .checked_add_signed(minutes_arg("--in", minutes)?)
            .ok_or_else(|| format!("--in {minutes} is out of range")),
        (None, Some(at)) => DateTime::parse_from_rfc3339(at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| format!("invalid --at timestamp '{at}': {e}")),
        (None, None) => Err("either --in or --at is required".to_string()),
    }
}

fn format_row(reminder: &Reminder) -> String {
    let due = reminder.due_at.with_timezone(&Local).format("%Y-%m-%d %H:%M");
    let status = if reminder.is_completed { "done" } else { "open" };
    let repeat = if reminder.is_repeating {
        format!("every {}m", reminder.repeat_interval.num_minutes())
    } else {
        "once".to_string()
    };
    format!("{:>5}  {due}  {status:<4}  {repeat:<10}  {}", reminder.id, reminder.title)
}
