use std::time::Duration;

use chrono::{DateTime, Utc};
use scriptler_core::ScriptIdentity;
use serde::{Deserialize, Serialize};

/// Unit for [`RecurrenceSpec::IntervalEvery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Minutes,
    Hours,
}

impl IntervalUnit {
    pub fn seconds(&self) -> u64 {
        match self {
            IntervalUnit::Minutes => 60,
            IntervalUnit::Hours => 3_600,
        }
    }
}

/// How often a script should run, as chosen by the user.
///
/// Calendar variants are interpreted in the time zone of the `now` passed to
/// [`crate::recurrence::compute`]. Signed integers are used for the counts so
/// that non-positive input is rejected with a message instead of wrapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecurrenceSpec {
    /// Run once at a calendar instant (month is 1-based, seconds are zeroed).
    OneTimeAt {
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
    },

    /// Run now-ish, then repeat every `amount` units.
    IntervalEvery { amount: i64, unit: IntervalUnit },

    /// Run every day at HH:MM.
    DailyAt { hour: u32, minute: u32 },

    /// Run every other day at HH:MM.
    AlternateDaysAt { hour: u32, minute: u32 },

    /// Run every `n` days at HH:MM.
    EveryNDaysAt { n: i64, hour: u32, minute: u32 },
}

/// Timing handed to the job scheduler for one entry.
///
/// Derived once from a [`RecurrenceSpec`] and never mutated; a schedule change
/// is cancel-then-enqueue with a fresh trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub initial_delay: Duration,
    pub repeat_period: Option<Duration>,
}

impl Trigger {
    pub fn once(initial_delay: Duration) -> Self {
        Self {
            initial_delay,
            repeat_period: None,
        }
    }

    pub fn periodic(initial_delay: Duration, period: Duration) -> Self {
        Self {
            initial_delay,
            repeat_period: Some(period),
        }
    }

    pub fn is_periodic(&self) -> bool {
        self.repeat_period.is_some()
    }
}

/// Lifecycle state of a schedule entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// Waiting for its next_run time.
    Enqueued,
    /// Fired; the occurrence has not reported back yet.
    Running,
    /// One-time entry whose single occurrence succeeded.
    Succeeded,
    /// One-time entry whose single occurrence failed.
    Failed,
    /// Removed by a pause or a reschedule.
    Canceled,
}

impl EntryState {
    /// Enqueued and running entries still count as "the" schedule of a script.
    pub fn is_active(&self) -> bool {
        matches!(self, EntryState::Enqueued | EntryState::Running)
    }
}

impl std::fmt::Display for EntryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntryState::Enqueued => "enqueued",
            EntryState::Running => "running",
            EntryState::Succeeded => "succeeded",
            EntryState::Failed => "failed",
            EntryState::Canceled => "canceled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for EntryState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "enqueued" => Ok(EntryState::Enqueued),
            "running" => Ok(EntryState::Running),
            "succeeded" => Ok(EntryState::Succeeded),
            "failed" => Ok(EntryState::Failed),
            "canceled" => Ok(EntryState::Canceled),
            other => Err(format!("unknown entry state: {other}")),
        }
    }
}

/// A persisted schedule entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// UUID v4 string, primary key.
    pub id: String,
    pub identity: ScriptIdentity,
    /// Repeat period in seconds; `None` for one-time entries.
    pub period_secs: Option<u64>,
    pub status: EntryState,
    /// RFC 3339 timestamp of the next planned fire, if any.
    pub next_run: Option<String>,
    /// RFC 3339 timestamp of the most recent fire, if any.
    pub last_run: Option<String>,
    pub run_count: u32,
    pub created_at: String,
    pub updated_at: String,
}

/// One firing of a schedule entry, handed to whoever executes scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub entry_id: String,
    pub identity: ScriptIdentity,
    /// 1-based count of this firing.
    pub run: u32,
    pub periodic: bool,
}

/// What a script's schedule currently looks like, for status display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleStatus {
    pub identity: ScriptIdentity,
    /// `None` when the script was never scheduled.
    pub state: Option<EntryState>,
    pub next_run: Option<DateTime<Utc>>,
    /// Repeat period of the current entry; `None` for one-time or unscheduled.
    pub period_secs: Option<u64>,
    pub run_count: u32,
}

impl ScheduleStatus {
    pub fn is_scheduled(&self) -> bool {
        self.state.is_some_and(|s| s.is_active())
    }
}
