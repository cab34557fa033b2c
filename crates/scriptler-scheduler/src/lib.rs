//! `scriptler-scheduler`: recurrence computation and a SQLite-backed job scheduler.
//!
//! # Overview
//!
//! [`recurrence::compute`] turns a [`RecurrenceSpec`] chosen by the user into a
//! [`Trigger`] (initial delay + optional repeat period) anchored to "now".
//! [`planner::schedule`] applies it to any [`JobScheduler`] using
//! cancel-then-reschedule, so at most one entry is active per script.
//!
//! [`engine::SchedulerEngine`] is the local scheduler: entries are persisted to
//! a `schedule_entries` table, polled every tick, and fired as [`Occurrence`]s
//! over an mpsc channel. The consumer reports back with
//! [`SchedulerHandle::complete`].
//!
//! # Recurrence variants
//!
//! | Variant           | Initial delay                     | Repeat period |
//! |-------------------|-----------------------------------|---------------|
//! | `OneTimeAt`       | until that local instant (future) | none          |
//! | `IntervalEvery`   | zero                              | amount × unit |
//! | `DailyAt`         | until next HH:MM                  | 1 day         |
//! | `AlternateDaysAt` | until next HH:MM                  | 2 days        |
//! | `EveryNDaysAt`    | until next HH:MM                  | n days        |

pub mod db;
pub mod engine;
pub mod error;
pub mod planner;
pub mod recurrence;
pub mod types;

pub use engine::{SchedulerEngine, SchedulerHandle};
pub use error::{Result, SchedulerError};
pub use planner::JobScheduler;
pub use types::{
    EntryState, IntervalUnit, Occurrence, RecurrenceSpec, ScheduleEntry, ScheduleStatus, Trigger,
};
