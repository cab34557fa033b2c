//! Applying recurrence specs to a job scheduler.
//!
//! A schedule change is always cancel-then-enqueue under the script's
//! identity, so at most one entry per script is active at a time.

use chrono::{DateTime, TimeZone};
use scriptler_core::ScriptIdentity;
use tracing::info;

use crate::engine::SchedulerHandle;
use crate::error::Result;
use crate::recurrence;
use crate::types::{EntryState, RecurrenceSpec, ScheduleStatus, Trigger};

/// The job-queue capability scripts are scheduled on.
///
/// `enqueue` treats the trigger as periodic exactly when it carries a repeat
/// period. `cancel` must be idempotent.
pub trait JobScheduler: Send + Sync {
    fn enqueue(&self, identity: &ScriptIdentity, trigger: &Trigger) -> Result<()>;
    fn cancel(&self, identity: &ScriptIdentity) -> Result<()>;
    /// `None` when the scheduler has never seen `identity`.
    fn query_state(&self, identity: &ScriptIdentity) -> Result<Option<EntryState>>;
}

/// Compute the trigger for `spec` at `now` and replace whatever schedule
/// `identity` had. Invalid specs are rejected before the scheduler is touched.
pub fn schedule<S, Tz>(
    scheduler: &S,
    identity: &ScriptIdentity,
    spec: &RecurrenceSpec,
    now: &DateTime<Tz>,
) -> Result<Trigger>
where
    S: JobScheduler + ?Sized,
    Tz: TimeZone,
{
    let trigger = recurrence::compute(spec, now)?;
    scheduler.cancel(identity)?;
    scheduler.enqueue(identity, &trigger)?;
    info!(
        %identity,
        initial_delay_secs = trigger.initial_delay.as_secs(),
        period_secs = ?trigger.repeat_period.map(|p| p.as_secs()),
        "script scheduled"
    );
    Ok(trigger)
}

/// Stop future occurrences of `identity`. Safe to call with nothing scheduled.
pub fn pause<S: JobScheduler + ?Sized>(scheduler: &S, identity: &ScriptIdentity) -> Result<()> {
    scheduler.cancel(identity)?;
    info!(%identity, "schedule paused");
    Ok(())
}

/// State and next fire time of `identity` on the local scheduler.
pub fn status(handle: &SchedulerHandle, identity: &ScriptIdentity) -> Result<ScheduleStatus> {
    let entry = handle.current_entry(identity)?;
    Ok(ScheduleStatus {
        identity: identity.clone(),
        state: entry.as_ref().map(|e| e.status),
        next_run: handle.next_run(identity)?,
        period_secs: entry.as_ref().and_then(|e| e.period_secs),
        run_count: entry.map(|e| e.run_count).unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchedulerError;
    use crate::types::IntervalUnit;
    use chrono::Utc;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<String>>,
    }

    impl JobScheduler for Recording {
        fn enqueue(&self, identity: &ScriptIdentity, trigger: &Trigger) -> Result<()> {
            self.calls.lock().unwrap().push(format!(
                "enqueue {identity} periodic={}",
                trigger.is_periodic()
            ));
            Ok(())
        }

        fn cancel(&self, identity: &ScriptIdentity) -> Result<()> {
            self.calls.lock().unwrap().push(format!("cancel {identity}"));
            Ok(())
        }

        fn query_state(&self, _identity: &ScriptIdentity) -> Result<Option<EntryState>> {
            Ok(None)
        }
    }

    #[test]
    fn reschedule_cancels_before_enqueue() {
        let scheduler = Recording::default();
        let id = ScriptIdentity::from("/s/a/a.py");
        let spec = RecurrenceSpec::IntervalEvery {
            amount: 15,
            unit: IntervalUnit::Minutes,
        };
        schedule(&scheduler, &id, &spec, &Utc::now()).unwrap();

        let calls = scheduler.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                "cancel /s/a/a.py".to_string(),
                "enqueue /s/a/a.py periodic=true".to_string()
            ]
        );
    }

    #[test]
    fn past_one_time_never_reaches_the_scheduler() {
        let scheduler = Recording::default();
        let id = ScriptIdentity::from("/s/a/a.py");
        let spec = RecurrenceSpec::OneTimeAt {
            year: 2001,
            month: 1,
            day: 1,
            hour: 0,
            minute: 0,
        };
        let err = schedule(&scheduler, &id, &spec, &Utc::now()).unwrap_err();

        assert!(matches!(err, SchedulerError::InvalidSchedule(_)));
        assert!(scheduler.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn status_reflects_schedule_and_pause() {
        let handle = SchedulerHandle::new(rusqlite::Connection::open_in_memory().unwrap()).unwrap();
        let id = ScriptIdentity::from("/s/a/a.py");
        assert_eq!(status(&handle, &id).unwrap().state, None);

        let spec = RecurrenceSpec::DailyAt { hour: 7, minute: 30 };
        schedule(&handle, &id, &spec, &Utc::now()).unwrap();
        let st = status(&handle, &id).unwrap();
        assert!(st.is_scheduled());
        assert_eq!(st.period_secs, Some(86_400));
        assert!(st.next_run.is_some());

        pause(&handle, &id).unwrap();
        let st = status(&handle, &id).unwrap();
        assert_eq!(st.state, Some(EntryState::Canceled));
        assert_eq!(st.next_run, None);
        assert!(!st.is_scheduled());
    }

    #[test]
    fn rescheduling_leaves_one_active_entry() {
        let handle = SchedulerHandle::new(rusqlite::Connection::open_in_memory().unwrap()).unwrap();
        let id = ScriptIdentity::from("/s/a/a.py");
        for minutes in [5, 10, 20] {
            let spec = RecurrenceSpec::IntervalEvery {
                amount: minutes,
                unit: IntervalUnit::Minutes,
            };
            schedule(&handle, &id, &spec, &Utc::now()).unwrap();
        }
        let active: Vec<_> = handle
            .list_entries()
            .unwrap()
            .into_iter()
            .filter(|e| e.status.is_active())
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].period_secs, Some(20 * 60));
    }

    #[test]
    fn pause_only_cancels() {
        let scheduler = Recording::default();
        let id = ScriptIdentity::from("/s/a/a.py");
        pause(&scheduler, &id).unwrap();
        pause(&scheduler, &id).unwrap();
        assert_eq!(scheduler.calls.lock().unwrap().len(), 2);
    }
}
