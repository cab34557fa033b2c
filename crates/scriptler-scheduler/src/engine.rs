use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use rusqlite::{Connection, OptionalExtension};
use scriptler_core::ScriptIdentity;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    planner::JobScheduler,
    types::{EntryState, Occurrence, ScheduleEntry, Trigger},
};

const ENTRY_COLUMNS: &str = "id, identity, period_secs, status, next_run, last_run,
                             run_count, created_at, updated_at";

/// Shared handle onto the `schedule_entries` table.
///
/// Cheap to clone; the engine loop and the CLI / bridge hold clones of the same
/// handle so that completion reports and reschedules see one consistent store.
#[derive(Clone)]
pub struct SchedulerHandle {
    conn: Arc<Mutex<Connection>>,
}

impl SchedulerHandle {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// A poisoned lock only means another thread panicked mid-query; SQLite
    /// itself is still consistent, so keep going.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a new entry for `identity` that first fires after `trigger.initial_delay`.
    ///
    /// Does not cancel existing entries; use [`crate::planner::schedule`] for
    /// the one-entry-per-script discipline.
    pub fn enqueue_at(
        &self,
        identity: &ScriptIdentity,
        trigger: &Trigger,
        now: DateTime<Utc>,
    ) -> Result<ScheduleEntry> {
        let delay = TimeDelta::from_std(trigger.initial_delay)
            .map_err(|_| SchedulerError::InvalidSchedule("initial delay too large".to_string()))?;
        let now_str = fmt_ts(now);
        let next = fmt_ts(
            now.checked_add_signed(delay)
                .ok_or_else(|| SchedulerError::InvalidSchedule("initial delay too large".to_string()))?,
        );
        let period_secs = trigger.repeat_period.map(|p| p.as_secs());
        let period_sql = period_secs
            .map(i64::try_from)
            .transpose()
            .map_err(|_| SchedulerError::InvalidSchedule("interval too large".to_string()))?;
        let id = Uuid::new_v4().to_string();

        self.conn().execute(
            "INSERT INTO schedule_entries
             (id, identity, period_secs, status, next_run, last_run,
              run_count, created_at, updated_at)
             VALUES (?1,?2,?3,'enqueued',?4,NULL,0,?5,?5)",
            rusqlite::params![id, identity.as_str(), period_sql, next, now_str],
        )?;

        info!(entry_id = %id, %identity, next_run = %next, ?period_secs, "schedule entry enqueued");

        Ok(ScheduleEntry {
            id,
            identity: identity.clone(),
            period_secs,
            status: EntryState::Enqueued,
            next_run: Some(next),
            last_run: None,
            run_count: 0,
            created_at: now_str.clone(),
            updated_at: now_str,
        })
    }

    /// Cancel every active entry tagged with `identity`. Returns how many were
    /// canceled; zero is fine.
    pub fn cancel_identity(&self, identity: &ScriptIdentity) -> Result<usize> {
        let now = fmt_ts(Utc::now());
        let n = self.conn().execute(
            "UPDATE schedule_entries SET status = 'canceled', next_run = NULL, updated_at = ?1
             WHERE identity = ?2 AND status IN ('enqueued', 'running')",
            rusqlite::params![now, identity.as_str()],
        )?;
        if n > 0 {
            info!(%identity, count = n, "schedule entries canceled");
        }
        Ok(n)
    }

    /// Cancel every active entry regardless of script.
    pub fn cancel_all(&self) -> Result<usize> {
        let now = fmt_ts(Utc::now());
        let n = self.conn().execute(
            "UPDATE schedule_entries SET status = 'canceled', next_run = NULL, updated_at = ?1
             WHERE status IN ('enqueued', 'running')",
            [&now],
        )?;
        info!(count = n, "all schedule entries canceled");
        Ok(n)
    }

    /// The most relevant entry for `identity`: an active one if any, else the
    /// most recently updated.
    pub fn current_entry(&self, identity: &ScriptIdentity) -> Result<Option<ScheduleEntry>> {
        let conn = self.conn();
        let entry = conn
            .query_row(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM schedule_entries WHERE identity = ?1
                     ORDER BY CASE WHEN status IN ('enqueued', 'running') THEN 0 ELSE 1 END,
                              updated_at DESC
                     LIMIT 1"
                ),
                [identity.as_str()],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    /// When the active entry for `identity` fires next, if it is waiting.
    pub fn next_run(&self, identity: &ScriptIdentity) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .current_entry(identity)?
            .filter(|e| e.status == EntryState::Enqueued)
            .and_then(|e| e.next_run)
            .and_then(|s| parse_ts(&s)))
    }

    /// Return all known entries ordered by creation time.
    pub fn list_entries(&self) -> Result<Vec<ScheduleEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM schedule_entries ORDER BY created_at"
        ))?;
        let entries = stmt
            .query_map([], row_to_entry)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(entries)
    }

    /// Atomically move every due enqueued entry to `running` and return one
    /// [`Occurrence`] per entry. A running entry is never claimed twice.
    pub fn claim_due(&self, now: DateTime<Utc>) -> Result<Vec<Occurrence>> {
        let now_str = fmt_ts(now);
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        // Collect eagerly so `stmt` is dropped before the UPDATEs below.
        // Columns: id, identity, period_secs, run_count
        let due: Vec<(String, String, Option<i64>, u32)> = {
            let mut stmt = tx.prepare_cached(
                "SELECT id, identity, period_secs, run_count FROM schedule_entries
                 WHERE status = 'enqueued' AND next_run IS NOT NULL AND next_run <= ?1
                 ORDER BY next_run",
            )?;
            let rows: Vec<_> = stmt
                .query_map([&now_str], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, u32>(3)?,
                    ))
                })?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };

        let mut fired = Vec::with_capacity(due.len());
        for (id, identity, period_secs, run_count) in due {
            let run = run_count + 1;
            tx.execute(
                "UPDATE schedule_entries SET status = 'running', last_run = ?1,
                  run_count = ?2, updated_at = ?1
                 WHERE id = ?3",
                rusqlite::params![now_str, run, id],
            )?;
            fired.push(Occurrence {
                entry_id: id,
                identity: ScriptIdentity::from(identity),
                run,
                periodic: period_secs.is_some(),
            });
        }
        tx.commit()?;
        Ok(fired)
    }

    /// Record the outcome of a fired occurrence.
    ///
    /// Periodic entries go back to `enqueued` with `next_run` advanced by whole
    /// periods past `now`; one-time entries finish as succeeded/failed. If the
    /// entry was canceled while running, the report is dropped.
    pub fn complete(&self, entry_id: &str, success: bool, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn();
        let row: Option<(String, Option<i64>, Option<String>)> = conn
            .query_row(
                "SELECT status, period_secs, next_run FROM schedule_entries WHERE id = ?1",
                [entry_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let Some((status, period_secs, next_run)) = row else {
            return Err(SchedulerError::EntryNotFound {
                id: entry_id.to_string(),
            });
        };

        if status != EntryState::Running.to_string() {
            debug!(entry_id, %status, "completion for inactive entry ignored");
            return Ok(());
        }

        let now_str = fmt_ts(now);
        match period_secs {
            Some(period) => match next_slot(next_run.as_deref(), period, now) {
                Some(next) => {
                    let next = fmt_ts(next);
                    conn.execute(
                        "UPDATE schedule_entries SET status = 'enqueued', next_run = ?1, updated_at = ?2
                         WHERE id = ?3",
                        rusqlite::params![next, now_str, entry_id],
                    )?;
                    info!(entry_id, success, next_run = %next, "periodic occurrence finished");
                }
                None => {
                    warn!(entry_id, period_secs = period, "next run out of range, entry closed");
                    finish(&conn, entry_id, EntryState::Failed, &now_str)?;
                }
            },
            None => {
                let final_state = if success {
                    EntryState::Succeeded
                } else {
                    EntryState::Failed
                };
                finish(&conn, entry_id, final_state, &now_str)?;
                info!(entry_id, state = %final_state, "one-time occurrence finished");
            }
        }
        Ok(())
    }

    /// Settle entries a previous process left `running` without reporting back.
    ///
    /// Periodic entries return to `enqueued` at their next slot after `now`;
    /// one-time entries end `failed`. Returns how many entries were settled.
    pub fn recover_interrupted(&self, now: DateTime<Utc>) -> Result<usize> {
        let now_str = fmt_ts(now);
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        // Columns: id, period_secs, next_run
        let stale: Vec<(String, Option<i64>, Option<String>)> = {
            let mut stmt = tx.prepare(
                "SELECT id, period_secs, next_run FROM schedule_entries WHERE status = 'running'",
            )?;
            let rows: Vec<_> = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };

        for (id, period_secs, next_run) in &stale {
            match period_secs.and_then(|p| next_slot(next_run.as_deref(), p, now)) {
                Some(next) => {
                    let next = fmt_ts(next);
                    tx.execute(
                        "UPDATE schedule_entries SET status = 'enqueued', next_run = ?1, updated_at = ?2
                         WHERE id = ?3",
                        rusqlite::params![next, now_str, id],
                    )?;
                    info!(entry_id = %id, next_run = %next, "interrupted periodic entry re-enqueued");
                }
                None => {
                    finish(&tx, id, EntryState::Failed, &now_str)?;
                    info!(entry_id = %id, "interrupted entry marked failed");
                }
            }
        }
        tx.commit()?;
        Ok(stale.len())
    }

    /// Number of enqueued entries whose next_run is already behind `now`.
    pub fn overdue_count(&self, now: DateTime<Utc>) -> Result<usize> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM schedule_entries
             WHERE status = 'enqueued' AND next_run IS NOT NULL AND next_run < ?1",
            [fmt_ts(now)],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}

impl JobScheduler for SchedulerHandle {
    fn enqueue(&self, identity: &ScriptIdentity, trigger: &Trigger) -> Result<()> {
        self.enqueue_at(identity, trigger, Utc::now()).map(|_| ())
    }

    fn cancel(&self, identity: &ScriptIdentity) -> Result<()> {
        self.cancel_identity(identity).map(|_| ())
    }

    fn query_state(&self, identity: &ScriptIdentity) -> Result<Option<EntryState>> {
        Ok(self.current_entry(identity)?.map(|e| e.status))
    }
}

/// Polling loop that fires due entries at ±1 tick precision.
pub struct SchedulerEngine {
    handle: SchedulerHandle,
    fired_tx: mpsc::Sender<Occurrence>,
    tick: Duration,
}

impl SchedulerEngine {
    /// Fired occurrences are sent on `fired_tx`; the sender is non-blocking
    /// (`try_send`) so the tick loop is never stalled.
    pub fn new(handle: SchedulerHandle, fired_tx: mpsc::Sender<Occurrence>, tick: Duration) -> Self {
        Self {
            handle,
            fired_tx,
            tick,
        }
    }

    /// Main event loop. Polls every tick until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler engine started");
        self.startup(Utc::now());

        let mut interval = tokio::time::interval(self.tick);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick(Utc::now()) {
                        error!("scheduler tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Recover entries interrupted by the last shutdown and report overdue ones,
    /// which fire on the first tick.
    pub fn startup(&self, now: DateTime<Utc>) {
        match self.handle.recover_interrupted(now) {
            Ok(n) if n > 0 => warn!(count = n, "entries left running by a previous run recovered"),
            Err(e) => error!("running-on-startup recovery failed: {e}"),
            _ => {}
        }
        match self.handle.overdue_count(now) {
            Ok(n) if n > 0 => warn!(count = n, "overdue entries found on startup; firing now"),
            Err(e) => error!("overdue-on-startup query failed: {e}"),
            _ => {}
        }
    }

    /// Fire everything due at `now`. Returns how many occurrences were sent.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut sent = 0;
        for occurrence in self.handle.claim_due(now)? {
            info!(entry_id = %occurrence.entry_id, identity = %occurrence.identity,
                  run = occurrence.run, "firing occurrence");
            let entry_id = occurrence.entry_id.clone();
            if self.fired_tx.try_send(occurrence).is_err() {
                // Nobody will report back; close the occurrence as failed so a
                // periodic entry moves on to its next slot.
                warn!(%entry_id, "occurrence channel full or closed, occurrence dropped");
                self.handle.complete(&entry_id, false, now)?;
            } else {
                sent += 1;
            }
        }
        Ok(sent)
    }
}

/// `previous + k * period` for the smallest k ≥ 1 that lands after `now`, or
/// `None` when that instant is out of range.
fn advance(previous: DateTime<Utc>, period_secs: i64, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let period_secs = period_secs.max(1);
    let behind = (now - previous).num_seconds().max(0);
    let steps = behind / period_secs + 1;
    let delta = TimeDelta::try_seconds(steps.checked_mul(period_secs)?)?;
    previous.checked_add_signed(delta)
}

/// Next slot of a periodic entry whose last slot was `next_run`.
fn next_slot(next_run: Option<&str>, period_secs: i64, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let previous = next_run.and_then(parse_ts).unwrap_or(now);
    advance(previous, period_secs, now)
}

/// Close an entry for good.
fn finish(conn: &Connection, entry_id: &str, state: EntryState, now_str: &str) -> Result<()> {
    conn.execute(
        "UPDATE schedule_entries SET status = ?1, next_run = NULL, updated_at = ?2
         WHERE id = ?3",
        rusqlite::params![state.to_string(), now_str, entry_id],
    )?;
    Ok(())
}

/// Fixed-width UTC timestamps so that SQL string comparison orders correctly.
fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduleEntry> {
    let status_str: String = row.get(3)?;
    let status = status_str.parse::<EntryState>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(ScheduleEntry {
        id: row.get(0)?,
        identity: ScriptIdentity::from(row.get::<_, String>(1)?),
        period_secs: row
            .get::<_, Option<i64>>(2)?
            .map(u64::try_from)
            .transpose()
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Integer, e.into())
            })?,
        status,
        next_run: row.get(4)?,
        last_run: row.get(5)?,
        run_count: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}
