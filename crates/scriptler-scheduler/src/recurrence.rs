use std::time::Duration;

use chrono::{DateTime, Days, NaiveDate, TimeDelta, TimeZone};
use tracing::debug;

use crate::error::{Result, SchedulerError};
use crate::types::{RecurrenceSpec, Trigger};

/// Smallest repeat period the scheduler will accept.
pub const MIN_INTERVAL: Duration = Duration::from_secs(60);

/// Largest repeat period the scheduler will accept (100 years).
pub const MAX_INTERVAL: Duration = Duration::from_secs(36_500 * SECS_PER_DAY);

const SECS_PER_DAY: u64 = 86_400;

/// Compute the [`Trigger`] for `spec` relative to `now`.
///
/// Pure: no clock reads, no I/O. Calendar variants are resolved in `now`'s
/// time zone. A target that equals `now` counts as already past.
pub fn compute<Tz: TimeZone>(spec: &RecurrenceSpec, now: &DateTime<Tz>) -> Result<Trigger> {
    let trigger = match *spec {
        RecurrenceSpec::OneTimeAt {
            year,
            month,
            day,
            hour,
            minute,
        } => {
            check_time_of_day(hour, minute)?;
            let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
                invalid(format!("no such date: {year:04}-{month:02}-{day:02}"))
            })?;
            let target = local_instant(&now.timezone(), date, hour, minute)
                .ok_or_else(|| invalid("time does not exist in the local time zone"))?;
            if target <= *now {
                return Err(invalid("time in the past"));
            }
            Trigger::once(delay_until(&target, now)?)
        }

        RecurrenceSpec::IntervalEvery { amount, unit } => {
            if amount <= 0 {
                return Err(invalid("amount must be positive"));
            }
            let secs = (amount as u64)
                .checked_mul(unit.seconds())
                .ok_or_else(|| invalid("interval too large"))?;
            let period = Duration::from_secs(secs).max(MIN_INTERVAL);
            Trigger::periodic(Duration::ZERO, bounded(period)?)
        }

        RecurrenceSpec::DailyAt { hour, minute } => days_at(1, hour, minute, now)?,

        RecurrenceSpec::AlternateDaysAt { hour, minute } => days_at(2, hour, minute, now)?,

        RecurrenceSpec::EveryNDaysAt { n, hour, minute } => {
            if n <= 0 {
                return Err(invalid("n must be positive"));
            }
            days_at(n as u64, hour, minute, now)?
        }
    };

    debug!(?spec, ?trigger, "trigger computed");
    Ok(trigger)
}

/// Shared rule for the day-based variants: first run at the next HH:MM,
/// then every `days` days.
fn days_at<Tz: TimeZone>(days: u64, hour: u32, minute: u32, now: &DateTime<Tz>) -> Result<Trigger> {
    check_time_of_day(hour, minute)?;
    let target = next_time_of_day(now, hour, minute)?;
    let secs = days
        .checked_mul(SECS_PER_DAY)
        .ok_or_else(|| invalid("interval too large"))?;
    Ok(Trigger::periodic(
        delay_until(&target, now)?,
        bounded(Duration::from_secs(secs))?,
    ))
}

fn bounded(period: Duration) -> Result<Duration> {
    if period > MAX_INTERVAL {
        return Err(invalid("interval too large"));
    }
    Ok(period)
}

/// Today's HH:MM if it is strictly after `now`, otherwise the next day on which
/// HH:MM exists locally (a DST gap can skip one day).
fn next_time_of_day<Tz: TimeZone>(now: &DateTime<Tz>, hour: u32, minute: u32) -> Result<DateTime<Tz>> {
    let tz = now.timezone();
    let today = now.date_naive();
    for offset in 0..=2 {
        let Some(date) = today.checked_add_days(Days::new(offset)) else {
            break;
        };
        if let Some(candidate) = local_instant(&tz, date, hour, minute) {
            if candidate > *now {
                return Ok(candidate);
            }
        }
    }
    Err(invalid(format!(
        "no upcoming {hour:02}:{minute:02} in the local time zone"
    )))
}

/// `date` at HH:MM:00 in `tz`. Ambiguous local times resolve to the earlier one.
fn local_instant<Tz: TimeZone>(
    tz: &Tz,
    date: NaiveDate,
    hour: u32,
    minute: u32,
) -> Option<DateTime<Tz>> {
    let naive = date.and_hms_opt(hour, minute, 0)?;
    tz.from_local_datetime(&naive).earliest()
}

fn delay_until<Tz: TimeZone>(target: &DateTime<Tz>, now: &DateTime<Tz>) -> Result<Duration> {
    let delta: TimeDelta = target.clone().signed_duration_since(now.clone());
    delta
        .to_std()
        .map_err(|_| invalid("time in the past"))
}

fn check_time_of_day(hour: u32, minute: u32) -> Result<()> {
    if hour > 23 {
        return Err(invalid(format!("hour out of range: {hour}")));
    }
    if minute > 59 {
        return Err(invalid(format!("minute out of range: {minute}")));
    }
    Ok(())
}

fn invalid(reason: impl Into<String>) -> SchedulerError {
    SchedulerError::InvalidSchedule(reason.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IntervalUnit;
    use chrono::{FixedOffset, LocalResult, NaiveDateTime, Offset, Utc};

    /// UTC+1 in winter, UTC+2 in summer 2026. Clocks jump 02:00 -> 03:00 on
    /// March 29 and fall back 03:00 -> 02:00 on October 25.
    #[derive(Debug, Clone, Copy)]
    struct Gapland;

    fn utc_switch(month: u32, day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, month, day)
            .unwrap()
            .and_hms_opt(1, 0, 0)
            .unwrap()
    }

    fn gapland_offset(utc: &NaiveDateTime) -> FixedOffset {
        let summer = *utc >= utc_switch(3, 29) && *utc < utc_switch(10, 25);
        FixedOffset::east_opt(if summer { 7_200 } else { 3_600 }).unwrap()
    }

    impl TimeZone for Gapland {
        type Offset = FixedOffset;

        fn from_offset(_offset: &FixedOffset) -> Self {
            Gapland
        }

        fn offset_from_local_date(&self, local: &NaiveDate) -> LocalResult<FixedOffset> {
            self.offset_from_local_datetime(&local.and_hms_opt(0, 0, 0).unwrap())
        }

        fn offset_from_local_datetime(&self, local: &NaiveDateTime) -> LocalResult<FixedOffset> {
            // Earlier instant (larger offset) first.
            let valid: Vec<FixedOffset> = [7_200, 3_600]
                .into_iter()
                .map(|secs| FixedOffset::east_opt(secs).unwrap())
                .filter(|off| {
                    let utc = *local - TimeDelta::seconds(off.local_minus_utc() as i64);
                    gapland_offset(&utc).fix() == *off
                })
                .collect();
            match valid.as_slice() {
                [] => LocalResult::None,
                [one] => LocalResult::Single(*one),
                [earlier, later, ..] => LocalResult::Ambiguous(*earlier, *later),
            }
        }

        fn offset_from_utc_date(&self, utc: &NaiveDate) -> FixedOffset {
            gapland_offset(&utc.and_hms_opt(0, 0, 0).unwrap())
        }

        fn offset_from_utc_datetime(&self, utc: &NaiveDateTime) -> FixedOffset {
            gapland_offset(utc)
        }
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, h, m, s).unwrap()
    }

    fn target_of(trigger: &Trigger, now: DateTime<Utc>) -> DateTime<Utc> {
        now + TimeDelta::from_std(trigger.initial_delay).unwrap()
    }

    #[test]
    fn daily_before_time_targets_today() {
        let now = at(8, 15, 42);
        let trigger = compute(&RecurrenceSpec::DailyAt { hour: 9, minute: 30 }, &now).unwrap();
        assert_eq!(target_of(&trigger, now), at(9, 30, 0));
        assert_eq!(trigger.repeat_period, Some(Duration::from_secs(SECS_PER_DAY)));
    }

    #[test]
    fn daily_after_time_targets_tomorrow() {
        let now = at(18, 0, 0);
        let trigger = compute(&RecurrenceSpec::DailyAt { hour: 9, minute: 30 }, &now).unwrap();
        let expected = Utc.with_ymd_and_hms(2026, 3, 11, 9, 30, 0).unwrap();
        assert_eq!(target_of(&trigger, now), expected);
    }

    #[test]
    fn daily_exact_match_counts_as_past() {
        let now = at(9, 30, 0);
        let trigger = compute(&RecurrenceSpec::DailyAt { hour: 9, minute: 30 }, &now).unwrap();
        assert_eq!(trigger.initial_delay, Duration::from_secs(SECS_PER_DAY));
    }

    #[test]
    fn every_one_day_equals_daily() {
        for now in [at(0, 0, 0), at(9, 29, 59), at(9, 30, 0), at(23, 59, 59)] {
            let daily = compute(&RecurrenceSpec::DailyAt { hour: 9, minute: 30 }, &now).unwrap();
            let every = compute(
                &RecurrenceSpec::EveryNDaysAt {
                    n: 1,
                    hour: 9,
                    minute: 30,
                },
                &now,
            )
            .unwrap();
            assert_eq!(daily, every);
        }
    }

    #[test]
    fn alternate_days_repeat_every_two_days() {
        let now = at(12, 0, 0);
        let trigger =
            compute(&RecurrenceSpec::AlternateDaysAt { hour: 6, minute: 0 }, &now).unwrap();
        assert_eq!(trigger.repeat_period, Some(Duration::from_secs(2 * SECS_PER_DAY)));
        assert_eq!(trigger.initial_delay, Duration::from_secs(18 * 3_600));
    }

    #[test]
    fn every_n_days_rejects_non_positive_n() {
        let now = at(12, 0, 0);
        for n in [0, -3] {
            let err = compute(
                &RecurrenceSpec::EveryNDaysAt {
                    n,
                    hour: 6,
                    minute: 0,
                },
                &now,
            )
            .unwrap_err();
            assert!(err.to_string().contains("n must be positive"));
        }
    }

    #[test]
    fn one_time_in_future_has_no_period() {
        let now = at(12, 0, 0);
        let spec = RecurrenceSpec::OneTimeAt {
            year: 2026,
            month: 3,
            day: 10,
            hour: 12,
            minute: 5,
        };
        let trigger = compute(&spec, &now).unwrap();
        assert_eq!(trigger, Trigger::once(Duration::from_secs(300)));
    }

    #[test]
    fn one_time_in_past_is_rejected() {
        let now = at(12, 0, 0);
        for minute in [0, 1] {
            let spec = RecurrenceSpec::OneTimeAt {
                year: 2026,
                month: 3,
                day: 10,
                hour: if minute == 0 { 12 } else { 11 },
                minute,
            };
            let err = compute(&spec, &now).unwrap_err();
            assert!(err.to_string().contains("time in the past"), "{err}");
        }
    }

    #[test]
    fn one_time_rejects_impossible_dates() {
        let now = at(12, 0, 0);
        let spec = RecurrenceSpec::OneTimeAt {
            year: 2026,
            month: 2,
            day: 30,
            hour: 9,
            minute: 0,
        };
        assert!(matches!(
            compute(&spec, &now),
            Err(SchedulerError::InvalidSchedule(_))
        ));
    }

    #[test]
    fn one_time_uses_the_callers_time_zone() {
        let tz = FixedOffset::east_opt(2 * 3_600).unwrap();
        let now = tz.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let spec = RecurrenceSpec::OneTimeAt {
            year: 2026,
            month: 3,
            day: 10,
            hour: 13,
            minute: 0,
        };
        let trigger = compute(&spec, &now).unwrap();
        assert_eq!(trigger.initial_delay, Duration::from_secs(3_600));
    }

    #[test]
    fn interval_is_immediate_and_periodic() {
        let now = at(12, 0, 0);
        let trigger = compute(
            &RecurrenceSpec::IntervalEvery {
                amount: 2,
                unit: IntervalUnit::Hours,
            },
            &now,
        )
        .unwrap();
        assert_eq!(trigger, Trigger::periodic(Duration::ZERO, Duration::from_secs(7_200)));
    }

    #[test]
    fn interval_never_goes_below_minimum() {
        let now = at(12, 0, 0);
        let trigger = compute(
            &RecurrenceSpec::IntervalEvery {
                amount: 1,
                unit: IntervalUnit::Minutes,
            },
            &now,
        )
        .unwrap();
        assert_eq!(trigger.repeat_period, Some(MIN_INTERVAL));
    }

    #[test]
    fn interval_rejects_zero_amount() {
        let now = at(12, 0, 0);
        let err = compute(
            &RecurrenceSpec::IntervalEvery {
                amount: 0,
                unit: IntervalUnit::Minutes,
            },
            &now,
        )
        .unwrap_err();
        assert!(err.to_string().contains("amount must be positive"));
    }

    #[test]
    fn out_of_range_time_of_day_is_rejected() {
        let now = at(12, 0, 0);
        assert!(compute(&RecurrenceSpec::DailyAt { hour: 24, minute: 0 }, &now).is_err());
        assert!(compute(&RecurrenceSpec::DailyAt { hour: 7, minute: 60 }, &now).is_err());
    }

    #[test]
    fn huge_day_counts_are_rejected() {
        let now = at(12, 0, 0);
        let err = compute(
            &RecurrenceSpec::EveryNDaysAt {
                n: 100_000_000,
                hour: 9,
                minute: 0,
            },
            &now,
        )
        .unwrap_err();
        assert!(err.to_string().contains("interval too large"), "{err}");

        let err = compute(
            &RecurrenceSpec::IntervalEvery {
                amount: i64::MAX,
                unit: IntervalUnit::Minutes,
            },
            &now,
        )
        .unwrap_err();
        assert!(err.to_string().contains("interval too large"), "{err}");
    }

    #[test]
    fn daily_time_inside_dst_gap_moves_to_next_existing_day() {
        // 02:30 does not exist on March 29; the 28th's slot is already past.
        let now = Gapland.with_ymd_and_hms(2026, 3, 28, 12, 0, 0).unwrap();
        let trigger = compute(&RecurrenceSpec::DailyAt { hour: 2, minute: 30 }, &now).unwrap();
        let expected = Utc.with_ymd_and_hms(2026, 3, 30, 0, 30, 0).unwrap();
        assert_eq!(
            now.with_timezone(&Utc) + TimeDelta::from_std(trigger.initial_delay).unwrap(),
            expected
        );
    }

    #[test]
    fn ambiguous_local_time_resolves_to_earlier_instant() {
        // 02:30 happens twice on October 25; the first one is at 00:30 UTC.
        let now = Gapland.with_ymd_and_hms(2026, 10, 24, 12, 0, 0).unwrap();
        let trigger = compute(&RecurrenceSpec::DailyAt { hour: 2, minute: 30 }, &now).unwrap();
        let expected = Utc.with_ymd_and_hms(2026, 10, 25, 0, 30, 0).unwrap();
        assert_eq!(
            now.with_timezone(&Utc) + TimeDelta::from_std(trigger.initial_delay).unwrap(),
            expected
        );
    }

    #[test]
    fn one_time_inside_dst_gap_is_rejected() {
        let now = Gapland.with_ymd_and_hms(2026, 3, 28, 12, 0, 0).unwrap();
        let spec = RecurrenceSpec::OneTimeAt {
            year: 2026,
            month: 3,
            day: 29,
            hour: 2,
            minute: 30,
        };
        let err = compute(&spec, &now).unwrap_err();
        assert!(err.to_string().contains("does not exist"), "{err}");
    }
}
