//! Turning `schedule` flags into a [`RecurrenceSpec`].

use anyhow::{bail, Context};
use chrono::{Datelike, NaiveDateTime, NaiveTime, Timelike};
use clap::Args;
use scriptler_scheduler::{IntervalUnit, RecurrenceSpec};

/// Interval used by `--periodic` when no explicit `--every` is given.
pub const DEFAULT_INTERVAL_MINUTES: i64 = 15;

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
pub struct When {
    /// Run once at a local date and time ("YYYY-MM-DD HH:MM").
    #[arg(long, value_name = "DATETIME")]
    pub at: Option<String>,

    /// Repeat every N units (see --unit).
    #[arg(long, value_name = "N")]
    pub every: Option<i64>,

    /// Repeat every 15 minutes.
    #[arg(long)]
    pub periodic: bool,

    /// Every day at HH:MM.
    #[arg(long, value_name = "HH:MM")]
    pub daily: Option<String>,

    /// Every other day at HH:MM.
    #[arg(long, value_name = "HH:MM")]
    pub alternate: Option<String>,

    /// Every N days; needs --time.
    #[arg(long, value_name = "N", requires = "time")]
    pub every_days: Option<i64>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum UnitArg {
    Minutes,
    Hours,
}

impl From<UnitArg> for IntervalUnit {
    fn from(unit: UnitArg) -> Self {
        match unit {
            UnitArg::Minutes => IntervalUnit::Minutes,
            UnitArg::Hours => IntervalUnit::Hours,
        }
    }
}

pub fn to_spec(when: &When, unit: UnitArg, time: Option<&str>) -> anyhow::Result<RecurrenceSpec> {
    if let Some(at) = &when.at {
        let dt = NaiveDateTime::parse_from_str(at.trim(), "%Y-%m-%d %H:%M")
            .with_context(|| format!("expected \"YYYY-MM-DD HH:MM\", got {at:?}"))?;
        return Ok(RecurrenceSpec::OneTimeAt {
            year: dt.year(),
            month: dt.month(),
            day: dt.day(),
            hour: dt.hour(),
            minute: dt.minute(),
        });
    }
    if let Some(amount) = when.every {
        return Ok(RecurrenceSpec::IntervalEvery {
            amount,
            unit: unit.into(),
        });
    }
    if when.periodic {
        return Ok(RecurrenceSpec::IntervalEvery {
            amount: DEFAULT_INTERVAL_MINUTES,
            unit: IntervalUnit::Minutes,
        });
    }
    if let Some(t) = &when.daily {
        let (hour, minute) = parse_hhmm(t)?;
        return Ok(RecurrenceSpec::DailyAt { hour, minute });
    }
    if let Some(t) = &when.alternate {
        let (hour, minute) = parse_hhmm(t)?;
        return Ok(RecurrenceSpec::AlternateDaysAt { hour, minute });
    }
    if let Some(n) = when.every_days {
        let Some(t) = time else {
            bail!("--every-days needs --time HH:MM");
        };
        let (hour, minute) = parse_hhmm(t)?;
        return Ok(RecurrenceSpec::EveryNDaysAt { n, hour, minute });
    }
    bail!("no schedule given")
}

fn parse_hhmm(s: &str) -> anyhow::Result<(u32, u32)> {
    let t = NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .with_context(|| format!("expected HH:MM, got {s:?}"))?;
    Ok((t.hour(), t.minute()))
}
