//! Business-hour windows.

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use tracing::warn;

use crate::errors::{Result, RuleError};

/// A daily window on selected weekdays, in a named timezone.
///
/// `start > end` means the window wraps midnight; the part after midnight
/// belongs to the day the window opened on. `start == end` is open all day.
#[derive(Clone, Debug, PartialEq)]
pub struct BusinessHours {
    start: NaiveTime,
    end: NaiveTime,
    days: Vec<Weekday>,
    tz: Tz,
}

impl BusinessHours {
    /// Parse `"HH:MM"` bounds, weekday names (`mon`, `Monday`, ...) and an
    /// IANA timezone. An empty or unknown timezone falls back to `default_tz`.
    pub fn parse(
        start: &str,
        end: &str,
        working_days: &[String],
        timezone: Option<&str>,
        default_tz: Tz,
    ) -> Result<Self> {
        let start = parse_time(start)?;
        let end = parse_time(end)?;
        let days = working_days
            .iter()
            .map(|d| {
                d.trim()
                    .parse::<Weekday>()
                    .map_err(|_| RuleError::BusinessHours(format!("unknown weekday {d:?}")))
            })
            .collect::<Result<Vec<_>>>()?;
        let tz = match timezone.map(str::trim).filter(|s| !s.is_empty()) {
            None => default_tz,
            Some(name) => name.parse::<Tz>().unwrap_or_else(|_| {
                warn!(timezone = name, fallback = %default_tz, "unknown timezone, using default");
                default_tz
            }),
        };
        Ok(Self {
            start,
            end,
            days,
            tz,
        })
    }

    /// Timezone the window is evaluated in.
    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Whether `now` falls inside the window.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.tz);
        let time = local.time();
        let today = local.weekday();

        let opened_on = if self.start == self.end {
            Some(today)
        } else if self.start < self.end {
            (self.start <= time && time < self.end).then_some(today)
        } else if time >= self.start {
            Some(today)
        } else if time < self.end {
            Some(today.pred())
        } else {
            None
        };

        opened_on.is_some_and(|day| self.days.is_empty() || self.days.contains(&day))
    }
}

fn parse_time(s: &str) -> Result<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| RuleError::BusinessHours(format!("invalid time {s:?}, expected HH:MM")))
}
