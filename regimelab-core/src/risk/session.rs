//! Trading-session and blackout windows, evaluated in the exchange timezone.
//!
//! Windows are written as `"HH:MM-HH:MM"` in local exchange time. A window
//! whose end is before its start wraps past midnight (e.g. an overnight
//! futures session `18:00-17:00`). Start is inclusive, end exclusive, and a
//! window with equal start and end is empty.

use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A daily minute-of-day window in local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeWindow {
    pub start_minute: u32,
    pub end_minute: u32,
}

impl TimeWindow {
    pub fn contains(&self, minute_of_day: u32) -> bool {
        let (start, end) = (self.start_minute, self.end_minute);
        if start == end {
            return false;
        }
        if start < end {
            return start <= minute_of_day && minute_of_day < end;
        }
        minute_of_day >= start || minute_of_day < end
    }
}

fn parse_hhmm(raw: &str) -> Result<u32, String> {
    let (h, m) = raw
        .trim()
        .split_once(':')
        .ok_or_else(|| format!("expected HH:MM, got '{raw}'"))?;
    let h: u32 = h.parse().map_err(|_| format!("bad hour in '{raw}'"))?;
    let m: u32 = m.parse().map_err(|_| format!("bad minute in '{raw}'"))?;
    if h > 23 || m > 59 {
        return Err(format!("time out of range: '{raw}'"));
    }
    Ok(h * 60 + m)
}

impl FromStr for TimeWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| format!("expected HH:MM-HH:MM, got '{s}'"))?;
        Ok(Self {
            start_minute: parse_hhmm(start)?,
            end_minute: parse_hhmm(end)?,
        })
    }
}

impl TryFrom<String> for TimeWindow {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeWindow> for String {
    fn from(w: TimeWindow) -> Self {
        w.to_string()
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}-{:02}:{:02}",
            self.start_minute / 60,
            self.start_minute % 60,
            self.end_minute / 60,
            self.end_minute % 60
        )
    }
}

/// A blackout applied on the listed weekdays (0 = Monday … 6 = Sunday).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blackout {
    pub window: TimeWindow,
    #[serde(default = "weekdays_mon_fri")]
    pub weekdays: Vec<u32>,
}

fn weekdays_mon_fri() -> Vec<u32> {
    vec![0, 1, 2, 3, 4]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// When false the session check always passes; blackouts still apply.
    pub enabled: bool,
    pub timezone: Tz,
    pub session: TimeWindow,
    /// Days the session is open (0 = Monday … 6 = Sunday).
    pub weekdays: Vec<u32>,
    pub blackouts: Vec<Blackout>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timezone: chrono_tz::America::New_York,
            session: TimeWindow {
                start_minute: 9 * 60 + 30,
                end_minute: 16 * 60,
            },
            weekdays: weekdays_mon_fri(),
            blackouts: Vec::new(),
        }
    }
}

/// Why the session check failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SessionBlock {
    ClosedDay { weekday: u32 },
    OutsideHours { window: TimeWindow },
    Blackout { window: TimeWindow },
}

impl fmt::Display for SessionBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionBlock::ClosedDay { weekday } => write!(f, "session closed on weekday {weekday}"),
            SessionBlock::OutsideHours { window } => write!(f, "outside session {window}"),
            SessionBlock::Blackout { window } => write!(f, "blackout {window} active"),
        }
    }
}

impl SessionConfig {
    pub fn check(&self, now: DateTime<Utc>) -> Result<(), SessionBlock> {
        let local = now.with_timezone(&self.timezone);
        let weekday = local.weekday().num_days_from_monday();
        let minute = local.hour() * 60 + local.minute();

        if self.enabled {
            if !self.weekdays.contains(&weekday) {
                return Err(SessionBlock::ClosedDay { weekday });
            }
            if !self.session.contains(minute) {
                return Err(SessionBlock::OutsideHours {
                    window: self.session,
                });
            }
        }

        for blackout in &self.blackouts {
            if blackout.weekdays.contains(&weekday) && blackout.window.contains(minute) {
                return Err(SessionBlock::Blackout {
                    window: blackout.window,
                });
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), String> {
        let all_days = self.weekdays.iter().chain(self.blackouts.iter().flat_map(|b| &b.weekdays));
        for d in all_days {
            if *d > 6 {
                return Err(format!("weekday {d} out of range 0..=6"));
            }
        }
        if self.enabled && self.weekdays.is_empty() {
            return Err("session enabled with no trading weekdays".into());
        }
        Ok(())
    }
}
