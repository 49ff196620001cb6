/*!
 # Schedule status

 A point-in-time view of where a schedule stands: the current state, whether
 the latest transition's trigger region is still open, and when the next
 "on" and "off" transitions are due.
*/

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::schedule::CompiledSchedule;

/// Snapshot of a schedule at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleStatus {
    /// State implied by the latest past event (off before the first one)
    pub on: bool,
    /// Whether the latest past event's trigger region is still open
    pub in_region: bool,
    /// Timestamp of the latest past event
    pub region_start: Option<i64>,
    /// Timestamp of the next "on" event
    pub next_on: Option<i64>,
    /// Timestamp of the next "off" event
    pub next_off: Option<i64>,
}

impl CompiledSchedule {
    /// Status of this schedule at `now`, with trigger regions `region_length` long
    pub fn status_at(&self, now: DateTime<Utc>, region_length: Duration) -> ScheduleStatus {
        let now_ms = now.timestamp_millis();
        let region_ms = i64::try_from(region_length.as_millis()).unwrap_or(i64::MAX);

        let latest = self.last_before(now).map(|(_, event)| *event);
        let upcoming = self.events().iter().filter(|event| event.millis() >= now_ms);
        let mut next_on = None;
        let mut next_off = None;
        for event in upcoming {
            let slot = if event.state { &mut next_on } else { &mut next_off };
            slot.get_or_insert(event.timestamp);
        }

        ScheduleStatus {
            on: latest.is_some_and(|event| event.state),
            in_region: latest.is_some_and(|event| now_ms < event.millis().saturating_add(region_ms)),
            region_start: latest.map(|event| event.timestamp),
            next_on,
            next_off,
        }
    }
}

impl ScheduleStatus {
    /// Renders the status with timestamps in `tz`, relative to `now`
    pub fn display(&self, now: DateTime<Utc>, tz: Tz) -> StatusDisplay<'_> {
        StatusDisplay {
            status: self,
            now,
            tz,
        }
    }
}

/// Human-readable rendering of a [`ScheduleStatus`]
pub struct StatusDisplay<'a> {
    status: &'a ScheduleStatus,
    now: DateTime<Utc>,
    tz: Tz,
}

impl StatusDisplay<'_> {
    fn line(
        &self,
        f: &mut fmt::Formatter<'_>,
        label: &str,
        timestamp: Option<i64>,
        past: bool,
    ) -> fmt::Result {
        let Some(timestamp) = timestamp else {
            return writeln!(f, "{label:<11} none");
        };
        let now = self.now.timestamp();
        let delta = format_delta(timestamp.abs_diff(now));
        match DateTime::from_timestamp(timestamp, 0) {
            Some(at) if past => writeln!(
                f,
                "{label:<11} {} ({delta} ago)",
                format_time(at, self.tz)
            ),
            Some(at) => writeln!(f, "{label:<11} {} (in {delta})", format_time(at, self.tz)),
            None => writeln!(f, "{label:<11} {timestamp} (out of range)"),
        }
    }
}

impl fmt::Display for StatusDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<11} {}", "Current:", format_time(self.now, self.tz))?;
        writeln!(
            f,
            "{:<11} {}",
            "State:",
            if self.status.on { "ON" } else { "OFF" }
        )?;
        writeln!(f, "{:<11} {}", "In region:", self.status.in_region)?;
        self.line(f, "Cur start:", self.status.region_start, true)?;
        self.line(f, "Next on:", self.status.next_on, false)?;
        self.line(f, "Next off:", self.status.next_off, false)
    }
}

/// Formats a duration in seconds as `DD:HH:MM:SS`
pub fn format_delta(seconds: u64) -> String {
    let minutes = seconds / 60;
    let hours = minutes / 60;
    let days = hours / 24;
    format!(
        "{:02}:{:02}:{:02}:{:02}",
        days,
        hours % 24,
        minutes % 60,
        seconds % 60
    )
}

/// Formats an instant as `YYYY-MM-DD HH:MM:SS` in `tz`
pub fn format_time(at: DateTime<Utc>, tz: Tz) -> String {
    at.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S %Z").to_string()
}
