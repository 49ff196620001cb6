/*!
 # Schedule compilation

 This module expands a recurring weekly on/off timetable, bounded by a date
 window and a set of exception dates, into a concrete chronologically-walked
 list of transition events.

 All calendar arithmetic happens in the configured civil timezone, so day
 boundaries, weekdays and exception dates line up with local calendar days.
*/

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{
    DateTime, Datelike, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeDelta,
    TimeZone, Utc,
};
use chrono_tz::Tz;
use serde::Deserialize;
use tracing::{debug, instrument, trace};

use crate::{Error, Result};

/// Weekday names in timetable order (Sunday first)
pub const WEEK_DAYS: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// Timetable index of `date`'s weekday (0 = Sunday)
pub fn day_of_week(date: NaiveDate) -> usize {
    date.weekday().num_days_from_sunday() as usize
}

/// English name of `date`'s weekday
pub fn weekday_name(date: NaiveDate) -> &'static str {
    WEEK_DAYS[day_of_week(date)]
}

/// Offset from a day's midnight.
///
/// Hours are not limited to 23: `25:00` lands at 01:00 on the following
/// calendar day but still belongs to the day it was declared for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct TimeOfDay {
    minutes: u32,
}

impl TimeOfDay {
    /// Creates an offset from hours and minutes (minutes must be 0-59)
    pub fn new(hours: u32, minutes: u32) -> Result<Self> {
        let invalid = || Error::InvalidTimeOfDay(format!("{hours}:{minutes:02}"));
        if minutes > 59 {
            return Err(invalid());
        }
        let minutes = hours
            .checked_mul(60)
            .and_then(|total| total.checked_add(minutes))
            .ok_or_else(invalid)?;
        Ok(Self { minutes })
    }

    pub fn hours(&self) -> u32 {
        self.minutes / 60
    }

    pub fn minutes(&self) -> u32 {
        self.minutes % 60
    }

    /// Offset as a signed duration
    pub fn as_delta(&self) -> TimeDelta {
        TimeDelta::minutes(i64::from(self.minutes))
    }
}

impl FromStr for TimeOfDay {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidTimeOfDay(s.to_string());
        let (hours, minutes) = s.trim().split_once(':').ok_or_else(invalid)?;
        if minutes.len() != 2 {
            return Err(invalid());
        }
        let hours: u32 = hours.parse().map_err(|_| invalid())?;
        let minutes: u32 = minutes.parse().map_err(|_| invalid())?;
        if minutes > 59 {
            return Err(invalid());
        }
        Self::new(hours, minutes)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:02}", self.hours(), self.minutes())
    }
}

/// One list of offsets per weekday, Sunday first.
///
/// Offsets keep their declared order; they are not sorted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WeeklyTimetable {
    days: [Vec<TimeOfDay>; 7],
}

impl WeeklyTimetable {
    /// Builds a timetable from exactly seven day lists.
    ///
    /// `kind` names the timetable in the error message.
    pub fn from_days(kind: &'static str, days: Vec<Vec<TimeOfDay>>) -> Result<Self> {
        let len = days.len();
        let days: [Vec<TimeOfDay>; 7] = days
            .try_into()
            .map_err(|_| Error::InvalidTimetable { kind, len })?;
        Ok(Self { days })
    }

    /// Offsets for a weekday (0 = Sunday)
    pub fn day(&self, day_of_week: usize) -> &[TimeOfDay] {
        &self.days[day_of_week % 7]
    }
}

/// Inclusive range of civil dates in a fixed timezone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub timezone: Tz,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate, timezone: Tz) -> Result<Self> {
        if end < start {
            return Err(Error::InvalidWindow { start, end });
        }
        Ok(Self {
            start,
            end,
            timezone,
        })
    }

    /// Every civil date of the window, in increasing order
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start.iter_days().take_while(move |day| *day <= self.end)
    }

    /// Unix timestamp of `day`'s midnight plus `offset`, in this window's zone
    pub fn timestamp(&self, day: NaiveDate, offset: TimeOfDay) -> i64 {
        let local = day.and_time(NaiveTime::MIN) + offset.as_delta();
        resolve_local(&self.timezone, local)
    }
}

/// Resolves a wall-clock time in `tz` to a unix timestamp.
///
/// Repeated local times resolve to the earlier instant. Local times skipped
/// by a forward jump use the offset that was in force before the jump.
fn resolve_local(tz: &Tz, local: NaiveDateTime) -> i64 {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(time) => time.timestamp(),
        LocalResult::Ambiguous(earliest, _) => earliest.timestamp(),
        LocalResult::None => {
            let before = tz
                .offset_from_utc_datetime(&(local - TimeDelta::days(1)))
                .fix();
            let utc = local - TimeDelta::seconds(i64::from(before.local_minus_utc()));
            trace!("Local time {} does not exist, using offset {}", local, before);
            utc.and_utc().timestamp()
        }
    }
}

/// Calendar dates on which the schedule is fully suppressed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExceptionSet {
    dates: BTreeSet<NaiveDate>,
}

impl ExceptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, date: NaiveDate) {
        self.dates.insert(date);
    }

    /// Adds every date from `from` to `to`, inclusive
    pub fn insert_range(&mut self, from: NaiveDate, to: NaiveDate) {
        for day in from.iter_days().take_while(|day| *day <= to) {
            self.dates.insert(day);
        }
    }

    pub fn contains(&self, date: &NaiveDate) -> bool {
        self.dates.contains(date)
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

impl FromIterator<NaiveDate> for ExceptionSet {
    fn from_iter<I: IntoIterator<Item = NaiveDate>>(iter: I) -> Self {
        Self {
            dates: iter.into_iter().collect(),
        }
    }
}

/// A single scheduled transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScheduleEvent {
    /// Seconds since 1970-01-01 UTC
    pub timestamp: i64,
    /// `true` = on, `false` = off
    pub state: bool,
}

impl ScheduleEvent {
    pub fn new(timestamp: i64, state: bool) -> Self {
        Self { timestamp, state }
    }

    /// Timestamp in milliseconds, for comparison against clock readings
    pub fn millis(&self) -> i64 {
        self.timestamp.saturating_mul(1000)
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }
}

/// Ordered sequence of transition events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledSchedule {
    events: Vec<ScheduleEvent>,
}

impl CompiledSchedule {
    pub fn new(events: Vec<ScheduleEvent>) -> Self {
        Self { events }
    }

    pub fn events(&self) -> &[ScheduleEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Base epoch used for delta encoding: the first event's timestamp
    pub fn epoch(&self) -> Option<i64> {
        self.events.first().map(|event| event.timestamp)
    }

    /// Whether timestamps never decrease from one event to the next
    pub fn is_chronological(&self) -> bool {
        self.events
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp)
    }

    /// The last event strictly before `now`, with its index.
    ///
    /// Scanning stops at the first event that is not before `now`.
    pub fn last_before(&self, now: DateTime<Utc>) -> Option<(usize, &ScheduleEvent)> {
        let now = now.timestamp_millis();
        self.events
            .iter()
            .enumerate()
            .take_while(|(_, event)| event.millis() < now)
            .last()
    }

    /// State the actuators should be in at `now` (off before the first event)
    pub fn state_at(&self, now: DateTime<Utc>) -> bool {
        self.last_before(now).is_some_and(|(_, event)| event.state)
    }
}

/// Expands a weekly timetable over a date window.
///
/// Days in `exceptions` produce no events. For every other day, the on-offsets
/// of its weekday are emitted first, then the off-offsets, each list in
/// declared order.
#[instrument(skip_all, fields(start = %window.start, end = %window.end, tz = %window.timezone))]
pub fn compile(
    window: &DateWindow,
    timetable_on: &WeeklyTimetable,
    timetable_off: &WeeklyTimetable,
    exceptions: &ExceptionSet,
) -> CompiledSchedule {
    let mut events = Vec::new();
    let mut skipped = 0usize;

    for day in window.days() {
        if exceptions.contains(&day) {
            trace!("Skipping exception date {} ({})", day, weekday_name(day));
            skipped += 1;
            continue;
        }

        let weekday = day_of_week(day);
        for offset in timetable_on.day(weekday) {
            events.push(ScheduleEvent::new(window.timestamp(day, *offset), true));
        }
        for offset in timetable_off.day(weekday) {
            events.push(ScheduleEvent::new(window.timestamp(day, *offset), false));
        }
    }

    debug!(
        "Compiled {} events ({} exception days skipped)",
        events.len(),
        skipped
    );
    CompiledSchedule::new(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn thursday_friday() -> (WeeklyTimetable, WeeklyTimetable) {
        let mut on = vec![Vec::new(); 7];
        let mut off = vec![Vec::new(); 7];
        on[4] = vec![t("7:55")];
        off[4] = vec![t("17:00"), t("25:00")];
        on[5] = vec![t("7:55")];
        off[5] = vec![t("17:00"), t("25:00")];
        (
            WeeklyTimetable::from_days("on", on).unwrap(),
            WeeklyTimetable::from_days("off", off).unwrap(),
        )
    }

    #[test]
    fn parse_time_of_day() {
        assert_eq!(t("7:55"), TimeOfDay::new(7, 55).unwrap());
        assert_eq!(t("25:00").hours(), 25);
        assert_eq!(t("25:00").as_delta(), TimeDelta::hours(25));
        assert_eq!(t("08:05").to_string(), "8:05");
    }

    #[test]
    fn weekdays_start_on_sunday() {
        assert_eq!(day_of_week(date(2025, 8, 17)), 0);
        assert_eq!(weekday_name(date(2025, 8, 17)), "Sunday");
        assert_eq!(weekday_name(date(2025, 8, 14)), "Thursday");
        assert_eq!(weekday_name(date(2025, 8, 16)), "Saturday");
    }

    #[test]
    fn parse_time_of_day_rejects_garbage() {
        for bad in ["", "7", "7:5", "7:60", "a:00", "7:0x", "-1:00"] {
            let err = bad.parse::<TimeOfDay>().unwrap_err();
            assert!(matches!(err, Error::InvalidTimeOfDay(_)), "{bad}");
        }
    }

    #[test]
    fn timetable_requires_seven_days() {
        let err = WeeklyTimetable::from_days("on", vec![Vec::new(); 6]).unwrap_err();
        assert!(matches!(err, Error::InvalidTimetable { kind: "on", len: 6 }));
        assert!(err.to_string().contains("exactly 7 entries"));
    }

    #[test]
    fn window_rejects_reversed_dates() {
        let result = DateWindow::new(date(2025, 8, 15), date(2025, 8, 14), Tz::America__Anchorage);
        assert!(matches!(result, Err(Error::InvalidWindow { .. })));
    }

    #[test]
    fn compile_rolls_late_offsets_into_next_day() {
        let window =
            DateWindow::new(date(2025, 8, 14), date(2025, 8, 15), Tz::America__Anchorage).unwrap();
        let (on, off) = thursday_friday();
        let schedule = compile(&window, &on, &off, &ExceptionSet::new());

        assert_eq!(
            schedule.events(),
            &[
                ScheduleEvent::new(1_755_186_900, true),  // 14th 07:55
                ScheduleEvent::new(1_755_219_600, false), // 14th 17:00
                ScheduleEvent::new(1_755_248_400, false), // 15th 01:00
                ScheduleEvent::new(1_755_273_300, true),  // 15th 07:55
                ScheduleEvent::new(1_755_306_000, false), // 15th 17:00
                ScheduleEvent::new(1_755_334_800, false), // 16th 01:00
            ]
        );
        assert_eq!(schedule.epoch(), Some(1_755_186_900));
        assert!(schedule.is_chronological());
    }

    #[test]
    fn exception_days_emit_nothing() {
        let window =
            DateWindow::new(date(2025, 8, 14), date(2025, 8, 15), Tz::America__Anchorage).unwrap();
        let (on, off) = thursday_friday();
        let exceptions: ExceptionSet = [date(2025, 8, 14)].into_iter().collect();
        let schedule = compile(&window, &on, &off, &exceptions);

        assert_eq!(schedule.len(), 3);
        assert_eq!(schedule.events()[0], ScheduleEvent::new(1_755_273_300, true));
    }

    #[test]
    fn declared_order_is_kept_within_a_day() {
        let window =
            DateWindow::new(date(2025, 8, 14), date(2025, 8, 14), Tz::America__Anchorage).unwrap();
        let mut off = vec![Vec::new(); 7];
        off[4] = vec![t("25:00"), t("17:00")];
        let on = WeeklyTimetable::from_days("on", vec![Vec::new(); 7]).unwrap();
        let off = WeeklyTimetable::from_days("off", off).unwrap();
        let schedule = compile(&window, &on, &off, &ExceptionSet::new());

        assert_eq!(schedule.events()[0].timestamp, 1_755_248_400);
        assert_eq!(schedule.events()[1].timestamp, 1_755_219_600);
        assert!(!schedule.is_chronological());
    }

    #[test]
    fn ambiguous_local_time_resolves_to_earlier_instant() {
        // 2025-11-02 01:00 happens twice in Anchorage
        let window =
            DateWindow::new(date(2025, 11, 1), date(2025, 11, 1), Tz::America__Anchorage).unwrap();
        assert_eq!(window.timestamp(date(2025, 11, 1), t("25:00")), 1_762_074_000);
    }

    #[test]
    fn skipped_local_time_uses_offset_before_jump() {
        // 2026-03-08 02:30 does not exist in Anchorage
        let window =
            DateWindow::new(date(2026, 3, 8), date(2026, 3, 8), Tz::America__Anchorage).unwrap();
        assert_eq!(window.timestamp(date(2026, 3, 8), t("2:30")), 1_772_969_400);
    }

    #[test]
    fn exception_ranges_are_inclusive() {
        let mut exceptions = ExceptionSet::new();
        exceptions.insert_range(date(2025, 12, 30), date(2026, 1, 2));
        assert_eq!(exceptions.len(), 4);
        assert!(exceptions.contains(&date(2026, 1, 2)));
        assert!(!exceptions.contains(&date(2026, 1, 3)));
    }
}
