/*!
 # Schedule configuration

 Timezone, date window, exception dates and named timetable profiles are
 read from a TOML document:

 ```toml
 timezone = "America/Anchorage"
 start = "2025-08-14"
 end = "2026-05-22"
 exceptions = ["2025-09-01", { from = "2025-12-19", to = "2026-01-02" }]

 [profiles.level_1]
 on  = [[], ["7:55"], ["7:55"], ["7:55"], ["7:55"], ["7:55"], []]
 off = [[], ["17:00", "25:00"], ["17:00", "25:00"], ["17:00", "25:00"],
        ["17:00", "25:00"], ["17:00", "25:00"], []]
 ```
*/

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::schedule::{
    compile, CompiledSchedule, DateWindow, ExceptionSet, TimeOfDay, WeeklyTimetable,
};
use crate::{Error, Result};

/// Raw file layout, before validation
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    timezone: String,
    start: NaiveDate,
    end: NaiveDate,
    #[serde(default)]
    exceptions: Vec<RawException>,
    #[serde(default)]
    profiles: BTreeMap<String, RawProfile>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawException {
    Date(NaiveDate),
    Range { from: NaiveDate, to: NaiveDate },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProfile {
    on: Vec<Vec<TimeOfDay>>,
    off: Vec<Vec<TimeOfDay>>,
}

/// A named pair of weekly timetables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub on: WeeklyTimetable,
    pub off: WeeklyTimetable,
}

/// Validated schedule configuration
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub window: DateWindow,
    pub exceptions: ExceptionSet,
    pub profiles: BTreeMap<String, Profile>,
}

impl ScheduleConfig {
    /// Reads and validates a configuration file
    #[instrument]
    pub fn load(path: impl AsRef<Path> + std::fmt::Debug) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config = Self::parse(&content)?;
        info!(
            "Loaded {} schedule profile(s) from {}",
            config.profiles.len(),
            path.as_ref().display()
        );
        Ok(config)
    }

    /// Parses and validates a configuration document
    pub fn parse(content: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(content)?;

        let timezone: Tz = raw
            .timezone
            .parse()
            .map_err(|_| Error::InvalidTimezone(raw.timezone.clone()))?;
        let window = DateWindow::new(raw.start, raw.end, timezone)?;

        let mut exceptions = ExceptionSet::new();
        for exception in raw.exceptions {
            match exception {
                RawException::Date(date) => exceptions.insert(date),
                RawException::Range { from, to } => {
                    if to < from {
                        warn!("Exception range {} to {} is empty", from, to);
                    }
                    exceptions.insert_range(from, to);
                }
            }
        }

        let mut profiles = BTreeMap::new();
        for (name, profile) in raw.profiles {
            debug!("Validating profile '{}'", name);
            let profile = Profile {
                on: WeeklyTimetable::from_days("on", profile.on)?,
                off: WeeklyTimetable::from_days("off", profile.off)?,
            };
            profiles.insert(name, profile);
        }

        Ok(Self {
            window,
            exceptions,
            profiles,
        })
    }

    pub fn profile(&self, name: &str) -> Result<&Profile> {
        self.profiles
            .get(name)
            .ok_or_else(|| Error::UnknownProfile(name.to_string()))
    }

    pub fn profile_names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    /// Compiles the named profile over this configuration's window
    pub fn compile_profile(&self, name: &str) -> Result<CompiledSchedule> {
        let profile = self.profile(name)?;
        let schedule = compile(&self.window, &profile.on, &profile.off, &self.exceptions);
        if !schedule.is_chronological() {
            warn!(
                "Profile '{}' produces events out of chronological order",
                name
            );
        }
        Ok(schedule)
    }

    pub fn timezone(&self) -> Tz {
        self.window.timezone
    }
}
