/*!
 # Scheduled Linear Actuator Controller Library

 A Rust library for driving pairs of relay-controlled linear actuators from a
 weekly on/off timetable, with exception dates (holidays, breaks) that suppress
 the schedule for whole days.

 ## Features

 * Weekly timetable compilation into a concrete list of transition events
 * Civil-timezone date arithmetic (offsets past 24:00 roll into the next day)
 * Packed binary and static-table encodings for firmware consumption
 * Startup catch-up that recovers the correct state after any downtime
 * Safe extend/retract/rest sequencing of two actuator groups
 * Abort-and-force-off on interrupt

 ## Example

 ```rust,no_run
 use actuator_schedule::*;

 fn main() -> Result<()> {
     let config = ScheduleConfig::load("schedules.toml")?;
     let schedule = config.compile_profile("level_1")?;

     // Hand the schedule to firmware as packed 8-byte records
     let bytes = encode_packed(&schedule)?;
     std::fs::write("schedule_level_1.bin", bytes)?;

     Ok(())
 }
 ```
*/

use thiserror::Error;

/// Custom error types for the actuator schedule library
#[derive(Error, Debug)]
pub enum Error {
    /// Timetable does not have one entry per weekday
    #[error("{kind} timetable must have exactly 7 entries (Sunday first), got {len}")]
    InvalidTimetable {
        /// Which timetable ("on" or "off")
        kind: &'static str,
        /// Number of entries found
        len: usize,
    },

    /// Time-of-day offset could not be parsed
    #[error("Invalid time of day '{0}' (expected H:MM, hours may exceed 23)")]
    InvalidTimeOfDay(String),

    /// Timezone identifier is not a known IANA zone
    #[error("Unknown timezone '{0}'")]
    InvalidTimezone(String),

    /// Date window ends before it starts
    #[error("Schedule window ends ({end}) before it starts ({start})")]
    InvalidWindow {
        /// First day of the window
        start: chrono::NaiveDate,
        /// Last day of the window
        end: chrono::NaiveDate,
    },

    /// Requested schedule profile is not configured
    #[error("Unknown schedule profile '{0}'")]
    UnknownProfile(String),

    /// Encoded schedule would exceed the firmware budget
    #[error("Encoded schedule is {size} bytes, exceeding the {max} byte budget")]
    ScheduleTooLarge {
        /// Size the encoding would need
        size: usize,
        /// Maximum permitted size
        max: usize,
    },

    /// Schedule has no events, so no base epoch exists
    #[error("Schedule has no events")]
    EmptySchedule,

    /// Timestamp does not fit the 63 bits of a packed record
    #[error("Timestamp {0} cannot be packed into 63 bits")]
    TimestampOutOfRange(i64),

    /// Packed data is not a whole number of 8-byte records
    #[error("Packed schedule length {0} is not a multiple of 8")]
    MalformedPacked(usize),

    /// Writing a relay line failed
    #[error("GPIO {pin}: {source}")]
    Gpio {
        /// Pin number of the failing line
        pin: u8,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// An actuator sequence was aborted by a shutdown request
    #[error("Interrupted by shutdown request")]
    Interrupted,

    /// Configuration file could not be parsed
    #[error(transparent)]
    Config(#[from] toml::de::Error),

    /// Other I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod actuator;
pub mod clock;
pub mod config;
pub mod controller;
pub mod encoder;
pub mod relay;
pub mod schedule;
pub mod shutdown;
pub mod status;

// Re-export key types
pub use actuator::{update, ActuatorPair, Timing};
pub use clock::{Clock, ShiftedClock, SystemClock};
pub use config::{Profile, ScheduleConfig};
pub use controller::{Controller, ControllerSettings};
pub use encoder::{decode_packed, encode_header, encode_packed, MAX_PACKED_BYTES};
pub use relay::{RelayJournal, RelayLine, RelayWrite, SimulatedRelay, SysfsRelay};
pub use schedule::{
    compile, day_of_week, weekday_name, CompiledSchedule, DateWindow, ExceptionSet,
    ScheduleEvent, TimeOfDay, WeeklyTimetable, WEEK_DAYS,
};
pub use shutdown::{Shutdown, ShutdownHandle};
pub use status::{format_delta, ScheduleStatus};
