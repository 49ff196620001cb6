/*!
 # Relay output lines

 Each actuator direction is switched by one relay on one GPIO line. The
 [`RelayLine`] trait is the only capability the controller needs: energize or
 de-energize a line.

 Two backends are provided:

 * [`SysfsRelay`] drives a Linux GPIO through `/sys/class/gpio`
 * [`SimulatedRelay`] keeps the state in memory, for dry runs and tests
*/

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, trace};

use crate::{Error, Result};

/// A relay-controlled output line
pub trait RelayLine: Send {
    /// GPIO pin number, for diagnostics
    fn pin(&self) -> u8;

    /// Energize (`true`) or de-energize (`false`) the relay
    fn set(&mut self, energized: bool) -> Result<()>;
}

/// Relay on a Linux GPIO line, driven through the sysfs interface.
///
/// Polarity is applied here rather than through the kernel's `active_low`
/// attribute so the line can be switched to output already at its idle level.
#[derive(Debug)]
pub struct SysfsRelay {
    pin: u8,
    active_low: bool,
    value_path: PathBuf,
}

impl SysfsRelay {
    const ROOT: &'static str = "/sys/class/gpio";

    /// Exports `pin` and configures it as a de-energized output
    #[instrument]
    pub fn acquire(pin: u8, active_low: bool) -> Result<Self> {
        let gpio_err = |source: io::Error| Error::Gpio { pin, source };
        let dir = PathBuf::from(Self::ROOT).join(format!("gpio{pin}"));

        if !dir.exists() {
            debug!("Exporting GPIO {}", pin);
            fs::write(PathBuf::from(Self::ROOT).join("export"), pin.to_string())
                .map_err(gpio_err)?;
            // udev may need a moment to fix up permissions on the new node
            std::thread::sleep(Duration::from_millis(100));
        }

        // "high"/"low" select output mode and the raw initial level in one write
        let idle = if active_low { "high" } else { "low" };
        fs::write(dir.join("direction"), idle).map_err(gpio_err)?;

        info!(
            "Acquired GPIO {} ({}), de-energized",
            pin,
            if active_low { "active-low" } else { "active-high" }
        );
        Ok(Self {
            pin,
            active_low,
            value_path: dir.join("value"),
        })
    }
}

impl RelayLine for SysfsRelay {
    fn pin(&self) -> u8 {
        self.pin
    }

    fn set(&mut self, energized: bool) -> Result<()> {
        let level = energized != self.active_low;
        trace!("GPIO {} <- {}", self.pin, u8::from(level));
        fs::write(&self.value_path, if level { "1" } else { "0" }).map_err(|source| {
            Error::Gpio {
                pin: self.pin,
                source,
            }
        })
    }
}

/// One recorded relay write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayWrite {
    pub pin: u8,
    pub energized: bool,
    pub at: Instant,
}

/// Shared log of relay writes, in the order they happened
#[derive(Debug, Clone, Default)]
pub struct RelayJournal {
    writes: Arc<Mutex<Vec<RelayWrite>>>,
}

impl RelayJournal {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, write: RelayWrite) {
        self.writes.lock().push(write);
    }

    /// Copy of every write recorded so far
    pub fn writes(&self) -> Vec<RelayWrite> {
        self.writes.lock().clone()
    }

    /// Writes that touched `pin`
    pub fn writes_for(&self, pin: u8) -> Vec<RelayWrite> {
        self.writes
            .lock()
            .iter()
            .filter(|write| write.pin == pin)
            .copied()
            .collect()
    }
}

/// In-memory relay
#[derive(Debug)]
pub struct SimulatedRelay {
    pin: u8,
    energized: bool,
    journal: Option<RelayJournal>,
}

impl SimulatedRelay {
    /// A relay that only logs its writes
    pub fn new(pin: u8) -> Self {
        Self {
            pin,
            energized: false,
            journal: None,
        }
    }

    /// A relay that also records every write into `journal`
    pub fn with_journal(pin: u8, journal: RelayJournal) -> Self {
        Self {
            pin,
            energized: false,
            journal: Some(journal),
        }
    }

    pub fn is_energized(&self) -> bool {
        self.energized
    }
}

impl RelayLine for SimulatedRelay {
    fn pin(&self) -> u8 {
        self.pin
    }

    fn set(&mut self, energized: bool) -> Result<()> {
        if energized != self.energized {
            debug!(
                "Simulated GPIO {} {}",
                self.pin,
                if energized { "energized" } else { "released" }
            );
        }
        self.energized = energized;
        if let Some(journal) = &self.journal {
            journal.record(RelayWrite {
                pin: self.pin,
                energized,
                at: Instant::now(),
            });
        }
        Ok(())
    }
}
