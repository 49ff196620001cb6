/*!
 # Runtime controller

 Drives the "on" and "off" actuator groups from a compiled schedule.

 At startup the schedule is replayed against the current time to find the
 state the actuators should be in (catch-up), so a restart after any amount
 of downtime resumes correctly. Afterwards the clock is polled once per
 second; when it falls inside an event's trigger region, the actuators are
 updated to that event's state. Each region fires at most once.

 On shutdown, any in-flight sequence is abandoned and all relays are
 released.
*/

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{error, info, instrument, trace, warn};

use crate::actuator::{retract_both, update, ActuatorPair, Timing};
use crate::clock::Clock;
use crate::relay::RelayLine;
use crate::schedule::CompiledSchedule;
use crate::shutdown::Shutdown;
use crate::status::format_delta;
use crate::{Error, Result};

/// Timing parameters of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Rest and travel times of every actuator move
    pub timing: Timing,
    /// How long after an event its transition is still considered due
    pub region_length: Duration,
    /// Delay between two schedule checks
    pub poll_interval: Duration,
    /// Minimum delay between two status log lines
    pub status_interval: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            timing: Timing::default(),
            region_length: Duration::from_secs(75),
            poll_interval: Duration::from_secs(1),
            status_interval: Duration::from_secs(60),
        }
    }
}

/// Schedule-driven controller for one pair of actuator groups
pub struct Controller<R: RelayLine, C: Clock> {
    schedule: CompiledSchedule,
    on: ActuatorPair<R>,
    off: ActuatorPair<R>,
    clock: C,
    settings: ControllerSettings,
    shutdown: Shutdown,
    state: bool,
    fired: BTreeSet<usize>,
    last_status: Option<Instant>,
}

impl<R: RelayLine, C: Clock> Controller<R, C> {
    pub fn new(
        schedule: CompiledSchedule,
        on: ActuatorPair<R>,
        off: ActuatorPair<R>,
        clock: C,
        settings: ControllerSettings,
        shutdown: Shutdown,
    ) -> Self {
        if !schedule.is_chronological() {
            warn!("Schedule is not in chronological order; catch-up stops at the first future event");
        }
        for pair in [&on, &off] {
            let (extend, retract) = pair.pins();
            info!("Group '{}': extend GPIO {}, retract GPIO {}", pair.name(), extend, retract);
        }
        Self {
            schedule,
            on,
            off,
            clock,
            settings,
            shutdown,
            state: false,
            fired: BTreeSet::new(),
            last_status: None,
        }
    }

    /// Currently believed logical state
    pub fn state(&self) -> bool {
        self.state
    }

    /// State implied by the schedule history at the current time
    pub fn resumed_state(&self) -> bool {
        self.schedule.state_at(self.clock.now())
    }

    /// Index of the first event whose trigger region contains `now`
    fn due_region(&self, now: DateTime<Utc>) -> Option<usize> {
        let now = now.timestamp_millis();
        let region = i64::try_from(self.settings.region_length.as_millis()).unwrap_or(i64::MAX);
        self.schedule.events().iter().position(|event| {
            let start = event.millis();
            start < now && now < start.saturating_add(region)
        })
    }

    /// Brings the actuators to the state the schedule calls for right now.
    ///
    /// An "on" state runs a full update, which also counts as firing the
    /// region of the event it resumed from. An "off" state only retracts
    /// both groups.
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> Result<()> {
        let now = self.clock.now();
        let latest = self.schedule.last_before(now).map(|(index, event)| (index, *event));
        self.state = latest.is_some_and(|(_, event)| event.state);

        match latest {
            Some((_, event)) => info!(
                "Prior state is {} (since {}, {} ago)",
                on_off(self.state),
                event.timestamp,
                format_delta(now.timestamp().abs_diff(event.timestamp))
            ),
            None => info!("Prior state is OFF (no earlier event)"),
        }

        if self.state {
            info!("Resuming state");
            if let Some((index, _)) = latest {
                self.fired.insert(index);
            }
            update(&mut self.on, &mut self.off, self.settings.timing, true).await
        } else {
            info!("Retracting both actuators");
            retract_both(&mut self.on, &mut self.off, self.settings.timing).await
        }
    }

    /// Checks the schedule once.
    ///
    /// Returns the new state when a trigger region fired.
    pub async fn tick(&mut self) -> Result<Option<bool>> {
        let now = self.clock.now();
        self.log_status(now);

        let Some(index) = self.due_region(now) else {
            return Ok(None);
        };
        if self.fired.contains(&index) {
            trace!("Region {} already handled", index);
            return Ok(None);
        }

        let event = self.schedule.events()[index];
        info!(
            "Entered trigger region of event {} ({}), switching {}",
            index,
            event.timestamp,
            on_off(event.state)
        );
        self.fired.insert(index);
        self.state = event.state;
        update(&mut self.on, &mut self.off, self.settings.timing, event.state).await?;
        Ok(Some(event.state))
    }

    fn log_status(&mut self, now: DateTime<Utc>) {
        let due = self
            .last_status
            .map_or(true, |last| last.elapsed() >= self.settings.status_interval);
        if !due {
            return;
        }
        self.last_status = Some(Instant::now());

        let status = self.schedule.status_at(now, self.settings.region_length);
        let until = |timestamp: Option<i64>| {
            timestamp.map_or_else(
                || "never".to_string(),
                |t| format_delta(t.abs_diff(now.timestamp())),
            )
        };
        info!(
            "State {}, schedule says {}, in region: {}, next on in {}, next off in {}",
            on_off(self.state),
            on_off(status.on),
            status.in_region,
            until(status.next_on),
            until(status.next_off)
        );
    }

    async fn poll(&mut self) -> Result<()> {
        self.start().await?;
        info!("Resume done, polling schedule");
        loop {
            self.tick().await?;
            self.shutdown.sleep(self.settings.poll_interval).await?;
        }
    }

    /// De-energizes all four relays, regardless of the logical state
    pub fn force_off(&mut self) -> Result<()> {
        info!("Forcing all relays off");
        let on = self.on.release();
        let off = self.off.release();
        on.and(off)
    }

    /// Runs until shutdown is requested or an error occurs.
    ///
    /// All relays are released on every exit path. A shutdown request ends
    /// the run with `Ok(())`.
    pub async fn run(mut self) -> Result<()> {
        let result = self.poll().await;
        let released = self.force_off();

        match result {
            Err(Error::Interrupted) => {
                info!("Stopped on shutdown request");
                released
            }
            Err(e) => {
                error!("Controller failed: {}", e);
                if let Err(release_err) = released {
                    error!("Releasing relays also failed: {}", release_err);
                }
                Err(e)
            }
            Ok(()) => released,
        }
    }
}

fn on_off(state: bool) -> &'static str {
    if state {
        "ON"
    } else {
        "OFF"
    }
}
