/*!
 # Linear actuator sequencing

 A linear actuator is driven by two relays: one that extends it and one that
 retracts it. Every move follows the same shape:

 1. release both relays
 2. rest, so the motor stops before any direction change
 3. energize the relay for the requested direction
 4. wait a full travel time
 5. release both relays

 The two relays of a pair are never energized at the same time.
*/

use std::fmt;
use std::time::Duration;

use futures::future;
use tracing::{debug, info, instrument, warn};

use crate::relay::RelayLine;
use crate::shutdown::Shutdown;
use crate::Result;

/// Timing of a single actuator move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Pause with both relays released before energizing one
    pub rest: Duration,
    /// Time the actuator needs for a full travel
    pub travel: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            rest: Duration::from_millis(500),
            travel: Duration::from_secs(10),
        }
    }
}

impl Timing {
    /// Total duration of one extend or retract move
    pub fn move_duration(&self) -> Duration {
        self.rest + self.travel
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Extend,
    Retract,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Extend => write!(f, "Extending"),
            Direction::Retract => write!(f, "Retracting"),
        }
    }
}

/// One actuator: an extend relay and a retract relay.
///
/// Both relays are released when the pair is dropped.
pub struct ActuatorPair<R: RelayLine> {
    name: String,
    extend: R,
    retract: R,
    shutdown: Shutdown,
}

impl<R: RelayLine> ActuatorPair<R> {
    pub fn new(name: impl Into<String>, extend: R, retract: R, shutdown: Shutdown) -> Self {
        Self {
            name: name.into(),
            extend,
            retract,
            shutdown,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// GPIO pins as (extend, retract)
    pub fn pins(&self) -> (u8, u8) {
        (self.extend.pin(), self.retract.pin())
    }

    /// De-energizes both relays
    pub fn release(&mut self) -> Result<()> {
        self.extend.set(false)?;
        self.retract.set(false)
    }

    /// Moves in `direction`, releasing both relays on every exit path
    async fn drive(&mut self, direction: Direction, timing: Timing) -> Result<()> {
        info!(
            "{} {}, E={} R={}",
            direction,
            self.name,
            self.extend.pin(),
            self.retract.pin()
        );

        self.release()?;
        self.shutdown.sleep(timing.rest).await?;

        match direction {
            Direction::Extend => self.extend.set(true)?,
            Direction::Retract => self.retract.set(true)?,
        }
        let travel = self.shutdown.sleep(timing.travel).await;

        self.release()?;
        travel
    }

    #[instrument(skip(self), fields(pair = %self.name))]
    pub async fn extend(&mut self, timing: Timing) -> Result<()> {
        self.drive(Direction::Extend, timing).await
    }

    #[instrument(skip(self), fields(pair = %self.name))]
    pub async fn retract(&mut self, timing: Timing) -> Result<()> {
        self.drive(Direction::Retract, timing).await
    }

    /// Full extend followed by full retract
    pub async fn cycle(&mut self, timing: Timing) -> Result<()> {
        self.extend(timing).await?;
        self.retract(timing).await
    }
}

impl<R: RelayLine> fmt::Debug for ActuatorPair<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActuatorPair")
            .field("name", &self.name)
            .field("extend", &self.extend.pin())
            .field("retract", &self.retract.pin())
            .finish()
    }
}

impl<R: RelayLine> Drop for ActuatorPair<R> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to release {} on drop: {}", self.name, e);
        }
    }
}

/// Retracts both groups together, waiting for both to finish.
///
/// Neither group is abandoned mid-move when the other fails: each one runs
/// until it completes or observes shutdown, and releases its relays.
pub async fn retract_both<R: RelayLine>(
    on: &mut ActuatorPair<R>,
    off: &mut ActuatorPair<R>,
    timing: Timing,
) -> Result<()> {
    let (off_result, on_result) = future::join(off.retract(timing), on.retract(timing)).await;
    off_result.and(on_result)
}

/// Drives the actuators to `state`.
///
/// Both groups are first retracted in parallel. Once both have finished, the
/// group matching `state` runs a full extend/retract cycle on its own.
#[instrument(skip(on, off))]
pub async fn update<R: RelayLine>(
    on: &mut ActuatorPair<R>,
    off: &mut ActuatorPair<R>,
    timing: Timing,
    state: bool,
) -> Result<()> {
    info!("Updating actuators to {}", if state { "ON" } else { "OFF" });

    retract_both(on, off, timing).await?;
    debug!("Both groups retracted");

    let group = if state { on } else { off };
    group.cycle(timing).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{RelayJournal, SimulatedRelay};
    use crate::Error;
    use tokio::time::Instant;

    fn assert_near(actual: Duration, expected: Duration) {
        let diff = actual.abs_diff(expected);
        assert!(diff <= Duration::from_millis(2), "{actual:?} vs {expected:?}");
    }

    const TIMING: Timing = Timing {
        rest: Duration::from_millis(500),
        travel: Duration::from_secs(10),
    };

    fn pair(
        name: &str,
        extend: u8,
        retract: u8,
        journal: &RelayJournal,
    ) -> ActuatorPair<SimulatedRelay> {
        ActuatorPair::new(
            name,
            SimulatedRelay::with_journal(extend, journal.clone()),
            SimulatedRelay::with_journal(retract, journal.clone()),
            Shutdown::never(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn retract_energizes_after_rest() {
        let journal = RelayJournal::new();
        let mut actuator = pair("test", 17, 27, &journal);
        let start = Instant::now();

        actuator.retract(TIMING).await.unwrap();
        assert_near(start.elapsed(), TIMING.move_duration());

        let retract = journal.writes_for(27);
        let energized: Vec<_> = retract.iter().filter(|w| w.energized).collect();
        assert_eq!(energized.len(), 1);
        assert_near(energized[0].at - start, TIMING.rest);
        assert!(journal.writes_for(17).iter().all(|w| !w.energized));
        assert!(!retract.last().unwrap().energized);
    }

    #[tokio::test(start_paused = true)]
    async fn cycle_extends_then_retracts() {
        let journal = RelayJournal::new();
        let mut actuator = pair("test", 17, 27, &journal);
        let start = Instant::now();

        actuator.cycle(TIMING).await.unwrap();
        assert_near(start.elapsed(), TIMING.move_duration() * 2);

        let energized: Vec<_> = journal.writes().into_iter().filter(|w| w.energized).collect();
        assert_eq!(energized.len(), 2);
        assert_eq!(energized[0].pin, 17);
        assert_near(energized[0].at - start, TIMING.rest);
        assert_eq!(energized[1].pin, 27);
        assert_near(energized[1].at - start, TIMING.move_duration() + TIMING.rest);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupted_move_releases_relays() {
        let journal = RelayJournal::new();
        let (handle, shutdown) = Shutdown::channel();
        let mut actuator = ActuatorPair::new(
            "test",
            SimulatedRelay::with_journal(17, journal.clone()),
            SimulatedRelay::with_journal(27, journal.clone()),
            shutdown,
        );

        let trigger = async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            handle.trigger();
        };
        let (result, _) = tokio::join!(actuator.extend(TIMING), trigger);

        assert!(matches!(result, Err(Error::Interrupted)));
        let last = journal.writes_for(17).last().copied().unwrap();
        assert!(!last.energized);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_releases_relays() {
        let journal = RelayJournal::new();
        let actuator = pair("test", 17, 27, &journal);
        assert_eq!(actuator.name(), "test");
        assert_eq!(actuator.pins(), (17, 27));
        drop(actuator);

        let writes = journal.writes();
        assert_eq!(writes.len(), 2);
        assert!(writes.iter().all(|w| !w.energized));
    }
}
