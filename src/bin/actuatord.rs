use std::path::PathBuf;
use std::time::Duration;

use actuator_schedule::*;
use chrono::{DateTime, Utc};
use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use tracing::{info, instrument, warn};
use tracing_subscriber::EnvFilter;

/// Drive the actuators from a schedule profile until interrupted
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Schedule profile to follow
    profile: String,

    /// Schedule configuration file
    #[arg(short, long, default_value = "schedules.toml")]
    config: PathBuf,

    /// GPIO pin extending the "on" actuator
    #[arg(long, value_name = "GPIO_PIN", default_value_t = 17)]
    pin_on_extend: u8,
    /// GPIO pin retracting the "on" actuator
    #[arg(long, value_name = "GPIO_PIN", default_value_t = 27)]
    pin_on_retract: u8,
    /// GPIO pin extending the "off" actuator
    #[arg(long, value_name = "GPIO_PIN", default_value_t = 10)]
    pin_off_extend: u8,
    /// GPIO pin retracting the "off" actuator
    #[arg(long, value_name = "GPIO_PIN", default_value_t = 9)]
    pin_off_retract: u8,

    /// Rest time between switching actuator directions
    #[arg(long, value_name = "SECONDS", default_value_t = 0.5)]
    rest_time: f64,
    /// Time the actuator takes to undergo a full travel
    #[arg(long, value_name = "SECONDS", default_value_t = 10.0)]
    travel_time: f64,
    /// How long after a scheduled transition it is still carried out
    #[arg(long, value_name = "SECONDS", default_value_t = 75.0)]
    region_length: f64,
    /// Minimum time between two status log lines
    #[arg(long, value_name = "SECONDS", default_value_t = 60.0)]
    status_interval: f64,

    /// Relays are energized by a high level (default wiring is active-low)
    #[arg(long)]
    active_high: bool,
    /// Simulate the relays instead of driving GPIO
    #[arg(long)]
    dry_run: bool,
    /// Pretend the clock starts at this RFC 3339 time (requires --dry-run)
    #[arg(long, value_name = "TIME", requires = "dry_run")]
    start_at: Option<DateTime<Utc>>,
}

fn seconds(name: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|e| eyre!("--{name} {value}: {e}"))
}

#[tokio::main]
#[instrument]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("actuator_schedule=info,actuatord=info")),
        )
        .compact()
        .init();

    color_eyre::install()?;

    let args = Args::parse();

    let config = ScheduleConfig::load(&args.config)?;
    let schedule = config.compile_profile(&args.profile)?;
    info!(
        "Profile '{}': {} events from {} to {} ({})",
        args.profile,
        schedule.len(),
        config.window.start,
        config.window.end,
        config.timezone()
    );

    let settings = ControllerSettings {
        timing: Timing {
            rest: seconds("rest-time", args.rest_time)?,
            travel: seconds("travel-time", args.travel_time)?,
        },
        region_length: seconds("region-length", args.region_length)?,
        status_interval: seconds("status-interval", args.status_interval)?,
        ..ControllerSettings::default()
    };

    let (handle, shutdown) = Shutdown::channel();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Caught interrupt, stopping!");
        handle.trigger();
    });

    if args.dry_run {
        warn!("Dry run: relays are simulated");
        let relay = SimulatedRelay::new;
        let on = ActuatorPair::new(
            "on",
            relay(args.pin_on_extend),
            relay(args.pin_on_retract),
            shutdown.clone(),
        );
        let off = ActuatorPair::new(
            "off",
            relay(args.pin_off_extend),
            relay(args.pin_off_retract),
            shutdown.clone(),
        );
        match args.start_at {
            Some(origin) => {
                let clock = ShiftedClock::starting_at(origin);
                Controller::new(schedule, on, off, clock, settings, shutdown)
                    .run()
                    .await?
            }
            None => {
                Controller::new(schedule, on, off, SystemClock, settings, shutdown)
                    .run()
                    .await?
            }
        }
    } else {
        let active_low = !args.active_high;
        let relay = |pin| SysfsRelay::acquire(pin, active_low);
        let on = ActuatorPair::new(
            "on",
            relay(args.pin_on_extend)?,
            relay(args.pin_on_retract)?,
            shutdown.clone(),
        );
        let off = ActuatorPair::new(
            "off",
            relay(args.pin_off_extend)?,
            relay(args.pin_off_retract)?,
            shutdown.clone(),
        );
        Controller::new(schedule, on, off, SystemClock, settings, shutdown)
            .run()
            .await?
    }

    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!("Cannot listen for SIGTERM: {}", e),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for interrupts: {}", e);
        std::future::pending::<()>().await;
    }
}
