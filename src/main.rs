use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use actuator_schedule::status::format_time;
use actuator_schedule::*;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Result};
use tracing::{debug, info, instrument};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Schedule configuration file
    #[arg(short, long, global = true, default_value = "schedules.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured profiles
    Profiles,
    /// Print every event of a profile
    List {
        /// Schedule profile
        profile: String,
    },
    /// Write a profile as a static C table
    Header {
        /// Schedule profile
        profile: String,
        /// Constant name (default: schedule_<profile>)
        #[arg(short, long)]
        name: Option<String>,
        /// Output file (default: <name>.h)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Write a profile as packed 8-byte records
    Pack {
        /// Schedule profile
        profile: String,
        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print the events of a packed schedule file
    Decode {
        /// Packed schedule file
        input: PathBuf,
        /// Timezone to print times in
        #[arg(short, long, default_value = "UTC")]
        timezone: String,
    },
    /// Show where a profile stands right now
    Status {
        /// Schedule profile
        profile: String,
        /// Trigger region length
        #[arg(long, value_name = "SECONDS", default_value_t = 75)]
        region_length: u64,
        /// Evaluate at this RFC 3339 time instead of now
        #[arg(long, value_name = "TIME")]
        at: Option<DateTime<Utc>>,
    },
}

#[tokio::main]
#[instrument]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("actuator_schedule=warn,schedctl=info")),
        )
        .compact()
        .init();

    color_eyre::install()?;

    let cli = Cli::parse();
    debug!("Parsed command line arguments");

    match cli.command {
        Commands::Profiles => {
            let config = ScheduleConfig::load(&cli.config)?;
            for name in config.profile_names() {
                println!("{name}");
            }
        }
        Commands::List { profile } => {
            let config = ScheduleConfig::load(&cli.config)?;
            let schedule = config.compile_profile(&profile)?;
            print_events(&schedule, config.timezone());
        }
        Commands::Header {
            profile,
            name,
            output,
        } => {
            let config = ScheduleConfig::load(&cli.config)?;
            let schedule = config.compile_profile(&profile)?;
            let name = name.unwrap_or_else(|| format!("schedule_{profile}"));
            let output = output.unwrap_or_else(|| PathBuf::from(format!("{name}.h")));

            let table = encode_header(&name, &schedule)?;
            fs::write(&output, table)?;
            info!(
                "Wrote {} events as '{}' to {}",
                schedule.len(),
                name,
                output.display()
            );
        }
        Commands::Pack { profile, output } => {
            let config = ScheduleConfig::load(&cli.config)?;
            let schedule = config.compile_profile(&profile)?;

            let bytes = encode_packed(&schedule)?;
            fs::write(&output, &bytes)?;
            info!(
                "Wrote {} events ({} of {} bytes) to {}",
                schedule.len(),
                bytes.len(),
                MAX_PACKED_BYTES,
                output.display()
            );
        }
        Commands::Decode { input, timezone } => {
            let tz: Tz = timezone
                .parse()
                .map_err(|_| eyre!("Unknown timezone '{timezone}'"))?;
            let schedule = decode_packed(&fs::read(&input)?)?;
            print_events(&schedule, tz);
        }
        Commands::Status {
            profile,
            region_length,
            at,
        } => {
            let config = ScheduleConfig::load(&cli.config)?;
            let schedule = config.compile_profile(&profile)?;
            let now = at.unwrap_or_else(Utc::now);

            let status = schedule.status_at(now, Duration::from_secs(region_length));
            print!("{}", status.display(now, config.timezone()));
        }
    }

    Ok(())
}

/// Print one line per event: index, unix time, weekday, local time, state
fn print_events(schedule: &CompiledSchedule, tz: Tz) {
    for (index, event) in schedule.events().iter().enumerate() {
        let (weekday, local) = match event.as_datetime() {
            Some(at) => (
                weekday_name(at.with_timezone(&tz).date_naive()),
                format_time(at, tz),
            ),
            None => ("", "out of range".to_string()),
        };
        println!(
            "{:>5} {:>12} {:<9} {} {}",
            index,
            event.timestamp,
            weekday,
            local,
            if event.state { "ON" } else { "OFF" }
        );
    }
    if !schedule.is_chronological() {
        eprintln!("warning: events are not in chronological order");
    }
}
