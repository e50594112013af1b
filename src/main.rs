//! dockwatch - USB & Hardware Sensor Monitoring Binary
//!
//! A standalone binary that monitors USB device presence and hardware
//! sensors, keeping a durable history in SQLite.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Args, Parser, Subcommand};
use dockwatch::{
    DeviceEvent, DeviceEventRecord, MonitorConfig, MonitorObserver, MonitoringService,
    PlatformCapabilities, SensorSample, SensorSampleRecord, SensorSampler, TimeSeriesStore,
    DEFAULT_DB_PATH, DEFAULT_DEVICE_INTERVAL_MS, DEFAULT_SENSOR_INTERVAL_MS,
};
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "dockwatch")]
#[command(about = "dockwatch - USB device & hardware sensor monitor")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = "Monitors USB attach/detach events and thermal/battery sensors, \
with a durable SQLite history and range queries")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Database file path
    #[arg(long, default_value = DEFAULT_DB_PATH)]
    db: String,

    /// Sensor sampling interval in milliseconds
    #[arg(short, long, default_value_t = DEFAULT_SENSOR_INTERVAL_MS)]
    interval: u64,

    /// Device polling interval in milliseconds
    #[arg(long, default_value_t = DEFAULT_DEVICE_INTERVAL_MS)]
    device_interval: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitoring engine until interrupted (default)
    Run,

    /// Take a single sensor sample and exit
    Snapshot(SnapshotArgs),

    /// List stored USB device events
    Events(QueryArgs),

    /// List stored sensor samples
    Stats(QueryArgs),
}

#[derive(Args)]
struct SnapshotArgs {
    /// Output format: json or pretty
    #[arg(short, long, default_value = "pretty")]
    format: String,
}

#[derive(Args)]
struct QueryArgs {
    /// Start date (YYYY-MM-DD), inclusive
    #[arg(long)]
    start: Option<String>,

    /// End date (YYYY-MM-DD), inclusive to end of day
    #[arg(long)]
    end: Option<String>,

    /// Only show the most recent N records within the date range
    #[arg(short, long)]
    limit: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    init_logging(&cli)?;
    print_banner();

    match &cli.command {
        Some(Commands::Snapshot(args)) => snapshot_command(args)?,
        Some(Commands::Events(args)) => events_command(&cli, args)?,
        Some(Commands::Stats(args)) => stats_command(&cli, args)?,
        Some(Commands::Run) | None => run_command(&cli).await?,
    }

    Ok(())
}

fn init_logging(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let level = if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

fn print_banner() {
    println!("dockwatch - USB & Hardware Sensor Monitor");
    println!("   Version: {}", env!("CARGO_PKG_VERSION"));
    println!();
}

/// Stand-in presentation layer: prints every live update to stdout.
struct ConsoleObserver;

impl MonitorObserver for ConsoleObserver {
    fn on_device_event(&self, event: &DeviceEvent) {
        println!(
            "[{}] USB {:<6} vendor={} serial={} uuid={}",
            event.timestamp.format("%H:%M:%S"),
            event.kind.as_str(),
            event.vendor,
            event.serial,
            event.uuid
        );
    }

    fn on_sensor_sample(&self, sample: &SensorSample) {
        let gpu = match sample.gpu_temp_c {
            Some(temp) => format!("{temp:.1}C"),
            None => "N/A".to_string(),
        };
        println!(
            "[{}] cpu={:.1}C gpu={} battery={}% ({})",
            sample.timestamp.format("%H:%M:%S"),
            sample.cpu_temp_c,
            gpu,
            sample.battery_level,
            sample.battery_health
        );
    }
}

async fn run_command(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting dockwatch monitoring engine...");

    let store = Arc::new(TimeSeriesStore::open(&cli.db)?);
    info!("Event history stored in {}", cli.db);

    let config = MonitorConfig::default()
        .with_sensor_interval_ms(cli.interval)
        .with_device_interval_ms(cli.device_interval);

    let mut service =
        MonitoringService::new(store, PlatformCapabilities::detect()).with_config(config);
    service.subscribe(Arc::new(ConsoleObserver));
    service.start()?;

    println!("Monitoring... press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    println!("Stopping...");
    service.stop().await;

    Ok(())
}

fn snapshot_command(args: &SnapshotArgs) -> Result<(), Box<dyn std::error::Error>> {
    let capabilities = PlatformCapabilities::detect();
    let mut sampler = SensorSampler::new(
        capabilities.cpu_sources,
        capabilities.gpu_probe,
        capabilities.battery_probe,
    );
    let sample = sampler.sample_once()?;

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&sample)?),
        "pretty" => {
            println!("Sensor snapshot ({})", sample.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
            println!("  CPU temperature: {:.1}C", sample.cpu_temp_c);
            match sample.gpu_temp_c {
                Some(temp) => println!("  GPU temperature: {temp:.1}C"),
                None => println!("  GPU temperature: N/A"),
            }
            println!(
                "  Battery: {}% ({})",
                sample.battery_level, sample.battery_health
            );
        }
        other => {
            error!("Unsupported format: {}. Use 'json' or 'pretty'", other);
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Parse an inclusive date range; the end expands to end-of-day so a range
/// like `--start 2025-06-01 --end 2025-06-01` covers that whole day.
fn parse_range(
    args: &QueryArgs,
) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>), Box<dyn std::error::Error>> {
    let parse = |value: &str| -> Result<NaiveDate, Box<dyn std::error::Error>> {
        Ok(NaiveDate::parse_from_str(value, "%Y-%m-%d")?)
    };
    let start = match &args.start {
        Some(value) => Some(parse(value)?.and_time(NaiveTime::MIN).and_utc()),
        None => None,
    };
    let end = match &args.end {
        Some(value) => Some(
            parse(value)?
                .and_time(NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).unwrap())
                .and_utc(),
        ),
        None => None,
    };
    Ok((start, end))
}

/// Apply the shared query arguments to the device-event history.
///
/// Without a date range, `--limit` takes the dedicated latest-N path;
/// with one, the range is filtered first and then trimmed to the most
/// recent N, same as the sensor query.
fn select_events(
    store: &TimeSeriesStore,
    args: &QueryArgs,
) -> Result<Vec<DeviceEventRecord>, Box<dyn std::error::Error>> {
    if args.start.is_none() && args.end.is_none() {
        if let Some(limit) = args.limit {
            return Ok(store.latest_device_events(limit)?);
        }
    }
    let (start, end) = parse_range(args)?;
    // Events come back newest-first, so truncation keeps the most recent.
    let mut records = store.device_events(start, end)?;
    if let Some(limit) = args.limit {
        records.truncate(limit);
    }
    Ok(records)
}

fn select_samples(
    store: &TimeSeriesStore,
    args: &QueryArgs,
) -> Result<Vec<SensorSampleRecord>, Box<dyn std::error::Error>> {
    let (start, end) = parse_range(args)?;
    // Samples come back oldest-first, so trim from the front.
    let mut records = store.sensor_samples(start, end)?;
    if let Some(limit) = args.limit {
        let skip = records.len().saturating_sub(limit);
        records.drain(..skip);
    }
    Ok(records)
}

fn events_command(cli: &Cli, args: &QueryArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = TimeSeriesStore::open(&cli.db)?;
    let records = select_events(&store, args)?;

    if records.is_empty() {
        println!("No device events recorded.");
        return Ok(());
    }
    println!("{:<20} {:<8} {:<24} {:<20} {}", "Time", "Type", "Vendor", "Serial", "UUID");
    for record in records {
        let event = record.event;
        println!(
            "{:<20} {:<8} {:<24} {:<20} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.kind.as_str(),
            event.vendor,
            event.serial,
            event.uuid
        );
    }

    Ok(())
}

fn stats_command(cli: &Cli, args: &QueryArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = TimeSeriesStore::open(&cli.db)?;
    let records = select_samples(&store, args)?;

    if records.is_empty() {
        println!("No sensor samples recorded.");
        return Ok(());
    }
    println!("{:<20} {:>8} {:>8} {:>9}  {}", "Time", "CPU", "GPU", "Battery", "Health");
    for record in records {
        let sample = record.sample;
        let gpu = match sample.gpu_temp_c {
            Some(temp) => format!("{temp:.1}C"),
            None => "N/A".to_string(),
        };
        println!(
            "{:<20} {:>7.1}C {:>8} {:>8}%  {}",
            sample.timestamp.format("%Y-%m-%d %H:%M:%S"),
            sample.cpu_temp_c,
            gpu,
            sample.battery_level,
            sample.battery_health
        );
    }

    Ok(())
}
