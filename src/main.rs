//! BLE Activity CLI
//!
//! Aggregates advertisements read as JSON lines and reports nearby-device
//! activity.

use ble_activity::{
    config::parse_filter_tag, telemetry::create_shared_counters_with_persistence, Advertisement,
    CandidateView, ChannelSource, Config, Coordinator, ScanningMode, SourceError, SourceFeeder,
    SystemClock, WindowStats, DEFAULT_CANDIDATE_LIMIT, VERSION,
};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ble-activity")]
#[command(version = VERSION)]
#[command(about = "Nearby BLE device activity aggregator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate advertisements read as JSON lines
    Run {
        /// Input file with one advertisement per line ("-" for stdin)
        #[arg(long, short, default_value = "-")]
        input: String,

        /// Only accept advertisements carrying this manufacturer key (decimal or 0x hex)
        #[arg(long)]
        filter_tag: Option<String>,

        /// Scanning mode requested from the source (active or passive)
        #[arg(long)]
        mode: Option<ScanningMode>,

        /// Discovery session duration in seconds (10-3600)
        #[arg(long)]
        session_duration: Option<u64>,

        /// Start a discovery session immediately
        #[arg(long)]
        session: bool,

        /// Number of candidates to print
        #[arg(long, default_value_t = DEFAULT_CANDIDATE_LIMIT)]
        limit: usize,

        /// Keep running after the input ends, until Ctrl+C
        #[arg(long)]
        follow: bool,

        /// Ignore the saved snapshot
        #[arg(long)]
        fresh: bool,
    },

    /// Show the saved device ranking and counters
    Status {
        /// Number of candidates to print
        #[arg(long, default_value_t = DEFAULT_CANDIDATE_LIMIT)]
        limit: usize,
    },

    /// Show configuration
    Config,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            input,
            filter_tag,
            mode,
            session_duration,
            session,
            limit,
            follow,
            fresh,
        } => {
            let options = RunOptions {
                input,
                filter_tag,
                mode,
                session_duration,
                session,
                limit,
                follow,
                fresh,
            };
            if let Err(e) = cmd_run(options) {
                eprintln!("Error: {e:#}");
                std::process::exit(1);
            }
        }
        Commands::Status { limit } => {
            if let Err(e) = cmd_status(limit) {
                eprintln!("Error: {e:#}");
                std::process::exit(1);
            }
        }
        Commands::Config => {
            if let Err(e) = cmd_config() {
                eprintln!("Error: {e:#}");
                std::process::exit(1);
            }
        }
    }
}

/// Load the configuration file. A missing file means defaults; a file that
/// cannot be read or parsed is an error.
fn load_config() -> anyhow::Result<Config> {
    Config::load().with_context(|| {
        format!(
            "could not load configuration from {:?}",
            Config::config_path()
        )
    })
}

struct RunOptions {
    input: String,
    filter_tag: Option<String>,
    mode: Option<ScanningMode>,
    session_duration: Option<u64>,
    session: bool,
    limit: usize,
    follow: bool,
    fresh: bool,
}

fn cmd_run(options: RunOptions) -> anyhow::Result<()> {
    println!("BLE Activity v{VERSION}");
    println!();

    let mut config = load_config()?;
    if let Some(tag) = options.filter_tag.as_deref() {
        config.filter_tag = Some(parse_filter_tag(tag)?);
    }
    if let Some(mode) = options.mode {
        config.scanning_mode = mode;
    }
    if let Some(secs) = options.session_duration {
        config.session_duration = Duration::from_secs(secs);
    }
    config.validate()?;
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    println!("Starting aggregation...");
    println!("  Scanning mode: {}", config.scanning_mode);
    match config.filter_tag {
        Some(tag) => println!("  Filter tag: 0x{tag:04X}"),
        None => println!("  Filter tag: none"),
    }
    println!(
        "  Session duration: {}s",
        config.session_duration.as_secs()
    );
    println!("  Tick interval: {}s", config.tick_interval.as_secs());

    let counters = create_shared_counters_with_persistence(config.counters_path());
    let source = ChannelSource::new();
    let feeder = source.feeder();
    let snapshot_path = config.snapshot_path();
    let tick_interval = config.tick_interval;

    let coordinator = Coordinator::with_parts(
        config,
        source,
        Arc::new(SystemClock),
        counters.clone(),
    )?;
    println!("Instance ID: {}", coordinator.instance_id());

    if !options.fresh {
        match coordinator.load_snapshot(&snapshot_path) {
            Ok(true) => println!(
                "Restored {} devices from {:?}",
                coordinator.device_count(),
                snapshot_path
            ),
            Ok(false) => {}
            Err(e) => eprintln!("Warning: Could not restore snapshot: {e}"),
        }
    }

    let changed = Arc::new(AtomicBool::new(true));
    let flag = changed.clone();
    let _subscription = coordinator.add_listener(move || -> anyhow::Result<()> {
        flag.store(true, Ordering::SeqCst);
        Ok(())
    });

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    coordinator.start()?;
    if !coordinator.is_scanning() {
        anyhow::bail!("advertisement source did not start");
    }
    if options.session {
        let session = coordinator.start_session();
        if let Some(expires_at) = session.expires_at {
            println!("Discovery session running until {expires_at}");
        }
    }

    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let baseline = processed(&coordinator);
    let reader = spawn_reader(options.input.clone(), feeder, running.clone())?;
    let mut last_report = Instant::now();
    let mut report_if_changed = || {
        if last_report.elapsed() >= tick_interval && changed.swap(false, Ordering::SeqCst) {
            print_report(&coordinator.stats(), &coordinator.ranked_candidates(options.limit));
            last_report = Instant::now();
        }
    };

    while running.load(Ordering::SeqCst) && !reader.is_finished() {
        thread::sleep(Duration::from_millis(100));
        report_if_changed();
    }

    // On Ctrl+C the reader may still be blocked on stdin; leave it behind
    if reader.is_finished() {
        let pushed = reader
            .join()
            .map_err(|_| anyhow::anyhow!("input reader panicked"))?;

        // Let the tick worker drain what the reader queued
        let deadline = Instant::now() + Duration::from_secs(5);
        while processed(&coordinator) - baseline < pushed && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        tracing::debug!(pushed, "input finished");

        while options.follow && running.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
            report_if_changed();
        }
    }

    println!();
    println!("Stopping...");
    coordinator.stop();

    let stats = coordinator.tick();
    print_report(&stats, &coordinator.ranked_candidates(options.limit));

    if let Err(e) = coordinator.save_snapshot(&snapshot_path) {
        eprintln!("Warning: Could not save snapshot: {e}");
    }
    if let Err(e) = counters.save() {
        eprintln!("Warning: Could not save counters: {e}");
    }

    println!();
    println!("{}", counters.summary());
    Ok(())
}

/// Advertisements the coordinator has already dealt with, whatever the outcome.
fn processed(coordinator: &Coordinator) -> u64 {
    let stats = coordinator.counters().stats();
    stats.accepted + stats.filtered + stats.dropped_malformed
}

/// Read JSON lines from `input` and push them into the source. Returns the
/// number of advertisements handed over.
fn spawn_reader(
    input: String,
    feeder: SourceFeeder,
    running: Arc<AtomicBool>,
) -> anyhow::Result<thread::JoinHandle<u64>> {
    let reader: Box<dyn BufRead + Send> = if input == "-" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let file = std::fs::File::open(PathBuf::from(&input))
            .map_err(|e| anyhow::anyhow!("could not open {input}: {e}"))?;
        Box::new(BufReader::new(file))
    };

    let handle = thread::Builder::new()
        .name("ble-activity-input".to_string())
        .spawn(move || {
            let mut pushed = 0;
            for (index, line) in reader.lines().enumerate() {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::error!("input read failed: {e}");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                let adv: Advertisement = match serde_json::from_str(&line) {
                    Ok(adv) => adv,
                    Err(e) => {
                        tracing::warn!(line = index + 1, "skipping unparsable advertisement: {e}");
                        continue;
                    }
                };

                if push_with_retry(&feeder, adv, &running) {
                    pushed += 1;
                } else {
                    break;
                }
            }
            pushed
        })?;
    Ok(handle)
}

/// Push one advertisement, waiting while the channel is full.
fn push_with_retry(feeder: &SourceFeeder, adv: Advertisement, running: &AtomicBool) -> bool {
    loop {
        match feeder.push(adv.clone()) {
            Ok(()) => return true,
            Err(SourceError::Backpressure) if running.load(Ordering::SeqCst) => {
                thread::sleep(Duration::from_millis(5));
            }
            Err(e) => {
                tracing::warn!("input stopped: {e}");
                return false;
            }
        }
    }
}

fn print_report(stats: &WindowStats, candidates: &[CandidateView]) {
    println!(
        "[{}] 60s: {} packets / {} devices | 5m: {} / {} | today: {} / {}",
        stats
            .computed_at
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "--:--:--".to_string()),
        stats.packets_last_60s,
        stats.unique_last_60s,
        stats.packets_last_5m,
        stats.unique_last_5m,
        stats.packets_today,
        stats.unique_today,
    );
    if let Some(last) = &stats.last_seen {
        println!(
            "  Last seen: {} ({}) at {}",
            last.device_id,
            last.display_name.as_deref().unwrap_or("unnamed"),
            last.observed_at.format("%H:%M:%S")
        );
    }
    print_candidates(candidates);
}

fn print_candidates(candidates: &[CandidateView]) {
    if candidates.is_empty() {
        println!("  No devices seen yet.");
        return;
    }
    println!(
        "  {:<4} {:<20} {:<16} {:>8} {:>8} {:>10}",
        "#", "Device", "Name", "Samples", "Signal", "Score"
    );
    for (i, candidate) in candidates.iter().enumerate() {
        let signal = candidate
            .last_signal
            .map(|dbm| format!("{dbm} dBm"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<4} {:<20} {:<16} {:>8} {:>8} {:>10.3}",
            i + 1,
            candidate.device_id,
            candidate.display_name.as_deref().unwrap_or("-"),
            candidate.sample_count,
            signal,
            candidate.score
        );
    }
}

fn cmd_status(limit: usize) -> anyhow::Result<()> {
    let config = load_config()?;

    println!("BLE Activity Status");
    println!("===================");
    println!();

    println!("Configuration:");
    println!("  Scanning mode: {}", config.scanning_mode);
    match config.filter_tag {
        Some(tag) => println!("  Filter tag: 0x{tag:04X}"),
        None => println!("  Filter tag: none"),
    }
    println!(
        "  Session duration: {}s",
        config.session_duration.as_secs()
    );
    println!("  Data path: {:?}", config.data_path);
    println!();

    let snapshot_path = config.snapshot_path();
    let counters = create_shared_counters_with_persistence(config.counters_path());
    let coordinator = Coordinator::with_parts(
        config,
        ChannelSource::new(),
        Arc::new(SystemClock),
        counters.clone(),
    )?;

    match coordinator.load_snapshot(&snapshot_path) {
        Ok(true) => {
            let session = coordinator.session_state();
            println!("Devices tracked: {}", coordinator.device_count());
            match (session.active, session.started_at) {
                (true, Some(started)) => println!("Session: active since {started}"),
                (false, Some(started)) => println!("Session: idle (last started {started})"),
                _ => println!("Session: idle"),
            }
            println!();
            println!("Top candidates:");
            print_candidates(&coordinator.ranked_candidates(limit));
        }
        Ok(false) => println!("No saved snapshot at {snapshot_path:?}"),
        Err(e) => eprintln!("Could not read snapshot: {e}"),
    }

    println!();
    println!("{}", counters.summary());
    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = load_config()?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })?;
    Ok(())
}
