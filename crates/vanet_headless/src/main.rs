use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use vanet_core::clock::TICK_MS;
use vanet_core::scenario::{
    generate_random_vehicles, load_file, load_scenario, SchedulerConfig, SimSettings,
};
use vanet_core::test_helpers::grid_context_with;
use vanet_core::{SimContext, SimResult, TickScheduler};

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "vanet-headless",
    about = "Run a vehicular network simulation without a user interface",
    long_about = "Loads a scenario (or builds a street grid), fast-forwards the\n\
                  simulation to the requested time and prints a summary."
)]
struct Cli {
    /// Scenario file (JSON). Without one a street grid is generated.
    #[arg(long)]
    scenario: Option<PathBuf>,
    /// Junctions per side of the generated grid
    #[arg(long, default_value_t = 20)]
    grid: usize,
    /// Simulated time to reach, in milliseconds
    #[arg(long, default_value_t = 60_000)]
    until: u64,
    /// Worker threads (default: twice the available parallelism)
    #[arg(long)]
    workers: Option<usize>,
    /// Random vehicles to add on top of the scenario's own
    #[arg(long, default_value_t = 0)]
    random_vehicles: usize,
    /// Seed for random vehicles and pseudonyms
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Print the final summary as JSON
    #[arg(long)]
    json: bool,
    /// Debug-level logging (overridden by RUST_LOG)
    #[arg(long, short)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("tracing subscriber already installed");
    }
}

fn build_context(cli: &Cli) -> SimResult<SimContext> {
    let ctx = match &cli.scenario {
        Some(path) => {
            let mut data = load_file(path)?;
            data.settings.seed = cli.seed;
            let (ctx, report) = load_scenario(&data)?;
            for problem in &report.problems {
                warn!(problem = problem.as_str(), "scenario entity skipped");
            }
            ctx
        }
        None => {
            let size = cli.grid.max(2);
            let regions = (size / 10).max(1);
            info!(size, regions, "no scenario given; generating a street grid");
            grid_context_with(
                size,
                size,
                1000.0,
                regions,
                regions,
                SimSettings::default().with_seed(cli.seed),
            )
        }
    };
    if cli.random_vehicles > 0 {
        generate_random_vehicles(&ctx, cli.random_vehicles, cli.seed)?;
    }
    Ok(ctx)
}

fn run(cli: &Cli) -> SimResult<()> {
    let ctx = Arc::new(build_context(cli)?);
    let mut config = SchedulerConfig::default();
    if let Some(workers) = cli.workers {
        config = config.with_workers(workers);
    }
    let mut scheduler = TickScheduler::new(Arc::clone(&ctx), config)?;
    info!(
        vehicles = ctx.vehicle_count(),
        workers = scheduler.worker_count(),
        until = cli.until,
        "simulation starting"
    );

    let bar = ProgressBar::new(cli.until);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ms ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let started = Instant::now();
    scheduler.jump_to(cli.until);
    while !scheduler.wait_for_idle(Duration::from_millis(100)) {
        bar.set_position(scheduler.now().min(cli.until));
    }
    bar.set_position(scheduler.now().min(cli.until));
    bar.finish();
    let elapsed = started.elapsed();

    if let Some(fault) = scheduler.take_fault() {
        scheduler.shutdown();
        return Err(fault);
    }
    let timings = scheduler.timings();
    scheduler.shutdown();

    let snapshot = ctx.snapshot();
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&snapshot.telemetry)?);
        return Ok(());
    }
    let summary = snapshot.telemetry;
    let simulated = Duration::from_millis(snapshot.time);
    println!("simulated {:.1}s in {:.2}s wall clock", simulated.as_secs_f64(), elapsed.as_secs_f64());
    println!(
        "vehicles: {} total, {} still driving",
        snapshot.vehicles.len(),
        snapshot.active_vehicles()
    );
    println!("ticks:             {} ({} ms each)", summary.ticks, TICK_MS);
    println!("beacons sent:      {}", summary.beacons_sent);
    println!("beacons received:  {}", summary.beacons_received);
    println!("messages sent:     {}", summary.messages_sent);
    println!("messages received: {}", summary.messages_delivered);
    println!("jams reported:     {}", summary.jams_reported);
    println!("reroutes:          {}", summary.reroutes);
    println!("route failures:    {}", summary.route_failures);
    println!("pseudonym changes: {}", summary.pseudonym_changes);
    println!("arrivals:          {}", summary.arrivals);
    println!("events fired:      {}", summary.events_fired);
    for line in timings.summary_lines() {
        println!("{line}");
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "simulation failed");
            ExitCode::FAILURE
        }
    }
}
