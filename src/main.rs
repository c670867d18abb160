use std::io;
use std::path::PathBuf;
use std::process;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hashbench::attempt::ProcessRunner;
use hashbench::config::{HarnessConfig, validate_labels};
use hashbench::discover;
use hashbench::display::{self, PlanEntry};
use hashbench::probe::DefaultProbe;
use hashbench::record::{self, ResultRecorder};
use hashbench::sweep::{self, SweepPlan};

#[derive(Parser)]
#[command(
    name = "hashbench",
    version,
    about = "Benchmark hash map programs and log the fastest of several attempts"
)]
struct Cli {
    /// Benchmark types to run, passed to each program verbatim
    /// (default: the configured list)
    bench_types: Vec<String>,

    /// Directory holding the benchmark programs and their .csv logs
    #[arg(long)]
    build_dir: Option<PathBuf>,

    /// Config file (default: hashbench.toml in this or a parent directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Show which programs would run without running or deleting anything
    #[arg(long)]
    plan: bool,

    /// Print the plan as JSON
    #[arg(long, requires = "plan")]
    json: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "hashbench=debug" } else { "hashbench=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = HarnessConfig::resolve(cli.config.as_deref())?;
    validate_labels("benchmark type", &cli.bench_types)?;
    let build_dir = cli.build_dir.clone().unwrap_or_else(|| config.build_dir.clone());
    let registry = config.registry();

    if cli.plan {
        let candidates = discover::inspect_candidates(&build_dir, &registry)?;
        let mut entries = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            let records = record::read_log(&candidate.log_path)?.len();
            entries.push(PlanEntry { candidate, records });
        }

        let output = if cli.json {
            display::format_plan_json(&entries)
        } else {
            display::format_plan(&entries, Utc::now())
        };
        println!("{}", output.trim_end());
        return Ok(());
    }

    let programs = discover::select_programs(&build_dir, &registry)?;
    info!(count = programs.len(), build_dir = %build_dir.display(), "selected programs");

    let bench_types = if cli.bench_types.is_empty() {
        config.sweep.bench_types.clone()
    } else {
        cli.bench_types
    };

    let plan = SweepPlan {
        bench_types,
        programs,
        schedule: config.schedule(),
        attempts: config.sweep.attempts,
    };

    let mut runner = ProcessRunner::new(&build_dir, config.timeout()?, DefaultProbe::default());
    let mut recorder = ResultRecorder::new(&build_dir, io::stdout().lock());

    let summary = sweep::run_sweep(&plan, &mut runner, &mut recorder)?;
    info!(
        recorded = summary.recorded,
        failed = summary.failed,
        attempts = summary.attempts,
        "sweep complete"
    );

    Ok(())
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{}", err);
        process::exit(1);
    }
}
