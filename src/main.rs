//! shardrun - Lightweight Batch Probe Runner
//!
//! Entry point for the CLI application. The same binary also serves as the
//! worker process, through the hidden `worker` subcommand.

use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use shardrun::config::{CliArgs, Command, RunArgs, RunConfig, WorkerArgs};
use shardrun::dashboard::Dashboard;
use shardrun::error::WorkerError;
use shardrun::orchestrator::Orchestrator;
use shardrun::plugin::PluginRegistry;
use shardrun::progress::{print_header, print_summary, LineLogger};
use shardrun::rundir::RunDir;
use shardrun::sharder::count_lines;
use shardrun::worker::{BoundedWorker, StdoutTelemetry};
use std::io;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit status after a second interrupt
const FORCED_EXIT: i32 = 130;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args = CliArgs::parse();

    match args.command {
        Some(Command::Plugins) => {
            list_plugins(&PluginRegistry::builtin());
            Ok(())
        }
        Some(Command::Worker(worker)) => {
            setup_logging(worker.verbose, true)?;
            run_worker(worker)
        }
        None => {
            setup_logging(args.run.verbose, false)?;
            run_scan(&args.run)
        }
    }
}

/// Orchestrator side: provision, shard, launch, consume, join
fn run_scan(args: &RunArgs) -> Result<()> {
    let config = RunConfig::from_args(args).context("Invalid configuration")?;

    // Fail on unknown plugin names before anything is written
    PluginRegistry::builtin()
        .resolve(&config.probe, Some(&config.callback))
        .context("Invalid configuration")?;

    let run_dir = RunDir::provision(config).context("Failed to provision run directory")?;
    let config = run_dir.config();
    let seeds = count_lines(&config.seed_file).context("Failed to read seed file")?;

    print_header(config, run_dir.path(), seeds);

    let orchestrator = Orchestrator::new().context("Failed to locate worker binary")?;
    install_interrupt_handler(orchestrator.shutdown_flag())?;

    let result = if config.dashboard {
        let mut dashboard = Dashboard::terminal(config.tail).with_shutdown(orchestrator.shutdown_flag());
        orchestrator.run(config, &mut dashboard)
    } else {
        let mut logger = LineLogger::stdout().with_shutdown(orchestrator.shutdown_flag());
        orchestrator.run(config, &mut logger)
    };
    let summary = result.context("Run failed")?;

    print_summary(&summary);

    if summary.interrupted {
        info!("Run was interrupted before completion");
    }
    if summary.abnormal_exits > 0 {
        warn!(workers = summary.abnormal_exits, "Some workers exited abnormally");
    }

    Ok(())
}

/// Worker side: probe one shard, telemetry on stdout
fn run_worker(args: WorkerArgs) -> Result<()> {
    let caps = PluginRegistry::builtin()
        .resolve(&args.probe, args.callback.as_deref())
        .context("Invalid worker configuration")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| WorkerError::Runtime {
            id: args.worker_id.clone(),
            reason: e.to_string(),
        })?;

    let worker = BoundedWorker::new(
        args.worker_id.clone(),
        args.pool_settings(),
        caps,
        Arc::new(StdoutTelemetry::new()),
    );
    install_interrupt_handler(worker.shutdown_flag())?;

    let report = runtime
        .block_on(worker.run(&args.shard))
        .with_context(|| format!("Worker {} failed", args.worker_id))?;

    if report.interrupted {
        info!(
            worker = %report.worker_id,
            completed = report.completed,
            total = report.total,
            "Worker interrupted"
        );
    }

    Ok(())
}

/// First Ctrl+C raises `flag`; a second one exits immediately
fn install_interrupt_handler(flag: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            std::process::exit(FORCED_EXIT);
        }
        eprintln!("\nInterrupt received, shutting down...");
    })
    .context("Failed to set signal handler")
}

fn list_plugins(registry: &PluginRegistry) {
    println!("{}", style("Probes:").bold());
    for (name, about) in registry.probes() {
        println!("  {:<14} {}", style(name).cyan(), about);
    }
    println!();
    println!("{}", style("Callbacks:").bold());
    for (name, about) in registry.callbacks() {
        println!("  {:<14} {}", style(name).cyan(), about);
    }
}

/// Logs go to stderr: a worker's stdout is its telemetry pipe, and the
/// orchestrator's stdout carries callback output.
fn setup_logging(verbose: bool, worker: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("shardrun=debug,warn")
    } else {
        EnvFilter::new("shardrun=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(!worker)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
