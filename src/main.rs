//! Judgments-Harvester main entry point
//!
//! This is the command-line interface for running one harvest shard.

use anyhow::{anyhow, Context};
use clap::Parser;
use judgments_harvester::checkpoint::{CheckpointKey, Tracker};
use judgments_harvester::config::{load_config_with_hash, Config};
use judgments_harvester::harvest::{EngineSettings, RunSummary, TraversalEngine};
use judgments_harvester::output;
use judgments_harvester::partition::{ShardSpec, WindowPlanner};
use judgments_harvester::sink::{ArtifactStore, DatabaseSink, SinkGuard};
use judgments_harvester::source::{CommandSolver, PortalClient, RetryPolicy, RetryingSource};
use judgments_harvester::storage::{open_storage, CheckpointStore, RunLog, RunStatus};
use judgments_harvester::HarvestError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Judgments-Harvester: a resumable, sharded judgment portal harvester
///
/// Each process harvests one shard of the portal's year range. Progress is
/// checkpointed after every step, so re-running the same command resumes an
/// interrupted shard where it stopped.
#[derive(Parser, Debug)]
#[command(name = "judgments-harvester")]
#[command(version = "1.0.0")]
#[command(about = "A resumable, sharded judgment portal harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Number of cooperating shards the year range is divided into
    #[arg(long, value_name = "N")]
    shard_count: usize,

    /// This process's shard, from 1 to the shard count
    #[arg(long, value_name = "I")]
    shard_index: usize,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Discard this shard's checkpoint and start over
    #[arg(long)]
    fresh: bool,

    /// Validate config and shard parameters and show the plan without harvesting
    #[arg(long, conflicts_with_all = ["status", "fresh"])]
    dry_run: bool,

    /// Show the shard's checkpoint and stored records and exit
    #[arg(long, conflicts_with_all = ["dry_run", "fresh"])]
    status: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    let shard =
        ShardSpec::new(cli.shard_count, cli.shard_index).context("invalid shard parameters")?;
    let key = CheckpointKey::new(config.portal.state_code.clone(), shard.index);

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(&config, &shard, &key)
    } else if cli.status {
        handle_status(&config, &key)
    } else {
        handle_harvest(&config, &config_hash, shard, key, cli.fresh).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("judgments_harvester=info,warn"),
            1 => EnvFilter::new("judgments_harvester=debug,info"),
            2 => EnvFilter::new("judgments_harvester=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be harvested
fn handle_dry_run(config: &Config, shard: &ShardSpec, key: &CheckpointKey) -> anyhow::Result<()> {
    println!("=== Judgments-Harvester Dry Run ===\n");

    println!("Portal:");
    println!("  Base URL: {}", config.portal.base_url);
    println!("  State code: {}", config.portal.state_code);
    println!("  Court: {}", config.portal.court_name);
    println!("  Page size: {}", config.portal.page_size);
    println!("  Batch size: {}", config.portal.batch_size);

    println!("\nSession:");
    println!(
        "  CAPTCHA command: {} {}",
        config.session.captcha_command,
        config.session.captcha_args.join(" ")
    );
    println!(
        "  Verification attempts: {}",
        config.session.max_verification_attempts
    );

    println!("\nRetry:");
    println!("  Max attempts: {}", config.retry.max_attempts);
    println!("  Strategy: {:?}", config.retry.strategy);

    println!("\nPacing:");
    println!("  Between batches: {}ms", config.pacing.inter_batch_delay_ms);
    println!("  Between windows: {}ms", config.pacing.window_delay_ms);

    println!("\nPlanner:");
    println!("  Non-sitting days: {}", config.planner.non_sitting_days);
    println!("  Window budget: {}", config.planner.window_budget);

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Downloads: {}", config.output.download_dir);
    println!("  Artifacts: {}", config.output.artifact_dir);

    println!("\nShard {}/{} (checkpoint key {})\n", shard.index, shard.count, key);

    let db_path = Path::new(&config.output.database_path);
    let checkpoint = if db_path.exists() {
        open_storage(db_path)?.load_shard_state(key)?
    } else {
        None
    };

    match checkpoint {
        Some(state) => {
            if state.shard_count != shard.count {
                println!(
                    "! Checkpoint was partitioned for {} shards; this run would be refused",
                    state.shard_count
                );
            }
            let layout = EngineSettings::from_config(config).layout();
            if let Some(stored) = state
                .layout
                .filter(|stored| *stored != layout && !state.completed)
            {
                println!(
                    "! Checkpoint was recorded with {}; this run would be refused (use --fresh)",
                    stored
                );
            }
            let planner = WindowPlanner::from_config(&config.planner);
            output::print_plan(
                &output::plan_years(&state, &planner),
                Some(state.current_year_index),
            );
            println!("Resume position: {}", state.position());
        }
        None => println!("No checkpoint yet; years will be fetched from the portal on first run"),
    }

    println!("\n✓ Configuration is valid");

    Ok(())
}

/// Handles the --status mode: shows the shard's checkpoint and records
fn handle_status(config: &Config, key: &CheckpointKey) -> anyhow::Result<()> {
    let db_path = Path::new(&config.output.database_path);
    println!("Database: {}\n", db_path.display());

    if !db_path.exists() {
        println!("No database yet; shard {} has not run", key);
        return Ok(());
    }

    let storage = open_storage(db_path)?;
    let planner = WindowPlanner::from_config(&config.planner);
    let status = output::load_status(&storage, key, &planner, 10)?;
    output::print_status(&status);

    Ok(())
}

/// How the harvest loop ended
enum Ending {
    Finished(Result<RunSummary, HarvestError>),
    Interrupted,
}

/// Handles the main harvest operation
async fn handle_harvest(
    config: &Config,
    config_hash: &str,
    shard: ShardSpec,
    key: CheckpointKey,
    fresh: bool,
) -> anyhow::Result<()> {
    let db_path = Path::new(&config.output.database_path);

    // Sink and stores are acquired before any network activity
    let artifacts = ArtifactStore::new(
        &config.output.artifact_dir,
        config.output.artifact_base_url.clone(),
    );
    let sink = SinkGuard::new(
        DatabaseSink::open(db_path, artifacts).context("failed to open the record sink")?,
    );

    let mut run_log = open_storage(db_path).context("failed to open the run log")?;
    let checkpoints = open_storage(db_path).context("failed to open the checkpoint store")?;

    let settings = EngineSettings::from_config(config);
    let layout = settings.layout();
    let tracker = if fresh {
        tracing::info!("Starting fresh harvest of shard {}", key);
        Tracker::open_fresh(checkpoints, &key, &shard, layout)?
    } else {
        Tracker::open(checkpoints, &key, &shard, layout)?.0
    };

    let run_id = run_log.create_run(&key.to_string(), config_hash)?;

    let solver = Arc::new(CommandSolver::new(
        config.session.captcha_command.clone(),
        config.session.captcha_args.clone(),
    ));
    let portal = PortalClient::from_config(config, solver)?;
    let source = RetryingSource::new(portal, RetryPolicy::from_config(&config.retry));

    let mut engine = TraversalEngine::new(
        source,
        sink.handle(),
        tracker,
        shard,
        settings,
    );

    let ending = tokio::select! {
        result = engine.run() => Ending::Finished(result),
        _ = tokio::signal::ctrl_c() => Ending::Interrupted,
    };

    match ending {
        Ending::Finished(Ok(summary)) => {
            run_log.finish_run(run_id, RunStatus::Completed)?;
            sink.release()?;
            tracing::info!("Harvest of shard {} completed", key);
            output::print_run_summary(&summary);
            Ok(())
        }
        Ending::Finished(Err(e)) => {
            let error = anyhow!(e);
            tracing::error!(
                "Harvest of shard {} failed at {}: {:#}",
                key,
                engine.tracker().position(),
                error
            );
            if let Err(log_error) = run_log.finish_run(run_id, RunStatus::Failed) {
                tracing::error!("Failed to record run {} as failed: {}", run_id, log_error);
            }
            drop(sink);
            Err(error.context(format!("harvest of shard {} failed", key)))
        }
        Ending::Interrupted => {
            tracing::warn!(
                "Interrupted; shard {} will resume at {}",
                key,
                engine.tracker().position()
            );
            run_log.finish_run(run_id, RunStatus::Interrupted)?;
            sink.release()?;
            output::print_run_summary(engine.summary());
            Ok(())
        }
    }
}
