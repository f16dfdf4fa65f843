use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use resmgr::config::{parse_dir_list, BatchManagerKind, JobQueueKind, ManagerConfig, MonitorKind};
use resmgr::mapping;
use resmgr::scheduler::{JobSpec, SelectionPolicy};
use resmgr::shutdown::install_shutdown_handler;
use resmgr::ResourceManager;

#[derive(Parser, Debug)]
#[command(name = "resmgr")]
#[command(version)]
#[command(about = "A cluster resource manager with LRU job scheduling")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the resource manager
    Server(ServerArgs),

    /// Print the queue-to-node mapping loaded from the given directories
    Mapping(MappingArgs),
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Directories holding node definition files (comma-separated paths or file:// URIs)
    #[arg(long, env = "RESMGR_NODES_DIRS", default_value = "")]
    nodes_dirs: String,

    /// Directories holding queue mapping files (comma-separated paths or file:// URIs)
    #[arg(long, env = "RESMGR_QUEUES_DIRS", default_value = "")]
    queues_dirs: String,

    /// Seconds between scheduling attempts
    #[arg(long, env = "RESMGR_WAIT_SECONDS", default_value = "20")]
    wait_seconds: u64,

    /// Upper bound on a single dispatch in milliseconds, 0 to wait indefinitely
    #[arg(long, env = "RESMGR_DISPATCH_TIMEOUT_MS", default_value = "60000")]
    dispatch_timeout_ms: u64,

    /// Node selection policy: remaining-capacity or committed-load
    #[arg(long, env = "RESMGR_SELECTION_POLICY", default_value = "remaining-capacity")]
    policy: SelectionPolicy,

    // === Component Options ===
    /// Monitor implementation: assignment, feed or queue-mux
    #[arg(long, env = "RESMGR_MONITOR", default_value = "assignment")]
    monitor: String,

    /// JSON file of node reports read by the feed monitor
    #[arg(long, env = "RESMGR_FEED_PATH")]
    feed_path: Option<PathBuf>,

    /// Milliseconds between feed polls
    #[arg(long, env = "RESMGR_FEED_INTERVAL_MS", default_value = "5000")]
    feed_interval_ms: u64,

    /// TOML file naming the backend monitor of each queue, for queue-mux
    #[arg(long, env = "RESMGR_BACKENDS_PATH")]
    backends_path: Option<PathBuf>,

    /// Batch manager implementation
    #[arg(long, env = "RESMGR_BATCH_MANAGER", default_value = "process")]
    batch_manager: BatchManagerKind,

    /// Job queue implementation
    #[arg(long, env = "RESMGR_JOB_QUEUE", default_value = "fifo")]
    job_queue: JobQueueKind,

    /// Maximum number of queued jobs
    #[arg(long, env = "RESMGR_JOB_QUEUE_CAPACITY", default_value = "1000")]
    job_queue_capacity: usize,

    /// JSON job files to submit once the manager is up
    #[arg(long = "job")]
    jobs: Vec<PathBuf>,
}

impl ServerArgs {
    fn into_config(self) -> Result<ManagerConfig, Box<dyn std::error::Error>> {
        let monitor = MonitorKind::parse(
            &self.monitor,
            self.feed_path,
            self.feed_interval_ms,
            self.backends_path,
        )?;
        Ok(ManagerConfig {
            wait_seconds: self.wait_seconds,
            dispatch_timeout_ms: (self.dispatch_timeout_ms > 0).then_some(self.dispatch_timeout_ms),
            selection_policy: self.policy,
            monitor,
            batch_manager: self.batch_manager,
            job_queue: self.job_queue,
            job_queue_capacity: self.job_queue_capacity,
            nodes_dirs: parse_dir_list(&self.nodes_dirs),
            queues_dirs: parse_dir_list(&self.queues_dirs),
        })
    }
}

// =============================================================================
// Mapping Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct MappingArgs {
    /// Directories holding queue mapping files (comma-separated paths or file:// URIs)
    #[arg(long, env = "RESMGR_QUEUES_DIRS")]
    queues_dirs: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "json")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Serialize)]
struct MappingOutput {
    queues: BTreeMap<String, Vec<String>>,
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let jobs = args.jobs.clone();
    let config = args.into_config()?;

    tracing::info!(
        nodes_dirs = ?config.nodes_dirs,
        queues_dirs = ?config.queues_dirs,
        wait_seconds = config.wait_seconds,
        policy = %config.selection_policy,
        monitor = ?config.monitor,
        job_queue_capacity = config.job_queue_capacity,
        "Starting resource manager"
    );

    let manager = ResourceManager::from_config(config);
    let shutdown = install_shutdown_handler();

    for path in jobs {
        let text = tokio::fs::read_to_string(&path).await?;
        let spec: JobSpec = serde_json::from_str(&text)
            .map_err(|e| format!("invalid job file {}: {}", path.display(), e))?;
        match manager.submit_job(spec.job, spec.input).await {
            Ok(job_id) => tracing::info!(job_id = %job_id, path = %path.display(), "Submitted job from file"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to submit job from file"),
        }
    }

    manager.run(shutdown).await?;
    Ok(())
}

// =============================================================================
// Mapping Command
// =============================================================================

fn print_mapping(args: MappingArgs) -> Result<(), Box<dyn std::error::Error>> {
    let dirs = parse_dir_list(&args.queues_dirs);
    let queues: BTreeMap<String, Vec<String>> =
        mapping::load_queue_mapping(&dirs).into_iter().collect();

    match args.output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&MappingOutput { queues })?);
        }
        OutputFormat::Table => {
            println!("{:<24} NODES", "QUEUE");
            for (queue, nodes) in &queues {
                println!("{:<24} {}", queue, nodes.join(", "));
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Mapping(mapping_args) => {
            print_mapping(mapping_args)?;
        }
    }

    Ok(())
}
