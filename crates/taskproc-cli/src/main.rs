//! taskproc CLI - runs the execution framework against a simulated cluster.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use taskproc_core::{PortRange, TaskConfig, TaskEvent};
use taskproc_scheduler::{ExecutionFramework, SchedulerConfig, StopPolicy};

mod sim;

use sim::{ClusterConfig, RunEnd, SimulatedCluster, SimulatedDriver};

/// taskproc - offer-based task scheduler
#[derive(Parser)]
#[command(name = "taskproc")]
#[command(about = "Run batches of tasks through the taskproc scheduler", long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run tasks from a file on a simulated cluster until they all end
    Run(RunArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// JSON file holding an array of task configs
    #[arg(short, long)]
    tasks: PathBuf,

    /// Framework name reported to the manager
    #[arg(long, default_value = "taskproc")]
    name: String,

    /// Number of simulated hosts
    #[arg(long, default_value_t = 3)]
    hosts: usize,

    /// CPUs per host
    #[arg(long, default_value_t = 4.0)]
    cpus: f64,

    /// Memory per host, in MB
    #[arg(long, default_value_t = 8192.0)]
    mem: f64,

    /// Disk per host, in MB
    #[arg(long, default_value_t = 10240.0)]
    disk: f64,

    /// Hosts (counted from the first) that never start their tasks
    #[arg(long, default_value_t = 0)]
    stuck_hosts: usize,

    /// Only host offers carrying this pool attribute are used
    #[arg(long)]
    pool: Option<String>,

    /// Report what would launch on the first offers, then stop
    #[arg(long)]
    dry_run: bool,

    /// Seconds a task may stay staging before its host is blacklisted
    #[arg(long, default_value_t = 240)]
    staging_timeout: u64,

    /// Seconds after registration during which offers are declined
    #[arg(long, default_value_t = 1)]
    reconcile_backoff: u64,

    /// Seconds a blacklisted host stays excluded
    #[arg(long, default_value_t = 3600)]
    blacklist_timeout: u64,

    /// Seconds each simulated task runs
    #[arg(long, default_value_t = 1.0)]
    task_duration: f64,

    /// Give up and kill remaining tasks after this many seconds
    #[arg(long, default_value_t = 600)]
    max_runtime: u64,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,

    /// Print Prometheus metrics when done
    #[arg(long)]
    metrics: bool,
}

impl RunArgs {
    fn scheduler_config(&self) -> SchedulerConfig {
        let mut config = SchedulerConfig::new(self.name.clone())
            .with_staging_timeout(Duration::from_secs(self.staging_timeout))
            .with_reconcile_backoff(Duration::from_secs(self.reconcile_backoff))
            .with_blacklist_timeout(Duration::from_secs(self.blacklist_timeout))
            .with_dry_run(self.dry_run)
            .with_stop_policy(StopPolicy::WhenDrained);
        if let Some(pool) = &self.pool {
            config = config.with_pool(pool.clone());
        }
        config
    }

    fn cluster_config(&self) -> ClusterConfig {
        ClusterConfig {
            hosts: self.hosts,
            cpus: self.cpus,
            mem: self.mem,
            disk: self.disk,
            ports: PortRange::new(31000, 31099),
            stuck_hosts: self.stuck_hosts,
            task_duration: Duration::from_secs_f64(self.task_duration.max(0.0)),
            max_runtime: Duration::from_secs(self.max_runtime),
            ..ClusterConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run(args) => run(args).await?,
    }

    Ok(())
}

async fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let contents = tokio::fs::read_to_string(&args.tasks).await?;
    let tasks: Vec<TaskConfig> = serde_json::from_str(&contents)?;

    let (driver, commands) = SimulatedDriver::new();
    let (framework, events) = ExecutionFramework::new(args.scheduler_config(), Arc::new(driver));

    for task in tasks {
        framework.enqueue(task).await?;
    }
    info!(
        tasks = framework.pending_len().await,
        hosts = args.hosts,
        "Starting simulated run"
    );

    let printer = tokio::spawn(print_events(events, args.json));
    let cluster = SimulatedCluster::new(args.cluster_config(), framework.clone(), commands);

    tokio::select! {
        result = cluster.run() => {
            if result? == RunEnd::TimedOut {
                warn!("Run timed out with work remaining");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            if let Err(e) = framework.shutdown().await {
                warn!(error = %e, "Shutdown could not reach every task");
            }
        }
    }

    if args.metrics {
        print!("{}", framework.metrics().await);
    }

    // Closing the event feed lets the printer finish.
    drop(framework);
    let summary = printer.await?;

    println!();
    println!(
        "{} succeeded, {} failed, {} unfinished",
        summary.succeeded,
        summary.failed,
        summary.launched.saturating_sub(summary.succeeded + summary.failed)
    );

    if summary.failed > 0 {
        return Err(format!("{} task(s) failed", summary.failed).into());
    }
    Ok(())
}

#[derive(Debug, Default)]
struct Summary {
    launched: usize,
    succeeded: usize,
    failed: usize,
}

async fn print_events(mut events: mpsc::Receiver<TaskEvent>, json: bool) -> Summary {
    let mut summary = Summary::default();
    let mut seen = std::collections::HashSet::new();

    while let Some(event) = events.recv().await {
        if seen.insert(event.task_id.clone()) {
            summary.launched += 1;
        }
        match event.success {
            Some(true) => summary.succeeded += 1,
            Some(false) => summary.failed += 1,
            None => {}
        }

        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "Failed to encode event"),
            }
        } else {
            print_event(&event);
        }
    }
    summary
}

fn print_event(event: &TaskEvent) {
    let task_id = event.task_id.as_str();
    let state = event.state.as_str();
    let host = event.slave_id.as_ref().map_or("-", |s| s.as_str());
    match &event.message {
        Some(message) => println!("{task_id:<48} {state:<14} {host} {message}"),
        None => println!("{task_id:<48} {state:<14} {host}"),
    }
}
