use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::{Value, json};
use syncpilot::config::AppConfig;
use syncpilot::context::AppContext;
use syncpilot::core::history::{HistoryRecord, TransferPrediction};
use syncpilot::core::transfer_engine::TransferEngineType;
use syncpilot::core::{Job, JobNotification};
use syncpilot::logging::{self, LogConfig};
use syncpilot::rpc::{OperationResult, RpcClient, RpcServer};
use tracing::info;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

#[derive(Parser)]
#[command(name = "syncpilot")]
#[command(about = "Run and watch rsync transfer jobs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Daemon address (defaults to the configured `rpc_bind`)
    #[arg(long, global = true)]
    rpc: Option<SocketAddr>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the job orchestrator and RPC server
    Daemon(ServerArgs),
    /// Daemon and job counts
    Status,
    /// All jobs, oldest first
    List,
    /// Register a transfer job
    Add {
        #[arg(long)]
        source: PathBuf,
        #[arg(long)]
        target: PathBuf,
        /// Delete source files after they transfer
        #[arg(long = "move")]
        is_move: bool,
        #[arg(long)]
        name: Option<String>,
        /// Start (or queue) the job right away
        #[arg(long)]
        start: bool,
    },
    Start { id: String },
    Pause { id: String },
    Resume { id: String },
    Stop { id: String },
    Restart { id: String },
    Remove { id: String },
    /// Recently finished transfers
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Estimate duration for a number of files from past transfers
    Predict { files: u64 },
    /// Explain an rsync error message
    Classify { text: String },
    /// Suggestions for moving one folder into another
    Recommend {
        #[arg(long)]
        source: PathBuf,
        #[arg(long)]
        target: PathBuf,
    },
    /// Stream job events until interrupted
    Watch,
}

#[derive(Args, Serialize)]
struct ServerArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    max_concurrent_jobs: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    rsync_binary: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    transfer_engine: Option<TransferEngineType>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    rpc_bind: Option<SocketAddr>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    verbose: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    json_logs: Option<bool>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.command {
        Commands::Daemon(args) => AppConfig::new(Some(args))?,
        _ => AppConfig::new(None::<&ServerArgs>)?,
    };

    match cli.command {
        Commands::Daemon(_) => run_daemon(config).await.context("Daemon failed"),
        command => {
            let client = RpcClient::new(cli.rpc.unwrap_or(config.rpc_bind));
            run_client(&client, command).await
        }
    }
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    logging::init(LogConfig {
        json: config.json_logs,
        verbose: config.verbose,
    });

    let bind = config.rpc_bind;
    info!(
        data_dir = %config.data_dir.display(),
        engine = ?config.transfer_engine,
        max_concurrent = config.max_concurrent_jobs,
        "Starting syncpilot daemon"
    );

    let (ctx, orchestrator) = AppContext::build(config);
    let orchestrator = tokio::spawn(orchestrator.run());
    let server = RpcServer::new(ctx, bind);

    tokio::select! {
        result = server.start() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received, shutting down");
            server.shutdown();
        }
    }

    // Open connections may still hold handles; give them a moment, then leave.
    drop(server);
    if tokio::time::timeout(SHUTDOWN_GRACE, orchestrator).await.is_err() {
        info!("Orchestrator still busy, exiting anyway");
    }
    Ok(())
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_job(job: &Job) {
    println!(
        "{}  {:<9} {:>3}%  {}  ({} -> {})",
        job.id,
        job.status,
        job.progress,
        job.name,
        job.source.display(),
        job.target.display()
    );
}

async fn job_operation(client: &RpcClient, method: &str, id: &str) -> Result<()> {
    let result: OperationResult = client.call(method, Some(json!({ "id": id }))).await?;
    if !result.ok {
        bail!(result.reason.unwrap_or_else(|| "rejected".to_string()));
    }
    match result.outcome {
        Some(outcome) => println!("ok ({})", outcome.as_str().unwrap_or_default()),
        None => println!("ok"),
    }
    Ok(())
}

async fn run_client(client: &RpcClient, command: Commands) -> Result<()> {
    match command {
        Commands::Daemon(_) => bail!("the daemon is not a client command"),
        Commands::Status => {
            let status: Value = client.call("daemon.status", None).await?;
            print_json(&status)?;
        }
        Commands::List => {
            let jobs: Vec<Job> = client.call("jobs.list", None).await?;
            if jobs.is_empty() {
                println!("No jobs");
            }
            jobs.iter().for_each(print_job);
        }
        Commands::Add {
            source,
            target,
            is_move,
            name,
            start,
        } => {
            let params = json!({
                "source": source,
                "target": target,
                "is_move": is_move,
                "name": name,
                "start": start,
            });
            let created: Value = client.call("jobs.create", Some(params)).await?;
            print_json(&created)?;
        }
        Commands::Start { id } => job_operation(client, "jobs.start", &id).await?,
        Commands::Pause { id } => job_operation(client, "jobs.pause", &id).await?,
        Commands::Resume { id } => job_operation(client, "jobs.resume", &id).await?,
        Commands::Stop { id } => job_operation(client, "jobs.stop", &id).await?,
        Commands::Restart { id } => job_operation(client, "jobs.restart", &id).await?,
        Commands::Remove { id } => job_operation(client, "jobs.remove", &id).await?,
        Commands::History { limit } => {
            let records: Vec<HistoryRecord> = client
                .call("history.recent", Some(json!({ "limit": limit })))
                .await?;
            for r in &records {
                println!(
                    "{}  {:<9} {} files  {}  {}",
                    r.recorded_at.format("%Y-%m-%d %H:%M"),
                    r.status,
                    r.file_count,
                    r.average_speed,
                    r.name
                );
            }
        }
        Commands::Predict { files } => {
            let prediction: Option<TransferPrediction> = client
                .call("history.predict", Some(json!({ "file_count": files })))
                .await?;
            match prediction {
                Some(p) => println!(
                    "About {}s (from {} past transfers)",
                    p.estimated_secs, p.samples
                ),
                None => println!("Not enough history to predict"),
            }
        }
        Commands::Classify { text } => {
            let classified: Value = client
                .call("errors.classify", Some(json!({ "text": text })))
                .await?;
            print_json(&classified)?;
        }
        Commands::Recommend { source, target } => {
            let advice: Value = client
                .call(
                    "optimizer.recommend",
                    Some(json!({ "source": source, "target": target })),
                )
                .await?;
            print_json(&advice)?;
        }
        Commands::Watch => {
            let mut events = client.subscribe().await?;
            loop {
                match events.next().await? {
                    JobNotification::JobChanged(job) => print_job(&job),
                    JobNotification::JobRemoved { id } => println!("{}  removed", id),
                    JobNotification::JobError { id, classified, .. } => {
                        println!("{}  error: {}", id, classified.title)
                    }
                    JobNotification::ProgressOutput { .. } => {}
                }
            }
        }
    }
    Ok(())
}
