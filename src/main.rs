use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use claudia::config::DEFAULT_PORT;
use claudia::coordinator::{self, CoordinatorConfig};
use claudia::{Agent, AgentOptions, CoreConfig};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "claudia",
    about = "Coordination core for multi-session agent workflows",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "CLAUDIA_LOG")]
    log: String,
}

#[derive(Subcommand)]
enum Command {
    /// Run the parallel-mode coordinator in the foreground
    Serve {
        #[arg(long, default_value_t = DEFAULT_PORT, env = "CLAUDIA_PORT")]
        port: u16,

        /// Shared state directory
        #[arg(long, default_value = ".agent-state")]
        state_dir: PathBuf,

        /// Session id of the main session that launched parallel mode
        #[arg(long)]
        main_session: Option<String>,
    },
    /// Reclaim sessions whose heartbeat has lapsed and release their tasks
    Cleanup {
        #[arg(long, default_value = ".agent-state")]
        state_dir: PathBuf,

        /// Heartbeat age in seconds past which a session is reclaimed
        #[arg(long, default_value_t = 180)]
        threshold_secs: u64,
    },
    /// Print current backlog and session status as JSON
    Status {
        #[arg(long, default_value = ".agent-state")]
        state_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(&args.log)
        .compact()
        .init();

    match args.command {
        Command::Serve {
            port,
            state_dir,
            main_session,
        } => {
            let mut cfg = CoordinatorConfig::new(CoreConfig::new(state_dir), port);
            cfg.main_session = main_session;
            coordinator::run(cfg).await?;
        }
        Command::Cleanup {
            state_dir,
            threshold_secs,
        } => {
            let agent = Agent::with_options(
                state_dir,
                AgentOptions {
                    session_id: Some("admin".to_string()),
                    ..AgentOptions::default()
                },
            )
            .await?;
            let reclaimed = agent
                .cleanup_stale_sessions(Duration::from_secs(threshold_secs))
                .await?;
            info!(count = reclaimed.len(), "cleanup finished");
            println!("{}", serde_json::to_string_pretty(&reclaimed)?);
        }
        Command::Status { state_dir } => {
            let agent = Agent::connect(state_dir).await?;
            let status = agent.get_status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}
