use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use sandcall_supervisor::SupervisorConfig;
use tracing_subscriber::{EnvFilter, fmt};

mod scenario;

use scenario::Scenario;

#[derive(Parser)]
#[command(name = "sandcall", about = "sandcall supervisor tools", version)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a supervisor config file and print the effective settings
    CheckConfig {
        /// Config file (defaults to ~/.sandcall/sandcall.toml)
        path: Option<PathBuf>,
    },
    /// Run a scripted call chain against simulated sandboxes
    Simulate {
        /// Scenario TOML file
        scenario: PathBuf,

        /// Seconds to wait for the reply
        #[arg(long, default_value_t = 30)]
        wait_secs: u64,
    },
}

fn init_logging(json: bool) {
    // Logs go to stderr; stdout carries the command's JSON output.
    let builder = fmt()
        .with_env_filter(EnvFilter::from_env("SANDCALL_LOG"))
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json);

    match cli.command {
        Command::CheckConfig { path } => {
            let path = path.unwrap_or_else(SupervisorConfig::default_path);
            let config = SupervisorConfig::from_file(&path)?;
            tracing::info!(path = %path.display(), "Config OK");
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Simulate {
            scenario,
            wait_secs,
        } => {
            let loaded = Scenario::from_file(&scenario)?;
            let report = loaded.run(Duration::from_secs(wait_secs)).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.reply.is_error() {
                bail!("call chain failed");
            }
        }
    }
    Ok(())
}
