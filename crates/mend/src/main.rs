mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mend", version, about = "Run generated browser tests and repair them until they pass")]
struct Args {
    /// Configuration file (defaults to ./mend.yaml, then ~/.mend/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a script, repairing and retrying on failure
    Run {
        /// Script to execute
        #[arg(long)]
        script: PathBuf,
        /// Project directory the runner executes in
        #[arg(long)]
        work_dir: PathBuf,
        /// Show the browser window
        #[arg(long)]
        visible: bool,
        /// Recorder action history (JSON array)
        #[arg(long)]
        recording: Option<PathBuf>,
        /// Environment override passed to the runner, KEY=VALUE
        #[arg(long = "env", value_parser = commands::parse_env_pair)]
        env: Vec<(String, String)>,
        /// Runner timeout override in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Classify a saved runner log
    Classify {
        log_file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// List replacement candidates for a failing selector
    Candidates {
        #[arg(long)]
        selector: String,
        /// Runner log to mine for suggestions
        #[arg(long)]
        log: Option<PathBuf>,
        /// Recorder action history (JSON array)
        #[arg(long)]
        recording: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries results.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mend=info,mend_engine=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = commands::load_config(args.config.as_deref()).await?;

    match args.command {
        Command::Run {
            script,
            work_dir,
            visible,
            recording,
            env,
            timeout,
            json,
        } => {
            let options = commands::RunOptions {
                script,
                work_dir,
                visible,
                recording,
                env: env.into_iter().collect(),
                timeout,
                json,
            };
            let success = commands::run(config, options).await?;
            if !success {
                std::process::exit(1);
            }
        }
        Command::Classify { log_file, json } => {
            let matched = commands::classify(&log_file, json).await?;
            if !matched {
                std::process::exit(2);
            }
        }
        Command::Candidates {
            selector,
            log,
            recording,
        } => commands::candidates(&config, &selector, log.as_deref(), recording.as_deref()).await?,
    }
    Ok(())
}
