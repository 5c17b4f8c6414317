mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "retrace",
    version,
    about = "Locate and verify recorded web steps against page snapshots"
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Config file (defaults to ./retrace.yaml, then ~/.retrace/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Build a locator bundle for the first element matching a CSS selector
    Extract {
        /// Page snapshot or snapshot timeline (JSON)
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long)]
        selector: String,
    },
    /// Resolve a locator bundle (or a recorded step's bundle)
    Resolve {
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long)]
        bundle: PathBuf,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Evaluate a success condition
    Verify {
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long)]
        condition: PathBuf,
    },
    /// Replay recorded steps without performing any action
    Replay {
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long)]
        steps: PathBuf,
        /// Keep going after a failed step
        #[arg(long)]
        keep_going: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays parseable with --json.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = commands::load_config(args.config.as_deref()).await?;

    let ok = match args.command {
        Command::Extract { snapshot, selector } => {
            commands::extract(&snapshot, &selector, args.json).await?
        }
        Command::Resolve {
            snapshot,
            bundle,
            timeout_ms,
        } => commands::resolve(&config, &snapshot, &bundle, timeout_ms, args.json).await?,
        Command::Verify {
            snapshot,
            condition,
        } => commands::verify(&config, &snapshot, &condition, args.json).await?,
        Command::Replay {
            snapshot,
            steps,
            keep_going,
        } => {
            let mut config = config;
            if keep_going {
                config.replay.stop_on_failure = false;
            }
            commands::replay(config, &snapshot, &steps, args.json).await?
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
