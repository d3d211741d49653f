mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lore::config::LoreConfig;

#[derive(Parser)]
#[command(name = "lore", version, about = "Local-first lore stores with remote sync")]
struct Cli {
    /// Target store (defaults to $LORE_STORE, then `default`)
    #[arg(long, global = true)]
    store: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage stores
    Store {
        #[command(subcommand)]
        action: cli::stores::StoreAction,
    },
    /// Synchronise with the remote (push then pull when no step is given)
    Sync {
        #[command(subcommand)]
        step: Option<cli::sync::SyncStep>,
    },
    /// Capture a piece of lore
    Add(cli::records::AddArgs),
    /// Search lore in one or more stores
    Search(cli::records::SearchArgs),
    /// Record feedback on lore by session reference or id
    Feedback(cli::records::FeedbackArgs),
    /// Show store statistics
    Stats {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Run diagnostics on local stores and the remote
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = LoreConfig::load()?;

    // Log to stderr so stdout stays clean for command output.
    let filter = EnvFilter::try_new(&config.log.level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let lore = config.build()?;
    let store = cli.store.as_deref();

    match cli.command {
        Command::Store { action } => cli::stores::run(&lore, action).await?,
        Command::Sync { step } => cli::sync::run(&lore, store, step).await?,
        Command::Add(args) => cli::records::add(&lore, store, args)?,
        Command::Search(args) => cli::records::search(&lore, store, args)?,
        Command::Feedback(args) => cli::records::feedback(&lore, store, args)?,
        Command::Stats { json } => cli::stats::stats(&lore, store, json)?,
        Command::Doctor => cli::doctor::doctor(&config, &lore, store).await?,
    }

    Ok(())
}
