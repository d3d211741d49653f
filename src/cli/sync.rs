//! CLI `sync` command: bootstrap, push, pull, or push-then-pull.

use anyhow::Result;
use clap::Subcommand;

use lore::remote::Cursor;
use lore::sync::PushReport;
use lore::Lore;

use super::{ctrl_c_token, explain, spinner};

#[derive(Subcommand)]
pub enum SyncStep {
    /// Replace the local store with the remote's full state
    Bootstrap,
    /// Send local changes to the remote
    Push,
    /// Apply remote changes since the last pull
    Pull {
        /// Start from this cursor instead of the saved one
        #[arg(long)]
        since: Option<String>,
    },
}

pub async fn run(lore: &Lore, store: Option<&str>, step: Option<SyncStep>) -> Result<()> {
    let id = lore.resolve_store(store).map_err(explain)?;
    let cancel = ctrl_c_token();

    match step {
        Some(SyncStep::Bootstrap) => {
            let pb = spinner(format!("bootstrapping {id}"));
            let result = lore.bootstrap(Some(id.as_str()), &cancel).await;
            pb.finish_and_clear();
            let report = result.map_err(explain)?;
            println!(
                "Bootstrapped {id}: {} records (embedding model {})",
                report.records, report.embedding_model
            );
            if let Some(cursor) = report.cursor {
                println!("  Cursor:        {cursor}");
            }
        }
        Some(SyncStep::Push) => {
            let pb = spinner(format!("pushing {id}"));
            let result = lore.push(Some(id.as_str()), &cancel).await;
            pb.finish_and_clear();
            print_push(&id.to_string(), &result.map_err(explain)?);
        }
        Some(SyncStep::Pull { since }) => {
            let pb = spinner(format!("pulling {id}"));
            let since = since.filter(|s| !s.trim().is_empty()).map(Cursor::new);
            let result = lore.pull(Some(id.as_str()), since, &cancel).await;
            pb.finish_and_clear();
            let report = result.map_err(explain)?;
            println!(
                "Pulled {id}: {} pages, {} upserted, {} deleted",
                report.pages, report.upserted, report.deleted
            );
        }
        None => {
            let pb = spinner(format!("syncing {id}"));
            let result = lore.sync(Some(id.as_str()), &cancel).await;
            pb.finish_and_clear();
            let report = result.map_err(explain)?;
            print_push(&id.to_string(), &report.push);
            println!(
                "Pulled {id}: {} pages, {} upserted, {} deleted",
                report.pull.pages, report.pull.upserted, report.pull.deleted
            );
        }
    }
    Ok(())
}

fn print_push(id: &str, report: &PushReport) {
    if report.pushed == 0 {
        println!("Pushed {id}: nothing to push");
        return;
    }
    println!(
        "Pushed {id}: {} changes, {} accepted, {} merged, {} rejected",
        report.pushed,
        report.accepted,
        report.merged,
        report.rejected.len()
    );
    for rejected in &report.rejected {
        println!("  rejected {}: {}", rejected.id, rejected.message);
    }
}
