//! CLI `store` command: list, create, delete, and inspect stores.

use anyhow::Result;
use clap::Subcommand;

use lore::store_id::StoreId;
use lore::{Error, Lore};

use super::{ctrl_c_token, explain, format_bytes, spinner};

#[derive(Subcommand)]
pub enum StoreAction {
    /// List local stores, and remote ones when a remote is configured
    List {
        /// Only remote stores whose id starts with this prefix
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Create a store locally and, when online, on the remote
    Create {
        id: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Delete a store on the remote. The local copy is kept.
    Delete { id: String },
    /// Show local statistics and remote details for a store
    Info { id: Option<String> },
}

pub async fn run(lore: &Lore, action: StoreAction) -> Result<()> {
    let cancel = ctrl_c_token();
    match action {
        StoreAction::List { prefix } => {
            let local = lore.registry().list_local().map_err(explain)?;
            println!("Local stores ({}):", lore.registry().root().display());
            if local.is_empty() {
                println!("  (none)");
            }
            for id in &local {
                println!("  {id}");
            }

            if lore.engine().is_online() {
                let pb = spinner("listing remote stores");
                let result = lore.engine().list_stores(prefix.as_deref(), &cancel).await;
                pb.finish_and_clear();
                let remote = result.map_err(explain)?;
                println!();
                println!("Remote stores:");
                for summary in remote {
                    println!(
                        "  {:<32} {:>8} records  {}",
                        summary.id,
                        summary.record_count,
                        summary.description.as_deref().unwrap_or("")
                    );
                }
            }
        }
        StoreAction::Create { id, description } => {
            let id = StoreId::parse_for_creation(&id).map_err(explain)?;
            if lore.engine().is_online() {
                let pb = spinner(format!("creating {id}"));
                let result = lore
                    .engine()
                    .create_store(id.as_str(), description.as_deref(), &cancel)
                    .await;
                pb.finish_and_clear();
                result.map_err(explain)?;
                println!("Created remote store {id}");
            }
            lore.registry().open(&id).map_err(explain)?;
            println!("Local store {id} at {}", lore.registry().store_dir(&id).display());
        }
        StoreAction::Delete { id } => {
            let pb = spinner(format!("deleting {id}"));
            let result = lore.engine().delete_store(&id, &cancel).await;
            pb.finish_and_clear();
            result.map_err(explain)?;
            println!("Deleted remote store {id}");
            if let Ok(id) = StoreId::parse(&id) {
                if lore.registry().exists(&id) {
                    println!("Local copy kept at {}", lore.registry().store_dir(&id).display());
                }
            }
        }
        StoreAction::Info { id } => {
            let id = lore.resolve_store(id.as_deref()).map_err(explain)?;
            if lore.registry().exists(&id) {
                let stats = lore.registry().open(&id).and_then(|s| s.stats()).map_err(explain)?;
                println!("Local store {id}");
                println!("  Records:       {} active, {} deleted", stats.active_lore, stats.deleted_lore);
                println!("  Unsynced:      {}", stats.unsynced_lore);
                println!("  Size:          {}", format_bytes(stats.db_size_bytes));
            } else {
                println!("Local store {id}: not present");
            }

            if lore.engine().is_online() {
                let pb = spinner(format!("fetching {id}"));
                let result = lore.engine().store_info(id.as_str(), &cancel).await;
                pb.finish_and_clear();
                match result {
                    Ok(details) => {
                        println!("Remote store {id}");
                        println!(
                            "  Records:       {} active, {} deleted",
                            details.summary.record_count, details.deleted_count
                        );
                        if let Some(model) = details.embedding_model {
                            println!("  Model:         {model}");
                        }
                        if let Some(cursor) = details.latest_cursor {
                            println!("  Cursor:        {cursor}");
                        }
                    }
                    Err(Error::NotFound(_)) => println!("Remote store {id}: not found"),
                    Err(e) => return Err(explain(e)),
                }
            }
        }
    }
    Ok(())
}
