//! CLI `doctor` command: run diagnostics on local stores and the remote.

use anyhow::{Context, Result};

use lore::config::LoreConfig;
use lore::lore::META_EMBEDDING_MODEL;
use lore::store_id::StoreId;
use lore::Lore;

use super::{ctrl_c_token, format_bytes, spinner};

/// Check the named store (or every local store) and, when configured, the remote.
pub async fn doctor(config: &LoreConfig, lore: &Lore, store: Option<&str>) -> Result<()> {
    println!("Lore Health Report");
    println!("==================");
    println!();
    println!("Storage root:      {}", lore.registry().root().display());

    let ids: Vec<StoreId> = match store {
        Some(_) => vec![lore.resolve_store(store)?],
        None => lore.registry().list_local()?,
    };
    if ids.is_empty() {
        println!("No local stores yet. Run `lore add` or `lore sync bootstrap` to create one.");
    }

    let mut local_models = Vec::new();
    let mut failed = false;
    for id in &ids {
        println!();
        println!("Store {id}");
        if !lore.registry().exists(id) {
            println!("  not found at {}", lore.registry().db_path(id).display());
            continue;
        }

        let local = lore
            .registry()
            .open(id)
            .with_context(|| format!("failed to open store {id} (may be corrupt)"))?;
        let size = std::fs::metadata(local.path()).map(|m| m.len()).unwrap_or(0);
        let report = local.health().context("failed to run health check")?;
        let model = local.get_metadata(META_EMBEDDING_MODEL)?;

        println!("  Database:        {}", local.path().display());
        println!("  File size:       {}", format_bytes(size));
        println!("  Schema version:  {}", report.schema_version);
        println!("  Lore rows:       {}", report.lore_count);
        println!("  Queued feedback: {}", report.queue_count);
        println!(
            "  Embedding model: {}",
            if model.is_empty() { "(not set)" } else { model.as_str() }
        );
        if report.integrity_ok {
            println!("  Integrity check: PASSED");
        } else {
            failed = true;
            println!("  Integrity check: FAILED ({})", report.integrity_details);
        }
        if !model.is_empty() {
            local_models.push((id.clone(), model));
        }
    }

    println!();
    if !config.remote_configured() {
        println!("Remote:            not configured (offline)");
        println!("  Set LORE_URL and LORE_TOKEN to enable sync.");
    } else {
        println!("Remote:            {}", config.remote.url);
        let cancel = ctrl_c_token();
        let pb = spinner("checking remote health");
        let result = lore.engine().health(&cancel).await;
        pb.finish_and_clear();
        match result {
            Ok(health) => {
                println!("  Status:          {} (version {})", health.status, health.version);
                println!("  Embedding model: {}", health.embedding_model);
                for (id, model) in &local_models {
                    if model != &health.embedding_model {
                        println!("  WARNING: store {id} uses `{model}`; sync will be refused.");
                    }
                }
            }
            Err(e) => {
                failed = true;
                println!("  Unreachable:     {e}");
            }
        }
    }

    if failed {
        println!();
        println!("Recovery steps:");
        println!("  1. For a corrupt store, move its directory aside and run `lore sync bootstrap`.");
        println!("  2. For an unreachable remote, check LORE_URL, LORE_TOKEN and network access.");
    }

    Ok(())
}
