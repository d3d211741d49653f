use anyhow::{Context, Result};

use lore::Lore;

use super::{explain, format_bytes};

/// Display store statistics in the terminal.
pub fn stats(lore: &Lore, store: Option<&str>, json: bool) -> Result<()> {
    let response = lore.open(store).and_then(|s| s.stats()).map_err(explain)?;

    if json {
        let out = serde_json::to_string_pretty(&response).context("failed to serialize stats")?;
        println!("{out}");
        return Ok(());
    }

    println!("Lore Statistics: {}", response.store);
    println!("{}", "=".repeat(40));
    println!("  Total lore:          {}", response.total_lore);
    println!("  Active:              {}", response.active_lore);
    println!("  Deleted:             {}", response.deleted_lore);
    println!("  Unsynced:            {}", response.unsynced_lore);
    println!("  Pending feedback:    {}", response.pending_feedback);
    println!();

    println!("By Category:");
    for (category, count) in &response.by_category {
        println!("  {:<14} {}", category, count);
    }
    println!();

    println!("Sync:");
    println!(
        "  Embedding model:     {}",
        response.embedding_model.as_deref().unwrap_or("(not set)")
    );
    println!(
        "  Last sync:           {}",
        response.last_sync.as_deref().unwrap_or("(never)")
    );
    if let Some(ref cursor) = response.sync_cursor {
        println!("  Cursor:              {cursor}");
    }
    println!();

    println!("Database size:         {}", format_bytes(response.db_size_bytes));
    if let Some(ref oldest) = response.oldest_lore {
        println!("Oldest lore:           {oldest}");
    }
    if let Some(ref newest) = response.newest_lore {
        println!("Newest lore:           {newest}");
    }

    Ok(())
}
