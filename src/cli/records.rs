//! CLI `add`, `search` and `feedback` commands.

use anyhow::{Context, Result};
use clap::Args;

use lore::lore::{Category, FeedbackOutcome, NewLore, SearchFilter};
use lore::service::LoreHit;
use lore::store_id::StoreId;
use lore::Lore;

use super::explain;

#[derive(Args)]
pub struct AddArgs {
    /// The lore itself (at most 4000 characters)
    pub content: String,
    #[arg(long, short)]
    pub category: Category,
    /// Where this applies, e.g. a module or file
    #[arg(long)]
    pub context: Option<String>,
    /// Initial confidence in [0, 1]
    #[arg(long)]
    pub confidence: Option<f64>,
    /// Identifier of the capturing source
    #[arg(long)]
    pub source: Option<String>,
}

#[derive(Args)]
pub struct SearchArgs {
    /// Substring to match against content and context
    pub text: Option<String>,
    #[arg(long, short)]
    pub category: Option<Category>,
    #[arg(long, default_value_t = 0.0)]
    pub min_confidence: f64,
    #[arg(long, short = 'n', default_value_t = 20)]
    pub limit: usize,
    /// Search these stores instead of `--store`; results are merged
    #[arg(long = "in", value_name = "STORE")]
    pub stores: Vec<String>,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct FeedbackArgs {
    /// helpful, not_relevant, or incorrect
    pub outcome: FeedbackOutcome,
    /// Session references (L1, L2, ...) or record ids
    #[arg(required = true)]
    pub targets: Vec<String>,
}

pub fn add(lore: &Lore, store: Option<&str>, args: AddArgs) -> Result<()> {
    let new = NewLore {
        content: args.content,
        context: args.context,
        category: args.category,
        confidence: args.confidence,
        source_id: args.source,
    };
    let hit = lore.capture(store, new).map_err(explain)?;
    println!("{} {} [{}] in {}", hit.reference, hit.record.id, hit.record.category, hit.store);
    Ok(())
}

pub fn search(lore: &Lore, store: Option<&str>, args: SearchArgs) -> Result<()> {
    let filter = SearchFilter {
        text: args.text,
        category: args.category,
        min_confidence: args.min_confidence,
        limit: args.limit,
    };

    let hits = if args.stores.is_empty() {
        lore.query(store, &filter).map_err(explain)?
    } else {
        let stores = args
            .stores
            .iter()
            .map(|s| StoreId::parse(s))
            .collect::<Result<Vec<_>, _>>()
            .map_err(explain)?;
        lore.query_stores(&stores, &filter).map_err(explain)?
    };

    if args.json {
        let json = serde_json::to_string_pretty(&hits).context("failed to serialize results")?;
        println!("{json}");
        return Ok(());
    }

    if hits.is_empty() {
        println!("No lore found.");
        return Ok(());
    }
    for hit in &hits {
        print_hit(hit);
    }
    Ok(())
}

fn print_hit(hit: &LoreHit) {
    let record = &hit.record;
    println!(
        "{:<5} {:.2}  [{}] {}",
        hit.reference, record.confidence, record.category, record.content
    );
    if let Some(context) = &record.context {
        println!("      context: {context}");
    }
    println!("      {} in {}", record.id, hit.store);
}

pub fn feedback(lore: &Lore, store: Option<&str>, args: FeedbackArgs) -> Result<()> {
    let results = lore
        .feedback(store, &args.targets, args.outcome)
        .map_err(explain)?;
    for result in results {
        println!(
            "{} ({}): confidence {:.2} -> {:.2}, validated {} times",
            result.target,
            result.store,
            result.applied.previous_confidence,
            result.applied.confidence,
            result.applied.validation_count
        );
    }
    Ok(())
}
