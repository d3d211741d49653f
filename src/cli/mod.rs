pub mod doctor;
pub mod records;
pub mod stats;
pub mod stores;
pub mod sync;

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use lore::Error;

/// A stderr spinner for a remote operation. Call `finish_and_clear` when done.
pub fn spinner(message: impl Into<String>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("  {spinner} {msg} ({elapsed})")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.into());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// A token cancelled by Ctrl-C.
pub fn ctrl_c_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    cancel
}

/// Turn a library error into a CLI error, adding the next step for
/// configuration states.
pub fn explain(err: Error) -> anyhow::Error {
    let hint = match err.root() {
        Error::Offline => Some(
            "set LORE_URL and LORE_TOKEN, or [remote] url and token in ~/.lore/config.toml",
        ),
        Error::ModelMismatch { .. } => Some(
            "bootstrap into a fresh store with `lore sync bootstrap --store <new-id>`, \
             or migrate the local embeddings first; nothing was changed",
        ),
        _ => None,
    };
    match hint {
        Some(hint) => anyhow::anyhow!("{err}\n  hint: {hint}"),
        None => anyhow::Error::new(err),
    }
}

pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
