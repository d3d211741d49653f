//! Error taxonomy shared by the store, the remote client and the sync engine.

use std::fmt;

/// Failures inside a local store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("corrupt data: {0}")]
    Corrupt(String),
    #[error("lock poisoned: {0}")]
    Poisoned(&'static str),
    #[error("blocking task failed: {0}")]
    Task(String),
}

/// Where in a sync run a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    HealthCheck,
    ModelCheck,
    Snapshot,
    Replace,
    SaveModel,
    SaveLastSync,
    CollectChanges,
    Push,
    MarkSynced,
    Delta,
    ApplyDelta,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HealthCheck => "health check",
            Self::ModelCheck => "embedding model check",
            Self::Snapshot => "snapshot download",
            Self::Replace => "snapshot replace",
            Self::SaveModel => "embedding model update",
            Self::SaveLastSync => "last sync update",
            Self::CollectChanges => "collect local changes",
            Self::Push => "push",
            Self::MarkSynced => "mark synced",
            Self::Delta => "delta fetch",
            Self::ApplyDelta => "delta apply",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("offline: no remote sync service is configured (set LORE_URL and LORE_TOKEN)")]
    Offline,

    #[error(
        "embedding model mismatch: local store uses `{local}` but the remote uses `{remote}`; \
         re-bootstrap into a fresh store or migrate the local embeddings before syncing"
    )]
    ModelMismatch { local: String, remote: String },

    #[error("invalid store id `{id}`: {reason}")]
    InvalidStoreId { id: String, reason: String },

    #[error("store id `{0}` is reserved and cannot be created or deleted")]
    ReservedStoreId(String),

    #[error("{operation} failed{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Remote {
        operation: &'static str,
        status: Option<u16>,
        message: String,
    },

    #[error("local storage error: {0}")]
    LocalIo(#[from] StoreError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("{operation} cancelled")]
    Cancelled { operation: &'static str },

    #[error("{phase} failed{}: {source}", if *mutated { " after local changes were committed" } else { "" })]
    Phase {
        phase: Phase,
        mutated: bool,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn at(self, phase: Phase, mutated: bool) -> Self {
        Self::Phase {
            phase,
            mutated,
            source: Box::new(self),
        }
    }

    /// The underlying error with any phase context removed.
    pub fn root(&self) -> &Error {
        match self {
            Self::Phase { source, .. } => source.root(),
            other => other,
        }
    }

    /// The sync phase that failed, if the error came from the engine.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Phase { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Whether local state had already been changed when the error happened.
    pub fn mutated(&self) -> bool {
        matches!(self, Self::Phase { mutated: true, .. })
    }

    /// HTTP status reported by the remote, if any.
    pub fn status(&self) -> Option<u16> {
        match self.root() {
            Self::Remote { status, .. } => *status,
            _ => None,
        }
    }

    /// Offline and model mismatch describe configuration, not defects.
    pub fn is_configuration(&self) -> bool {
        matches!(self.root(), Self::Offline | Self::ModelMismatch { .. })
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::LocalIo(StoreError::Sqlite(err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::LocalIo(StoreError::Io(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::LocalIo(StoreError::Json(err))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
