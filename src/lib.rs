//! Local-first lore stores that sync with a central service.
//!
//! Lore is a captured piece of project knowledge (a convention, a
//! gotcha) with a category and a confidence score. Each store is an
//! isolated namespace with its own SQLite database, identified by a
//! hierarchical store id such as `team/api`. Stores work fully offline; when a
//! remote is configured they bootstrap from a snapshot, push local changes and
//! pull the remote change log.
//!
//! # Architecture
//!
//! - **Storage**: one SQLite database per store, single writer with pooled
//!   readers behind an in-process read/write gate
//! - **Sync**: [`sync::SyncEngine`] drives bootstrap, push and delta pull over
//!   the [`remote::RemoteSync`] capability
//! - **Session references**: [`session::SessionTracker`] hands out `L1`, `L2`,
//!   ... tokens that stay unique across every store queried in one session
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`db`]: SQLite connection setup, schema, migrations, and health checks
//! - [`error`]: Error taxonomy shared by storage, remote and engine
//! - [`lore`]: The local store: records, feedback, sync surface, stats
//! - [`registry`]: Maps store ids to on-disk stores
//! - [`remote`]: The remote sync capability and its HTTP implementation
//! - [`service`]: The [`service::Lore`] facade used by tools and the CLI
//! - [`session`]: Session reference tracking
//! - [`store_id`]: Store identifier validation, encoding and resolution
//! - [`sync`]: The sync engine

pub mod config;
pub mod db;
pub mod error;
pub mod lore;
pub mod registry;
pub mod remote;
pub mod service;
pub mod session;
pub mod store_id;
pub mod sync;

pub use error::{Error, Result};
pub use service::Lore;
pub use store_id::StoreId;
