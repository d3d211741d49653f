//! Store identifiers: validation, reserved names, and filesystem encoding.
//!
//! A store identifier is 1 to 4 `/`-separated segments, each lowercase
//! alphanumeric with single internal hyphens. [`StoreId`] can only be built
//! through validation, so holding one means the grammar already holds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The store every command targets when nothing else is specified.
pub const DEFAULT_STORE: &str = "default";

/// Identifiers that may be targeted but never created.
pub const RESERVED_STORES: [&str; 2] = [DEFAULT_STORE, "_system"];

/// Environment variable that overrides the target store.
pub const STORE_ENV: &str = "LORE_STORE";

pub const MAX_STORE_ID_LEN: usize = 128;
pub const MAX_SEGMENTS: usize = 4;

/// Replaces `/` in filesystem names. Valid segments never contain `--`.
const PATH_SEPARATOR_TOKEN: &str = "--";

/// A validated store identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoreId(String);

impl StoreId {
    /// Validate `id` as a sync or query target. Reserved ids are accepted.
    pub fn parse(id: &str) -> Result<Self, Error> {
        validate(id)?;
        Ok(Self(id.to_string()))
    }

    /// Validate `id` for creating a new store. Reserved ids are rejected.
    pub fn parse_for_creation(id: &str) -> Result<Self, Error> {
        validate_for_creation(id)?;
        Ok(Self(id.to_string()))
    }

    pub fn default_store() -> Self {
        Self(DEFAULT_STORE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_reserved(&self) -> bool {
        is_reserved(&self.0)
    }

    /// Filesystem-safe token for this id.
    pub fn encode(&self) -> String {
        encode(self)
    }

    /// Resolve the target store: explicit argument, then the environment
    /// override, then [`DEFAULT_STORE`].
    pub fn resolve(explicit: Option<&str>, env_override: Option<&str>) -> Result<Self, Error> {
        let chosen = [explicit, env_override]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
            .unwrap_or(DEFAULT_STORE);
        Self::parse(chosen)
    }

    /// [`StoreId::resolve`] with the override read from `LORE_STORE`.
    pub fn resolve_from_env(explicit: Option<&str>) -> Result<Self, Error> {
        let env_override = std::env::var(STORE_ENV).ok();
        Self::resolve(explicit, env_override.as_deref())
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StoreId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for StoreId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate(&value)?;
        Ok(Self(value))
    }
}

impl From<StoreId> for String {
    fn from(id: StoreId) -> Self {
        id.0
    }
}

impl AsRef<str> for StoreId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub fn is_reserved(id: &str) -> bool {
    RESERVED_STORES.contains(&id)
}

/// Check the segment grammar. Reserved identifiers always pass.
pub fn validate(id: &str) -> Result<(), Error> {
    if is_reserved(id) {
        return Ok(());
    }

    let invalid = |reason: String| Error::InvalidStoreId {
        id: id.to_string(),
        reason,
    };

    if id.is_empty() {
        return Err(invalid("must not be empty".into()));
    }
    if id.len() > MAX_STORE_ID_LEN {
        return Err(invalid(format!("longer than {MAX_STORE_ID_LEN} characters")));
    }

    let segments: Vec<&str> = id.split('/').collect();
    if segments.len() > MAX_SEGMENTS {
        return Err(invalid(format!("more than {MAX_SEGMENTS} segments")));
    }

    for segment in segments {
        validate_segment(segment).map_err(|reason| invalid(reason.to_string()))?;
    }

    Ok(())
}

/// Like [`validate`], but reserved identifiers are refused.
pub fn validate_for_creation(id: &str) -> Result<(), Error> {
    if is_reserved(id) {
        return Err(Error::ReservedStoreId(id.to_string()));
    }
    validate(id)
}

fn validate_segment(segment: &str) -> Result<(), &'static str> {
    if segment.is_empty() {
        return Err("empty path segment");
    }
    if !segment
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return Err("segments may only contain lowercase letters, digits and hyphens");
    }
    if segment.starts_with('-') || segment.ends_with('-') {
        return Err("segments must not start or end with a hyphen");
    }
    if segment.contains("--") {
        return Err("segments must not contain consecutive hyphens");
    }
    Ok(())
}

/// Map a store id to a single filesystem name.
pub fn encode(id: &StoreId) -> String {
    id.as_str().replace('/', PATH_SEPARATOR_TOKEN)
}

/// Inverse of [`encode`]. The decoded identifier is validated.
pub fn decode(token: &str) -> Result<StoreId, Error> {
    StoreId::parse(&token.replace(PATH_SEPARATOR_TOKEN, "/"))
}
