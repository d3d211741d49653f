//! Core lore type definitions.
//!
//! Defines [`Category`] (fixed domain tags), [`EmbeddingStatus`],
//! [`FeedbackOutcome`] (and its confidence arithmetic), [`LoreRecord`] (a full
//! record, also the wire shape), and [`FeedbackEntry`] (a queued outcome).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Maximum length of `content`, in characters.
pub const MAX_CONTENT_CHARS: usize = 4000;

/// Confidence given to newly captured lore when the caller does not say.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

pub const HELPFUL_BOOST: f64 = 0.08;
pub const INCORRECT_PENALTY: f64 = 0.15;

/// Fixed domain tags for a lore record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Structural decisions and module boundaries.
    Architecture,
    /// Recurring solutions worth reusing.
    Pattern,
    /// Project conventions: naming, layout, style.
    Convention,
    /// Surprising behavior and traps.
    Gotcha,
    /// Notes about third-party libraries and versions.
    Dependency,
    Performance,
    Security,
    Testing,
    Tooling,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Self::Architecture,
        Self::Pattern,
        Self::Convention,
        Self::Gotcha,
        Self::Dependency,
        Self::Performance,
        Self::Security,
        Self::Testing,
        Self::Tooling,
    ];

    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Architecture => "architecture",
            Self::Pattern => "pattern",
            Self::Convention => "convention",
            Self::Gotcha => "gotcha",
            Self::Dependency => "dependency",
            Self::Performance => "performance",
            Self::Security => "security",
            Self::Testing => "testing",
            Self::Tooling => "tooling",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown category: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingStatus {
    #[default]
    Pending,
    Ready,
    Failed,
}

impl EmbeddingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for EmbeddingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "ready" => Ok(Self::Ready),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown embedding status: {s}")),
        }
    }
}

/// Outcome an agent reports after using a piece of lore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackOutcome {
    Helpful,
    NotRelevant,
    Incorrect,
}

impl FeedbackOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Helpful => "helpful",
            Self::NotRelevant => "not_relevant",
            Self::Incorrect => "incorrect",
        }
    }

    /// New confidence after this outcome. Always within `[0.0, 1.0]`.
    pub fn adjust(&self, confidence: f64) -> f64 {
        let adjusted = match self {
            Self::Helpful => (confidence + HELPFUL_BOOST).min(1.0),
            Self::NotRelevant => confidence,
            Self::Incorrect => (confidence - INCORRECT_PENALTY).max(0.0),
        };
        adjusted.clamp(0.0, 1.0)
    }
}

impl std::fmt::Display for FeedbackOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FeedbackOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "helpful" => Ok(Self::Helpful),
            "not_relevant" | "not-relevant" => Ok(Self::NotRelevant),
            "incorrect" => Ok(Self::Incorrect),
            _ => Err(format!("unknown feedback outcome: {s}")),
        }
    }
}

/// A lore record, matching the `lore` table and the sync wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoreRecord {
    /// UUID v7 (time-sortable) primary key.
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub category: Category,
    /// Trust score in `[0.0, 1.0]`, adjusted by feedback.
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<u8>>,
    #[serde(default)]
    pub embedding_status: EmbeddingStatus,
    /// Where this lore was first captured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    /// Every source that contributed to this lore.
    #[serde(default)]
    pub sources: BTreeSet<String>,
    #[serde(default)]
    pub validation_count: u32,
    /// RFC 3339 timestamps, fixed microsecond precision.
    pub created_at: String,
    pub updated_at: String,
    /// `None` means modified locally and not yet pushed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<String>,
    /// Soft-delete tombstone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
    /// Last rejection message from the remote. Local only.
    #[serde(skip)]
    pub sync_error: Option<String>,
}

impl LoreRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_dirty(&self) -> bool {
        self.synced_at.is_none()
    }
}

/// Input for capturing new lore.
#[derive(Debug, Clone)]
pub struct NewLore {
    pub content: String,
    pub context: Option<String>,
    pub category: Category,
    pub confidence: Option<f64>,
    pub source_id: Option<String>,
}

impl NewLore {
    pub fn new(content: impl Into<String>, category: Category) -> Self {
        Self {
            content: content.into(),
            context: None,
            category,
            confidence: None,
            source_id: None,
        }
    }
}

/// Field changes for [`crate::lore::LocalStore::update`]. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct LoreUpdate {
    pub content: Option<String>,
    pub context: Option<Option<String>>,
    pub category: Option<Category>,
    pub confidence: Option<f64>,
}

/// Feedback applied locally and waiting to be pushed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub id: i64,
    pub lore_id: String,
    pub outcome: FeedbackOutcome,
    pub created_at: String,
}

/// Result of applying one feedback outcome.
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackApplied {
    pub lore_id: String,
    pub outcome: FeedbackOutcome,
    pub previous_confidence: f64,
    pub confidence: f64,
    pub validation_count: u32,
}
