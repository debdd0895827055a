//! Core data types: `Space`, `Item`, `Query`, and their supporting enums.
//!
//! `ItemMetadata` is a tagged variant per `kind` (§9 design note: "re-architect
//! as a tagged variant... never pattern-match on stringly-typed tags scattered
//! through call sites") rather than the open key/value dictionary the source
//! system used.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What an [`Item`] contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Message,
    File,
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemKind::Message => write!(f, "message"),
            ItemKind::File => write!(f, "file"),
        }
    }
}

/// The MIME family an uploaded file's bytes were declared under. Governs
/// which Extractor family contract applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MimeFamily {
    Plain,
    Pdf,
    Docx,
    Image,
    Unknown,
}

impl std::fmt::Display for MimeFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MimeFamily::Plain => write!(f, "plain"),
            MimeFamily::Pdf => write!(f, "pdf"),
            MimeFamily::Docx => write!(f, "docx"),
            MimeFamily::Image => write!(f, "image"),
            MimeFamily::Unknown => write!(f, "unknown"),
        }
    }
}

/// Per-kind item metadata. A `message` carries none of its own; a `file`
/// carries the fields the ingestion and extraction paths need. `extra` is
/// an overflow map for forward-compatible fields that don't yet warrant a
/// named field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ItemMetadata {
    Message {
        #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
        extra: serde_json::Map<String, serde_json::Value>,
    },
    File {
        original_name: String,
        size_bytes: u64,
        mime_family: MimeFamily,
        ocr_applied: bool,
        #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
        extra: serde_json::Map<String, serde_json::Value>,
    },
}

impl ItemMetadata {
    pub fn kind(&self) -> ItemKind {
        match self {
            ItemMetadata::Message { .. } => ItemKind::Message,
            ItemMetadata::File { .. } => ItemKind::File,
        }
    }
}

/// Processing status of an [`Item`]. `failure_reason` folds into `Failed`
/// since the two always travel together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Ready,
    Failed { reason: String },
}

impl ItemStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, ItemStatus::Ready)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Ready => "ready",
            ItemStatus::Failed { .. } => "failed",
        }
    }
}

/// A user-owned, named container grouping items by topic or context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Space {
    pub space_id: String,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Derived: count of non-deleted items in this space, computed by the
    /// metadata store at read time rather than stored directly (§3 invariant 3).
    pub item_count: i64,
}

/// A single unit of content (text message or file) within a space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub item_id: String,
    pub space_id: String,
    pub kind: ItemKind,
    /// For `message`: the text itself. For `file`: an opaque storage path to
    /// the canonical bytes (relative to the user's data root).
    pub content: String,
    /// Extracted/canonical text used for embedding and context assembly.
    /// Equal to `content` for messages; populated by the Extractor for files.
    pub extracted_text: Option<String>,
    pub metadata: ItemMetadata,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: ItemStatus,
    /// The VectorIndex internal-id, null until indexed.
    pub vector_ref: Option<u64>,
}

/// A single retrieved source cited in a [`Query`]'s answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub item_id: String,
    pub kind: ItemKind,
    /// First <=240 chars of the retrieved text, for display.
    pub snippet: String,
    pub score: f32,
}

/// An append-only record of a question asked against a space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub query_id: String,
    pub space_id: String,
    pub question: String,
    pub answer: String,
    pub sources: Vec<Source>,
    pub created_at: DateTime<Utc>,
}

/// An item returned from a search with its similarity score, used by
/// `search_in_space` / `global_search` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredItem {
    pub item: Item,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_metadata_kind_matches_variant() {
        let msg = ItemMetadata::Message { extra: Default::default() };
        assert_eq!(msg.kind(), ItemKind::Message);

        let file = ItemMetadata::File {
            original_name: "a.pdf".into(),
            size_bytes: 10,
            mime_family: MimeFamily::Pdf,
            ocr_applied: false,
            extra: Default::default(),
        };
        assert_eq!(file.kind(), ItemKind::File);
    }

    #[test]
    fn item_status_label_and_ready() {
        assert!(ItemStatus::Ready.is_ready());
        assert!(!ItemStatus::Pending.is_ready());
        let failed = ItemStatus::Failed { reason: "too large".into() };
        assert_eq!(failed.label(), "failed");
        assert!(!failed.is_ready());
    }

    #[test]
    fn item_metadata_round_trips_through_json() {
        let file = ItemMetadata::File {
            original_name: "notes.docx".into(),
            size_bytes: 2048,
            mime_family: MimeFamily::Docx,
            ocr_applied: false,
            extra: Default::default(),
        };
        let json = serde_json::to_string(&file).unwrap();
        let back: ItemMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), ItemKind::File);
    }
}
