//! Core data models for the ingestion and versioning pipeline.
//!
//! These types represent the chapter trees, flattened content units, version
//! records, and audit entries that flow through the three storage backends.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Root of an ingested document hierarchy: one textbook chapter.
///
/// Parsed from JSON, immutable once parsed. Re-ingestion replaces the whole
/// chapter rather than patching it in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub textbook_id: String,
    pub number: u32,
    pub title: String,
    #[serde(default)]
    pub sections: Vec<ContentNode>,
}

/// A recursive hierarchy node (section, subsection, subsubsection, ...).
///
/// One tagged recursive type instead of a class per level: the walker
/// dispatches on depth, not on type identity. An interior node may hold
/// leaf paragraphs and child nodes at the same time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentNode {
    /// Dotted number, unique among siblings (e.g. `"2.4"`).
    pub number: String,
    pub title: String,
    #[serde(default)]
    pub paragraphs: Vec<Paragraph>,
    #[serde(default)]
    pub children: Vec<ContentNode>,
}

/// Leaf content unit: the smallest individually addressable piece of text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paragraph {
    /// Full dotted number within the chapter (e.g. `"2.4.4.2"`).
    pub number: String,
    pub text: String,
    pub page: u32,
    /// Bounding region on the page: `[x0, y0, x1, y1]`.
    #[serde(default)]
    pub bounds: [f64; 4],
    #[serde(default)]
    pub tables: Vec<EmbeddedItem>,
    #[serde(default)]
    pub figures: Vec<EmbeddedItem>,
}

/// A table or figure embedded in a paragraph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedItem {
    pub number: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub page: u32,
}

/// The kind of an inline cross-reference found in paragraph text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    Figure,
    Table,
}

impl RefKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefKind::Figure => "figure",
            RefKind::Table => "table",
        }
    }
}

/// An inline citation to a figure or table, extracted from paragraph text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CrossReference {
    pub kind: RefKind,
    pub number: String,
}

/// Globally unique, deterministic identifier of one content unit.
///
/// Rendered as `{textbook}:ch{chapter}:{paragraph}`. The format is persisted
/// in all three stores and must round-trip through [`ChunkId::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkId {
    pub textbook_id: String,
    pub chapter_number: u32,
    pub paragraph_number: String,
}

impl ChunkId {
    pub fn new(textbook_id: &str, chapter_number: u32, paragraph_number: &str) -> Self {
        Self {
            textbook_id: textbook_id.to_string(),
            chapter_number,
            paragraph_number: paragraph_number.to_string(),
        }
    }

    /// Parse a rendered chunk id back into its components.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, ':');
        let textbook_id = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| anyhow!("chunk id missing textbook segment: {s:?}"))?;
        let chapter = parts
            .next()
            .and_then(|p| p.strip_prefix("ch"))
            .ok_or_else(|| anyhow!("chunk id missing ch segment: {s:?}"))?
            .parse::<u32>()
            .map_err(|_| anyhow!("chunk id has non-numeric chapter: {s:?}"))?;
        let paragraph = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| anyhow!("chunk id missing paragraph segment: {s:?}"))?;
        Ok(Self::new(textbook_id, chapter, paragraph))
    }

    /// Identifier of the owning chapter node: `{textbook}:ch{chapter}`.
    pub fn chapter_id(&self) -> String {
        chapter_node_id(&self.textbook_id, self.chapter_number)
    }

    /// Deterministic vector-store point id derived from the rendered form.
    ///
    /// UUIDv5 keeps re-ingestion of the same unit an overwrite, never a
    /// duplicate point.
    pub fn point_id(&self) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, self.to_string().as_bytes())
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:ch{}:{}",
            self.textbook_id, self.chapter_number, self.paragraph_number
        )
    }
}

/// Identifier of a chapter node in the graph store.
pub fn chapter_node_id(textbook_id: &str, chapter_number: u32) -> String {
    format!("{textbook_id}:ch{chapter_number}")
}

/// Identifier of a hierarchy node below the chapter.
///
/// Depth 0 is a section (`:s{n}`), depth 1 a subsection (`:ss{n}`), depth 2
/// and below subsubsections (`:sss{n}`). Each level appends to its parent's
/// id, so ids stay unique at any nesting depth.
pub fn level_node_id(parent_id: &str, depth: usize, number: &str) -> String {
    let tag = match depth {
        0 => "s",
        1 => "ss",
        _ => "sss",
    };
    format!("{parent_id}:{tag}{number}")
}

/// Graph node label for a hierarchy level below the chapter.
pub fn level_label(depth: usize) -> &'static str {
    match depth {
        0 => "Section",
        1 => "Subsection",
        _ => "Subsubsection",
    }
}

/// Compare two dotted numbers segment-wise numerically (`"2.10" > "2.9"`).
///
/// Non-numeric segments fall back to string order; well-formedness is the
/// caller's responsibility.
pub fn compare_dotted(a: &str, b: &str) -> std::cmp::Ordering {
    let mut xs = a.split('.');
    let mut ys = b.split('.');
    loop {
        match (xs.next(), ys.next()) {
            (None, None) => return std::cmp::Ordering::Equal,
            (None, Some(_)) => return std::cmp::Ordering::Less,
            (Some(_), None) => return std::cmp::Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(xn), Ok(yn)) => xn.cmp(&yn),
                    _ => x.cmp(y),
                };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// Relational record of a chapter's current ingested state.
///
/// Unique on `(textbook_id, chapter_number)`; `version` starts at 1 and
/// increments exactly when `content_hash` changes.
#[derive(Debug, Clone)]
pub struct ChapterMetadata {
    pub textbook_id: String,
    pub chapter_number: u32,
    pub title: String,
    pub content_hash: String,
    pub version: i64,
    pub unit_count: i64,
    pub updated_at: i64,
}

/// Outcome of recording a chapter ingestion in the metadata registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub previous_version: Option<i64>,
    pub new_version: i64,
    pub changed: bool,
}

/// Lifecycle state of a version record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionStatus {
    Pending,
    Validating,
    Committed,
    RolledBack,
    Archived,
}

impl VersionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionStatus::Pending => "pending",
            VersionStatus::Validating => "validating",
            VersionStatus::Committed => "committed",
            VersionStatus::RolledBack => "rolled_back",
            VersionStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(VersionStatus::Pending),
            "validating" => Ok(VersionStatus::Validating),
            "committed" => Ok(VersionStatus::Committed),
            "rolled_back" => Ok(VersionStatus::RolledBack),
            "archived" => Ok(VersionStatus::Archived),
            other => Err(anyhow!("unknown version status: {other:?}")),
        }
    }
}

impl std::fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reserved id prefix marking data that predates the versioning subsystem.
pub const BASELINE_PREFIX: &str = "v1_baseline_";

/// Whether a version id belongs to the protected baseline class.
pub fn is_baseline(version_id: &str) -> bool {
    version_id.starts_with(BASELINE_PREFIX)
}

/// A named, timestamped logical snapshot of the aggregate tri-store state.
///
/// `version_id` embeds a `YYYYMMDD_HHMMSS` timestamp so lexicographic and
/// chronological order coincide.
#[derive(Debug, Clone)]
pub struct VersionRecord {
    pub version_id: String,
    pub created_at: DateTime<Utc>,
    pub status: VersionStatus,
    pub description: String,
    /// Name of the metadata snapshot table.
    pub metadata_ref: Option<String>,
    /// Vector-store snapshot name or alias.
    pub vector_ref: Option<String>,
    /// Graph marker label carried by the snapshotted nodes.
    pub graph_ref: Option<String>,
    pub unit_count: i64,
}

/// Append-only audit record of one cross-store operation.
///
/// Never mutated; used for post-mortem diagnosis, not for correctness.
#[derive(Debug, Clone)]
pub struct OperationLogEntry {
    pub version_id: String,
    pub ts: DateTime<Utc>,
    pub operation: String,
    pub system: String,
    pub entity_type: String,
    pub entity_id: String,
    pub status: String,
    pub error: Option<String>,
    pub duration_ms: i64,
}

/// Per-unit write failure collected during a chapter write.
#[derive(Debug, Clone)]
pub struct UnitError {
    pub chunk_id: String,
    pub message: String,
}

/// Result of writing one chapter through both non-relational stores.
#[derive(Debug, Clone, Default)]
pub struct ChapterWriteReport {
    pub units_total: usize,
    pub units_succeeded: usize,
    pub units_failed: usize,
    pub sequence_links: usize,
    pub errors: Vec<UnitError>,
}
