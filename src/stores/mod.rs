//! Storage collaborator abstractions.
//!
//! The graph and vector engines are external systems this pipeline writes
//! into but does not own. [`GraphStore`] and [`VectorStore`] define the
//! operations the pipeline needs; every write is an idempotent
//! upsert-by-key so retries after a partial multi-store failure are always
//! safe. Implementations must be `Send + Sync` — store clients are shared
//! across ingestion workers and pool their own connections.
//!
//! Concrete backends: [`neo4j_http::Neo4jStore`] and
//! [`qdrant_http::QdrantStore`] speak HTTP via reqwest;
//! [`memory::MemoryGraphStore`] and [`memory::MemoryVectorStore`] are
//! in-process implementations for tests and offline runs.

pub mod memory;
pub mod neo4j_http;
pub mod qdrant_http;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;

/// Vector distance metric, agreed at collection-creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distance {
    Cosine,
    Dot,
    Euclid,
}

impl Distance {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cosine" => Some(Distance::Cosine),
            "dot" => Some(Distance::Dot),
            "euclid" => Some(Distance::Euclid),
            _ => None,
        }
    }

    /// Qdrant's wire spelling.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Distance::Cosine => "Cosine",
            Distance::Dot => "Dot",
            Distance::Euclid => "Euclid",
        }
    }
}

/// One point handed to the vector store.
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: Value,
}

/// A ranked hit returned from a similarity query.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: Uuid,
    pub score: f32,
    pub payload: Value,
}

/// Typed payload filter for similarity queries; never a loose map.
#[derive(Debug, Clone, Default)]
pub struct PayloadFilter {
    pub textbook_id: Option<String>,
    pub chapter_number: Option<u32>,
}

impl PayloadFilter {
    pub fn is_empty(&self) -> bool {
        self.textbook_id.is_none() && self.chapter_number.is_none()
    }
}

/// Collection-level statistics.
#[derive(Debug, Clone, Copy)]
pub struct CollectionInfo {
    pub points_count: i64,
    pub vector_size: usize,
}

/// Graph engine collaborator.
///
/// Node uniqueness on the `key` property is a precondition the engine
/// provides (constraints on textbook, chapter, and chunk ids); this trait
/// relies on it rather than enforcing it.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Idempotently create-or-update a node identified by `(label, key)`.
    async fn merge_node(&self, label: &str, key: &str, props: Value) -> Result<()>;

    /// Idempotently create a relationship between two existing nodes.
    async fn merge_relationship(&self, from_key: &str, rel_type: &str, to_key: &str) -> Result<()>;

    /// Escape hatch for arbitrary read queries returning rows of named
    /// fields. In-process backends may not support this.
    async fn run_query(&self, query: &str, params: Value) -> Result<Vec<Value>>;

    /// Count nodes carrying a label.
    async fn count_nodes(&self, label: &str) -> Result<i64>;

    /// All `key` properties of nodes carrying a label.
    async fn node_keys(&self, label: &str) -> Result<Vec<String>>;

    /// Tag every node with a marker label (the label-based snapshot
    /// partition). Returns the number of nodes tagged.
    async fn add_marker(&self, marker: &str) -> Result<i64>;

    /// Whether any node carries the marker label.
    async fn marker_exists(&self, marker: &str) -> Result<bool>;

    /// Strip a marker label from every node. Returns the number untagged.
    async fn remove_marker(&self, marker: &str) -> Result<i64>;
}

/// Vector similarity engine collaborator.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if absent; verify dimensionality if present.
    async fn ensure_collection(&self, vector_size: usize, distance: Distance) -> Result<()>;

    /// Upsert points by deterministic id — re-ingestion overwrites.
    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()>;

    /// Similarity query with an optional payload filter.
    async fn query(
        &self,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<PayloadFilter>,
    ) -> Result<Vec<ScoredPoint>>;

    /// Delete points by id.
    async fn delete(&self, ids: Vec<Uuid>) -> Result<()>;

    async fn collection_info(&self) -> Result<CollectionInfo>;

    /// All `chunk_id` payload values currently stored.
    async fn list_chunk_ids(&self) -> Result<Vec<String>>;

    /// Create a named snapshot of the collection; returns the snapshot ref.
    async fn create_snapshot(&self, version_id: &str) -> Result<String>;

    async fn delete_snapshot(&self, snapshot_ref: &str) -> Result<()>;

    /// Point an alias at the live collection (used by the baseline).
    async fn create_alias(&self, alias: &str) -> Result<()>;

    async fn alias_exists(&self, alias: &str) -> Result<bool>;

    async fn delete_alias(&self, alias: &str) -> Result<()>;
}

/// Build the graph store selected by the config.
pub fn build_graph_store(config: &Config) -> Result<Arc<dyn GraphStore>> {
    match config.graph.backend.as_str() {
        "memory" => Ok(Arc::new(memory::MemoryGraphStore::new())),
        _ => Ok(Arc::new(neo4j_http::Neo4jStore::new(&config.graph)?)),
    }
}

/// Build the vector store selected by the config.
pub fn build_vector_store(config: &Config) -> Result<Arc<dyn VectorStore>> {
    match config.vector.backend.as_str() {
        "memory" => Ok(Arc::new(memory::MemoryVectorStore::new())),
        _ => Ok(Arc::new(qdrant_http::QdrantStore::new(&config.vector)?)),
    }
}
