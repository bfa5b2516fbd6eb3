//! Cross-system consistency validation.
//!
//! Counts paragraph-equivalent units in the metadata table, the vector
//! collection, and the graph store, and — in deep mode, the default — takes
//! the full set difference of unit identifiers between the vector and graph
//! stores. Count-only comparison is the explicit fast mode; cardinalities
//! can agree while the identifier sets silently diverge, so the cheap path
//! is an approximation, never the default.
//!
//! A mismatch is a signal for an operator, not a repair trigger. A store
//! that cannot be reached marks its own section `error` without failing the
//! whole comparison.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::metadata::MetadataRegistry;
use crate::models::VersionRecord;
use crate::stores::{GraphStore, VectorStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStatus {
    Valid,
    Mismatch,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionStatus {
    Ok,
    Error,
}

/// One store's contribution to the comparison.
#[derive(Debug, Clone)]
pub struct SystemSection {
    pub status: SectionStatus,
    pub count: Option<i64>,
    pub error: Option<String>,
}

impl SystemSection {
    fn ok(count: i64) -> Self {
        Self {
            status: SectionStatus::Ok,
            count: Some(count),
            error: None,
        }
    }

    fn error(err: String) -> Self {
        Self {
            status: SectionStatus::Error,
            count: None,
            error: Some(err),
        }
    }
}

/// Result of one cross-system comparison.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub version_id: String,
    pub status: ValidationStatus,
    pub metadata: SystemSection,
    pub vector: SystemSection,
    pub graph: SystemSection,
    /// Chunk ids present in the vector store but missing from the graph.
    pub only_in_vector: Vec<String>,
    /// Chunk ids present in the graph but missing from the vector store.
    pub only_in_graph: Vec<String>,
    pub deep: bool,
}

impl ValidationReport {
    pub fn matches(&self) -> bool {
        self.status == ValidationStatus::Valid
    }
}

pub struct ConsistencyValidator {
    registry: Arc<MetadataRegistry>,
    graph: Arc<dyn GraphStore>,
    vector: Arc<dyn VectorStore>,
}

impl ConsistencyValidator {
    pub fn new(
        registry: Arc<MetadataRegistry>,
        graph: Arc<dyn GraphStore>,
        vector: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            registry,
            graph,
            vector,
        }
    }

    /// Compare the three stores for a version.
    ///
    /// The metadata count comes from the version's snapshot table when one
    /// exists, else from the live table (the baseline snapshots nothing).
    /// Vector and graph counts are taken from the live stores — writes land
    /// there directly, which is exactly the divergence this check exists to
    /// surface.
    pub async fn compare(&self, record: &VersionRecord, deep: bool) -> ValidationReport {
        let metadata = self.metadata_section(record).await;
        let vector = match self.vector.collection_info().await {
            Ok(info) => SystemSection::ok(info.points_count),
            Err(e) => SystemSection::error(format!("{e:#}")),
        };
        let graph = match self.graph.count_nodes("Paragraph").await {
            Ok(count) => SystemSection::ok(count),
            Err(e) => SystemSection::error(format!("{e:#}")),
        };

        let mut report = ValidationReport {
            version_id: record.version_id.clone(),
            status: ValidationStatus::Valid,
            metadata,
            vector,
            graph,
            only_in_vector: Vec::new(),
            only_in_graph: Vec::new(),
            deep,
        };

        if deep {
            self.diff_identifiers(&mut report).await;
        }

        report.status = Self::resolve_status(&report);
        report
    }

    async fn metadata_section(&self, record: &VersionRecord) -> SystemSection {
        let from_snapshot = match &record.metadata_ref {
            Some(table) if table != "chapter_metadata" => {
                match self.registry.snapshot_unit_count(table).await {
                    Ok(Some(count)) => return SystemSection::ok(count),
                    Ok(None) => Some(format!("snapshot table {table} is missing")),
                    Err(e) => Some(format!("{e:#}")),
                }
            }
            _ => None,
        };
        if let Some(err) = from_snapshot {
            return SystemSection::error(err);
        }
        match self.registry.total_unit_count().await {
            Ok(count) => SystemSection::ok(count),
            Err(e) => SystemSection::error(format!("{e:#}")),
        }
    }

    /// Full identifier set-difference between the vector payloads and the
    /// graph's paragraph keys. Errors degrade the owning section instead of
    /// aborting.
    async fn diff_identifiers(&self, report: &mut ValidationReport) {
        let vector_ids = match self.vector.list_chunk_ids().await {
            Ok(ids) => ids.into_iter().collect::<BTreeSet<_>>(),
            Err(e) => {
                if report.vector.status == SectionStatus::Ok {
                    report.vector = SystemSection::error(format!("{e:#}"));
                }
                return;
            }
        };
        let graph_ids = match self.graph.node_keys("Paragraph").await {
            Ok(ids) => ids.into_iter().collect::<BTreeSet<_>>(),
            Err(e) => {
                if report.graph.status == SectionStatus::Ok {
                    report.graph = SystemSection::error(format!("{e:#}"));
                }
                return;
            }
        };
        report.only_in_vector = vector_ids.difference(&graph_ids).cloned().collect();
        report.only_in_graph = graph_ids.difference(&vector_ids).cloned().collect();
    }

    fn resolve_status(report: &ValidationReport) -> ValidationStatus {
        let sections = [&report.metadata, &report.vector, &report.graph];
        if sections.iter().any(|s| s.status == SectionStatus::Error) {
            return ValidationStatus::Error;
        }
        let counts: Vec<i64> = sections.iter().filter_map(|s| s.count).collect();
        let counts_agree = counts.windows(2).all(|w| w[0] == w[1]);
        let sets_agree = report.only_in_vector.is_empty() && report.only_in_graph.is_empty();
        if counts_agree && sets_agree {
            ValidationStatus::Valid
        } else {
            ValidationStatus::Mismatch
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate::run_migrations;
    use crate::models::{Chapter, ChunkId, VersionStatus};
    use crate::stores::memory::{MemoryGraphStore, MemoryVectorStore};
    use crate::stores::{Distance, VectorPoint};
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::{json, Value};

    struct Fixture {
        _dir: tempfile::TempDir,
        registry: Arc<MetadataRegistry>,
        graph: Arc<MemoryGraphStore>,
        vector: Arc<MemoryVectorStore>,
    }

    async fn fixture(unit_count: i64) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::connect(&dir.path().join("meta.sqlite")).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let registry = Arc::new(MetadataRegistry::new(pool));
        registry
            .record_ingestion(
                &Chapter {
                    textbook_id: "t".to_string(),
                    number: 1,
                    title: "T".to_string(),
                    sections: vec![],
                },
                "hash",
                unit_count,
            )
            .await
            .unwrap();
        let graph = Arc::new(MemoryGraphStore::new());
        let vector = Arc::new(MemoryVectorStore::new());
        vector.ensure_collection(4, Distance::Cosine).await.unwrap();
        Fixture {
            _dir: dir,
            registry,
            graph,
            vector,
        }
    }

    async fn seed_unit(f: &Fixture, number: &str) {
        let chunk_id = ChunkId::new("t", 1, number);
        f.graph
            .merge_node("Paragraph", &chunk_id.to_string(), json!({}))
            .await
            .unwrap();
        f.vector
            .upsert(vec![VectorPoint {
                id: chunk_id.point_id(),
                vector: vec![1.0, 0.0, 0.0, 0.0],
                payload: json!({ "chunk_id": chunk_id.to_string() }),
            }])
            .await
            .unwrap();
    }

    fn live_record() -> VersionRecord {
        VersionRecord {
            version_id: "version_20250101_000000".to_string(),
            created_at: Utc::now(),
            status: VersionStatus::Committed,
            description: String::new(),
            metadata_ref: Some("chapter_metadata".to_string()),
            vector_ref: None,
            graph_ref: None,
            unit_count: 0,
        }
    }

    #[tokio::test]
    async fn agreeing_stores_validate() {
        let f = fixture(2).await;
        seed_unit(&f, "1.1").await;
        seed_unit(&f, "1.2").await;
        let validator =
            ConsistencyValidator::new(f.registry.clone(), f.graph.clone(), f.vector.clone());
        let report = validator.compare(&live_record(), true).await;
        assert_eq!(report.status, ValidationStatus::Valid);
        assert!(report.matches());
        assert_eq!(report.metadata.count, Some(2));
        assert_eq!(report.vector.count, Some(2));
        assert_eq!(report.graph.count, Some(2));
    }

    #[tokio::test]
    async fn missing_graph_unit_reports_mismatch_with_ids() {
        let f = fixture(10).await;
        for i in 1..=10 {
            seed_unit(&f, &format!("1.{i}")).await;
        }
        // evict one unit from the graph only: vector has 10, graph has 9
        let missing = ChunkId::new("t", 1, "1.7");
        f.graph.evict_node(&missing.to_string());

        let validator =
            ConsistencyValidator::new(f.registry.clone(), f.graph.clone(), f.vector.clone());
        let report = validator.compare(&live_record(), true).await;
        assert_eq!(report.status, ValidationStatus::Mismatch);
        assert_eq!(report.vector.count, Some(10));
        assert_eq!(report.graph.count, Some(9));
        assert_eq!(report.only_in_vector, vec![missing.to_string()]);
        assert!(report.only_in_graph.is_empty());
    }

    #[tokio::test]
    async fn count_only_mode_misses_swapped_identifiers() {
        let f = fixture(1).await;
        // graph holds unit A, vector holds unit B: counts agree at 1
        f.graph
            .merge_node("Paragraph", "t:ch1:1.1", json!({}))
            .await
            .unwrap();
        let other = ChunkId::new("t", 1, "9.9");
        f.vector
            .upsert(vec![VectorPoint {
                id: other.point_id(),
                vector: vec![1.0, 0.0, 0.0, 0.0],
                payload: json!({ "chunk_id": other.to_string() }),
            }])
            .await
            .unwrap();

        let validator =
            ConsistencyValidator::new(f.registry.clone(), f.graph.clone(), f.vector.clone());
        let shallow = validator.compare(&live_record(), false).await;
        assert_eq!(shallow.status, ValidationStatus::Valid);

        let deep = validator.compare(&live_record(), true).await;
        assert_eq!(deep.status, ValidationStatus::Mismatch);
        assert_eq!(deep.only_in_vector, vec!["t:ch1:9.9".to_string()]);
        assert_eq!(deep.only_in_graph, vec!["t:ch1:1.1".to_string()]);
    }

    struct UnreachableGraph;

    #[async_trait]
    impl GraphStore for UnreachableGraph {
        async fn merge_node(&self, _: &str, _: &str, _: Value) -> Result<()> {
            anyhow::bail!("connection refused")
        }
        async fn merge_relationship(&self, _: &str, _: &str, _: &str) -> Result<()> {
            anyhow::bail!("connection refused")
        }
        async fn run_query(&self, _: &str, _: Value) -> Result<Vec<Value>> {
            anyhow::bail!("connection refused")
        }
        async fn count_nodes(&self, _: &str) -> Result<i64> {
            anyhow::bail!("connection refused")
        }
        async fn node_keys(&self, _: &str) -> Result<Vec<String>> {
            anyhow::bail!("connection refused")
        }
        async fn add_marker(&self, _: &str) -> Result<i64> {
            anyhow::bail!("connection refused")
        }
        async fn marker_exists(&self, _: &str) -> Result<bool> {
            anyhow::bail!("connection refused")
        }
        async fn remove_marker(&self, _: &str) -> Result<i64> {
            anyhow::bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn unreachable_store_degrades_to_section_error() {
        let f = fixture(1).await;
        seed_unit(&f, "1.1").await;
        let validator = ConsistencyValidator::new(
            f.registry.clone(),
            Arc::new(UnreachableGraph),
            f.vector.clone(),
        );
        let report = validator.compare(&live_record(), true).await;
        assert_eq!(report.status, ValidationStatus::Error);
        assert_eq!(report.graph.status, SectionStatus::Error);
        // the reachable sections still report their counts
        assert_eq!(report.metadata.count, Some(1));
        assert_eq!(report.vector.count, Some(1));
    }
}
