//! Version coordination across the three stores.
//!
//! A version is a saga: a sequence of locally-idempotent, individually
//! compensable snapshot steps — metadata table copy, vector-store snapshot,
//! graph marker label — never a faked distributed transaction. When a step
//! fails mid-create, whatever succeeded is compensated best-effort and the
//! error is re-raised; the operation log records what actually happened, so
//! a failed create means "inspect the log", not "guaranteed clean".
//!
//! Lifecycle: `pending -> validating -> committed`, with rollback allowed
//! from any non-terminal state and `committed -> archived` via rotation.
//! Baselines are registered directly as `committed` and are exempt from
//! rotation unless explicitly unprotected.
//!
//! Operations against the *same* version id must be serialized by the
//! caller; operations against different ids are independent.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

use crate::error::PipelineError;
use crate::metadata::MetadataRegistry;
use crate::models::{
    is_baseline, OperationLogEntry, VersionRecord, VersionStatus, BASELINE_PREFIX,
};
use crate::stores::{GraphStore, VectorStore};

/// Outcome of one version deletion during rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationOutcome {
    Deleted,
    SkippedBaseline,
    SkippedError(String),
}

#[derive(Debug, Clone, Default)]
pub struct RotationReport {
    pub kept: Vec<String>,
    pub deleted: Vec<String>,
    pub skipped: Vec<(String, RotationOutcome)>,
}

pub struct VersionCoordinator {
    registry: Arc<MetadataRegistry>,
    graph: Arc<dyn GraphStore>,
    vector: Arc<dyn VectorStore>,
    prefix: String,
}

impl VersionCoordinator {
    pub fn new(
        registry: Arc<MetadataRegistry>,
        graph: Arc<dyn GraphStore>,
        vector: Arc<dyn VectorStore>,
        prefix: &str,
    ) -> Self {
        Self {
            registry,
            graph,
            vector,
            prefix: prefix.to_string(),
        }
    }

    /// Generate a fresh `{prefix}_{YYYYMMDD_HHMMSS}` id. Ids of retired
    /// versions stay taken, so a same-second create advances the timestamp
    /// until the id is unused — order stays chronological.
    async fn new_version_id(&self) -> Result<String> {
        let mut ts = Utc::now();
        loop {
            let id = format!("{}_{}", self.prefix, ts.format("%Y%m%d_%H%M%S"));
            if self.registry.get_version(&id).await?.is_none() {
                return Ok(id);
            }
            ts += chrono::Duration::seconds(1);
        }
    }

    /// Append an operation-log entry; logging failure must never mask the
    /// underlying operation's result.
    #[allow(clippy::too_many_arguments)]
    async fn log<T>(
        &self,
        version_id: &str,
        operation: &str,
        system: &str,
        entity_type: &str,
        entity_id: &str,
        outcome: &Result<T>,
        started: Instant,
    ) {
        let entry = OperationLogEntry {
            version_id: version_id.to_string(),
            ts: Utc::now(),
            operation: operation.to_string(),
            system: system.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            status: if outcome.is_ok() { "success" } else { "failure" }.to_string(),
            error: outcome.as_ref().err().map(|e| format!("{e:#}")),
            duration_ms: started.elapsed().as_millis() as i64,
        };
        if let Err(log_err) = self.registry.append_log(&entry).await {
            eprintln!("warning: operation log append failed: {log_err:#}");
        }
    }

    /// The latest committed version at this instant. Never cached: two
    /// coordinators may disagree the moment a concurrent commit lands.
    pub async fn resolve_current_version(&self) -> Result<Option<VersionRecord>> {
        self.registry.latest_committed().await
    }

    /// Snapshot all three stores and register a `pending` version.
    ///
    /// Not atomic. On failure, already-created snapshots are compensated
    /// best-effort and the original error is re-raised with the version id
    /// attached for manual resumption.
    pub async fn create_version(&self, description: &str) -> Result<VersionRecord> {
        let version_id = self.new_version_id().await?;

        // Step 1: metadata table copy
        let started = Instant::now();
        let metadata_ref = self.registry.snapshot_metadata_table(&version_id).await;
        self.log(
            &version_id,
            "create_version",
            "metadata",
            "snapshot",
            &version_id,
            &metadata_ref,
            started,
        )
        .await;
        let metadata_ref =
            metadata_ref.with_context(|| format!("metadata snapshot failed for {version_id}"))?;

        // Step 2: vector snapshot
        let started = Instant::now();
        let vector_ref = self.vector.create_snapshot(&version_id).await;
        self.log(
            &version_id,
            "create_version",
            "vector",
            "snapshot",
            &version_id,
            &vector_ref,
            started,
        )
        .await;
        let vector_ref = match vector_ref {
            Ok(r) => r,
            Err(e) => {
                self.compensate_create(&version_id, Some(&metadata_ref), None, None)
                    .await;
                return Err(e.context(format!("vector snapshot failed for {version_id}")));
            }
        };

        // Step 3: graph marker partition
        let started = Instant::now();
        let tagged = self.graph.add_marker(&version_id).await;
        self.log(
            &version_id,
            "create_version",
            "graph",
            "marker",
            &version_id,
            &tagged,
            started,
        )
        .await;
        if let Err(e) = tagged {
            self.compensate_create(&version_id, Some(&metadata_ref), Some(&vector_ref), None)
                .await;
            return Err(e.context(format!("graph marker failed for {version_id}")));
        }

        // Step 4: register the pending record
        let record = VersionRecord {
            version_id: version_id.clone(),
            created_at: Utc::now(),
            status: VersionStatus::Pending,
            description: description.to_string(),
            metadata_ref: Some(metadata_ref.clone()),
            vector_ref: Some(vector_ref.clone()),
            graph_ref: Some(version_id.clone()),
            unit_count: self.registry.total_unit_count().await.unwrap_or(0),
        };
        if let Err(e) = self.registry.insert_version(&record).await {
            self.compensate_create(
                &version_id,
                Some(&metadata_ref),
                Some(&vector_ref),
                Some(&version_id),
            )
            .await;
            return Err(e.context(format!("version record insert failed for {version_id}")));
        }
        Ok(record)
    }

    /// Best-effort removal of the snapshots a failed create left behind.
    /// Failures are logged, not raised — the create's own error wins.
    async fn compensate_create(
        &self,
        version_id: &str,
        metadata_ref: Option<&str>,
        vector_ref: Option<&str>,
        graph_ref: Option<&str>,
    ) {
        if let Some(table) = metadata_ref {
            let started = Instant::now();
            let result = self.registry.drop_metadata_snapshot(table).await;
            self.log(
                version_id,
                "compensate_create",
                "metadata",
                "snapshot",
                table,
                &result,
                started,
            )
            .await;
        }
        if let Some(snapshot) = vector_ref {
            let started = Instant::now();
            let result = self.vector.delete_snapshot(snapshot).await;
            self.log(
                version_id,
                "compensate_create",
                "vector",
                "snapshot",
                snapshot,
                &result,
                started,
            )
            .await;
        }
        if let Some(marker) = graph_ref {
            let started = Instant::now();
            let result = self.graph.remove_marker(marker).await;
            self.log(
                version_id,
                "compensate_create",
                "graph",
                "marker",
                marker,
                &result,
                started,
            )
            .await;
        }
    }

    /// Mark a version committed. Pure status transition, no side effects.
    pub async fn commit_version(&self, version_id: &str) -> Result<VersionRecord> {
        let record = self.require_version(version_id).await?;
        match record.status {
            VersionStatus::Pending | VersionStatus::Validating => {
                self.registry
                    .update_version_status(version_id, VersionStatus::Committed)
                    .await?;
                Ok(VersionRecord {
                    status: VersionStatus::Committed,
                    ..record
                })
            }
            VersionStatus::Committed => Ok(record),
            status => Err(PipelineError::state(format!(
                "cannot commit version {version_id} in state {status}"
            ))
            .into()),
        }
    }

    /// Delete a version's snapshots in all three stores and mark it
    /// `rolled_back`. Idempotent: rolling back a rolled-back version is a
    /// no-op. Rolling back a committed or archived version is rejected.
    pub async fn rollback_version(&self, version_id: &str) -> Result<VersionRecord> {
        let record = self.require_version(version_id).await?;
        match record.status {
            VersionStatus::RolledBack => Ok(record),
            VersionStatus::Pending | VersionStatus::Validating => {
                self.delete_snapshots(&record, "rollback_version").await?;
                self.registry
                    .update_version_status(version_id, VersionStatus::RolledBack)
                    .await?;
                Ok(VersionRecord {
                    status: VersionStatus::RolledBack,
                    ..record
                })
            }
            status => Err(PipelineError::state(format!(
                "cannot roll back version {version_id} in state {status}"
            ))
            .into()),
        }
    }

    /// Run the consistency check for a version; a pending version moves to
    /// `validating` first.
    pub async fn validate_version(
        &self,
        version_id: Option<&str>,
        deep: bool,
    ) -> Result<crate::validate::ValidationReport> {
        let record = match version_id {
            Some(id) => self.require_version(id).await?,
            None => self
                .resolve_current_version()
                .await?
                .ok_or_else(|| anyhow::anyhow!("no committed version to validate"))?,
        };
        if record.status == VersionStatus::Pending {
            self.registry
                .update_version_status(&record.version_id, VersionStatus::Validating)
                .await?;
        }
        let validator = crate::validate::ConsistencyValidator::new(
            self.registry.clone(),
            self.graph.clone(),
            self.vector.clone(),
        );
        let report = validator.compare(&record, deep).await;
        let started = Instant::now();
        let logged: Result<()> = match report.status {
            crate::validate::ValidationStatus::Valid => Ok(()),
            ref s => Err(anyhow::anyhow!("validation status: {s:?}")),
        };
        self.log(
            &record.version_id,
            "validate",
            "all",
            "version",
            &record.version_id,
            &logged,
            started,
        )
        .await;
        Ok(report)
    }

    /// Keep the newest `keep_count` committed versions, delete the rest.
    ///
    /// Baselines are skipped while protected. A deletion failure is
    /// recorded as skipped and rotation continues; it never aborts.
    pub async fn rotate_versions(
        &self,
        keep_count: usize,
        protect_baseline: bool,
    ) -> Result<RotationReport> {
        let committed = self
            .registry
            .list_versions(Some(VersionStatus::Committed))
            .await?;

        let mut report = RotationReport::default();
        let mut kept = 0usize;
        for record in committed {
            let baseline = is_baseline(&record.version_id);
            if baseline && protect_baseline {
                report
                    .skipped
                    .push((record.version_id.clone(), RotationOutcome::SkippedBaseline));
                continue;
            }
            if kept < keep_count {
                kept += 1;
                report.kept.push(record.version_id.clone());
                continue;
            }
            match self.archive_version(&record).await {
                Ok(()) => report.deleted.push(record.version_id.clone()),
                Err(e) => report.skipped.push((
                    record.version_id.clone(),
                    RotationOutcome::SkippedError(format!("{e:#}")),
                )),
            }
        }
        Ok(report)
    }

    /// Delete a committed version's snapshots and mark it archived.
    async fn archive_version(&self, record: &VersionRecord) -> Result<()> {
        self.delete_snapshots(record, "rotate_versions").await?;
        self.registry
            .update_version_status(&record.version_id, VersionStatus::Archived)
            .await?;
        self.registry.purge_log(&record.version_id).await?;
        Ok(())
    }

    async fn delete_snapshots(&self, record: &VersionRecord, operation: &str) -> Result<()> {
        if let Some(table) = &record.metadata_ref {
            // The baseline's metadata ref is the live table; never drop it.
            if table != "chapter_metadata" {
                let started = Instant::now();
                let result = self.registry.drop_metadata_snapshot(table).await;
                self.log(
                    &record.version_id,
                    operation,
                    "metadata",
                    "snapshot",
                    table,
                    &result,
                    started,
                )
                .await;
                result?;
            }
        }
        if let Some(vector_ref) = &record.vector_ref {
            let started = Instant::now();
            let result = if is_baseline(&record.version_id) {
                self.vector.delete_alias(vector_ref).await
            } else {
                self.vector.delete_snapshot(vector_ref).await
            };
            self.log(
                &record.version_id,
                operation,
                "vector",
                "snapshot",
                vector_ref,
                &result,
                started,
            )
            .await;
            result?;
        }
        if let Some(marker) = &record.graph_ref {
            let started = Instant::now();
            let result = self.graph.remove_marker(marker).await;
            self.log(
                &record.version_id,
                operation,
                "graph",
                "marker",
                marker,
                &result,
                started,
            )
            .await;
            result?;
        }
        Ok(())
    }

    /// Register the current, already-existing tri-store state as the
    /// baseline version, without copying any data.
    ///
    /// Tags live graph nodes with the baseline marker and aliases the live
    /// vector collection, then verifies both actually took effect; partial
    /// tagging is unwound on verification failure. Idempotent: an existing
    /// baseline's id is returned untouched.
    pub async fn run_baseline_migration(&self, description: &str) -> Result<String> {
        if let Some(existing) = self.registry.find_baseline().await? {
            return Ok(existing.version_id);
        }

        let version_id = format!("{BASELINE_PREFIX}{}", Utc::now().format("%Y%m%d_%H%M%S"));

        let started = Instant::now();
        let tagged = self.graph.add_marker(&version_id).await;
        self.log(
            &version_id,
            "baseline_migration",
            "graph",
            "marker",
            &version_id,
            &tagged,
            started,
        )
        .await;
        let tagged = tagged.context("baseline graph tagging failed")?;

        let started = Instant::now();
        let aliased = self.vector.create_alias(&version_id).await;
        self.log(
            &version_id,
            "baseline_migration",
            "vector",
            "alias",
            &version_id,
            &aliased,
            started,
        )
        .await;
        if let Err(e) = aliased {
            let _ = self.graph.remove_marker(&version_id).await;
            return Err(e.context("baseline vector alias failed"));
        }

        // Post-tagging verification: the marker must be visible (when any
        // node was tagged) and the alias must resolve, else unwind
        // everything and raise.
        let marker_ok = tagged == 0
            || self.graph.marker_exists(&version_id).await.unwrap_or(false);
        let alias_ok = self.vector.alias_exists(&version_id).await.unwrap_or(false);
        if !marker_ok || !alias_ok {
            let _ = self.graph.remove_marker(&version_id).await;
            let _ = self.vector.delete_alias(&version_id).await;
            bail!(
                "baseline verification failed for {version_id} (marker: {marker_ok}, alias: {alias_ok})"
            );
        }

        let record = VersionRecord {
            version_id: version_id.clone(),
            created_at: Utc::now(),
            status: VersionStatus::Committed,
            description: description.to_string(),
            // Points at the live table; the baseline copies nothing.
            metadata_ref: Some("chapter_metadata".to_string()),
            vector_ref: Some(version_id.clone()),
            graph_ref: Some(version_id.clone()),
            unit_count: self.registry.total_unit_count().await.unwrap_or(0),
        };
        self.registry.insert_version(&record).await?;
        Ok(version_id)
    }

    async fn require_version(&self, version_id: &str) -> Result<VersionRecord> {
        self.registry
            .get_version(version_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("unknown version: {version_id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate::run_migrations;
    use crate::models::Chapter;
    use crate::stores::memory::{MemoryGraphStore, MemoryVectorStore};
    use crate::stores::Distance;
    use serde_json::json;

    struct Fixture {
        _dir: tempfile::TempDir,
        registry: Arc<MetadataRegistry>,
        graph: Arc<MemoryGraphStore>,
        vector: Arc<MemoryVectorStore>,
        coordinator: VersionCoordinator,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::connect(&dir.path().join("meta.sqlite")).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let registry = Arc::new(MetadataRegistry::new(pool));
        let graph = Arc::new(MemoryGraphStore::new());
        let vector = Arc::new(MemoryVectorStore::new());
        vector.ensure_collection(8, Distance::Cosine).await.unwrap();
        graph
            .merge_node("Paragraph", "t:ch1:1.1", json!({"text": "x"}))
            .await
            .unwrap();
        registry
            .record_ingestion(
                &Chapter {
                    textbook_id: "t".to_string(),
                    number: 1,
                    title: "T".to_string(),
                    sections: vec![],
                },
                "hash",
                1,
            )
            .await
            .unwrap();
        let coordinator =
            VersionCoordinator::new(registry.clone(), graph.clone(), vector.clone(), "version");
        Fixture {
            _dir: dir,
            registry,
            graph,
            vector,
            coordinator,
        }
    }

    #[tokio::test]
    async fn create_then_commit() {
        let f = fixture().await;
        let record = f.coordinator.create_version("first snapshot").await.unwrap();
        assert_eq!(record.status, VersionStatus::Pending);
        assert!(record.version_id.starts_with("version_"));
        assert!(record.metadata_ref.is_some());
        assert!(record.vector_ref.is_some());
        assert!(f
            .graph
            .marker_exists(&record.version_id)
            .await
            .unwrap());

        let committed = f
            .coordinator
            .commit_version(&record.version_id)
            .await
            .unwrap();
        assert_eq!(committed.status, VersionStatus::Committed);
        assert_eq!(
            f.coordinator
                .resolve_current_version()
                .await
                .unwrap()
                .unwrap()
                .version_id,
            record.version_id
        );
    }

    #[tokio::test]
    async fn rollback_is_idempotent_and_cleans_up() {
        let f = fixture().await;
        let record = f.coordinator.create_version("doomed").await.unwrap();
        let rolled = f
            .coordinator
            .rollback_version(&record.version_id)
            .await
            .unwrap();
        assert_eq!(rolled.status, VersionStatus::RolledBack);
        assert!(!f.graph.marker_exists(&record.version_id).await.unwrap());
        assert!(f.vector.snapshot_names().is_empty());
        assert_eq!(
            f.registry
                .snapshot_unit_count(record.metadata_ref.as_ref().unwrap())
                .await
                .unwrap(),
            None
        );

        // Second rollback: no-op, not an error
        let again = f
            .coordinator
            .rollback_version(&record.version_id)
            .await
            .unwrap();
        assert_eq!(again.status, VersionStatus::RolledBack);
    }

    #[tokio::test]
    async fn rollback_of_committed_is_rejected() {
        let f = fixture().await;
        let record = f.coordinator.create_version("keeper").await.unwrap();
        f.coordinator
            .commit_version(&record.version_id)
            .await
            .unwrap();
        let err = f
            .coordinator
            .rollback_version(&record.version_id)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("state machine violation"));
    }

    #[tokio::test]
    async fn operations_are_logged() {
        let f = fixture().await;
        let record = f.coordinator.create_version("audited").await.unwrap();
        let log = f.registry.list_log(&record.version_id).await.unwrap();
        let systems: Vec<&str> = log.iter().map(|e| e.system.as_str()).collect();
        assert!(systems.contains(&"metadata"));
        assert!(systems.contains(&"vector"));
        assert!(systems.contains(&"graph"));
        assert!(log.iter().all(|e| e.status == "success"));
    }

    #[tokio::test]
    async fn baseline_is_idempotent() {
        let f = fixture().await;
        let first = f
            .coordinator
            .run_baseline_migration("pre-versioning data")
            .await
            .unwrap();
        assert!(first.starts_with(BASELINE_PREFIX));
        let record = f.registry.get_version(&first).await.unwrap().unwrap();
        assert_eq!(record.status, VersionStatus::Committed);
        assert!(f.vector.alias_exists(&first).await.unwrap());

        let second = f
            .coordinator
            .run_baseline_migration("pre-versioning data")
            .await
            .unwrap();
        assert_eq!(first, second);
        // no duplicate record
        let all = f.registry.list_versions(None).await.unwrap();
        assert_eq!(
            all.iter().filter(|v| is_baseline(&v.version_id)).count(),
            1
        );
    }

    #[tokio::test]
    async fn rotation_keeps_newest_and_protects_baseline() {
        let f = fixture().await;
        f.coordinator.run_baseline_migration("baseline").await.unwrap();

        // Five committed versions with hand-written ascending ids
        for i in 1..=5 {
            f.registry
                .insert_version(&VersionRecord {
                    version_id: format!("version_2025010{i}_000000"),
                    created_at: Utc::now(),
                    status: VersionStatus::Committed,
                    description: String::new(),
                    metadata_ref: None,
                    vector_ref: None,
                    graph_ref: None,
                    unit_count: 0,
                })
                .await
                .unwrap();
        }

        let report = f.coordinator.rotate_versions(2, true).await.unwrap();
        assert_eq!(
            report.kept,
            vec!["version_20250105_000000", "version_20250104_000000"]
        );
        assert_eq!(report.deleted.len(), 3);
        assert!(report
            .skipped
            .iter()
            .any(|(id, o)| is_baseline(id) && *o == RotationOutcome::SkippedBaseline));

        // Deleted versions are archived, kept ones still committed
        for id in &report.deleted {
            assert_eq!(
                f.registry.get_version(id).await.unwrap().unwrap().status,
                VersionStatus::Archived
            );
        }
        for id in &report.kept {
            assert_eq!(
                f.registry.get_version(id).await.unwrap().unwrap().status,
                VersionStatus::Committed
            );
        }
        // Baseline untouched
        let baseline = f.registry.find_baseline().await.unwrap().unwrap();
        assert_eq!(baseline.status, VersionStatus::Committed);
    }

    #[tokio::test]
    async fn unprotected_rotation_can_delete_baseline() {
        let f = fixture().await;
        let baseline_id = f
            .coordinator
            .run_baseline_migration("baseline")
            .await
            .unwrap();
        for i in 1..=2 {
            f.registry
                .insert_version(&VersionRecord {
                    version_id: format!("version_2025010{i}_000000"),
                    created_at: Utc::now(),
                    status: VersionStatus::Committed,
                    description: String::new(),
                    metadata_ref: None,
                    vector_ref: None,
                    graph_ref: None,
                    unit_count: 0,
                })
                .await
                .unwrap();
        }
        // Baseline sorts before version_* ids, so keep=2 retains the two
        // recent versions and the explicit override lets it be deleted.
        let report = f.coordinator.rotate_versions(2, false).await.unwrap();
        assert!(report.deleted.contains(&baseline_id));
        assert!(!f.graph.marker_exists(&baseline_id).await.unwrap());
        assert!(!f.vector.alias_exists(&baseline_id).await.unwrap());
    }

    #[tokio::test]
    async fn commit_of_rolled_back_is_rejected() {
        let f = fixture().await;
        let record = f.coordinator.create_version("x").await.unwrap();
        f.coordinator
            .rollback_version(&record.version_id)
            .await
            .unwrap();
        assert!(f
            .coordinator
            .commit_version(&record.version_id)
            .await
            .is_err());
    }
}
