//! Chapter metadata registry, version records, and the operation log.
//!
//! The registry is the single source of truth for "has this chapter
//! changed". It deliberately splits the changed-check from the write:
//! [`MetadataRegistry::change_status`] is a read-only query the ingestion
//! driver runs *first*, and [`MetadataRegistry::record_ingestion`] is the
//! *last* step of a successful chapter ingestion — a cancelled ingestion
//! can leave the other stores partially written, but never the registry
//! claiming writes that did not finish.

use anyhow::{bail, Result};
use chrono::{TimeZone, Utc};
use sqlx::{Row, SqlitePool};

use crate::models::{
    Chapter, ChapterMetadata, OperationLogEntry, UpsertOutcome, VersionRecord, VersionStatus,
    BASELINE_PREFIX,
};

/// Changed/unchanged decision for an incoming chapter fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeStatus {
    /// No record exists yet.
    New,
    /// A record exists and its hash differs.
    Changed { previous_version: i64 },
    /// A record exists with an identical hash — the caller must skip all
    /// downstream writes for this chapter.
    Unchanged { version: i64 },
}

pub struct MetadataRegistry {
    pool: SqlitePool,
}

fn table_safe(version_id: &str) -> Result<()> {
    if version_id.is_empty()
        || !version_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        bail!("version id not usable as identifier: {version_id:?}");
    }
    Ok(())
}

fn row_to_version(row: &sqlx::sqlite::SqliteRow) -> Result<VersionRecord> {
    Ok(VersionRecord {
        version_id: row.get("version_id"),
        created_at: Utc
            .timestamp_opt(row.get::<i64, _>("created_at"), 0)
            .single()
            .unwrap_or_else(Utc::now),
        status: VersionStatus::parse(&row.get::<String, _>("status"))?,
        description: row.get("description"),
        metadata_ref: row.get("metadata_ref"),
        vector_ref: row.get("vector_ref"),
        graph_ref: row.get("graph_ref"),
        unit_count: row.get("unit_count"),
    })
}

impl MetadataRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ---- chapter metadata ----

    pub async fn get_chapter(
        &self,
        textbook_id: &str,
        chapter_number: u32,
    ) -> Result<Option<ChapterMetadata>> {
        let row = sqlx::query(
            "SELECT textbook_id, chapter_number, title, content_hash, version, unit_count, updated_at
             FROM chapter_metadata WHERE textbook_id = ? AND chapter_number = ?",
        )
        .bind(textbook_id)
        .bind(chapter_number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| ChapterMetadata {
            textbook_id: row.get("textbook_id"),
            chapter_number: row.get::<i64, _>("chapter_number") as u32,
            title: row.get("title"),
            content_hash: row.get("content_hash"),
            version: row.get("version"),
            unit_count: row.get("unit_count"),
            updated_at: row.get("updated_at"),
        }))
    }

    /// Read-only skip check: does this fingerprint differ from the stored one?
    pub async fn change_status(
        &self,
        textbook_id: &str,
        chapter_number: u32,
        content_hash: &str,
    ) -> Result<ChangeStatus> {
        match self.get_chapter(textbook_id, chapter_number).await? {
            None => Ok(ChangeStatus::New),
            Some(existing) if existing.content_hash == content_hash => Ok(ChangeStatus::Unchanged {
                version: existing.version,
            }),
            Some(existing) => Ok(ChangeStatus::Changed {
                previous_version: existing.version,
            }),
        }
    }

    /// Record a completed chapter ingestion.
    ///
    /// First ingestion creates version 1. A differing hash increments the
    /// version and updates hash, title, counts, and timestamp. An identical
    /// hash mutates nothing and returns `changed = false`.
    pub async fn record_ingestion(
        &self,
        chapter: &Chapter,
        content_hash: &str,
        unit_count: i64,
    ) -> Result<UpsertOutcome> {
        let existing = self
            .get_chapter(&chapter.textbook_id, chapter.number)
            .await?;
        let now = Utc::now().timestamp();

        match existing {
            None => {
                sqlx::query(
                    "INSERT INTO chapter_metadata
                     (textbook_id, chapter_number, title, content_hash, version, unit_count, updated_at)
                     VALUES (?, ?, ?, ?, 1, ?, ?)",
                )
                .bind(&chapter.textbook_id)
                .bind(chapter.number)
                .bind(&chapter.title)
                .bind(content_hash)
                .bind(unit_count)
                .bind(now)
                .execute(&self.pool)
                .await?;
                Ok(UpsertOutcome {
                    previous_version: None,
                    new_version: 1,
                    changed: true,
                })
            }
            Some(record) if record.content_hash == content_hash => Ok(UpsertOutcome {
                previous_version: Some(record.version),
                new_version: record.version,
                changed: false,
            }),
            Some(record) => {
                let new_version = record.version + 1;
                sqlx::query(
                    "UPDATE chapter_metadata
                     SET title = ?, content_hash = ?, version = ?, unit_count = ?, updated_at = ?
                     WHERE textbook_id = ? AND chapter_number = ?",
                )
                .bind(&chapter.title)
                .bind(content_hash)
                .bind(new_version)
                .bind(unit_count)
                .bind(now)
                .bind(&chapter.textbook_id)
                .bind(chapter.number)
                .execute(&self.pool)
                .await?;
                Ok(UpsertOutcome {
                    previous_version: Some(record.version),
                    new_version,
                    changed: true,
                })
            }
        }
    }

    /// Sum of unit counts across all chapters (live table).
    pub async fn total_unit_count(&self) -> Result<i64> {
        let count: Option<i64> =
            sqlx::query_scalar("SELECT SUM(unit_count) FROM chapter_metadata")
                .fetch_one(&self.pool)
                .await?;
        Ok(count.unwrap_or(0))
    }

    pub async fn chapter_count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM chapter_metadata")
            .fetch_one(&self.pool)
            .await?)
    }

    /// Per-textbook `(textbook_id, chapters, units)` breakdown.
    pub async fn textbook_breakdown(&self) -> Result<Vec<(String, i64, i64)>> {
        let rows = sqlx::query(
            "SELECT textbook_id, COUNT(*) AS chapters, SUM(unit_count) AS units
             FROM chapter_metadata GROUP BY textbook_id ORDER BY textbook_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| {
                (
                    row.get("textbook_id"),
                    row.get("chapters"),
                    row.get::<Option<i64>, _>("units").unwrap_or(0),
                )
            })
            .collect())
    }

    // ---- metadata snapshots ----

    /// Copy the live chapter table into a per-version snapshot table.
    /// Returns the snapshot table name.
    pub async fn snapshot_metadata_table(&self, version_id: &str) -> Result<String> {
        table_safe(version_id)?;
        let table = format!("chapter_metadata_{version_id}");
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {table} AS SELECT * FROM chapter_metadata"
        ))
        .execute(&self.pool)
        .await?;
        Ok(table)
    }

    pub async fn drop_metadata_snapshot(&self, table: &str) -> Result<()> {
        table_safe(table)?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Unit count recorded in a snapshot table, or `None` if it is missing.
    pub async fn snapshot_unit_count(&self, table: &str) -> Result<Option<i64>> {
        table_safe(table)?;
        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;
        if !exists {
            return Ok(None);
        }
        let count: Option<i64> =
            sqlx::query_scalar(&format!("SELECT SUM(unit_count) FROM {table}"))
                .fetch_one(&self.pool)
                .await?;
        Ok(Some(count.unwrap_or(0)))
    }

    // ---- version records ----

    pub async fn insert_version(&self, record: &VersionRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO version_records
             (version_id, created_at, status, description, metadata_ref, vector_ref, graph_ref, unit_count)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.version_id)
        .bind(record.created_at.timestamp())
        .bind(record.status.as_str())
        .bind(&record.description)
        .bind(&record.metadata_ref)
        .bind(&record.vector_ref)
        .bind(&record.graph_ref)
        .bind(record.unit_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_version(&self, version_id: &str) -> Result<Option<VersionRecord>> {
        let row = sqlx::query("SELECT * FROM version_records WHERE version_id = ?")
            .bind(version_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_version).transpose()
    }

    pub async fn update_version_status(
        &self,
        version_id: &str,
        status: VersionStatus,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE version_records SET status = ? WHERE version_id = ?")
            .bind(status.as_str())
            .bind(version_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("unknown version: {version_id}");
        }
        Ok(())
    }

    /// Versions sorted by id descending — ids embed a timestamp, so this is
    /// also newest-first.
    pub async fn list_versions(&self, status: Option<VersionStatus>) -> Result<Vec<VersionRecord>> {
        let rows = match status {
            Some(s) => {
                sqlx::query(
                    "SELECT * FROM version_records WHERE status = ? ORDER BY version_id DESC",
                )
                .bind(s.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM version_records ORDER BY version_id DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(row_to_version).collect()
    }

    /// The latest committed version, resolved at the moment of the call.
    pub async fn latest_committed(&self) -> Result<Option<VersionRecord>> {
        let row = sqlx::query(
            "SELECT * FROM version_records WHERE status = 'committed'
             ORDER BY version_id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_version).transpose()
    }

    pub async fn find_baseline(&self) -> Result<Option<VersionRecord>> {
        let row = sqlx::query(
            "SELECT * FROM version_records WHERE version_id LIKE ? ORDER BY version_id LIMIT 1",
        )
        .bind(format!("{BASELINE_PREFIX}%"))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_version).transpose()
    }

    // ---- operation log ----

    pub async fn append_log(&self, entry: &OperationLogEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO operation_log
             (version_id, ts, operation, system, entity_type, entity_id, status, error, duration_ms)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.version_id)
        .bind(entry.ts.timestamp())
        .bind(&entry.operation)
        .bind(&entry.system)
        .bind(&entry.entity_type)
        .bind(&entry.entity_id)
        .bind(&entry.status)
        .bind(&entry.error)
        .bind(entry.duration_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_log(&self, version_id: &str) -> Result<Vec<OperationLogEntry>> {
        let rows = sqlx::query("SELECT * FROM operation_log WHERE version_id = ? ORDER BY id")
            .bind(version_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| OperationLogEntry {
                version_id: row.get("version_id"),
                ts: Utc
                    .timestamp_opt(row.get::<i64, _>("ts"), 0)
                    .single()
                    .unwrap_or_else(Utc::now),
                operation: row.get("operation"),
                system: row.get("system"),
                entity_type: row.get("entity_type"),
                entity_id: row.get("entity_id"),
                status: row.get("status"),
                error: row.get("error"),
                duration_ms: row.get("duration_ms"),
            })
            .collect())
    }

    /// Delete all operation-log rows belonging to a fully archived version.
    pub async fn purge_log(&self, version_id: &str) -> Result<i64> {
        let result = sqlx::query("DELETE FROM operation_log WHERE version_id = ?")
            .bind(version_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate::run_migrations;
    use crate::models::Chapter;

    async fn registry() -> (tempfile::TempDir, MetadataRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::connect(&dir.path().join("meta.sqlite")).await.unwrap();
        run_migrations(&pool).await.unwrap();
        (dir, MetadataRegistry::new(pool))
    }

    fn chapter(title: &str) -> Chapter {
        Chapter {
            textbook_id: "physics".to_string(),
            number: 1,
            title: title.to_string(),
            sections: vec![],
        }
    }

    #[tokio::test]
    async fn first_ingestion_creates_version_one() {
        let (_dir, registry) = registry().await;
        let outcome = registry
            .record_ingestion(&chapter("Units"), "hash-a", 10)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            UpsertOutcome {
                previous_version: None,
                new_version: 1,
                changed: true
            }
        );
    }

    #[tokio::test]
    async fn identical_hash_is_a_no_op() {
        let (_dir, registry) = registry().await;
        registry
            .record_ingestion(&chapter("Units"), "hash-a", 10)
            .await
            .unwrap();
        let outcome = registry
            .record_ingestion(&chapter("Units"), "hash-a", 10)
            .await
            .unwrap();
        assert!(!outcome.changed);
        assert_eq!(outcome.new_version, 1);
        assert_eq!(
            registry.change_status("physics", 1, "hash-a").await.unwrap(),
            ChangeStatus::Unchanged { version: 1 }
        );
    }

    #[tokio::test]
    async fn changed_hash_bumps_version_exactly_once() {
        let (_dir, registry) = registry().await;
        registry
            .record_ingestion(&chapter("Units"), "hash-a", 10)
            .await
            .unwrap();
        let outcome = registry
            .record_ingestion(&chapter("Units v2"), "hash-b", 11)
            .await
            .unwrap();
        assert_eq!(outcome.previous_version, Some(1));
        assert_eq!(outcome.new_version, 2);
        assert!(outcome.changed);

        let record = registry.get_chapter("physics", 1).await.unwrap().unwrap();
        assert_eq!(record.version, 2);
        assert_eq!(record.title, "Units v2");
        assert_eq!(record.unit_count, 11);
    }

    #[tokio::test]
    async fn snapshot_table_captures_counts() {
        let (_dir, registry) = registry().await;
        registry
            .record_ingestion(&chapter("Units"), "hash-a", 7)
            .await
            .unwrap();
        let table = registry
            .snapshot_metadata_table("version_20250101_000000")
            .await
            .unwrap();
        assert_eq!(table, "chapter_metadata_version_20250101_000000");
        assert_eq!(
            registry.snapshot_unit_count(&table).await.unwrap(),
            Some(7)
        );

        // Later live writes do not affect the snapshot
        registry
            .record_ingestion(&chapter("Units v2"), "hash-b", 9)
            .await
            .unwrap();
        assert_eq!(
            registry.snapshot_unit_count(&table).await.unwrap(),
            Some(7)
        );

        registry.drop_metadata_snapshot(&table).await.unwrap();
        assert_eq!(registry.snapshot_unit_count(&table).await.unwrap(), None);
    }

    #[tokio::test]
    async fn version_ordering_is_lexicographic() {
        let (_dir, registry) = registry().await;
        for ts in ["20250101_000000", "20250103_000000", "20250102_000000"] {
            registry
                .insert_version(&VersionRecord {
                    version_id: format!("version_{ts}"),
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
        let versions = registry
            .list_versions(Some(VersionStatus::Committed))
            .await
            .unwrap();
        let ids: Vec<&str> = versions.iter().map(|v| v.version_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "version_20250103_000000",
                "version_20250102_000000",
                "version_20250101_000000",
            ]
        );
        assert_eq!(
            registry.latest_committed().await.unwrap().unwrap().version_id,
            "version_20250103_000000"
        );
    }

    #[tokio::test]
    async fn operation_log_is_append_only() {
        let (_dir, registry) = registry().await;
        let entry = OperationLogEntry {
            version_id: "version_20250101_000000".to_string(),
            ts: Utc::now(),
            operation: "create_version".to_string(),
            system: "vector".to_string(),
            entity_type: "snapshot".to_string(),
            entity_id: "snapshot_x".to_string(),
            status: "success".to_string(),
            error: None,
            duration_ms: 12,
        };
        registry.append_log(&entry).await.unwrap();
        registry.append_log(&entry).await.unwrap();
        let log = registry.list_log("version_20250101_000000").await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(registry.purge_log("version_20250101_000000").await.unwrap(), 2);
    }
}
