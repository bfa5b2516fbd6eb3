//! Metadata schema migrations.
//!
//! All statements are additive and idempotent (`IF NOT EXISTS`), so `init`
//! can run any number of times against a live database. Version snapshot
//! tables are created per version by the coordinator, not here.

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Chapter metadata: single source of truth for "has this chapter changed"
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chapter_metadata (
            textbook_id TEXT NOT NULL,
            chapter_number INTEGER NOT NULL,
            title TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            unit_count INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (textbook_id, chapter_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Version records: one row per logical tri-store snapshot
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS version_records (
            version_id TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL,
            status TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            metadata_ref TEXT,
            vector_ref TEXT,
            graph_ref TEXT,
            unit_count INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Operation log: append-only, never updated or deleted row-wise
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS operation_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            version_id TEXT NOT NULL,
            ts INTEGER NOT NULL,
            operation TEXT NOT NULL,
            system TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            status TEXT NOT NULL,
            error TEXT,
            duration_ms INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chapter_metadata_textbook ON chapter_metadata(textbook_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_version_records_status ON version_records(status)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_operation_log_version ON operation_log(version_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::connect(&dir.path().join("meta.sqlite")).await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chapter_metadata")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
        pool.close().await;
    }
}
