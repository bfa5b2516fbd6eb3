//! Database statistics and health overview.
//!
//! Provides a quick summary of what's ingested: chapter and unit counts,
//! version lifecycle totals, and per-textbook breakdowns. Used by
//! `bookforge stats` to give confidence that ingestion and versioning are
//! working as expected.

use anyhow::Result;
use std::sync::Arc;

use crate::config::Config;
use crate::db;
use crate::metadata::MetadataRegistry;
use crate::migrate::run_migrations;
use crate::models::VersionStatus;

/// Run the stats command: query the registry and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(&config.metadata.path).await?;
    run_migrations(&pool).await?;
    let registry = Arc::new(MetadataRegistry::new(pool));

    let chapters = registry.chapter_count().await?;
    let units = registry.total_unit_count().await?;
    let versions = registry.list_versions(None).await?;
    let committed = versions
        .iter()
        .filter(|v| v.status == VersionStatus::Committed)
        .count();

    let db_size = std::fs::metadata(&config.metadata.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Bookforge — Registry Stats");
    println!("==========================");
    println!();
    println!("  Database:   {}", config.metadata.path.display());
    println!("  Size:       {}", format_bytes(db_size));
    println!();
    println!("  Chapters:   {}", chapters);
    println!("  Units:      {}", units);
    println!("  Versions:   {} ({} committed)", versions.len(), committed);

    let breakdown = registry.textbook_breakdown().await?;
    if !breakdown.is_empty() {
        println!();
        println!("  By textbook:");
        for (textbook_id, chapter_count, unit_count) in breakdown {
            println!("    {textbook_id}: {chapter_count} chapters, {unit_count} units");
        }
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_formatting() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
