//! Ingestion pipeline orchestration.
//!
//! Coordinates the full flow per chapter file: parse → validate →
//! fingerprint → skip check → graph/vector writes → metadata record.
//! The metadata write is always last, so a cancelled ingestion can never
//! leave the registry claiming writes that did not happen.
//!
//! Independent chapter files are processed by a bounded worker pool; a
//! single chapter stays strictly sequential to preserve the walker's total
//! order for NEXT/PREV linking. A validation failure is fatal for that file
//! only — the rest of the batch proceeds.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use walkdir::WalkDir;

use crate::config::Config;
use crate::db;
use crate::embedding::{create_embedder, Embedder};
use crate::error::PipelineError;
use crate::fingerprint::fingerprint;
use crate::metadata::{ChangeStatus, MetadataRegistry};
use crate::models::{Chapter, ChapterWriteReport, UpsertOutcome};
use crate::stores::{build_graph_store, build_vector_store, Distance, GraphStore, VectorStore};
use crate::walker::{validate_chapter, walk_chapter};
use crate::writer::MultiStoreWriter;

#[derive(Debug, Clone, Default)]
pub struct IngestRunOptions {
    /// Ignore the fingerprint skip — re-write even unchanged chapters.
    pub full: bool,
    /// Report what would happen without writing anything.
    pub dry_run: bool,
    /// Maximum number of chapter files to process.
    pub limit: Option<usize>,
}

/// Outcome for one chapter file.
#[derive(Debug)]
pub enum ChapterOutcome {
    Skipped {
        version: i64,
    },
    Written {
        report: ChapterWriteReport,
        outcome: UpsertOutcome,
    },
}

#[derive(Debug, Default)]
pub struct IngestSummary {
    pub files_found: usize,
    pub chapters_written: usize,
    pub chapters_skipped: usize,
    pub files_failed: usize,
    pub units_succeeded: usize,
    pub units_failed: usize,
}

/// Find chapter JSON files under a path (or accept a single file as-is).
pub fn discover_chapter_files(path: &Path, include_globs: &[String]) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        bail!("ingest path does not exist: {}", path.display());
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in include_globs {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob: {pattern}"))?);
    }
    let globs: GlobSet = builder.build()?;

    let mut files = Vec::new();
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(path).unwrap_or(entry.path());
        if globs.is_match(relative) {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

/// Parse and statically validate one chapter file.
pub fn load_chapter(path: &Path) -> Result<Chapter> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let chapter: Chapter = serde_json::from_str(&content)
        .map_err(|e| PipelineError::validation(format!("{}: {e}", path.display())))?;
    validate_chapter(&chapter)?;
    Ok(chapter)
}

/// Ingest one parsed chapter through all three stores.
///
/// Returns `Skipped` when the fingerprint matches the registry and
/// `skip_unchanged` holds; otherwise writes graph and vector first, and
/// records metadata as the final step.
pub async fn ingest_chapter(
    chapter: &Chapter,
    registry: &MetadataRegistry,
    writer: &MultiStoreWriter,
    skip_unchanged: bool,
) -> Result<ChapterOutcome> {
    let hash = fingerprint(chapter)?;

    if skip_unchanged {
        if let ChangeStatus::Unchanged { version } = registry
            .change_status(&chapter.textbook_id, chapter.number, &hash)
            .await?
        {
            return Ok(ChapterOutcome::Skipped { version });
        }
    }

    let report = writer.write_chapter(chapter).await?;

    // Metadata is the last step of a successful ingestion.
    let outcome = registry
        .record_ingestion(chapter, &hash, report.units_succeeded as i64)
        .await?;

    Ok(ChapterOutcome::Written { report, outcome })
}

/// Run the `ingest` command over a file or directory.
pub async fn run_ingest(
    config: &Config,
    path: &Path,
    opts: IngestRunOptions,
) -> Result<IngestSummary> {
    let mut files = discover_chapter_files(path, &config.ingestion.include_globs)?;
    if let Some(limit) = opts.limit {
        files.truncate(limit);
    }

    let mut summary = IngestSummary {
        files_found: files.len(),
        ..Default::default()
    };

    if opts.dry_run {
        println!("ingest {} (dry-run)", path.display());
        for file in &files {
            match load_chapter(file) {
                Ok(chapter) => {
                    let units = walk_chapter(&chapter).len();
                    println!(
                        "  {} -> {} ch{} ({} units)",
                        file.display(),
                        chapter.textbook_id,
                        chapter.number,
                        units
                    );
                }
                Err(e) => println!("  {} -> invalid: {e:#}", file.display()),
            }
        }
        return Ok(summary);
    }

    let pool = db::connect(&config.metadata.path).await?;
    crate::migrate::run_migrations(&pool).await?;
    let registry = Arc::new(MetadataRegistry::new(pool));

    let graph: Arc<dyn GraphStore> = build_graph_store(config)?;
    let vector: Arc<dyn VectorStore> = build_vector_store(config)?;
    let embedder: Arc<dyn Embedder> = create_embedder(&config.embedding)?;

    let distance = Distance::parse(&config.vector.distance)
        .ok_or_else(|| anyhow::anyhow!("invalid vector distance"))?;
    vector
        .ensure_collection(embedder.dims(), distance)
        .await
        .context("vector collection setup failed")?;

    let writer = Arc::new(MultiStoreWriter::new(
        graph,
        vector,
        embedder,
        &config.ingestion,
    ));
    let skip_unchanged = config.ingestion.skip_unchanged && !opts.full;
    let semaphore = Arc::new(Semaphore::new(config.ingestion.workers));

    let mut tasks: JoinSet<(PathBuf, Result<ChapterOutcome>)> = JoinSet::new();
    for file in files {
        let registry = registry.clone();
        let writer = writer.clone();
        let semaphore = semaphore.clone();
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            let result = async {
                let chapter = load_chapter(&file)?;
                ingest_chapter(&chapter, &registry, &writer, skip_unchanged).await
            }
            .await;
            (file, result)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let (file, result) = joined.context("ingestion worker panicked")?;
        match result {
            Ok(ChapterOutcome::Skipped { version }) => {
                summary.chapters_skipped += 1;
                println!("  {} unchanged (v{version}), skipped", file.display());
            }
            Ok(ChapterOutcome::Written { report, outcome }) => {
                summary.chapters_written += 1;
                summary.units_succeeded += report.units_succeeded;
                summary.units_failed += report.units_failed;
                println!(
                    "  {} -> v{} ({} units, {} failed, {} links)",
                    file.display(),
                    outcome.new_version,
                    report.units_succeeded,
                    report.units_failed,
                    report.sequence_links,
                );
                for err in &report.errors {
                    eprintln!("    unit {} failed: {}", err.chunk_id, err.message);
                }
            }
            Err(e) => {
                summary.files_failed += 1;
                eprintln!("  {} failed: {e:#}", file.display());
            }
        }
    }

    println!("ingest {}", path.display());
    println!("  files:    {}", summary.files_found);
    println!("  written:  {}", summary.chapters_written);
    println!("  skipped:  {}", summary.chapters_skipped);
    println!("  failed:   {}", summary.files_failed);
    println!("  units:    {} ok, {} failed", summary.units_succeeded, summary.units_failed);
    println!("ok");

    Ok(summary)
}
