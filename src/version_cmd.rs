//! CLI entry points for the version lifecycle.
//!
//! Thin glue between the `version` / `validate` subcommands and
//! [`VersionCoordinator`]: builds the stores, runs one operation, prints a
//! structured result. Callers must read the per-store sub-status — absence
//! of an error alone does not mean every system succeeded.

use anyhow::Result;
use std::sync::Arc;

use crate::config::Config;
use crate::db;
use crate::metadata::MetadataRegistry;
use crate::migrate::run_migrations;
use crate::stores::{build_graph_store, build_vector_store};
use crate::validate::{SectionStatus, SystemSection, ValidationStatus};
use crate::version::{RotationOutcome, VersionCoordinator};

async fn coordinator(config: &Config) -> Result<(Arc<MetadataRegistry>, VersionCoordinator)> {
    let pool = db::connect(&config.metadata.path).await?;
    run_migrations(&pool).await?;
    let registry = Arc::new(MetadataRegistry::new(pool));
    let coordinator = VersionCoordinator::new(
        registry.clone(),
        build_graph_store(config)?,
        build_vector_store(config)?,
        &config.versioning.prefix,
    );
    Ok((registry, coordinator))
}

pub async fn run_create(config: &Config, description: &str) -> Result<()> {
    let (_registry, coordinator) = coordinator(config).await?;
    let record = coordinator.create_version(description).await?;
    println!("created version {}", record.version_id);
    println!("  status:       {}", record.status);
    println!("  metadata ref: {}", record.metadata_ref.as_deref().unwrap_or("-"));
    println!("  vector ref:   {}", record.vector_ref.as_deref().unwrap_or("-"));
    println!("  graph ref:    {}", record.graph_ref.as_deref().unwrap_or("-"));
    println!("  units:        {}", record.unit_count);
    Ok(())
}

pub async fn run_commit(config: &Config, version_id: &str) -> Result<()> {
    let (_registry, coordinator) = coordinator(config).await?;
    let record = coordinator.commit_version(version_id).await?;
    println!("version {} is {}", record.version_id, record.status);
    Ok(())
}

pub async fn run_rollback(config: &Config, version_id: &str) -> Result<()> {
    let (_registry, coordinator) = coordinator(config).await?;
    let record = coordinator.rollback_version(version_id).await?;
    println!("version {} is {}", record.version_id, record.status);
    Ok(())
}

pub async fn run_rotate(config: &Config, keep: Option<usize>, include_baseline: bool) -> Result<()> {
    let (_registry, coordinator) = coordinator(config).await?;
    let keep = keep.unwrap_or(config.versioning.keep_count);
    let protect = config.versioning.protect_baseline && !include_baseline;
    let report = coordinator.rotate_versions(keep, protect).await?;

    println!("rotate (keep {keep})");
    println!("  kept:    {}", report.kept.len());
    for id in &report.kept {
        println!("    {id}");
    }
    println!("  deleted: {}", report.deleted.len());
    for id in &report.deleted {
        println!("    {id}");
    }
    if !report.skipped.is_empty() {
        println!("  skipped: {}", report.skipped.len());
        for (id, outcome) in &report.skipped {
            match outcome {
                RotationOutcome::SkippedBaseline => println!("    {id} (baseline)"),
                RotationOutcome::SkippedError(e) => println!("    {id} (error: {e})"),
                RotationOutcome::Deleted => {}
            }
        }
    }
    Ok(())
}

pub async fn run_baseline(config: &Config, description: &str) -> Result<()> {
    let (_registry, coordinator) = coordinator(config).await?;
    let version_id = coordinator.run_baseline_migration(description).await?;
    println!("baseline version: {version_id}");
    Ok(())
}

pub async fn run_list(config: &Config, show_log: Option<&str>) -> Result<()> {
    let (registry, _coordinator) = coordinator(config).await?;

    if let Some(version_id) = show_log {
        let entries = registry.list_log(version_id).await?;
        if entries.is_empty() {
            println!("no operations logged for {version_id}");
            return Ok(());
        }
        for entry in entries {
            println!(
                "{} {:<18} {:<8} {:<8} {} ({} ms){}",
                entry.ts.format("%Y-%m-%d %H:%M:%S"),
                entry.operation,
                entry.system,
                entry.status,
                entry.entity_id,
                entry.duration_ms,
                entry
                    .error
                    .map(|e| format!(" — {e}"))
                    .unwrap_or_default(),
            );
        }
        return Ok(());
    }

    let versions = registry.list_versions(None).await?;
    if versions.is_empty() {
        println!("no versions");
        return Ok(());
    }
    println!("{:<32} {:<12} {:>8}  description", "version", "status", "units");
    for record in versions {
        println!(
            "{:<32} {:<12} {:>8}  {}",
            record.version_id, record.status.as_str(), record.unit_count, record.description
        );
    }
    Ok(())
}

pub async fn run_validate(config: &Config, version_id: Option<&str>, fast: bool) -> Result<()> {
    let (_registry, coordinator) = coordinator(config).await?;
    let report = coordinator.validate_version(version_id, !fast).await?;

    let status = match report.status {
        ValidationStatus::Valid => "valid",
        ValidationStatus::Mismatch => "mismatch",
        ValidationStatus::Error => "error",
    };
    println!("validate {} — {status}", report.version_id);
    print_section("metadata", &report.metadata);
    print_section("vector", &report.vector);
    print_section("graph", &report.graph);

    if report.deep {
        if !report.only_in_vector.is_empty() {
            println!("  only in vector store ({}):", report.only_in_vector.len());
            for id in &report.only_in_vector {
                println!("    {id}");
            }
        }
        if !report.only_in_graph.is_empty() {
            println!("  only in graph store ({}):", report.only_in_graph.len());
            for id in &report.only_in_graph {
                println!("    {id}");
            }
        }
    } else {
        println!("  (fast mode: counts only, identifier sets not compared)");
    }
    Ok(())
}

fn print_section(name: &str, section: &SystemSection) {
    match section.status {
        SectionStatus::Ok => println!(
            "  {name:<9} {}",
            section.count.map(|c| c.to_string()).unwrap_or_default()
        ),
        SectionStatus::Error => println!(
            "  {name:<9} error: {}",
            section.error.as_deref().unwrap_or("unknown")
        ),
    }
}
