use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub metadata: MetadataConfig,
    pub graph: GraphConfig,
    pub vector: VectorConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub versioning: VersioningConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetadataConfig {
    /// Path to the SQLite metadata database.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    /// `"neo4j"` for the HTTP adapter, `"memory"` for the in-process store.
    #[serde(default = "default_graph_backend")]
    pub backend: String,
    #[serde(default = "default_graph_uri")]
    pub uri: String,
    #[serde(default = "default_graph_database")]
    pub database: String,
    #[serde(default = "default_graph_user")]
    pub user: String,
    /// Password; falls back to the `NEO4J_PASSWORD` environment variable.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_graph_backend() -> String {
    "neo4j".to_string()
}
fn default_graph_uri() -> String {
    "http://localhost:7474".to_string()
}
fn default_graph_database() -> String {
    "neo4j".to_string()
}
fn default_graph_user() -> String {
    "neo4j".to_string()
}
fn default_store_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    /// `"qdrant"` for the HTTP adapter, `"memory"` for the in-process store.
    #[serde(default = "default_vector_backend")]
    pub backend: String,
    #[serde(default = "default_vector_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_distance")]
    pub distance: String,
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_vector_backend() -> String {
    "qdrant".to_string()
}
fn default_vector_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_collection() -> String {
    "bookforge".to_string()
}
fn default_distance() -> String {
    "cosine".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"openai"`, `"ollama"`, `"ngram"` (offline, deterministic), or `"disabled"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "ngram".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

/// Expansion options for the ingestion pipeline.
///
/// Every flag is an explicit typed field with a default — never a
/// loosely-typed map — so a missing option is a compile error, not a
/// runtime surprise.
#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    /// Concurrent chapter workers. A single chapter is always sequential.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Create NEXT/PREV adjacency edges between consecutive siblings.
    #[serde(default = "default_true")]
    pub link_sequences: bool,
    /// Extract figure/table cross-references from paragraph text.
    #[serde(default = "default_true")]
    pub extract_references: bool,
    /// Skip chapters whose content fingerprint is unchanged.
    #[serde(default = "default_true")]
    pub skip_unchanged: bool,
    /// Glob patterns selecting chapter files under an ingest directory.
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            link_sequences: true,
            extract_references: true,
            skip_unchanged: true,
            include_globs: default_include_globs(),
        }
    }
}

fn default_workers() -> usize {
    4
}
fn default_true() -> bool {
    true
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.json".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct VersioningConfig {
    /// Prefix of generated version ids (`{prefix}_{YYYYMMDD_HHMMSS}`).
    #[serde(default = "default_version_prefix")]
    pub prefix: String,
    /// Committed versions retained by rotation.
    #[serde(default = "default_keep_count")]
    pub keep_count: usize,
    /// Whether rotation skips baseline versions.
    #[serde(default = "default_true")]
    pub protect_baseline: bool,
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            prefix: default_version_prefix(),
            keep_count: default_keep_count(),
            protect_baseline: true,
        }
    }
}

fn default_version_prefix() -> String {
    "version".to_string()
}
fn default_keep_count() -> usize {
    5
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    match config.graph.backend.as_str() {
        "neo4j" | "memory" => {}
        other => anyhow::bail!("Unknown graph backend: '{}'. Must be neo4j or memory.", other),
    }

    match config.vector.backend.as_str() {
        "qdrant" | "memory" => {}
        other => anyhow::bail!(
            "Unknown vector backend: '{}'. Must be qdrant or memory.",
            other
        ),
    }

    match config.vector.distance.as_str() {
        "cosine" | "dot" | "euclid" => {}
        other => anyhow::bail!(
            "Unknown vector distance: '{}'. Must be cosine, dot, or euclid.",
            other
        ),
    }

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }

    match config.embedding.provider.as_str() {
        "ngram" | "disabled" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be openai, ollama, ngram, or disabled.",
            other
        ),
    }

    if config.ingestion.workers == 0 {
        anyhow::bail!("ingestion.workers must be >= 1");
    }

    if config.versioning.keep_count == 0 {
        anyhow::bail!("versioning.keep_count must be >= 1");
    }
    // The prefix is embedded in graph marker labels and snapshot table
    // names, so it must stay strictly alphanumeric and start with a letter.
    if config.versioning.prefix.is_empty()
        || !config
            .versioning
            .prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric())
        || !config
            .versioning
            .prefix
            .starts_with(|c: char| c.is_ascii_alphabetic())
    {
        anyhow::bail!("versioning.prefix must be alphanumeric and start with a letter");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("bookforge.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[metadata]
path = "data/meta.sqlite"

[graph]
backend = "memory"

[vector]
backend = "memory"
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.embedding.provider, "ngram");
        assert_eq!(config.embedding.dims, 384);
        assert_eq!(config.ingestion.workers, 4);
        assert!(config.ingestion.link_sequences);
        assert_eq!(config.versioning.prefix, "version");
        assert!(config.versioning.protect_baseline);
    }

    #[test]
    fn rejects_unknown_backend() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[metadata]
path = "data/meta.sqlite"

[graph]
backend = "dgraph"

[vector]
backend = "memory"
"#,
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn rejects_zero_workers() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[metadata]
path = "data/meta.sqlite"

[graph]
backend = "memory"

[vector]
backend = "memory"

[ingestion]
workers = 0
"#,
        );
        assert!(load_config(&path).is_err());
    }
}
