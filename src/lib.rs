//! # Bookforge
//!
//! Tri-store ingestion and version coordination for hierarchical textbook
//! content.
//!
//! Bookforge flattens arbitrarily deep chapter trees (chapter → section →
//! subsection → subsubsection → paragraph) into addressable content units
//! with deterministic identifiers, writes each unit into three independent
//! stores — a graph database, a vector collection, and a relational
//! metadata table — and keeps them mutually consistent across repeated,
//! incremental re-ingestion. A version subsystem snapshots, commits, rolls
//! back, and rotates the aggregate state of all three stores as one logical
//! unit, and a consistency validator detects the stores silently diverging.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌─────────────────────┐
//! │ chapter JSON │──▶│  Walker +    │──▶│ Graph (Neo4j)        │
//! │ (file / dir) │   │  Writer      │   │ Vector (Qdrant)      │
//! └──────────────┘   └──────┬───────┘   │ Metadata (SQLite)    │
//!                           │           └──────────┬──────────┘
//!                    fingerprint skip              │
//!                           │           ┌──────────┴──────────┐
//!                           ▼           ▼                     ▼
//!                    ┌────────────┐ ┌──────────────┐ ┌───────────────┐
//!                    │  Registry  │ │ Coordinator  │ │   Validator   │
//!                    │ (versions) │ │ (snapshots)  │ │ (set compare) │
//!                    └────────────┘ └──────────────┘ └───────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! bookforge init                          # create the metadata database
//! bookforge ingest ./chapters             # ingest a directory of chapters
//! bookforge version baseline -d "legacy"  # tag pre-existing data once
//! bookforge version create -d "nightly"   # snapshot all three stores
//! bookforge validate                      # cross-check the stores
//! bookforge version rotate --keep 5       # bound snapshot growth
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Chapter trees, chunk ids, version records |
//! | [`walker`] | Depth-first chapter flattening |
//! | [`references`] | Figure/table citation extraction |
//! | [`fingerprint`] | Content hashing for idempotent skips |
//! | [`writer`] | Multi-store chapter writer |
//! | [`metadata`] | Chapter registry, version records, operation log |
//! | [`version`] | Version lifecycle coordination |
//! | [`validate`] | Cross-system consistency checks |
//! | [`stores`] | Graph/vector collaborator traits and adapters |
//! | [`embedding`] | Embedding provider abstraction |

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod fingerprint;
pub mod ingest;
pub mod metadata;
pub mod migrate;
pub mod models;
pub mod references;
pub mod search;
pub mod stats;
pub mod stores;
pub mod validate;
pub mod version;
pub mod version_cmd;
pub mod walker;
pub mod writer;
