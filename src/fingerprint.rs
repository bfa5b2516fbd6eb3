//! Content fingerprinting for idempotent-skip decisions.
//!
//! The fingerprint is a SHA-256 digest of the chapter's canonical JSON
//! serialization. Serde emits struct fields in declaration order, so the
//! digest is a pure function of the structured content — independent of
//! in-memory identity, process lifetime, and ingestion order — and the
//! producer (ingestion) and consumer (skip check) always agree.

use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::models::Chapter;

/// Compute the stable content hash of a chapter.
pub fn fingerprint(chapter: &Chapter) -> Result<String> {
    let canonical = serde_json::to_vec(chapter)?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(format!("{:x}", hasher.finalize()))
}
