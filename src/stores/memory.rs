//! In-memory store implementations for tests and offline runs.
//!
//! Uses `HashMap` and `HashSet` behind `std::sync::RwLock` for thread
//! safety. Vector search is brute-force over all stored points. Semantics
//! mirror the HTTP backends: merges are idempotent by key, markers are
//! label sets, aliases and snapshots are plain name registries.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use super::{
    CollectionInfo, Distance, GraphStore, PayloadFilter, ScoredPoint, VectorPoint, VectorStore,
};

struct MemNode {
    label: String,
    props: Value,
}

/// In-memory [`GraphStore`].
#[derive(Default)]
pub struct MemoryGraphStore {
    nodes: RwLock<HashMap<String, MemNode>>,
    edges: RwLock<HashSet<(String, String, String)>>,
    /// marker label -> keys of tagged nodes
    markers: RwLock<HashMap<String, HashSet<String>>>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of relationships of a given type (test observability).
    pub fn relationship_count(&self, rel_type: &str) -> usize {
        self.edges
            .read()
            .unwrap()
            .iter()
            .filter(|(_, rel, _)| rel == rel_type)
            .count()
    }

    /// Whether a specific relationship exists (test observability).
    pub fn has_relationship(&self, from_key: &str, rel_type: &str, to_key: &str) -> bool {
        self.edges.read().unwrap().contains(&(
            from_key.to_string(),
            rel_type.to_string(),
            to_key.to_string(),
        ))
    }

    /// Properties of a node, if present (test observability).
    pub fn node_props(&self, key: &str) -> Option<Value> {
        self.nodes.read().unwrap().get(key).map(|n| n.props.clone())
    }

    /// Drop a node directly, bypassing the trait (test fault injection).
    pub fn evict_node(&self, key: &str) {
        self.nodes.write().unwrap().remove(key);
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn merge_node(&self, label: &str, key: &str, props: Value) -> Result<()> {
        let mut nodes = self.nodes.write().unwrap();
        match nodes.get_mut(key) {
            Some(existing) => {
                if let (Value::Object(old), Value::Object(new)) = (&mut existing.props, props) {
                    for (k, v) in new {
                        old.insert(k, v);
                    }
                }
            }
            None => {
                nodes.insert(
                    key.to_string(),
                    MemNode {
                        label: label.to_string(),
                        props,
                    },
                );
            }
        }
        Ok(())
    }

    async fn merge_relationship(&self, from_key: &str, rel_type: &str, to_key: &str) -> Result<()> {
        let nodes = self.nodes.read().unwrap();
        if !nodes.contains_key(from_key) {
            bail!("merge_relationship: unknown node {from_key:?}");
        }
        if !nodes.contains_key(to_key) {
            bail!("merge_relationship: unknown node {to_key:?}");
        }
        drop(nodes);
        self.edges.write().unwrap().insert((
            from_key.to_string(),
            rel_type.to_string(),
            to_key.to_string(),
        ));
        Ok(())
    }

    async fn run_query(&self, _query: &str, _params: Value) -> Result<Vec<Value>> {
        bail!("memory graph store does not execute queries")
    }

    async fn count_nodes(&self, label: &str) -> Result<i64> {
        Ok(self
            .nodes
            .read()
            .unwrap()
            .values()
            .filter(|n| n.label == label)
            .count() as i64)
    }

    async fn node_keys(&self, label: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .nodes
            .read()
            .unwrap()
            .iter()
            .filter(|(_, n)| n.label == label)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn add_marker(&self, marker: &str) -> Result<i64> {
        let keys: HashSet<String> = self.nodes.read().unwrap().keys().cloned().collect();
        let tagged = keys.len() as i64;
        self.markers
            .write()
            .unwrap()
            .insert(marker.to_string(), keys);
        Ok(tagged)
    }

    async fn marker_exists(&self, marker: &str) -> Result<bool> {
        Ok(self
            .markers
            .read()
            .unwrap()
            .get(marker)
            .is_some_and(|keys| !keys.is_empty()))
    }

    async fn remove_marker(&self, marker: &str) -> Result<i64> {
        Ok(self
            .markers
            .write()
            .unwrap()
            .remove(marker)
            .map(|keys| keys.len() as i64)
            .unwrap_or(0))
    }
}

struct MemPoint {
    vector: Vec<f32>,
    payload: Value,
}

/// In-memory [`VectorStore`].
#[derive(Default)]
pub struct MemoryVectorStore {
    collection: RwLock<Option<(usize, Distance)>>,
    points: RwLock<HashMap<Uuid, MemPoint>>,
    aliases: RwLock<HashSet<String>>,
    snapshots: RwLock<HashSet<String>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot names currently held (test observability).
    pub fn snapshot_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.snapshots.read().unwrap().iter().cloned().collect();
        names.sort();
        names
    }

    /// Drop a point directly, bypassing the trait (test fault injection).
    pub fn evict_point(&self, id: Uuid) {
        self.points.write().unwrap().remove(&id);
    }
}

fn cosine_sim(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

fn matches_filter(payload: &Value, filter: &PayloadFilter) -> bool {
    if let Some(tb) = &filter.textbook_id {
        if payload.get("textbook_id").and_then(|v| v.as_str()) != Some(tb.as_str()) {
            return false;
        }
    }
    if let Some(ch) = filter.chapter_number {
        if payload.get("chapter_number").and_then(|v| v.as_u64()) != Some(u64::from(ch)) {
            return false;
        }
    }
    true
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn ensure_collection(&self, vector_size: usize, distance: Distance) -> Result<()> {
        let mut collection = self.collection.write().unwrap();
        match *collection {
            Some((existing, _)) if existing != vector_size => {
                bail!("collection exists with vector size {existing}, requested {vector_size}")
            }
            Some(_) => Ok(()),
            None => {
                *collection = Some((vector_size, distance));
                Ok(())
            }
        }
    }

    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()> {
        let expected = self
            .collection
            .read()
            .unwrap()
            .map(|(size, _)| size)
            .ok_or_else(|| anyhow::anyhow!("collection not created"))?;
        let mut stored = self.points.write().unwrap();
        for point in points {
            if point.vector.len() != expected {
                bail!(
                    "vector size {} does not match collection size {expected}",
                    point.vector.len()
                );
            }
            stored.insert(
                point.id,
                MemPoint {
                    vector: point.vector,
                    payload: point.payload,
                },
            );
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<PayloadFilter>,
    ) -> Result<Vec<ScoredPoint>> {
        let points = self.points.read().unwrap();
        let mut hits: Vec<ScoredPoint> = points
            .iter()
            .filter(|(_, p)| {
                filter
                    .as_ref()
                    .map(|f| matches_filter(&p.payload, f))
                    .unwrap_or(true)
            })
            .map(|(id, p)| ScoredPoint {
                id: *id,
                score: cosine_sim(&vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete(&self, ids: Vec<Uuid>) -> Result<()> {
        let mut points = self.points.write().unwrap();
        for id in ids {
            points.remove(&id);
        }
        Ok(())
    }

    async fn collection_info(&self) -> Result<CollectionInfo> {
        let vector_size = self
            .collection
            .read()
            .unwrap()
            .map(|(size, _)| size)
            .unwrap_or(0);
        Ok(CollectionInfo {
            points_count: self.points.read().unwrap().len() as i64,
            vector_size,
        })
    }

    async fn list_chunk_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .points
            .read()
            .unwrap()
            .values()
            .filter_map(|p| p.payload.get("chunk_id").and_then(|v| v.as_str()))
            .map(String::from)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn create_snapshot(&self, version_id: &str) -> Result<String> {
        let name = format!("snapshot_{version_id}");
        self.snapshots.write().unwrap().insert(name.clone());
        Ok(name)
    }

    async fn delete_snapshot(&self, snapshot_ref: &str) -> Result<()> {
        self.snapshots.write().unwrap().remove(snapshot_ref);
        Ok(())
    }

    async fn create_alias(&self, alias: &str) -> Result<()> {
        self.aliases.write().unwrap().insert(alias.to_string());
        Ok(())
    }

    async fn alias_exists(&self, alias: &str) -> Result<bool> {
        Ok(self.aliases.read().unwrap().contains(alias))
    }

    async fn delete_alias(&self, alias: &str) -> Result<()> {
        self.aliases.write().unwrap().remove(alias);
        Ok(())
    }
}
