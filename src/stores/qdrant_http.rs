//! Qdrant adapter over the REST API.
//!
//! Covers the collection lifecycle, point upsert/search/scroll/delete,
//! aliases (baseline), and server-side snapshots (version creation). Point
//! ids arrive as deterministic UUIDs, so upserts overwrite rather than
//! duplicate.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;

use crate::config::VectorConfig;
use crate::error::{is_transient_http, PipelineError};

use super::{CollectionInfo, Distance, PayloadFilter, ScoredPoint, VectorPoint, VectorStore};

pub struct QdrantStore {
    client: reqwest::Client,
    base_url: String,
    collection: String,
}

impl QdrantStore {
    pub fn new(config: &VectorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request, classifying timeouts and refused connections as
    /// transient (retryable) failures.
    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        match req.send().await {
            Ok(resp) => Ok(resp),
            Err(e) if is_transient_http(&e) => Err(PipelineError::TransientStore {
                system: "vector".to_string(),
                message: e.to_string(),
            }
            .into()),
            Err(e) => Err(e.into()),
        }
    }

    async fn check(&self, resp: reqwest::Response, what: &str) -> Result<Value> {
        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .with_context(|| format!("invalid response body from {what}"))?;
        if !status.is_success() {
            bail!("{what} returned {status}: {body}");
        }
        Ok(body)
    }

    fn build_filter(filter: &PayloadFilter) -> Value {
        let mut must = Vec::new();
        if let Some(tb) = &filter.textbook_id {
            must.push(json!({ "key": "textbook_id", "match": { "value": tb } }));
        }
        if let Some(ch) = filter.chapter_number {
            must.push(json!({ "key": "chapter_number", "match": { "value": ch } }));
        }
        json!({ "must": must })
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(&self, vector_size: usize, distance: Distance) -> Result<()> {
        let path = format!("/collections/{}", self.collection);
        let resp = self.send(self.client.get(self.url(&path))).await?;
        if resp.status().is_success() {
            let body: Value = resp.json().await?;
            let existing = body["result"]["config"]["params"]["vectors"]["size"]
                .as_u64()
                .unwrap_or(0) as usize;
            if existing != 0 && existing != vector_size {
                bail!(
                    "collection '{}' exists with vector size {existing}, requested {vector_size}",
                    self.collection
                );
            }
            return Ok(());
        }

        let resp = self
            .send(self.client.put(self.url(&path)).json(&json!({
                "vectors": { "size": vector_size, "distance": distance.wire_name() }
            })))
            .await?;
        self.check(resp, "collection create").await?;
        Ok(())
    }

    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let body = json!({
            "points": points
                .iter()
                .map(|p| json!({ "id": p.id.to_string(), "vector": p.vector, "payload": p.payload }))
                .collect::<Vec<_>>()
        });
        let path = format!("/collections/{}/points?wait=true", self.collection);
        let resp = self.send(self.client.put(self.url(&path)).json(&body)).await?;
        self.check(resp, "points upsert").await?;
        Ok(())
    }

    async fn query(
        &self,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<PayloadFilter>,
    ) -> Result<Vec<ScoredPoint>> {
        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });
        if let Some(f) = filter.filter(|f| !f.is_empty()) {
            body["filter"] = Self::build_filter(&f);
        }
        let path = format!("/collections/{}/points/search", self.collection);
        let resp = self.send(self.client.post(self.url(&path)).json(&body)).await?;
        let parsed = self.check(resp, "points search").await?;

        let hits = parsed["result"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|hit| {
                let id = hit["id"].as_str().and_then(|s| Uuid::parse_str(s).ok())?;
                Some(ScoredPoint {
                    id,
                    score: hit["score"].as_f64().unwrap_or(0.0) as f32,
                    payload: hit["payload"].clone(),
                })
            })
            .collect();
        Ok(hits)
    }

    async fn delete(&self, ids: Vec<Uuid>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let path = format!("/collections/{}/points/delete?wait=true", self.collection);
        let body = json!({
            "points": ids.iter().map(|id| id.to_string()).collect::<Vec<_>>()
        });
        let resp = self.send(self.client.post(self.url(&path)).json(&body)).await?;
        self.check(resp, "points delete").await?;
        Ok(())
    }

    async fn collection_info(&self) -> Result<CollectionInfo> {
        let path = format!("/collections/{}", self.collection);
        let resp = self.send(self.client.get(self.url(&path))).await?;
        let body = self.check(resp, "collection info").await?;
        Ok(CollectionInfo {
            points_count: body["result"]["points_count"].as_i64().unwrap_or(0),
            vector_size: body["result"]["config"]["params"]["vectors"]["size"]
                .as_u64()
                .unwrap_or(0) as usize,
        })
    }

    async fn list_chunk_ids(&self) -> Result<Vec<String>> {
        let path = format!("/collections/{}/points/scroll", self.collection);
        let mut ids = Vec::new();
        let mut offset: Option<Value> = None;
        loop {
            let mut body = json!({
                "limit": 512,
                "with_payload": ["chunk_id"],
                "with_vector": false,
            });
            if let Some(off) = &offset {
                body["offset"] = off.clone();
            }
            let resp = self.send(self.client.post(self.url(&path)).json(&body)).await?;
            let parsed = self.check(resp, "points scroll").await?;
            for point in parsed["result"]["points"].as_array().cloned().unwrap_or_default() {
                if let Some(chunk_id) = point["payload"]["chunk_id"].as_str() {
                    ids.push(chunk_id.to_string());
                }
            }
            match &parsed["result"]["next_page_offset"] {
                Value::Null => break,
                next => offset = Some(next.clone()),
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn create_snapshot(&self, version_id: &str) -> Result<String> {
        let path = format!("/collections/{}/snapshots?wait=true", self.collection);
        let resp = self.send(self.client.post(self.url(&path))).await?;
        let body = self.check(resp, "snapshot create").await?;
        let name = body["result"]["name"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("snapshot create returned no name"))?;
        // The server names the snapshot; the version id is kept by the
        // caller's version record, not by Qdrant.
        let _ = version_id;
        Ok(name.to_string())
    }

    async fn delete_snapshot(&self, snapshot_ref: &str) -> Result<()> {
        let path = format!(
            "/collections/{}/snapshots/{snapshot_ref}?wait=true",
            self.collection
        );
        let resp = self.send(self.client.delete(self.url(&path))).await?;
        self.check(resp, "snapshot delete").await?;
        Ok(())
    }

    async fn create_alias(&self, alias: &str) -> Result<()> {
        let body = json!({
            "actions": [{
                "create_alias": {
                    "collection_name": self.collection,
                    "alias_name": alias,
                }
            }]
        });
        let resp = self
            .send(self.client.post(self.url("/collections/aliases")).json(&body))
            .await?;
        self.check(resp, "alias create").await?;
        Ok(())
    }

    async fn alias_exists(&self, alias: &str) -> Result<bool> {
        let resp = self.send(self.client.get(self.url("/aliases"))).await?;
        let body = self.check(resp, "alias list").await?;
        Ok(body["result"]["aliases"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .iter()
            .any(|a| a["alias_name"].as_str() == Some(alias)))
    }

    async fn delete_alias(&self, alias: &str) -> Result<()> {
        let body = json!({
            "actions": [{ "delete_alias": { "alias_name": alias } }]
        });
        let resp = self
            .send(self.client.post(self.url("/collections/aliases")).json(&body))
            .await?;
        self.check(resp, "alias delete").await?;
        Ok(())
    }
}
