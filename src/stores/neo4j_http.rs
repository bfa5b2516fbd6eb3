//! Neo4j adapter over the transactional HTTP endpoint.
//!
//! Every call is a single auto-committed transaction against
//! `POST {uri}/db/{database}/tx/commit`. Node identity is the `key`
//! property; the server-side uniqueness constraints on textbook, chapter,
//! and chunk keys are a deployment precondition.
//!
//! Labels are interpolated into Cypher (parameters cannot appear in label
//! position), so they are validated against a conservative character set
//! first.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::GraphConfig;
use crate::error::{is_transient_http, PipelineError};

use super::GraphStore;

pub struct Neo4jStore {
    client: reqwest::Client,
    endpoint: String,
    user: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<TxResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Deserialize)]
struct TxResult {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<TxRow>,
}

#[derive(Debug, Deserialize)]
struct TxRow {
    #[serde(default)]
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TxError {
    code: String,
    message: String,
}

fn valid_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && s.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
}

impl Neo4jStore {
    pub fn new(config: &GraphConfig) -> Result<Self> {
        let password = match &config.password {
            Some(p) if !p.is_empty() => p.clone(),
            _ => std::env::var("NEO4J_PASSWORD")
                .map_err(|_| anyhow::anyhow!("graph.password not set and NEO4J_PASSWORD not in environment"))?,
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/db/{}/tx/commit",
                config.uri.trim_end_matches('/'),
                config.database
            ),
            user: config.user.clone(),
            password,
        })
    }

    async fn execute(&self, statement: &str, parameters: Value) -> Result<TxResult> {
        let body = json!({
            "statements": [{ "statement": statement, "parameters": parameters }]
        });
        let resp = match self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .await
        {
            Ok(resp) => resp,
            // Timeouts and refused connections are retryable by the caller;
            // everything else is not.
            Err(e) if is_transient_http(&e) => {
                return Err(PipelineError::TransientStore {
                    system: "graph".to_string(),
                    message: e.to_string(),
                }
                .into())
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("graph request to {} failed", self.endpoint))
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("graph endpoint returned {status}: {text}");
        }

        let mut parsed: TxResponse = resp.json().await.context("invalid graph response body")?;
        if let Some(err) = parsed.errors.first() {
            bail!("graph query failed [{}]: {}", err.code, err.message);
        }
        if parsed.results.is_empty() {
            bail!("graph response contained no result section");
        }
        Ok(parsed.results.remove(0))
    }

    async fn scalar_i64(&self, statement: &str, parameters: Value) -> Result<i64> {
        let result = self.execute(statement, parameters).await?;
        result
            .data
            .first()
            .and_then(|row| row.row.first())
            .and_then(|v| v.as_i64())
            .ok_or_else(|| anyhow::anyhow!("graph query returned no scalar"))
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn merge_node(&self, label: &str, key: &str, props: Value) -> Result<()> {
        if !valid_identifier(label) {
            bail!("invalid node label: {label:?}");
        }
        let statement = format!("MERGE (n:`{label}` {{key: $key}}) SET n += $props");
        self.execute(&statement, json!({ "key": key, "props": props }))
            .await?;
        Ok(())
    }

    async fn merge_relationship(&self, from_key: &str, rel_type: &str, to_key: &str) -> Result<()> {
        if !valid_identifier(rel_type) {
            bail!("invalid relationship type: {rel_type:?}");
        }
        let statement = format!(
            "MATCH (a {{key: $from}}) MATCH (b {{key: $to}}) MERGE (a)-[:`{rel_type}`]->(b)"
        );
        self.execute(&statement, json!({ "from": from_key, "to": to_key }))
            .await?;
        Ok(())
    }

    async fn run_query(&self, query: &str, params: Value) -> Result<Vec<Value>> {
        let result = self.execute(query, params).await?;
        let columns = result.columns;
        Ok(result
            .data
            .into_iter()
            .map(|row| {
                let mut obj = serde_json::Map::new();
                for (name, value) in columns.iter().zip(row.row.into_iter()) {
                    obj.insert(name.clone(), value);
                }
                Value::Object(obj)
            })
            .collect())
    }

    async fn count_nodes(&self, label: &str) -> Result<i64> {
        if !valid_identifier(label) {
            bail!("invalid node label: {label:?}");
        }
        self.scalar_i64(
            &format!("MATCH (n:`{label}`) RETURN count(n)"),
            json!({}),
        )
        .await
    }

    async fn node_keys(&self, label: &str) -> Result<Vec<String>> {
        if !valid_identifier(label) {
            bail!("invalid node label: {label:?}");
        }
        let result = self
            .execute(
                &format!("MATCH (n:`{label}`) RETURN n.key ORDER BY n.key"),
                json!({}),
            )
            .await?;
        Ok(result
            .data
            .into_iter()
            .filter_map(|row| row.row.into_iter().next())
            .filter_map(|v| v.as_str().map(String::from))
            .collect())
    }

    async fn add_marker(&self, marker: &str) -> Result<i64> {
        if !valid_identifier(marker) {
            bail!("invalid marker label: {marker:?}");
        }
        self.scalar_i64(
            &format!("MATCH (n) SET n:`{marker}` RETURN count(n)"),
            json!({}),
        )
        .await
    }

    async fn marker_exists(&self, marker: &str) -> Result<bool> {
        Ok(self.count_nodes(marker).await? > 0)
    }

    async fn remove_marker(&self, marker: &str) -> Result<i64> {
        if !valid_identifier(marker) {
            bail!("invalid marker label: {marker:?}");
        }
        self.scalar_i64(
            &format!("MATCH (n:`{marker}`) REMOVE n:`{marker}` RETURN count(n)"),
            json!({}),
        )
        .await
    }
}
