//! Semantic search over ingested content units.
//!
//! Embeds the query and runs a similarity search against the vector store
//! with an optional textbook/chapter payload filter. Ranking quality is the
//! vector engine's concern; this module only wires the query path.

use anyhow::Result;

use crate::config::Config;
use crate::embedding::{create_embedder, Embedder as _};
use crate::stores::{build_vector_store, PayloadFilter, VectorStore as _};

pub struct SearchArgs {
    pub query: String,
    pub textbook: Option<String>,
    pub chapter: Option<u32>,
    pub limit: usize,
}

pub async fn run_search(config: &Config, args: SearchArgs) -> Result<()> {
    let embedder = create_embedder(&config.embedding)?;
    let vector = build_vector_store(config)?;

    let query_vec = embedder.embed(&args.query).await?;
    let filter = PayloadFilter {
        textbook_id: args.textbook,
        chapter_number: args.chapter,
    };
    let filter = if filter.is_empty() { None } else { Some(filter) };

    let hits = vector.query(query_vec, args.limit, filter).await?;

    if hits.is_empty() {
        println!("no results");
        return Ok(());
    }

    for (rank, hit) in hits.iter().enumerate() {
        let chunk_id = hit.payload["chunk_id"].as_str().unwrap_or("?");
        let page = hit.payload["page"].as_u64().unwrap_or(0);
        let path = hit.payload["hierarchy_path"]
            .as_array()
            .map(|titles| {
                titles
                    .iter()
                    .filter_map(|t| t.as_str())
                    .collect::<Vec<_>>()
                    .join(" > ")
            })
            .unwrap_or_default();
        let text = hit.payload["text"].as_str().unwrap_or("");
        let snippet: String = text.chars().take(160).collect();

        println!("{}. {} (score {:.4})", rank + 1, chunk_id, hit.score);
        println!("   {path} — p.{page}");
        println!("   {snippet}");
        println!();
    }

    Ok(())
}
