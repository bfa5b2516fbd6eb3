//! Multi-store chapter writer.
//!
//! Writes one flattened chapter into the graph and vector stores. Per unit,
//! in order: ancestor chain (fatal on failure — nothing can link without
//! it), paragraph node, ancestor link, embedded tables/figures, vector
//! point. A final pass creates NEXT/PREV adjacency edges between
//! consecutive siblings under each exact parent.
//!
//! Writes are not transactional across stores: a crash mid-chapter can
//! leave the graph ahead of the vector collection. Every write is an
//! idempotent upsert-by-key, so a retry of the whole chapter converges.
//! Per-unit failures are collected and reported, not escalated.

use anyhow::{Context, Result};
use serde_json::json;
use std::sync::Arc;

use crate::config::IngestionConfig;
use crate::embedding::Embedder;
use crate::models::{chapter_node_id, Chapter, ChapterWriteReport, UnitError};
use crate::references::extract_references;
use crate::stores::{GraphStore, VectorPoint, VectorStore};
use crate::walker::{ancestor_nodes, walk_chapter, FlatUnit};

pub struct MultiStoreWriter {
    graph: Arc<dyn GraphStore>,
    vector: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    link_sequences: bool,
    extract_refs: bool,
}

impl MultiStoreWriter {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        vector: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        options: &IngestionConfig,
    ) -> Self {
        Self {
            graph,
            vector,
            embedder,
            link_sequences: options.link_sequences,
            extract_refs: options.extract_references,
        }
    }

    /// Write a whole chapter. The unit order is the walker's total order.
    pub async fn write_chapter(&self, chapter: &Chapter) -> Result<ChapterWriteReport> {
        let units = walk_chapter(chapter);
        let mut report = ChapterWriteReport {
            units_total: units.len(),
            ..Default::default()
        };

        self.write_ancestors(chapter)
            .await
            .context("ancestor chain write failed")?;

        // One blocking embed call for the whole chapter, order-preserving.
        let texts: Vec<String> = units.iter().map(|u| u.paragraph.text.clone()).collect();
        let vectors = self
            .embedder
            .embed_batch(&texts)
            .await
            .context("chapter embedding failed")?;

        let mut points = Vec::with_capacity(units.len());
        for (unit, vector) in units.iter().zip(vectors.into_iter()) {
            match self.write_unit(chapter, unit).await {
                Ok(()) => {
                    points.push(VectorPoint {
                        id: unit.chunk_id.point_id(),
                        vector,
                        payload: json!({
                            "chunk_id": unit.chunk_id.to_string(),
                            "text": unit.paragraph.text,
                            "textbook_id": chapter.textbook_id,
                            "chapter_number": chapter.number,
                            "hierarchy_path": unit.path_titles,
                            "page": unit.paragraph.page,
                        }),
                    });
                    report.units_succeeded += 1;
                }
                Err(e) => {
                    report.units_failed += 1;
                    report.errors.push(UnitError {
                        chunk_id: unit.chunk_id.to_string(),
                        message: format!("{e:#}"),
                    });
                }
            }
        }

        self.vector
            .upsert(points)
            .await
            .context("vector upsert failed")?;

        if self.link_sequences {
            report.sequence_links = self.link_adjacent(&units).await?;
        }

        Ok(report)
    }

    /// Merge the textbook, chapter, and every interior hierarchy node, plus
    /// the containment edges between them. Failure here is fatal for the
    /// chapter: no paragraph can be linked without its ancestor chain.
    async fn write_ancestors(&self, chapter: &Chapter) -> Result<()> {
        let chapter_id = chapter_node_id(&chapter.textbook_id, chapter.number);

        self.graph
            .merge_node(
                "Textbook",
                &chapter.textbook_id,
                json!({ "textbook_id": chapter.textbook_id }),
            )
            .await?;
        self.graph
            .merge_node(
                "Chapter",
                &chapter_id,
                json!({
                    "textbook_id": chapter.textbook_id,
                    "number": chapter.number,
                    "title": chapter.title,
                }),
            )
            .await?;
        self.graph
            .merge_relationship(&chapter.textbook_id, "HAS_CHAPTER", &chapter_id)
            .await?;

        for node in ancestor_nodes(chapter) {
            self.graph
                .merge_node(
                    node.label,
                    &node.id,
                    json!({ "number": node.number, "title": node.title }),
                )
                .await?;
            self.graph
                .merge_relationship(&node.parent_id, "CONTAINS", &node.id)
                .await?;
        }
        Ok(())
    }

    async fn write_unit(&self, chapter: &Chapter, unit: &FlatUnit<'_>) -> Result<()> {
        let chunk_id = unit.chunk_id.to_string();
        let references = if self.extract_refs {
            extract_references(&unit.paragraph.text)
        } else {
            Vec::new()
        };

        self.graph
            .merge_node(
                "Paragraph",
                &chunk_id,
                json!({
                    "number": unit.paragraph.number,
                    "text": unit.paragraph.text,
                    "page": unit.paragraph.page,
                    "bounds": unit.paragraph.bounds,
                    "references": serde_json::to_string(&references)?,
                }),
            )
            .await?;
        self.graph
            .merge_relationship(&unit.parent_id, "HAS_PARAGRAPH", &chunk_id)
            .await?;

        for table in &unit.paragraph.tables {
            let table_key = format!("{chunk_id}:table{}", table.number);
            self.graph
                .merge_node(
                    "Table",
                    &table_key,
                    json!({
                        "number": table.number,
                        "caption": table.caption,
                        "page": table.page,
                        "textbook_id": chapter.textbook_id,
                    }),
                )
                .await?;
            self.graph
                .merge_relationship(&chunk_id, "HAS_TABLE", &table_key)
                .await?;
        }
        for figure in &unit.paragraph.figures {
            let figure_key = format!("{chunk_id}:figure{}", figure.number);
            self.graph
                .merge_node(
                    "Figure",
                    &figure_key,
                    json!({
                        "number": figure.number,
                        "caption": figure.caption,
                        "page": figure.page,
                        "textbook_id": chapter.textbook_id,
                    }),
                )
                .await?;
            self.graph
                .merge_relationship(&chunk_id, "HAS_FIGURE", &figure_key)
                .await?;
        }
        Ok(())
    }

    /// NEXT/PREV between consecutive units sharing the same immediate
    /// parent. Siblings in different parents are never linked. Returns the
    /// number of NEXT edges created.
    async fn link_adjacent(&self, units: &[FlatUnit<'_>]) -> Result<usize> {
        let mut created = 0;
        for pair in units.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if a.parent_id != b.parent_id {
                continue;
            }
            let a_id = a.chunk_id.to_string();
            let b_id = b.chunk_id.to_string();
            self.graph
                .merge_relationship(&a_id, "NEXT", &b_id)
                .await
                .with_context(|| format!("NEXT link {a_id} -> {b_id}"))?;
            self.graph
                .merge_relationship(&b_id, "PREV", &a_id)
                .await
                .with_context(|| format!("PREV link {b_id} -> {a_id}"))?;
            created += 1;
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::NgramEmbedder;
    use crate::models::{ContentNode, EmbeddedItem, Paragraph};
    use crate::stores::memory::{MemoryGraphStore, MemoryVectorStore};
    use crate::stores::{Distance, GraphStore, VectorStore};

    fn para(number: &str, text: &str) -> Paragraph {
        Paragraph {
            number: number.to_string(),
            text: text.to_string(),
            page: 1,
            bounds: [0.0, 0.0, 50.0, 10.0],
            tables: vec![],
            figures: vec![],
        }
    }

    fn fixture() -> Chapter {
        Chapter {
            textbook_id: "physics".to_string(),
            number: 1,
            title: "Units".to_string(),
            sections: vec![
                ContentNode {
                    number: "1.1".to_string(),
                    title: "SI".to_string(),
                    paragraphs: vec![
                        para("1.1.1", "Meters measure length, see Figure 1.1."),
                        para("1.1.2", "Seconds measure time."),
                        para("1.1.3", "Kilograms measure mass."),
                    ],
                    children: vec![],
                },
                ContentNode {
                    number: "1.2".to_string(),
                    title: "Conversions".to_string(),
                    paragraphs: vec![para("1.2.1", "Unit conversion factors.")],
                    children: vec![],
                },
            ],
        }
    }

    async fn write(chapter: &Chapter) -> (Arc<MemoryGraphStore>, Arc<MemoryVectorStore>, ChapterWriteReport) {
        let graph = Arc::new(MemoryGraphStore::new());
        let vector = Arc::new(MemoryVectorStore::new());
        vector.ensure_collection(32, Distance::Cosine).await.unwrap();
        let writer = MultiStoreWriter::new(
            graph.clone(),
            vector.clone(),
            Arc::new(NgramEmbedder::new(32)),
            &IngestionConfig::default(),
        );
        let report = writer.write_chapter(chapter).await.unwrap();
        (graph, vector, report)
    }

    #[tokio::test]
    async fn writes_all_units_to_both_stores() {
        let chapter = fixture();
        let (graph, vector, report) = write(&chapter).await;
        assert_eq!(report.units_total, 4);
        assert_eq!(report.units_succeeded, 4);
        assert_eq!(report.units_failed, 0);
        assert_eq!(
            graph.count_nodes("Paragraph").await.unwrap(),
            4
        );
        assert_eq!(vector.collection_info().await.unwrap().points_count, 4);
    }

    #[tokio::test]
    async fn adjacency_is_scoped_per_parent() {
        let chapter = fixture();
        let (graph, _vector, report) = write(&chapter).await;
        // 3 paragraphs under 1.1 -> 2 NEXT edges; single paragraph under 1.2 -> none
        assert_eq!(report.sequence_links, 2);
        assert_eq!(graph.relationship_count("NEXT"), 2);
        assert_eq!(graph.relationship_count("PREV"), 2);
        assert!(graph.has_relationship(
            "physics:ch1:1.1.1",
            "NEXT",
            "physics:ch1:1.1.2"
        ));
        assert!(graph.has_relationship(
            "physics:ch1:1.1.2",
            "PREV",
            "physics:ch1:1.1.1"
        ));
        // never across parents
        assert!(!graph.has_relationship(
            "physics:ch1:1.1.3",
            "NEXT",
            "physics:ch1:1.2.1"
        ));
    }

    #[tokio::test]
    async fn single_parent_chapter_links_n_minus_one() {
        let chapter = Chapter {
            textbook_id: "physics".to_string(),
            number: 2,
            title: "Motion".to_string(),
            sections: vec![ContentNode {
                number: "2.1".to_string(),
                title: "Only".to_string(),
                paragraphs: (1..=5).map(|i| para(&format!("2.1.{i}"), "text")).collect(),
                children: vec![],
            }],
        };
        let (graph, _vector, report) = write(&chapter).await;
        assert_eq!(report.sequence_links, 4);
        assert_eq!(graph.relationship_count("NEXT"), 4);
        assert_eq!(graph.relationship_count("PREV"), 4);
    }

    #[tokio::test]
    async fn stores_references_and_embedded_items() {
        let mut chapter = fixture();
        chapter.sections[0].paragraphs[0].figures = vec![EmbeddedItem {
            number: "1.1".to_string(),
            caption: "SI base units".to_string(),
            page: 2,
        }];
        let (graph, vector, _report) = write(&chapter).await;

        let props = graph.node_props("physics:ch1:1.1.1").unwrap();
        let refs: Vec<serde_json::Value> =
            serde_json::from_str(props["references"].as_str().unwrap()).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0]["kind"], "figure");
        assert_eq!(refs[0]["number"], "1.1");

        assert!(graph.has_relationship(
            "physics:ch1:1.1.1",
            "HAS_FIGURE",
            "physics:ch1:1.1.1:figure1.1"
        ));

        let chunk_ids = vector.list_chunk_ids().await.unwrap();
        assert!(chunk_ids.contains(&"physics:ch1:1.1.1".to_string()));
    }

    #[tokio::test]
    async fn hierarchy_nodes_and_links_exist() {
        let chapter = fixture();
        let (graph, _vector, _report) = write(&chapter).await;
        assert!(graph.has_relationship("physics", "HAS_CHAPTER", "physics:ch1"));
        assert!(graph.has_relationship("physics:ch1", "CONTAINS", "physics:ch1:s1.1"));
        assert!(graph.has_relationship(
            "physics:ch1:s1.1",
            "HAS_PARAGRAPH",
            "physics:ch1:1.1.1"
        ));
    }

    #[tokio::test]
    async fn rewrite_is_idempotent() {
        let chapter = fixture();
        let graph = Arc::new(MemoryGraphStore::new());
        let vector = Arc::new(MemoryVectorStore::new());
        vector.ensure_collection(32, Distance::Cosine).await.unwrap();
        let writer = MultiStoreWriter::new(
            graph.clone(),
            vector.clone(),
            Arc::new(NgramEmbedder::new(32)),
            &IngestionConfig::default(),
        );
        writer.write_chapter(&chapter).await.unwrap();
        writer.write_chapter(&chapter).await.unwrap();
        assert_eq!(
            graph.count_nodes("Paragraph").await.unwrap(),
            4
        );
        assert_eq!(vector.collection_info().await.unwrap().points_count, 4);
        assert_eq!(graph.relationship_count("NEXT"), 2);
    }
}
