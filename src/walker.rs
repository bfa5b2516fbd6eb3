//! Depth-first chapter flattening.
//!
//! [`walk_chapter`] turns an arbitrarily deep chapter tree into an ordered
//! sequence of [`FlatUnit`]s, one per paragraph. The traversal is pre-order:
//! a node's own paragraphs come before its children's subtrees, and children
//! are visited in stored order. This total order is authoritative for
//! NEXT/PREV linking downstream.
//!
//! Paragraphs attached to the same node are ordered by numeric comparison of
//! their dotted numbers, so `"2.10"` sorts after `"2.9"`. The walk is pure:
//! re-invoking it on the same chapter yields an identical sequence.

use crate::error::PipelineError;
use crate::models::{
    chapter_node_id, compare_dotted, level_label, level_node_id, Chapter, ChunkId, ContentNode,
    Paragraph,
};

/// One flattened content unit paired with its position in the hierarchy.
#[derive(Debug, Clone)]
pub struct FlatUnit<'a> {
    pub chunk_id: ChunkId,
    pub paragraph: &'a Paragraph,
    /// Graph key of the immediate parent node.
    pub parent_id: String,
    /// Titles from the chapter down to the immediate parent.
    pub path_titles: Vec<String>,
}

/// An ancestor node a unit depends on, in chapter-to-leaf order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AncestorNode {
    pub id: String,
    pub parent_id: String,
    pub label: &'static str,
    pub number: String,
    pub title: String,
}

/// Lazy, restartable iterator over a chapter's flattened units.
///
/// Single-pass and finite; an empty node (no paragraphs, no children)
/// contributes nothing. Well-formedness of the tree is assumed — malformed
/// entries are filtered by [`validate_chapter`] upstream.
pub struct HierarchyWalker<'a> {
    chapter: &'a Chapter,
    stack: Vec<Frame<'a>>,
    pending: std::vec::IntoIter<&'a Paragraph>,
    pending_parent_id: String,
    pending_titles: Vec<String>,
}

struct Frame<'a> {
    node: &'a ContentNode,
    depth: usize,
    parent_id: String,
    path_titles: Vec<String>,
}

impl<'a> HierarchyWalker<'a> {
    pub fn new(chapter: &'a Chapter) -> Self {
        let chapter_id = chapter_node_id(&chapter.textbook_id, chapter.number);
        // Stack is LIFO, so push children reversed to visit in stored order.
        let stack = chapter
            .sections
            .iter()
            .rev()
            .map(|node| Frame {
                node,
                depth: 0,
                parent_id: chapter_id.clone(),
                path_titles: vec![chapter.title.clone()],
            })
            .collect();
        Self {
            chapter,
            stack,
            pending: Vec::new().into_iter(),
            pending_parent_id: String::new(),
            pending_titles: Vec::new(),
        }
    }

    fn sorted_paragraphs(node: &'a ContentNode) -> Vec<&'a Paragraph> {
        let mut paragraphs: Vec<&Paragraph> = node.paragraphs.iter().collect();
        paragraphs.sort_by(|a, b| compare_dotted(&a.number, &b.number));
        paragraphs
    }
}

impl<'a> Iterator for HierarchyWalker<'a> {
    type Item = FlatUnit<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(paragraph) = self.pending.next() {
                return Some(FlatUnit {
                    chunk_id: ChunkId::new(
                        &self.chapter.textbook_id,
                        self.chapter.number,
                        &paragraph.number,
                    ),
                    paragraph,
                    parent_id: self.pending_parent_id.clone(),
                    path_titles: self.pending_titles.clone(),
                });
            }

            let frame = self.stack.pop()?;
            let node_id = level_node_id(&frame.parent_id, frame.depth, &frame.node.number);

            let mut titles = frame.path_titles.clone();
            titles.push(frame.node.title.clone());

            for child in frame.node.children.iter().rev() {
                self.stack.push(Frame {
                    node: child,
                    depth: frame.depth + 1,
                    parent_id: node_id.clone(),
                    path_titles: titles.clone(),
                });
            }

            self.pending = Self::sorted_paragraphs(frame.node).into_iter();
            self.pending_parent_id = node_id;
            self.pending_titles = titles;
        }
    }
}

/// Flatten a chapter into its ordered unit list.
pub fn walk_chapter(chapter: &Chapter) -> Vec<FlatUnit<'_>> {
    HierarchyWalker::new(chapter).collect()
}

/// The ancestor chain every unit of a chapter may hang from, deduplicated,
/// in dependency order (chapter first, leaves last).
pub fn ancestor_nodes(chapter: &Chapter) -> Vec<AncestorNode> {
    let chapter_id = chapter_node_id(&chapter.textbook_id, chapter.number);
    let mut out = Vec::new();
    let mut stack: Vec<(&ContentNode, usize, String)> = chapter
        .sections
        .iter()
        .rev()
        .map(|n| (n, 0usize, chapter_id.clone()))
        .collect();
    while let Some((node, depth, parent_id)) = stack.pop() {
        let id = level_node_id(&parent_id, depth, &node.number);
        out.push(AncestorNode {
            id: id.clone(),
            parent_id,
            label: level_label(depth),
            number: node.number.clone(),
            title: node.title.clone(),
        });
        for child in node.children.iter().rev() {
            stack.push((child, depth + 1, id.clone()));
        }
    }
    out
}

/// Reject chapters the walker cannot safely traverse.
///
/// The walker assumes well-formed input; this is the upstream filter the
/// ingestion driver runs first. A failure is fatal for the document only,
/// never for the rest of a batch.
pub fn validate_chapter(chapter: &Chapter) -> Result<(), PipelineError> {
    if chapter.textbook_id.trim().is_empty() {
        return Err(PipelineError::validation("textbook_id is empty"));
    }
    if chapter.textbook_id.contains(':') {
        return Err(PipelineError::validation(
            "textbook_id must not contain ':' (reserved by the id scheme)",
        ));
    }
    let mut stack: Vec<&ContentNode> = chapter.sections.iter().collect();
    while let Some(node) = stack.pop() {
        if node.number.trim().is_empty() {
            return Err(PipelineError::validation(format!(
                "node {:?} has no number",
                node.title
            )));
        }
        for paragraph in &node.paragraphs {
            if paragraph.number.trim().is_empty() && paragraph.text.trim().is_empty() {
                return Err(PipelineError::validation(
                    "paragraph missing both number and text",
                ));
            }
            if paragraph.number.trim().is_empty() {
                return Err(PipelineError::validation(format!(
                    "paragraph on page {} has no number",
                    paragraph.page
                )));
            }
        }
        stack.extend(node.children.iter());
    }
    Ok(())
}
