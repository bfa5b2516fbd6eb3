//! Inline figure/table citation extraction.
//!
//! Recognizes four intermixed surface forms per kind — bare (`Figure 2.1`),
//! parenthesized (`(Figure 2.1)`), bracketed (`[Figure 2.1]`), and the
//! `Fig.` / `Fig` abbreviation (figures only). Matching is case-insensitive.
//!
//! Only numbers of the shape `\d+\.\d+` are recognized; other numbering
//! schemes (single integers, appendix letters) pass through unmatched. This
//! is a known limitation of the citation grammar.

use regex::Regex;
use std::sync::OnceLock;

use crate::models::{CrossReference, RefKind};

fn citation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // Parens/brackets around a citation carry no meaning, so the pattern
        // only anchors on the keyword and the two-part number.
        Regex::new(r"(?i)\b(figure|fig\.?|table)\s+(\d+\.\d+)(?:\b|$)").unwrap()
    })
}

/// Extract deduplicated cross-references from paragraph text.
///
/// Duplicates collapse on `(kind, number)`, keeping first-occurrence order.
/// Reference-free or empty text returns an empty vec, never an error.
pub fn extract_references(text: &str) -> Vec<CrossReference> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for captures in citation_pattern().captures_iter(text) {
        let keyword = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
        let kind = if keyword.eq_ignore_ascii_case("table") {
            RefKind::Table
        } else {
            RefKind::Figure
        };
        let number = captures.get(2).map(|m| m.as_str()).unwrap_or_default();
        let reference = CrossReference {
            kind,
            number: number.to_string(),
        };
        if seen.insert((kind, reference.number.clone())) {
            out.push(reference);
        }
    }
    out
}
