//! Edit locator: binds proposed edits to extracted fragments
//!
//! Matching policy:
//! - An exact (case-insensitive, whitespace-normalized) substring hit has
//!   confidence 1.0 and short-circuits the rest of the page; document-wide
//!   edits keep scanning subsequent fragments and pages for more
//!   occurrences.
//! - Without an exact hit, candidates are scored with a normalized edit
//!   distance and the single best candidate is accepted if it reaches
//!   [`SIMILARITY_THRESHOLD`].
//! - Targets that span several layout runs are matched against sliding
//!   windows of adjacent fragments, up to [`MAX_SPAN_FRAGMENTS`] wide.
//! - Ties break to the earliest page, then the earliest fragment, then the
//!   smallest window, so identical input always yields identical output.

use crate::oracle::{EditRequest, EditScope};
use crate::pdf::extract::{ExtractedDocument, PageFragments};
use rmcp::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Minimum similarity score an approximate match must reach to be accepted.
pub const SIMILARITY_THRESHOLD: f32 = 0.80;

/// Widest window of adjacent fragments considered for one target.
pub const MAX_SPAN_FRAGMENTS: usize = 6;

/// Reference to one extracted fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FragmentRef {
    /// Page number (1-indexed)
    pub page: u32,
    /// Fragment index in the page's reading order
    pub index: u32,
}

/// An edit request resolved to concrete fragments.
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedEdit {
    pub request: EditRequest,
    /// The matched fragments, adjacent and in reading order; never empty
    pub fragments: Vec<FragmentRef>,
    /// Similarity score in [0, 1]; 1.0 for exact matches
    pub confidence: f32,
    /// The matched document text, for display during confirmation
    pub snippet: String,
}

impl LocatedEdit {
    /// Distinct page numbers this edit touches, in order.
    pub fn pages(&self) -> Vec<u32> {
        let mut pages: Vec<u32> = self.fragments.iter().map(|f| f.page).collect();
        pages.dedup();
        pages
    }
}

/// Collapse whitespace runs to single spaces and fold case.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Normalized edit-distance similarity over already-normalized strings:
/// `1 - distance / max_len`, in [0, 1].
pub fn similarity(a: &str, b: &str) -> f32 {
    let ac: Vec<char> = a.chars().collect();
    let bc: Vec<char> = b.chars().collect();
    let max_len = ac.len().max(bc.len());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&ac, &bc) as f32 / max_len as f32
}

/// Normalized text of `count` adjacent fragments starting at `start`.
fn window_text(page: &PageFragments, start: usize, count: usize) -> String {
    let parts: Vec<String> = page.fragments[start..start + count]
        .iter()
        .map(|f| normalize(&f.text))
        .collect();
    parts.join(" ")
}

fn window_refs(page: &PageFragments, start: usize, count: usize) -> Vec<FragmentRef> {
    page.fragments[start..start + count]
        .iter()
        .map(|f| FragmentRef {
            page: f.page,
            index: f.index,
        })
        .collect()
}

/// Raw (unnormalized) text of a window, for display.
fn window_snippet(page: &PageFragments, start: usize, count: usize) -> String {
    page.fragments[start..start + count]
        .iter()
        .map(|f| f.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Locate one edit request against the whole extraction.
///
/// Returns every resolved occurrence for document-wide edits, the first
/// occurrence for [`EditScope::First`], or an empty vector when nothing
/// reaches the acceptance threshold (a locator miss; the caller reports it
/// and moves on).
pub fn locate(doc: &ExtractedDocument, request: &EditRequest, threshold: f32) -> Vec<LocatedEdit> {
    let target = normalize(request.target());
    if target.is_empty() {
        return Vec::new();
    }

    let exact = locate_exact(doc, request, &target);
    if !exact.is_empty() {
        return exact;
    }

    locate_approximate(doc, request, &target, threshold)
        .into_iter()
        .collect()
}

fn locate_exact(doc: &ExtractedDocument, request: &EditRequest, target: &str) -> Vec<LocatedEdit> {
    let mut hits = Vec::new();

    for page in &doc.pages {
        for start in 0..page.fragments.len() {
            let max_window = MAX_SPAN_FRAGMENTS.min(page.fragments.len() - start);
            for count in 1..=max_window {
                if !window_text(page, start, count).contains(target) {
                    continue;
                }
                // Minimal window: if the tail alone already contains the
                // target, the leading fragment is not part of the match and
                // a later start will find it.
                let redundant_head =
                    count > 1 && window_text(page, start + 1, count - 1).contains(target);
                if !redundant_head {
                    hits.push(LocatedEdit {
                        request: request.clone(),
                        fragments: window_refs(page, start, count),
                        confidence: 1.0,
                        snippet: window_snippet(page, start, count),
                    });
                    if request.scope() == EditScope::First {
                        return hits;
                    }
                }
                break;
            }
        }
    }

    hits
}

fn locate_approximate(
    doc: &ExtractedDocument,
    request: &EditRequest,
    target: &str,
    threshold: f32,
) -> Option<LocatedEdit> {
    let target_chars = target.chars().count();
    let mut best: Option<(f32, Vec<FragmentRef>, String)> = None;
    let mut best_score = 0.0f32;

    for page in &doc.pages {
        for start in 0..page.fragments.len() {
            let max_window = MAX_SPAN_FRAGMENTS.min(page.fragments.len() - start);
            for count in 1..=max_window {
                let candidate = window_text(page, start, count);
                let candidate_chars = candidate.chars().count();

                // Cheap length bound: similarity can never exceed
                // 1 - |len_a - len_b| / max_len. Candidates that cannot beat
                // the current best (or reach the threshold) are skipped
                // without running the edit-distance DP.
                let max_len = candidate_chars.max(target_chars);
                if max_len == 0 {
                    continue;
                }
                let upper_bound =
                    1.0 - candidate_chars.abs_diff(target_chars) as f32 / max_len as f32;
                if upper_bound <= best_score || upper_bound < threshold {
                    // Windows only grow; once the candidate is much longer
                    // than the target, wider windows are hopeless too.
                    if candidate_chars > target_chars {
                        break;
                    }
                    continue;
                }

                let score = similarity(target, &candidate);
                if score > best_score {
                    best_score = score;
                    best = Some((
                        score,
                        window_refs(page, start, count),
                        window_snippet(page, start, count),
                    ));
                }
            }
        }
    }

    match best {
        Some((score, fragments, snippet)) if score >= threshold => Some(LocatedEdit {
            request: request.clone(),
            fragments,
            confidence: score,
            snippet,
        }),
        _ => None,
    }
}
