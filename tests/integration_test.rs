//! End-to-end pipeline tests
//!
//! The oracle boundary is mocked with canned replies so every scenario is
//! deterministic; fixture PDFs are generated in-memory with lopdf so the
//! suite needs no binary fixtures and no PDFium library.

use lopdf::{dictionary, Document, Object};
use pdf_edit_mcp_server::error::{Error, Result};
use pdf_edit_mcp_server::locator::{locate, SIMILARITY_THRESHOLD};
use pdf_edit_mcp_server::oracle::{EditRequest, EditScope, Oracle};
use pdf_edit_mcp_server::pdf::extract::{ExtractedDocument, FragBox, PageFragments, TextFragment};
use pdf_edit_mcp_server::pdf::mutate::apply_edits;
use pdf_edit_mcp_server::pipeline::{EditPipeline, EditStatus};
use std::sync::atomic::{AtomicU32, Ordering};

// ============================================================================
// Fixtures
// ============================================================================

/// Build a minimal valid PDF with `page_count` empty pages.
fn build_pdf(page_count: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.7");

    let mut kids = Vec::new();
    let mut page_ids = Vec::new();
    for _ in 0..page_count {
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        kids.push(Object::Reference(page_id));
        page_ids.push(page_id);
    }

    let pages_id = doc.add_object(dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => page_count as i64,
    });
    for page_id in page_ids {
        if let Ok(page) = doc.get_object_mut(page_id) {
            if let Ok(dict) = page.as_dict_mut() {
                dict.set("Parent", Object::Reference(pages_id));
            }
        }
    }

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
}

/// Extraction fixture: one fragment per `(page, text)` pair, stacked top to
/// bottom per page.
fn extraction(page_count: usize, fragments: &[(u32, &str)]) -> ExtractedDocument {
    let mut doc = ExtractedDocument::default();
    for p in 1..=page_count as u32 {
        let page_fragments: Vec<TextFragment> = fragments
            .iter()
            .filter(|(page, _)| *page == p)
            .enumerate()
            .map(|(i, (_, text))| TextFragment {
                page: p,
                index: i as u32,
                line: i as u32,
                text: text.to_string(),
                bounds: FragBox {
                    x0: 72.0,
                    y0: 700.0 - i as f32 * 24.0,
                    x1: 420.0,
                    y1: 714.0 - i as f32 * 24.0,
                },
                font: Some("Helvetica".to_string()),
                font_size: 12.0,
                color: None,
            })
            .collect();
        doc.pages.push(PageFragments {
            page: p,
            width: 612.0,
            height: 792.0,
            fragments: page_fragments,
        });
    }
    doc
}

struct CannedOracle {
    reply: String,
    calls: AtomicU32,
}

impl CannedOracle {
    fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            calls: AtomicU32::new(0),
        }
    }

    fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Oracle for CannedOracle {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

/// Simulates a network failure / timeout at the oracle boundary.
struct FailingOracle;

impl Oracle for FailingOracle {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        Err(Error::Oracle {
            reason: "connection timed out".to_string(),
        })
    }
}

/// Collect `(subtype, contents)` of every annotation on a page.
fn page_annotations(data: &[u8], page: u32) -> Vec<(String, Option<String>)> {
    let doc = Document::load_mem(data).unwrap();
    let pages = doc.get_pages();
    let page_id = pages[&page];
    let dict = doc.get_object(page_id).unwrap().as_dict().unwrap();

    let mut out = Vec::new();
    if let Ok(Object::Array(annots)) = dict.get(b"Annots") {
        for annot_ref in annots {
            if let Object::Reference(id) = annot_ref {
                if let Ok(Object::Dictionary(annot)) = doc.get_object(*id) {
                    let subtype = match annot.get(b"Subtype") {
                        Ok(Object::Name(name)) => String::from_utf8_lossy(name).to_string(),
                        _ => String::new(),
                    };
                    let contents = match annot.get(b"Contents") {
                        Ok(Object::String(bytes, _)) => {
                            Some(String::from_utf8_lossy(bytes).to_string())
                        }
                        _ => None,
                    };
                    out.push((subtype, contents));
                }
            }
        }
    }
    out
}

fn annotation_count(data: &[u8], page: u32, subtype: &str) -> usize {
    page_annotations(data, page)
        .iter()
        .filter(|(s, _)| s == subtype)
        .count()
}

// ============================================================================
// Scenario 1: exact replace in original font and position
// ============================================================================

#[tokio::test]
async fn test_scenario_replace_chapter_title() {
    let pdf = build_pdf(1);
    let doc = extraction(
        1,
        &[
            (1, "Chapter 2: Background"),
            (1, "This chapter reviews prior work."),
        ],
    );
    let oracle = CannedOracle::new(
        r#"{"edits": [{"kind": "replace",
                       "target": "Chapter 2: Background",
                       "replacement": "Chapter 2: Fundamentals"}],
            "summary": "Renamed the chapter"}"#,
    );
    let pipeline = EditPipeline::new(oracle);

    let outcome = pipeline
        .run_on(
            &pdf,
            doc,
            "change Chapter 2: Background to Chapter 2: Fundamentals",
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, EditStatus::Edited);
    assert_eq!(outcome.applied.len(), 1);
    assert_eq!(outcome.applied[0].confidence, 1.0);
    assert_eq!(outcome.applied[0].pages(), vec![1]);
    assert!(outcome.skipped.is_empty());
    assert_eq!(outcome.summary.as_deref(), Some("Renamed the chapter"));

    let output = outcome.output.expect("edited bytes");
    assert!(output.starts_with(b"%PDF-"));

    let annots = page_annotations(&output, 1);
    let free_text = annots
        .iter()
        .find(|(subtype, _)| subtype == "FreeText")
        .expect("replacement annotation");
    assert_eq!(free_text.1.as_deref(), Some("Chapter 2: Fundamentals"));
    // Original text is covered, not removed
    assert_eq!(annotation_count(&output, 1, "Square"), 1);
}

// ============================================================================
// Scenario 2: document-wide highlights across pages
// ============================================================================

#[tokio::test]
async fn test_scenario_highlight_across_pages() {
    let pdf = build_pdf(3);
    let doc = extraction(
        3,
        &[
            (1, "The budget increased this quarter."),
            (1, "Weather was mild."),
            (2, "Purely procedural notes."),
            (3, "Revenue outpaced every projection."),
        ],
    );
    let oracle = CannedOracle::new(
        r#"{"edits": [
            {"kind": "highlight", "target": "The budget increased this quarter."},
            {"kind": "highlight", "target": "Revenue outpaced every projection."}
        ]}"#,
    );
    let pipeline = EditPipeline::new(oracle);

    let outcome = pipeline
        .run_on(&pdf, doc, "highlight all sentences about finance")
        .await
        .unwrap();

    assert_eq!(outcome.status, EditStatus::Edited);
    assert_eq!(outcome.applied.len(), 2);
    // Page order is deterministic
    assert_eq!(outcome.applied[0].pages(), vec![1]);
    assert_eq!(outcome.applied[1].pages(), vec![3]);

    let output = outcome.output.unwrap();
    assert_eq!(annotation_count(&output, 1, "Highlight"), 1);
    assert_eq!(annotation_count(&output, 2, "Highlight"), 0);
    assert_eq!(annotation_count(&output, 3, "Highlight"), 1);

    // Highlights change no text
    for page in 1..=3 {
        assert_eq!(annotation_count(&output, page, "FreeText"), 0);
        assert_eq!(annotation_count(&output, page, "Square"), 0);
    }
}

// ============================================================================
// Scenario 3: oracle failure aborts with zero edits applied
// ============================================================================

#[tokio::test]
async fn test_scenario_oracle_failure_leaves_original_untouched() {
    let pdf = build_pdf(1);
    let before = pdf.clone();
    let doc = extraction(1, &[(1, "some text")]);
    let pipeline = EditPipeline::new(FailingOracle);

    let result = pipeline.run_on(&pdf, doc, "do anything").await;

    assert!(matches!(result, Err(Error::Oracle { .. })));
    assert_eq!(pdf, before);
}

// ============================================================================
// Scenario 4: hallucinated target skipped, valid edits still apply
// ============================================================================

#[tokio::test]
async fn test_scenario_miss_does_not_block_other_edits() {
    let pdf = build_pdf(1);
    let doc = extraction(1, &[(1, "alpha section"), (1, "beta section")]);
    let oracle = CannedOracle::new(
        r#"{"edits": [
            {"kind": "highlight", "target": "alpha section"},
            {"kind": "highlight", "target": "totally imaginary paragraph about dragons"}
        ]}"#,
    );
    let pipeline = EditPipeline::new(oracle);

    let outcome = pipeline.run_on(&pdf, doc, "highlight things").await.unwrap();

    assert_eq!(outcome.status, EditStatus::Edited);
    assert_eq!(outcome.applied.len(), 1);
    assert_eq!(outcome.skipped.len(), 1);
    assert_eq!(
        outcome.skipped[0].target,
        "totally imaginary paragraph about dragons"
    );

    let output = outcome.output.unwrap();
    assert_eq!(annotation_count(&output, 1, "Highlight"), 1);
}

// ============================================================================
// No extractable text is a terminal state, not an error
// ============================================================================

#[tokio::test]
async fn test_no_text_found_skips_oracle_and_mutation() {
    let pdf = build_pdf(1);
    let doc = extraction(1, &[]);
    let oracle = CannedOracle::new(r#"{"edits": []}"#);
    let pipeline = EditPipeline::new(oracle);

    let outcome = pipeline.run_on(&pdf, doc, "highlight everything").await.unwrap();

    assert_eq!(outcome.status, EditStatus::NoTextFound);
    assert!(outcome.applied.is_empty());
    assert!(outcome.output.is_none());
    assert_eq!(pipeline.oracle().call_count(), 0);
}

// ============================================================================
// Idempotence and determinism
// ============================================================================

#[test]
fn test_mutator_with_no_edits_is_byte_identical() {
    let pdf = build_pdf(2);
    let doc = extraction(2, &[(1, "text")]);
    let output = apply_edits(&pdf, &doc, &[]).unwrap();
    assert_eq!(output, pdf);
}

#[tokio::test]
async fn test_all_misses_yield_nothing_to_apply() {
    let pdf = build_pdf(1);
    let doc = extraction(1, &[(1, "real content")]);
    let oracle = CannedOracle::new(
        r#"{"edits": [{"kind": "highlight", "target": "nothing like the document"}]}"#,
    );
    let pipeline = EditPipeline::new(oracle);

    let outcome = pipeline.run_on(&pdf, doc, "highlight").await.unwrap();

    assert_eq!(outcome.status, EditStatus::NothingToApply);
    assert!(outcome.output.is_none());
    assert_eq!(outcome.skipped.len(), 1);
}

#[test]
fn test_locator_results_are_reproducible() {
    let doc = extraction(
        2,
        &[
            (1, "profits rose sharply"),
            (1, "profits rose sharply"),
            (2, "profits rose sharply"),
        ],
    );
    let request = EditRequest::Highlight {
        target: "profits rose sharply".to_string(),
        color: None,
    };

    let first = locate(&doc, &request, SIMILARITY_THRESHOLD);
    assert_eq!(first.len(), 3);
    for _ in 0..5 {
        assert_eq!(locate(&doc, &request, SIMILARITY_THRESHOLD), first);
    }
}

// ============================================================================
// Confirm-then-apply flow (propose, review, apply)
// ============================================================================

#[tokio::test]
async fn test_propose_then_apply_flow() {
    let pdf = build_pdf(1);
    let doc = extraction(1, &[(1, "Draft wording to fix"), (1, "Keep this line")]);
    let oracle = CannedOracle::new(
        r#"{"edits": [{"kind": "replace",
                       "target": "Draft wording to fix",
                       "replacement": "Final wording",
                       "scope": "first"}]}"#,
    );
    let pipeline = EditPipeline::new(oracle);

    let proposal = pipeline
        .propose_on(doc.clone(), "fix the draft wording")
        .await
        .unwrap();
    assert_eq!(proposal.located.len(), 1);
    assert_eq!(proposal.located[0].snippet, "Draft wording to fix");

    // The client reviews and confirms the proposed request list
    let confirmed: Vec<EditRequest> =
        proposal.located.iter().map(|e| e.request.clone()).collect();
    assert_eq!(confirmed[0].scope(), EditScope::First);

    let outcome = pipeline.apply_on(&pdf, doc, &confirmed).unwrap();
    assert_eq!(outcome.status, EditStatus::Edited);
    assert_eq!(outcome.applied.len(), 1);

    let output = outcome.output.unwrap();
    assert_eq!(annotation_count(&output, 1, "FreeText"), 1);
}
