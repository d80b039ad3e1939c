//! The edit pipeline
//!
//! One request runs the full chain to completion: extract text with
//! positions, format the prompt, ask the oracle, locate the proposed edits,
//! mutate the PDF. Nothing is shared between invocations; every run owns
//! its own extraction and edit state, so concurrent requests are
//! independent by construction.

use crate::error::{Error, Result};
use crate::locator::{locate, LocatedEdit, SIMILARITY_THRESHOLD};
use crate::oracle::{
    build_edit_prompt, fallback_edits, parse_edit_reply, EditRequest, Oracle, ParsedEdits,
};
use crate::pdf::extract::{extract_fragments, ExtractedDocument};
use crate::pdf::mutate::apply_edits;
use rmcp::schemars::JsonSchema;
use serde::Serialize;

/// Terminal state of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EditStatus {
    /// Edits were applied and output bytes were produced
    Edited,
    /// The document has no extractable text; nothing was attempted
    NoTextFound,
    /// No proposed edit could be located; the document is unchanged
    NothingToApply,
}

/// A proposed edit the locator could not place (a locator miss).
/// Collected and reported; never aborts the rest of the batch.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct SkippedEdit {
    /// Edit kind ("replace" or "highlight")
    pub kind: String,
    /// The target text that could not be found
    pub target: String,
    /// Why the edit was skipped
    pub reason: String,
}

/// Result of the propose stage: located edits awaiting confirmation.
#[derive(Debug)]
pub struct Proposal {
    /// The extraction the edits are bound to
    pub document: ExtractedDocument,
    pub located: Vec<LocatedEdit>,
    pub skipped: Vec<SkippedEdit>,
    /// Oracle's own summary of the batch, when it provided one
    pub summary: Option<String>,
}

/// Result of a full pipeline run.
#[derive(Debug)]
pub struct EditOutcome {
    pub status: EditStatus,
    pub applied: Vec<LocatedEdit>,
    pub skipped: Vec<SkippedEdit>,
    pub summary: Option<String>,
    /// Edited PDF bytes; `None` unless `status` is [`EditStatus::Edited`]
    pub output: Option<Vec<u8>>,
}

/// Pipeline tuning knobs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Minimum similarity for approximate matches
    pub similarity_threshold: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: SIMILARITY_THRESHOLD,
        }
    }
}

/// The single-pass edit pipeline, generic over the oracle so tests can
/// substitute canned replies for the live model.
pub struct EditPipeline<O: Oracle> {
    oracle: O,
    threshold: f32,
}

impl<O: Oracle> EditPipeline<O> {
    pub fn new(oracle: O) -> Self {
        Self::with_config(oracle, PipelineConfig::default())
    }

    pub fn with_config(oracle: O, config: PipelineConfig) -> Self {
        Self {
            oracle,
            threshold: config.similarity_threshold,
        }
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// Extract, prompt the oracle, and locate its proposed edits.
    pub async fn propose(
        &self,
        data: &[u8],
        password: Option<&str>,
        instruction: &str,
    ) -> Result<Proposal> {
        let document = extract_blocking(data, password).await?;
        self.propose_on(document, instruction).await
    }

    /// Propose against an extraction produced elsewhere.
    pub async fn propose_on(
        &self,
        document: ExtractedDocument,
        instruction: &str,
    ) -> Result<Proposal> {
        if document.has_no_text() {
            return Ok(Proposal {
                document,
                located: Vec::new(),
                skipped: Vec::new(),
                summary: None,
            });
        }

        let prompt = build_edit_prompt(&document.page_texts(), instruction);
        let reply = self.oracle.generate(&prompt).await?;

        let parsed = match parse_edit_reply(&reply) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, "oracle reply unusable, trying instruction fallback");
                let edits = fallback_edits(instruction);
                if edits.is_empty() {
                    return Err(e);
                }
                ParsedEdits {
                    edits,
                    summary: None,
                }
            }
        };

        let (located, skipped) = locate_requests(&document, &parsed.edits, self.threshold);
        Ok(Proposal {
            document,
            located,
            skipped,
            summary: parsed.summary,
        })
    }

    /// The whole chain: propose, then mutate.
    pub async fn run(
        &self,
        data: &[u8],
        password: Option<&str>,
        instruction: &str,
    ) -> Result<EditOutcome> {
        let document = extract_blocking(data, password).await?;
        self.run_on(data, document, instruction).await
    }

    /// Run against an extraction produced elsewhere.
    pub async fn run_on(
        &self,
        data: &[u8],
        document: ExtractedDocument,
        instruction: &str,
    ) -> Result<EditOutcome> {
        let proposal = self.propose_on(document, instruction).await?;
        finish(data, proposal)
    }

    /// Locate and apply a confirmed edit list, skipping the oracle. Used
    /// after a client has reviewed a proposal.
    pub async fn apply(
        &self,
        data: &[u8],
        password: Option<&str>,
        edits: &[EditRequest],
    ) -> Result<EditOutcome> {
        let document = extract_blocking(data, password).await?;
        self.apply_on(data, document, edits)
    }

    /// Apply against an extraction produced elsewhere.
    pub fn apply_on(
        &self,
        data: &[u8],
        document: ExtractedDocument,
        edits: &[EditRequest],
    ) -> Result<EditOutcome> {
        apply_edit_requests(data, document, edits, self.threshold)
    }
}

/// Locate and apply an explicit edit list. No oracle involved; this is the
/// second half of the confirm-then-apply flow.
pub fn apply_edit_requests(
    data: &[u8],
    document: ExtractedDocument,
    edits: &[EditRequest],
    threshold: f32,
) -> Result<EditOutcome> {
    if document.has_no_text() {
        return Ok(EditOutcome {
            status: EditStatus::NoTextFound,
            applied: Vec::new(),
            skipped: Vec::new(),
            summary: None,
            output: None,
        });
    }

    let (located, skipped) = locate_requests(&document, edits, threshold);
    finish(
        data,
        Proposal {
            document,
            located,
            skipped,
            summary: None,
        },
    )
}

/// Locate a batch of edit requests. Misses are collected, not fatal.
fn locate_requests(
    document: &ExtractedDocument,
    edits: &[EditRequest],
    threshold: f32,
) -> (Vec<LocatedEdit>, Vec<SkippedEdit>) {
    let mut located = Vec::new();
    let mut skipped = Vec::new();

    for request in edits {
        let hits = locate(document, request, threshold);
        if hits.is_empty() {
            tracing::warn!(target = %request.target(), "edit target not located");
            skipped.push(SkippedEdit {
                kind: request.kind_name().to_string(),
                target: request.target().to_string(),
                reason: format!(
                    "no match at or above the similarity threshold ({:.2})",
                    threshold
                ),
            });
        } else {
            located.extend(hits);
        }
    }

    (located, skipped)
}

/// Mutate, or report why there is nothing to mutate. On any mutation error
/// the caller still holds the original, untouched bytes.
fn finish(data: &[u8], proposal: Proposal) -> Result<EditOutcome> {
    if proposal.document.has_no_text() {
        return Ok(EditOutcome {
            status: EditStatus::NoTextFound,
            applied: Vec::new(),
            skipped: proposal.skipped,
            summary: proposal.summary,
            output: None,
        });
    }

    if proposal.located.is_empty() {
        return Ok(EditOutcome {
            status: EditStatus::NothingToApply,
            applied: Vec::new(),
            skipped: proposal.skipped,
            summary: proposal.summary,
            output: None,
        });
    }

    let output = apply_edits(data, &proposal.document, &proposal.located)?;

    Ok(EditOutcome {
        status: EditStatus::Edited,
        applied: proposal.located,
        skipped: proposal.skipped,
        summary: proposal.summary,
        output: Some(output),
    })
}

/// Extract fragments on the blocking thread pool (PDFium work is CPU-bound).
pub async fn extract_blocking(data: &[u8], password: Option<&str>) -> Result<ExtractedDocument> {
    let data = data.to_vec();
    let password = password.map(String::from);

    tokio::task::spawn_blocking(move || extract_fragments(&data, password.as_deref()))
        .await
        .map_err(|e| Error::Pdfium {
            reason: format!("Task join error: {}", e),
        })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::extract::{FragBox, PageFragments, TextFragment};
    use std::sync::atomic::{AtomicU32, Ordering};

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
    }

    impl Oracle for CannedOracle {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }
    }

    struct FailingOracle;

    impl Oracle for FailingOracle {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Err(Error::Oracle {
                reason: "network unreachable".to_string(),
            })
        }
    }

    fn one_page_doc(texts: &[&str]) -> ExtractedDocument {
        ExtractedDocument {
            pages: vec![PageFragments {
                page: 1,
                width: 612.0,
                height: 792.0,
                fragments: texts
                    .iter()
                    .enumerate()
                    .map(|(i, text)| TextFragment {
                        page: 1,
                        index: i as u32,
                        line: i as u32,
                        text: text.to_string(),
                        bounds: FragBox {
                            x0: 72.0,
                            y0: 700.0 - i as f32 * 20.0,
                            x1: 400.0,
                            y1: 712.0 - i as f32 * 20.0,
                        },
                        font: None,
                        font_size: 12.0,
                        color: None,
                    })
                    .collect(),
            }],
        }
    }

    fn empty_doc() -> ExtractedDocument {
        ExtractedDocument {
            pages: vec![PageFragments {
                page: 1,
                width: 612.0,
                height: 792.0,
                fragments: Vec::new(),
            }],
        }
    }

    #[tokio::test]
    async fn test_no_text_short_circuits_without_oracle_call() {
        let oracle = CannedOracle::new("{}");
        let pipeline = EditPipeline::new(oracle);

        let proposal = pipeline
            .propose_on(empty_doc(), "highlight everything")
            .await
            .unwrap();

        assert!(proposal.located.is_empty());
        assert_eq!(pipeline.oracle.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_oracle_failure_propagates() {
        let pipeline = EditPipeline::new(FailingOracle);
        let result = pipeline
            .propose_on(one_page_doc(&["some text"]), "do something")
            .await;
        assert!(matches!(result, Err(Error::Oracle { .. })));
    }

    #[tokio::test]
    async fn test_unparseable_reply_falls_back_to_instruction() {
        let oracle = CannedOracle::new("Sure! I'd be happy to help with that.");
        let pipeline = EditPipeline::new(oracle);

        let proposal = pipeline
            .propose_on(
                one_page_doc(&["old name appears here"]),
                "change 'old name' to 'new name'",
            )
            .await
            .unwrap();

        assert_eq!(proposal.located.len(), 1);
        assert_eq!(proposal.located[0].request.target(), "old name");
    }

    #[tokio::test]
    async fn test_unparseable_reply_without_fallback_is_oracle_error() {
        let oracle = CannedOracle::new("no json here");
        let pipeline = EditPipeline::new(oracle);

        let result = pipeline
            .propose_on(one_page_doc(&["text"]), "make it nicer")
            .await;
        assert!(matches!(result, Err(Error::Oracle { .. })));
    }

    #[tokio::test]
    async fn test_misses_are_collected_alongside_hits() {
        let reply = r#"{"edits": [
            {"kind": "highlight", "target": "real text"},
            {"kind": "highlight", "target": "hallucinated nonsense"}
        ]}"#;
        let pipeline = EditPipeline::new(CannedOracle::new(reply));

        let proposal = pipeline
            .propose_on(one_page_doc(&["real text", "other line"]), "highlight stuff")
            .await
            .unwrap();

        assert_eq!(proposal.located.len(), 1);
        assert_eq!(proposal.skipped.len(), 1);
        assert_eq!(proposal.skipped[0].target, "hallucinated nonsense");
    }
}
