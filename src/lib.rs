//! PDF Edit MCP Server Library
//!
//! This crate turns natural-language instructions into PDF edits:
//! - `edit_pdf`: extract text, plan edits with a language model, apply them
//! - `propose_edits` / `apply_edits`: preview-then-confirm editing
//! - `extract_text`: positioned text extraction from PDFs
//!
//! The pipeline is a single linear pass per request: extract fragments with
//! layout positions, build a prompt, ask the oracle, locate each proposed
//! edit against the extracted fragments, rewrite the PDF.

pub mod error;
pub mod locator;
pub mod oracle;
pub mod pdf;
pub mod pipeline;
pub mod server;
pub mod source;

pub use error::{Error, Result};
pub use pipeline::{EditOutcome, EditPipeline, EditStatus, PipelineConfig, SkippedEdit};
pub use server::{run_server, run_server_with_config, PdfEditServer, PdfSource, ServerConfig};
