//! PDF processing layer
//!
//! Extraction is delegated to PDFium, mutation to lopdf. Both operate on
//! in-memory byte streams only.

pub mod extract;
pub mod mutate;

pub use extract::{extract_fragments, ExtractedDocument, FragBox, PageFragments, TextFragment};
pub use mutate::{apply_edits, COVER_PADDING, MIN_REPLACEMENT_FONT_SIZE};
