//! AI oracle layer
//!
//! The oracle is the external language model that turns a natural-language
//! instruction plus a document snapshot into a batch of proposed edits. It
//! is treated as an opaque text-in/text-out service behind the [`Oracle`]
//! trait so tests can substitute canned replies.

mod gemini;
mod parse;
mod prompt;

pub use gemini::GeminiOracle;
pub use parse::{fallback_edits, parse_edit_reply, ParsedEdits};
pub use prompt::build_edit_prompt;

use crate::error::Result;
use rmcp::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Default Gemini API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Candidate model identifiers, tried in order until one answers.
pub const DEFAULT_MODELS: &[&str] = &[
    "gemini-2.5-flash",
    "gemini-2.5-flash-lite",
    "gemini-2.5-pro",
    "gemini-2.0-flash",
    "gemini-2.0-flash-lite",
];

/// Default request timeout for a single model call, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// How widely a replace edit applies when its target occurs more than once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EditScope {
    /// Every occurrence in the document
    #[default]
    All,
    /// Only the first occurrence in reading order
    First,
}

/// One edit proposed by the oracle (or supplied directly by a client).
///
/// The serde shape doubles as the JSON wire format the oracle is instructed
/// to reply with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EditRequest {
    /// Replace the target text, preserving the original font and position
    Replace {
        /// Exact text to find in the document
        target: String,
        /// Text to put in its place
        replacement: String,
        /// Which occurrences to touch (default: all)
        #[serde(default)]
        scope: EditScope,
    },
    /// Draw a highlight annotation over the target text
    Highlight {
        /// Exact text to find in the document
        target: String,
        /// Highlight color as a hex string (e.g. "#FFFF00"); default yellow
        #[serde(default)]
        color: Option<String>,
    },
}

impl EditRequest {
    /// The text this edit wants to locate.
    pub fn target(&self) -> &str {
        match self {
            EditRequest::Replace { target, .. } => target,
            EditRequest::Highlight { target, .. } => target,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            EditRequest::Replace { .. } => "replace",
            EditRequest::Highlight { .. } => "highlight",
        }
    }

    /// Occurrence scope; highlights always apply document-wide.
    pub fn scope(&self) -> EditScope {
        match self {
            EditRequest::Replace { scope, .. } => *scope,
            EditRequest::Highlight { .. } => EditScope::All,
        }
    }
}

/// Oracle configuration.
///
/// Passed explicitly into the adapter at construction so independent
/// pipeline invocations share no ambient state.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// API key; `None` means the caller must supply one per request
    pub api_key: Option<String>,
    /// API base URL
    pub base_url: String,
    /// Ordered candidate model identifiers
    pub models: Vec<String>,
    /// Per-call request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            models: DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// The external language model boundary.
///
/// Implementations send a prompt and return the raw reply text; parsing
/// into [`EditRequest`] happens in [`parse_edit_reply`]. A failed call or an
/// empty reply is an [`crate::error::Error::Oracle`].
pub trait Oracle: Send + Sync {
    fn generate(&self, prompt: &str) -> impl Future<Output = Result<String>> + Send;
}
