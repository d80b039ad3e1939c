//! MCP server implementation using rmcp
//!
//! The tool surface plays the role of the app shell: a client uploads a PDF
//! (path, base64, URL, or a key from a previous call), describes the edit in
//! natural language, reviews the proposed edits, and downloads the result.

use crate::error::Error;
use crate::oracle::{EditRequest, GeminiOracle, OracleConfig};
use crate::pdf::extract::ExtractedDocument;
use crate::pipeline::{
    apply_edit_requests, extract_blocking, EditOutcome, EditPipeline, EditStatus, PipelineConfig,
    SkippedEdit,
};
use crate::locator::{LocatedEdit, SIMILARITY_THRESHOLD};
use crate::source::{
    resolve_base64, resolve_path, resolve_store_key, resolve_url, DocumentStore, ResolvedPdf,
};
use anyhow::Result;
use base64::Engine;
use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters, model::*,
    schemars::JsonSchema, tool, tool_handler, tool_router, ServerHandler, ServiceExt,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// PDF source specification
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum PdfSource {
    /// File path (absolute or relative)
    Path {
        /// Path to the PDF file
        path: String,
    },
    /// Base64 encoded PDF data
    Base64 {
        /// Base64 encoded PDF content
        base64: String,
    },
    /// URL to download PDF from
    Url {
        /// URL of the PDF file
        url: String,
    },
    /// Reference to a previously stored PDF
    CacheRef {
        /// Cache key from a previous operation
        cache_key: String,
    },
}

impl<'de> serde::Deserialize<'de> for PdfSource {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;

        let obj = value.as_object().ok_or_else(|| {
            serde::de::Error::custom(
                "Invalid source: expected an object with one of \"path\", \"base64\", \"url\", or \"cache_key\"",
            )
        })?;

        fn string_field<E: serde::de::Error>(
            value: &serde_json::Value,
            key: &str,
        ) -> std::result::Result<String, E> {
            value
                .as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| E::custom(format!("\"{}\" must be a string", key)))
        }

        if let Some(v) = obj.get("path") {
            return Ok(PdfSource::Path {
                path: string_field(v, "path")?,
            });
        }
        if let Some(v) = obj.get("base64") {
            return Ok(PdfSource::Base64 {
                base64: string_field(v, "base64")?,
            });
        }
        if let Some(v) = obj.get("url") {
            return Ok(PdfSource::Url {
                url: string_field(v, "url")?,
            });
        }
        if let Some(v) = obj.get("cache_key") {
            return Ok(PdfSource::CacheRef {
                cache_key: string_field(v, "cache_key")?,
            });
        }

        let keys: Vec<&String> = obj.keys().collect();
        Err(serde::de::Error::custom(format!(
            "Invalid source: expected an object with one of \"path\", \"base64\", \"url\", or \"cache_key\", but got keys: {:?}",
            keys
        )))
    }
}

/// Security and resource configuration for the PDF edit server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directories file-path sources may come from (empty = any path)
    pub resource_dirs: Vec<String>,
    /// Allow URLs that resolve to private/reserved IPs (default: false)
    pub allow_private_urls: bool,
    /// Maximum download size in bytes for URL sources (default: 100MB)
    pub max_download_bytes: u64,
    /// Maximum total bytes in the document store (default: 512MB)
    pub store_max_bytes: usize,
    /// Maximum number of stored documents (default: 100)
    pub store_max_entries: usize,
    /// Oracle configuration (API key, base URL, model fallback order)
    pub oracle: OracleConfig,
    /// Minimum similarity for approximate edit location
    pub similarity_threshold: f32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            resource_dirs: Vec::new(),
            allow_private_urls: false,
            max_download_bytes: 100 * 1024 * 1024, // 100MB
            store_max_bytes: 512 * 1024 * 1024,    // 512MB
            store_max_entries: 100,
            oracle: OracleConfig::default(),
            similarity_threshold: SIMILARITY_THRESHOLD,
        }
    }
}

impl ServerConfig {
    /// Default configuration with the API key picked up from the
    /// `GEMINI_API_KEY` environment variable, if set. Per-request keys
    /// still take precedence.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            if !key.is_empty() {
                config.oracle.api_key = Some(key);
            }
        }
        config
    }
}

/// PDF edit MCP server
#[derive(Clone)]
pub struct PdfEditServer {
    store: Arc<DocumentStore>,
    tool_router: ToolRouter<Self>,
    config: Arc<ServerConfig>,
}

// ============================================================================
// Request/Response types for extract_text
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExtractTextParams {
    /// PDF to read
    pub source: PdfSource,
    /// Password for encrypted PDFs
    #[serde(default)]
    pub password: Option<String>,
    /// Store the PDF and return a cache key for later operations
    #[serde(default)]
    pub cache: bool,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct PageContent {
    /// Page number (1-indexed)
    pub page: u32,
    /// Extracted text in reading order
    pub text: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ExtractTextResult {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    pub pages: Vec<PageContent>,
    pub total_pages: u32,
    /// True when the PDF is valid but contains no extractable text
    pub no_text_found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for propose_edits
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ProposeEditsParams {
    /// PDF to edit
    pub source: PdfSource,
    /// Natural-language description of the desired edit
    pub instruction: String,
    /// API key override; falls back to the server's configured key
    #[serde(default)]
    pub api_key: Option<String>,
    /// Password for encrypted PDFs
    #[serde(default)]
    pub password: Option<String>,
}

/// One located edit, ready for review.
#[derive(Debug, Serialize, JsonSchema)]
pub struct LocatedEditInfo {
    /// Edit kind ("replace" or "highlight")
    pub kind: String,
    /// The text the oracle asked to find
    pub target: String,
    /// Replacement text (replace edits only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
    /// Highlight color (highlight edits only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Match confidence in [0, 1]; 1.0 is an exact hit
    pub confidence: f32,
    /// Pages the edit touches (1-indexed)
    pub pages: Vec<u32>,
    /// The document text that was actually matched
    pub matched_text: String,
}

impl LocatedEditInfo {
    fn from_located(edit: &LocatedEdit) -> Self {
        let (replacement, color) = match &edit.request {
            EditRequest::Replace { replacement, .. } => (Some(replacement.clone()), None),
            EditRequest::Highlight { color, .. } => (None, color.clone()),
        };
        Self {
            kind: edit.request.kind_name().to_string(),
            target: edit.request.target().to_string(),
            replacement,
            color,
            confidence: edit.confidence,
            pages: edit.pages(),
            matched_text: edit.snippet.clone(),
        }
    }
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ProposeEditsResult {
    pub source: String,
    /// Key the source PDF was stored under; pass it to apply_edits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    /// Edits that were located and can be applied
    pub edits: Vec<LocatedEditInfo>,
    /// Proposed edits whose targets could not be found
    pub skipped: Vec<SkippedEdit>,
    /// Oracle's summary of the batch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// True when the PDF is valid but contains no extractable text
    pub no_text_found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for edit_pdf / apply_edits
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EditPdfParams {
    /// PDF to edit
    pub source: PdfSource,
    /// Natural-language description of the desired edit
    pub instruction: String,
    /// API key override; falls back to the server's configured key
    #[serde(default)]
    pub api_key: Option<String>,
    /// Password for encrypted PDFs
    #[serde(default)]
    pub password: Option<String>,
    /// Save the edited PDF to this path (optional)
    #[serde(default)]
    pub output_path: Option<String>,
    /// Include the edited PDF as base64 in the response
    #[serde(default)]
    pub return_base64: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ApplyEditsParams {
    /// PDF to edit (typically the cache_key returned by propose_edits)
    pub source: PdfSource,
    /// Edits to apply, e.g. {"kind": "replace", "target": "...", "replacement": "..."}
    /// or {"kind": "highlight", "target": "...", "color": "#FFFF00"}
    pub edits: Vec<EditRequest>,
    /// Password for encrypted PDFs
    #[serde(default)]
    pub password: Option<String>,
    /// Save the edited PDF to this path (optional)
    #[serde(default)]
    pub output_path: Option<String>,
    /// Include the edited PDF as base64 in the response
    #[serde(default)]
    pub return_base64: bool,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct EditPdfResult {
    pub source: String,
    /// Terminal state: "edited", "no_text_found", or "nothing_to_apply"
    pub status: EditStatus,
    /// Edits that were applied
    pub applied: Vec<LocatedEditInfo>,
    /// Edits whose targets could not be located
    pub skipped: Vec<SkippedEdit>,
    /// Oracle's summary of the batch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Key the edited PDF was stored under (present when status is "edited")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_cache_key: Option<String>,
    /// Path the edited PDF was saved to (if output_path was specified)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    /// Timestamped download filename for the edited PDF
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_filename: Option<String>,
    /// Edited PDF as base64 (if return_base64 was set)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_base64: Option<String>,
    /// Size of the source PDF in bytes
    pub original_size: usize,
    /// Size of the edited PDF in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EditPdfResult {
    fn error_result(source: String, e: &Error) -> Self {
        Self {
            source,
            status: EditStatus::NothingToApply,
            applied: vec![],
            skipped: vec![],
            summary: None,
            output_cache_key: None,
            output_path: None,
            suggested_filename: None,
            output_base64: None,
            original_size: 0,
            edited_size: None,
            error: Some(e.client_message()),
        }
    }
}

// ============================================================================
// Request/Response types for list_models
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListModelsParams {
    /// API key override; falls back to the server's configured key
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ListModelsResult {
    /// Model identifiers the API offers for content generation
    pub models: Vec<String>,
    /// The candidate models this server tries, in fallback order
    pub configured_fallback: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[tool_router]
impl PdfEditServer {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Create a new server with full configuration
    pub fn with_config(config: ServerConfig) -> Self {
        let store = DocumentStore::new(config.store_max_entries, config.store_max_bytes);
        Self {
            store: Arc::new(store),
            tool_router: Self::tool_router(),
            config: Arc::new(config),
        }
    }

    /// Edit a PDF from a natural-language instruction
    #[tool(
        description = "Edit a PDF from a natural-language instruction. Extracts the text, asks the language model to plan replacements and highlights, applies them preserving layout, and returns a cache key for the edited PDF.

Source format: one of {\"path\": \"/absolute/path.pdf\"}, {\"url\": \"https://...\"}, {\"base64\": \"...\"}, or {\"cache_key\": \"...\"}"
    )]
    async fn edit_pdf(&self, Parameters(params): Parameters<EditPdfParams>) -> String {
        let source_name = Self::source_name(&params.source);
        let result = self
            .process_edit_pdf(&params)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "edit_pdf failed");
                EditPdfResult::error_result(source_name, &e)
            });

        serde_json::to_string_pretty(&result).unwrap_or_default()
    }

    /// Preview the edits for an instruction without modifying the PDF
    #[tool(
        description = "Preview the edits a natural-language instruction would make, without modifying the PDF. Returns located edits with confidence scores plus a cache key; confirm them with apply_edits.

Source format: one of {\"path\": \"/absolute/path.pdf\"}, {\"url\": \"https://...\"}, {\"base64\": \"...\"}, or {\"cache_key\": \"...\"}"
    )]
    async fn propose_edits(&self, Parameters(params): Parameters<ProposeEditsParams>) -> String {
        let source_name = Self::source_name(&params.source);
        let result = self
            .process_propose_edits(&params)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "propose_edits failed");
                ProposeEditsResult {
                    source: source_name,
                    cache_key: None,
                    edits: vec![],
                    skipped: vec![],
                    summary: None,
                    no_text_found: false,
                    error: Some(e.client_message()),
                }
            });

        serde_json::to_string_pretty(&result).unwrap_or_default()
    }

    /// Apply an explicit list of edits to a PDF
    #[tool(
        description = "Apply an explicit list of replace/highlight edits to a PDF, typically after reviewing a propose_edits result. No language model call is made.

Source format: one of {\"path\": \"/absolute/path.pdf\"}, {\"url\": \"https://...\"}, {\"base64\": \"...\"}, or {\"cache_key\": \"...\"}"
    )]
    async fn apply_edits(&self, Parameters(params): Parameters<ApplyEditsParams>) -> String {
        let source_name = Self::source_name(&params.source);
        let result = self
            .process_apply_edits(&params)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "apply_edits failed");
                EditPdfResult::error_result(source_name, &e)
            });

        serde_json::to_string_pretty(&result).unwrap_or_default()
    }

    /// Extract text content from a PDF
    #[tool(
        description = "Extract text content from a PDF, page by page, in reading order.

Source format: one of {\"path\": \"/absolute/path.pdf\"}, {\"url\": \"https://...\"}, {\"base64\": \"...\"}, or {\"cache_key\": \"...\"}"
    )]
    async fn extract_text(&self, Parameters(params): Parameters<ExtractTextParams>) -> String {
        let source_name = Self::source_name(&params.source);
        let result = self
            .process_extract_text(&params)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "extract_text failed");
                ExtractTextResult {
                    source: source_name,
                    cache_key: None,
                    pages: vec![],
                    total_pages: 0,
                    no_text_found: false,
                    error: Some(e.client_message()),
                }
            });

        serde_json::to_string_pretty(&result).unwrap_or_default()
    }

    /// List language models available for edit planning
    #[tool(
        description = "List the language models the configured API key can use for edit planning, plus the fallback order this server tries."
    )]
    async fn list_models(&self, Parameters(params): Parameters<ListModelsParams>) -> String {
        let result = match self.process_list_models(&params).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "list_models failed");
                ListModelsResult {
                    models: vec![],
                    configured_fallback: self.config.oracle.models.clone(),
                    error: Some(e.client_message()),
                }
            }
        };

        serde_json::to_string_pretty(&result).unwrap_or_default()
    }
}

impl PdfEditServer {
    fn source_name(source: &PdfSource) -> String {
        match source {
            PdfSource::Path { path } => path.clone(),
            PdfSource::Base64 { .. } => "<base64>".to_string(),
            PdfSource::Url { url } => url.clone(),
            PdfSource::CacheRef { cache_key } => format!("<cache:{}>", cache_key),
        }
    }

    async fn resolve_source(&self, source: &PdfSource) -> crate::error::Result<ResolvedPdf> {
        match source {
            PdfSource::Path { path } => {
                self.validate_path_access(path)?;
                resolve_path(path)
            }
            PdfSource::Base64 { base64 } => resolve_base64(base64),
            PdfSource::Url { url } => {
                resolve_url(
                    url,
                    self.config.allow_private_urls,
                    self.config.max_download_bytes,
                )
                .await
            }
            PdfSource::CacheRef { cache_key } => resolve_store_key(cache_key, &self.store),
        }
    }

    /// Validate that a path is within allowed resource directories.
    /// If no resource_dirs are configured, all paths are allowed.
    fn validate_path_access(&self, path: &str) -> crate::error::Result<std::path::PathBuf> {
        if self.config.resource_dirs.is_empty() {
            return Ok(std::path::PathBuf::from(path));
        }

        let canonical =
            std::fs::canonicalize(path).map_err(|_| Error::PathAccessDenied {
                path: path.to_string(),
            })?;

        for dir in &self.config.resource_dirs {
            if let Ok(canonical_dir) = std::fs::canonicalize(dir) {
                if canonical.starts_with(&canonical_dir) {
                    return Ok(canonical);
                }
            }
        }

        Err(Error::PathAccessDenied {
            path: path.to_string(),
        })
    }

    /// Validate that an output path is within allowed resource directories.
    /// Canonicalizes the parent directory since the output file may not
    /// exist yet.
    fn validate_output_path_access(&self, path: &str) -> crate::error::Result<std::path::PathBuf> {
        if self.config.resource_dirs.is_empty() {
            return Ok(std::path::PathBuf::from(path));
        }

        let path_obj = std::path::Path::new(path);
        let parent = path_obj.parent().unwrap_or(std::path::Path::new("."));

        let canonical_parent =
            std::fs::canonicalize(parent).map_err(|_| Error::PathAccessDenied {
                path: path.to_string(),
            })?;

        let canonical_target = canonical_parent.join(
            path_obj
                .file_name()
                .unwrap_or(std::ffi::OsStr::new("")),
        );

        for dir in &self.config.resource_dirs {
            if let Ok(canonical_dir) = std::fs::canonicalize(dir) {
                if canonical_target.starts_with(&canonical_dir) {
                    return Ok(canonical_target);
                }
            }
        }

        Err(Error::PathAccessDenied {
            path: path.to_string(),
        })
    }

    /// Write output data to a file path, with sandbox validation.
    fn write_output(
        &self,
        output_path: &Option<String>,
        data: &[u8],
    ) -> crate::error::Result<Option<String>> {
        if let Some(ref path_str) = output_path {
            self.validate_output_path_access(path_str)?;

            let path = Path::new(path_str);

            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent)?;
                }
            }

            std::fs::write(path, data)?;
            Ok(Some(path_str.clone()))
        } else {
            Ok(None)
        }
    }

    /// Resolve the API key: per-request value first, then server config.
    /// Absence is a configuration error raised before any pipeline work.
    fn resolve_api_key(&self, request_key: &Option<String>) -> crate::error::Result<String> {
        if let Some(key) = request_key {
            if !key.is_empty() {
                return Ok(key.clone());
            }
        }
        self.config
            .oracle
            .api_key
            .clone()
            .ok_or(Error::MissingApiKey)
    }

    fn build_oracle(&self, request_key: &Option<String>) -> crate::error::Result<GeminiOracle> {
        let mut oracle_config = self.config.oracle.clone();
        oracle_config.api_key = Some(self.resolve_api_key(request_key)?);
        GeminiOracle::new(&oracle_config)
    }

    fn build_pipeline(
        &self,
        request_key: &Option<String>,
    ) -> crate::error::Result<EditPipeline<GeminiOracle>> {
        let oracle = self.build_oracle(request_key)?;
        Ok(EditPipeline::with_config(
            oracle,
            PipelineConfig {
                similarity_threshold: self.config.similarity_threshold,
            },
        ))
    }

    /// Download filename for an edited document, e.g.
    /// `edited_report_20260807_141503.pdf`.
    fn suggested_filename(source_name: &str) -> String {
        let stem = Path::new(source_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty() && !s.starts_with('<'))
            .unwrap_or("document");
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        format!("edited_{}_{}.pdf", stem, timestamp)
    }

    /// Package a pipeline outcome into a tool result, storing and
    /// optionally writing the output bytes.
    fn package_outcome(
        &self,
        source_name: String,
        original_size: usize,
        outcome: EditOutcome,
        output_path: &Option<String>,
        return_base64: bool,
    ) -> crate::error::Result<EditPdfResult> {
        let applied: Vec<LocatedEditInfo> =
            outcome.applied.iter().map(LocatedEditInfo::from_located).collect();

        let (output_cache_key, written_path, suggested, output_base64, edited_size) =
            match outcome.output {
                Some(bytes) => {
                    let written = self.write_output(output_path, &bytes)?;
                    let suggested = Self::suggested_filename(&source_name);
                    let encoded = if return_base64 {
                        Some(base64::engine::general_purpose::STANDARD.encode(&bytes))
                    } else {
                        None
                    };
                    let size = bytes.len();
                    let key = self.store.insert(bytes);
                    (key, written, Some(suggested), encoded, Some(size))
                }
                None => (None, None, None, None, None),
            };

        Ok(EditPdfResult {
            source: source_name,
            status: outcome.status,
            applied,
            skipped: outcome.skipped,
            summary: outcome.summary,
            output_cache_key,
            output_path: written_path,
            suggested_filename: suggested,
            output_base64,
            original_size,
            edited_size,
            error: None,
        })
    }

    async fn process_edit_pdf(&self, params: &EditPdfParams) -> crate::error::Result<EditPdfResult> {
        // Configuration problems surface before any PDF work
        let pipeline = self.build_pipeline(&params.api_key)?;

        let resolved = self.resolve_source(&params.source).await?;
        let source_name = resolved.source_name.clone();
        let original_size = resolved.data.len();

        let outcome = pipeline
            .run(&resolved.data, params.password.as_deref(), &params.instruction)
            .await?;

        self.package_outcome(
            source_name,
            original_size,
            outcome,
            &params.output_path,
            params.return_base64,
        )
    }

    async fn process_propose_edits(
        &self,
        params: &ProposeEditsParams,
    ) -> crate::error::Result<ProposeEditsResult> {
        let pipeline = self.build_pipeline(&params.api_key)?;

        let resolved = self.resolve_source(&params.source).await?;
        let source_name = resolved.source_name.clone();

        // Always keep the source so apply_edits can reference it by key
        let cache_key = self.store.insert(resolved.data.clone());

        let proposal = pipeline
            .propose(&resolved.data, params.password.as_deref(), &params.instruction)
            .await?;

        let no_text_found = proposal.document.has_no_text();
        Ok(ProposeEditsResult {
            source: source_name,
            cache_key,
            edits: proposal.located.iter().map(LocatedEditInfo::from_located).collect(),
            skipped: proposal.skipped,
            summary: proposal.summary,
            no_text_found,
            error: None,
        })
    }

    async fn process_apply_edits(
        &self,
        params: &ApplyEditsParams,
    ) -> crate::error::Result<EditPdfResult> {
        let resolved = self.resolve_source(&params.source).await?;
        let source_name = resolved.source_name.clone();
        let original_size = resolved.data.len();

        let document = extract_blocking(&resolved.data, params.password.as_deref()).await?;
        let outcome = apply_edit_requests(
            &resolved.data,
            document,
            &params.edits,
            self.config.similarity_threshold,
        )?;

        self.package_outcome(
            source_name,
            original_size,
            outcome,
            &params.output_path,
            params.return_base64,
        )
    }

    async fn process_extract_text(
        &self,
        params: &ExtractTextParams,
    ) -> crate::error::Result<ExtractTextResult> {
        let resolved = self.resolve_source(&params.source).await?;
        let source_name = resolved.source_name.clone();

        let cache_key = if params.cache {
            self.store.insert(resolved.data.clone())
        } else {
            None
        };

        let document: ExtractedDocument =
            extract_blocking(&resolved.data, params.password.as_deref()).await?;

        let no_text_found = document.has_no_text();
        let total_pages = document.pages.len() as u32;
        let pages = document
            .page_texts()
            .into_iter()
            .map(|(page, text)| PageContent { page, text })
            .collect();

        Ok(ExtractTextResult {
            source: source_name,
            cache_key,
            pages,
            total_pages,
            no_text_found,
            error: None,
        })
    }

    async fn process_list_models(
        &self,
        params: &ListModelsParams,
    ) -> crate::error::Result<ListModelsResult> {
        let oracle = self.build_oracle(&params.api_key)?;
        let models = oracle.list_models().await?;

        Ok(ListModelsResult {
            models,
            configured_fallback: self.config.oracle.models.clone(),
            error: None,
        })
    }
}

impl Default for PdfEditServer {
    fn default() -> Self {
        Self::new()
    }
}

#[tool_handler]
impl ServerHandler for PdfEditServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "PDF edit server: describe a change in natural language and get back an \
                 edited PDF. Use propose_edits to preview, apply_edits to confirm, or \
                 edit_pdf for one-shot editing. Requires a Gemini API key (GEMINI_API_KEY \
                 or per-request api_key)."
                    .into(),
            ),
        }
    }
}

/// Run the MCP server with configuration from the environment
pub async fn run_server() -> Result<()> {
    run_server_with_config(ServerConfig::from_env()).await
}

/// Run the MCP server with full configuration
pub async fn run_server_with_config(config: ServerConfig) -> Result<()> {
    if config.oracle.api_key.is_none() {
        tracing::warn!(
            "no API key configured; edit tools will fail until a key is supplied per request"
        );
    }

    let server = PdfEditServer::with_config(config);

    tracing::info!("PDF edit server ready, waiting for connections...");

    let service = server.serve(rmcp::transport::io::stdio()).await?;
    service.waiting().await?;

    Ok(())
}
