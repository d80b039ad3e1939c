//! PDF text extraction with layout positions, via PDFium
//!
//! Produces per-page sequences of [`TextFragment`] in reading order. Each
//! fragment is a run of characters on one layout line sharing the same
//! style, with its bounding box in PDF points (bottom-left origin).

use crate::error::{Error, Result};
use pdfium_render::prelude::*;

/// Bounding box in PDF points, bottom-left origin.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FragBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl FragBox {
    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }
}

/// A positioned run of text extracted from a PDF page.
///
/// Fragments are immutable once extracted; every downstream stage refers to
/// them by `(page, index)`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TextFragment {
    /// Page number (1-indexed)
    pub page: u32,
    /// Position of this fragment in the page's reading order (0-indexed)
    pub index: u32,
    /// Layout line this fragment belongs to (0-indexed, top to bottom)
    pub line: u32,
    /// Text content
    pub text: String,
    /// Bounding box
    pub bounds: FragBox,
    /// Font family name, when the document reports one
    pub font: Option<String>,
    /// Font size in points
    pub font_size: f32,
    /// Fill color (RGB), when the document reports one
    pub color: Option<[u8; 3]>,
}

/// All fragments of one page, with the page dimensions.
#[derive(Debug, Clone)]
pub struct PageFragments {
    /// Page number (1-indexed)
    pub page: u32,
    /// Page width in points
    pub width: f32,
    /// Page height in points
    pub height: f32,
    /// Fragments in reading order
    pub fragments: Vec<TextFragment>,
}

impl PageFragments {
    /// Reassemble the page text: fragments on one layout line joined by a
    /// space, lines joined by newlines.
    pub fn text(&self) -> String {
        let mut out = String::new();
        let mut current_line: Option<u32> = None;
        for frag in &self.fragments {
            match current_line {
                Some(line) if line == frag.line => out.push(' '),
                Some(_) => out.push('\n'),
                None => {}
            }
            out.push_str(&frag.text);
            current_line = Some(frag.line);
        }
        out
    }
}

/// The result of one extraction pass over a document.
#[derive(Debug, Clone, Default)]
pub struct ExtractedDocument {
    pub pages: Vec<PageFragments>,
}

impl ExtractedDocument {
    /// True when no page yielded any text. A valid terminal state for
    /// image-only or empty documents, not an error.
    pub fn has_no_text(&self) -> bool {
        self.pages.iter().all(|p| p.fragments.is_empty())
    }

    /// Look up a fragment by page number and reading-order index.
    pub fn fragment(&self, page: u32, index: u32) -> Option<&TextFragment> {
        self.pages
            .iter()
            .find(|p| p.page == page)
            .and_then(|p| p.fragments.get(index as usize))
    }

    /// Per-page plain text, `(page_number, text)` pairs.
    pub fn page_texts(&self) -> Vec<(u32, String)> {
        self.pages.iter().map(|p| (p.page, p.text())).collect()
    }
}

/// One character with position and style, the raw unit PDFium hands back.
#[derive(Debug, Clone)]
struct CharInfo {
    ch: char,
    x: f32,
    top: f32,
    bottom: f32,
    width: f32,
    height: f32,
    font_size: f32,
    font: Option<String>,
}

/// Get a PDFium instance (new instance each time - PDFium is not thread-safe)
fn create_pdfium() -> Result<Pdfium> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(
                "/opt/pdfium/lib",
            ))
        })
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| Error::Pdfium {
            reason: format!("Failed to initialize PDFium: {}", e),
        })?;

    Ok(Pdfium::new(bindings))
}

fn map_pdfium_error(err: PdfiumError) -> Error {
    match err {
        PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError) => {
            Error::PasswordRequired
        }
        _ => Error::InvalidPdf {
            reason: format!("{}", err),
        },
    }
}

/// Extract positioned text fragments from PDF bytes.
///
/// Returns one [`PageFragments`] per page, in page order. Pages without
/// extractable text yield empty fragment lists; an unreadable byte stream
/// fails with [`Error::InvalidPdf`].
pub fn extract_fragments(data: &[u8], password: Option<&str>) -> Result<ExtractedDocument> {
    if data.len() < 4 || &data[0..4] != b"%PDF" {
        return Err(Error::InvalidPdf {
            reason: "Not a valid PDF file".to_string(),
        });
    }

    let pdfium = create_pdfium()?;

    let document = match password {
        Some(pwd) => pdfium.load_pdf_from_byte_slice(data, Some(pwd)),
        None => pdfium.load_pdf_from_byte_slice(data, None),
    }
    .map_err(map_pdfium_error)?;

    let pages = document.pages();
    let mut out = Vec::with_capacity(pages.len() as usize);

    for index in 0..pages.len() {
        let page = pages.get(index).map_err(|e| Error::Pdfium {
            reason: format!("Failed to get page {}: {}", index + 1, e),
        })?;

        let page_num = index as u32 + 1;
        let chars = collect_chars(&page);
        let fragments = fragments_from_chars(page_num, chars);

        out.push(PageFragments {
            page: page_num,
            width: page.width().value,
            height: page.height().value,
            fragments,
        });
    }

    Ok(ExtractedDocument { pages: out })
}

/// Collect character information from a page.
fn collect_chars(page: &PdfPage) -> Vec<CharInfo> {
    let text_obj = match page.text() {
        Ok(t) => t,
        Err(_) => return Vec::new(),
    };

    let mut chars = Vec::new();

    for segment in text_obj.segments().iter() {
        if let Ok(char_iter) = segment.chars() {
            for char_result in char_iter.iter() {
                if let Some(c) = char_result.unicode_char() {
                    if let Ok(bounds) = char_result.loose_bounds() {
                        let font_size = char_result.scaled_font_size().value;
                        let font = {
                            let name = char_result.font_name();
                            if name.is_empty() {
                                None
                            } else {
                                Some(name)
                            }
                        };

                        chars.push(CharInfo {
                            ch: c,
                            x: bounds.left().value,
                            top: bounds.top().value,
                            bottom: bounds.bottom().value,
                            width: bounds.width().value,
                            height: bounds.height().value,
                            font_size,
                            font,
                        });
                    }
                }
            }
        }
    }

    chars
}

/// Calculate grouping thresholds from the font size distribution.
///
/// Y tolerance accounts for baseline variations within a line; the space
/// threshold separates words when the extractor reports no explicit space.
fn calculate_thresholds(chars: &[CharInfo]) -> (f32, f32) {
    let mut heights: Vec<f32> = chars
        .iter()
        .filter(|c| c.height > 0.0)
        .map(|c| c.height)
        .collect();

    if heights.is_empty() {
        return (5.0, 10.0);
    }

    heights.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median_height = heights[heights.len() / 2];

    let y_tolerance = (median_height * 0.4).max(2.0);
    let space_threshold = (median_height * 0.3).max(3.0);

    (y_tolerance, space_threshold)
}

/// Group characters into lines, then split lines into style runs.
fn fragments_from_chars(page_num: u32, chars: Vec<CharInfo>) -> Vec<TextFragment> {
    if chars.is_empty() {
        return Vec::new();
    }

    let (y_tolerance, space_threshold) = calculate_thresholds(&chars);

    // Sort by Y descending (top to bottom in PDF coordinates), then X ascending
    let mut sorted = chars;
    sorted.sort_by(|a, b| {
        let y_cmp = b.top.partial_cmp(&a.top).unwrap_or(std::cmp::Ordering::Equal);
        if y_cmp == std::cmp::Ordering::Equal {
            a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal)
        } else {
            y_cmp
        }
    });

    // Group into lines by Y proximity
    let mut lines: Vec<Vec<CharInfo>> = Vec::new();
    let mut current: Vec<CharInfo> = Vec::new();
    let mut current_y: Option<f32> = None;

    for ch in sorted {
        match current_y {
            Some(y) if (y - ch.top).abs() <= y_tolerance => current.push(ch),
            _ => {
                if !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
                current_y = Some(ch.top);
                current.push(ch);
            }
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }

    let mut fragments = Vec::new();

    for (line_idx, mut line) in lines.into_iter().enumerate() {
        line.sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal));

        let mut run: Vec<CharInfo> = Vec::new();
        for ch in line {
            let style_break = run.last().is_some_and(|prev| {
                prev.font != ch.font || (prev.font_size - ch.font_size).abs() > 0.5
            });
            if style_break {
                push_fragment(&mut fragments, page_num, line_idx as u32, &run, space_threshold);
                run.clear();
            }
            run.push(ch);
        }
        push_fragment(&mut fragments, page_num, line_idx as u32, &run, space_threshold);
    }

    // Reading-order indices are assigned after filtering empty runs
    for (i, frag) in fragments.iter_mut().enumerate() {
        frag.index = i as u32;
    }

    fragments
}

/// Build one fragment from a run of same-style characters on one line.
fn push_fragment(
    fragments: &mut Vec<TextFragment>,
    page_num: u32,
    line: u32,
    run: &[CharInfo],
    space_threshold: f32,
) {
    if run.is_empty() {
        return;
    }

    let mut text = String::new();
    let mut prev_right: Option<f32> = None;
    for ch in run {
        if let Some(px) = prev_right {
            if ch.x - px > space_threshold && ch.ch != ' ' && !text.ends_with(' ') {
                text.push(' ');
            }
        }
        text.push(ch.ch);
        prev_right = Some(ch.x + ch.width);
    }

    if text.trim().is_empty() {
        return;
    }

    let x0 = run.iter().map(|c| c.x).fold(f32::MAX, f32::min);
    let x1 = run.iter().map(|c| c.x + c.width).fold(f32::MIN, f32::max);
    let y0 = run.iter().map(|c| c.bottom).fold(f32::MAX, f32::min);
    let y1 = run.iter().map(|c| c.top).fold(f32::MIN, f32::max);

    let font_size = {
        let mut sizes: Vec<f32> = run.iter().map(|c| c.font_size).filter(|s| *s > 0.0).collect();
        if sizes.is_empty() {
            // Char cell height tracks the font size closely enough to serve
            // as a fallback when PDFium reports no size.
            run.iter().map(|c| c.height).fold(0.0f32, f32::max)
        } else {
            sizes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            sizes[sizes.len() / 2]
        }
    };

    fragments.push(TextFragment {
        page: page_num,
        index: 0, // assigned by the caller once the page is complete
        line,
        text: text.trim_end().to_string(),
        bounds: FragBox { x0, y0, x1, y1 },
        font: run[0].font.clone(),
        font_size,
        color: None,
    });
}
