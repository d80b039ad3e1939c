//! PDF mutation: applies located edits as annotation objects
//!
//! Replacements cover the original fragment box with a white rectangle and
//! draw the replacement text as a FreeText annotation preserving the
//! fragment's font size and color. Highlights become Highlight annotations
//! with quad points over the fragment box. The underlying page content
//! streams are never rewritten, so pages without edits are untouched and an
//! empty edit list returns the input bytes verbatim.

use crate::error::{Error, Result};
use crate::locator::{FragmentRef, LocatedEdit};
use crate::oracle::EditRequest;
use crate::pdf::extract::{ExtractedDocument, TextFragment};
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::BTreeMap;

/// Padding around the covered fragment box, in points. Kept small: the
/// cover must stay within the fragment's own region, not bleed into
/// neighboring text.
pub const COVER_PADDING: f32 = 1.5;

/// Smallest font size the fit policy will shrink a replacement to. Below
/// this the replacement keeps the minimum size and overflows the box.
pub const MIN_REPLACEMENT_FONT_SIZE: f32 = 6.0;

/// Default highlight color (yellow).
pub const DEFAULT_HIGHLIGHT_COLOR: [f32; 3] = [1.0, 1.0, 0.0];

/// Highlight opacity.
pub const HIGHLIGHT_OPACITY: f32 = 0.4;

/// Average glyph advance as a fraction of the font size, used to estimate
/// rendered text width for the fit policy.
const AVG_GLYPH_WIDTH_RATIO: f32 = 0.5;

/// Apply located edits to PDF bytes, returning the new document.
///
/// All work happens on an in-memory copy; any failure returns an error and
/// no partially written output. Zero edits return the input unchanged.
pub fn apply_edits(
    pdf_bytes: &[u8],
    extraction: &ExtractedDocument,
    edits: &[LocatedEdit],
) -> Result<Vec<u8>> {
    if edits.is_empty() {
        return Ok(pdf_bytes.to_vec());
    }

    let mut pdf = Document::load_mem(pdf_bytes).map_err(|e| Error::Mutation {
        reason: format!("failed to parse PDF: {}", e),
    })?;

    let pages: BTreeMap<u32, ObjectId> = pdf.get_pages();

    for edit in edits {
        match &edit.request {
            EditRequest::Replace { replacement, .. } => {
                apply_replace(&mut pdf, &pages, extraction, edit, replacement)?;
            }
            EditRequest::Highlight { color, .. } => {
                apply_highlight(&mut pdf, &pages, extraction, edit, color.as_deref())?;
            }
        }
    }

    let mut output = Vec::new();
    pdf.save_to(&mut output).map_err(|e| Error::Mutation {
        reason: format!("failed to serialize PDF: {}", e),
    })?;

    Ok(output)
}

fn resolve_fragment<'a>(
    extraction: &'a ExtractedDocument,
    fragment: &FragmentRef,
) -> Result<&'a TextFragment> {
    extraction
        .fragment(fragment.page, fragment.index)
        .ok_or_else(|| Error::Mutation {
            reason: format!(
                "edit references fragment {}/{} outside the current extraction",
                fragment.page, fragment.index
            ),
        })
}

fn page_object(pages: &BTreeMap<u32, ObjectId>, page: u32) -> Result<ObjectId> {
    pages.get(&page).copied().ok_or_else(|| Error::Mutation {
        reason: format!("page {} not present in document", page),
    })
}

/// Deterministic fit policy for replacement text: keep the original size
/// when the estimate fits the box, otherwise shrink to fit, bounded below
/// by [`MIN_REPLACEMENT_FONT_SIZE`].
fn fitted_font_size(replacement: &str, box_width: f32, original_size: f32) -> f32 {
    let chars = replacement.chars().count().max(1) as f32;
    let estimated_width = chars * original_size * AVG_GLYPH_WIDTH_RATIO;
    if estimated_width <= box_width {
        original_size
    } else {
        (box_width / (chars * AVG_GLYPH_WIDTH_RATIO)).max(MIN_REPLACEMENT_FONT_SIZE)
    }
}

/// Map a document font family to a base-14 name usable in a DA string.
fn base14_font(font: Option<&str>) -> &'static str {
    match font {
        Some(name) => {
            let lower = name.to_lowercase();
            if lower.contains("times") {
                "TiRo"
            } else if lower.contains("courier") || lower.contains("mono") {
                "Cour"
            } else {
                "Helv"
            }
        }
        None => "Helv",
    }
}

/// Parse a hex color string (e.g. "#FF0000" or "FF0000") to RGB floats in
/// the 0-1 range. Malformed input falls back to the default highlight
/// color.
fn parse_hex_color(color: &str) -> [f32; 3] {
    let hex = color.trim_start_matches('#');
    if hex.len() >= 6 {
        let r = u8::from_str_radix(&hex[0..2], 16);
        let g = u8::from_str_radix(&hex[2..4], 16);
        let b = u8::from_str_radix(&hex[4..6], 16);
        if let (Ok(r), Ok(g), Ok(b)) = (r, g, b) {
            return [r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0];
        }
    }
    DEFAULT_HIGHLIGHT_COLOR
}

fn rect_array(x0: f32, y0: f32, x1: f32, y1: f32) -> Object {
    Object::Array(vec![
        Object::Real(x0),
        Object::Real(y0),
        Object::Real(x1),
        Object::Real(y1),
    ])
}

fn color_array(rgb: [f32; 3]) -> Object {
    Object::Array(vec![
        Object::Real(rgb[0]),
        Object::Real(rgb[1]),
        Object::Real(rgb[2]),
    ])
}

fn apply_replace(
    pdf: &mut Document,
    pages: &BTreeMap<u32, ObjectId>,
    extraction: &ExtractedDocument,
    edit: &LocatedEdit,
    replacement: &str,
) -> Result<()> {
    // White out every matched fragment first
    for fragment_ref in &edit.fragments {
        let fragment = resolve_fragment(extraction, fragment_ref)?;
        let page_id = page_object(pages, fragment_ref.page)?;
        add_cover_annotation(pdf, page_id, fragment)?;
    }

    // Replacement text goes into the first fragment's box
    let first_ref = edit.fragments.first().ok_or_else(|| Error::Mutation {
        reason: "located edit has no fragments".to_string(),
    })?;
    let fragment = resolve_fragment(extraction, first_ref)?;
    let page_id = page_object(pages, first_ref.page)?;

    let size = fitted_font_size(replacement, fragment.bounds.width(), fragment.font_size);
    let rgb = fragment
        .color
        .map(|c| [c[0] as f32 / 255.0, c[1] as f32 / 255.0, c[2] as f32 / 255.0])
        .unwrap_or([0.0, 0.0, 0.0]);
    let da = format!(
        "/{} {} Tf {} {} {} rg",
        base14_font(fragment.font.as_deref()),
        size,
        rgb[0],
        rgb[1],
        rgb[2]
    );

    let b = &fragment.bounds;
    let mut annot = Dictionary::new();
    annot.set("Type", Object::Name(b"Annot".to_vec()));
    annot.set("Subtype", Object::Name(b"FreeText".to_vec()));
    annot.set("Rect", rect_array(b.x0, b.y0, b.x1, b.y1));
    annot.set(
        "Contents",
        Object::String(replacement.as_bytes().to_vec(), lopdf::StringFormat::Literal),
    );
    annot.set(
        "DA",
        Object::String(da.into_bytes(), lopdf::StringFormat::Literal),
    );
    let mut bs = Dictionary::new();
    bs.set("W", Object::Integer(0));
    annot.set("BS", Object::Dictionary(bs));

    let annot_id = pdf.add_object(Object::Dictionary(annot));
    add_annotation_to_page(pdf, page_id, annot_id)
}

fn add_cover_annotation(pdf: &mut Document, page_id: ObjectId, fragment: &TextFragment) -> Result<()> {
    let b = &fragment.bounds;
    let mut cover = Dictionary::new();
    cover.set("Type", Object::Name(b"Annot".to_vec()));
    cover.set("Subtype", Object::Name(b"Square".to_vec()));
    cover.set(
        "Rect",
        rect_array(
            b.x0 - COVER_PADDING,
            b.y0 - COVER_PADDING,
            b.x1 + COVER_PADDING,
            b.y1 + COVER_PADDING,
        ),
    );
    // White interior and border
    cover.set("IC", color_array([1.0, 1.0, 1.0]));
    cover.set("C", color_array([1.0, 1.0, 1.0]));
    let mut bs = Dictionary::new();
    bs.set("W", Object::Integer(0));
    cover.set("BS", Object::Dictionary(bs));

    let cover_id = pdf.add_object(Object::Dictionary(cover));
    add_annotation_to_page(pdf, page_id, cover_id)
}

fn apply_highlight(
    pdf: &mut Document,
    pages: &BTreeMap<u32, ObjectId>,
    extraction: &ExtractedDocument,
    edit: &LocatedEdit,
    color: Option<&str>,
) -> Result<()> {
    let rgb = color.map(parse_hex_color).unwrap_or(DEFAULT_HIGHLIGHT_COLOR);

    for fragment_ref in &edit.fragments {
        let fragment = resolve_fragment(extraction, fragment_ref)?;
        let page_id = page_object(pages, fragment_ref.page)?;
        let b = &fragment.bounds;

        let mut annot = Dictionary::new();
        annot.set("Type", Object::Name(b"Annot".to_vec()));
        annot.set("Subtype", Object::Name(b"Highlight".to_vec()));
        annot.set("Rect", rect_array(b.x0, b.y0, b.x1, b.y1));
        // QuadPoints: upper-left, upper-right, lower-left, lower-right
        annot.set(
            "QuadPoints",
            Object::Array(vec![
                Object::Real(b.x0),
                Object::Real(b.y1),
                Object::Real(b.x1),
                Object::Real(b.y1),
                Object::Real(b.x0),
                Object::Real(b.y0),
                Object::Real(b.x1),
                Object::Real(b.y0),
            ]),
        );
        annot.set("C", color_array(rgb));
        annot.set("CA", Object::Real(HIGHLIGHT_OPACITY));

        let annot_id = pdf.add_object(Object::Dictionary(annot));
        add_annotation_to_page(pdf, page_id, annot_id)?;
    }

    Ok(())
}

fn add_annotation_to_page(pdf: &mut Document, page_id: ObjectId, annot_id: ObjectId) -> Result<()> {
    let page = pdf.get_object_mut(page_id).map_err(|e| Error::Mutation {
        reason: format!("failed to access page object: {}", e),
    })?;

    if let Object::Dictionary(ref mut page_dict) = page {
        if let Ok(Object::Array(ref mut arr)) = page_dict.get_mut(b"Annots") {
            arr.push(Object::Reference(annot_id));
        } else {
            page_dict.set("Annots", Object::Array(vec![Object::Reference(annot_id)]));
        }
    }
    Ok(())
}
