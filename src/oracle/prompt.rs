//! Prompt construction for the edit oracle
//!
//! The prompt is a snapshot of the document text with page markers, the
//! user's instruction, and a strict output-format directive so the reply can
//! be parsed deterministically.

/// Maximum number of document characters included in the snapshot. Longer
/// documents are truncated with a marker; the oracle only needs enough
/// context to quote targets exactly.
pub const MAX_SNAPSHOT_CHARS: usize = 24_000;

/// Build the full prompt for one edit request.
///
/// `pages` are `(page_number, text)` pairs as produced by the extractor.
pub fn build_edit_prompt(pages: &[(u32, String)], instruction: &str) -> String {
    let mut snapshot = String::new();
    for (page, text) in pages {
        snapshot.push_str(&format!("--- Page {} ---\n", page));
        snapshot.push_str(text);
        snapshot.push_str("\n\n");
    }

    if snapshot.len() > MAX_SNAPSHOT_CHARS {
        let mut cut = MAX_SNAPSHOT_CHARS;
        while !snapshot.is_char_boundary(cut) {
            cut -= 1;
        }
        snapshot.truncate(cut);
        snapshot.push_str("\n[... document truncated ...]\n");
    }

    format!(
        "You are an expert document editor. Analyze the document below and \
         produce the edits that satisfy the user's request.\n\
         \n\
         Document:\n\
         {snapshot}\
         \n\
         Request: {instruction}\n\
         \n\
         Rules:\n\
         1. For replacements, quote the target EXACTLY as it appears in the \
         document, including punctuation and capitalization.\n\
         2. For highlighting, quote the sentence or phrase to highlight \
         exactly as it appears.\n\
         3. Only propose edits for text that actually exists in the document.\n\
         4. If the request applies to a single occurrence, set \"scope\" to \
         \"first\"; otherwise omit it.\n\
         \n\
         Respond ONLY with valid JSON, no markdown fences, no text before or \
         after, in exactly this structure:\n\
         {{\n\
           \"edits\": [\n\
             {{\"kind\": \"replace\", \"target\": \"exact text from the document\", \
         \"replacement\": \"new text\"}},\n\
             {{\"kind\": \"highlight\", \"target\": \"exact text from the document\", \
         \"color\": \"#FFFF00\"}}\n\
           ],\n\
           \"summary\": \"one-sentence summary of the changes\"\n\
         }}\n"
    )
}
