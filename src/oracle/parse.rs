//! Defensive parsing of oracle replies
//!
//! The oracle is asked for strict JSON but real replies arrive wrapped in
//! markdown fences, with stray prose, or with individually malformed
//! entries. Anything that does not match the expected shape is dropped with
//! a warning rather than failing the whole batch; only a reply with no
//! usable JSON at all is an error.

use crate::error::{Error, Result};
use crate::oracle::{EditRequest, EditScope};
use regex::Regex;

/// The oracle's reply, decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEdits {
    pub edits: Vec<EditRequest>,
    pub summary: Option<String>,
}

/// Strip markdown code fences the model sometimes wraps its JSON in.
fn strip_code_fences(text: &str) -> &str {
    let mut s = text.trim();
    if let Some(rest) = s.strip_prefix("```json") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim()
}

/// Parse an oracle reply into edit requests.
///
/// Entries that fail to decode or carry empty targets are dropped with a
/// warning. Fails with [`Error::Oracle`] only when the reply contains no
/// JSON object or no `edits` array.
pub fn parse_edit_reply(text: &str) -> Result<ParsedEdits> {
    let cleaned = strip_code_fences(text);

    let value: serde_json::Value =
        serde_json::from_str(cleaned).map_err(|e| Error::Oracle {
            reason: format!("reply is not valid JSON: {}", e),
        })?;

    let entries = value
        .get("edits")
        .and_then(|e| e.as_array())
        .ok_or_else(|| Error::Oracle {
            reason: "reply has no \"edits\" array".to_string(),
        })?;

    let mut edits = Vec::with_capacity(entries.len());
    for entry in entries {
        match serde_json::from_value::<EditRequest>(entry.clone()) {
            Ok(edit) if edit.target().trim().is_empty() => {
                tracing::warn!("dropping edit with empty target");
            }
            Ok(EditRequest::Replace { replacement, .. }) if replacement.trim().is_empty() => {
                tracing::warn!("dropping replace edit with empty replacement");
            }
            Ok(edit) => edits.push(edit),
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed edit entry");
            }
        }
    }

    let summary = value
        .get("summary")
        .and_then(|s| s.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());

    Ok(ParsedEdits { edits, summary })
}

/// Last-resort instruction parser, used when the oracle reply cannot be
/// decoded at all. Recognizes `change 'X' to 'Y'` and `highlight 'X'`
/// phrasings with single or double quotes.
pub fn fallback_edits(instruction: &str) -> Vec<EditRequest> {
    let mut edits = Vec::new();

    let replace_re =
        Regex::new(r#"(?i)change\s+['"]([^'"]+)['"]\s+to\s+['"]([^'"]+)['"]"#).expect("valid regex");
    for cap in replace_re.captures_iter(instruction) {
        edits.push(EditRequest::Replace {
            target: cap[1].to_string(),
            replacement: cap[2].to_string(),
            scope: EditScope::All,
        });
    }

    let highlight_re =
        Regex::new(r#"(?i)highlight\s+['"]([^'"]+)['"]"#).expect("valid regex");
    for cap in highlight_re.captures_iter(instruction) {
        edits.push(EditRequest::Highlight {
            target: cap[1].to_string(),
            color: None,
        });
    }

    edits
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_plain_json_reply() {
        let reply = r##"{
            "edits": [
                {"kind": "replace", "target": "Chapter 2: Background",
                 "replacement": "Chapter 2: Fundamentals"},
                {"kind": "highlight", "target": "quarterly revenue grew",
                 "color": "#FFFF00"}
            ],
            "summary": "Renamed the chapter and highlighted one sentence"
        }"##;

        let parsed = parse_edit_reply(reply).unwrap();
        assert_eq!(parsed.edits.len(), 2);
        assert_eq!(
            parsed.edits[0],
            EditRequest::Replace {
                target: "Chapter 2: Background".to_string(),
                replacement: "Chapter 2: Fundamentals".to_string(),
                scope: EditScope::All,
            }
        );
        assert_eq!(
            parsed.summary.as_deref(),
            Some("Renamed the chapter and highlighted one sentence")
        );
    }

    #[test]
    fn test_parse_strips_markdown_fences() {
        let reply = "```json\n{\"edits\": [{\"kind\": \"highlight\", \"target\": \"cash flow\"}]}\n```";
        let parsed = parse_edit_reply(reply).unwrap();
        assert_eq!(parsed.edits.len(), 1);
    }

    #[test]
    fn test_malformed_entries_are_dropped_not_fatal() {
        let reply = r#"{
            "edits": [
                {"kind": "replace", "target": "good", "replacement": "better"},
                {"kind": "teleport", "target": "nowhere"},
                {"kind": "replace", "target": "", "replacement": "x"},
                {"kind": "replace", "target": "orphan"}
            ]
        }"#;

        let parsed = parse_edit_reply(reply).unwrap();
        assert_eq!(parsed.edits.len(), 1);
        assert_eq!(parsed.edits[0].target(), "good");
    }

    #[test]
    fn test_non_json_reply_is_oracle_error() {
        let result = parse_edit_reply("I'm sorry, I cannot help with that.");
        assert!(matches!(result, Err(Error::Oracle { .. })));
    }

    #[test]
    fn test_missing_edits_array_is_oracle_error() {
        let result = parse_edit_reply(r#"{"modifications": []}"#);
        assert!(matches!(result, Err(Error::Oracle { .. })));
    }

    #[test]
    fn test_scope_first_round_trips() {
        let reply = r#"{"edits": [{"kind": "replace", "target": "a", "replacement": "b", "scope": "first"}]}"#;
        let parsed = parse_edit_reply(reply).unwrap();
        assert_eq!(parsed.edits[0].scope(), EditScope::First);
    }

    #[test]
    fn test_fallback_parses_change_pattern() {
        let edits = fallback_edits("please change 'Chapter 2' to 'Chapter II' everywhere");
        assert_eq!(
            edits,
            vec![EditRequest::Replace {
                target: "Chapter 2".to_string(),
                replacement: "Chapter II".to_string(),
                scope: EditScope::All,
            }]
        );
    }

    #[test]
    fn test_fallback_parses_highlight_pattern() {
        let edits = fallback_edits(r#"highlight "net income" in the report"#);
        assert_eq!(
            edits,
            vec![EditRequest::Highlight {
                target: "net income".to_string(),
                color: None,
            }]
        );
    }

    #[test]
    fn test_fallback_yields_nothing_for_free_prose() {
        assert!(fallback_edits("make it sound friendlier").is_empty());
    }
}
