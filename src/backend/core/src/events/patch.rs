//! Text patches between serialized content snapshots.
//!
//! Patches are unified diffs over the canonical content text (pretty JSON with
//! a trailing newline). The empty string is the no-op patch. Everything here is
//! a pure function; nothing is shared between calls.

use crate::error::{PdfgenError, Result};

use super::event::TemplateContent;

/// Produce a patch turning `old` into `new`. Equal inputs give the empty patch.
pub fn diff(old: &str, new: &str) -> String {
    if old == new {
        return String::new();
    }
    diffy::create_patch(old, new).to_string()
}

/// Apply a patch produced by [`diff`] to `old`.
///
/// Context lines are matched at or near each hunk's recorded position, so a
/// hunk still applies when `old` has gained or lost lines ahead of it. Fails
/// with `CorruptPatch` when the patch is malformed or its context is found
/// nowhere in `old`. Stream versions, not patch context, pin the base text.
pub fn apply(old: &str, patch: &str) -> Result<String> {
    if patch.is_empty() {
        return Ok(old.to_string());
    }
    let parsed = diffy::Patch::from_str(patch)
        .map_err(|e| PdfgenError::corrupt_patch(format!("malformed patch: {}", e)))?;
    diffy::apply(old, &parsed)
        .map_err(|e| PdfgenError::corrupt_patch(format!("patch does not apply: {}", e)))
}

/// Canonical text form of template content.
pub fn serialize_content(content: &TemplateContent) -> Result<String> {
    let mut text = serde_json::to_string_pretty(content)?;
    text.push('\n');
    Ok(text)
}

/// Parse canonical text back into content; `DecodeError` if it is not content.
pub fn deserialize_content(text: &str) -> Result<TemplateContent> {
    serde_json::from_str(text)
        .map_err(|e| PdfgenError::decode(format!("patched content is not valid: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::events::event::TemplateGrid;
    use serde_json::json;

    fn content(components: Vec<serde_json::Value>) -> TemplateContent {
        TemplateContent {
            grid: TemplateGrid::default(),
            components,
            variables: vec![json!({"id": "v1", "name": "Customer", "path": "CustomerName", "type": "string"})],
        }
    }

    fn round_trip(a: &TemplateContent, b: &TemplateContent) {
        let old = serialize_content(a).unwrap();
        let new = serialize_content(b).unwrap();
        let patch = diff(&old, &new);
        assert_eq!(apply(&old, &patch).unwrap(), new);
    }

    #[test]
    fn test_round_trip_small_change() {
        let a = content(vec![json!({"id": "c1", "type": "text", "props": {"text": "Hello"}})]);
        let b = content(vec![json!({"id": "c1", "type": "text", "props": {"text": "Hello, world"}})]);
        round_trip(&a, &b);
    }

    #[test]
    fn test_round_trip_identical_is_noop() {
        let a = content(vec![json!({"id": "c1"})]);
        let text = serialize_content(&a).unwrap();
        let patch = diff(&text, &text);
        assert!(patch.is_empty());
        assert_eq!(apply(&text, &patch).unwrap(), text);
        round_trip(&a, &a);
    }

    #[test]
    fn test_round_trip_disjoint() {
        let a = TemplateContent::default();
        let b = TemplateContent {
            grid: TemplateGrid { columns: 6, gap: 4 },
            components: vec![json!({"id": "x", "type": "image"}), json!({"id": "y", "type": "table"})],
            variables: vec![],
        };
        round_trip(&a, &b);
        round_trip(&b, &a);
    }

    #[test]
    fn test_round_trip_raw_text() {
        for (old, new) in [("", "one\ntwo\n"), ("one\ntwo\n", ""), ("no newline", "still no newline"), ("a\nb\nc\n", "a\nc\n")] {
            let patch = diff(old, new);
            assert_eq!(apply(old, &patch).unwrap(), new, "old={:?} new={:?}", old, new);
        }
    }

    #[test]
    fn test_diff_is_deterministic() {
        let a = serialize_content(&content(vec![])).unwrap();
        let b = serialize_content(&content(vec![json!({"id": "c9"})])).unwrap();
        assert_eq!(diff(&a, &b), diff(&a, &b));
    }

    #[test]
    fn test_apply_context_mismatch() {
        let a = serialize_content(&content(vec![json!({"id": "c1", "type": "text"})])).unwrap();
        let b = serialize_content(&content(vec![json!({"id": "c1", "type": "heading"})])).unwrap();
        let patch = diff(&a, &b);

        let unrelated = "something\nelse\nentirely\n";
        let err = apply(unrelated, &patch).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CorruptPatch);
    }

    #[test]
    fn test_apply_tolerates_shifted_context() {
        let patch = diff("a\nb\nc\n", "a\nB\nc\n");
        assert_eq!(apply("x\na\nb\nc\n", &patch).unwrap(), "x\na\nB\nc\n");
    }

    #[test]
    fn test_apply_malformed_patch() {
        let err = apply("anything\n", "@@ this is not a hunk header\n").unwrap_err();
        assert_eq!(err.code(), ErrorCode::CorruptPatch);
    }

    #[test]
    fn test_deserialize_rejects_non_content() {
        let err = deserialize_content("[1, 2, 3]").unwrap_err();
        assert_eq!(err.code(), ErrorCode::DecodeError);
    }
}
