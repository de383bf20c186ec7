//! Usage parser (C3).
//!
//! Pulls token counts out of one JSON blob at a time — a full non-streaming
//! response body, or a single decoded SSE `data:` payload — and folds them
//! additively into a [`crate::pricing::UsageSnapshot`]. Never fails: a
//! malformed or partial blob simply contributes nothing.

use crate::config::Platform;
use crate::pricing::UsageSnapshot;
use serde_json::Value;

fn as_i64(v: &Value) -> i64 {
    v.as_i64().unwrap_or(0)
}

fn get_path<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut cur = root;
    for key in path {
        cur = cur.get(key)?;
    }
    Some(cur)
}

fn accumulate_claude(root: &Value, out: &mut UsageSnapshot) {
    for base in [get_path(root, &["message", "usage"]), root.get("usage")] {
        let Some(usage) = base else { continue };
        out.input_tokens += usage.get("input_tokens").map(as_i64).unwrap_or(0);
        out.output_tokens += usage.get("output_tokens").map(as_i64).unwrap_or(0);
        out.cache_create_tokens += usage.get("cache_creation_input_tokens").map(as_i64).unwrap_or(0);
        out.cache_read_tokens += usage.get("cache_read_input_tokens").map(as_i64).unwrap_or(0);
    }
}

fn accumulate_codex_gemini(root: &Value, out: &mut UsageSnapshot) {
    let usage = get_path(root, &["response", "usage"]).or_else(|| root.get("usage"));
    let Some(usage) = usage else { return };

    let input = usage
        .get("input_tokens")
        .or_else(|| usage.get("prompt_tokens"))
        .map(as_i64)
        .unwrap_or(0);
    let output = usage
        .get("output_tokens")
        .or_else(|| usage.get("completion_tokens"))
        .map(as_i64)
        .unwrap_or(0);
    out.input_tokens += input;
    out.output_tokens += output;

    if let Some(cached) = get_path(usage, &["input_tokens_details", "cached_tokens"]) {
        out.cache_read_tokens += as_i64(cached);
    }
    if let Some(reasoning) = get_path(usage, &["output_tokens_details", "reasoning_tokens"]) {
        out.reasoning_tokens += as_i64(reasoning);
    }
}

/// Parses one JSON blob for `platform`'s wire dialect and folds any token
/// counts found into `out`. A blob that fails to parse as JSON, or that
/// carries no usage object, leaves `out` unchanged.
pub fn accumulate_json(platform: Platform, blob: &str, out: &mut UsageSnapshot) {
    let root: Value = match serde_json::from_str(blob) {
        Ok(v) => v,
        Err(_) => return,
    };
    match platform {
        Platform::Claude => accumulate_claude(&root, out),
        Platform::Codex | Platform::Gemini => accumulate_codex_gemini(&root, out),
    }
}

/// Parses one full, already-buffered response body, dispatching on whether
/// it is SSE-framed. An `event-stream` body is scanned `data:` line by line
/// the same way the live relay would; anything else is treated as a single
/// whole-body JSON blob. Used for responses the dispatcher reads in full
/// rather than streaming straight through to the client.
pub fn parse_response_body(platform: Platform, content_type: &str, body: &[u8]) -> UsageSnapshot {
    if content_type.to_ascii_lowercase().contains("text/event-stream") {
        let mut tee = crate::stream::UsageTee::new(platform);
        tee.observe(body);
        tee.finish()
    } else {
        let mut usage = UsageSnapshot::default();
        let text = String::from_utf8_lossy(body);
        accumulate_json(platform, &text, &mut usage);
        usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_streaming_message_start_shape() {
        let blob = r#"{"type":"message_start","message":{"usage":{"input_tokens":10,"output_tokens":0,"cache_creation_input_tokens":5,"cache_read_input_tokens":2}}}"#;
        let mut out = UsageSnapshot::default();
        accumulate_json(Platform::Claude, blob, &mut out);
        assert_eq!(out.input_tokens, 10);
        assert_eq!(out.cache_create_tokens, 5);
        assert_eq!(out.cache_read_tokens, 2);
    }

    #[test]
    fn claude_non_streaming_root_usage_shape() {
        let blob = r#"{"id":"msg_1","usage":{"input_tokens":3,"output_tokens":7}}"#;
        let mut out = UsageSnapshot::default();
        accumulate_json(Platform::Claude, blob, &mut out);
        assert_eq!(out.input_tokens, 3);
        assert_eq!(out.output_tokens, 7);
    }

    #[test]
    fn claude_accumulates_additively_across_chunks() {
        let mut out = UsageSnapshot::default();
        accumulate_json(Platform::Claude, r#"{"usage":{"output_tokens":1}}"#, &mut out);
        accumulate_json(Platform::Claude, r#"{"usage":{"output_tokens":1}}"#, &mut out);
        accumulate_json(Platform::Claude, r#"{"usage":{"output_tokens":1}}"#, &mut out);
        assert_eq!(out.output_tokens, 3);
    }

    #[test]
    fn codex_dialect_with_response_wrapper_and_cached_and_reasoning() {
        let blob = r#"{"response":{"usage":{"input_tokens":100,"output_tokens":20,
            "input_tokens_details":{"cached_tokens":30},
            "output_tokens_details":{"reasoning_tokens":5}}}}"#;
        let mut out = UsageSnapshot::default();
        accumulate_json(Platform::Codex, blob, &mut out);
        assert_eq!(out.input_tokens, 100);
        assert_eq!(out.output_tokens, 20);
        assert_eq!(out.cache_read_tokens, 30);
        assert_eq!(out.reasoning_tokens, 5);
    }

    #[test]
    fn gemini_dialect_falls_back_to_prompt_completion_names() {
        let blob = r#"{"usage":{"prompt_tokens":50,"completion_tokens":12}}"#;
        let mut out = UsageSnapshot::default();
        accumulate_json(Platform::Gemini, blob, &mut out);
        assert_eq!(out.input_tokens, 50);
        assert_eq!(out.output_tokens, 12);
    }

    #[test]
    fn malformed_json_is_silently_ignored() {
        let mut out = UsageSnapshot::default();
        accumulate_json(Platform::Claude, "not json at all {{{", &mut out);
        assert_eq!(out.input_tokens, 0);
        assert_eq!(out.output_tokens, 0);
    }

    #[test]
    fn blob_with_no_usage_object_is_a_no_op() {
        let mut out = UsageSnapshot::default();
        accumulate_json(Platform::Claude, r#"{"type":"ping"}"#, &mut out);
        assert_eq!(out.input_tokens, 0);
        accumulate_json(Platform::Codex, r#"{"type":"response.created"}"#, &mut out);
        assert_eq!(out.input_tokens, 0);
    }

    #[test]
    fn parse_response_body_handles_plain_whole_body_json() {
        let body = br#"{"id":"msg_1","usage":{"input_tokens":4,"output_tokens":6}}"#;
        let usage = parse_response_body(Platform::Claude, "application/json", body);
        assert_eq!(usage.input_tokens, 4);
        assert_eq!(usage.output_tokens, 6);
    }

    #[test]
    fn parse_response_body_handles_buffered_sse() {
        let body = b"data: {\"usage\":{\"output_tokens\":9}}\n\ndata: [DONE]\n";
        let usage = parse_response_body(Platform::Codex, "text/event-stream; charset=utf-8", body);
        assert_eq!(usage.output_tokens, 9);
    }
}
