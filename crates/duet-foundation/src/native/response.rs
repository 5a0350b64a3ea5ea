//! Lenient parsing of native engine output.
//!
//! The engine writes a JSON object into a NUL-padded buffer. Missing fields
//! take defaults, numbers may arrive as strings, and `success` defaults to
//! `true`. Only output that is not a JSON object is a parse failure.

use duet_kernel::error::InferenceError;
use duet_kernel::inference::{CompletionResult, TranscriptionResult};
use duet_kernel::tool::ToolCall;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::warn;

static START_OF_TRANSCRIPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<\|startoftranscript\|[^>]*>").expect("start-of-transcript pattern is valid")
});

static SPECIAL_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<\|[^>]+\|>").expect("special token pattern is valid"));

/// Text up to the first NUL byte.
pub fn buffer_text(buffer: &[u8]) -> String {
    let end = buffer.iter().position(|b| *b == 0).unwrap_or(buffer.len());
    String::from_utf8_lossy(&buffer[..end]).into_owned()
}

/// Strip `<|...|>` markers from a transcript and trim it.
pub fn clean_transcript(text: &str) -> String {
    let text = START_OF_TRANSCRIPT.replace_all(text, "");
    SPECIAL_TOKEN.replace_all(&text, "").trim().to_string()
}

fn parse_object(raw: &str) -> Result<Map<String, Value>, InferenceError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(InferenceError::parse(
            "native",
            format!("expected an object, got {other}"),
            raw,
        )),
        Err(e) => Err(InferenceError::parse("native", e, raw)),
    }
}

fn bool_field(map: &Map<String, Value>, key: &str) -> Option<bool> {
    match map.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn f64_field(map: &Map<String, Value>, key: &str) -> f64 {
    match map.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn u32_field(map: &Map<String, Value>, key: &str) -> u32 {
    match map.get(key) {
        Some(Value::Number(n)) => n.as_u64().and_then(|v| u32::try_from(v).ok()).unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn text_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn tool_calls(value: Option<&Value>) -> Vec<ToolCall> {
    let Some(Value::Array(calls)) = value else {
        return Vec::new();
    };
    calls
        .iter()
        .filter_map(|call| {
            let name = call.get("name")?.as_str()?.to_string();
            let arguments = match call.get("arguments") {
                Some(Value::Object(args)) => args.clone().into_iter().collect(),
                Some(Value::String(encoded)) => {
                    serde_json::from_str::<HashMap<String, Value>>(encoded).unwrap_or_else(|e| {
                        warn!(tool = %name, error = %e, "unparseable tool arguments");
                        HashMap::new()
                    })
                }
                _ => HashMap::new(),
            };
            Some(ToolCall { name, arguments })
        })
        .collect()
}

pub fn parse_completion(raw: &str) -> Result<CompletionResult, InferenceError> {
    let map = parse_object(raw)?;
    Ok(CompletionResult {
        success: bool_field(&map, "success").unwrap_or(true),
        response: Some(text_field(&map, "response").unwrap_or_else(|| raw.to_string())),
        time_to_first_token_ms: f64_field(&map, "time_to_first_token_ms"),
        total_time_ms: f64_field(&map, "total_time_ms"),
        tokens_per_second: f64_field(&map, "tokens_per_second"),
        prefill_tokens: u32_field(&map, "prefill_tokens"),
        decode_tokens: u32_field(&map, "decode_tokens"),
        total_tokens: u32_field(&map, "total_tokens"),
        tool_calls: tool_calls(map.get("function_calls")),
        served_by: None,
    })
}

pub fn parse_transcription(raw: &str) -> Result<TranscriptionResult, InferenceError> {
    let map = parse_object(raw)?;
    let text = text_field(&map, "text")
        .or_else(|| text_field(&map, "response"))
        .unwrap_or_else(|| raw.to_string());
    Ok(TranscriptionResult {
        success: bool_field(&map, "success").unwrap_or(true),
        text: Some(clean_transcript(&text)),
        time_to_first_token_ms: f64_field(&map, "time_to_first_token_ms"),
        total_time_ms: f64_field(&map, "total_time_ms"),
        tokens_per_second: f64_field(&map, "tokens_per_second"),
        error_message: None,
        served_by: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_completion() {
        let raw = r#"{
            "success": true,
            "response": "Hi there",
            "time_to_first_token_ms": 12.5,
            "total_time_ms": 100,
            "tokens_per_second": "40.5",
            "prefill_tokens": 3,
            "decode_tokens": "4",
            "total_tokens": 7,
            "function_calls": [
                {"name": "toggle_lights", "arguments": {"on": true}},
                {"name": "get_weather", "arguments": "{\"city\":\"Oslo\"}"},
                {"arguments": {}}
            ]
        }"#;
        let result = parse_completion(raw).unwrap();
        assert!(result.success);
        assert_eq!(result.response.as_deref(), Some("Hi there"));
        assert_eq!(result.time_to_first_token_ms, 12.5);
        assert_eq!(result.tokens_per_second, 40.5);
        assert_eq!(result.decode_tokens, 4);
        assert_eq!(result.total_tokens, 7);
        assert_eq!(result.tool_calls.len(), 2);
        assert_eq!(result.tool_calls[0].arguments["on"], Value::Bool(true));
        assert_eq!(result.tool_calls[1].arguments["city"], "Oslo");
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let raw = r#"{"total_tokens": 1}"#;
        let result = parse_completion(raw).unwrap();
        assert!(result.success);
        assert_eq!(result.response.as_deref(), Some(raw));
        assert_eq!(result.total_time_ms, 0.0);
        assert!(result.tool_calls.is_empty());
    }

    #[test]
    fn test_non_object_is_parse_error() {
        let err = parse_completion("garbage").unwrap_err();
        match err {
            InferenceError::Parse { raw, .. } => assert_eq!(raw, "garbage"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_buffer_text_stops_at_nul() {
        let mut buffer = b"{\"a\":1}".to_vec();
        buffer.resize(32, 0);
        assert_eq!(buffer_text(&buffer), "{\"a\":1}");
    }

    #[test]
    fn test_transcription_cleanup() {
        let raw = r#"{"success": "true", "response": "<|startoftranscript|><|en|> Hello world.<|endoftext|>"}"#;
        let result = parse_transcription(raw).unwrap();
        assert_eq!(result.text.as_deref(), Some("Hello world."));
    }

    #[test]
    fn test_transcription_prefers_text_field() {
        let raw = r#"{"text": " from text ", "response": "from response"}"#;
        let result = parse_transcription(raw).unwrap();
        assert_eq!(result.text.as_deref(), Some("from text"));
    }
}
