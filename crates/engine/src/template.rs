//! Template substitution, response-value normalization, and JSONPath
//! response mapping.
//!
//! Request templates, headers, and query params accept four placeholder
//! forms: `{$key}` / `{{key}}` (memory lookups, empty when missing),
//! `{{memorySlots.KEY.value.[i]}}` (indexed list lookup), and
//! `{{USER_TEXT_INPUT.i}}` / `{{USER_TEXT_INPUT.[i]}}`. `sessionId` and
//! `requestId` resolve from memory; a missing `requestId` is minted and
//! stored so later placeholders in the same turn agree.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use sc_domain::scenario::{MappingGroup, MappingTarget};
use sc_domain::session::Memory;

use crate::memory::{keys, value_to_string};

static MEMORY_SLOT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{memorySlots\.([^.}]+)\.value\.\[(\d+)\]\}\}").unwrap()
});
static USER_TEXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{USER_TEXT_INPUT\.?\[?(\d+)\]?\}\}").unwrap());
static DOLLAR_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\$([^}]+)\}").unwrap());
static BRACE_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([^}]+)\}\}").unwrap());

/// A response-mapping result bound for the outbound directive list.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedDirective {
    pub key: String,
    pub value: Value,
    pub source: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Substitution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Render a request template against session memory.
///
/// Unresolved placeholders render empty, so the output is stable under
/// re-rendering. May mint and store `requestId`.
pub fn process_template(template: &str, memory: &mut Memory) -> String {
    // {{memorySlots.KEY.value.[i]}}
    let mut result = MEMORY_SLOT_RE
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            let index: usize = caps[2].parse().unwrap_or(0);
            match memory.get(key) {
                Some(Value::Array(items)) if items.len() > index => {
                    value_to_string(&items[index])
                }
                Some(value) => value_to_string(value),
                None => String::new(),
            }
        })
        .into_owned();

    // sessionId / requestId in both syntaxes.
    let session_id = memory
        .get(keys::SESSION_ID)
        .map(value_to_string)
        .unwrap_or_default();
    result = result.replace("{$sessionId}", &session_id);
    result = result.replace("{{sessionId}}", &session_id);

    if result.contains("{$requestId}") || result.contains("{{requestId}}") {
        let request_id = ensure_request_id(memory);
        result = result.replace("{$requestId}", &request_id);
        result = result.replace("{{requestId}}", &request_id);
    }

    // {{USER_TEXT_INPUT.i}} / {{USER_TEXT_INPUT.[i]}}
    result = USER_TEXT_RE
        .replace_all(&result, |caps: &regex::Captures<'_>| {
            let index: usize = caps[1].parse().unwrap_or(0);
            match memory.get(keys::USER_TEXT_INPUT) {
                Some(Value::Array(items)) if items.len() > index => {
                    value_to_string(&items[index])
                }
                _ => String::new(),
            }
        })
        .into_owned();

    // {$key}
    result = DOLLAR_VAR_RE
        .replace_all(&result, |caps: &regex::Captures<'_>| {
            memory.get(&caps[1]).map(value_to_string).unwrap_or_default()
        })
        .into_owned();

    // {{key}} for anything the dedicated passes above did not consume.
    result = BRACE_VAR_RE
        .replace_all(&result, |caps: &regex::Captures<'_>| {
            memory.get(&caps[1]).map(value_to_string).unwrap_or_default()
        })
        .into_owned();

    result
}

/// Lightweight substitution for headers and query params: `{$var}` and
/// `{{var}}` only, missing keys render empty.
pub fn replace_template_variables(template: &str, memory: &Memory) -> String {
    let result = DOLLAR_VAR_RE
        .replace_all(template, |caps: &regex::Captures<'_>| {
            memory.get(&caps[1]).map(value_to_string).unwrap_or_default()
        })
        .into_owned();
    BRACE_VAR_RE
        .replace_all(&result, |caps: &regex::Captures<'_>| {
            memory.get(&caps[1]).map(value_to_string).unwrap_or_default()
        })
        .into_owned()
}

fn ensure_request_id(memory: &mut Memory) -> String {
    let existing = memory
        .get(keys::REQUEST_ID)
        .map(value_to_string)
        .unwrap_or_default();
    if !existing.is_empty() {
        return existing;
    }
    let minted = format!("req-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
    tracing::debug!(request_id = %minted, "minted requestId for template");
    memory.insert(keys::REQUEST_ID.into(), Value::String(minted.clone()));
    minted
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response-value normalization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Unwrap the usual response envelopes: `{value: v}` and single-key
/// objects become `v`, single-element arrays become the element;
/// primitives and anything larger pass through.
pub fn normalize_response_value(value: &Value) -> Value {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Object(map) => {
            if let Some(inner) = map.get("value") {
                normalize_response_value(inner)
            } else if map.len() == 1 {
                normalize_response_value(map.values().next().unwrap())
            } else {
                value.clone()
            }
        }
        Value::Array(items) => {
            if items.len() == 1 {
                normalize_response_value(&items[0])
            } else {
                value.clone()
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JSONPath extraction & mapping groups
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Extract the first JSONPath match from `data`, normalized.
pub fn extract_jsonpath(data: &Value, path: &str) -> Option<Value> {
    match jsonpath_lib::select(data, path) {
        Ok(matches) => matches.first().map(|v| normalize_response_value(v)),
        Err(e) => {
            tracing::warn!(path = %path, error = ?e, "invalid JSONPath expression");
            None
        }
    }
}

/// Apply mapping groups to a response. MEMORY mappings write into session
/// memory; DIRECTIVE mappings append to the turn's directive queue. A
/// failing entry is logged and skipped — it never aborts the turn.
pub fn apply_mapping_groups(
    response: &Value,
    groups: &[MappingGroup],
    memory: &mut Memory,
    directive_queue: &mut Vec<QueuedDirective>,
) {
    for group in groups {
        for (name, path) in &group.mappings {
            let Some(value) = extract_jsonpath(response, path) else {
                tracing::warn!(key = %name, path = %path, "no JSONPath match in response");
                continue;
            };
            match group.target_type {
                MappingTarget::Memory => {
                    tracing::debug!(key = %name, path = %path, "response mapped to memory");
                    memory.insert(name.clone(), value);
                }
                MappingTarget::Directive => {
                    directive_queue.push(QueuedDirective {
                        key: name.clone(),
                        value,
                        source: "apicall_response_mapping".into(),
                    });
                }
            }
        }
    }
}
