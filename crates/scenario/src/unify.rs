//! Legacy-shape unification.
//!
//! Scenario documents accumulated three ways of writing response mappings
//! and two homes for api-call definitions. On load (and again on download)
//! everything is folded into one form: webhooks tagged `WEBHOOK`/`APICALL`
//! and mapping groups `{expressionType, targetType, mappings}`.

use serde_json::{json, Value};

use sc_domain::scenario::{
    ApiCallFormats, MappingGroup, MappingTarget, Scenario, Webhook, WebhookKind,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mapping-group normalization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Normalize any authored `responseMappings` value into mapping groups.
///
/// Accepted shapes:
/// - group list: `[{expressionType, targetType, mappings}]` (passed through)
/// - typed list: `[{type: "memory"|"directive", map: {KEY: path}}]`
/// - flat map: `{KEY: path}` or `{KEY: {type: "...", KEY: path}}`
pub fn normalize_mapping_groups(value: &Value) -> Vec<MappingGroup> {
    match value {
        Value::Array(items) => {
            // Already in group form?
            if items
                .first()
                .map(|v| v.get("expressionType").is_some())
                .unwrap_or(false)
            {
                return items
                    .iter()
                    .filter_map(|v| serde_json::from_value(v.clone()).ok())
                    .collect();
            }
            // Typed list: [{type, map}]
            let mut memory = MappingGroup::default();
            let mut directive = MappingGroup {
                target_type: MappingTarget::Directive,
                ..Default::default()
            };
            for item in items {
                let target = item
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("memory")
                    .to_ascii_lowercase();
                let map = match item.get("map").and_then(Value::as_object) {
                    Some(m) => m,
                    None => continue,
                };
                let group = if target == "directive" {
                    &mut directive
                } else {
                    &mut memory
                };
                for (key, path) in map {
                    if let Some(path) = path.as_str() {
                        group.mappings.insert(key.clone(), path.to_owned());
                    }
                }
            }
            groups_of(memory, directive)
        }
        Value::Object(map) => {
            let mut memory = MappingGroup::default();
            let mut directive = MappingGroup {
                target_type: MappingTarget::Directive,
                ..Default::default()
            };
            for (key, config) in map {
                match config {
                    Value::String(path) => {
                        memory.mappings.insert(key.clone(), path.clone());
                    }
                    Value::Object(inner) => {
                        let target = inner
                            .get("type")
                            .and_then(Value::as_str)
                            .unwrap_or("memory")
                            .to_ascii_lowercase();
                        // The JSONPath sits under the mapped key itself, or
                        // failing that under the first non-"type" string.
                        let path = inner
                            .get(key)
                            .and_then(Value::as_str)
                            .or_else(|| {
                                inner
                                    .iter()
                                    .find(|(k, v)| *k != "type" && v.is_string())
                                    .and_then(|(_, v)| v.as_str())
                            });
                        if let Some(path) = path {
                            let group = if target == "directive" {
                                &mut directive
                            } else {
                                &mut memory
                            };
                            group.mappings.insert(key.clone(), path.to_owned());
                        } else {
                            tracing::warn!(key = %key, "response mapping has no JSONPath, skipping");
                        }
                    }
                    _ => {
                        tracing::warn!(key = %key, "unsupported response mapping shape, skipping");
                    }
                }
            }
            groups_of(memory, directive)
        }
        _ => Vec::new(),
    }
}

fn groups_of(memory: MappingGroup, directive: MappingGroup) -> Vec<MappingGroup> {
    let mut groups = Vec::new();
    if !memory.mappings.is_empty() {
        groups.push(memory);
    }
    if !directive.mappings.is_empty() {
        groups.push(directive);
    }
    groups
}

/// Re-serialize formats so `responseMappings` is in group form.
fn normalize_formats(formats: &mut ApiCallFormats) {
    let groups = normalize_mapping_groups(&formats.response_mappings);
    formats.response_mappings = serde_json::to_value(groups).unwrap_or(json!([]));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Webhook / apicall unification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Drain legacy `apicalls[]` into `webhooks[]` (kind `APICALL`), skipping
/// entries whose name already has an api-call webhook, and normalize every
/// webhook's response mappings.
pub fn unify_webhooks(scenario: &mut Scenario) {
    let existing: Vec<String> = scenario
        .webhooks
        .iter()
        .filter(|w| w.kind == WebhookKind::ApiCall)
        .map(|w| w.name.clone())
        .collect();

    for legacy in scenario.apicalls.drain(..) {
        if existing.iter().any(|name| *name == legacy.name) {
            tracing::debug!(name = %legacy.name, "legacy apicall already unified, skipping");
            continue;
        }
        let mut formats = legacy.formats;
        normalize_formats(&mut formats);
        scenario.webhooks.push(Webhook {
            kind: WebhookKind::ApiCall,
            name: legacy.name,
            url: legacy.url,
            timeout_ms: legacy.timeout_ms.or(legacy.timeout).unwrap_or(5000),
            retry: legacy.retry,
            headers: formats.headers.clone(),
            method: Some(formats.method.clone()),
            formats: Some(formats),
        });
    }

    for webhook in &mut scenario.webhooks {
        if let Some(formats) = &mut webhook.formats {
            normalize_formats(formats);
        }
    }
}

/// Strip transient `url` fields from inline apicall configs. Applied when a
/// scenario is downloaded so endpoint addresses never leave the server.
pub fn strip_apicall_urls(scenario: &mut Scenario) {
    for plan in &mut scenario.plan {
        for state in &mut plan.dialog_states {
            for handler in &mut state.apicall_handlers {
                if let Some(apicall) = &mut handler.apicall {
                    if apicall.url.take().is_some() {
                        tracing::debug!(
                            state = %state.name,
                            handler = %handler.name,
                            "stripped inline apicall url for download"
                        );
                    }
                }
            }
        }
    }
}

/// Full download projection: unified webhooks, no inline urls.
pub fn prepare_for_download(scenario: &mut Scenario) {
    unify_webhooks(scenario);
    strip_apicall_urls(scenario);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flat_map_becomes_memory_group() {
        let groups = normalize_mapping_groups(&json!({
            "NLU_INTENT": "$.memorySlots.NLU_INTENT.value[0]"
        }));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].target_type, MappingTarget::Memory);
        assert_eq!(
            groups[0].mappings["NLU_INTENT"],
            "$.memorySlots.NLU_INTENT.value[0]"
        );
    }

    #[test]
    fn typed_list_splits_memory_and_directive() {
        let groups = normalize_mapping_groups(&json!([
            {"type": "memory", "map": {"A": "$.a"}},
            {"type": "directive", "map": {"B": "$.b"}}
        ]));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].target_type, MappingTarget::Memory);
        assert_eq!(groups[1].target_type, MappingTarget::Directive);
        assert_eq!(groups[1].mappings["B"], "$.b");
    }

    #[test]
    fn per_key_config_extracts_path() {
        let groups = normalize_mapping_groups(&json!({
            "CITY": {"type": "memory", "CITY": "$.city"},
            "NOTE": {"type": "directive", "expr": "$.note"}
        }));
        let memory = groups
            .iter()
            .find(|g| g.target_type == MappingTarget::Memory)
            .unwrap();
        let directive = groups
            .iter()
            .find(|g| g.target_type == MappingTarget::Directive)
            .unwrap();
        assert_eq!(memory.mappings["CITY"], "$.city");
        assert_eq!(directive.mappings["NOTE"], "$.note");
    }

    #[test]
    fn group_form_passes_through() {
        let groups = normalize_mapping_groups(&json!([
            {"expressionType": "JSON_PATH", "targetType": "MEMORY", "mappings": {"X": "$.x"}}
        ]));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].mappings["X"], "$.x");
    }

    #[test]
    fn legacy_apicalls_move_into_webhooks() {
        let mut scenario: Scenario = serde_json::from_value(json!({
            "plan": [],
            "webhooks": [
                {"type": "APICALL", "name": "dup", "url": "http://kept"}
            ],
            "apicalls": [
                {"name": "dup", "url": "http://dropped"},
                {"name": "fresh", "url": "http://api", "timeoutInMilliSecond": 7000,
                 "retry": 1,
                 "formats": {"method": "GET", "responseMappings": {"K": "$.k"}}}
            ]
        }))
        .unwrap();

        unify_webhooks(&mut scenario);

        assert!(scenario.apicalls.is_empty());
        assert_eq!(scenario.webhooks.len(), 2);
        let fresh = scenario.webhooks.iter().find(|w| w.name == "fresh").unwrap();
        assert_eq!(fresh.kind, WebhookKind::ApiCall);
        assert_eq!(fresh.timeout_ms, 7000);
        assert_eq!(fresh.method.as_deref(), Some("GET"));
        let formats = fresh.formats.as_ref().unwrap();
        let groups = normalize_mapping_groups(&formats.response_mappings);
        assert_eq!(groups[0].mappings["K"], "$.k");
    }

    #[test]
    fn download_strips_inline_urls() {
        let mut scenario: Scenario = serde_json::from_value(json!({
            "plan": [{"name": "Main", "dialogState": [{
                "name": "caller",
                "apicallHandlers": [{
                    "name": "call",
                    "apicall": {"url": "http://secret", "timeoutInMilliSecond": 5000, "retry": 0, "formats": {}}
                }]
            }]}]
        }))
        .unwrap();

        prepare_for_download(&mut scenario);

        let handler = &scenario.plan[0].dialog_states[0].apicall_handlers[0];
        assert!(handler.apicall.as_ref().unwrap().url.is_none());
    }
}
