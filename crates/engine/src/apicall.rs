//! API-call client.
//!
//! Api calls are templated HTTP requests: method, headers, and query
//! params from the definition's `formats`, body from the rendered
//! `requestTemplate`. Retries back off exponentially (0.1s × 2^attempt);
//! responses are projected into memory through JSONPath mapping groups,
//! with a default projection for the standard webhook envelope.

use std::time::{Duration, Instant};

use serde_json::Value;

use sc_domain::scenario::{
    ApiCallFormats, ApiCallHandler, MappingGroup, MappingTarget, Scenario, WebhookKind,
};
use sc_domain::session::Memory;
use sc_domain::trace::TraceEvent;

use sc_scenario::unify::normalize_mapping_groups;

use crate::template::{
    apply_mapping_groups, process_template, replace_template_variables, QueuedDirective,
};

/// A fully resolved api-call definition, ready to execute.
#[derive(Debug, Clone)]
pub struct ResolvedApiCall {
    pub name: String,
    pub url: String,
    pub timeout_ms: u64,
    pub retry: u32,
    pub formats: ApiCallFormats,
}

/// Resolve an `apicallHandlers` entry to its definition: unified webhooks
/// (kind `APICALL`) first, then the handler's own inline config.
pub fn resolve(scenario: &Scenario, handler: &ApiCallHandler) -> Option<ResolvedApiCall> {
    if let Some(webhook) = scenario
        .webhooks
        .iter()
        .find(|w| w.kind == WebhookKind::ApiCall && w.name == handler.name)
    {
        let mut formats = webhook.formats.clone().unwrap_or_default();
        if let Some(method) = &webhook.method {
            formats.method = method.clone();
        }
        return Some(ResolvedApiCall {
            name: webhook.name.clone(),
            url: webhook.url.clone(),
            timeout_ms: webhook.timeout_ms,
            retry: webhook.retry,
            formats,
        });
    }

    let inline = handler.apicall.as_ref()?;
    let url = inline.url.clone()?;
    Some(ResolvedApiCall {
        name: handler.name.clone(),
        url,
        timeout_ms: inline.timeout_ms,
        retry: inline.retry,
        formats: inline.formats.clone(),
    })
}

pub struct ApiCallClient {
    http: reqwest::Client,
}

impl Default for ApiCallClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiCallClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Execute the call. Returns the parsed JSON response, or `None` after
    /// the retry budget (or the turn deadline) is exhausted.
    pub async fn execute(
        &self,
        call: &ResolvedApiCall,
        memory: &mut Memory,
        deadline: Instant,
    ) -> Option<Value> {
        if call.url.is_empty() {
            tracing::warn!(name = %call.name, "api call has no url");
            return None;
        }

        let method = call.formats.method.to_uppercase();
        let query: Vec<(String, String)> = call
            .formats
            .query_params
            .iter()
            .filter(|p| !p.name.is_empty())
            .map(|p| {
                (
                    p.name.clone(),
                    replace_template_variables(&p.value, memory),
                )
            })
            .collect();

        let body = if matches!(method.as_str(), "POST" | "PUT" | "PATCH") {
            call.formats
                .request_template
                .as_ref()
                .map(|template| process_template(template, memory))
        } else {
            None
        };
        let is_json = call.formats.content_type.contains("json");

        let started = Instant::now();
        let attempts = call.retry + 1;
        let mut last_status = None;

        for attempt in 0..attempts {
            let Some(timeout) = attempt_timeout(call.timeout_ms, deadline) else {
                tracing::warn!(name = %call.name, "turn deadline reached, abandoning api call");
                break;
            };

            let method_parsed = method
                .parse::<reqwest::Method>()
                .unwrap_or(reqwest::Method::POST);
            let mut request = self
                .http
                .request(method_parsed, &call.url)
                .timeout(timeout)
                .header("Content-Type", call.formats.content_type.as_str());
            for (name, value) in &call.formats.headers {
                request = request.header(name.as_str(), replace_template_variables(value, memory));
            }
            if !query.is_empty() {
                request = request.query(&query);
            }
            if let Some(body) = &body {
                if is_json {
                    match serde_json::from_str::<Value>(body) {
                        Ok(parsed) => request = request.json(&parsed),
                        Err(_) => {
                            tracing::warn!(
                                name = %call.name,
                                "request template is not valid JSON, sending verbatim"
                            );
                            request = request.body(body.clone());
                        }
                    }
                } else {
                    request = request.body(body.clone());
                }
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    last_status = Some(status.as_u16());
                    if status.is_success() {
                        match response.json::<Value>().await {
                            Ok(parsed) => {
                                TraceEvent::ApiCallExecuted {
                                    name: call.name.clone(),
                                    url: call.url.clone(),
                                    status: last_status,
                                    attempts: attempt + 1,
                                    duration_ms: started.elapsed().as_millis() as u64,
                                }
                                .emit();
                                return Some(parsed);
                            }
                            Err(e) => {
                                tracing::warn!(
                                    name = %call.name,
                                    attempt = attempt + 1,
                                    error = %e,
                                    "api call response is not JSON"
                                );
                            }
                        }
                    } else {
                        tracing::warn!(
                            name = %call.name,
                            status = status.as_u16(),
                            attempt = attempt + 1,
                            "api call returned non-success status"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        name = %call.name,
                        attempt = attempt + 1,
                        error = %e,
                        "api call attempt failed"
                    );
                }
            }

            if attempt + 1 < attempts {
                let backoff = Duration::from_millis(100u64 << attempt.min(10));
                if Instant::now() + backoff >= deadline {
                    break;
                }
                tokio::time::sleep(backoff).await;
            }
        }

        TraceEvent::ApiCallExecuted {
            name: call.name.clone(),
            url: call.url.clone(),
            status: last_status,
            attempts,
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();
        None
    }
}

/// Project an api-call response into memory / the directive queue.
///
/// Declared mapping groups win. Without any, a response in the standard
/// webhook envelope shape gets the default projection of `NLU_INTENT`,
/// `STS_CONFIDENCE`, and `USER_TEXT_INPUT`.
pub fn apply_response(
    call: &ResolvedApiCall,
    response: &Value,
    memory: &mut Memory,
    directive_queue: &mut Vec<QueuedDirective>,
) {
    let mut groups = normalize_mapping_groups(&call.formats.response_mappings);
    if groups.is_empty() {
        if response
            .pointer("/memorySlots/NLU_INTENT/value/0")
            .is_none()
        {
            return;
        }
        tracing::debug!(name = %call.name, "no mappings declared, using standard envelope projection");
        groups = vec![MappingGroup {
            expression_type: "JSON_PATH".into(),
            target_type: MappingTarget::Memory,
            mappings: [
                ("NLU_INTENT", "$.memorySlots.NLU_INTENT.value[0]"),
                ("STS_CONFIDENCE", "$.memorySlots.STS_CONFIDENCE.value[0]"),
                ("USER_TEXT_INPUT", "$.memorySlots.USER_TEXT_INPUT.value[0]"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        }];
    }
    apply_mapping_groups(response, &groups, memory, directive_queue);
}

fn attempt_timeout(timeout_ms: u64, deadline: Instant) -> Option<Duration> {
    let remaining = deadline.checked_duration_since(Instant::now())?;
    if remaining.is_zero() {
        return None;
    }
    Some(remaining.min(Duration::from_millis(timeout_ms)))
}
