use crate::core::config::BatchConfig;
use crate::core::types::RenderOutcome;
use futures::future::join_all;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Phase-2 engine: routes URLs to a fleet of JS-rendering HTTP endpoints.
///
/// URLs are partitioned round-robin across the endpoints; each endpoint
/// consumes its slice sequentially in sub-batches, sleeping for a cooldown
/// between consecutive sub-batches. Endpoints run independently, so the
/// worst-case fan-out is `endpoints × batch_size` URLs in flight.
pub struct RendererPool {
    client: Client,
    endpoints: Vec<String>,
    batch_size: usize,
    cooldown: Duration,
}

impl RendererPool {
    pub fn new(config: &BatchConfig) -> Self {
        let client = Client::builder()
            .timeout(config.custom_js_timeout())
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            endpoints: config.custom_js_service_endpoints.clone(),
            batch_size: config.custom_js_batch_size.max(1),
            cooldown: config.custom_js_cooldown(),
        }
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Render one round of URLs across all endpoints. Always returns one
    /// outcome per input URL; endpoint failures fail only the URLs routed to
    /// that endpoint.
    pub async fn process_urls(&self, urls: &[String]) -> Vec<RenderOutcome> {
        if urls.is_empty() {
            return Vec::new();
        }
        if self.endpoints.is_empty() {
            warn!("Renderer pool has no endpoints configured; failing {} URLs", urls.len());
            return urls
                .iter()
                .map(|u| RenderOutcome::failed(u.clone(), "no rendering endpoints configured"))
                .collect();
        }

        info!(
            "Rendering {} URLs across {} endpoints (sub-batch size {})",
            urls.len(),
            self.endpoints.len(),
            self.batch_size
        );

        // Round-robin partition keeps each endpoint's load even regardless
        // of input ordering.
        let mut slices: Vec<Vec<String>> = vec![Vec::new(); self.endpoints.len()];
        for (index, url) in urls.iter().enumerate() {
            slices[index % self.endpoints.len()].push(url.clone());
        }

        let workers = self
            .endpoints
            .iter()
            .zip(slices)
            .map(|(endpoint, slice)| self.run_endpoint(endpoint.clone(), slice));
        let mut outcomes: Vec<RenderOutcome> = join_all(workers).await.into_iter().flatten().collect();

        // Emit in the order of this round's input.
        let mut by_url: HashMap<String, Vec<RenderOutcome>> = HashMap::new();
        for outcome in outcomes.drain(..) {
            by_url.entry(outcome.url.clone()).or_default().push(outcome);
        }
        urls.iter()
            .map(|url| {
                by_url
                    .get_mut(url)
                    .and_then(|v| if v.is_empty() { None } else { Some(v.remove(0)) })
                    .unwrap_or_else(|| {
                        RenderOutcome::failed(url.clone(), "missing from endpoint response")
                    })
            })
            .collect()
    }

    /// One endpoint worker: strictly serialized sub-batches with a cooldown
    /// between them.
    async fn run_endpoint(&self, endpoint: String, slice: Vec<String>) -> Vec<RenderOutcome> {
        let mut outcomes = Vec::with_capacity(slice.len());
        let render_url = render_endpoint_url(&endpoint);

        for (batch_index, chunk) in slice.chunks(self.batch_size).enumerate() {
            if batch_index > 0 && !self.cooldown.is_zero() {
                debug!("Cooling down {}s before next sub-batch on {}", self.cooldown.as_secs(), endpoint);
                tokio::time::sleep(self.cooldown).await;
            }

            outcomes.extend(self.render_sub_batch(&render_url, chunk).await);
        }

        outcomes
    }

    async fn render_sub_batch(&self, render_url: &str, chunk: &[String]) -> Vec<RenderOutcome> {
        let payload = serde_json::json!({ "urls": chunk });

        let response = match self.client.post(render_url).json(&payload).send().await {
            Ok(response) => response,
            Err(e) => {
                let error = if e.is_timeout() {
                    "render request timed out".to_string()
                } else {
                    format!("render request failed: {}", e)
                };
                warn!("Sub-batch of {} failed on {}: {}", chunk.len(), render_url, error);
                return chunk
                    .iter()
                    .map(|u| RenderOutcome::failed(u.clone(), error.clone()))
                    .collect();
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return chunk
                    .iter()
                    .map(|u| RenderOutcome::failed(u.clone(), format!("render response read failed: {}", e)))
                    .collect();
            }
        };

        if !status.is_success() {
            let error = format!("render endpoint returned status {}", status.as_u16());
            return chunk
                .iter()
                .map(|u| RenderOutcome::failed(u.clone(), error.clone()))
                .collect();
        }

        parse_render_response(chunk, &body)
    }
}

/// Endpoint entries may be bare hostnames or full URLs; either way the
/// render route lives at `/render`.
fn render_endpoint_url(endpoint: &str) -> String {
    let base = endpoint.trim().trim_end_matches('/');
    let with_scheme = if base.contains("://") {
        base.to_string()
    } else {
        format!("https://{}", base)
    };
    if with_scheme.ends_with("/render") {
        with_scheme
    } else {
        format!("{}/render", with_scheme)
    }
}

/// Accept the three response shapes a rendering endpoint may produce: a
/// wrapper object with a `results` array, a bare array of result objects,
/// or a single object / raw HTML string when the sub-batch size is one.
fn parse_render_response(chunk: &[String], body: &str) -> Vec<RenderOutcome> {
    let parsed: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(_) => {
            // Not JSON: a raw HTML body is only unambiguous for a
            // single-URL sub-batch.
            if chunk.len() == 1 && !body.trim().is_empty() {
                return vec![RenderOutcome::success(chunk[0].clone(), body.to_string())];
            }
            return chunk
                .iter()
                .map(|u| RenderOutcome::failed(u.clone(), "unparseable render response"))
                .collect();
        }
    };

    let entries: Vec<Value> = match parsed {
        Value::Object(ref map) if map.contains_key("results") => map
            .get("results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        Value::Array(items) => items,
        other @ Value::Object(_) => vec![other],
        Value::String(html) if chunk.len() == 1 => {
            return vec![entry_outcome(&chunk[0], Some(html), None, None)];
        }
        _ => Vec::new(),
    };

    let mut by_url: HashMap<&str, RenderOutcome> = HashMap::new();
    let mut positional: Vec<RenderOutcome> = Vec::new();

    for (position, entry) in entries.iter().enumerate() {
        match entry {
            Value::Object(map) => {
                let url = map.get("url").and_then(Value::as_str);
                let html = map
                    .get("html")
                    .or_else(|| map.get("content"))
                    .and_then(Value::as_str)
                    .map(|s| s.to_string());
                let error = map.get("error").and_then(Value::as_str).map(|s| s.to_string());
                let fallback_url = chunk.get(position).map(|s| s.as_str()).unwrap_or_default();
                let target = url.unwrap_or(fallback_url);
                let outcome = entry_outcome(target, html, error, map.get("status"));
                if let Some(u) = url {
                    by_url.insert(u, outcome);
                } else {
                    positional.push(outcome);
                }
            }
            Value::String(html) => {
                let fallback_url = chunk.get(position).map(|s| s.as_str()).unwrap_or_default();
                positional.push(entry_outcome(fallback_url, Some(html.clone()), None, None));
            }
            _ => {}
        }
    }

    let mut positional = positional.into_iter();
    chunk
        .iter()
        .map(|url| {
            if let Some(outcome) = by_url.remove(url.as_str()) {
                outcome
            } else if let Some(outcome) = positional.next() {
                RenderOutcome { url: url.clone(), ..outcome }
            } else {
                RenderOutcome::failed(url.clone(), "missing from endpoint response")
            }
        })
        .collect()
}

fn entry_outcome(
    url: &str,
    html: Option<String>,
    error: Option<String>,
    _status: Option<&Value>,
) -> RenderOutcome {
    match html {
        Some(html) if !html.is_empty() && error.is_none() => RenderOutcome::success(url, html),
        _ => RenderOutcome::failed(url, error.unwrap_or_else(|| "no HTML in response".to_string())),
    }
}
