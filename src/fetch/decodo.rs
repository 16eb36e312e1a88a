use crate::core::config::BatchConfig;
use crate::core::error::FetchError;
use crate::core::types::RenderOutcome;
use futures::future::join_all;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Backoff multiplier while a task is simply not ready yet.
const BACKOFF_NOT_READY: f64 = 1.2;
/// Backoff multiplier after an error response.
const BACKOFF_ERROR: f64 = 1.5;
/// Poll delay ceiling in seconds.
const BACKOFF_CAP_SECS: f64 = 10.0;
/// Consecutive-error budget per task; the task fails once it is exceeded.
const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Phase-3 engine: client for the asynchronous batch scraping API.
///
/// One submit call yields a task id per URL; each task is then polled under
/// a global concurrency cap until it reaches a terminal state.
pub struct DecodoClient {
    client: Client,
    /// Pre-encoded Basic token. Opaque; never logged.
    auth_token: String,
    api_endpoint: String,
    results_endpoint: String,
    timeout: Duration,
    max_concurrent: usize,
    poll_interval_secs: u64,
    max_poll_attempts: u32,
    target: String,
    device_type: String,
    geo: Option<String>,
    locale: Option<String>,
}

impl DecodoClient {
    /// Build the client from config. Fails eagerly with [`FetchError::Auth`]
    /// when no credential form is configured.
    pub fn from_config(config: &BatchConfig) -> Result<Self, FetchError> {
        let auth_token = config
            .decodo_auth_token
            .clone()
            .ok_or_else(|| FetchError::Auth("Decodo credentials not configured".to_string()))?;

        let client = Client::builder()
            .timeout(config.decodo_timeout())
            .build()
            .expect("Failed to create HTTP client");

        Ok(Self {
            client,
            auth_token,
            api_endpoint: config.decodo_api_endpoint.clone(),
            results_endpoint: config.decodo_results_endpoint.clone(),
            timeout: config.decodo_timeout(),
            max_concurrent: config.decodo_max_concurrent.max(1),
            poll_interval_secs: config.decodo_poll_interval_secs.max(1),
            max_poll_attempts: config.decodo_max_poll_attempts.max(1),
            target: config.decodo_target.clone(),
            device_type: config.decodo_device_type.clone(),
            geo: config.decodo_geo.clone(),
            locale: config.decodo_locale.clone(),
        })
    }

    /// Submit the batch, poll every assigned task, and return one outcome
    /// per input URL, in input order.
    pub async fn process_urls(&self, urls: &[String]) -> Vec<RenderOutcome> {
        if urls.is_empty() {
            return Vec::new();
        }

        info!(
            "Submitting {} URLs to scraping provider (max {} concurrent polls)",
            urls.len(),
            self.max_concurrent
        );

        let entries = match self.submit_batch(urls).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Provider batch submit failed: {}", e);
                let message = e.to_string();
                return urls
                    .iter()
                    .map(|u| RenderOutcome::failed(u.clone(), message.clone()))
                    .collect();
            }
        };

        if entries.is_empty() {
            warn!("Provider returned no task IDs for {} URLs", urls.len());
            return urls
                .iter()
                .map(|u| RenderOutcome::failed(u.clone(), "no task IDs received"))
                .collect();
        }

        // Pair task ids with URLs: explicit url fields win, the rest are
        // assigned positionally to still-unmapped URLs.
        let mut task_for_url: HashMap<&str, String> = HashMap::new();
        let mut unlabeled: Vec<String> = Vec::new();
        for (task_id, entry_url) in &entries {
            match entry_url {
                Some(u) => {
                    task_for_url.entry(u.as_str()).or_insert_with(|| task_id.clone());
                }
                None => unlabeled.push(task_id.clone()),
            }
        }
        let mut unlabeled = unlabeled.into_iter();
        let assignments: Vec<(String, Option<String>)> = urls
            .iter()
            .map(|url| {
                let task = task_for_url
                    .get(url.as_str())
                    .cloned()
                    .or_else(|| unlabeled.next());
                (url.clone(), task)
            })
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let polls = assignments.into_iter().map(|(url, task)| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let Some(task_id) = task else {
                    return RenderOutcome::failed(url, "no task ID received for URL");
                };
                let Ok(_permit) = semaphore.acquire().await else {
                    return RenderOutcome::failed(url, "polling semaphore closed");
                };
                match self.poll_task(&task_id).await {
                    Ok(html) => RenderOutcome::success(url, html),
                    Err(e) => {
                        warn!("Provider task {} failed for {}: {}", task_id, url, e);
                        RenderOutcome::failed(url, e.to_string())
                    }
                }
            }
        });

        let outcomes = join_all(polls).await;
        let successful = outcomes
            .iter()
            .filter(|o| o.status == crate::core::types::FetchStatus::Success)
            .count();
        info!(
            "Provider phase completed: {} successful, {} failed",
            successful,
            outcomes.len() - successful
        );
        outcomes
    }

    async fn submit_batch(&self, urls: &[String]) -> Result<Vec<(String, Option<String>)>, FetchError> {
        let mut payload = serde_json::json!({
            "url": urls,
            "target": self.target,
            "render_js": true,
            "device_type": self.device_type,
        });
        if let Some(geo) = &self.geo {
            payload["geo"] = Value::String(geo.clone());
        }
        if let Some(locale) = &self.locale {
            payload["locale"] = Value::String(locale.clone());
        }

        let response = self
            .client
            .post(&self.api_endpoint)
            .header("Authorization", format!("Basic {}", self.auth_token))
            .json(&payload)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(e, self.timeout.as_secs()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Protocol(format!(
                "batch submit returned status {}",
                status.as_u16()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| FetchError::Protocol(format!("batch submit response was not JSON: {}", e)))?;

        Ok(extract_task_entries(&body))
    }

    /// Poll one task until terminal: done, failed, attempts exhausted, or
    /// the per-task deadline passes. Exponential backoff from the base poll
    /// interval, 1.2x when not ready, 1.5x on errors, capped at 10 s.
    async fn poll_task(&self, task_id: &str) -> Result<String, FetchError> {
        let poll_url = format!(
            "{}/{}/results",
            self.results_endpoint.trim_end_matches('/'),
            task_id
        );
        let started = Instant::now();
        let mut interval = self.poll_interval_secs as f64;
        let mut consecutive_errors: u32 = 0;
        let mut attempts: u32 = 0;

        loop {
            if started.elapsed() >= self.timeout {
                return Err(FetchError::Exhausted(format!(
                    "task {} timed out after {}s",
                    task_id,
                    self.timeout.as_secs()
                )));
            }
            if attempts >= self.max_poll_attempts {
                return Err(FetchError::Exhausted(format!(
                    "task {} still pending after {} poll attempts",
                    task_id, attempts
                )));
            }
            attempts += 1;

            let response = self
                .client
                .get(&poll_url)
                .header("Authorization", format!("Basic {}", self.auth_token))
                .send()
                .await;

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    consecutive_errors += 1;
                    if consecutive_errors > MAX_CONSECUTIVE_ERRORS {
                        return Err(FetchError::Transport(format!(
                            "polling task {} failed repeatedly: {}",
                            task_id, e
                        )));
                    }
                    interval = self.sleep_backoff(interval, BACKOFF_ERROR).await;
                    continue;
                }
            };

            let status = response.status().as_u16();
            match status {
                // Not ready yet; does not count against the error budget.
                404 | 204 => {
                    consecutive_errors = 0;
                    debug!("Task {} not ready (status {}), waiting {:.1}s", task_id, status, interval);
                    interval = self.sleep_backoff(interval, BACKOFF_NOT_READY).await;
                    continue;
                }
                s if s >= 500 => {
                    consecutive_errors += 1;
                    if consecutive_errors > MAX_CONSECUTIVE_ERRORS {
                        return Err(FetchError::Protocol(format!(
                            "task {} polling kept failing with status {}",
                            task_id, s
                        )));
                    }
                    interval = self.sleep_backoff(interval, BACKOFF_ERROR).await;
                    continue;
                }
                s if s >= 400 => {
                    return Err(FetchError::Protocol(format!(
                        "task {} rejected with status {}",
                        task_id, s
                    )));
                }
                _ => {}
            }

            let body: Value = match response.json().await {
                Ok(body) => body,
                Err(e) => {
                    consecutive_errors += 1;
                    if consecutive_errors > MAX_CONSECUTIVE_ERRORS {
                        return Err(FetchError::Protocol(format!(
                            "task {} kept returning unparseable results: {}",
                            task_id, e
                        )));
                    }
                    interval = self.sleep_backoff(interval, BACKOFF_ERROR).await;
                    continue;
                }
            };
            consecutive_errors = 0;

            let task_status = body
                .get("status")
                .or_else(|| body.get("state"))
                .and_then(Value::as_str)
                .unwrap_or_default();

            if matches!(task_status, "failed" | "error") {
                return Err(FetchError::Protocol(format!(
                    "task {} reported status '{}'",
                    task_id, task_status
                )));
            }

            let has_payload =
                ["results", "result", "data"].iter().any(|k| body.get(*k).is_some());
            if task_status == "done" || has_payload {
                return match extract_html(&body) {
                    Some(html) if !html.is_empty() => Ok(html),
                    _ => Err(FetchError::Protocol(format!(
                        "task {} completed with no HTML content",
                        task_id
                    ))),
                };
            }

            // 200 with a non-terminal status: keep waiting.
            debug!("Task {} status '{}', waiting {:.1}s", task_id, task_status, interval);
            interval = self.sleep_backoff(interval, BACKOFF_NOT_READY).await;
        }
    }

    async fn sleep_backoff(&self, interval: f64, multiplier: f64) -> f64 {
        tokio::time::sleep(Duration::from_secs_f64(interval)).await;
        (interval * multiplier).min(BACKOFF_CAP_SECS)
    }
}

/// Pull `(task_id, url?)` pairs out of whichever submit-response shape the
/// provider used: `{queries: [...]}`, `{tasks: [...]}`, a single-task
/// `{id, url}` object, or a bare list.
fn extract_task_entries(body: &Value) -> Vec<(String, Option<String>)> {
    let raw_entries: Vec<&Value> = match body {
        Value::Object(map) => {
            if let Some(Value::Array(queries)) = map.get("queries") {
                queries.iter().collect()
            } else if let Some(Value::Array(tasks)) = map.get("tasks") {
                tasks.iter().collect()
            } else if map.contains_key("id") && map.contains_key("url") {
                vec![body]
            } else {
                Vec::new()
            }
        }
        Value::Array(items) => items.iter().collect(),
        _ => Vec::new(),
    };

    raw_entries
        .into_iter()
        .filter_map(|entry| match entry {
            Value::Object(map) => {
                let task_id = ["id", "task_id", "query_id"]
                    .iter()
                    .find_map(|k| map.get(*k))
                    .and_then(task_id_string)?;
                let url = ["url", "query"]
                    .iter()
                    .find_map(|k| map.get(*k))
                    .and_then(Value::as_str)
                    .map(|s| s.to_string());
                Some((task_id, url))
            }
            // Some responses are just a list of task-id strings.
            Value::String(id) => Some((id.clone(), None)),
            _ => None,
        })
        .collect()
}

fn task_id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// HTML lives either in the first entry of `results`/`result`/`data` (under
/// `content`/`html`/`text`) or at the top level.
fn extract_html(body: &Value) -> Option<String> {
    for key in ["results", "result", "data"] {
        if let Some(Value::Array(entries)) = body.get(key) {
            match entries.first() {
                Some(Value::Object(first)) => {
                    for field in ["content", "html", "text"] {
                        if let Some(html) = first.get(field).and_then(Value::as_str) {
                            return Some(html.to_string());
                        }
                    }
                }
                Some(Value::String(html)) => return Some(html.clone()),
                _ => {}
            }
        }
    }
    for field in ["html", "content", "text"] {
        if let Some(html) = body.get(field).and_then(Value::as_str) {
            return Some(html.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_task_entries_from_all_shapes() {
        let queries = serde_json::json!({"queries": [
            {"id": "t1", "url": "https://a.example/"},
            {"query_id": 42, "query": "https://b.example/"}
        ]});
        assert_eq!(
            extract_task_entries(&queries),
            vec![
                ("t1".to_string(), Some("https://a.example/".to_string())),
                ("42".to_string(), Some("https://b.example/".to_string())),
            ]
        );

        let tasks = serde_json::json!({"tasks": [{"task_id": "t9"}]});
        assert_eq!(extract_task_entries(&tasks), vec![("t9".to_string(), None)]);

        let single = serde_json::json!({"id": "solo", "url": "https://a.example/"});
        assert_eq!(
            extract_task_entries(&single),
            vec![("solo".to_string(), Some("https://a.example/".to_string()))]
        );

        let bare = serde_json::json!(["t1", "t2"]);
        assert_eq!(
            extract_task_entries(&bare),
            vec![("t1".to_string(), None), ("t2".to_string(), None)]
        );

        let nothing = serde_json::json!({"message": "accepted"});
        assert!(extract_task_entries(&nothing).is_empty());
    }

    #[test]
    fn extracts_html_from_result_entries_and_top_level() {
        let nested = serde_json::json!({
            "status": "done",
            "results": [{"content": "<html>done</html>", "status": "done"}]
        });
        assert_eq!(extract_html(&nested).as_deref(), Some("<html>done</html>"));

        let top_level = serde_json::json!({"status": "done", "html": "<html>top</html>"});
        assert_eq!(extract_html(&top_level).as_deref(), Some("<html>top</html>"));

        let empty = serde_json::json!({"status": "done", "results": []});
        assert_eq!(extract_html(&empty), None);
    }
}
