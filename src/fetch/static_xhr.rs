use crate::classify::ContentClassifier;
use crate::core::config::BatchConfig;
use crate::core::types::{FetchMethod, StaticOutcome};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Realistic desktop user agents rotated across static requests.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
];

fn random_user_agent() -> &'static str {
    use rand::prelude::*;
    let mut rng = rand::rng();
    let index = rng.random_range(0..USER_AGENTS.len());
    USER_AGENTS[index]
}

/// Phase-1 engine: high-fan-out plain HTTP GET with a per-request timeout
/// and a shared concurrency cap. Every input URL yields exactly one
/// [`StaticOutcome`]; failures become `needs_js = true` records rather than
/// errors.
pub struct StaticFetcher {
    client: Client,
    concurrency: usize,
    timeout_secs: u64,
    classifier: Arc<ContentClassifier>,
}

impl StaticFetcher {
    pub fn new(config: &BatchConfig, classifier: Arc<ContentClassifier>) -> Self {
        let client = Client::builder()
            .timeout(config.static_timeout())
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            concurrency: config.static_xhr_concurrency.max(1),
            timeout_secs: config.static_xhr_timeout_secs,
            classifier,
        }
    }

    /// Fetch every URL concurrently (bounded fan-out) and classify each
    /// response. Results come back in input order.
    pub async fn process_batch(&self, urls: &[String]) -> Vec<StaticOutcome> {
        info!(
            "Static fetch of {} URLs (concurrency: {})",
            urls.len(),
            self.concurrency
        );

        let mut results: Vec<(usize, StaticOutcome)> = stream::iter(urls.iter().cloned().enumerate())
            .map(|(index, url)| async move { (index, self.fetch_one(&url).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        results.sort_by_key(|(index, _)| *index);

        let needs_js = results.iter().filter(|(_, r)| r.needs_js).count();
        info!(
            "Static phase completed: {} resolved, {} promoted to rendering",
            results.len() - needs_js,
            needs_js
        );

        results.into_iter().map(|(_, outcome)| outcome).collect()
    }

    async fn fetch_one(&self, url: &str) -> StaticOutcome {
        let method = if prefers_xhr(url) {
            FetchMethod::Xhr
        } else {
            FetchMethod::Static
        };

        let mut request = self
            .client
            .get(url)
            .header("User-Agent", random_user_agent());
        request = match method {
            FetchMethod::Xhr => request
                .header("Accept", "application/json, text/javascript, */*; q=0.01")
                .header("X-Requested-With", "XMLHttpRequest"),
            _ => request.header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            ),
        };

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                warn!("Static fetch timeout for {}", url);
                return StaticOutcome {
                    url: url.to_string(),
                    html: None,
                    status_code: 0,
                    method,
                    needs_js: true,
                    reason: Some("timeout".to_string()),
                };
            }
            Err(e) => {
                warn!("Static fetch failed for {}: {}", url, e);
                return StaticOutcome {
                    url: url.to_string(),
                    html: None,
                    status_code: 0,
                    method,
                    needs_js: true,
                    reason: Some(e.to_string()),
                };
            }
        };

        let status_code = response.status().as_u16();
        let html = match response.text().await {
            Ok(body) => Some(body),
            Err(e) => {
                warn!("Static body read failed for {}: {}", url, e);
                None
            }
        };

        let (needs_js, reason) = self
            .classifier
            .should_fallback(html.as_deref(), status_code);
        if needs_js {
            debug!("Promoting {} to renderer tier: {}", url, reason);
        }

        StaticOutcome {
            url: url.to_string(),
            html,
            status_code,
            method,
            needs_js,
            reason: Some(reason),
        }
    }
}

/// Deterministic request-shape routing: URLs that look like JSON/XHR
/// endpoints get the `xhr` header variant, everything else the plain
/// document-fetch variant. Both share the same concurrency cap.
fn prefers_xhr(url: &str) -> bool {
    let Ok(parsed) = url::Url::parse(url) else {
        return false;
    };
    if parsed
        .host_str()
        .is_some_and(|h| h.to_lowercase().starts_with("api."))
    {
        return true;
    }
    if parsed.path().to_lowercase().contains("/api/") {
        return true;
    }
    let query = parsed.query().unwrap_or("").to_lowercase();
    query.contains("format=json") || query.contains("ajax=1") || query.contains("ajax=true")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xhr_routing_is_deterministic() {
        assert!(prefers_xhr("https://api.shop.example/v1/items"));
        assert!(prefers_xhr("https://shop.example/api/search?q=x"));
        assert!(prefers_xhr("https://shop.example/search?format=json&q=x"));
        assert!(prefers_xhr("https://shop.example/search?ajax=1"));
        assert!(!prefers_xhr("https://shop.example/search?q=shoes"));
        assert!(!prefers_xhr("not a url"));
    }

    #[test]
    fn user_agent_pool_is_desktop_only() {
        for ua in USER_AGENTS {
            assert!(!ua.contains("Mobile"));
        }
        assert!(!random_user_agent().is_empty());
    }
}
