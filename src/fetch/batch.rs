use crate::classify::ContentClassifier;
use crate::core::config::{host_matches_any, url_hostname, BatchConfig};
use crate::core::error::FetchError;
use crate::core::types::{BatchReport, FetchMethod, FetchStatus};
use crate::fetch::aggregate::ResultAggregator;
use crate::fetch::decodo::DecodoClient;
use crate::fetch::renderer::RendererPool;
use crate::fetch::static_xhr::StaticFetcher;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Run one batch through the three-tier pipeline.
///
/// Phase 1 fetches everything statically; URLs the classifier promotes go
/// to the renderer fleet (minus skip-listed domains, which jump straight to
/// the provider). The renderer loop re-renders classifier-rejected and
/// failed URLs for up to the configured number of rounds; whatever is still
/// unresolved is handed to the scraping provider, or failed outright when
/// the provider is disabled or misconfigured. No per-URL error aborts the
/// batch.
pub async fn fetch_batch(urls: &[String], config: &BatchConfig) -> BatchReport {
    let started = Instant::now();
    let mut aggregator = ResultAggregator::new(urls);
    let classifier = Arc::new(ContentClassifier::from_config(config));

    info!("Starting batch processing for {} URLs", urls.len());

    // Phase 1: static + XHR.
    let phase1 = {
        let fetcher = StaticFetcher::new(config, Arc::clone(&classifier));
        fetcher.process_batch(urls).await
        // fetcher (and its connection pool) dropped at phase exit
    };

    let mut seen = HashSet::new();
    let mut js_urls: Vec<String> = Vec::new();
    // Phase-1 method per promoted URL, for failure attribution when a URL
    // never reaches a later tier.
    let mut static_method: HashMap<String, FetchMethod> = HashMap::new();
    for outcome in phase1 {
        if outcome.needs_js {
            if seen.insert(outcome.url.clone()) {
                static_method.insert(outcome.url.clone(), outcome.method);
                js_urls.push(outcome.url);
            }
        } else {
            aggregator.add_result(
                &outcome.url,
                outcome.html,
                outcome.method,
                FetchStatus::Success,
                None,
            );
        }
    }

    // Skip-listed domains bypass the renderer tier entirely.
    let (provider_direct, renderer_input): (Vec<String>, Vec<String>) = js_urls
        .into_iter()
        .partition(|url| should_skip_renderer(url, &config.custom_js_skip_domains));

    info!(
        "Phase 1 completed: {} URLs need JS rendering",
        provider_direct.len() + renderer_input.len()
    );
    if !provider_direct.is_empty() {
        info!(
            "{} URL(s) are configured to skip rendering and go directly to the provider",
            provider_direct.len()
        );
    }

    // Phase 2: renderer fleet with the orchestrator-level retry loop.
    // `static_residual` URLs were last touched by the static tier,
    // `render_residual` ones by the renderer; the split only matters for
    // failure attribution when the provider cannot run.
    let mut static_residual = provider_direct;
    let mut render_residual: Vec<String> = Vec::new();
    if !renderer_input.is_empty() {
        if config.custom_js_service_endpoints.is_empty() {
            warn!(
                "No rendering endpoints configured; forwarding {} URLs to the provider",
                renderer_input.len()
            );
            static_residual.extend(renderer_input);
        } else {
            let pool = RendererPool::new(config);
            let mut pending = renderer_input;
            let mut rendered = 0usize;

            for round in 1..=config.custom_js_max_retries {
                if pending.is_empty() {
                    break;
                }
                info!(
                    "Rendering attempt {}/{} for {} URLs across {} endpoints",
                    round,
                    config.custom_js_max_retries,
                    pending.len(),
                    pool.endpoint_count()
                );

                let outcomes = pool.process_urls(&pending).await;
                let mut carry = Vec::new();
                for outcome in outcomes {
                    match (outcome.status, outcome.html) {
                        (FetchStatus::Success, Some(html)) if !html.is_empty() => {
                            let (is_skeleton, reason) =
                                classifier.is_rendered_skeleton(&html, &outcome.url);
                            if is_skeleton {
                                let reject = FetchError::ClassifierReject(reason);
                                info!("Rendered result for {} will be retried: {}", outcome.url, reject);
                                carry.push(outcome.url);
                            } else {
                                rendered += 1;
                                aggregator.add_result(
                                    &outcome.url,
                                    Some(html),
                                    FetchMethod::CustomJs,
                                    FetchStatus::Success,
                                    None,
                                );
                            }
                        }
                        (_, _) => {
                            debug!(
                                "Render failed for {}: {}",
                                outcome.url,
                                outcome.error.as_deref().unwrap_or("unknown error")
                            );
                            carry.push(outcome.url);
                        }
                    }
                }

                pending = carry;
                if pending.is_empty() {
                    info!("All URLs rendered after {} attempt(s)", round);
                } else {
                    info!(
                        "Attempt {} completed: {} rendered so far, {} to retry",
                        round,
                        rendered,
                        pending.len()
                    );
                }
            }

            render_residual.extend(pending);
            info!(
                "Phase 2 completed: {} rendered, {} queued for the provider",
                rendered,
                static_residual.len() + render_residual.len()
            );
        }
    }

    if static_residual.is_empty() && render_residual.is_empty() {
        return finish(aggregator, started);
    }

    // Phase 3: scraping provider, or explicit failures when unavailable.
    // With the provider disabled, failures stay attributed to the last tier
    // that actually attempted each URL; once the provider runs (or is
    // enabled but misconfigured), residual failures are credited to it.
    if !config.decodo_enabled {
        warn!(
            "Provider fallback is disabled but {} URLs still require it; marking them failed",
            static_residual.len() + render_residual.len()
        );
        for url in &static_residual {
            let method = static_method
                .get(url)
                .copied()
                .unwrap_or(FetchMethod::Static);
            aggregator.add_result(
                url,
                None,
                method,
                FetchStatus::Failed,
                Some("Decodo fallback disabled".to_string()),
            );
        }
        for url in &render_residual {
            aggregator.add_result(
                url,
                None,
                FetchMethod::CustomJs,
                FetchStatus::Failed,
                Some("Decodo fallback disabled".to_string()),
            );
        }
        return finish(aggregator, started);
    }

    let mut residual = static_residual;
    residual.extend(render_residual);

    match DecodoClient::from_config(config) {
        Ok(client) => {
            let outcomes = client.process_urls(&residual).await;
            for outcome in outcomes {
                aggregator.add_result(
                    &outcome.url,
                    outcome.html,
                    FetchMethod::Decodo,
                    outcome.status,
                    outcome.error,
                );
            }
        }
        Err(e) => {
            warn!("Provider client unavailable: {}", e);
            for url in &residual {
                aggregator.add_result(
                    url,
                    None,
                    FetchMethod::Decodo,
                    FetchStatus::Failed,
                    Some(e.to_string()),
                );
            }
        }
    }

    finish(aggregator, started)
}

fn finish(aggregator: ResultAggregator, started: Instant) -> BatchReport {
    let (results, summary) = aggregator.finalize(started.elapsed().as_secs_f64());
    info!(
        "Batch completed: {}/{} successful, {} failed, methods {:?}, {:.2}s",
        summary.success, summary.total, summary.failed, summary.by_method, summary.total_time
    );
    BatchReport { results, summary }
}

/// Skip-list matching: normalized lowercase host, `www.` stripped, exact
/// host or any subdomain suffix.
fn should_skip_renderer(url: &str, skip_domains: &[String]) -> bool {
    if skip_domains.is_empty() {
        return false;
    }
    url_hostname(url).is_some_and(|host| host_matches_any(&host, skip_domains))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_matching_covers_subdomains_and_www() {
        let domains = vec!["jiomart.com".to_string()];
        assert!(should_skip_renderer("https://jiomart.com/p/1", &domains));
        assert!(should_skip_renderer("https://www.jiomart.com/p/1", &domains));
        assert!(should_skip_renderer("https://m.jiomart.com/p/1", &domains));
        assert!(!should_skip_renderer("https://jiomart.com.evil.example/", &domains));
        assert!(!should_skip_renderer("https://other.example/", &domains));
    }
}
