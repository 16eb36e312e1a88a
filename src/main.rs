use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use pagecascade::{fetch_batch, types::*, BatchConfig};

const MAX_URLS_PER_REQUEST: usize = 10_000;

#[derive(Clone)]
struct AppState {
    /// Env-derived defaults; per-request overrides are applied on a clone.
    base_config: Arc<BatchConfig>,
    started_at: Instant,
}

fn parse_port_from_args() -> Option<u16> {
    let mut args = std::env::args().peekable();
    while let Some(a) = args.next() {
        if a == "--port" {
            if let Some(v) = args.next() {
                if let Ok(p) = v.parse::<u16>() {
                    return Some(p);
                }
            }
        } else if let Some(rest) = a.strip_prefix("--port=") {
            if let Ok(p) = rest.parse::<u16>() {
                return Some(p);
            }
        }
    }
    None
}

fn port_from_env() -> Option<u16> {
    for k in ["PAGECASCADE_PORT", "PORT"] {
        if let Ok(v) = std::env::var(k) {
            if let Ok(p) = v.trim().parse::<u16>() {
                return Some(p);
            }
        }
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!("Starting URL-to-HTML batch fetcher");

    let base_config = BatchConfig::from_env();
    info!(
        "Defaults: static concurrency {}, {} rendering endpoints, provider enabled: {}",
        base_config.static_xhr_concurrency,
        base_config.custom_js_service_endpoints.len(),
        base_config.decodo_enabled
    );

    let state = AppState {
        base_config: Arc::new(base_config),
        started_at: Instant::now(),
    };

    // Build router
    let app = Router::new()
        .route("/", get(api_info))
        .route("/health", get(health_check))
        .route("/api/v1/fetch-batch", post(fetch_batch_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let port: u16 = parse_port_from_args().or_else(port_from_env).unwrap_or(8000);
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!(
                "Address already in use: {}. Stop the existing process or run with --port {} (or set PORT/PAGECASCADE_PORT).",
                bind_addr,
                port.saturating_add(1)
            )
        }
        Err(e) => return Err(e.into()),
    };
    info!("Batch fetch API listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).ok();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                if let Some(ref mut s) = sigterm {
                    s.recv().await;
                } else {
                    futures::future::pending::<()>().await;
                }
            } => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn api_info() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "pagecascade",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Batch URL-to-HTML fetcher with static, JS-rendering and scraping-provider tiers",
        "endpoints": {
            "health": "/health",
            "batch_fetch": "/api/v1/fetch-batch"
        }
    }))
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime": state.started_at.elapsed().as_secs_f64()
    }))
}

async fn fetch_batch_handler(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, (StatusCode, Json<ErrorResponse>)> {
    validate_urls(&request.urls)?;

    let mut config = (*state.base_config).clone();
    if let Some(overrides) = &request.config {
        config.apply_overrides(overrides);
    }

    info!("Received batch request for {} URLs", request.urls.len());
    let report = fetch_batch(&request.urls, &config).await;
    let success = report.summary.failed == 0;

    Ok(Json(BatchResponse {
        results: report.results,
        summary: report.summary,
        success,
    }))
}

fn validate_urls(urls: &[String]) -> Result<(), (StatusCode, Json<ErrorResponse>)> {
    if urls.is_empty() {
        return Err(validation_error("urls array cannot be empty".to_string()));
    }
    if urls.len() > MAX_URLS_PER_REQUEST {
        return Err(validation_error(format!(
            "Maximum {} URLs per request",
            MAX_URLS_PER_REQUEST
        )));
    }
    for url in urls {
        let parsed = url::Url::parse(url)
            .map_err(|e| validation_error(format!("Invalid URL '{}': {}", url, e)))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(validation_error(format!(
                "Invalid URL '{}': must use http or https",
                url
            )));
        }
    }
    Ok(())
}

fn validation_error(detail: String) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: "Validation Error".to_string(),
            detail: Some(detail),
            status_code: 400,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_batches_are_rejected() {
        let err = validate_urls(&[]).err().expect("must reject");
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert_eq!(err.1.status_code, 400);
    }

    #[test]
    fn oversized_batches_are_rejected() {
        let urls: Vec<String> = (0..MAX_URLS_PER_REQUEST + 1)
            .map(|i| format!("https://example.com/{i}"))
            .collect();
        assert!(validate_urls(&urls).is_err());
    }

    #[test]
    fn urls_must_be_absolute_http() {
        assert!(validate_urls(&["not a url".to_string()]).is_err());
        assert!(validate_urls(&["ftp://example.com/file".to_string()]).is_err());
        assert!(validate_urls(&["/relative/path".to_string()]).is_err());
        assert!(validate_urls(&["https://example.com/ok".to_string()]).is_ok());
    }
}
