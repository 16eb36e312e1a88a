use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which tier produced the final value for a URL.
///
/// `Xhr` is the static tier's alternate request shape (same engine,
/// different headers); it exists for reporting only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMethod {
    Static,
    Xhr,
    CustomJs,
    Decodo,
}

impl FetchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMethod::Static => "static",
            FetchMethod::Xhr => "xhr",
            FetchMethod::CustomJs => "custom_js",
            FetchMethod::Decodo => "decodo",
        }
    }
}

impl std::fmt::Display for FetchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Success,
    Failed,
}

/// Final per-URL record returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlResult {
    pub url: String,
    pub html: Option<String>,
    pub method: Option<FetchMethod>,
    pub status: FetchStatus,
    pub error: Option<String>,
}

/// Summary counters over one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    /// Count per method label. BTreeMap so serialized output is stable.
    pub by_method: BTreeMap<String, usize>,
    /// Wall-clock seconds for the whole batch.
    pub total_time: f64,
}

/// Output of the orchestrator, before the HTTP layer wraps it.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub results: Vec<UrlResult>,
    pub summary: BatchSummary,
}

// Wire types for the batch entry point.

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub urls: Vec<String>,
    #[serde(default)]
    pub config: Option<BatchOverrides>,
}

/// Optional per-request configuration overrides; absent fields fall back to
/// the env-derived defaults.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct BatchOverrides {
    #[serde(default)]
    pub static_xhr_concurrency: Option<usize>,
    #[serde(default)]
    pub static_xhr_timeout: Option<u64>,
    #[serde(default)]
    pub custom_js_service_endpoints: Option<Vec<String>>,
    #[serde(default)]
    pub custom_js_batch_size: Option<usize>,
    #[serde(default)]
    pub custom_js_cooldown_seconds: Option<u64>,
    #[serde(default)]
    pub custom_js_timeout: Option<u64>,
    #[serde(default)]
    pub custom_js_max_retries: Option<u32>,
    #[serde(default)]
    pub custom_js_skip_domains: Option<Vec<String>>,
    #[serde(default)]
    pub decodo_enabled: Option<bool>,
    #[serde(default)]
    pub decodo_timeout: Option<u64>,
    #[serde(default)]
    pub min_content_length: Option<usize>,
    #[serde(default)]
    pub min_text_length: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub results: Vec<UrlResult>,
    pub summary: BatchSummary,
    /// True iff no URL failed.
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub status_code: u16,
}

// Internal per-tier records.

/// Outcome of one static-tier fetch. Every input URL yields exactly one of
/// these; the fetcher never errors to the orchestrator.
#[derive(Debug, Clone)]
pub struct StaticOutcome {
    pub url: String,
    pub html: Option<String>,
    pub status_code: u16,
    pub method: FetchMethod,
    /// Classifier's promote bit: this URL needs the renderer tier.
    pub needs_js: bool,
    pub reason: Option<String>,
}

/// Outcome of one renderer- or provider-tier attempt.
#[derive(Debug, Clone)]
pub struct RenderOutcome {
    pub url: String,
    pub html: Option<String>,
    pub status: FetchStatus,
    pub error: Option<String>,
}

impl RenderOutcome {
    pub fn success(url: impl Into<String>, html: String) -> Self {
        Self {
            url: url.into(),
            html: Some(html),
            status: FetchStatus::Success,
            error: None,
        }
    }

    pub fn failed(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: None,
            status: FetchStatus::Failed,
            error: Some(error.into()),
        }
    }
}
