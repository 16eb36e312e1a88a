use base64::Engine as _;
use std::env;
use std::time::Duration;

use super::types::BatchOverrides;

// ---------------------------------------------------------------------------
// BatchConfig — env-derived defaults, immutable for the lifetime of one batch
// ---------------------------------------------------------------------------

pub const ENV_STATIC_XHR_CONCURRENCY: &str = "STATIC_XHR_CONCURRENCY";
pub const ENV_STATIC_XHR_TIMEOUT_SECS: &str = "STATIC_XHR_TIMEOUT_SECS";
pub const ENV_CUSTOM_JS_SERVICES: &str = "CUSTOM_JS_SERVICES";
pub const ENV_CUSTOM_JS_BATCH_SIZE: &str = "CUSTOM_JS_BATCH_SIZE";
pub const ENV_CUSTOM_JS_COOLDOWN_SECS: &str = "CUSTOM_JS_COOLDOWN_SECS";
pub const ENV_CUSTOM_JS_TIMEOUT_SECS: &str = "CUSTOM_JS_TIMEOUT_SECS";
pub const ENV_CUSTOM_JS_MAX_RETRIES: &str = "CUSTOM_JS_MAX_RETRIES";
pub const ENV_CUSTOM_JS_SKIP_DOMAINS: &str = "CUSTOM_JS_SKIP_DOMAINS";
pub const ENV_DECODO_ENABLED: &str = "DECODO_ENABLED";
pub const ENV_DECODO_TIMEOUT_SECS: &str = "DECODO_TIMEOUT_SECS";
pub const ENV_DECODO_MAX_CONCURRENT: &str = "DECODO_MAX_CONCURRENT";
pub const ENV_DECODO_POLL_INTERVAL_SECS: &str = "DECODO_POLL_INTERVAL_SECS";
pub const ENV_DECODO_MAX_POLL_ATTEMPTS: &str = "DECODO_MAX_POLL_ATTEMPTS";
pub const ENV_DECODO_API_ENDPOINT: &str = "DECODO_API_ENDPOINT";
pub const ENV_DECODO_RESULTS_ENDPOINT: &str = "DECODO_RESULTS_ENDPOINT";
pub const ENV_DECODO_TARGET: &str = "DECODO_TARGET";
pub const ENV_DECODO_DEVICE_TYPE: &str = "DECODO_DEVICE_TYPE";
pub const ENV_DECODO_GEO: &str = "DECODO_GEO";
pub const ENV_DECODO_LOCALE: &str = "DECODO_LOCALE";
pub const ENV_DECODO_AUTH_TOKEN: &str = "DECODO_AUTH_TOKEN";
pub const ENV_DECODO_USERNAME: &str = "DECODO_USERNAME";
pub const ENV_DECODO_PASSWORD: &str = "DECODO_PASSWORD";
pub const ENV_MIN_CONTENT_LENGTH: &str = "MIN_CONTENT_LENGTH";
pub const ENV_MIN_TEXT_LENGTH: &str = "MIN_TEXT_LENGTH";
pub const ENV_MIN_MEANINGFUL_ELEMENTS: &str = "MIN_MEANINGFUL_ELEMENTS";
pub const ENV_TEXT_TO_MARKUP_RATIO: &str = "TEXT_TO_MARKUP_RATIO";
pub const ENV_CLASSIFIER_WHITELIST_DOMAINS: &str = "CLASSIFIER_WHITELIST_DOMAINS";

/// Domains the renderer-tier skeleton verdict is skipped for when no
/// override is configured. Heuristics misfire on these storefronts, so
/// whatever the renderer returns is accepted as-is.
const DEFAULT_WHITELIST_DOMAINS: &[&str] = &[
    "myntra.com",
    "sangeethamobiles.com",
    "paiinternational.in",
    "myg.in",
    "darlingretail.com",
    "ajio.com",
    "xtepindia.com",
    "lakhanifootwear.com",
    "skechers.in",
    "somethingsbrewing.in",
    "shop.ttkprestige.com",
    "reliancedigital.in",
    "wonderchef.com",
    "domesticappliances.philips.co.in",
    "agarolifestyle.com",
    "naaptol.com",
    "rbzone.com",
];

const DEFAULT_SKIP_DOMAINS: &[&str] = &[
    "jiomart.com",
    "lotuselectronics.com",
    "croma.com",
    "adidas.co.in",
];

/// Configuration for one batch run. Built once from the environment at
/// startup, optionally overridden per request, then frozen.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    // Static tier
    pub static_xhr_concurrency: usize,
    pub static_xhr_timeout_secs: u64,

    // Renderer tier
    pub custom_js_service_endpoints: Vec<String>,
    pub custom_js_batch_size: usize,
    pub custom_js_cooldown_secs: u64,
    pub custom_js_timeout_secs: u64,
    pub custom_js_max_retries: u32,
    /// Normalized hostnames that bypass the renderer tier entirely.
    pub custom_js_skip_domains: Vec<String>,

    // Provider tier
    pub decodo_enabled: bool,
    pub decodo_timeout_secs: u64,
    pub decodo_max_concurrent: usize,
    pub decodo_poll_interval_secs: u64,
    pub decodo_max_poll_attempts: u32,
    pub decodo_api_endpoint: String,
    pub decodo_results_endpoint: String,
    pub decodo_target: String,
    pub decodo_device_type: String,
    pub decodo_geo: Option<String>,
    pub decodo_locale: Option<String>,
    /// Pre-encoded HTTP Basic token. Opaque; never logged.
    pub decodo_auth_token: Option<String>,

    // Classifier thresholds
    pub min_content_length: usize,
    pub min_text_length: usize,
    pub min_meaningful_elements: usize,
    pub text_to_markup_ratio: f64,
    /// Normalized hostnames for which the renderer-tier verdict is skipped.
    pub classifier_whitelist_domains: Vec<String>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            static_xhr_concurrency: 100,
            static_xhr_timeout_secs: 30,
            custom_js_service_endpoints: Vec::new(),
            custom_js_batch_size: 20,
            custom_js_cooldown_secs: 120,
            custom_js_timeout_secs: 300,
            custom_js_max_retries: 10,
            custom_js_skip_domains: normalize_domain_list(
                DEFAULT_SKIP_DOMAINS.iter().map(|s| s.to_string()),
            ),
            decodo_enabled: true,
            decodo_timeout_secs: 180,
            decodo_max_concurrent: 50,
            decodo_poll_interval_secs: 2,
            decodo_max_poll_attempts: 30,
            decodo_api_endpoint: "https://scraper-api.decodo.com/v2/task/batch".to_string(),
            decodo_results_endpoint: "https://scraper-api.decodo.com/v2/task".to_string(),
            decodo_target: "universal".to_string(),
            decodo_device_type: "desktop".to_string(),
            decodo_geo: None,
            decodo_locale: None,
            decodo_auth_token: None,
            min_content_length: 1000,
            min_text_length: 200,
            min_meaningful_elements: 5,
            text_to_markup_ratio: 0.001,
            classifier_whitelist_domains: normalize_domain_list(
                DEFAULT_WHITELIST_DOMAINS.iter().map(|s| s.to_string()),
            ),
        }
    }
}

impl BatchConfig {
    /// Load defaults from the process environment. Missing or unparseable
    /// variables silently fall back to the built-in defaults.
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            static_xhr_concurrency: env_parse(ENV_STATIC_XHR_CONCURRENCY, base.static_xhr_concurrency),
            static_xhr_timeout_secs: env_parse(ENV_STATIC_XHR_TIMEOUT_SECS, base.static_xhr_timeout_secs),
            custom_js_service_endpoints: env_list(ENV_CUSTOM_JS_SERVICES)
                .unwrap_or(base.custom_js_service_endpoints),
            custom_js_batch_size: env_parse(ENV_CUSTOM_JS_BATCH_SIZE, base.custom_js_batch_size).max(1),
            custom_js_cooldown_secs: env_parse(ENV_CUSTOM_JS_COOLDOWN_SECS, base.custom_js_cooldown_secs),
            custom_js_timeout_secs: env_parse(ENV_CUSTOM_JS_TIMEOUT_SECS, base.custom_js_timeout_secs),
            custom_js_max_retries: env_parse(ENV_CUSTOM_JS_MAX_RETRIES, base.custom_js_max_retries).max(1),
            custom_js_skip_domains: env_list(ENV_CUSTOM_JS_SKIP_DOMAINS)
                .map(|v| normalize_domain_list(v.into_iter()))
                .unwrap_or(base.custom_js_skip_domains),
            decodo_enabled: env_bool(ENV_DECODO_ENABLED, base.decodo_enabled),
            decodo_timeout_secs: env_parse(ENV_DECODO_TIMEOUT_SECS, base.decodo_timeout_secs),
            decodo_max_concurrent: env_parse(ENV_DECODO_MAX_CONCURRENT, base.decodo_max_concurrent).max(1),
            decodo_poll_interval_secs: env_parse(
                ENV_DECODO_POLL_INTERVAL_SECS,
                base.decodo_poll_interval_secs,
            )
            .max(1),
            decodo_max_poll_attempts: env_parse(
                ENV_DECODO_MAX_POLL_ATTEMPTS,
                base.decodo_max_poll_attempts,
            )
            .max(1),
            decodo_api_endpoint: env_string(ENV_DECODO_API_ENDPOINT, &base.decodo_api_endpoint),
            decodo_results_endpoint: env_string(ENV_DECODO_RESULTS_ENDPOINT, &base.decodo_results_endpoint),
            decodo_target: env_string(ENV_DECODO_TARGET, &base.decodo_target),
            decodo_device_type: env_string(ENV_DECODO_DEVICE_TYPE, &base.decodo_device_type),
            decodo_geo: env_opt(ENV_DECODO_GEO),
            decodo_locale: env_opt(ENV_DECODO_LOCALE),
            decodo_auth_token: resolve_decodo_auth_token(),
            min_content_length: env_parse(ENV_MIN_CONTENT_LENGTH, base.min_content_length),
            min_text_length: env_parse(ENV_MIN_TEXT_LENGTH, base.min_text_length),
            min_meaningful_elements: env_parse(ENV_MIN_MEANINGFUL_ELEMENTS, base.min_meaningful_elements),
            text_to_markup_ratio: env_parse(ENV_TEXT_TO_MARKUP_RATIO, base.text_to_markup_ratio),
            classifier_whitelist_domains: env_list(ENV_CLASSIFIER_WHITELIST_DOMAINS)
                .map(|v| normalize_domain_list(v.into_iter()))
                .unwrap_or(base.classifier_whitelist_domains),
        }
    }

    /// Apply per-request overrides on top of the env defaults.
    pub fn apply_overrides(&mut self, overrides: &BatchOverrides) {
        if let Some(v) = overrides.static_xhr_concurrency {
            self.static_xhr_concurrency = v.max(1);
        }
        if let Some(v) = overrides.static_xhr_timeout {
            self.static_xhr_timeout_secs = v;
        }
        if let Some(v) = &overrides.custom_js_service_endpoints {
            self.custom_js_service_endpoints = v.clone();
        }
        if let Some(v) = overrides.custom_js_batch_size {
            self.custom_js_batch_size = v.max(1);
        }
        if let Some(v) = overrides.custom_js_cooldown_seconds {
            self.custom_js_cooldown_secs = v;
        }
        if let Some(v) = overrides.custom_js_timeout {
            self.custom_js_timeout_secs = v;
        }
        if let Some(v) = overrides.custom_js_max_retries {
            self.custom_js_max_retries = v.max(1);
        }
        if let Some(v) = &overrides.custom_js_skip_domains {
            self.custom_js_skip_domains = normalize_domain_list(v.iter().cloned());
        }
        if let Some(v) = overrides.decodo_enabled {
            self.decodo_enabled = v;
        }
        if let Some(v) = overrides.decodo_timeout {
            self.decodo_timeout_secs = v;
        }
        if let Some(v) = overrides.min_content_length {
            self.min_content_length = v;
        }
        if let Some(v) = overrides.min_text_length {
            self.min_text_length = v;
        }
    }

    pub fn static_timeout(&self) -> Duration {
        Duration::from_secs(self.static_xhr_timeout_secs)
    }

    pub fn custom_js_timeout(&self) -> Duration {
        Duration::from_secs(self.custom_js_timeout_secs)
    }

    pub fn custom_js_cooldown(&self) -> Duration {
        Duration::from_secs(self.custom_js_cooldown_secs)
    }

    pub fn decodo_timeout(&self) -> Duration {
        Duration::from_secs(self.decodo_timeout_secs)
    }
}

/// Basic token: pre-encoded `DECODO_AUTH_TOKEN` wins; otherwise encode
/// `DECODO_USERNAME:DECODO_PASSWORD`. Returns `None` when neither form is
/// configured.
fn resolve_decodo_auth_token() -> Option<String> {
    if let Some(token) = env_opt(ENV_DECODO_AUTH_TOKEN) {
        return Some(token);
    }
    let user = env_opt(ENV_DECODO_USERNAME)?;
    let pass = env_opt(ENV_DECODO_PASSWORD)?;
    Some(base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, pass)))
}

// ---------------------------------------------------------------------------
// Domain handling
// ---------------------------------------------------------------------------

/// Normalize a domain string to a bare lowercase hostname without scheme,
/// path, or a leading `www.`.
pub fn normalize_domain(value: &str) -> Option<String> {
    let candidate = value.trim();
    if candidate.is_empty() {
        return None;
    }
    let with_scheme = if candidate.contains("://") {
        candidate.to_string()
    } else {
        format!("https://{}", candidate)
    };
    let host = url::Url::parse(&with_scheme)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))?;
    let host = host.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

pub fn normalize_domain_list(domains: impl Iterator<Item = String>) -> Vec<String> {
    domains.filter_map(|d| normalize_domain(&d)).collect()
}

/// Normalized hostname (lowercase, `www.` stripped) of a URL.
pub fn url_hostname(url: &str) -> Option<String> {
    normalize_domain(url)
}

/// Exact-host or subdomain-suffix match against a normalized domain list.
pub fn host_matches_any(hostname: &str, domains: &[String]) -> bool {
    domains
        .iter()
        .any(|d| hostname == d || hostname.ends_with(&format!(".{}", d)))
}

// ---------------------------------------------------------------------------
// Env helpers
// ---------------------------------------------------------------------------

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    let Ok(v) = env::var(key) else {
        return default;
    };
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

fn env_list(key: &str) -> Option<Vec<String>> {
    let raw = env::var(key).ok()?;
    let items: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_domains() {
        assert_eq!(normalize_domain("WWW.Example.COM"), Some("example.com".into()));
        assert_eq!(
            normalize_domain("https://www.jiomart.com/p/123"),
            Some("jiomart.com".into())
        );
        assert_eq!(normalize_domain("  "), None);
    }

    #[test]
    fn matches_exact_host_and_subdomains() {
        let domains = vec!["jiomart.com".to_string()];
        assert!(host_matches_any("jiomart.com", &domains));
        assert!(host_matches_any("shop.jiomart.com", &domains));
        assert!(!host_matches_any("notjiomart.com", &domains));
    }

    #[test]
    fn overrides_win_over_defaults() {
        let mut config = BatchConfig::default();
        config.apply_overrides(&BatchOverrides {
            static_xhr_concurrency: Some(7),
            decodo_enabled: Some(false),
            custom_js_skip_domains: Some(vec!["https://www.croma.com".into()]),
            ..Default::default()
        });
        assert_eq!(config.static_xhr_concurrency, 7);
        assert!(!config.decodo_enabled);
        assert_eq!(config.custom_js_skip_domains, vec!["croma.com".to_string()]);
    }
}
