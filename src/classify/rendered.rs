use super::{count_selector, extract_text, ContentClassifier};
use crate::core::config::url_hostname;
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

/// Listing pages with fewer product-card-like elements than this are
/// suspect when navigation chrome is present.
const MIN_PRODUCT_ELEMENTS: usize = 1;

const EMPTY_STATE_PHRASES: &[&str] = &["no results", "nothing found", "try searching", "oops"];

impl ContentClassifier {
    /// Renderer-tier verdict. Stricter than the static-tier check: headless
    /// renderers happily return pages that have full navigation chrome but
    /// captured zero actual results (pre-hydration snapshots, empty search
    /// pages). Whitelisted hosts are accepted unconditionally.
    pub fn is_rendered_skeleton(&self, html: &str, url: &str) -> (bool, String) {
        if html.is_empty() {
            return (true, "empty content".to_string());
        }

        if let Some(domain) = self.whitelisted_domain(url) {
            debug!("skipping skeleton detection for whitelisted domain {}: {}", domain, url);
            return (false, format!("{} - accepting rendered result", domain));
        }

        let html_lower = html.to_lowercase();
        for pattern in &self.no_results_patterns {
            if pattern.is_match(&html_lower) {
                return (true, "found 'no results' message".to_string());
            }
        }

        let document = Html::parse_document(html);

        if let Some(reason) = self.scripts_declare_empty_listing(&document) {
            return (true, reason);
        }

        let text = extract_text(&document);
        let text_length = text.chars().count();

        if self.has_navigation(&document) && self.count_product_elements(&document) < MIN_PRODUCT_ELEMENTS
        {
            if text_length < 500 {
                return (
                    true,
                    "navigation present but no product cards and minimal content".to_string(),
                );
            }
            let visible_lower = text.to_lowercase();
            if EMPTY_STATE_PHRASES.iter().any(|p| visible_lower.contains(p)) {
                return (
                    true,
                    "navigation present but empty-state message detected".to_string(),
                );
            }
        }

        let structural = count_selector(&document, "div, nav, header, footer, aside");
        let content_elements =
            count_selector(&document, "article, section, main, p, h1, h2, h3, h4, h5, h6");
        if structural > 50 && content_elements < 5 && text_length < 1000 {
            return (true, "structure-heavy but content-light page".to_string());
        }

        if self.has_visible_loading_state(&document) {
            return (true, "visible loading/error state detected".to_string());
        }

        (false, "valid content".to_string())
    }

    fn whitelisted_domain(&self, url: &str) -> Option<String> {
        let hostname = url_hostname(url)?;
        self.whitelist_domains
            .iter()
            .find(|d| hostname == **d || hostname.ends_with(&format!(".{}", d)))
            .cloned()
    }

    /// Scan `<script>` bodies for empty-collection JSON shapes, then probe
    /// embedded objects carrying a `products` key for empty arrays or zero
    /// count fields.
    fn scripts_declare_empty_listing(&self, document: &Html) -> Option<String> {
        let selector = Selector::parse("script").ok()?;
        for script in document.select(&selector) {
            let content: String = script.text().collect();
            if content.is_empty() {
                continue;
            }

            for pattern in &self.empty_listing_patterns {
                if pattern.is_match(&content) {
                    return Some("empty product listing detected".to_string());
                }
            }

            let Some(found) = self.embedded_json_re.find(&content) else {
                continue;
            };
            let Ok(value) = serde_json::from_str::<Value>(found.as_str()) else {
                continue;
            };
            for key in ["products", "items", "results", "data"] {
                match value.get(key) {
                    Some(Value::Array(items)) if items.is_empty() => {
                        return Some(format!("empty {} array in embedded JSON", key));
                    }
                    Some(Value::Object(inner)) => {
                        for count_key in
                            ["count", "total", "productsCount", "itemCount", "totalProductsCount"]
                        {
                            if inner.get(count_key).and_then(Value::as_u64) == Some(0) {
                                return Some(format!("zero {} in embedded JSON", count_key));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        None
    }

    fn has_navigation(&self, document: &Html) -> bool {
        if count_selector(document, "nav, header") > 0 {
            return true;
        }
        if let Ok(selector) = Selector::parse("[class]") {
            return document.select(&selector).any(|el| {
                el.value()
                    .attr("class")
                    .is_some_and(|c| self.nav_marker_re.is_match(c))
            });
        }
        false
    }

    /// Distinct elements that look like product cards: class/id markers,
    /// `article` elements, or `data-product-id`/`data-item-id` carriers.
    fn count_product_elements(&self, document: &Html) -> usize {
        let mut seen = HashSet::new();

        if let Ok(selector) = Selector::parse("[class]") {
            for el in document.select(&selector) {
                if el
                    .value()
                    .attr("class")
                    .is_some_and(|c| self.product_marker_re.is_match(c))
                {
                    seen.insert(el.id());
                }
            }
        }
        if let Ok(selector) = Selector::parse("[id]") {
            for el in document.select(&selector) {
                if el
                    .value()
                    .attr("id")
                    .is_some_and(|i| self.product_marker_re.is_match(i))
                {
                    seen.insert(el.id());
                }
            }
        }
        for raw in ["article", "[data-product-id]", "[data-item-id]"] {
            if let Ok(selector) = Selector::parse(raw) {
                for el in document.select(&selector) {
                    seen.insert(el.id());
                }
            }
        }

        seen.len()
    }

    /// Loading/error/empty-state elements count only when they are likely
    /// visible: not `display:none` and not class-named hidden.
    fn has_visible_loading_state(&self, document: &Html) -> bool {
        let Ok(selector) = Selector::parse("[class], [id]") else {
            return false;
        };
        for el in document.select(&selector) {
            let class_attr = el.value().attr("class").unwrap_or("");
            let id_attr = el.value().attr("id").unwrap_or("");
            if !self.loading_marker_re.is_match(class_attr)
                && !self.loading_marker_re.is_match(id_attr)
            {
                continue;
            }
            let style = el
                .value()
                .attr("style")
                .unwrap_or("")
                .to_lowercase()
                .replace(' ', "");
            if !style.contains("display:none") && !class_attr.to_lowercase().contains("hidden") {
                return true;
            }
        }
        false
    }
}
