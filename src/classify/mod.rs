mod rendered;

use crate::core::config::BatchConfig;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

/// Pages under this size get the strict text-to-markup ratio check; larger
/// pages (modern storefronts, SPAs) routinely carry huge markup and are
/// never rejected on ratio alone.
const RATIO_STRICT_MAX_BYTES: usize = 50_000;

const SKELETON_KEYWORDS: &[&str] = &[
    "loading",
    "skeleton",
    "placeholder",
    "spinner",
    "shimmer",
    "pulse",
];

/// Decides whether an HTML body is acceptable as the final answer for a URL
/// or must be promoted to the next tier.
///
/// Two verdicts with distinct policies: [`should_fallback`] gates the static
/// tier, [`is_rendered_skeleton`] (stricter, tuned for search/listing pages)
/// gates results coming back from the renderer fleet.
///
/// [`should_fallback`]: ContentClassifier::should_fallback
/// [`is_rendered_skeleton`]: ContentClassifier::is_rendered_skeleton
pub struct ContentClassifier {
    min_content_length: usize,
    min_text_length: usize,
    min_meaningful_elements: usize,
    text_to_markup_ratio: f64,
    whitelist_domains: Vec<String>,
    no_results_patterns: Vec<Regex>,
    empty_listing_patterns: Vec<Regex>,
    embedded_json_re: Regex,
    product_marker_re: Regex,
    nav_marker_re: Regex,
    loading_marker_re: Regex,
}

impl ContentClassifier {
    pub fn from_config(config: &BatchConfig) -> Self {
        let no_results_patterns = [
            r"oops!?\s*no\s+results?\s+found",
            r"no\s+results?\s+found",
            r"nothing\s+found",
            r"no\s+products?\s+found",
            r"no\s+items?\s+found",
            r"try\s+searching\s+for\s+something\s+else",
            r"don'?t\s+worry,\s+try\s+searching",
            r"no\s+results?\s+available",
            r"we\s+couldn'?t\s+find",
            r"no\s+matches?\s+found",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid no-results pattern"))
        .collect();

        let empty_listing_patterns = [
            r#""products"\s*:\s*\[\s*\]"#,
            r#""items"\s*:\s*\[\s*\]"#,
            r#""results"\s*:\s*\[\s*\]"#,
            r#""productsCount"\s*:\s*0"#,
            r#""totalProductsCount"\s*:\s*0"#,
            r#""itemCount"\s*:\s*0"#,
            r#""count"\s*:\s*0\s*,"#,
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid empty-listing pattern"))
        .collect();

        Self {
            min_content_length: config.min_content_length,
            min_text_length: config.min_text_length,
            min_meaningful_elements: config.min_meaningful_elements,
            text_to_markup_ratio: config.text_to_markup_ratio,
            whitelist_domains: config.classifier_whitelist_domains.clone(),
            no_results_patterns,
            empty_listing_patterns,
            // One level of nesting is enough to capture `{"products": {...}}`
            // count objects alongside flat `{"products": []}` shapes.
            embedded_json_re: Regex::new(
                r#"\{(?:[^{}]|\{[^{}]*\})*"products"(?:[^{}]|\{[^{}]*\})*\}"#,
            )
            .expect("valid embedded-json pattern"),
            product_marker_re: Regex::new(r"(?i)product|item|listing|card")
                .expect("valid product-marker pattern"),
            nav_marker_re: Regex::new(r"(?i)nav|header|menu").expect("valid nav-marker pattern"),
            loading_marker_re: Regex::new(r"(?i)loading|error|empty|no-results")
                .expect("valid loading-marker pattern"),
        }
    }

    /// 4xx and 5xx indicate blocking or upstream errors.
    pub fn is_blocked(&self, status_code: u16) -> bool {
        (400..600).contains(&status_code)
    }

    /// Static-tier verdict: should this URL be promoted to the next tier?
    /// Returns the promote bit and a short human-readable reason.
    pub fn should_fallback(&self, html: Option<&str>, status_code: u16) -> (bool, String) {
        if self.is_blocked(status_code) {
            return (true, format!("request blocked (status {})", status_code));
        }
        let Some(html) = html else {
            return (true, "no content received".to_string());
        };
        let (is_skeleton, reason) = self.is_skeleton_content(html);
        if is_skeleton {
            (true, format!("skeleton content: {}", reason))
        } else {
            (false, "content is valid".to_string())
        }
    }

    /// Heuristic skeleton detection for static responses.
    pub fn is_skeleton_content(&self, html: &str) -> (bool, String) {
        if html.is_empty() {
            return (true, "empty content".to_string());
        }

        let content_length = html.len();
        if content_length < self.min_content_length {
            return (true, format!("content too short ({} bytes)", content_length));
        }

        let document = Html::parse_document(html);

        // A body that yields no element nodes at all (beyond the implied
        // html/head/body scaffolding) but is long enough is accepted as-is.
        if real_element_count(&document) == 0 {
            return (false, "unparseable but sufficient length".to_string());
        }

        let text = extract_text(&document);
        let text_length = text.chars().count();
        if text_length < self.min_text_length {
            return (true, format!("text content too short ({} chars)", text_length));
        }

        let meaningful = self.count_meaningful_elements(&document);
        if meaningful < self.min_meaningful_elements {
            return (true, format!("too few meaningful elements ({})", meaningful));
        }

        let markup_length = content_length.saturating_sub(text_length);
        if markup_length > 0 && content_length < RATIO_STRICT_MAX_BYTES {
            let ratio = text_length as f64 / markup_length as f64;
            if ratio < self.text_to_markup_ratio {
                return (true, format!("low text-to-markup ratio ({:.4})", ratio));
            }
        }

        let html_lower = html.to_lowercase();
        let keyword_hits = SKELETON_KEYWORDS
            .iter()
            .filter(|k| html_lower.contains(*k))
            .count();
        if keyword_hits >= 3 && text_length < self.min_text_length * 2 {
            debug!("{} skeleton keywords with only {} chars of text", keyword_hits, text_length);
            return (true, format!("multiple skeleton indicators ({})", keyword_hits));
        }

        let div_count = count_selector(&document, "div");
        if div_count > 20 && text_length < self.min_text_length * 3 {
            return (
                true,
                format!("layout-heavy, content-light ({} divs, {} chars)", div_count, text_length),
            );
        }

        (false, "valid content".to_string())
    }

    /// Meaningful = text-carrying p/article/section/div + images with a
    /// source + links with a target.
    fn count_meaningful_elements(&self, document: &Html) -> usize {
        let mut count = 0;
        if let Ok(selector) = Selector::parse("p, article, section, div") {
            count += document
                .select(&selector)
                .filter(|el| has_direct_text(*el))
                .count();
        }
        count += count_selector(document, "img[src]");
        count += count_selector(document, "a[href]");
        count
    }
}

pub(crate) fn extract_text(document: &Html) -> String {
    document
        .root_element()
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn count_selector(document: &Html, selector: &str) -> usize {
    if let Ok(selector) = Selector::parse(selector) {
        document.select(&selector).count()
    } else {
        0
    }
}

fn has_direct_text(element: ElementRef) -> bool {
    element
        .children()
        .any(|child| matches!(child.value(), scraper::Node::Text(t) if !t.trim().is_empty()))
}

fn real_element_count(document: &Html) -> usize {
    if let Ok(selector) = Selector::parse("*") {
        document
            .select(&selector)
            .filter(|el| !matches!(el.value().name(), "html" | "head" | "body"))
            .count()
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> ContentClassifier {
        ContentClassifier::from_config(&BatchConfig::default())
    }

    fn article_html(words: usize) -> String {
        let body = "substantive article text ".repeat(words / 3 + 1);
        format!(
            "<html><body><article><p>{body}</p><p>{body}</p>\
             <a href=\"/a\">one</a><a href=\"/b\">two</a>\
             <img src=\"/x.png\"/><img src=\"/y.png\"/></article></body></html>"
        )
    }

    #[test]
    fn blocked_statuses_promote() {
        let c = classifier();
        let (promote, reason) = c.should_fallback(Some("<html></html>"), 403);
        assert!(promote);
        assert!(reason.contains("blocked"));
        assert!(c.is_blocked(500));
        assert!(!c.is_blocked(301));
    }

    #[test]
    fn missing_or_short_content_promotes() {
        let c = classifier();
        assert!(c.should_fallback(None, 200).0);
        assert!(c.should_fallback(Some(""), 200).0);
        let (promote, reason) = c.should_fallback(Some("<html><body>tiny</body></html>"), 200);
        assert!(promote);
        assert!(reason.contains("too short"));
    }

    #[test]
    fn rich_article_is_accepted() {
        let c = classifier();
        let html = article_html(600);
        let (promote, reason) = c.should_fallback(Some(&html), 200);
        assert!(!promote, "unexpected promotion: {}", reason);
    }

    #[test]
    fn skeleton_keywords_promote_when_text_is_thin() {
        let c = classifier();
        // Enough bytes and raw text to clear the early gates, but three
        // skeleton markers and under 2x min_text_length of content.
        let filler = "x".repeat(1200);
        let text = "short placeholder copy ".repeat(12); // ~276 chars, under 2x threshold
        let html = format!(
            "<html><body class=\"skeleton\"><div class=\"spinner\">{text}</div>\
             <div class=\"shimmer\"></div>\
             <a href=\"/a\">a</a><a href=\"/b\">b</a><a href=\"/c\">c</a>\
             <img src=\"/i.png\"/><!-- {filler} --></body></html>"
        );
        let (promote, reason) = c.should_fallback(Some(&html), 200);
        assert!(promote, "expected skeleton promotion");
        assert!(reason.contains("skeleton"), "reason was: {}", reason);
    }

    #[test]
    fn layout_heavy_page_with_thin_text_promotes() {
        let c = classifier();
        let divs: String = (0..30)
            .map(|i| format!("<div class=\"c{i}\"><p>cell {i} text</p></div>"))
            .collect();
        let links = "<a href=\"/l\">l</a>".repeat(6);
        let html = format!("<html><body>{divs}{links}<img src=\"/p.png\"/></body></html>");
        assert!(html.len() > 1000);
        let (promote, reason) = c.should_fallback(Some(&html), 200);
        assert!(promote);
        assert!(reason.contains("layout-heavy"), "reason was: {}", reason);
    }

    #[test]
    fn large_pages_skip_the_ratio_check() {
        let c = classifier();
        // > 50 KB of markup with comparatively little text: ratio alone must
        // not reject it.
        let noise = format!("<div data-pad=\"{}\"></div>", "m".repeat(400)).repeat(150);
        let text = "real product description text here ".repeat(30);
        let html = format!(
            "<html><body><article><p>{text}</p></article>\
             <a href=\"/a\">a</a><a href=\"/b\">b</a><a href=\"/c\">c</a>\
             <img src=\"/i.png\"/><p>{text}</p>{noise}</body></html>"
        );
        assert!(html.len() > RATIO_STRICT_MAX_BYTES);
        let (promote, reason) = c.should_fallback(Some(&html), 200);
        assert!(!promote, "unexpected promotion: {}", reason);
    }
}
