use crate::core::types::{BatchSummary, FetchMethod, FetchStatus, UrlResult};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// Collects per-URL outcomes across phases and reassembles them in input
/// order. Single writer: only the orchestrator appends.
pub struct ResultAggregator {
    urls: Vec<String>,
    /// Input positions per URL; duplicates in the input each get a slot.
    positions: HashMap<String, Vec<usize>>,
    slots: Vec<Option<UrlResult>>,
}

impl ResultAggregator {
    pub fn new(urls: &[String]) -> Self {
        let mut positions: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, url) in urls.iter().enumerate() {
            positions.entry(url.clone()).or_default().push(index);
        }
        Self {
            urls: urls.to_vec(),
            positions,
            slots: vec![None; urls.len()],
        }
    }

    /// Record the outcome for a URL. `status` is normalized so that success
    /// always implies a non-empty HTML body.
    pub fn add_result(
        &mut self,
        url: &str,
        html: Option<String>,
        method: FetchMethod,
        status: FetchStatus,
        error: Option<String>,
    ) {
        let has_html = html.as_deref().is_some_and(|h| !h.is_empty());
        let (status, html, error) = match (status, has_html) {
            (FetchStatus::Success, true) => (FetchStatus::Success, html, None),
            (FetchStatus::Success, false) => (
                FetchStatus::Failed,
                None,
                Some(error.unwrap_or_else(|| "empty HTML content".to_string())),
            ),
            (FetchStatus::Failed, _) => (
                FetchStatus::Failed,
                None,
                Some(error.unwrap_or_else(|| "unknown error".to_string())),
            ),
        };

        let Some(indexes) = self.positions.get(url) else {
            warn!("Result for unknown URL dropped: {}", url);
            return;
        };
        for &index in indexes {
            self.slots[index] = Some(UrlResult {
                url: url.to_string(),
                html: html.clone(),
                method: Some(method),
                status,
                error: error.clone(),
            });
        }
    }

    /// Assemble results in input order plus the summary counters.
    pub fn finalize(self, total_time: f64) -> (Vec<UrlResult>, BatchSummary) {
        let mut results = Vec::with_capacity(self.urls.len());
        for (index, slot) in self.slots.into_iter().enumerate() {
            match slot {
                Some(result) => results.push(result),
                None => {
                    warn!("No result recorded for {}", self.urls[index]);
                    results.push(UrlResult {
                        url: self.urls[index].clone(),
                        html: None,
                        method: None,
                        status: FetchStatus::Failed,
                        error: Some("no result recorded".to_string()),
                    });
                }
            }
        }

        let success = results
            .iter()
            .filter(|r| r.status == FetchStatus::Success)
            .count();
        let mut by_method: BTreeMap<String, usize> = BTreeMap::new();
        for result in &results {
            let label = result
                .method
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            *by_method.entry(label).or_insert(0) += 1;
        }

        let summary = BatchSummary {
            total: results.len(),
            success,
            failed: results.len() - success,
            by_method,
            total_time,
        };
        (results, summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn results_come_back_in_input_order() {
        let input = urls(&["https://a.example/", "https://b.example/", "https://c.example/"]);
        let mut agg = ResultAggregator::new(&input);
        agg.add_result(
            "https://c.example/",
            Some("<html>c</html>".into()),
            FetchMethod::Decodo,
            FetchStatus::Success,
            None,
        );
        agg.add_result(
            "https://a.example/",
            Some("<html>a</html>".into()),
            FetchMethod::Static,
            FetchStatus::Success,
            None,
        );
        agg.add_result(
            "https://b.example/",
            None,
            FetchMethod::CustomJs,
            FetchStatus::Failed,
            Some("render failed".into()),
        );

        let (results, summary) = agg.finalize(1.5);
        assert_eq!(results.len(), 3);
        for (result, url) in results.iter().zip(&input) {
            assert_eq!(&result.url, url);
        }
        assert_eq!(summary.total, 3);
        assert_eq!(summary.success, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.by_method.values().sum::<usize>(), summary.total);
        assert_eq!(summary.by_method.get("static"), Some(&1));
        assert_eq!(summary.by_method.get("custom_js"), Some(&1));
        assert_eq!(summary.by_method.get("decodo"), Some(&1));
    }

    #[test]
    fn success_requires_non_empty_html() {
        let input = urls(&["https://a.example/"]);
        let mut agg = ResultAggregator::new(&input);
        agg.add_result(
            "https://a.example/",
            Some(String::new()),
            FetchMethod::Static,
            FetchStatus::Success,
            None,
        );
        let (results, summary) = agg.finalize(0.1);
        assert_eq!(results[0].status, FetchStatus::Failed);
        assert!(results[0].error.is_some());
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn duplicate_input_urls_each_get_a_slot() {
        let input = urls(&["https://a.example/", "https://a.example/"]);
        let mut agg = ResultAggregator::new(&input);
        agg.add_result(
            "https://a.example/",
            Some("<html>a</html>".into()),
            FetchMethod::Static,
            FetchStatus::Success,
            None,
        );
        let (results, summary) = agg.finalize(0.2);
        assert_eq!(results.len(), 2);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.success, 2);
    }
}
