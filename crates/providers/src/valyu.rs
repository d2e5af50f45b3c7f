//! Valyu DeepSearch backend.
//!
//! `POST {base}/v1/deepsearch` with an `x-api-key` header. Each result may
//! carry an `image_url` mapping of image references found on the page.

use async_trait::async_trait;
use glimpse_core::error::SearchError;
use glimpse_core::search::{SearchBackend, SearchOptions, SearchResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://api.valyu.network";

/// Search backend over the Valyu DeepSearch API.
pub struct ValyuSearch {
    base_url: String,
    api_key: String,
    search_type: String,
    client: reqwest::Client,
}

impl ValyuSearch {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .unwrap_or_default();

        Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            search_type: "all".into(),
            client,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Restrict the corpus searched ("all", "web", "proprietary").
    pub fn with_search_type(mut self, search_type: impl Into<String>) -> Self {
        self.search_type = search_type.into();
        self
    }

    fn request_body(&self, query: &str, options: &SearchOptions) -> DeepSearchRequest {
        DeepSearchRequest {
            query: query.to_string(),
            max_num_results: options.result_count,
            max_price: options.cost_ceiling,
            is_tool_call: options.tool_call,
            search_type: self.search_type.clone(),
        }
    }
}

#[async_trait]
impl SearchBackend for ValyuSearch {
    fn name(&self) -> &str {
        "valyu"
    }

    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> std::result::Result<Vec<SearchResult>, SearchError> {
        let url = format!("{}/v1/deepsearch", self.base_url);
        let body = self.request_body(query, options);

        debug!(query = %query, max_results = options.result_count, "Sending search request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| SearchError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Search backend returned error");
            return Err(SearchError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let parsed: DeepSearchResponse =
            response.json().await.map_err(|e| SearchError::ApiError {
                status_code: status,
                message: format!("Failed to parse search response: {e}"),
            })?;

        parsed.into_results()
    }
}

// --- Valyu API types ---

#[derive(Debug, Serialize)]
struct DeepSearchRequest {
    query: String,
    max_num_results: u32,
    max_price: f64,
    is_tool_call: bool,
    search_type: String,
}

#[derive(Debug, Deserialize)]
struct DeepSearchResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    results: Vec<DeepSearchResult>,
}

impl DeepSearchResponse {
    fn into_results(self) -> std::result::Result<Vec<SearchResult>, SearchError> {
        if !self.success {
            return Err(SearchError::Rejected(
                self.error
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| "search was not successful".into()),
            ));
        }
        Ok(self.results.into_iter().map(SearchResult::from).collect())
    }
}

#[derive(Debug, Deserialize)]
struct DeepSearchResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: serde_json::Value,
    #[serde(default)]
    source: String,
    #[serde(default)]
    relevance_score: f64,
    #[serde(default)]
    image_url: Option<serde_json::Value>,
}

impl From<DeepSearchResult> for SearchResult {
    fn from(r: DeepSearchResult) -> Self {
        let content = match r.content {
            serde_json::Value::String(s) => s,
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        };
        SearchResult {
            title: r.title,
            url: r.url,
            content,
            source: r.source,
            relevance_score: r.relevance_score,
            image_urls: r.image_url.map(image_refs).unwrap_or_default(),
        }
    }
}

/// Flatten an image reference field: a mapping of name to URL, a list, or a
/// single URL.
fn image_refs(value: serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::String(s) => vec![s],
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        serde_json::Value::Object(map) => map
            .into_iter()
            .filter_map(|(_, v)| v.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_carries_options() {
        let search = ValyuSearch::new("val-test").with_search_type("web");
        let body = search.request_body(
            "quokka",
            &SearchOptions {
                result_count: 7,
                cost_ceiling: 30.0,
                tool_call: true,
            },
        );
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["query"], "quokka");
        assert_eq!(json["max_num_results"], 7);
        assert_eq!(json["max_price"], 30.0);
        assert_eq!(json["is_tool_call"], true);
        assert_eq!(json["search_type"], "web");
    }

    #[test]
    fn parse_results_with_image_mapping() {
        let resp: DeepSearchResponse = serde_json::from_str(
            r#"{
                "success": true,
                "results": [{
                    "title": "Quokka",
                    "url": "https://en.wikipedia.org/wiki/Quokka",
                    "content": "The quokka is a small macropod.",
                    "source": "web",
                    "relevance_score": 0.92,
                    "image_url": {"main": "https://upload.test/quokka.jpg", "logo": "https://upload.test/logo.svg"}
                }]
            }"#,
        )
        .unwrap();

        let results = resp.into_results().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Quokka");
        assert!((results[0].relevance_score - 0.92).abs() < f64::EPSILON);
        assert_eq!(results[0].image_urls.len(), 2);
        assert!(results[0].image_urls.contains(&"https://upload.test/quokka.jpg".to_string()));
    }

    #[test]
    fn unsuccessful_response_is_rejected() {
        let resp: DeepSearchResponse =
            serde_json::from_str(r#"{"success": false, "error": "Insufficient credits"}"#).unwrap();
        let err = resp.into_results().unwrap_err();
        assert!(matches!(err, SearchError::Rejected(m) if m == "Insufficient credits"));
    }

    #[test]
    fn missing_optional_fields_default() {
        let resp: DeepSearchResponse = serde_json::from_str(
            r#"{"success": true, "results": [{"title": "T", "url": "https://a.test"}]}"#,
        )
        .unwrap();
        let results = resp.into_results().unwrap();
        assert!(results[0].content.is_empty());
        assert!(results[0].image_urls.is_empty());
    }

    #[test]
    fn image_refs_accepts_list_and_string() {
        assert_eq!(
            image_refs(serde_json::json!(["https://a.test/1.png", 3])),
            vec!["https://a.test/1.png"]
        );
        assert_eq!(image_refs(serde_json::json!("https://a.test/2.png")).len(), 1);
        assert!(image_refs(serde_json::Value::Null).is_empty());
    }
}
