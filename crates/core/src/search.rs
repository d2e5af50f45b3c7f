//! Search capability: the abstraction over web/image search backends.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::SearchError;

/// Options passed to every search call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Maximum number of results to return
    pub result_count: u32,

    /// Spending ceiling for a single call, in the backend's pricing unit
    pub cost_ceiling: f64,

    /// Marks the call as issued by an agent tool rather than a human
    pub tool_call: bool,
}

/// A single ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,

    /// Canonical URL of the document
    pub url: String,

    /// Extracted body text
    pub content: String,

    /// Backend-specific source identifier (e.g. "web", "wikipedia")
    #[serde(default)]
    pub source: String,

    #[serde(default)]
    pub relevance_score: f64,

    /// Every image referenced by this result, in backend order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_urls: Vec<String>,
}

/// The core search backend trait.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// A human-readable name (e.g., "valyu").
    fn name(&self) -> &str;

    /// Run a query and return ranked results.
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> std::result::Result<Vec<SearchResult>, SearchError>;
}
