//! Web search tool: normalizes backend results for the model.
//!
//! The model reads up to five cited text snippets followed by one block that
//! lists every surfaced image URL verbatim. The loop reads the structured
//! [`SearchReport`] carried in the result's `data`.

use std::collections::HashSet;
use std::sync::Arc;

use glimpse_core::search::{SearchBackend, SearchOptions, SearchResult};
use glimpse_core::tool::{SearchArgs, ToolResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Maximum number of text snippets shown to the model.
pub const MAX_SNIPPETS: usize = 5;

/// Maximum characters per snippet.
pub const SNIPPET_CHARS: usize = 1000;

/// Maximum number of image URLs surfaced per search.
pub const MAX_IMAGES: usize = 15;

/// Path suffixes of vector formats that cannot be rasterized.
const VECTOR_EXTENSIONS: [&str; 6] = ["svg", "svgz", "eps", "ai", "emf", "wmf"];

/// A search result as cited in the references section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub relevance_score: f64,
}

/// Structured outcome of one search call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchReport {
    pub success: bool,
    pub query: String,
    #[serde(default)]
    pub results: Vec<Citation>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct WebSearchTool {
    backend: Arc<dyn SearchBackend>,
    cost_ceiling: f64,
}

impl WebSearchTool {
    pub fn new(backend: Arc<dyn SearchBackend>, cost_ceiling: f64) -> Self {
        Self {
            backend,
            cost_ceiling,
        }
    }

    /// Run a search. Backend failures become an unsuccessful result, never an error.
    pub async fn execute(&self, args: &SearchArgs) -> ToolResult {
        let options = SearchOptions {
            result_count: args.max_results,
            cost_ceiling: self.cost_ceiling,
            tool_call: true,
        };

        debug!(backend = self.backend.name(), query = %args.query, "Running web search");

        match self.backend.search(&args.query, &options).await {
            Ok(results) => {
                let report = SearchReport {
                    success: true,
                    query: args.query.clone(),
                    results: results
                        .iter()
                        .map(|r| Citation {
                            title: r.title.clone(),
                            url: r.url.clone(),
                            source: r.source.clone(),
                            relevance_score: r.relevance_score,
                        })
                        .collect(),
                    images: collect_images(&results),
                    error: None,
                };
                ToolResult {
                    call_id: String::new(),
                    success: true,
                    output: format_results(&args.query, &results, &report.images),
                    data: serde_json::to_value(&report).ok(),
                }
            }
            Err(e) => {
                warn!(query = %args.query, error = %e, "Web search failed");
                let report = SearchReport {
                    success: false,
                    query: args.query.clone(),
                    results: Vec::new(),
                    images: Vec::new(),
                    error: Some(e.to_string()),
                };
                ToolResult {
                    call_id: String::new(),
                    success: false,
                    output: format!("Search failed: {e}"),
                    data: serde_json::to_value(&report).ok(),
                }
            }
        }
    }
}

/// Whether the URL's path ends in a vector image extension.
pub fn is_vector_image(image_url: &str) -> bool {
    let path = match url::Url::parse(image_url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => image_url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };

    let Some(file_name) = path.rsplit('/').next() else {
        return false;
    };
    let Some((_, ext)) = file_name.rsplit_once('.') else {
        return false;
    };
    let ext = ext.to_ascii_lowercase();
    VECTOR_EXTENSIONS.contains(&ext.as_str())
}

/// Raster image URLs across all results: deduplicated, in result order, capped.
pub fn collect_images(results: &[SearchResult]) -> Vec<String> {
    let mut seen = HashSet::new();
    results
        .iter()
        .flat_map(|r| r.image_urls.iter())
        .filter(|u| !is_vector_image(u))
        .filter(|u| seen.insert(u.as_str()))
        .take(MAX_IMAGES)
        .cloned()
        .collect()
}

/// Truncate to [`SNIPPET_CHARS`] characters, marking the cut with `…`.
pub fn snippet(content: &str) -> String {
    let content = content.trim();
    match content.char_indices().nth(SNIPPET_CHARS) {
        Some((cut, _)) => format!("{}…", &content[..cut]),
        None => content.to_string(),
    }
}

fn format_results(query: &str, results: &[SearchResult], images: &[String]) -> String {
    let mut out = format!("Search results for \"{query}\":\n");

    if results.is_empty() {
        out.push_str("\nNo results found.\n");
    }

    for (i, r) in results.iter().take(MAX_SNIPPETS).enumerate() {
        out.push_str(&format!(
            "\n{}. [{}]({})\n{}\n",
            i + 1,
            r.title,
            r.url,
            snippet(&r.content)
        ));
    }

    out.push_str("\nImage URLs:\n");
    if images.is_empty() {
        out.push_str("(none)\n");
    }
    for image in images {
        out.push_str(image);
        out.push('\n');
    }

    out
}
