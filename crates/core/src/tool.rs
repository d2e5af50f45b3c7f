//! Tool definitions and boundary validation.
//!
//! The agent exposes exactly two tools to the model. Their argument shapes are
//! fixed, so a call is parsed into a [`ToolInvocation`] before dispatch and
//! malformed arguments never reach an adapter.

use serde::{Deserialize, Serialize};
use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// Wire name of the search tool.
pub const WEB_SEARCH: &str = "web_search";

/// Wire name of the image analysis tool.
pub const ANALYZE_IMAGES: &str = "analyze_images";

/// Default number of search results.
pub const DEFAULT_RESULT_COUNT: u32 = 5;

/// Upper bound on search results per call.
pub const MAX_RESULT_COUNT: u32 = 20;

/// The tools the agent can offer to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    Search,
    AnalyzeImages,
}

impl ToolKind {
    /// Every tool, in the order they are advertised.
    pub const ALL: [ToolKind; 2] = [ToolKind::Search, ToolKind::AnalyzeImages];

    /// Wire name sent to the model.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Search => WEB_SEARCH,
            Self::AnalyzeImages => ANALYZE_IMAGES,
        }
    }

    /// Resolve a wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            WEB_SEARCH => Some(Self::Search),
            ANALYZE_IMAGES => Some(Self::AnalyzeImages),
            _ => None,
        }
    }

    /// A description of what this tool does (sent to the LLM).
    pub fn description(&self) -> &'static str {
        match self {
            Self::Search => {
                "Search the web. Returns up to 5 text snippets with [Title](URL) citations, \
                 followed by a list of image URLs found on the result pages."
            }
            Self::AnalyzeImages => {
                "Download, describe and display images. Pass every image URL returned by \
                 web_search in this turn, verbatim, in a single call."
            }
        }
    }

    /// JSON Schema describing this tool's parameters.
    pub fn parameters_schema(&self) -> serde_json::Value {
        match self {
            Self::Search => serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query"
                    },
                    "max_results": {
                        "type": "integer",
                        "description": "Number of results to return (1-20, default 5)",
                        "minimum": 1,
                        "maximum": MAX_RESULT_COUNT,
                        "default": DEFAULT_RESULT_COUNT
                    }
                },
                "required": ["query"]
            }),
            Self::AnalyzeImages => serde_json::json!({
                "type": "object",
                "properties": {
                    "urls": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Image URLs exactly as returned by web_search"
                    }
                },
                "required": ["urls"]
            }),
        }
    }

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }

    /// Definitions for every tool.
    pub fn definitions() -> Vec<ToolDefinition> {
        Self::ALL.iter().map(|k| k.to_definition()).collect()
    }
}

/// Validated arguments of a search call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchArgs {
    pub query: String,

    /// Already clamped to 1..=20
    pub max_results: u32,
}

/// Validated arguments of an image analysis call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeImagesArgs {
    pub urls: Vec<String>,
}

/// A tool call whose arguments have been validated.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInvocation {
    Search(SearchArgs),
    AnalyzeImages(AnalyzeImagesArgs),
}

impl ToolInvocation {
    /// Validate a raw call against the fixed argument shape of its tool.
    pub fn parse(name: &str, arguments: &serde_json::Value) -> Result<Self, ToolError> {
        let kind = ToolKind::from_name(name).ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        match kind {
            ToolKind::Search => {
                let query = arguments["query"]
                    .as_str()
                    .map(str::trim)
                    .filter(|q| !q.is_empty())
                    .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;
                let max_results = arguments["max_results"]
                    .as_u64()
                    .unwrap_or(DEFAULT_RESULT_COUNT as u64)
                    .clamp(1, MAX_RESULT_COUNT as u64) as u32;
                Ok(Self::Search(SearchArgs {
                    query: query.to_string(),
                    max_results,
                }))
            }
            ToolKind::AnalyzeImages => {
                let urls = arguments["urls"]
                    .as_array()
                    .ok_or_else(|| ToolError::InvalidArguments("Missing 'urls' array".into()))?;
                let mut parsed = Vec::with_capacity(urls.len());
                for url in urls {
                    let url = url
                        .as_str()
                        .map(str::trim)
                        .ok_or_else(|| ToolError::InvalidArguments("'urls' must contain strings".into()))?;
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        return Err(ToolError::InvalidArguments(format!(
                            "Not an http(s) URL: {url}"
                        )));
                    }
                    parsed.push(url.to_string());
                }
                if parsed.is_empty() {
                    return Err(ToolError::InvalidArguments("'urls' must not be empty".into()));
                }
                Ok(Self::AnalyzeImages(AnalyzeImagesArgs { urls: parsed }))
            }
        }
    }
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content (what the model reads)
    pub output: String,

    /// Optional structured data (what the loop reads)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolResult {
    /// An error result the model can narrate.
    pub fn error(call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            success: false,
            output: message.into(),
            data: None,
        }
    }
}
