//! Tool implementations for Glimpse.
//!
//! Two tools are offered to the model: `web_search`, backed by a
//! [`SearchBackend`](glimpse_core::SearchBackend), and `analyze_images`, backed
//! by the concurrent [`ImagePipeline`]. The [`ToolBox`] owns both and is what
//! the orchestration loop dispatches to.

pub mod image_pipeline;
pub mod web_search;

use glimpse_core::provider::ToolDefinition;
use glimpse_core::tool::{SearchArgs, ToolKind, ToolResult};

pub use image_pipeline::{
    Description, FetchError, HttpImageFetcher, ImageAnalysis, ImageFetcher, ImagePipeline,
};
pub use web_search::{Citation, SearchReport, WebSearchTool};

/// The tools available to one session.
pub struct ToolBox {
    search: Option<WebSearchTool>,
    images: ImagePipeline,
}

impl ToolBox {
    /// `search` is `None` when no search credential is configured; search
    /// calls then fail with an explanation the model can relay.
    pub fn new(search: Option<WebSearchTool>, images: ImagePipeline) -> Self {
        Self { search, images }
    }

    /// Tool definitions sent to the model.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        ToolKind::definitions()
    }

    pub fn has_search(&self) -> bool {
        self.search.is_some()
    }

    /// Run a validated search call.
    pub async fn search(&self, call_id: &str, args: &SearchArgs) -> ToolResult {
        let mut result = match &self.search {
            Some(tool) => tool.execute(args).await,
            None => ToolResult::error(
                call_id,
                "Web search is not configured. Set VALYU_API_KEY to enable it.",
            ),
        };
        result.call_id = call_id.to_string();
        result
    }

    pub fn images(&self) -> &ImagePipeline {
        &self.images
    }

    /// Wrap analyzed images as the tool result returned to the model.
    pub fn analysis_result(call_id: &str, analyses: &[ImageAnalysis]) -> ToolResult {
        ToolResult {
            call_id: call_id.to_string(),
            success: true,
            output: image_pipeline::format_analyses(analyses),
            data: serde_json::to_value(analyses).ok(),
        }
    }
}
