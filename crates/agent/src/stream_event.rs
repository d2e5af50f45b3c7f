//! Agent-level streaming events.
//!
//! `AgentStreamEvent` lifts provider chunks and tool outcomes into the events
//! a presentation layer needs: the terminal UI renders them and the tests
//! record them.

use glimpse_core::provider::Usage;
use glimpse_tools::{Citation, ImageAnalysis};
use serde::{Deserialize, Serialize};

/// Events emitted by the orchestration loop during one user turn.
///
/// - `chunk`: narrative text from the model
/// - `tool_call`: a tool is about to run
/// - `tool_result`: a tool finished
/// - `images`: a batch of images was analyzed and should be displayed
/// - `references`: citations gathered from searches this turn
/// - `done`: the turn is complete
/// - `error`: the model stream failed; the turn ends early
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    /// Partial text token from the LLM.
    Chunk { content: String },

    /// The agent is calling a tool.
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Tool execution completed.
    ToolResult {
        id: String,
        name: String,
        output: String,
        success: bool,
    },

    /// Newly analyzed images, in request order.
    Images { analyses: Vec<ImageAnalysis> },

    /// Sources cited by the narrative.
    References { citations: Vec<Citation> },

    /// The turn is complete: final metadata.
    Done {
        usage: Option<Usage>,
        steps: u32,
        tool_calls_made: usize,
        budget_exhausted: bool,
    },

    /// An error occurred mid-stream.
    Error { message: String },
}

impl AgentStreamEvent {
    /// Wire name of this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Images { .. } => "images",
            Self::References { .. } => "references",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}

/// Receives events as the loop produces them.
///
/// Events arrive in the order they happen; an `images` event is always
/// delivered before the model sees the corresponding tool result.
pub trait Presenter: Send {
    fn on_event(&mut self, event: &AgentStreamEvent);
}

/// Collects every event; handy for tests and transcripts.
impl Presenter for Vec<AgentStreamEvent> {
    fn on_event(&mut self, event: &AgentStreamEvent) {
        self.push(event.clone());
    }
}
