//! Turn domain types.
//!
//! A [`Turn`] is one entry of the conversation log: the user's input, the
//! assistant's output (text and/or tool-call requests), or a tool result.
//! Turns are immutable value objects; the log that holds them is append-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of a turn's author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The language model
    Assistant,
    /// Tool execution result
    Tool,
}

/// One typed part of a multi-part turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text { text: String },

    /// A tool invocation requested by the assistant.
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },

    /// The outcome of a tool invocation.
    ToolResult {
        id: String,
        name: String,
        output: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },

    /// A remote image handed to a vision model. Only built for one-shot
    /// description requests, never appended to the conversation log.
    ImageUrl { url: String },
}

/// The content of a turn: plain text or an ordered list of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// A single entry in the conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Unique turn ID
    pub id: String,

    /// Who produced this turn
    pub role: Role,

    /// Text or typed parts
    pub content: TurnContent,

    /// When the turn was created
    pub timestamp: DateTime<Utc>,
}

/// A tool call as carried inside an assistant turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRef<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub arguments: &'a serde_json::Value,
}

impl Turn {
    fn with_content(role: Role, content: TurnContent) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            timestamp: Utc::now(),
        }
    }

    /// Create a new user turn.
    pub fn user(text: impl Into<String>) -> Self {
        Self::with_content(Role::User, TurnContent::Text(text.into()))
    }

    /// Create a plain-text assistant turn.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_content(Role::Assistant, TurnContent::Text(text.into()))
    }

    /// Create an assistant turn from explicit parts.
    pub fn assistant_parts(parts: Vec<ContentPart>) -> Self {
        Self::with_content(Role::Assistant, TurnContent::Parts(parts))
    }

    /// Create a user turn from explicit parts (used for vision requests).
    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self::with_content(Role::User, TurnContent::Parts(parts))
    }

    /// Create a tool result turn.
    pub fn tool_result(
        call_id: impl Into<String>,
        name: impl Into<String>,
        output: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::with_content(
            Role::Tool,
            TurnContent::Parts(vec![ContentPart::ToolResult {
                id: call_id.into(),
                name: name.into(),
                output: output.into(),
                is_error,
            }]),
        )
    }

    /// Concatenated text of the turn (text parts only).
    pub fn text(&self) -> String {
        match &self.content {
            TurnContent::Text(t) => t.clone(),
            TurnContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    /// All parts of this turn, with plain text presented as a single text part.
    pub fn parts(&self) -> Vec<ContentPart> {
        match &self.content {
            TurnContent::Text(t) => vec![ContentPart::Text { text: t.clone() }],
            TurnContent::Parts(parts) => parts.clone(),
        }
    }

    /// Tool calls requested in this turn, in order.
    pub fn tool_calls(&self) -> Vec<ToolCallRef<'_>> {
        match &self.content {
            TurnContent::Text(_) => Vec::new(),
            TurnContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::ToolCall {
                        id,
                        name,
                        arguments,
                    } => Some(ToolCallRef {
                        id,
                        name,
                        arguments,
                    }),
                    _ => None,
                })
                .collect(),
        }
    }

    /// Whether this turn carries any tool-call or tool-result part.
    pub fn has_tool_parts(&self) -> bool {
        match &self.content {
            TurnContent::Text(_) => false,
            TurnContent::Parts(parts) => parts.iter().any(|p| {
                matches!(
                    p,
                    ContentPart::ToolCall { .. } | ContentPart::ToolResult { .. }
                )
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_turn() {
        let turn = Turn::user("What does a quokka look like?");
        assert_eq!(turn.role, Role::User);
        assert_eq!(turn.text(), "What does a quokka look like?");
        assert!(turn.tool_calls().is_empty());
        assert!(!turn.has_tool_parts());
    }

    #[test]
    fn assistant_parts_expose_tool_calls_in_order() {
        let turn = Turn::assistant_parts(vec![
            ContentPart::Text {
                text: "Searching.".into(),
            },
            ContentPart::ToolCall {
                id: "call_1".into(),
                name: "web_search".into(),
                arguments: serde_json::json!({"query": "quokka"}),
            },
            ContentPart::ToolCall {
                id: "call_2".into(),
                name: "analyze_images".into(),
                arguments: serde_json::json!({"urls": []}),
            },
        ]);
        let calls = turn.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "web_search");
        assert_eq!(calls[1].id, "call_2");
        assert_eq!(turn.text(), "Searching.");
        assert!(turn.has_tool_parts());
    }

    #[test]
    fn text_content_serializes_as_plain_string() {
        let turn = Turn::user("hello");
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["content"], "hello");
        assert_eq!(json["role"], "user");
    }

    #[test]
    fn turn_serialization_roundtrip() {
        let turn = Turn::tool_result("call_9", "web_search", "no results", true);
        let json = serde_json::to_string(&turn).unwrap();
        let back: Turn = serde_json::from_str(&json).unwrap();
        assert_eq!(back, turn);
        assert!(json.contains(r#""type":"tool_result""#));
    }

    #[test]
    fn successful_tool_result_omits_error_flag() {
        let turn = Turn::tool_result("call_1", "web_search", "ok", false);
        let json = serde_json::to_string(&turn).unwrap();
        assert!(!json.contains("is_error"));
    }
}
