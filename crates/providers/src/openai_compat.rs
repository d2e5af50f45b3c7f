//! OpenAI-compatible provider implementation.
//!
//! Works with OpenAI, OpenRouter and any endpoint exposing
//! `/chat/completions` in the OpenAI shape.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Tool use / function calling
//! - `image_url` content parts for vision requests

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::StreamExt;
use glimpse_core::error::ProviderError;
use glimpse_core::message::{ContentPart, Role, Turn, TurnContent};
use glimpse_core::provider::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::sse::{LineBuffer, data_payload};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .unwrap_or_default();

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create an OpenRouter provider (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Convert the system instruction and turns to OpenAI API format.
    ///
    /// A tool turn can carry several results; each becomes its own `tool` message.
    fn to_api_messages(system: Option<&str>, turns: &[Turn]) -> Vec<ApiMessage> {
        let mut messages = Vec::with_capacity(turns.len() + 1);

        if let Some(sys) = system {
            messages.push(ApiMessage::text("system", sys));
        }

        for turn in turns {
            match (&turn.role, &turn.content) {
                (Role::User, TurnContent::Text(text)) => {
                    messages.push(ApiMessage::text("user", text));
                }
                (Role::User, TurnContent::Parts(parts)) => {
                    let content: Vec<serde_json::Value> = parts
                        .iter()
                        .filter_map(|part| match part {
                            ContentPart::Text { text } => {
                                Some(serde_json::json!({"type": "text", "text": text}))
                            }
                            ContentPart::ImageUrl { url } => Some(serde_json::json!({
                                "type": "image_url",
                                "image_url": {"url": url}
                            })),
                            _ => None,
                        })
                        .collect();
                    messages.push(ApiMessage {
                        role: "user".into(),
                        content: Some(serde_json::Value::Array(content)),
                        tool_calls: None,
                        tool_call_id: None,
                    });
                }
                (Role::Assistant, _) => {
                    let text = turn.text();
                    let tool_calls: Vec<ApiToolCall> = turn
                        .tool_calls()
                        .into_iter()
                        .map(|tc| ApiToolCall {
                            id: tc.id.to_string(),
                            r#type: "function".into(),
                            function: ApiFunction {
                                name: tc.name.to_string(),
                                arguments: tc.arguments.to_string(),
                            },
                        })
                        .collect();
                    if text.is_empty() && tool_calls.is_empty() {
                        continue;
                    }
                    messages.push(ApiMessage {
                        role: "assistant".into(),
                        content: (!text.is_empty()).then(|| serde_json::Value::String(text)),
                        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                        tool_call_id: None,
                    });
                }
                (Role::Tool, _) => {
                    for part in turn.parts() {
                        if let ContentPart::ToolResult { id, output, .. } = part {
                            messages.push(ApiMessage {
                                role: "tool".into(),
                                content: Some(serde_json::Value::String(output)),
                                tool_calls: None,
                                tool_call_id: Some(id),
                            });
                        }
                    }
                }
            }
        }

        messages
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(request.system.as_deref(), &request.turns),
            "temperature": request.temperature,
            "stream": stream,
        });

        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        body
    }

    async fn send(
        &self,
        body: &serde_json::Value,
        stream: bool,
    ) -> std::result::Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl glimpse_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let body = Self::request_body(&request, false);

        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self.send(&body, false).await?;

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        api_response.into_provider_response()
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let body = Self::request_body(&request, true);

        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self.send(&body, true).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        tokio::spawn(forward_sse(response.bytes_stream(), tx, provider_name));

        Ok(rx)
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }
}

/// Parse an OpenAI-style SSE byte stream into chunks on `tx`.
///
/// Text deltas are forwarded as they arrive; tool calls are assembled and
/// delivered whole in the final chunk.
async fn forward_sse<S, B, E>(
    mut byte_stream: S,
    tx: tokio::sync::mpsc::Sender<std::result::Result<StreamChunk, ProviderError>>,
    provider_name: String,
) where
    S: futures::Stream<Item = std::result::Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut lines = LineBuffer::default();
    let mut accumulators = ToolCallAccumulators::default();

    while let Some(chunk_result) = byte_stream.next().await {
        let bytes = match chunk_result {
            Ok(b) => b,
            Err(e) => {
                let _ = tx
                    .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                    .await;
                return;
            }
        };

        for line in lines.push(bytes.as_ref()) {
            if line.starts_with(':') {
                continue;
            }
            let Some(data) = data_payload(&line) else {
                continue;
            };

            if data == "[DONE]" {
                let _ = tx.send(Ok(accumulators.finish(None))).await;
                return;
            }

            let stream_resp = match serde_json::from_str::<StreamResponse>(data) {
                Ok(r) => r,
                Err(e) => {
                    trace!(
                        provider = %provider_name,
                        data = %data,
                        error = %e,
                        "Ignoring unparseable SSE chunk"
                    );
                    continue;
                }
            };

            if let Some(choice) = stream_resp.choices.first() {
                let delta = &choice.delta;

                if let Some(ref tc_deltas) = delta.tool_calls {
                    accumulators.apply(tc_deltas);
                }

                if delta.content.as_ref().is_some_and(|c| !c.is_empty()) {
                    let chunk = StreamChunk {
                        content: delta.content.clone(),
                        ..StreamChunk::default()
                    };
                    if tx.send(Ok(chunk)).await.is_err() {
                        return; // receiver dropped
                    }
                }
            }

            // Usage arrives in the last chunk when stream_options asks for it
            if let Some(usage) = stream_resp.usage {
                let _ = tx.send(Ok(accumulators.finish(Some(usage.into())))).await;
                return;
            }
        }
    }

    // Stream ended without [DONE]: send final chunk
    let _ = tx.send(Ok(accumulators.finish(None))).await;
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ApiMessage {
    fn text(role: &str, text: &str) -> Self {
        Self {
            role: role.into(),
            content: Some(serde_json::Value::String(text.to_string())),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

impl ApiResponse {
    fn into_provider_response(self) -> std::result::Result<ProviderResponse, ProviderError> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 200,
                message: "No choices in response".into(),
            })?;

        let content = match choice.message.content {
            Some(serde_json::Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        };

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| RawToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        Ok(ProviderResponse {
            content,
            tool_calls,
            usage: self.usage.map(Usage::from),
            model: self.model,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta: arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Incremental tool call deltas keyed by index, in index order.
#[derive(Default)]
struct ToolCallAccumulators {
    calls: BTreeMap<u32, RawToolCall>,
}

impl ToolCallAccumulators {
    fn apply(&mut self, deltas: &[StreamToolCallDelta]) {
        for delta in deltas {
            let acc = self.calls.entry(delta.index).or_insert_with(|| RawToolCall {
                id: String::new(),
                name: String::new(),
                arguments: String::new(),
            });

            if let Some(ref id) = delta.id {
                acc.id = id.clone();
            }
            if let Some(ref func) = delta.function {
                if let Some(ref name) = func.name {
                    acc.name = name.clone();
                }
                if let Some(ref args) = func.arguments {
                    acc.arguments.push_str(args);
                }
            }
        }
    }

    fn finish(&mut self, usage: Option<Usage>) -> StreamChunk {
        StreamChunk {
            content: None,
            tool_calls: std::mem::take(&mut self.calls).into_values().collect(),
            done: true,
            usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glimpse_core::Provider;

    #[test]
    fn openrouter_constructor() {
        let provider = OpenAiCompatProvider::openrouter("sk-test");
        assert_eq!(provider.name(), "openrouter");
        assert!(provider.base_url.contains("openrouter.ai"));
    }

    #[test]
    fn system_instruction_leads_the_messages() {
        let api_messages =
            OpenAiCompatProvider::to_api_messages(Some("You are helpful"), &[Turn::user("Hello")]);
        assert_eq!(api_messages.len(), 2);
        assert_eq!(api_messages[0].role, "system");
        assert_eq!(api_messages[1].role, "user");
    }

    #[test]
    fn tool_definition_conversion() {
        let tools = vec![ToolDefinition {
            name: "web_search".into(),
            description: "Search the web".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let api_tools = OpenAiCompatProvider::to_api_tools(&tools);
        assert_eq!(api_tools.len(), 1);
        assert_eq!(api_tools[0].function.name, "web_search");
        assert_eq!(api_tools[0].r#type, "function");
    }

    #[test]
    fn assistant_tool_calls_serialize_arguments_as_strings() {
        let turn = Turn::assistant_parts(vec![ContentPart::ToolCall {
            id: "call_1".into(),
            name: "web_search".into(),
            arguments: serde_json::json!({"query": "quokka"}),
        }]);
        let api_msgs = OpenAiCompatProvider::to_api_messages(None, &[turn]);
        assert_eq!(api_msgs.len(), 1);
        assert!(api_msgs[0].content.is_none());
        let tc = api_msgs[0].tool_calls.as_ref().unwrap();
        assert_eq!(tc[0].function.name, "web_search");
        let args: serde_json::Value = serde_json::from_str(&tc[0].function.arguments).unwrap();
        assert_eq!(args["query"], "quokka");
    }

    #[test]
    fn tool_results_become_tool_messages() {
        let turn = Turn::tool_result("call_1", "web_search", "result data", false);
        let api_msgs = OpenAiCompatProvider::to_api_messages(None, &[turn]);
        assert_eq!(api_msgs[0].role, "tool");
        assert_eq!(api_msgs[0].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(api_msgs[0].content, Some(serde_json::json!("result data")));
    }

    #[test]
    fn image_parts_become_image_url_content() {
        let turn = Turn::user_parts(vec![
            ContentPart::Text {
                text: "Describe".into(),
            },
            ContentPart::ImageUrl {
                url: "https://img.test/a.png".into(),
            },
        ]);
        let api_msgs = OpenAiCompatProvider::to_api_messages(None, &[turn]);
        let content = api_msgs[0].content.as_ref().unwrap();
        assert_eq!(content[1]["type"], "image_url");
        assert_eq!(content[1]["image_url"]["url"], "https://img.test/a.png");
    }

    #[test]
    fn stream_body_requests_usage() {
        let request = ProviderRequest::new("gpt-4o", vec![Turn::user("hi")]);
        let body = OpenAiCompatProvider::request_body(&request, true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn parse_completion_with_tool_calls() {
        let resp: ApiResponse = serde_json::from_str(
            r#"{
                "model": "gpt-4o",
                "choices": [{"message": {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "call_9", "type": "function", "function": {"name": "web_search", "arguments": "{\"query\":\"quokka\"}"}}
                ]}}],
                "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
            }"#,
        )
        .unwrap();
        let pr = resp.into_provider_response().unwrap();
        assert_eq!(pr.content, "");
        assert_eq!(pr.tool_calls[0].id, "call_9");
        assert_eq!(pr.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn empty_choices_is_an_error() {
        let resp: ApiResponse =
            serde_json::from_str(r#"{"model": "gpt-4o", "choices": []}"#).unwrap();
        assert!(resp.into_provider_response().is_err());
    }

    // --- SSE parsing tests ---

    #[test]
    fn parse_stream_content_delta() {
        let data = r#"{"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.choices[0].delta.content.as_deref(), Some("Hello"));
    }

    #[test]
    fn parse_stream_usage() {
        let data = r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        let usage: Usage = parsed.usage.unwrap().into();
        assert_eq!(usage.total_tokens, 15);
    }

    #[test]
    fn accumulators_assemble_parallel_calls_in_index_order() {
        let first = r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_b","function":{"name":"web_search","arguments":""}},{"index":0,"id":"call_a","function":{"name":"web_search","arguments":"{\"query\""}}]}}]}"#;
        let second = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":":\"quokka\"}"}},{"index":1,"function":{"arguments":"{}"}}]}}]}"#;

        let mut acc = ToolCallAccumulators::default();
        for data in [first, second] {
            let parsed: StreamResponse = serde_json::from_str(data).unwrap();
            acc.apply(parsed.choices[0].delta.tool_calls.as_ref().unwrap());
        }

        let chunk = acc.finish(None);
        assert!(chunk.done);
        assert_eq!(chunk.tool_calls.len(), 2);
        assert_eq!(chunk.tool_calls[0].id, "call_a");
        assert_eq!(chunk.tool_calls[0].arguments, r#"{"query":"quokka"}"#);
        assert_eq!(chunk.tool_calls[1].id, "call_b");
    }

    async fn collect(parts: Vec<Vec<u8>>) -> Vec<StreamChunk> {
        let stream = futures::stream::iter(
            parts
                .into_iter()
                .map(Ok::<_, std::io::Error>)
                .collect::<Vec<_>>(),
        );
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        forward_sse(stream, tx, "test".into()).await;

        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk.unwrap());
        }
        chunks
    }

    #[tokio::test]
    async fn character_split_across_reads_survives() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"café\"}}]}\n\ndata: [DONE]\n";
        let bytes = body.as_bytes();
        let split = bytes.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let chunks = collect(vec![bytes[..split].to_vec(), bytes[split..].to_vec()]).await;

        let text: String = chunks.iter().filter_map(|c| c.content.clone()).collect();
        assert_eq!(text, "café");
        assert!(chunks.last().unwrap().done);
    }
}
