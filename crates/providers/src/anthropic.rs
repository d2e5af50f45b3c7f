//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly (not OpenAI-compatible proxy).
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - URL image blocks for one-shot vision requests
//! - Streaming via SSE with `content_block_delta` events

use async_trait::async_trait;
use futures::StreamExt;
use glimpse_core::error::ProviderError;
use glimpse_core::message::{ContentPart, Role, Turn, TurnContent};
use glimpse_core::provider::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::sse::{LineBuffer, data_payload};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .unwrap_or_default();

        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Convert turns to Anthropic API format with content blocks.
    ///
    /// Tool results become `user` messages; consecutive block messages of the
    /// same role are merged so parallel tool results share one message.
    fn to_api_messages(turns: &[Turn]) -> Vec<AnthropicMessage> {
        let mut result: Vec<AnthropicMessage> = Vec::new();

        for turn in turns {
            let role = match turn.role {
                Role::User | Role::Tool => "user",
                Role::Assistant => "assistant",
            };

            let content = match &turn.content {
                TurnContent::Text(text) => {
                    if text.is_empty() {
                        continue;
                    }
                    AnthropicContent::Text(text.clone())
                }
                TurnContent::Parts(parts) => {
                    let blocks: Vec<ContentBlock> =
                        parts.iter().filter_map(Self::to_content_block).collect();
                    if blocks.is_empty() {
                        continue;
                    }
                    AnthropicContent::Blocks(blocks)
                }
            };

            if let (Some(last), AnthropicContent::Blocks(new_blocks)) = (result.last_mut(), &content) {
                if last.role == role {
                    if let AnthropicContent::Blocks(existing) = &mut last.content {
                        existing.extend(new_blocks.iter().cloned());
                        continue;
                    }
                }
            }

            result.push(AnthropicMessage {
                role: role.into(),
                content,
            });
        }

        result
    }

    fn to_content_block(part: &ContentPart) -> Option<ContentBlock> {
        match part {
            ContentPart::Text { text } if text.is_empty() => None,
            ContentPart::Text { text } => Some(ContentBlock::Text { text: text.clone() }),
            ContentPart::ToolCall {
                id,
                name,
                arguments,
            } => Some(ContentBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: arguments.clone(),
            }),
            ContentPart::ToolResult {
                id,
                output,
                is_error,
                ..
            } => Some(ContentBlock::ToolResult {
                tool_use_id: id.clone(),
                content: output.clone(),
                is_error: *is_error,
            }),
            ContentPart::ImageUrl { url } => Some(ContentBlock::Image {
                source: ImageSource {
                    kind: "url".into(),
                    url: url.clone(),
                },
            }),
        }
    }

    /// Convert tool definitions to Anthropic format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.turns),
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature,
        });

        if stream {
            body["stream"] = serde_json::json!(true);
        }

        if let Some(ref sys) = request.system {
            body["system"] = serde_json::json!(sys);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        body
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            });
        }
        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid Anthropic API key".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl glimpse_core::Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = Self::request_body(&request, false);

        debug!(provider = "anthropic", model = %request.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let response = Self::check_status(response).await?;

        let api_resp: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse Anthropic response: {e}"),
            })?;

        Ok(Self::response_to_provider_response(api_resp))
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = Self::request_body(&request, true);

        debug!(provider = "anthropic", model = %request.model, "Sending streaming request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let response = Self::check_status(response).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(forward_sse(response.bytes_stream(), tx));

        Ok(rx)
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        // Try a minimal request to verify API key
        let url = format!("{}/v1/messages", self.base_url);
        let body = serde_json::json!({
            "model": "claude-3-5-haiku-20241022",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 1,
        });

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        // 200 = works, 401 = bad key, anything else = reachable but error
        Ok(response.status().is_success() || response.status().as_u16() != 401)
    }
}

impl AnthropicProvider {
    /// Convert Anthropic API response to our ProviderResponse.
    fn response_to_provider_response(resp: AnthropicResponse) -> ProviderResponse {
        let mut content = String::new();
        let mut tool_calls = Vec::new();

        for block in &resp.content {
            match block {
                ResponseContentBlock::Text { text } => {
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str(text);
                }
                ResponseContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(RawToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        arguments: serde_json::to_string(input).unwrap_or_default(),
                    });
                }
                ResponseContentBlock::Other => {}
            }
        }

        ProviderResponse {
            content,
            tool_calls,
            usage: Some(Usage {
                prompt_tokens: resp.usage.input_tokens,
                completion_tokens: resp.usage.output_tokens,
                total_tokens: resp.usage.input_tokens + resp.usage.output_tokens,
            }),
            model: resp.model,
        }
    }
}

/// Parse an Anthropic SSE byte stream into chunks on `tx`.
async fn forward_sse<S, B, E>(
    mut byte_stream: S,
    tx: tokio::sync::mpsc::Sender<std::result::Result<StreamChunk, ProviderError>>,
) where
    S: futures::Stream<Item = std::result::Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut lines = LineBuffer::default();
    let mut state = SseState::default();

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
            // Anthropic uses typed events; the data payload repeats the type.
            let Some(data) = data_payload(&line) else {
                continue;
            };

            let event: serde_json::Value = match serde_json::from_str(data) {
                Ok(v) => v,
                Err(e) => {
                    trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                    continue;
                }
            };

            match state.apply(&event) {
                SseStep::Continue => {}
                SseStep::Emit(chunk) => {
                    if tx.send(Ok(chunk)).await.is_err() {
                        return;
                    }
                }
                SseStep::Finish(chunk) => {
                    let _ = tx.send(Ok(chunk)).await;
                    return;
                }
                SseStep::Fail(err) => {
                    let _ = tx.send(Err(err)).await;
                    return;
                }
            }
        }
    }

    // Stream ended without message_stop: send final chunk
    let _ = tx.send(Ok(state.finish())).await;
}

// --- SSE accumulation ---

/// Accumulates typed Anthropic stream events into chunks.
#[derive(Default)]
struct SseState {
    current_tool_id: String,
    current_tool_name: String,
    tool_args_buffer: String,
    in_tool_use: bool,
    tool_calls: Vec<RawToolCall>,
    input_tokens: u32,
    output_tokens: u32,
}

enum SseStep {
    Continue,
    Emit(StreamChunk),
    Finish(StreamChunk),
    Fail(ProviderError),
}

impl SseState {
    fn close_tool(&mut self) {
        if self.in_tool_use {
            let arguments = std::mem::take(&mut self.tool_args_buffer);
            self.tool_calls.push(RawToolCall {
                id: std::mem::take(&mut self.current_tool_id),
                name: std::mem::take(&mut self.current_tool_name),
                // A tool_use with no input deltas has an empty object as input
                arguments: if arguments.is_empty() { "{}".into() } else { arguments },
            });
            self.in_tool_use = false;
        }
    }

    fn apply(&mut self, event: &serde_json::Value) -> SseStep {
        match event["type"].as_str().unwrap_or("") {
            "message_start" => {
                if let Some(n) = event["message"]["usage"]["input_tokens"].as_u64() {
                    self.input_tokens = n as u32;
                }
                SseStep::Continue
            }
            "content_block_start" => {
                let block = &event["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    self.close_tool();
                    self.current_tool_id = block["id"].as_str().unwrap_or("").to_string();
                    self.current_tool_name = block["name"].as_str().unwrap_or("").to_string();
                    self.tool_args_buffer.clear();
                    self.in_tool_use = true;
                }
                SseStep::Continue
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => match delta["text"].as_str() {
                        Some(text) => SseStep::Emit(StreamChunk {
                            content: Some(text.to_string()),
                            ..StreamChunk::default()
                        }),
                        None => SseStep::Continue,
                    },
                    "input_json_delta" => {
                        if let Some(partial) = delta["partial_json"].as_str() {
                            self.tool_args_buffer.push_str(partial);
                        }
                        SseStep::Continue
                    }
                    _ => SseStep::Continue,
                }
            }
            "content_block_stop" => {
                self.close_tool();
                SseStep::Continue
            }
            "message_delta" => {
                if let Some(n) = event["usage"]["output_tokens"].as_u64() {
                    self.output_tokens = n as u32;
                }
                SseStep::Continue
            }
            "message_stop" => SseStep::Finish(self.finish()),
            "error" => SseStep::Fail(ProviderError::StreamInterrupted(
                event["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown stream error")
                    .to_string(),
            )),
            _ => SseStep::Continue,
        }
    }

    fn finish(&mut self) -> StreamChunk {
        self.close_tool();
        let usage = (self.input_tokens + self.output_tokens > 0).then(|| Usage {
            prompt_tokens: self.input_tokens,
            completion_tokens: self.output_tokens,
            total_tokens: self.input_tokens + self.output_tokens,
        });
        StreamChunk {
            content: None,
            tool_calls: std::mem::take(&mut self.tool_calls),
            done: true,
            usage,
        }
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
    #[serde(rename = "image")]
    Image { source: ImageSource },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImageSource {
    #[serde(rename = "type")]
    kind: String,
    url: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}
