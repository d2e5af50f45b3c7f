//! Shared test helpers for loop tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use glimpse_core::error::{ProviderError, SearchError};
use glimpse_core::provider::{
    ChunkReceiver, Provider, ProviderRequest, ProviderResponse, RawToolCall, StreamChunk, Usage,
};
use glimpse_core::search::{SearchBackend, SearchOptions, SearchResult};
use glimpse_session::{ConversationLog, ImageIdAllocator};
use glimpse_tools::{FetchError, ImageFetcher, ImagePipeline, ToolBox, WebSearchTool};

use crate::loop_runner::AgentLoop;

type Step = Vec<Result<StreamChunk, ProviderError>>;

static NEXT_CALL: AtomicUsize = AtomicUsize::new(1);

/// A mock provider that streams a sequence of scripted steps.
///
/// Each call to `stream` plays the next step. Panics if more calls are made
/// than steps provided.
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted_mock"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::NotConfigured("scripted_mock only streams".into()))
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .expect("ScriptedProvider: no more steps");

        let (tx, rx) = tokio::sync::mpsc::channel(step.len().max(1));
        for chunk in step {
            tx.send(chunk).await.unwrap();
        }
        Ok(rx)
    }
}

fn usage() -> Usage {
    Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    }
}

fn text_chunk(text: &str) -> Result<StreamChunk, ProviderError> {
    Ok(StreamChunk {
        content: Some(text.to_string()),
        ..Default::default()
    })
}

/// A step that streams `deltas` and finishes without tool calls.
pub fn text_step(deltas: &[&str]) -> Step {
    let mut step: Step = deltas.iter().map(|d| text_chunk(d)).collect();
    step.push(Ok(StreamChunk {
        done: true,
        usage: Some(usage()),
        ..Default::default()
    }));
    step
}

/// A step that requests one tool call.
pub fn tool_step(name: &str, arguments: serde_json::Value) -> Step {
    tool_step_with_text("", name, arguments)
}

/// A step that says something, then requests one tool call.
pub fn tool_step_with_text(text: &str, name: &str, arguments: serde_json::Value) -> Step {
    let mut step = Vec::new();
    if !text.is_empty() {
        step.push(text_chunk(text));
    }
    step.push(Ok(StreamChunk {
        tool_calls: vec![RawToolCall {
            id: format!("call_{}", NEXT_CALL.fetch_add(1, Ordering::Relaxed)),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }],
        done: true,
        usage: Some(usage()),
        ..Default::default()
    }));
    step
}

/// A step whose stream breaks after one delta.
pub fn failing_step(partial: &str) -> Step {
    vec![
        text_chunk(partial),
        Err(ProviderError::StreamInterrupted("connection reset".into())),
    ]
}

/// Describes every image the same way.
pub struct FixedDescriber;

#[async_trait]
impl Provider for FixedDescriber {
    fn name(&self) -> &str {
        "fixed_describer"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse {
            content: "A small marsupial.".into(),
            tool_calls: vec![],
            usage: None,
            model: "vision-mock".into(),
        })
    }
}

/// Records every fetched URL and returns placeholder bytes.
#[derive(Default)]
pub struct RecordingFetcher {
    fetched: Mutex<Vec<String>>,
}

impl RecordingFetcher {
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageFetcher for RecordingFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.fetched.lock().unwrap().push(url.to_string());
        Ok(b"not really an image".to_vec())
    }
}

/// Returns the same results for every query.
pub struct FixedSearch {
    results: Vec<SearchResult>,
}

impl FixedSearch {
    pub fn new(results: Vec<SearchResult>) -> Arc<Self> {
        Arc::new(Self { results })
    }
}

#[async_trait]
impl SearchBackend for FixedSearch {
    fn name(&self) -> &str {
        "fixed_search"
    }

    async fn search(
        &self,
        _query: &str,
        _options: &SearchOptions,
    ) -> Result<Vec<SearchResult>, SearchError> {
        Ok(self.results.clone())
    }
}

pub fn result_with_images(title: &str, images: &[&str]) -> SearchResult {
    SearchResult {
        title: title.to_string(),
        url: format!("https://{}.test/article", title.to_lowercase()),
        content: format!("All about {title}."),
        source: "web".into(),
        relevance_score: 0.9,
        image_urls: images.iter().map(|s| s.to_string()).collect(),
    }
}

pub struct Harness {
    pub agent: AgentLoop,
    pub fetcher: Arc<RecordingFetcher>,
    pub _dir: tempfile::TempDir,
}

pub fn harness(provider: Arc<ScriptedProvider>, search: Option<Arc<FixedSearch>>) -> Harness {
    harness_with_log(provider, search, ConversationLog::in_memory())
}

pub fn harness_with_log(
    provider: Arc<ScriptedProvider>,
    search: Option<Arc<FixedSearch>>,
    log: ConversationLog,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(RecordingFetcher::default());
    let pipeline = ImagePipeline::new(
        fetcher.clone(),
        Arc::new(FixedDescriber),
        "vision-mock",
        dir.path().join("images"),
        ImageIdAllocator::new(),
    );
    let search = search.map(|s| WebSearchTool::new(s, 30.0));
    let agent = AgentLoop::new(provider, "mock-model", ToolBox::new(search, pipeline), log);
    Harness {
        agent,
        fetcher,
        _dir: dir,
    }
}
