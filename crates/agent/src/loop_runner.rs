//! The agent reasoning loop implementation.

use std::collections::HashSet;
use std::sync::Arc;

use glimpse_config::MAX_STEP_BUDGET;
use glimpse_core::message::{ContentPart, Turn};
use glimpse_core::provider::{Provider, ProviderRequest, RawToolCall, Usage};
use glimpse_core::tool::{ANALYZE_IMAGES, ToolInvocation, ToolResult};
use glimpse_session::{ConversationLog, HistoryMode};
use glimpse_tools::{Citation, ImageAnalysis, SearchReport, ToolBox};
use tracing::{debug, info, warn};

use crate::stream_event::{AgentStreamEvent, Presenter};

/// Outcome of one user turn.
#[derive(Debug, Clone, Default)]
pub struct TurnResult {
    /// Narrative text shown to the user, across all steps
    pub text: String,

    /// Model invocations used
    pub steps: u32,

    /// Tool calls executed, including ones the loop issued itself
    pub tool_calls: usize,

    /// Distinct search results, in the order they were found
    pub citations: Vec<Citation>,

    /// Every image analyzed this turn, in analysis order
    pub images: Vec<ImageAnalysis>,

    /// The step budget ran out before the model finished
    pub budget_exhausted: bool,

    /// Set when the model stream failed and the turn ended early
    pub error: Option<String>,

    /// Token usage summed over all steps, when the provider reports it
    pub usage: Option<Usage>,
}

/// What one model invocation produced.
#[derive(Default)]
struct StepOutput {
    text: String,
    tool_calls: Vec<RawToolCall>,
    usage: Option<Usage>,
    failure: Option<String>,
}

/// Per-turn bookkeeping for surfaced and analyzed images.
#[derive(Default)]
struct TurnState {
    /// Image URLs surfaced by searches this turn, first-seen order
    surfaced: Vec<String>,
    analyzed: Vec<ImageAnalysis>,
    citations: Vec<Citation>,
    narrative: String,
    tool_calls: usize,
    usage: Option<Usage>,
    guard_calls: usize,
}

impl TurnState {
    fn is_analyzed(&self, url: &str) -> bool {
        self.analyzed.iter().any(|a| a.url == url)
    }

    /// Surfaced URLs that have not been analyzed yet.
    fn pending(&self) -> Vec<String> {
        self.surfaced
            .iter()
            .filter(|u| !self.is_analyzed(u))
            .cloned()
            .collect()
    }

    fn has_pending(&self) -> bool {
        self.surfaced.iter().any(|u| !self.is_analyzed(u))
    }

    fn harvest(&mut self, report: &SearchReport) {
        for image in &report.images {
            let fetchable = image.starts_with("http://") || image.starts_with("https://");
            if fetchable && !self.surfaced.contains(image) {
                self.surfaced.push(image.clone());
            }
        }
        for citation in &report.results {
            if !self.citations.iter().any(|c| c.url == citation.url) {
                self.citations.push(citation.clone());
            }
        }
    }

    fn add_usage(&mut self, usage: Option<Usage>) {
        if let Some(usage) = usage {
            self.usage.get_or_insert_with(Usage::default).add(&usage);
        }
    }
}

/// The core agent loop that orchestrates LLM calls and tool execution.
///
/// Owns the conversation log exclusively; every turn the loop observes is
/// appended in the order it happened.
pub struct AgentLoop {
    /// The LLM provider to use
    provider: Arc<dyn Provider>,

    /// The model to use
    model: String,

    /// Temperature setting
    temperature: f32,

    /// Default max tokens per response
    max_tokens: Option<u32>,

    /// Search and image tools
    tools: ToolBox,

    /// The session's conversation
    log: ConversationLog,

    /// How the log is replayed into each request
    history_mode: HistoryMode,

    /// Model invocations allowed per user turn
    max_steps: u32,

    system_prompt: String,
}

impl AgentLoop {
    /// Create a new agent loop.
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        tools: ToolBox,
        log: ConversationLog,
    ) -> Self {
        let system_prompt =
            crate::prompt::system_prompt(chrono::Utc::now().date_naive(), tools.has_search());
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            tools,
            log,
            history_mode: HistoryMode::Full,
            max_steps: MAX_STEP_BUDGET,
            system_prompt,
        }
    }

    /// Set the step budget, clamped to 1..=15.
    pub fn with_max_steps(mut self, max: u32) -> Self {
        self.max_steps = max.clamp(1, MAX_STEP_BUDGET);
        self
    }

    /// Set the default max tokens per LLM response.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_history_mode(mut self, mode: HistoryMode) -> Self {
        self.history_mode = mode;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    /// Process one user input through the reasoning loop.
    ///
    /// Never fails: provider and tool errors are reported through the
    /// presenter and the returned [`TurnResult`].
    pub async fn run_turn(&mut self, input: &str, presenter: &mut dyn Presenter) -> TurnResult {
        self.log.append(Turn::user(input));

        let mut turn = TurnState::default();
        let mut steps = 0;
        let mut budget_exhausted = true;
        let mut error = None;

        while steps < self.max_steps {
            steps += 1;

            // Narrative is held back while surfaced images await analysis
            let hold = turn.has_pending();
            let step = self.stream_step(presenter, hold, steps).await;
            turn.add_usage(step.usage);

            if let Some(message) = step.failure {
                warn!(step = steps, error = %message, "Model stream failed; ending turn");
                presenter.on_event(&AgentStreamEvent::Error {
                    message: message.clone(),
                });
                if !hold && !step.text.is_empty() {
                    turn.narrative.push_str(&step.text);
                    self.log.append(Turn::assistant(&step.text));
                }
                error = Some(message);
                budget_exhausted = false;
                break;
            }

            if step.tool_calls.is_empty() {
                if hold {
                    debug!(
                        step = steps,
                        pending = turn.pending().len(),
                        "Answer drafted before every image was analyzed; analyzing first"
                    );
                    self.analyze_pending(&mut turn, presenter).await;
                    if steps < self.max_steps {
                        continue;
                    }
                    // No step left to redraft; images are on screen now
                    presenter.on_event(&AgentStreamEvent::Chunk {
                        content: step.text.clone(),
                    });
                }
                turn.narrative.push_str(&step.text);
                self.log.append(Turn::assistant(&step.text));
                budget_exhausted = false;
                break;
            }

            if !hold {
                turn.narrative.push_str(&step.text);
            }
            self.dispatch(&mut turn, step.text, step.tool_calls, presenter)
                .await;
        }

        if budget_exhausted {
            info!(steps, "Step budget exhausted; returning partial answer");
            if !turn.narrative.is_empty() {
                self.log.append(Turn::assistant(&turn.narrative));
            }
        }

        if !turn.citations.is_empty() {
            presenter.on_event(&AgentStreamEvent::References {
                citations: turn.citations.clone(),
            });
        }
        presenter.on_event(&AgentStreamEvent::Done {
            usage: turn.usage,
            steps,
            tool_calls_made: turn.tool_calls,
            budget_exhausted,
        });

        TurnResult {
            text: turn.narrative,
            steps,
            tool_calls: turn.tool_calls,
            citations: turn.citations,
            images: turn.analyzed,
            budget_exhausted,
            error,
            usage: turn.usage,
        }
    }

    /// Invoke the model once and consume its stream to completion.
    ///
    /// Providers deliver each tool call whole. Calls arriving without an id,
    /// or reusing one already seen this step, get `call_<step>_<n>` so every
    /// result can be matched to its call.
    async fn stream_step(
        &self,
        presenter: &mut dyn Presenter,
        hold: bool,
        step: u32,
    ) -> StepOutput {
        let request = ProviderRequest {
            model: self.model.clone(),
            system: Some(self.system_prompt.clone()),
            turns: self.log.snapshot(self.history_mode),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools: self.tools.definitions(),
        };

        let mut out = StepOutput::default();
        let mut rx = match self.provider.stream(request).await {
            Ok(rx) => rx,
            Err(e) => {
                out.failure = Some(format!("Provider error: {e}"));
                return out;
            }
        };

        while let Some(chunk_result) = rx.recv().await {
            match chunk_result {
                Ok(chunk) => {
                    if let Some(text) = chunk.content.filter(|t| !t.is_empty()) {
                        if !hold {
                            presenter.on_event(&AgentStreamEvent::Chunk {
                                content: text.clone(),
                            });
                        }
                        out.text.push_str(&text);
                    }

                    for mut tc in chunk.tool_calls {
                        if tc.id.is_empty() || out.tool_calls.iter().any(|t| t.id == tc.id) {
                            tc.id = format!("call_{step}_{}", out.tool_calls.len() + 1);
                        }
                        out.tool_calls.push(tc);
                    }

                    if chunk.usage.is_some() {
                        out.usage = chunk.usage;
                    }
                }
                Err(e) => {
                    out.failure = Some(format!("Stream error: {e}"));
                    break;
                }
            }
        }

        out
    }

    /// Record the assistant's tool calls, then run them in order.
    async fn dispatch(
        &mut self,
        turn: &mut TurnState,
        text: String,
        calls: Vec<RawToolCall>,
        presenter: &mut dyn Presenter,
    ) {
        let calls: Vec<(RawToolCall, serde_json::Value)> = calls
            .into_iter()
            .map(|call| {
                let arguments = parse_arguments(&call);
                (call, arguments)
            })
            .collect();

        let mut parts = Vec::with_capacity(calls.len() + 1);
        if !text.is_empty() {
            parts.push(ContentPart::Text { text });
        }
        parts.extend(calls.iter().map(|(call, arguments)| ContentPart::ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: arguments.clone(),
        }));
        self.log.append(Turn::assistant_parts(parts));

        for (call, arguments) in &calls {
            self.execute(turn, &call.id, &call.name, arguments, presenter)
                .await;
        }
    }

    /// Issue an analysis call for every pending URL on the model's behalf.
    async fn analyze_pending(&mut self, turn: &mut TurnState, presenter: &mut dyn Presenter) {
        turn.guard_calls += 1;
        let id = format!("glimpse_analyze_{}", turn.guard_calls);
        let arguments = serde_json::json!({ "urls": turn.pending() });

        self.log.append(Turn::assistant_parts(vec![ContentPart::ToolCall {
            id: id.clone(),
            name: ANALYZE_IMAGES.into(),
            arguments: arguments.clone(),
        }]));
        self.execute(turn, &id, ANALYZE_IMAGES, &arguments, presenter)
            .await;
    }

    async fn execute(
        &mut self,
        turn: &mut TurnState,
        id: &str,
        name: &str,
        arguments: &serde_json::Value,
        presenter: &mut dyn Presenter,
    ) {
        turn.tool_calls += 1;
        presenter.on_event(&AgentStreamEvent::ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            input: arguments.clone(),
        });

        let result = match ToolInvocation::parse(name, arguments) {
            Ok(ToolInvocation::Search(args)) => {
                let result = self.tools.search(id, &args).await;
                if let Some(report) = result
                    .data
                    .clone()
                    .and_then(|d| serde_json::from_value::<SearchReport>(d).ok())
                {
                    turn.harvest(&report);
                }
                result
            }
            Ok(ToolInvocation::AnalyzeImages(args)) => {
                self.analyze(turn, id, &args.urls, presenter).await
            }
            Err(e) => {
                warn!(tool = name, error = %e, "Rejected tool call");
                ToolResult::error(id, e.to_string())
            }
        };

        debug!(tool = name, success = result.success, "Tool finished");
        presenter.on_event(&AgentStreamEvent::ToolResult {
            id: id.to_string(),
            name: name.to_string(),
            output: result.output.clone(),
            success: result.success,
        });
        self.log
            .append(Turn::tool_result(id, name, result.output, !result.success));
    }

    /// Analyze the URLs not yet seen this turn and answer for all requested.
    async fn analyze(
        &mut self,
        turn: &mut TurnState,
        id: &str,
        urls: &[String],
        presenter: &mut dyn Presenter,
    ) -> ToolResult {
        let mut seen = HashSet::new();
        let requested: Vec<&String> = urls.iter().filter(|u| seen.insert(u.as_str())).collect();
        let fresh: Vec<String> = requested
            .iter()
            .filter(|u| !turn.is_analyzed(u))
            .map(|u| u.to_string())
            .collect();

        if fresh.len() < requested.len() {
            debug!(
                cached = requested.len() - fresh.len(),
                "Serving already analyzed images from this turn"
            );
        }

        if !fresh.is_empty() {
            let query = self.log.last_search_query();
            let analyses = self.tools.images().analyze(&fresh, query.as_deref()).await;
            presenter.on_event(&AgentStreamEvent::Images {
                analyses: analyses.clone(),
            });
            turn.analyzed.extend(analyses);
        }

        let answered: Vec<ImageAnalysis> = requested
            .iter()
            .filter_map(|u| turn.analyzed.iter().find(|a| &a.url == *u).cloned())
            .collect();
        ToolBox::analysis_result(id, &answered)
    }
}

/// Tool arguments as a JSON object; anything unparseable becomes `{}` so the
/// call can still be logged and answered with a validation error.
fn parse_arguments(call: &RawToolCall) -> serde_json::Value {
    if call.arguments.trim().is_empty() {
        return serde_json::json!({});
    }
    match serde_json::from_str::<serde_json::Value>(&call.arguments) {
        Ok(value) if value.is_object() => value,
        Ok(_) | Err(_) => {
            warn!(tool = %call.name, "Tool arguments are not a JSON object");
            serde_json::json!({})
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use glimpse_core::message::Role;
    use glimpse_core::provider::StreamChunk;
    use glimpse_core::tool::WEB_SEARCH;
    use glimpse_session::FileLogStore;
    use serde_json::json;

    fn events_of<'a>(events: &'a [AgentStreamEvent], kind: &str) -> Vec<&'a AgentStreamEvent> {
        events.iter().filter(|e| e.event_type() == kind).collect()
    }

    #[tokio::test]
    async fn direct_answer_streams_and_is_logged() {
        let provider = ScriptedProvider::new(vec![text_step(&["Quokkas ", "are small."])]);
        let mut agent = harness(provider.clone(), None).agent;
        let mut events: Vec<AgentStreamEvent> = Vec::new();

        let result = agent.run_turn("What is a quokka?", &mut events).await;

        assert_eq!(result.text, "Quokkas are small.");
        assert_eq!(result.steps, 1);
        assert!(!result.budget_exhausted);
        assert_eq!(result.usage.unwrap().total_tokens, 15);
        assert_eq!(events_of(&events, "chunk").len(), 2);
        assert_eq!(events.last().unwrap().event_type(), "done");

        let turns = agent.log().turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[1].text(), "Quokkas are small.");

        let request = &provider.requests()[0];
        assert!(request.system.as_deref().unwrap().contains("analyze_images"));
        assert_eq!(request.tools.len(), 2);
    }

    #[tokio::test]
    async fn images_are_analyzed_before_the_answer() {
        let provider = ScriptedProvider::new(vec![
            tool_step(WEB_SEARCH, json!({"query": "quokka"})),
            tool_step(
                ANALYZE_IMAGES,
                json!({"urls": ["https://img.test/q1.jpg", "https://img.test/q2.png"]}),
            ),
            text_step(&["Here are two quokkas."]),
        ]);
        let search = FixedSearch::new(vec![result_with_images(
            "Quokka",
            &["https://img.test/q1.jpg", "https://img.test/q2.png"],
        )]);
        let h = harness(provider, Some(search));
        let mut agent = h.agent;
        let mut events: Vec<AgentStreamEvent> = Vec::new();

        let result = agent.run_turn("show me quokkas", &mut events).await;

        let images_at = events.iter().position(|e| e.event_type() == "images").unwrap();
        let chunk_at = events.iter().position(|e| e.event_type() == "chunk").unwrap();
        assert!(images_at < chunk_at);
        assert_eq!(result.images.len(), 2);
        assert_eq!(result.citations.len(), 1);
        assert_eq!(result.tool_calls, 2);
        assert_eq!(h.fetcher.fetched().len(), 2);

        let refs = events_of(&events, "references");
        assert_eq!(refs.len(), 1);
        let done_at = events.iter().position(|e| e.event_type() == "done").unwrap();
        let refs_at = events.iter().position(|e| e.event_type() == "references").unwrap();
        assert!(chunk_at < refs_at && refs_at < done_at);
    }

    #[tokio::test]
    async fn premature_answer_triggers_analysis_and_redraft() {
        let provider = ScriptedProvider::new(vec![
            tool_step(WEB_SEARCH, json!({"query": "quokka"})),
            text_step(&["Too early."]),
            text_step(&["Now with pictures."]),
        ]);
        let search = FixedSearch::new(vec![result_with_images(
            "Quokka",
            &["https://img.test/q1.jpg"],
        )]);
        let h = harness(provider.clone(), Some(search));
        let mut agent = h.agent;
        let mut events: Vec<AgentStreamEvent> = Vec::new();

        let result = agent.run_turn("quokkas", &mut events).await;

        assert_eq!(result.text, "Now with pictures.");
        assert_eq!(result.steps, 3);
        assert!(events.iter().all(|e| !matches!(
            e,
            AgentStreamEvent::Chunk { content } if content == "Too early."
        )));

        // The loop's own call is in the log, and the draft is not
        let turns = agent.log().turns();
        assert!(turns.iter().all(|t| t.text() != "Too early."));
        let guard = turns
            .iter()
            .flat_map(|t| t.tool_calls())
            .find(|c| c.name == ANALYZE_IMAGES)
            .unwrap();
        assert_eq!(guard.arguments["urls"][0], "https://img.test/q1.jpg");
        assert_eq!(provider.requests().len(), 3);
    }

    #[tokio::test]
    async fn repeated_urls_are_not_reanalyzed() {
        let urls = json!({"urls": ["https://img.test/q1.jpg"]});
        let provider = ScriptedProvider::new(vec![
            tool_step(ANALYZE_IMAGES, urls.clone()),
            tool_step(ANALYZE_IMAGES, urls),
            text_step(&["done"]),
        ]);
        let h = harness(provider, None);
        let mut agent = h.agent;
        let mut events: Vec<AgentStreamEvent> = Vec::new();

        let result = agent.run_turn("look", &mut events).await;

        assert_eq!(h.fetcher.fetched().len(), 1);
        assert_eq!(events_of(&events, "images").len(), 1);
        assert_eq!(result.images.len(), 1);
        // Both tool results still answer with img_1
        let outputs: Vec<String> = agent
            .log()
            .turns()
            .iter()
            .filter(|t| t.role == Role::Tool)
            .map(|t| serde_json::to_string(&t.content).unwrap())
            .collect();
        assert_eq!(outputs.len(), 2);
        assert!(outputs.iter().all(|o| o.contains("img_1")));
    }

    #[tokio::test]
    async fn budget_exhaustion_returns_partial_text() {
        let steps = (0..3)
            .map(|i| tool_step_with_text(&format!("Step {i}. "), WEB_SEARCH, json!({"query": "q"})))
            .collect();
        let provider = ScriptedProvider::new(steps);
        let search = FixedSearch::new(vec![]);
        let mut agent = harness(provider, Some(search)).agent.with_max_steps(3);
        let mut events: Vec<AgentStreamEvent> = Vec::new();

        let result = agent.run_turn("loop forever", &mut events).await;

        assert!(result.budget_exhausted);
        assert!(result.error.is_none());
        assert_eq!(result.steps, 3);
        assert_eq!(result.text, "Step 0. Step 1. Step 2. ");
        let last = agent.log().turns().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.text(), "Step 0. Step 1. Step 2. ");
        assert!(matches!(
            events.last().unwrap(),
            AgentStreamEvent::Done { budget_exhausted: true, steps: 3, .. }
        ));
    }

    #[tokio::test]
    async fn step_budget_is_capped() {
        let agent = harness(ScriptedProvider::new(vec![]), None).agent;
        assert_eq!(agent.with_max_steps(100).max_steps(), 15);
        let agent = harness(ScriptedProvider::new(vec![]), None).agent;
        assert_eq!(agent.with_max_steps(0).max_steps(), 1);
    }

    #[tokio::test]
    async fn stream_failure_ends_turn_with_partial_text() {
        let provider = ScriptedProvider::new(vec![failing_step("Partial ")]);
        let mut agent = harness(provider, None).agent;
        let mut events: Vec<AgentStreamEvent> = Vec::new();

        let result = agent.run_turn("hi", &mut events).await;

        assert!(result.error.as_deref().unwrap().contains("connection reset"));
        assert_eq!(result.text, "Partial ");
        assert_eq!(events_of(&events, "error").len(), 1);
        assert_eq!(agent.log().turns().last().unwrap().text(), "Partial ");
    }

    #[tokio::test]
    async fn invalid_tool_call_is_reported_to_the_model() {
        let provider = ScriptedProvider::new(vec![
            tool_step("shell", json!({"cmd": "ls"})),
            tool_step(WEB_SEARCH, json!({})),
            text_step(&["ok"]),
        ]);
        let mut agent = harness(provider, None).agent;
        let mut events: Vec<AgentStreamEvent> = Vec::new();

        let result = agent.run_turn("hi", &mut events).await;

        assert_eq!(result.text, "ok");
        let failures: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, AgentStreamEvent::ToolResult { success: false, .. }))
            .collect();
        assert_eq!(failures.len(), 2);
    }

    #[tokio::test]
    async fn every_append_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversation.json");
        let provider = ScriptedProvider::new(vec![
            tool_step(ANALYZE_IMAGES, json!({"urls": ["https://img.test/a.jpg"]})),
            text_step(&["A picture."]),
        ]);
        let h = harness_with_log(
            provider,
            None,
            ConversationLog::new(Box::new(FileLogStore::open(&path).unwrap())),
        );
        let mut agent = h.agent;

        agent.run_turn("picture please", &mut Vec::<AgentStreamEvent>::new()).await;

        let replayed = FileLogStore::load(&path).unwrap();
        assert_eq!(replayed, agent.log().turns());
        assert_eq!(replayed.len(), 4);
    }

    #[tokio::test]
    async fn final_step_draft_is_released_after_images() {
        let provider = ScriptedProvider::new(vec![
            tool_step(WEB_SEARCH, json!({"query": "quokka"})),
            text_step(&["Premature."]),
        ]);
        let search = FixedSearch::new(vec![result_with_images(
            "Quokka",
            &["https://img.test/q1.jpg"],
        )]);
        let h = harness(provider.clone(), Some(search));
        let mut agent = h.agent.with_max_steps(2);
        let mut events: Vec<AgentStreamEvent> = Vec::new();

        let result = agent.run_turn("quokkas", &mut events).await;

        assert!(!result.budget_exhausted);
        assert_eq!(result.text, "Premature.");
        assert_eq!(result.images.len(), 1);
        assert_eq!(provider.requests().len(), 2);

        let images_at = events.iter().position(|e| e.event_type() == "images").unwrap();
        let chunk_at = events
            .iter()
            .position(|e| matches!(e, AgentStreamEvent::Chunk { content } if content == "Premature."))
            .unwrap();
        assert!(images_at < chunk_at);

        let last = agent.log().turns().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.text(), "Premature.");
    }

    #[tokio::test]
    async fn held_draft_is_dropped_when_the_stream_fails() {
        let provider = ScriptedProvider::new(vec![
            tool_step(WEB_SEARCH, json!({"query": "quokka"})),
            failing_step("Half a"),
        ]);
        let search = FixedSearch::new(vec![result_with_images(
            "Quokka",
            &["https://img.test/q1.jpg"],
        )]);
        let h = harness(provider, Some(search));
        let mut agent = h.agent.with_max_steps(2);
        let mut events: Vec<AgentStreamEvent> = Vec::new();

        let result = agent.run_turn("quokkas", &mut events).await;

        assert!(result.error.is_some());
        assert!(!result.budget_exhausted);
        assert_eq!(result.text, "");
        assert!(events_of(&events, "chunk").is_empty());
        assert_eq!(events_of(&events, "error").len(), 1);

        let turns = agent.log().turns();
        assert!(turns.iter().all(|t| t.text() != "Half a"));
        assert_eq!(turns.last().unwrap().role, Role::Tool);
    }

    #[tokio::test]
    async fn parallel_calls_without_ids_run_separately() {
        let call = |query: &str| RawToolCall {
            id: String::new(),
            name: WEB_SEARCH.into(),
            arguments: json!({ "query": query }).to_string(),
        };
        let parallel = vec![Ok(StreamChunk {
            tool_calls: vec![call("a"), call("b")],
            done: true,
            ..Default::default()
        })];
        let provider = ScriptedProvider::new(vec![parallel, text_step(&["ok"])]);
        let search = FixedSearch::new(vec![]);
        let mut agent = harness(provider, Some(search)).agent;
        let mut events: Vec<AgentStreamEvent> = Vec::new();

        let result = agent.run_turn("two searches", &mut events).await;

        assert_eq!(result.tool_calls, 2);
        let outcomes: Vec<(String, bool)> = events
            .iter()
            .filter_map(|e| match e {
                AgentStreamEvent::ToolResult { id, success, .. } => Some((id.clone(), *success)),
                _ => None,
            })
            .collect();
        assert_eq!(
            outcomes,
            vec![("call_1_1".to_string(), true), ("call_1_2".to_string(), true)]
        );

        let turns = agent.log().turns();
        let queries: Vec<(&str, &serde_json::Value)> = turns[1]
            .tool_calls()
            .into_iter()
            .map(|c| (c.id, &c.arguments["query"]))
            .collect();
        assert_eq!(queries, vec![("call_1_1", &json!("a")), ("call_1_2", &json!("b"))]);
    }

    #[test]
    fn unparseable_arguments_become_empty_object() {
        let call = RawToolCall {
            id: "c".into(),
            name: "web_search".into(),
            arguments: "{not json".into(),
        };
        assert_eq!(parse_arguments(&call), json!({}));
        let call = RawToolCall {
            arguments: r#"{"query":"q"}"#.into(),
            ..call
        };
        assert_eq!(parse_arguments(&call)["query"], "q");
    }
}
