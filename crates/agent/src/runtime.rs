use std::sync::Arc;

use pagepilot_core::config::AgentDefaults;
use pagepilot_core::{Error, Paths, Result, ToolDescriptor};
use pagepilot_storage::{RunJournal, RunStore};
use pagepilot_tools::ToolCatalog;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::decision::{AgentDecision, DecisionStatus};
use crate::dispatch::Dispatcher;
use crate::event::{AgentEvent, EventSink};
use crate::prompt::PromptBuilder;
use crate::scratchpad::{CompletionReason, EntryKind, Scratchpad};
use crate::traits::{CompletionModel, CompletionRequest, ContextExtractor, ExtractedContext, PageObserver, PageSnapshot};

const CANCELLED_THOUGHT: &str = "Run cancelled by user.";

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub success: bool,
    pub answer: Option<String>,
    pub scratchpad: Scratchpad,
}

enum StepFlow {
    Continue,
    Done,
}

/// Page state carried between steps.
struct PageState {
    snapshot: PageSnapshot,
    context: ExtractedContext,
}

impl PageState {
    fn describe(&self) -> String {
        let mut out = format!("Page: {} ({})", self.snapshot.title, self.snapshot.url);
        if !self.context.summary.is_empty() {
            out.push_str(&format!("\n{}", self.context.summary));
        }
        out
    }
}

/// The observe / think / act loop for one goal.
pub struct AgentLoop {
    model: Arc<dyn CompletionModel>,
    observer: Arc<dyn PageObserver>,
    extractor: Arc<dyn ContextExtractor>,
    dispatcher: Dispatcher,
    settings: AgentDefaults,
    prompts: PromptBuilder,
    paths: Option<Paths>,
}

impl AgentLoop {
    pub fn new(
        model: Arc<dyn CompletionModel>,
        observer: Arc<dyn PageObserver>,
        extractor: Arc<dyn ContextExtractor>,
        dispatcher: Dispatcher,
        settings: AgentDefaults,
    ) -> Self {
        let prompts = PromptBuilder::new(settings.page_excerpt_chars);
        Self {
            model,
            observer,
            extractor,
            dispatcher,
            settings,
            prompts,
            paths: None,
        }
    }

    /// Mirror scratchpad entries to a run journal and save the final snapshot.
    pub fn with_persistence(mut self, paths: Paths) -> Self {
        self.paths = Some(paths);
        self
    }

    /// Run until the goal completes, the step budget runs out, or `cancel`
    /// fires. Never fails: every error ends up in the scratchpad.
    pub async fn run(
        &self,
        goal: &str,
        initial: PageSnapshot,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let run_id = uuid::Uuid::new_v4().to_string();
        let max_steps = self.settings.max_steps;
        info!(run_id = %run_id, goal, max_steps, "Agent run started");

        let mut pad = Scratchpad::new(goal, self.settings.max_scratchpad_entries)
            .with_observation_clip(self.settings.history_observation_chars);
        if let Some(paths) = &self.paths {
            pad.attach_journal(RunJournal::new(paths, &run_id));
        }

        let context = match self.extractor.extract(&initial.html).await {
            Ok(context) => context,
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Initial context extraction failed");
                ExtractedContext::default()
            }
        };
        let mut page = PageState {
            snapshot: initial,
            context,
        };
        let observation = page.describe();
        pad.add_observation(observation.clone());
        events.emit(AgentEvent::Observation {
            step: 0,
            content: observation,
        });

        let mut mcp_tools = None;
        while pad.current_step() < max_steps {
            if cancel.is_cancelled() {
                cancel_run(&mut pad);
                break;
            }

            let step = pad.next_step();
            events.emit(AgentEvent::Progress { step, max_steps });
            debug!(run_id = %run_id, step, "Agent step");

            match self.step(&mut pad, &mut page, &mut mcp_tools, events, cancel).await {
                Ok(StepFlow::Continue) => {}
                Ok(StepFlow::Done) => break,
                Err(e) if e.is_cancellation() => {
                    info!(run_id = %run_id, step, "Agent run cancelled");
                    cancel_run(&mut pad);
                    break;
                }
                Err(e) => {
                    warn!(run_id = %run_id, step, error = %e, "Agent step failed");
                    let message = e.to_string();
                    pad.add_error(message.clone());
                    events.emit(AgentEvent::Error { step, message });
                }
            }
        }

        if !pad.is_complete() {
            if cancel.is_cancelled() {
                cancel_run(&mut pad);
            } else {
                warn!(run_id = %run_id, max_steps, "Step budget exhausted");
                pad.complete(Some(budget_summary(&pad, max_steps)), CompletionReason::MaxStepsReached);
            }
        }

        let reason = pad.completion_reason().unwrap_or(CompletionReason::Failed);
        let success = reason == CompletionReason::GoalAchieved;
        let answer = pad.final_answer().map(str::to_string);
        events.emit(AgentEvent::Complete {
            success,
            reason,
            answer: answer.clone(),
        });

        if let Some(paths) = &self.paths {
            if let Err(e) = RunStore::new(paths.clone()).save(&run_id, &pad) {
                error!(run_id = %run_id, error = %e, "Failed to save run snapshot");
            }
        }

        let stats = pad.stats();
        info!(
            run_id = %run_id,
            reason = reason.as_str(),
            steps = stats.steps,
            actions = stats.actions,
            failures = stats.failures,
            elapsed_ms = stats.elapsed_ms,
            "Agent run finished"
        );

        RunOutcome {
            run_id,
            success,
            answer,
            scratchpad: pad,
        }
    }

    /// Native actions plus MCP tools. Servers are asked once per run, and the
    /// discovery is abandoned as soon as `cancel` fires.
    async fn catalog(
        &self,
        mcp_tools: &mut Option<Vec<ToolDescriptor>>,
        cancel: &CancellationToken,
    ) -> Result<ToolCatalog> {
        let native = self.dispatcher.executor().descriptors();
        if mcp_tools.is_none() {
            let tools = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(Error::Cancelled("tool discovery aborted".to_string()));
                }
                tools = self.dispatcher.protocol().discover_all_tools() => tools,
            };
            debug!(count = tools.len(), "MCP tools discovered");
            *mcp_tools = Some(tools);
        }
        Ok(ToolCatalog::new(native, mcp_tools.clone().unwrap_or_default()))
    }

    async fn step(
        &self,
        pad: &mut Scratchpad,
        page: &mut PageState,
        mcp_tools: &mut Option<Vec<ToolDescriptor>>,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<StepFlow> {
        let step = pad.current_step();
        let catalog = self.catalog(mcp_tools, cancel).await?;
        let request = CompletionRequest {
            system_prompt: self.prompts.build_system_prompt(&catalog),
            user_prompt: self
                .prompts
                .build_user_prompt(pad, &page.snapshot, &page.context, self.settings.max_steps),
            tools: catalog.function_schemas(),
        };

        let reply = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(Error::Cancelled("think step aborted".to_string()));
            }
            reply = self.model.complete(&request, cancel) => reply?,
        };

        let decision = AgentDecision::parse_or_retry(&reply);
        if !decision.thought.is_empty() {
            pad.add_thought(decision.thought.clone());
            events.emit(AgentEvent::Thought {
                step,
                content: decision.thought.clone(),
            });
        }

        if decision.complete {
            let reason = match decision.status {
                DecisionStatus::Failed => CompletionReason::Failed,
                DecisionStatus::Success => CompletionReason::GoalAchieved,
            };
            info!(step, reason = reason.as_str(), "Agent decided to finish");
            pad.complete(decision.answer, reason);
            return Ok(StepFlow::Done);
        }

        let Some(action) = decision.action else {
            debug!(step, "No action this step");
            return Ok(StepFlow::Continue);
        };

        info!(step, action = %action.name, description = ?decision.description, "Executing action");
        pad.add_action(&action.name, &action.params);
        events.emit(AgentEvent::Action {
            step,
            name: action.name.clone(),
            params: action.params.clone(),
        });

        let dispatched = self.dispatcher.dispatch(&catalog, &action.name, &action.params).await;
        let result = dispatched.outcome.result;
        if !result.success {
            warn!(step, action = %action.name, attempts = dispatched.outcome.attempts, error = %result.error_text(), "Action failed");
        }
        pad.add_result(&result);
        events.emit(AgentEvent::Result { step, result });

        tokio::select! {
            _ = tokio::time::sleep(self.settings.settle_delay()) => {}
            _ = cancel.cancelled() => return Ok(StepFlow::Continue),
        }

        let snapshot = self.observer.observe().await?;
        let context = self.extractor.extract(&snapshot.html).await?;
        *page = PageState { snapshot, context };
        let observation = page.describe();
        pad.add_observation(observation.clone());
        events.emit(AgentEvent::Observation {
            step,
            content: observation,
        });
        Ok(StepFlow::Continue)
    }
}

fn cancel_run(pad: &mut Scratchpad) {
    pad.add_thought(CANCELLED_THOUGHT);
    pad.complete(None, CompletionReason::UserCancelled);
}

fn budget_summary(pad: &Scratchpad, max_steps: u32) -> String {
    let stats = pad.stats();
    let mut summary = format!(
        "Stopped after {} steps without completing the goal. {} actions ({} succeeded, {} failed).",
        max_steps, stats.actions, stats.successes, stats.failures
    );
    if let Some(last) = pad.entries().iter().rev().find(|e| e.kind == EntryKind::Result) {
        summary.push_str(&format!(" Last result: {}", last.content));
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pagepilot_core::config::{McpConfig, RetryConfig};
    use pagepilot_core::{ActionResult, McpTransport, ServerConfig};
    use pagepilot_tools::{browser_actions, ActionExecutor, ProtocolClient, RetryPolicy};
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    /// Replies from a script, then keeps repeating the last one.
    struct ScriptedModel {
        replies: Mutex<VecDeque<String>>,
        calls: Mutex<u32>,
    }

    impl ScriptedModel {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl CompletionModel for ScriptedModel {
        async fn complete(&self, _request: &CompletionRequest, _cancel: &CancellationToken) -> Result<String> {
            *self.calls.lock().unwrap() += 1;
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                Ok(replies.pop_front().unwrap_or_default())
            } else {
                Ok(replies.front().cloned().unwrap_or_default())
            }
        }
    }

    /// Never answers until cancelled.
    struct HangingModel;

    #[async_trait]
    impl CompletionModel for HangingModel {
        async fn complete(&self, _request: &CompletionRequest, _cancel: &CancellationToken) -> Result<String> {
            std::future::pending::<()>().await;
            Ok(String::new())
        }
    }

    struct StaticPage;

    #[async_trait]
    impl PageObserver for StaticPage {
        async fn observe(&self) -> Result<PageSnapshot> {
            Ok(PageSnapshot::new("https://example.com/", "Example Domain", "<h1>Example Domain</h1>"))
        }
    }

    struct TitleExtractor;

    #[async_trait]
    impl ContextExtractor for TitleExtractor {
        async fn extract(&self, html: &str) -> Result<ExtractedContext> {
            Ok(ExtractedContext {
                summary: "1 heading".into(),
                formatted_text: html.replace("<h1>", "# ").replace("</h1>", ""),
                ..Default::default()
            })
        }
    }

    #[derive(Default)]
    struct RecordingExecutor {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ActionExecutor for RecordingExecutor {
        fn descriptors(&self) -> Vec<ToolDescriptor> {
            browser_actions()
        }

        async fn execute(&self, name: &str, _params: &Value) -> ActionResult {
            self.calls.lock().unwrap().push(name.to_string());
            ActionResult::ok(format!("{} ok", name))
        }
    }

    fn settings(max_steps: u32) -> AgentDefaults {
        AgentDefaults {
            max_steps,
            settle_delay_ms: 0,
            ..Default::default()
        }
    }

    fn agent(model: Arc<dyn CompletionModel>, executor: Arc<RecordingExecutor>, max_steps: u32) -> AgentLoop {
        agent_with_mcp(model, executor, max_steps, &McpConfig::default())
    }

    fn agent_with_mcp(
        model: Arc<dyn CompletionModel>,
        executor: Arc<RecordingExecutor>,
        max_steps: u32,
        mcp: &McpConfig,
    ) -> AgentLoop {
        let protocol = Arc::new(ProtocolClient::new(mcp).unwrap());
        let dispatcher = Dispatcher::new(protocol, executor, RetryPolicy::new(&RetryConfig::default()));
        AgentLoop::new(model, Arc::new(StaticPage), Arc::new(TitleExtractor), dispatcher, settings(max_steps))
    }

    /// An MCP endpoint that accepts connections and never answers. Returns
    /// the server config and a count of accepted connections.
    async fn silent_server(timeout_ms: u64) -> (McpConfig, Arc<AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(socket);
            }
        });
        let config = McpConfig {
            request_timeout_ms: timeout_ms,
            connect_timeout_ms: timeout_ms,
            servers: vec![ServerConfig::new("slow", &format!("http://{}/mcp", addr), McpTransport::Sse)],
            ..McpConfig::default()
        };
        (config, accepted)
    }

    fn start_page() -> PageSnapshot {
        PageSnapshot::new("https://example.com/", "Example Domain", "<h1>Example Domain</h1>")
    }

    #[tokio::test]
    async fn test_single_step_completion() {
        let model = ScriptedModel::new(&[
            r#"{"thought": "The heading is visible.", "complete": true, "answer": "Example Domain"}"#,
        ]);
        let executor = Arc::new(RecordingExecutor::default());
        let (events, mut rx) = EventSink::channel();

        let outcome = agent(model.clone(), executor.clone(), 20)
            .run("What is the page heading?", start_page(), &events, &CancellationToken::new())
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.answer.as_deref(), Some("Example Domain"));
        assert_eq!(outcome.scratchpad.completion_reason(), Some(CompletionReason::GoalAchieved));
        assert_eq!(outcome.scratchpad.current_step(), 1);
        assert_eq!(model.calls(), 1);
        assert!(executor.calls.lock().unwrap().is_empty());

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                AgentEvent::Observation { .. } => "observation",
                AgentEvent::Progress { .. } => "progress",
                AgentEvent::Thought { .. } => "thought",
                AgentEvent::Complete { .. } => "complete",
                _ => "other",
            });
        }
        assert_eq!(kinds, vec!["observation", "progress", "thought", "complete"]);
    }

    #[tokio::test]
    async fn test_action_then_completion() {
        let model = ScriptedModel::new(&[
            r#"{"thought": "scroll first", "action": {"name": "scroll", "params": {"direction": "down"}}}"#,
            r#"{"thought": "found it", "complete": true, "answer": "done"}"#,
        ]);
        let executor = Arc::new(RecordingExecutor::default());
        let outcome = agent(model, executor.clone(), 20)
            .run("scroll and report", start_page(), &EventSink::none(), &CancellationToken::new())
            .await;

        assert!(outcome.success);
        assert_eq!(executor.calls.lock().unwrap().as_slice(), &["scroll".to_string()]);
        let kinds: Vec<EntryKind> = outcome.scratchpad.entries().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EntryKind::Goal,
                EntryKind::Observation,
                EntryKind::Thought,
                EntryKind::Action,
                EntryKind::Result,
                EntryKind::Observation,
                EntryKind::Thought,
            ]
        );
    }

    #[tokio::test]
    async fn test_budget_exhausted() {
        let model = ScriptedModel::new(&[r#"{"thought": "keep looking", "action": {"name": "wait", "params": {"ms": 10}}}"#]);
        let executor = Arc::new(RecordingExecutor::default());
        let outcome = agent(model.clone(), executor.clone(), 5)
            .run("an impossible goal", start_page(), &EventSink::none(), &CancellationToken::new())
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.scratchpad.completion_reason(), Some(CompletionReason::MaxStepsReached));
        assert_eq!(outcome.scratchpad.current_step(), 5);
        assert_eq!(model.calls(), 5);
        assert_eq!(executor.calls.lock().unwrap().len(), 5);
        assert!(outcome.answer.unwrap().starts_with("Stopped after 5 steps"));
    }

    #[tokio::test]
    async fn test_cancellation_mid_think() {
        let executor = Arc::new(RecordingExecutor::default());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            agent(Arc::new(HangingModel), executor.clone(), 20).run("wait forever", start_page(), &EventSink::none(), &cancel),
        )
        .await
        .expect("cancelled run returns promptly");

        assert!(!outcome.success);
        assert_eq!(outcome.scratchpad.completion_reason(), Some(CompletionReason::UserCancelled));
        assert_eq!(outcome.scratchpad.current_step(), 1);
        assert!(executor.calls.lock().unwrap().is_empty());
        let last = outcome.scratchpad.entries().last().unwrap();
        assert_eq!(last.content, CANCELLED_THOUGHT);
    }

    #[tokio::test]
    async fn test_cancellation_during_tool_discovery() {
        let (mcp, _) = silent_server(3_000).await;
        let model = ScriptedModel::new(&[r#"{"thought": "x", "complete": true}"#]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let outcome = agent_with_mcp(model.clone(), Arc::new(RecordingExecutor::default()), 20, &mcp)
            .run("goal", start_page(), &EventSink::none(), &cancel)
            .await;

        assert!(started.elapsed() < Duration::from_secs(1), "took {:?}", started.elapsed());
        assert_eq!(outcome.scratchpad.completion_reason(), Some(CompletionReason::UserCancelled));
        assert_eq!(outcome.scratchpad.current_step(), 1);
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_unresponsive_server_discovered_once_per_run() {
        let (mcp, accepted) = silent_server(300).await;
        let model = ScriptedModel::new(&[r#"{"thought": "still thinking"}"#]);

        let started = Instant::now();
        let outcome = agent_with_mcp(model.clone(), Arc::new(RecordingExecutor::default()), 4, &mcp)
            .run("goal", start_page(), &EventSink::none(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.scratchpad.completion_reason(), Some(CompletionReason::MaxStepsReached));
        assert_eq!(model.calls(), 4);
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_millis(1_000), "took {:?}", started.elapsed());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let model = ScriptedModel::new(&[r#"{"thought": "x", "complete": true}"#]);
        let outcome = agent(model.clone(), Arc::new(RecordingExecutor::default()), 20)
            .run("goal", start_page(), &EventSink::none(), &cancel)
            .await;
        assert_eq!(outcome.scratchpad.completion_reason(), Some(CompletionReason::UserCancelled));
        assert_eq!(outcome.scratchpad.current_step(), 0);
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_unparseable_reply_retries_and_failed_status() {
        let model = ScriptedModel::new(&[
            "I am not sure what to do.",
            r#"{"thought": "login wall", "complete": true, "status": "failed", "answer": "needs login"}"#,
        ]);
        let outcome = agent(model, Arc::new(RecordingExecutor::default()), 20)
            .run("read the article", start_page(), &EventSink::none(), &CancellationToken::new())
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.scratchpad.completion_reason(), Some(CompletionReason::Failed));
        assert_eq!(outcome.answer.as_deref(), Some("needs login"));
        assert_eq!(outcome.scratchpad.current_step(), 2);
        assert!(outcome.scratchpad.entries().iter().any(|e| e.content.contains("Let me try again")));
    }

    #[tokio::test]
    async fn test_model_error_recorded_and_loop_continues() {
        struct FailingOnce(Mutex<bool>);

        #[async_trait]
        impl CompletionModel for FailingOnce {
            async fn complete(&self, _request: &CompletionRequest, _cancel: &CancellationToken) -> Result<String> {
                let mut failed = self.0.lock().unwrap();
                if !*failed {
                    *failed = true;
                    return Err(Error::Transport("model endpoint unreachable".into()));
                }
                Ok(r#"{"thought": "ok now", "complete": true, "answer": "fine"}"#.to_string())
            }
        }

        let (events, mut rx) = EventSink::channel();
        let outcome = agent(Arc::new(FailingOnce(Mutex::new(false))), Arc::new(RecordingExecutor::default()), 20)
            .run("goal", start_page(), &events, &CancellationToken::new())
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.scratchpad.stats().errors, 1);
        let mut saw_error = false;
        while let Ok(event) = rx.try_recv() {
            if let AgentEvent::Error { step, message } = event {
                assert_eq!(step, 1);
                assert!(message.contains("model endpoint unreachable"));
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn test_persistence_writes_journal_and_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let paths = Paths::with_base(temp_dir.path().to_path_buf());
        let model = ScriptedModel::new(&[
            r#"{"thought": "go back", "action": {"name": "go_back"}}"#,
            r#"{"thought": "done", "complete": true, "answer": "ok"}"#,
        ]);
        let outcome = agent(model, Arc::new(RecordingExecutor::default()), 20)
            .with_persistence(paths.clone())
            .run("goal", start_page(), &EventSink::none(), &CancellationToken::new())
            .await;

        let saved: Scratchpad = RunStore::new(paths.clone()).load(&outcome.run_id).unwrap().unwrap();
        assert_eq!(saved.final_answer(), Some("ok"));
        assert_eq!(saved.entries().len(), outcome.scratchpad.entries().len());

        let journal: Vec<crate::scratchpad::ScratchpadEntry> =
            RunJournal::new(&paths, &outcome.run_id).read_all().unwrap();
        assert_eq!(journal.len(), outcome.scratchpad.entries().len());
    }
}
