//! Tool-calling state machine

use super::config::OrchestratorConfig;
use super::session::{DebugEvent, DebugKind, PendingTask, Session, TaskStatus};
use super::tasks::{TaskDetector, TaskRef};
use crate::error::{Error, Result};
use crate::llm::{
    ContentBlock, LlmClient, LlmRequest, LlmResponse, Message, StopReason, TokenUsage, ToolChoice,
    ToolSpec,
};
use crate::mcp::{ToolCallResult, ToolTransport};
use crate::polling::{PollOutcome, PollStep, Poller};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Opens a fresh tool session per question
pub type TransportFactory = Arc<dyn Fn() -> Arc<dyn ToolTransport> + Send + Sync>;

/// How the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    TextNoAsync,
    TextAsyncResolved,
    MaxIterations,
    TransportError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorOutcome {
    pub answer: String,
    pub termination: Termination,
    pub iterations: u32,
    pub tool_calls: u32,
    pub task_polls: u32,
    pub usage: TokenUsage,
    pub resolved_tasks: Vec<PendingTask>,
    pub debug_log: Vec<DebugEvent>,
    #[serde(skip)]
    pub messages: Vec<Message>,
}

/// State of one loop iteration
enum Phase {
    AwaitingModel,
    Finished(Termination, String),
}

pub struct Orchestrator {
    llm: LlmClient,
    config: OrchestratorConfig,
    tools: Option<TransportFactory>,
    detector: TaskDetector,
}

struct Run<'a> {
    session: Session,
    transport: Option<Arc<dyn ToolTransport>>,
    specs: Vec<ToolSpec>,
    status_tools: Vec<String>,
    model: Option<&'a str>,
    iterations: u32,
    tool_calls: u32,
    task_polls: u32,
    partial: String,
    reprompted: bool,
    awaiting_final: bool,
}

impl Orchestrator {
    pub fn new(llm: LlmClient, config: OrchestratorConfig, tools: Option<TransportFactory>) -> Result<Self> {
        Ok(Self {
            llm,
            config,
            tools,
            detector: TaskDetector::new()?,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Answer `question`, continuing `history` when given
    pub async fn run(&self, question: &str, history: Vec<Message>, model: Option<&str>) -> OrchestratorOutcome {
        let mut run = Run {
            session: Session::new(history, question),
            transport: self.tools.as_ref().map(|open| open()),
            specs: Vec::new(),
            status_tools: self.config.status_tools.clone(),
            model,
            iterations: 0,
            tool_calls: 0,
            task_polls: 0,
            partial: String::new(),
            reprompted: false,
            awaiting_final: false,
        };
        self.open_tools(&mut run).await;

        let mut phase = Phase::AwaitingModel;
        while let Phase::AwaitingModel = phase {
            // a wait on the last iteration still gets its summary turn
            let limit = self.config.max_iterations + u32::from(run.awaiting_final);
            if run.iterations >= limit {
                let text = run
                    .session
                    .last_assistant_text()
                    .unwrap_or_else(|| "No answer was produced within the iteration limit.".to_string());
                run.session.log(DebugKind::MaxIterations, json!({"iterations": run.iterations}));
                phase = Phase::Finished(Termination::MaxIterations, text);
                break;
            }
            phase = self.step(&mut run).await;
        }

        if let Some(transport) = &run.transport {
            if let Err(e) = transport.close().await {
                debug!(error = %e, "tool session close failed");
            }
        }

        let (termination, answer) = match phase {
            Phase::Finished(termination, answer) => (termination, answer),
            Phase::AwaitingModel => (Termination::MaxIterations, String::new()),
        };
        run.session.log(DebugKind::Final, json!({"termination": termination}));
        info!(
            ?termination,
            iterations = run.iterations,
            tool_calls = run.tool_calls,
            task_polls = run.task_polls,
            input_tokens = run.session.usage.input_tokens,
            output_tokens = run.session.usage.output_tokens,
            "orchestrator finished"
        );

        OrchestratorOutcome {
            answer,
            termination,
            iterations: run.iterations,
            tool_calls: run.tool_calls,
            task_polls: run.task_polls,
            usage: run.session.usage,
            resolved_tasks: run.session.resolved_tasks,
            debug_log: run.session.debug_log,
            messages: run.session.messages,
        }
    }

    async fn open_tools(&self, run: &mut Run<'_>) {
        let Some(transport) = run.transport.clone() else {
            return;
        };
        let listed = async {
            transport.initialize().await?;
            transport.list_tools().await
        }
        .await;

        match listed {
            Ok(tools) => {
                let names: BTreeSet<String> = tools.iter().map(|t| t.name.clone()).collect();
                if !names.is_empty() {
                    run.status_tools.retain(|t| names.contains(t));
                }
                run.specs = tools.into_iter().map(ToolSpec::from).collect();
                run.session
                    .log(DebugKind::ToolsListed, json!({"tools": names}));
            }
            Err(e) => {
                warn!(error = %e, "tool server unavailable, answering without tools");
                run.session
                    .log(DebugKind::ToolsUnavailable, json!({"error": e.to_string()}));
                run.transport = None;
            }
        }
    }

    async fn step(&self, run: &mut Run<'_>) -> Phase {
        run.iterations += 1;
        let last = run.iterations >= self.config.max_iterations;

        let mut request = LlmRequest::new(run.session.messages.clone());
        if let Some(system) = &self.config.system_prompt {
            request = request.with_system(system);
        }
        if !run.specs.is_empty() {
            let choice = if last { ToolChoice::None } else { ToolChoice::Auto };
            request = request.with_tools(run.specs.clone(), choice);
        }
        if let Some(model) = run.model {
            request = request.with_model(model);
        }
        if let Some(max_tokens) = self.config.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }

        run.session.log(
            DebugKind::ModelCall,
            json!({"iteration": run.iterations, "messages": run.session.messages.len(), "last": last}),
        );
        let response = match self.llm.complete(request).await {
            Ok(response) => response,
            Err(e) => {
                let message = e.to_string();
                warn!(iteration = run.iterations, error = %message, "model call failed");
                run.session
                    .log(DebugKind::TransportError, json!({"error": message}));
                return Phase::Finished(
                    Termination::TransportError,
                    format!(
                        "Sorry, the request could not be completed ({}): {}",
                        Error::from(e).kind().as_str(),
                        message
                    ),
                );
            }
        };
        run.session.usage.add(response.usage);
        run.session.log(
            DebugKind::ModelResponse,
            json!({"stop_reason": response.stop_reason, "tool_uses": response.tool_uses().len()}),
        );

        if !response.tool_uses().is_empty() {
            self.handle_tool_uses(run, response).await;
            return Phase::AwaitingModel;
        }

        let text = response.text();
        run.session.push(Message::assistant_blocks(response.content));

        if response.stop_reason == StopReason::MaxTokens {
            run.partial.push_str(&text);
            run.session
                .log(DebugKind::MaxTokensContinue, json!({"chars": text.len()}));
            run.session.push(Message::user(&self.config.continue_prompt));
            return Phase::AwaitingModel;
        }

        let answer = format!("{}{}", std::mem::take(&mut run.partial), text);
        if run.awaiting_final {
            return Phase::Finished(Termination::TextAsyncResolved, answer);
        }

        let tasks = match run.transport {
            Some(_) => self.detector.detect(&answer),
            None => Vec::new(),
        };
        if tasks.is_empty() {
            if !run.reprompted && self.config.looks_incomplete(&answer) {
                run.reprompted = true;
                run.session.log(DebugKind::CompletenessReprompt, json!({"answer": answer}));
                run.session.push(Message::user(&self.config.completeness_prompt));
                return Phase::AwaitingModel;
            }
            return Phase::Finished(Termination::TextNoAsync, answer);
        }

        self.wait_for_tasks(run, tasks).await;
        run.awaiting_final = true;
        Phase::AwaitingModel
    }

    /// Run every requested tool; results are appended in request order
    async fn handle_tool_uses(&self, run: &mut Run<'_>, response: LlmResponse) {
        let calls: Vec<(String, String, Value)> = response
            .tool_uses()
            .iter()
            .map(|u| (u.id.to_string(), u.name.to_string(), u.input.clone()))
            .collect();
        run.session.push(Message::assistant_blocks(response.content));

        for (_, name, input) in &calls {
            run.session
                .log(DebugKind::ToolCall, json!({"tool": name, "input": input}));
        }
        run.tool_calls += calls.len() as u32;

        let transport = run.transport.clone();
        let results = join_all(calls.iter().map(|(id, name, input)| {
            let transport = transport.clone();
            async move {
                let outcome = match transport {
                    Some(t) => t.call_tool(name, input.clone()).await.map_err(|e| e.to_string()),
                    None => Err("no tool server is configured".to_string()),
                };
                (id.clone(), name.clone(), outcome)
            }
        }))
        .await;

        let mut blocks = Vec::with_capacity(results.len());
        for (id, name, outcome) in results {
            let block = match outcome {
                Ok(result) => {
                    if result.is_error {
                        run.session.log(
                            DebugKind::ToolError,
                            json!({"tool": name, "error": result.text_content()}),
                        );
                    }
                    ContentBlock::tool_result(id, result.text_content(), result.is_error)
                }
                Err(e) => {
                    warn!(tool = %name, error = %e, "tool call failed");
                    run.session
                        .log(DebugKind::ToolError, json!({"tool": name, "error": e}));
                    ContentBlock::tool_result(id, format!("Tool {} failed: {}", name, e), true)
                }
            };
            blocks.push(block);
        }
        run.session.push(Message::tool_results(blocks));
    }

    /// Poll each task to a terminal state, then ask for the final analysis
    async fn wait_for_tasks(&self, run: &mut Run<'_>, tasks: Vec<TaskRef>) {
        run.session.log(
            DebugKind::TasksDetected,
            json!({"tasks": tasks.iter().map(TaskRef::id).collect::<Vec<_>>()}),
        );
        for task in &tasks {
            run.session
                .pending_tasks
                .insert(task.id().to_string(), PendingTask::new(task.clone()));
        }

        let Some(transport) = run.transport.clone() else {
            return;
        };
        let poller = Poller::new(self.config.poll_interval())
            .with_max_attempts(self.config.max_retries)
            .with_deadline(self.config.task_timeout());

        for task in &tasks {
            let status_tools = &run.status_tools;
            let transport = &transport;
            let outcome = poller
                .run(|attempt| async move {
                    debug!(task = task.id(), attempt, "checking task status");
                    Ok(check_status(&**transport, status_tools, task).await)
                })
                .await;

            run.task_polls += outcome.as_ref().map(PollOutcome::attempts).unwrap_or(1);
            if let Some(entry) = run.session.pending_tasks.get_mut(task.id()) {
                match outcome {
                    Ok(PollOutcome::Done { value, attempts }) => {
                        entry.polls = attempts;
                        match value {
                            Ok(result) => {
                                entry.status = TaskStatus::Complete;
                                entry.result = Some(result);
                            }
                            Err(error) => {
                                entry.status = TaskStatus::Error;
                                entry.error = Some(error);
                            }
                        }
                    }
                    Ok(PollOutcome::Exhausted { attempts }) => {
                        entry.polls = attempts;
                        entry.status = TaskStatus::Timeout;
                        entry.error = Some(Error::TaskTimeout(task.id().to_string()).to_string());
                    }
                    Err(e) => {
                        entry.status = TaskStatus::Error;
                        entry.error = Some(e.to_string());
                    }
                }
                let detail = json!({"task": task.id(), "status": entry.status, "polls": entry.polls});
                run.session.log(DebugKind::TaskResolved, detail);
            }
        }

        run.session.settle_tasks();
        let summary = task_summary(&run.session.resolved_tasks);
        run.session.push(Message::user(summary));
    }
}

type StatusCheck = PollStep<std::result::Result<Value, String>>;

/// Ask the status tools in order; the first one that answers decides
async fn check_status(transport: &dyn ToolTransport, status_tools: &[String], task: &TaskRef) -> StatusCheck {
    for tool in status_tools {
        match transport.call_tool(tool, task.arguments()).await {
            Ok(result) if !result.is_error => return classify_status(&result),
            Ok(result) => debug!(tool = %tool, error = %result.text_content(), "status tool rejected"),
            Err(e) => debug!(tool = %tool, error = %e, "status tool failed"),
        }
    }
    PollStep::Pending
}

fn classify_status(result: &ToolCallResult) -> StatusCheck {
    let text = result.text_content();
    let parsed = result.json_content();
    let status = parsed
        .as_ref()
        .and_then(|v| v.get("status").or_else(|| v.get("state")))
        .and_then(Value::as_str)
        .map(str::to_lowercase)
        .unwrap_or_else(|| text.to_lowercase());

    let has = |words: &[&str]| words.iter().any(|w| status.contains(w));
    if has(&["fail", "error", "cancel", "abort"]) {
        let error = parsed
            .as_ref()
            .and_then(|v| v.get("error").or_else(|| v.get("message")))
            .map(|e| e.as_str().map(str::to_string).unwrap_or_else(|| e.to_string()))
            .unwrap_or(text);
        PollStep::Done(Err(error))
    } else if has(&["complete", "succeeded", "success", "done"]) {
        let value = parsed
            .map(|v| v.get("result").cloned().unwrap_or(v))
            .unwrap_or(Value::String(text));
        PollStep::Done(Ok(value))
    } else {
        PollStep::Pending
    }
}

/// Synthesized user turn listing results and errors
fn task_summary(tasks: &[PendingTask]) -> String {
    let mut results = Vec::new();
    let mut errors = Vec::new();
    for task in tasks {
        match (&task.status, &task.result, &task.error) {
            (TaskStatus::Complete, Some(result), _) => {
                results.push(format!("- {}: {}", task.task.id(), result));
            }
            (_, _, error) => errors.push(format!(
                "- {} ({:?}): {}",
                task.task.id(),
                task.status,
                error.as_deref().unwrap_or("no result")
            )),
        }
    }

    let mut text = String::from("The asynchronous tasks have finished.\n");
    if !results.is_empty() {
        text.push_str("\nResults:\n");
        text.push_str(&results.join("\n"));
        text.push('\n');
    }
    if !errors.is_empty() {
        text.push_str("\nErrors:\n");
        text.push_str(&errors.join("\n"));
        text.push('\n');
    }
    text.push_str("\nPlease provide the final analysis based on these results.");
    text
}
