//! The agent loop: call the model, dispatch its tool calls, fold the
//! results back into the transcript, repeat.
//!
//! Entry point: [`AgentLoop::run`]. Each turn checks cancellation, compacts
//! the transcript if it is over budget, calls the [`LlmClient`], and either
//! finishes or dispatches tool calls serially in the order the model
//! emitted them.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;

use ba_domain::cancel::CancelToken;
use ba_domain::config::{AgentConfig, Config};
use ba_domain::error::{Error, Result};
use ba_domain::message::{ContentBlock, Message};
use ba_domain::stream::Usage;
use ba_domain::trace::TraceEvent;
use ba_providers::{ChatRequest, DeltaCallback, LlmClient};

use super::compact::Compactor;
use super::log_sink::{LogEntry, LogLevel, LogSink, NullLogSink};
use super::tools::{build_tool_result, NoTools, ToolCatalog, ToolExecutor, ToolOutput};

/// Back-to-back turns without tool calls or a terminal stop reason that an
/// unbounded task tolerates before it is considered done.
const MAX_CONTINUATIONS: u32 = 3;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TurnEvent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Events emitted while a task runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Incremental text from the assistant.
    AssistantDelta { text: String },

    /// The model is invoking a tool.
    ToolCall {
        call_id: String,
        tool_name: String,
        input: Value,
    },

    /// Tool execution result (text only; images are omitted).
    ToolResult {
        call_id: String,
        tool_name: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },

    /// The transcript was compacted before the next call.
    Compaction {
        mode: String,
        messages_before: usize,
        messages_after: usize,
    },

    /// The task finished with this assistant text.
    Final { content: String },

    /// The task ended without finishing.
    Stopped { reason: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-task state, owned by exactly one [`AgentLoop::run`].
#[derive(Debug, Clone)]
pub struct TaskContext {
    id: Uuid,
    cancel: CancelToken,
    steps: u32,
    budget: Option<u32>,
}

impl TaskContext {
    /// `budget: None` runs until completion or cancellation.
    pub fn new(cancel: CancelToken, budget: Option<u32>) -> Self {
        Self {
            id: Uuid::new_v4(),
            cancel,
            steps: 0,
            budget,
        }
    }

    pub fn from_config(config: &AgentConfig, cancel: CancelToken) -> Self {
        Self::new(cancel, config.step_budget())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    pub fn budget(&self) -> Option<u32> {
        self.budget
    }

    fn budget_exhausted(&self) -> bool {
        self.budget.is_some_and(|b| self.steps >= b)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Done { final_text: String },
    /// Stopped by the user. Not an error.
    Cancelled,
    StepLimitReached,
    /// The backend could not be reached or answered with an error.
    Failed { message: String },
}

impl TaskOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOutcome::Done { .. } => "done",
            TaskOutcome::Cancelled => "cancelled",
            TaskOutcome::StepLimitReached => "step_limit_reached",
            TaskOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task_id: Uuid,
    pub outcome: TaskOutcome,
    pub steps: u32,
    /// Summed over every model call of the task, summaries excluded.
    pub usage: Usage,
    pub conversation: Vec<Message>,
}

/// A tool call lifted out of the response before the response is moved
/// into the transcript.
struct PendingCall {
    id: String,
    name: String,
    input: Value,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AgentLoop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AgentLoop {
    client: Arc<dyn LlmClient>,
    compactor: Compactor,
    executor: Arc<dyn ToolExecutor>,
    catalog: ToolCatalog,
    system_prompt: Option<String>,
    log: Arc<dyn LogSink>,
    events: Option<mpsc::UnboundedSender<TurnEvent>>,
}

impl AgentLoop {
    /// A loop with no tools, no log sink and no event channel.
    pub fn new(client: Arc<dyn LlmClient>, compactor: Compactor) -> Self {
        Self {
            client,
            compactor,
            executor: Arc::new(NoTools),
            catalog: ToolCatalog::new(),
            system_prompt: None,
            log: Arc::new(NullLogSink),
            events: None,
        }
    }

    /// Compactor and system prompt taken from `config`.
    pub fn from_config(client: Arc<dyn LlmClient>, config: &Config) -> Self {
        let mut agent = Self::new(client, Compactor::new(config.compaction.clone()));
        agent.system_prompt = config.agent.system_prompt.clone();
        agent
    }

    pub fn with_tools(mut self, executor: Arc<dyn ToolExecutor>, catalog: ToolCatalog) -> Self {
        self.executor = executor;
        self.catalog = catalog;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_log_sink(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = log;
        self
    }

    /// Publish [`TurnEvent`]s on `tx`. A closed receiver is ignored.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<TurnEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Start a fresh conversation from `task` and run it.
    pub async fn run_task(&self, task: impl Into<String>, ctx: &mut TaskContext) -> Result<TaskReport> {
        self.run(vec![Message::user(task)], ctx).await
    }

    /// Drive `conversation` until the model finishes, the task is
    /// cancelled, or the step budget runs out.
    ///
    /// Cancellation and the step limit are outcomes, not errors. Errors
    /// from the model call (auth failures after a refresh, provider and
    /// network errors) end the task and are returned.
    pub async fn run(&self, conversation: Vec<Message>, ctx: &mut TaskContext) -> Result<TaskReport> {
        let span = tracing::info_span!("task", task_id = %ctx.id);
        self.run_inner(conversation, ctx).instrument(span).await
    }

    async fn run_inner(
        &self,
        mut conversation: Vec<Message>,
        ctx: &mut TaskContext,
    ) -> Result<TaskReport> {
        let mut usage = Usage::default();
        let mut continuations = 0u32;

        self.log.append(
            LogEntry::info("task started")
                .with_fields(json!({
                "task_id": ctx.id.to_string(),
                "messages": conversation.len(),
                "budget": ctx.budget,
            })),
        );

        let forward = self.events.clone().map(|tx| {
            move |d: &str| {
                let _ = tx.send(TurnEvent::AssistantDelta { text: d.to_owned() });
            }
        });
        let on_delta: Option<&DeltaCallback> = forward.as_ref().map(|f| f as &DeltaCallback);

        let outcome = loop {
            if ctx.cancel.is_cancelled() {
                break TaskOutcome::Cancelled;
            }

            // ── Compaction ───────────────────────────────────────────
            if let Some(report) = self
                .compactor
                .compact_if_needed(self.client.as_ref(), &mut conversation, &ctx.cancel)
                .await
            {
                self.log.append(
                    LogEntry::info("conversation compacted").with_fields(json!({
                        "mode": report.mode.as_str(),
                        "messages_before": report.messages_before,
                        "messages_after": report.messages_after,
                        "tokens_before": report.tokens_before,
                        "tokens_after": report.tokens_after,
                    })),
                );
                self.emit(TurnEvent::Compaction {
                    mode: report.mode.as_str().to_owned(),
                    messages_before: report.messages_before,
                    messages_after: report.messages_after,
                });
            }

            // ── Model call ───────────────────────────────────────────
            let page_url = self.executor.page_url().await;
            let req = ChatRequest {
                messages: conversation.clone(),
                system: self.system_prompt.clone(),
                tools: self.catalog.definitions_for(page_url.as_deref()),
                ..Default::default()
            };
            tracing::debug!(
                step = ctx.steps,
                messages = req.messages.len(),
                tools = req.tools.len(),
                "calling model"
            );

            let resp = match self.client.chat(req, &ctx.cancel, on_delta).await {
                Ok(resp) => resp,
                Err(Error::Cancelled) => break TaskOutcome::Cancelled,
                Err(e) if e.is_network() || matches!(e, Error::Provider { .. }) => {
                    tracing::warn!(error = %e, step = ctx.steps, "model call failed, ending task");
                    self.log.append(
                        LogEntry::new(LogLevel::Error, "model call failed")
                            .with_fields(json!({ "error": e.to_string(), "step": ctx.steps })),
                    );
                    break TaskOutcome::Failed {
                        message: e.to_string(),
                    };
                }
                // Auth failures and anything unclassified leave the loop.
                Err(e) => {
                    tracing::warn!(error = %e, step = ctx.steps, "model call failed, ending task");
                    self.log.append(
                        LogEntry::new(LogLevel::Error, "model call failed")
                            .with_fields(json!({ "error": e.to_string(), "step": ctx.steps })),
                    );
                    TraceEvent::TaskFinished {
                        outcome: "failed".into(),
                        steps: ctx.steps,
                    }
                    .emit();
                    return Err(e);
                }
            };

            if let Some(u) = &resp.usage {
                usage.add(u);
            }
            let calls: Vec<PendingCall> = resp
                .tool_calls()
                .map(|c| PendingCall {
                    id: c.id.to_owned(),
                    name: c.name.to_owned(),
                    input: c.input.clone(),
                })
                .collect();
            let text = resp.text();
            let stop_reason = resp.stop_reason;
            conversation.push(Message::assistant_blocks(resp.content));

            // ── No tool calls: finish or keep going ──────────────────
            if calls.is_empty() {
                if stop_reason.is_terminal() {
                    break TaskOutcome::Done { final_text: text };
                }
                continuations += 1;
                ctx.steps += 1;
                tracing::debug!(?stop_reason, continuations, "no tool calls, continuing");
                if ctx.budget.is_none() && continuations >= MAX_CONTINUATIONS {
                    break TaskOutcome::Done { final_text: text };
                }
                if ctx.budget_exhausted() {
                    break TaskOutcome::StepLimitReached;
                }
                continue;
            }
            continuations = 0;

            // ── Tool dispatch ────────────────────────────────────────
            let results = self.dispatch(&calls, &ctx.cancel).await;
            conversation.push(Message::user_blocks(results));
            ctx.steps += 1;

            if ctx.budget_exhausted() {
                break TaskOutcome::StepLimitReached;
            }
        };

        match &outcome {
            TaskOutcome::Done { final_text } => self.emit(TurnEvent::Final {
                content: final_text.clone(),
            }),
            TaskOutcome::Cancelled => self.emit(TurnEvent::Stopped {
                reason: "stopped by user".into(),
            }),
            TaskOutcome::StepLimitReached => self.emit(TurnEvent::Stopped {
                reason: format!("step limit of {} reached", ctx.steps),
            }),
            TaskOutcome::Failed { message } => self.emit(TurnEvent::Stopped {
                reason: message.clone(),
            }),
        }

        tracing::info!(outcome = outcome.as_str(), steps = ctx.steps, "task finished");
        self.log.append(
            LogEntry::info("task finished")
                .with_fields(json!({ "outcome": outcome.as_str(), "steps": ctx.steps })),
        );
        TraceEvent::TaskFinished {
            outcome: outcome.as_str().to_owned(),
            steps: ctx.steps,
        }
        .emit();

        Ok(TaskReport {
            task_id: ctx.id,
            outcome,
            steps: ctx.steps,
            usage,
            conversation,
        })
    }

    /// Run `calls` one at a time, in order, and return one `tool_result`
    /// per call. Calls left over after cancellation still get a result so
    /// none is orphaned.
    async fn dispatch(&self, calls: &[PendingCall], cancel: &CancelToken) -> Vec<ContentBlock> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            if cancel.is_cancelled() {
                results.push(build_tool_result(
                    &call.id,
                    ToolOutput::error("task was cancelled before this tool ran"),
                ));
                continue;
            }

            self.emit(TurnEvent::ToolCall {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                input: call.input.clone(),
            });

            let started = Instant::now();
            let output = self.executor.execute(&call.name, &call.input).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let block = build_tool_result(&call.id, output);
            let (is_error, text) = match &block {
                ContentBlock::ToolResult {
                    content, is_error, ..
                } => (
                    *is_error,
                    content
                        .iter()
                        .filter_map(ContentBlock::as_text)
                        .collect::<Vec<_>>()
                        .join("\n"),
                ),
                _ => (false, String::new()),
            };

            tracing::debug!(tool = %call.name, duration_ms, is_error, "tool dispatched");
            TraceEvent::ToolDispatched {
                tool: call.name.clone(),
                duration_ms,
                is_error,
            }
            .emit();
            if is_error {
                self.log.append(
                    LogEntry::warn("tool returned an error")
                        .with_fields(json!({ "tool": call.name, "error": text })),
                );
            }

            self.emit(TurnEvent::ToolResult {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                content: text,
                is_error,
            });
            results.push(block);
        }
        results
    }

    fn emit(&self, event: TurnEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}
