//! `browseragent ask`: run one task and stream the answer to stdout.
//!
//! No tool executor is attached, so this exercises the gateway,
//! compaction and the loop's termination logic only.

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;

use ba_domain::cancel::CancelToken;
use ba_domain::config::Config;
use ba_providers::{Gateway, ProviderRegistry};

use crate::runtime::{AgentLoop, TaskContext, TaskOutcome, TracingLogSink, TurnEvent};

/// Run `task` and print the result. Returns `false` when the task did not
/// finish (cancelled or out of steps).
pub async fn run(config: Config, task: String, max_steps: Option<u32>) -> anyhow::Result<bool> {
    let registry = ProviderRegistry::with_defaults();
    let secrets = super::task_secret_store(&config);
    let gateway = Gateway::from_config(&config.llm, &registry, secrets)
        .context("setting up the LLM gateway")?;
    tracing::debug!(
        provider = gateway.provider_name(),
        endpoint = %gateway.endpoint().base_url,
        "gateway ready"
    );

    let (tx, mut rx) = mpsc::unbounded_channel::<TurnEvent>();
    let agent = AgentLoop::from_config(Arc::new(gateway), &config)
        .with_log_sink(Arc::new(TracingLogSink))
        .with_events(tx);

    let budget = match max_steps {
        Some(0) => None,
        Some(n) => Some(n),
        None => config.agent.step_budget(),
    };
    let cancel = CancelToken::new();
    let mut ctx = TaskContext::new(cancel.clone(), budget);

    // Ctrl-C stops the task at the next check and aborts an in-flight call.
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(event) = rx.recv().await {
            match event {
                TurnEvent::AssistantDelta { text } => {
                    print!("{text}");
                    stdout.flush().ok();
                }
                TurnEvent::Compaction {
                    mode,
                    messages_before,
                    messages_after,
                } => {
                    eprintln!("\x1b[2m[compacted ({mode}): {messages_before} -> {messages_after} messages]\x1b[0m");
                }
                TurnEvent::ToolCall { tool_name, .. } => {
                    eprintln!("\x1b[2m[tool: {tool_name}]\x1b[0m");
                }
                TurnEvent::Final { .. } => println!(),
                TurnEvent::Stopped { reason } => eprintln!("\n{reason}"),
                TurnEvent::ToolResult { .. } => {}
            }
        }
    });

    let result = agent.run_task(task, &mut ctx).await;
    interrupt.abort();
    // Closing the event channel lets the printer drain and exit.
    drop(agent);
    printer.await.ok();

    let report = result.context("task failed")?;
    eprintln!(
        "\x1b[2m[{} step(s), {} input / {} output tokens]\x1b[0m",
        report.steps, report.usage.input_tokens, report.usage.output_tokens
    );
    Ok(matches!(report.outcome, TaskOutcome::Done { .. }))
}
