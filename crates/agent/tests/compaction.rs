//! Compaction through a real gateway against a wiremock backend.

use std::sync::Arc;

use ba_agent::runtime::{AgentLoop, CompactionMode, Compactor, TaskContext, TaskOutcome};
use ba_domain::cancel::CancelToken;
use ba_domain::config::CompactionConfig;
use ba_domain::message::{ContentBlock, Message, Role};
use ba_providers::anthropic::AnthropicAdapter;
use ba_providers::traits::Endpoint;
use ba_providers::{Gateway, HttpTransport};
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gateway(server: &MockServer) -> Gateway {
    Gateway::new(
        Arc::new(AnthropicAdapter),
        Endpoint::new(&server.uri(), "claude-test", 1024),
        Arc::new(HttpTransport::new().unwrap()),
    )
    .with_api_key("sk-test")
}

fn config(threshold: usize) -> CompactionConfig {
    CompactionConfig {
        threshold_tokens: threshold,
        base_overhead_tokens: 0,
        ..Default::default()
    }
}

fn screenshot(i: usize) -> Message {
    Message::user_blocks(vec![
        ContentBlock::text(format!("page {i}")),
        ContentBlock::image("image/png", "iVBORw0KGgo="),
    ])
}

/// Four screenshots interleaved with long assistant turns.
fn long_browsing_session() -> Vec<Message> {
    let mut conv = vec![Message::user("Compare prices on the first four result pages")];
    for i in 0..4 {
        conv.push(Message::assistant("x".repeat(2_000)));
        conv.push(screenshot(i));
    }
    conv.push(Message::assistant("Now checking the totals."));
    conv
}

#[tokio::test]
async fn small_conversation_is_left_alone() {
    let server = MockServer::start().await;
    let compactor = Compactor::new(CompactionConfig::default());
    let mut conv: Vec<Message> = (0..5)
        .map(|i| {
            if i % 2 == 0 {
                Message::user("u".repeat(40_000))
            } else {
                Message::assistant("a".repeat(40_000))
            }
        })
        .collect();
    let before = conv.clone();

    // 8 000 overhead + 200 000 chars / 4 = 58 000 estimated tokens.
    assert!(compactor.estimator().estimate(&conv) < 170_000);
    let report = compactor
        .compact_if_needed(&gateway(&server), &mut conv, &CancelToken::new())
        .await;

    assert!(report.is_none());
    assert_eq!(conv, before);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn summary_keeps_three_latest_screenshots() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_string_contains("Do not call any tools"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "claude-test",
            "content": [{"type": "text", "text": "Checked pages 0-3. RESUME POINT: sum the totals."}],
            "stop_reason": "end_turn"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let compactor = Compactor::new(config(6_000));
    let mut conv = long_browsing_session();
    let report = compactor
        .compact_if_needed(&gateway(&server), &mut conv, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(report.mode, CompactionMode::Summary);
    assert!(report.messages_after < report.messages_before);
    assert!(report.tokens_after < report.tokens_before);

    assert_eq!(conv.len(), 5);
    assert_eq!(conv[0].role, Role::Assistant);
    assert!(conv[1].extract_all_text().contains("RESUME POINT: sum the totals."));
    let kept: Vec<String> = conv[2..].iter().map(Message::extract_all_text).collect();
    assert_eq!(kept, vec!["page 1", "page 2", "page 3"]);

    // The summary request itself carried no images.
    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert!(!body.to_string().contains("iVBORw0KGgo="));
    assert!(body.get("tools").is_none());

    // Running again on the compacted transcript is a no-op.
    let again = compactor
        .compact_if_needed(&gateway(&server), &mut conv, &CancelToken::new())
        .await;
    assert!(again.is_none());
}

#[tokio::test]
async fn provider_error_falls_back_to_emergency() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "type": "error",
            "error": {"type": "api_error", "message": "Internal server error"}
        })))
        .mount(&server)
        .await;

    let compactor = Compactor::new(config(6_000));
    let mut conv = long_browsing_session();
    let report = compactor
        .compact_if_needed(&gateway(&server), &mut conv, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(report.mode, CompactionMode::Emergency);
    assert_eq!(conv.len(), 4);
    assert!(conv[0]
        .extract_all_text()
        .contains("Compare prices on the first four result pages"));
}

#[test]
fn emergency_compaction_needs_no_backend() {
    let compactor = Compactor::new(config(1));
    let conv = long_browsing_session();
    let out = compactor.emergency_compact(&conv);
    assert_eq!(out.len(), 4);
    assert!(out.len() < conv.len());
}

#[tokio::test]
async fn loop_compacts_before_calling_the_model() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_string_contains("Do not call any tools"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "claude-test",
            "content": [{"type": "text", "text": "Summary. RESUME POINT: answer."}],
            "stop_reason": "end_turn"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_string_contains("Summary of the conversation so far"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "claude-test",
            "content": [{"type": "text", "text": "The cheapest is page 2."}],
            "stop_reason": "end_turn"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let agent = AgentLoop::new(Arc::new(gateway(&server)), Compactor::new(config(6_000)));
    let mut conv = long_browsing_session();
    conv.push(Message::user("Which page is cheapest?"));

    let mut ctx = TaskContext::new(CancelToken::new(), Some(5));
    let report = agent.run(conv, &mut ctx).await.unwrap();

    assert_eq!(
        report.outcome,
        TaskOutcome::Done {
            final_text: "The cheapest is page 2.".into()
        }
    );
}
