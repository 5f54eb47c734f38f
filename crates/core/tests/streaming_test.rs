//! Integration tests for streaming runs
//!
//! Run with: cargo test -p strand-core --test streaming_test

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;
use strand_core::{
    Agent, AgentConfig, EchoTool, FnTool, MockFailure, MockLlmDriver, MockLlmResponse,
    StreamEvent, ToolCall, ToolExecutionResult,
};

fn agent(driver: &MockLlmDriver) -> Agent {
    Agent::new(AgentConfig::new("streamer"), Arc::new(driver.clone()))
}

#[tokio::test]
async fn test_stream_yields_deltas_then_done() {
    let driver = MockLlmDriver::with_responses(vec![MockLlmResponse::text("one two three")]);
    let events: Vec<StreamEvent> = agent(&driver).stream("count").collect().await;

    let deltas: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::TextDelta { delta, .. } => Some(delta.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(deltas, vec!["one ", "two ", "three"]);

    // accumulated text travels with every delta
    assert!(matches!(
        &events[2],
        StreamEvent::TextDelta { text, .. } if text == "one two three"
    ));
    assert_eq!(events.last(), Some(&StreamEvent::done("one two three")));
    assert_eq!(
        events.iter().filter(|e| e.is_done()).count(),
        1,
        "exactly one done event"
    );
}

#[tokio::test]
async fn test_stream_reports_usage_and_tool_events() {
    let driver = MockLlmDriver::with_responses(vec![
        MockLlmResponse::with_tools("", vec![ToolCall::new("c1", "echo", json!({"message": "hi"}))]),
        MockLlmResponse::text("done"),
    ]);
    let stream = agent(&driver).with_tool(EchoTool).stream("go");
    let types: Vec<&'static str> = stream.map(|e| e.event_type()).collect().await;

    assert_eq!(
        types,
        vec![
            "usage",
            "finish_reason",
            "tool_call_started",
            "tool_call_result",
            "step_finished",
            "text_delta",
            "usage",
            "finish_reason",
            "step_finished",
            "done",
        ]
    );
}

#[tokio::test]
async fn test_stream_failure_ends_with_error_then_done() {
    let driver = MockLlmDriver::failing("backend down");
    let events: Vec<StreamEvent> = agent(&driver).stream("hi").collect().await;

    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], StreamEvent::Error { message } if message.contains("backend down")));
    assert_eq!(events[1], StreamEvent::done(""));
}

#[tokio::test]
async fn test_mid_stream_failure_keeps_emitted_deltas() {
    let driver = MockLlmDriver::with_responses(vec![MockLlmResponse {
        failure: Some(MockFailure::MidStream("connection reset".into())),
        ..MockLlmResponse::text("partial answer")
    }]);
    let types: Vec<&'static str> = agent(&driver)
        .stream("hi")
        .map(|e| e.event_type())
        .collect()
        .await;

    assert_eq!(types, vec!["text_delta", "error", "done"]);
}

#[tokio::test]
async fn test_cancel_stops_the_stream() {
    let driver = MockLlmDriver::with_responses(vec![
        MockLlmResponse::with_tools("", vec![ToolCall::new("c1", "slow", json!({}))]),
        MockLlmResponse::text("never streamed"),
    ]);
    let slow = FnTool::new("slow", "Slow tool", json!({"type": "object"}), |_| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        ToolExecutionResult::success(json!("late"))
    });
    let mut stream = agent(&driver).with_tool(slow).stream("go");

    loop {
        match stream.next().await {
            Some(StreamEvent::ToolCallStarted { .. }) => break,
            Some(_) => continue,
            None => panic!("stream ended before the tool started"),
        }
    }

    stream.cancel();
    assert!(stream.is_finished());
    assert!(stream.next().await.is_none());
    assert_eq!(driver.call_count(), 1);
}

#[tokio::test]
async fn test_dropping_the_stream_aborts_the_run() {
    let completed = Arc::new(AtomicBool::new(false));
    let flag = completed.clone();
    let slow = FnTool::new("slow", "Slow tool", json!({"type": "object"}), move |_| {
        let flag = flag.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            flag.store(true, Ordering::SeqCst);
            ToolExecutionResult::success(json!("finished"))
        }
    });
    let driver = MockLlmDriver::with_responses(vec![
        MockLlmResponse::with_tools("", vec![ToolCall::new("c1", "slow", json!({}))]),
        MockLlmResponse::text("never requested"),
    ]);

    let mut stream = agent(&driver).with_tool(slow).stream("go");
    while let Some(event) = stream.next().await {
        if matches!(event, StreamEvent::ToolCallStarted { .. }) {
            break;
        }
    }
    drop(stream);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(!completed.load(Ordering::SeqCst));
    assert_eq!(driver.call_count(), 1);
}
