//! Integration tests for the agent step loop
//!
//! Run with: cargo test -p strand-core --test loop_test

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use strand_core::{
    Agent, AgentConfig, Checkpoint, CheckpointStore, CollectingEventEmitter, ContentModeration, EchoTool,
    FnTool, GuardrailPipeline, InMemoryCheckpointStore, LoopState, Message, MessageContent,
    MessageRole, MockLlmDriver, MockLlmResponse, PiiAction, PiiDetection, RuntimeError,
    StopCondition, StreamEvent, TerminalState, TokenUsage, ToolCall, ToolExecutionResult,
};
use tokio_util::sync::CancellationToken;

fn agent(config: AgentConfig, driver: &MockLlmDriver) -> Agent {
    Agent::new(config, Arc::new(driver.clone()))
}

fn echo_call(id: &str, message: &str) -> ToolCall {
    ToolCall::new(id, "echo", json!({ "message": message }))
}

fn structured(message: &Message) -> Value {
    match &message.content {
        MessageContent::Structured(value) => value.clone(),
        MessageContent::Text(text) => panic!("expected structured content, got text '{text}'"),
    }
}

fn sleepy_tool(name: &'static str, delay_ms: u64) -> FnTool {
    FnTool::new(name, "Sleeps then reports", json!({"type": "object"}), move |_| async move {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        ToolExecutionResult::success(json!({ "tool": name }))
    })
}

#[test_log::test(tokio::test)]
async fn test_text_only_run_finishes_in_one_step() {
    let driver = MockLlmDriver::with_responses(vec![MockLlmResponse::text("Hello there")]);
    let result = agent(AgentConfig::new("greeter"), &driver)
        .run("hi")
        .await
        .unwrap();

    assert_eq!(result.text, "Hello there");
    assert_eq!(result.steps, 1);
    assert_eq!(result.terminal_state, TerminalState::Done);
    assert!(result.structured_output.is_none());
    assert_eq!(driver.call_count(), 1);
}

#[tokio::test]
async fn test_step_limit_stops_the_loop() {
    let driver = MockLlmDriver::always(MockLlmResponse::with_tools(
        "checking",
        vec![ToolCall::new("", "echo", json!({"message": "again"}))],
    ));
    let config = AgentConfig::new("looper").with_max_steps(3);
    let result = agent(config, &driver).with_tool(EchoTool).run("go").await.unwrap();

    assert_eq!(result.steps, 3);
    assert!(result.hit_step_limit());
    assert_eq!(result.text, "checking");
    assert_eq!(driver.call_count(), 3);
}

#[tokio::test]
async fn test_tool_result_is_fed_back_to_the_model() {
    let driver = MockLlmDriver::with_responses(vec![
        MockLlmResponse::with_tools("", vec![echo_call("c1", "ping")]),
        MockLlmResponse::text("The tool said ping"),
    ]);
    let result = agent(AgentConfig::new("tooler"), &driver)
        .with_tool(EchoTool)
        .run("use the tool")
        .await
        .unwrap();

    assert_eq!(result.steps, 2);
    assert_eq!(result.text, "The tool said ping");

    let second_call = &driver.calls()[1];
    let assistant = &second_call[second_call.len() - 2];
    assert_eq!(assistant.role, MessageRole::Assistant);
    assert!(assistant.has_tool_calls());

    let tool_message = second_call.last().unwrap();
    assert_eq!(tool_message.role, MessageRole::Tool);
    assert_eq!(tool_message.tool_call_id.as_deref(), Some("c1"));
    assert_eq!(structured(tool_message), json!({"echo": "ping"}));
}

#[tokio::test]
async fn test_tool_catalogue_is_sent_with_each_call() {
    let driver = MockLlmDriver::with_responses(vec![MockLlmResponse::text("ok")]);
    let config = AgentConfig::new("catalogue").with_model("small-model");
    agent(config, &driver).with_tool(EchoTool).run("hi").await.unwrap();

    let configs = driver.call_configs();
    assert_eq!(configs[0].model.as_deref(), Some("small-model"));
    let names: Vec<&str> = configs[0].tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["echo"]);
}

#[tokio::test]
async fn test_unknown_tool_becomes_an_observation() {
    let driver = MockLlmDriver::with_responses(vec![
        MockLlmResponse::with_tools("", vec![ToolCall::new("c1", "missing", json!({}))]),
        MockLlmResponse::text("Sorry, that tool does not exist"),
    ]);
    let result = agent(AgentConfig::new("lost"), &driver).run("go").await.unwrap();

    assert_eq!(result.terminal_state, TerminalState::Done);
    let observation = structured(driver.calls()[1].last().unwrap());
    let error = observation["error"].as_str().unwrap();
    assert!(error.contains("missing"));
    assert!(error.contains("not found"));
}

#[tokio::test]
async fn test_invalid_arguments_become_an_observation() {
    let driver = MockLlmDriver::with_responses(vec![
        MockLlmResponse::with_tools("", vec![ToolCall::new("c1", "echo", json!({}))]),
        MockLlmResponse::text("retrying later"),
    ]);
    agent(AgentConfig::new("sloppy"), &driver)
        .with_tool(EchoTool)
        .run("go")
        .await
        .unwrap();

    let observation = structured(driver.calls()[1].last().unwrap());
    assert!(observation["error"].as_str().unwrap().contains("Invalid arguments"));
}

#[tokio::test]
async fn test_parallel_results_keep_call_order() {
    let driver = MockLlmDriver::with_responses(vec![
        MockLlmResponse::with_tools(
            "",
            vec![
                ToolCall::new("slow", "slow", json!({})),
                ToolCall::new("fast", "fast", json!({})),
            ],
        ),
        MockLlmResponse::text("both done"),
    ]);
    let emitter = CollectingEventEmitter::new();
    let agent = agent(AgentConfig::new("parallel"), &driver)
        .with_tool(sleepy_tool("slow", 50))
        .with_tool(sleepy_tool("fast", 0));

    agent
        .run_with(vec![Message::user("go")], &emitter, CancellationToken::new())
        .await
        .unwrap();

    // history is in call order
    let history = &driver.calls()[1];
    let ids: Vec<&str> = history
        .iter()
        .filter(|m| m.role == MessageRole::Tool)
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect();
    assert_eq!(ids, vec!["slow", "fast"]);

    // completion events are in finish order
    let finished: Vec<String> = emitter
        .events()
        .into_iter()
        .filter_map(|e| match e {
            StreamEvent::ToolCallResult { id, .. } => Some(id),
            _ => None,
        })
        .collect();
    assert_eq!(finished, vec!["fast", "slow"]);
}

#[tokio::test]
async fn test_sequential_tool_calls() {
    let driver = MockLlmDriver::with_responses(vec![
        MockLlmResponse::with_tools(
            "",
            vec![
                ToolCall::new("slow", "slow", json!({})),
                ToolCall::new("fast", "fast", json!({})),
            ],
        ),
        MockLlmResponse::text("done"),
    ]);
    let emitter = CollectingEventEmitter::new();
    let config = AgentConfig::new("sequential").with_parallel_tool_calls(false);
    agent(config, &driver)
        .with_tool(sleepy_tool("slow", 20))
        .with_tool(sleepy_tool("fast", 0))
        .run_with(vec![Message::user("go")], &emitter, CancellationToken::new())
        .await
        .unwrap();

    let finished: Vec<String> = emitter
        .events()
        .into_iter()
        .filter_map(|e| match e {
            StreamEvent::ToolCallResult { id, .. } => Some(id),
            _ => None,
        })
        .collect();
    assert_eq!(finished, vec!["slow", "fast"]);
}

#[tokio::test]
async fn test_usage_accumulates_across_steps() {
    let driver = MockLlmDriver::with_responses(vec![
        MockLlmResponse::with_tools("", vec![echo_call("c1", "x")]).usage(100, 20),
        MockLlmResponse::text("done").usage(150, 30),
    ]);
    let result = agent(AgentConfig::new("counter"), &driver)
        .with_tool(EchoTool)
        .run("go")
        .await
        .unwrap();

    assert_eq!(result.usage, TokenUsage::new(250, 50));
}

#[tokio::test]
async fn test_instructions_become_the_system_message() {
    let driver = MockLlmDriver::with_responses(vec![MockLlmResponse::text("ok")]);
    let config = AgentConfig::new("brief").with_instructions("Answer briefly.");
    agent(config, &driver).run("hi").await.unwrap();

    let first = &driver.calls()[0];
    assert_eq!(first[0].role, MessageRole::System);
    assert_eq!(first[0].text(), "Answer briefly.");
    assert_eq!(first[1].role, MessageRole::User);
}

#[tokio::test]
async fn test_empty_history_is_rejected() {
    let driver = MockLlmDriver::new();
    let err = agent(AgentConfig::new("empty"), &driver)
        .run_messages(vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::InvalidRequest(_)));
    assert_eq!(driver.call_count(), 0);
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let driver = MockLlmDriver::new();
    let err = agent(AgentConfig::new("zero").with_max_steps(0), &driver)
        .run("hi")
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Configuration(_)));
}

#[tokio::test]
async fn test_backend_failure_is_returned() {
    let driver = MockLlmDriver::failing("upstream exploded");
    let err = agent(AgentConfig::new("fragile"), &driver)
        .run("hi")
        .await
        .unwrap_err();
    assert!(err.is_backend());
    assert!(err.to_string().contains("upstream exploded"));
}

#[tokio::test]
async fn test_cancelled_run() {
    let driver = MockLlmDriver::with_responses(vec![MockLlmResponse::text("never")]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = agent(AgentConfig::new("cancelled"), &driver)
        .run_with(vec![Message::user("hi")], &CollectingEventEmitter::new(), cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Cancelled));
    assert_eq!(driver.call_count(), 0);
}

// ============================================================================
// Structured output
// ============================================================================

fn answer_schema() -> Value {
    json!({
        "type": "object",
        "properties": { "answer": { "type": "integer" } },
        "required": ["answer"]
    })
}

#[tokio::test]
async fn test_structured_output_is_parsed() {
    let driver = MockLlmDriver::with_responses(vec![MockLlmResponse::text(r#"{"answer": 42}"#)]);
    let config = AgentConfig::new("structured").with_output_schema(answer_schema());
    let result = agent(config, &driver).run("what is it?").await.unwrap();

    assert_eq!(result.structured_output, Some(json!({"answer": 42})));
}

#[tokio::test]
async fn test_structured_output_mismatch_fails() {
    let driver = MockLlmDriver::with_responses(vec![MockLlmResponse::text(r#"{"answer": "many"}"#)]);
    let config = AgentConfig::new("structured").with_output_schema(answer_schema());
    let err = agent(config, &driver).run("what is it?").await.unwrap_err();

    assert!(matches!(err, RuntimeError::StructuredOutputInvalid(_)));
}

#[tokio::test]
async fn test_structured_output_skipped_on_step_limit() {
    let driver = MockLlmDriver::always(MockLlmResponse::with_tools(
        "not json",
        vec![ToolCall::new("", "echo", json!({"message": "x"}))],
    ));
    let config = AgentConfig::new("structured")
        .with_output_schema(answer_schema())
        .with_max_steps(1);
    let result = agent(config, &driver).with_tool(EchoTool).run("go").await.unwrap();

    assert!(result.hit_step_limit());
    assert!(result.structured_output.is_none());
}

// ============================================================================
// Guardrails
// ============================================================================

#[tokio::test]
async fn test_input_guardrail_blocks_before_the_model() {
    let moderation = ContentModeration::new("moderation")
        .block_words(["harmful"])
        .unwrap();
    let pipeline = Arc::new(GuardrailPipeline::new().with(moderation));
    let driver = MockLlmDriver::new();

    let err = agent(AgentConfig::new("guarded"), &driver)
        .with_input_guardrails(pipeline)
        .run("do something harmful")
        .await
        .unwrap_err();

    assert!(matches!(err, RuntimeError::GuardrailBlocked { ref guardrail, .. } if guardrail == "moderation"));
    assert_eq!(driver.call_count(), 0);
}

#[tokio::test]
async fn test_input_redaction_reaches_the_model() {
    let pipeline = Arc::new(GuardrailPipeline::new().with(PiiDetection::new(PiiAction::Redact)));
    let driver = MockLlmDriver::with_responses(vec![MockLlmResponse::text("noted")]);

    agent(AgentConfig::new("private"), &driver)
        .with_input_guardrails(pipeline)
        .run("write to bob@example.com")
        .await
        .unwrap();

    let sent = driver.calls()[0].last().unwrap().text();
    assert!(!sent.contains("bob@example.com"));
    assert!(sent.starts_with("write to "));
}

#[tokio::test]
async fn test_output_guardrail_redacts_final_text() {
    let pipeline = Arc::new(GuardrailPipeline::new().with(PiiDetection::new(PiiAction::Redact)));
    let driver = MockLlmDriver::with_responses(vec![MockLlmResponse::text(
        "Contact alice@example.com for access",
    )]);

    let result = agent(AgentConfig::new("private"), &driver)
        .with_output_guardrails(pipeline)
        .run("who do I ask?")
        .await
        .unwrap();

    assert!(!result.text.contains("alice@example.com"));
    assert!(result.text.starts_with("Contact "));
    // the returned history carries the redacted answer too
    assert_eq!(result.messages.last().unwrap().text(), result.text);
}

#[tokio::test]
async fn test_output_guardrail_warning_is_emitted() {
    let moderation = ContentModeration::new("tone").warn_pattern("(?i)sorry").unwrap();
    let pipeline = Arc::new(GuardrailPipeline::new().with(moderation));
    let driver = MockLlmDriver::with_responses(vec![MockLlmResponse::text("Sorry, no idea")]);
    let emitter = CollectingEventEmitter::new();

    let result = agent(AgentConfig::new("polite"), &driver)
        .with_output_guardrails(pipeline)
        .run_with(vec![Message::user("hi")], &emitter, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.text, "Sorry, no idea");
    assert!(emitter
        .events()
        .iter()
        .any(|e| matches!(e, StreamEvent::Warning { source, .. } if source == "tone")));
}

// ============================================================================
// Checkpoints
// ============================================================================

#[tokio::test]
async fn test_checkpoint_saved_and_resumed() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let driver = MockLlmDriver::with_responses(vec![
        MockLlmResponse::with_tools("", vec![echo_call("c1", "x")]),
        MockLlmResponse::text("finished"),
    ]);
    let agent = agent(AgentConfig::new("durable"), &driver)
        .with_tool(EchoTool)
        .with_checkpoint_store(store.clone());

    let result = agent.run("go").await.unwrap();
    assert_eq!(result.text, "finished");

    // one id per run, overwritten after every step
    let checkpoints = store.list("durable").await.unwrap();
    assert_eq!(checkpoints.len(), 1);
    let checkpoint = &checkpoints[0];
    assert!(checkpoint.id.starts_with("durable-"));
    assert_eq!(checkpoint.state.step_index, 2);

    // a finished run resumes without calling the model again
    let resumed = agent.resume(&checkpoint.id).await.unwrap();
    assert_eq!(resumed.text, "finished");
    assert_eq!(resumed.steps, 2);
    assert_eq!(driver.call_count(), 2);
}

#[tokio::test]
async fn test_resume_continues_an_interrupted_run() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let state = LoopState {
        messages: vec![
            Message::user("go"),
            Message::assistant_with_tools("", vec![echo_call("c1", "x")]),
            Message::tool_result("c1", MessageContent::Structured(json!({"echo": "x"}))),
        ],
        step_index: 1,
        usage: TokenUsage::new(10, 5),
    };
    store
        .save(Checkpoint::new("durable-interrupted", "durable", state))
        .await
        .unwrap();

    let driver = MockLlmDriver::with_responses(vec![MockLlmResponse::text("picked up")]);
    let result = agent(AgentConfig::new("durable"), &driver)
        .with_checkpoint_store(store.clone())
        .resume("durable-interrupted")
        .await
        .unwrap();

    assert_eq!(result.text, "picked up");
    assert_eq!(result.steps, 2);
    assert_eq!(result.usage, TokenUsage::new(20, 10));
    assert_eq!(driver.calls()[0].len(), 3);

    let saved = store.load("durable-interrupted").await.unwrap();
    assert_eq!(saved.state.step_index, 2);
}

#[tokio::test]
async fn test_resume_errors() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    store
        .save(Checkpoint::new("other-1", "other", LoopState::default()))
        .await
        .unwrap();
    let driver = MockLlmDriver::new();

    let without_store = agent(AgentConfig::new("durable"), &driver);
    assert!(matches!(
        without_store.resume("x").await.unwrap_err(),
        RuntimeError::Configuration(_)
    ));

    let with_store = without_store.with_checkpoint_store(store);
    assert!(matches!(
        with_store.resume("missing").await.unwrap_err(),
        RuntimeError::CheckpointNotFound(_)
    ));
    assert!(matches!(
        with_store.resume("other-1").await.unwrap_err(),
        RuntimeError::InvalidRequest(_)
    ));
}

// ============================================================================
// Stop conditions and returned history
// ============================================================================

fn endless_echo() -> MockLlmDriver {
    MockLlmDriver::always(MockLlmResponse::with_tools("", vec![echo_call("", "again")]))
}

#[tokio::test]
async fn test_stop_condition_max_steps() {
    let driver = endless_echo();
    let config = AgentConfig::new("short")
        .with_max_steps(10)
        .stop_when(StopCondition::MaxSteps(2));
    let result = agent(config, &driver).with_tool(EchoTool).run("go").await.unwrap();

    assert_eq!(result.steps, 2);
    assert_eq!(result.terminal_state, TerminalState::StopConditionMet);
    assert!(!result.hit_step_limit());
    assert_eq!(driver.call_count(), 2);
}

#[tokio::test]
async fn test_stop_condition_has_tool_call() {
    let driver = MockLlmDriver::with_responses(vec![
        MockLlmResponse::with_tools("", vec![echo_call("c1", "draft")]),
        MockLlmResponse::with_tools(
            "Submitting now",
            vec![ToolCall::new("c2", "submit", json!({"answer": 7}))],
        ),
        MockLlmResponse::text("never requested"),
    ]);
    let submit = FnTool::new("submit", "Submit the answer", json!({"type": "object"}), |args| async move {
        ToolExecutionResult::success(json!({ "accepted": args["answer"] }))
    });
    let config = AgentConfig::new("submitter").stop_when(StopCondition::HasToolCall("submit".into()));
    let result = agent(config, &driver)
        .with_tool(EchoTool)
        .with_tool(submit)
        .run("solve it")
        .await
        .unwrap();

    assert_eq!(result.steps, 2);
    assert_eq!(result.text, "Submitting now");
    assert_eq!(result.terminal_state, TerminalState::StopConditionMet);
    assert_eq!(driver.call_count(), 2);
    // the stopping step's tool still ran
    assert_eq!(structured(result.messages.last().unwrap()), json!({"accepted": 7}));
}

#[tokio::test]
async fn test_stop_condition_text_generated() {
    let driver = MockLlmDriver::with_responses(vec![
        MockLlmResponse::with_tools("", vec![echo_call("c1", "quiet")]),
        MockLlmResponse::with_tools("Here is my summary", vec![echo_call("c2", "loud")]),
        MockLlmResponse::text("never requested"),
    ]);
    let config = AgentConfig::new("talker").stop_when(StopCondition::TextGenerated);
    let result = agent(config, &driver).with_tool(EchoTool).run("go").await.unwrap();

    assert_eq!(result.steps, 2);
    assert_eq!(result.text, "Here is my summary");
    assert_eq!(result.terminal_state, TerminalState::StopConditionMet);
}

#[tokio::test]
async fn test_structured_output_skipped_when_stopped_early() {
    let driver = endless_echo();
    let config = AgentConfig::new("shaped")
        .with_output_schema(json!({"type": "object"}))
        .stop_when(StopCondition::MaxSteps(1));
    let result = agent(config, &driver).with_tool(EchoTool).run("go").await.unwrap();

    assert_eq!(result.terminal_state, TerminalState::StopConditionMet);
    assert!(result.structured_output.is_none());
}

#[tokio::test]
async fn test_result_carries_history_for_continuation() {
    let driver = MockLlmDriver::with_responses(vec![
        MockLlmResponse::with_tools("", vec![echo_call("c1", "ping")]),
        MockLlmResponse::text("pong received"),
        MockLlmResponse::text("Still here"),
    ]);
    let agent = agent(AgentConfig::new("chatty").with_instructions("Be brief"), &driver).with_tool(EchoTool);
    let first = agent.run("ping it").await.unwrap();

    let roles: Vec<MessageRole> = first.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            MessageRole::System,
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::Tool,
            MessageRole::Assistant,
        ]
    );
    assert_eq!(first.messages.last().unwrap().text(), "pong received");

    let second = agent
        .run_messages(first.continue_with("are you there?"))
        .await
        .unwrap();
    assert_eq!(second.text, "Still here");
    let sent = &driver.calls()[2];
    assert_eq!(sent.len(), 6);
    // the existing system message is not duplicated
    assert_eq!(sent.iter().filter(|m| m.role == MessageRole::System).count(), 1);
    assert_eq!(second.messages.len(), 7);
}

#[tokio::test]
async fn test_step_finished_events() {
    let driver = MockLlmDriver::with_responses(vec![
        MockLlmResponse::with_tools("", vec![echo_call("c1", "a"), echo_call("c2", "b")]).usage(7, 3),
        MockLlmResponse::text("done").usage(9, 2),
    ]);
    let emitter = CollectingEventEmitter::new();
    agent(AgentConfig::new("stepper"), &driver)
        .with_tool(EchoTool)
        .run_with(vec![Message::user("go")], &emitter, CancellationToken::new())
        .await
        .unwrap();

    let steps: Vec<StreamEvent> = emitter
        .events()
        .into_iter()
        .filter(|e| matches!(e, StreamEvent::StepFinished { .. }))
        .collect();
    assert_eq!(
        steps,
        vec![
            StreamEvent::StepFinished {
                step: 1,
                tool_calls: vec!["echo".into(), "echo".into()],
                input_tokens: 7,
                output_tokens: 3,
            },
            StreamEvent::StepFinished {
                step: 2,
                tool_calls: vec![],
                input_tokens: 9,
                output_tokens: 2,
            },
        ]
    );
}
