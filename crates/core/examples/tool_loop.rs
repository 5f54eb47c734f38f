// Agent Loop Example - Tool Calls
//
// Runs an agent against a scripted backend that asks for two tools in
// parallel, then answers with the observations.
// Run with: RUST_LOG=debug cargo run -p strand-core --example tool_loop

use std::sync::Arc;

use serde_json::json;
use strand_core::{
    Agent, AgentConfig, FnTool, MockLlmDriver, MockLlmResponse, ToolCall, ToolExecutionResult,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== Agent Loop Example: Tool Calls ===\n");

    let driver = MockLlmDriver::with_responses(vec![
        MockLlmResponse::with_tools(
            "I'll check both the time and the weather.",
            vec![
                ToolCall::new("call_time", "get_time", json!({})),
                ToolCall::new("call_weather", "get_weather", json!({"location": "New York"})),
            ],
        ),
        MockLlmResponse::text("It's 12:00 PM UTC and sunny in New York."),
    ]);

    let get_time = FnTool::new("get_time", "Gets the current time", json!({"type": "object"}), |_| async {
        ToolExecutionResult::success(json!({"time": "12:00 PM", "timezone": "UTC"}))
    });
    let get_weather = FnTool::new(
        "get_weather",
        "Gets the current weather",
        json!({
            "type": "object",
            "properties": { "location": { "type": "string" } },
            "required": ["location"]
        }),
        |args| async move {
            ToolExecutionResult::success(json!({
                "location": args["location"],
                "condition": "sunny",
                "temperature": 72
            }))
        },
    );

    let config = AgentConfig::new("assistant")
        .with_instructions("You are a helpful assistant with access to tools.")
        .apply_env()?;
    let agent = Agent::new(config, Arc::new(driver))
        .with_tool(get_time)
        .with_tool(get_weather);

    println!("User: What's the time and weather?");
    let result = agent.run("What's the time and weather?").await?;

    println!("Assistant: {}", result.text);
    println!(
        "\nSteps: {}, tokens: {} in / {} out",
        result.steps, result.usage.input_tokens, result.usage.output_tokens
    );
    Ok(())
}
