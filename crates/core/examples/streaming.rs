// Streaming Example
//
// Streams a run and prints every event as JSON, the shape a server would
// forward over SSE.
// Run with: cargo run -p strand-core --example streaming

use std::sync::Arc;

use futures::StreamExt;
use strand_core::{Agent, AgentConfig, MockLlmDriver, MockLlmResponse};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let driver = MockLlmDriver::with_responses(vec![MockLlmResponse::text(
        "Streaming delivers the answer word by word.",
    )]);
    let agent = Agent::new(AgentConfig::new("streamer"), Arc::new(driver));

    let mut events = agent.stream("Explain streaming");
    while let Some(event) = events.next().await {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}
