// Agent Execution Loop
//
// The orchestrator for one agent. Coordinates:
// - Input guardrails on the caller's messages
// - Model calls through the LlmDriver handle (possibly a resilient composite)
// - Tool resolution, validation, approval and execution
// - Output guardrails and structured-output validation on the final answer
// - Checkpoints after every step
//
// Synchronous and streaming runs share one loop; they differ only in the
// EventEmitter the loop reports to.

use std::sync::Arc;

use futures::future::join_all;
use futures::StreamExt;
use serde_json::Value;
use strand_schemas::{
    AgentResult, ApprovalStatus, Checkpoint, LoopState, Message, MessageContent, MessageRole,
    StreamEvent, TerminalState, TokenUsage, ToolCall, ToolPolicy, ToolResult,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::error::{Result, RuntimeError};
use crate::guardrails::{GuardrailAction, GuardrailPipeline, GuardrailReport, GuardrailStage};
use crate::hitl::ApprovalManager;
use crate::llm_driver::{LlmCallConfig, LlmStreamEvent, SharedDriver};
use crate::stream::{AgentEventStream, ChannelEventEmitter, STREAM_BUFFER};
use crate::tools::{Tool, ToolRegistry};
use crate::traits::{CheckpointStore, EventEmitter, NoopEventEmitter};

/// Identity of one loop invocation
#[derive(Debug, Clone)]
struct RunContext {
    run_id: String,
    checkpoint_id: String,
    cancel: CancellationToken,
}

/// Model output for a single step
#[derive(Debug, Default)]
struct StepOutput {
    text: String,
    tool_calls: Vec<ToolCall>,
    usage: TokenUsage,
}

enum ApprovalOutcome {
    Approved(Value),
    Denied(Option<String>),
    TimedOut,
}

/// An agent: a model handle, a tool catalogue and the policies around them
///
/// Cloning is cheap; clones share the driver, tools, guardrails, approval
/// manager and checkpoint store.
#[derive(Clone)]
pub struct Agent {
    config: AgentConfig,
    driver: SharedDriver,
    tools: Arc<ToolRegistry>,
    input_guardrails: Arc<GuardrailPipeline>,
    output_guardrails: Arc<GuardrailPipeline>,
    approvals: Arc<ApprovalManager>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
}

impl Agent {
    pub fn new(config: AgentConfig, driver: SharedDriver) -> Self {
        Self {
            config,
            driver,
            tools: Arc::new(ToolRegistry::new()),
            input_guardrails: Arc::new(GuardrailPipeline::new()),
            output_guardrails: Arc::new(GuardrailPipeline::new()),
            approvals: Arc::new(ApprovalManager::new()),
            checkpoints: None,
        }
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Arc::new(tools);
        self
    }

    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        Arc::make_mut(&mut self.tools).register(tool);
        self
    }

    pub fn with_input_guardrails(mut self, pipeline: Arc<GuardrailPipeline>) -> Self {
        self.input_guardrails = pipeline;
        self
    }

    pub fn with_output_guardrails(mut self, pipeline: Arc<GuardrailPipeline>) -> Self {
        self.output_guardrails = pipeline;
        self
    }

    /// Share an approval manager (e.g. one per process, resolved from a UI)
    pub fn with_approvals(mut self, approvals: Arc<ApprovalManager>) -> Self {
        self.approvals = approvals;
        self
    }

    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn approvals(&self) -> &Arc<ApprovalManager> {
        &self.approvals
    }

    pub fn input_guardrails(&self) -> &Arc<GuardrailPipeline> {
        &self.input_guardrails
    }

    pub fn output_guardrails(&self) -> &Arc<GuardrailPipeline> {
        &self.output_guardrails
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Run to completion on a single user message
    pub async fn run(&self, prompt: impl Into<String>) -> Result<AgentResult> {
        self.run_messages(vec![Message::user(prompt.into())]).await
    }

    /// Run to completion on a caller-supplied history
    pub async fn run_messages(&self, messages: Vec<Message>) -> Result<AgentResult> {
        self.run_with(messages, &NoopEventEmitter, CancellationToken::new())
            .await
    }

    /// Run reporting events to `emitter`; cancelling `cancel` stops the run
    /// with `RuntimeError::Cancelled`
    pub async fn run_with(
        &self,
        messages: Vec<Message>,
        emitter: &dyn EventEmitter,
        cancel: CancellationToken,
    ) -> Result<AgentResult> {
        self.config.validate()?;
        let run = self.new_run(cancel);
        info!(agent = %self.config.name, run_id = %run.run_id, "Starting agent run");

        let messages = self.seed_messages(messages, emitter).await?;
        let state = LoopState {
            messages,
            step_index: 0,
            usage: TokenUsage::default(),
        };
        self.drive(state, &run, emitter).await
    }

    /// Stream a run on a single user message
    pub fn stream(&self, prompt: impl Into<String>) -> AgentEventStream {
        self.stream_messages(vec![Message::user(prompt.into())])
    }

    /// Stream a run. Text deltas arrive as the backend produces them and a
    /// `done` event always closes the stream; failures emit `error` first.
    pub fn stream_messages(&self, messages: Vec<Message>) -> AgentEventStream {
        let (sender, receiver) = mpsc::channel(STREAM_BUFFER);
        let cancel = CancellationToken::new();
        let agent = self.clone();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let emitter = ChannelEventEmitter::new(sender);
            let outcome = agent.run_with(messages, &emitter, token.clone()).await;
            if token.is_cancelled() {
                return;
            }

            let closing = match outcome {
                Ok(result) => vec![StreamEvent::done(result.text)],
                // the consumer is gone; nobody to tell
                Err(RuntimeError::Cancelled) => return,
                Err(e) => {
                    warn!(agent = %agent.config.name, error = %e, "Streaming run failed");
                    vec![StreamEvent::error(e.to_string()), StreamEvent::done("")]
                }
            };
            if emitter.emit_batch(closing).await.is_err() {
                debug!(agent = %agent.config.name, "Stream consumer dropped before done");
            }
        });

        AgentEventStream::new(receiver, task, cancel)
    }

    /// Continue a run from a saved checkpoint
    pub async fn resume(&self, checkpoint_id: &str) -> Result<AgentResult> {
        let store = self
            .checkpoints
            .as_ref()
            .ok_or_else(|| RuntimeError::configuration("no checkpoint store configured"))?;
        let checkpoint = store.load(checkpoint_id).await?;
        if checkpoint.agent_name != self.config.name {
            return Err(RuntimeError::invalid_request(format!(
                "checkpoint '{}' belongs to agent '{}', not '{}'",
                checkpoint.id, checkpoint.agent_name, self.config.name
            )));
        }

        let run = RunContext {
            run_id: Uuid::now_v7().to_string(),
            checkpoint_id: checkpoint.id.clone(),
            cancel: CancellationToken::new(),
        };
        info!(
            agent = %self.config.name,
            checkpoint_id = %checkpoint.id,
            step = checkpoint.state.step_index,
            "Resuming from checkpoint"
        );

        let state = checkpoint.state;
        match state.messages.last() {
            // the checkpointed run already produced its final answer
            Some(last) if last.role == MessageRole::Assistant && !last.has_tool_calls() => {
                let text = last.text();
                self.finish(text, &state, TerminalState::Done, &NoopEventEmitter)
                    .await
            }
            _ => self.drive(state, &run, &NoopEventEmitter).await,
        }
    }

    // ========================================================================
    // Loop
    // ========================================================================

    fn new_run(&self, cancel: CancellationToken) -> RunContext {
        let run_id = Uuid::now_v7().to_string();
        RunContext {
            checkpoint_id: format!("{}-{}", self.config.name, run_id),
            run_id,
            cancel,
        }
    }

    fn call_config(&self) -> LlmCallConfig {
        LlmCallConfig {
            model: self.config.model.clone(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            tools: self.tools.tool_schemas(),
        }
    }

    /// Prepend instructions and run input guardrails over user messages
    async fn seed_messages(
        &self,
        messages: Vec<Message>,
        emitter: &dyn EventEmitter,
    ) -> Result<Vec<Message>> {
        if messages.is_empty() {
            return Err(RuntimeError::invalid_request("no messages to process"));
        }

        let mut seeded = Vec::with_capacity(messages.len() + 1);
        let has_system = messages.first().is_some_and(|m| m.role == MessageRole::System);
        if !self.config.instructions.is_empty() && !has_system {
            seeded.push(Message::system(self.config.instructions.clone()));
        }

        for mut message in messages {
            if message.role == MessageRole::User && !self.input_guardrails.is_empty() {
                let report = self
                    .input_guardrails
                    .enforce(GuardrailStage::Input, &message.text())
                    .await?;
                self.emit_warnings(&report, emitter).await?;
                if report.action == GuardrailAction::Redact {
                    message.content = MessageContent::Text(report.content);
                }
            }
            seeded.push(message);
        }
        Ok(seeded)
    }

    async fn drive(
        &self,
        mut state: LoopState,
        run: &RunContext,
        emitter: &dyn EventEmitter,
    ) -> Result<AgentResult> {
        let call_config = self.call_config();
        let mut last_text = last_assistant_text(&state.messages);

        while state.step_index < self.config.max_steps {
            if run.cancel.is_cancelled() {
                return Err(RuntimeError::Cancelled);
            }
            let step = state.step_index + 1;
            info!(agent = %self.config.name, run_id = %run.run_id, step, "Starting step");

            let output = self
                .call_model(&state.messages, &call_config, run, emitter)
                .await?;
            state.usage.add(output.usage);
            state.step_index = step;
            if !output.text.is_empty() {
                last_text = output.text.clone();
            }

            let tool_calls = assign_call_ids(output.tool_calls, step);
            state
                .messages
                .push(Message::assistant_with_tools(output.text.clone(), tool_calls.clone()));

            if tool_calls.is_empty() {
                self.save_checkpoint(&state, run).await?;
                self.emit_step_finished(step, &tool_calls, output.usage, emitter)
                    .await?;
                info!(agent = %self.config.name, run_id = %run.run_id, step, "Run finished");
                return self
                    .finish(output.text, &state, TerminalState::Done, emitter)
                    .await;
            }

            debug!(
                agent = %self.config.name,
                step,
                tool_count = tool_calls.len(),
                "Executing tool calls"
            );
            let results = self.execute_tools(&tool_calls, run, emitter).await?;
            // call order, not completion order
            for result in results {
                state.messages.push(Message::tool_result(
                    result.tool_call_id.clone(),
                    MessageContent::Structured(result.observation()),
                ));
            }
            self.save_checkpoint(&state, run).await?;
            self.emit_step_finished(step, &tool_calls, output.usage, emitter)
                .await?;

            if let Some(condition) = self
                .config
                .stop_conditions
                .iter()
                .find(|c| c.is_met(step, &output.text, &tool_calls))
            {
                info!(
                    agent = %self.config.name,
                    run_id = %run.run_id,
                    step,
                    condition = ?condition,
                    "Stop condition met"
                );
                return self
                    .finish(last_text, &state, TerminalState::StopConditionMet, emitter)
                    .await;
            }
        }

        warn!(
            agent = %self.config.name,
            run_id = %run.run_id,
            max_steps = self.config.max_steps,
            "Step limit reached"
        );
        self.finish(last_text, &state, TerminalState::StepLimitReached, emitter)
            .await
    }

    async fn call_model(
        &self,
        messages: &[Message],
        config: &LlmCallConfig,
        run: &RunContext,
        emitter: &dyn EventEmitter,
    ) -> Result<StepOutput> {
        let mut stream = tokio::select! {
            biased;
            _ = run.cancel.cancelled() => return Err(RuntimeError::Cancelled),
            stream = self.driver.chat_completion_stream(messages.to_vec(), config) => stream?,
        };

        let mut output = StepOutput::default();
        loop {
            let event = tokio::select! {
                biased;
                _ = run.cancel.cancelled() => return Err(RuntimeError::Cancelled),
                event = stream.next() => event,
            };
            let Some(event) = event else {
                break;
            };

            match event? {
                LlmStreamEvent::TextDelta(delta) => {
                    output.text.push_str(&delta);
                    emitter
                        .emit(StreamEvent::text_delta(delta, output.text.clone()))
                        .await?;
                }
                LlmStreamEvent::ToolCalls(calls) => output.tool_calls.extend(calls),
                LlmStreamEvent::Done(metadata) => {
                    output.usage = metadata.usage();
                    emitter
                        .emit(StreamEvent::Usage {
                            input_tokens: output.usage.input_tokens,
                            output_tokens: output.usage.output_tokens,
                        })
                        .await?;
                    if let Some(reason) = metadata.finish_reason {
                        emitter.emit(StreamEvent::FinishReason { reason }).await?;
                    }
                    break;
                }
                LlmStreamEvent::Error(message) => return Err(RuntimeError::server(message)),
            }
        }
        Ok(output)
    }

    async fn execute_tools(
        &self,
        calls: &[ToolCall],
        run: &RunContext,
        emitter: &dyn EventEmitter,
    ) -> Result<Vec<ToolResult>> {
        if self.config.parallel_tool_calls {
            // join_all keeps input order
            join_all(calls.iter().map(|call| self.execute_tool_call(call, run, emitter)))
                .await
                .into_iter()
                .collect()
        } else {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                results.push(self.execute_tool_call(call, run, emitter).await?);
            }
            Ok(results)
        }
    }

    /// Execute one call. Only cancellation and an aborting denial are errors;
    /// every other failure becomes an observation for the model.
    async fn execute_tool_call(
        &self,
        call: &ToolCall,
        run: &RunContext,
        emitter: &dyn EventEmitter,
    ) -> Result<ToolResult> {
        emitter
            .emit(StreamEvent::ToolCallStarted {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            })
            .await?;

        let result = self.resolve_and_execute(call, run, emitter).await?;
        if let Some(error) = &result.error {
            debug!(tool = %call.name, tool_call_id = %call.id, %error, "Tool call returned an error observation");
        }

        emitter
            .emit(StreamEvent::ToolCallResult {
                id: result.tool_call_id.clone(),
                name: result.tool_name.clone(),
                result: result.observation(),
                is_error: result.is_error(),
            })
            .await?;
        Ok(result)
    }

    async fn resolve_and_execute(
        &self,
        call: &ToolCall,
        run: &RunContext,
        emitter: &dyn EventEmitter,
    ) -> Result<ToolResult> {
        let prepared = match self.tools.prepare(call) {
            Ok(prepared) => prepared,
            Err(e) => return Ok(ToolResult::error(&call.id, &call.name, e.to_string())),
        };

        let arguments = if prepared.tool.policy() == ToolPolicy::RequiresApproval {
            match self.await_approval(call, prepared.arguments, run, emitter).await? {
                ApprovalOutcome::Approved(args) => {
                    match self.tools.validate(prepared.tool.as_ref(), args) {
                        Ok(args) => args,
                        Err(e) => return Ok(ToolResult::error(&call.id, &call.name, e.to_string())),
                    }
                }
                ApprovalOutcome::Denied(reason) => {
                    let denial = RuntimeError::ApprovalDenied {
                        tool: call.name.clone(),
                        reason,
                    };
                    if self.config.deny_aborts_run {
                        return Err(denial);
                    }
                    return Ok(ToolResult::error(&call.id, &call.name, denial.to_string()));
                }
                ApprovalOutcome::TimedOut => {
                    return Ok(ToolResult::error(
                        &call.id,
                        &call.name,
                        format!("Approval timed out for tool '{}'", call.name),
                    ));
                }
            }
        } else {
            prepared.arguments
        };

        info!(tool = %call.name, tool_call_id = %call.id, "Executing tool");
        Ok(prepared
            .tool
            .execute(arguments)
            .await
            .into_tool_result(&call.id, &call.name))
    }

    /// Suspend this call until a human decides. Other runs are unaffected.
    async fn await_approval(
        &self,
        call: &ToolCall,
        arguments: Value,
        run: &RunContext,
        emitter: &dyn EventEmitter,
    ) -> Result<ApprovalOutcome> {
        let request = self.approvals.request(&call.name, arguments, &run.run_id);
        emitter
            .emit(StreamEvent::ApprovalRequested {
                request: request.clone(),
            })
            .await?;

        let wait = self.approvals.wait(request.id);
        let resolved = match self.config.approval_timeout {
            Some(timeout) => tokio::select! {
                biased;
                _ = run.cancel.cancelled() => return Err(RuntimeError::Cancelled),
                waited = tokio::time::timeout(timeout, wait) => match waited {
                    Ok(resolved) => resolved?,
                    Err(_) => {
                        warn!(approval_id = %request.id, tool = %call.name, "Approval timed out; request left pending");
                        return Ok(ApprovalOutcome::TimedOut);
                    }
                },
            },
            None => tokio::select! {
                biased;
                _ = run.cancel.cancelled() => return Err(RuntimeError::Cancelled),
                resolved = wait => resolved?,
            },
        };

        Ok(match resolved.status {
            ApprovalStatus::Approved => ApprovalOutcome::Approved(resolved.effective_args().clone()),
            ApprovalStatus::Denied | ApprovalStatus::Pending => {
                ApprovalOutcome::Denied(resolved.deny_reason)
            }
        })
    }

    async fn save_checkpoint(&self, state: &LoopState, run: &RunContext) -> Result<()> {
        let Some(store) = &self.checkpoints else {
            return Ok(());
        };
        if !self.config.checkpoint_every_step {
            return Ok(());
        }

        store
            .save(Checkpoint::new(
                run.checkpoint_id.clone(),
                self.config.name.clone(),
                state.clone(),
            ))
            .await?;
        debug!(checkpoint_id = %run.checkpoint_id, step = state.step_index, "Checkpoint saved");
        Ok(())
    }

    /// Output guardrails, then structured output (only for a Done run)
    async fn finish(
        &self,
        text: String,
        state: &LoopState,
        terminal_state: TerminalState,
        emitter: &dyn EventEmitter,
    ) -> Result<AgentResult> {
        let text = if self.output_guardrails.is_empty() {
            text
        } else {
            let report = self
                .output_guardrails
                .enforce(GuardrailStage::Output, &text)
                .await?;
            self.emit_warnings(&report, emitter).await?;
            report.content
        };

        let structured_output = match (&self.config.output_schema, terminal_state) {
            (Some(schema), TerminalState::Done) => Some(parse_structured_output(schema, &text)?),
            _ => None,
        };

        let mut messages = state.messages.clone();
        // keep the returned history in line with what the caller was shown
        if terminal_state == TerminalState::Done {
            if let Some(last) = messages.last_mut() {
                if last.role == MessageRole::Assistant && !last.has_tool_calls() {
                    last.content = MessageContent::Text(text.clone());
                }
            }
        }

        Ok(AgentResult {
            text,
            steps: state.step_index,
            usage: state.usage,
            structured_output,
            terminal_state,
            messages,
        })
    }

    async fn emit_step_finished(
        &self,
        step: usize,
        tool_calls: &[ToolCall],
        usage: TokenUsage,
        emitter: &dyn EventEmitter,
    ) -> Result<()> {
        emitter
            .emit(StreamEvent::StepFinished {
                step,
                tool_calls: tool_calls.iter().map(|call| call.name.clone()).collect(),
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
            })
            .await
    }

    async fn emit_warnings(&self, report: &GuardrailReport, emitter: &dyn EventEmitter) -> Result<()> {
        for verdict in report.warnings() {
            emitter
                .emit(StreamEvent::Warning {
                    source: verdict.guardrail.clone(),
                    message: verdict.reason.clone().unwrap_or_default(),
                })
                .await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.config.name)
            .field("driver", &self.driver.name())
            .field("tools", &self.tools.tool_names())
            .finish()
    }
}

fn last_assistant_text(messages: &[Message]) -> String {
    messages
        .iter()
        .rev()
        .filter(|m| m.role == MessageRole::Assistant)
        .map(Message::text)
        .find(|text| !text.is_empty())
        .unwrap_or_default()
}

fn assign_call_ids(calls: Vec<ToolCall>, step: usize) -> Vec<ToolCall> {
    calls
        .into_iter()
        .enumerate()
        .map(|(index, mut call)| {
            if call.id.is_empty() {
                call.id = format!("call_{step}_{index}");
            }
            call
        })
        .collect()
}

/// Parse the final text as JSON (tolerating a Markdown code fence) and
/// validate it against `schema`
fn parse_structured_output(schema: &Value, text: &str) -> Result<Value> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let parsed: Value = serde_json::from_str(body)
        .map_err(|e| RuntimeError::StructuredOutputInvalid(format!("output is not valid JSON: {e}")))?;
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| RuntimeError::configuration(format!("invalid output_schema: {e}")))?;
    validator
        .validate(&parsed)
        .map_err(|e| RuntimeError::StructuredOutputInvalid(e.to_string()))?;
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_structured_output_with_fence() {
        let schema = json!({"type": "object", "required": ["n"]});
        let parsed = parse_structured_output(&schema, "```json\n{\"n\": 1}\n```").unwrap();
        assert_eq!(parsed, json!({"n": 1}));
    }

    #[test]
    fn test_parse_structured_output_rejects_mismatch() {
        let schema = json!({"type": "object", "required": ["n"]});
        let err = parse_structured_output(&schema, "{\"m\": 1}").unwrap_err();
        assert!(matches!(err, RuntimeError::StructuredOutputInvalid(_)));
        let err = parse_structured_output(&schema, "plain words").unwrap_err();
        assert!(matches!(err, RuntimeError::StructuredOutputInvalid(_)));
    }

    #[test]
    fn test_assign_call_ids_only_fills_missing() {
        let calls = vec![
            ToolCall::new("", "a", json!({})),
            ToolCall::new("given", "b", json!({})),
        ];
        let ids: Vec<String> = assign_call_ids(calls, 2).into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["call_2_0", "given"]);
    }

    #[test]
    fn test_last_assistant_text_skips_empty() {
        let messages = vec![
            Message::assistant("first"),
            Message::assistant_with_tools("", vec![ToolCall::new("c", "t", json!({}))]),
        ];
        assert_eq!(last_assistant_text(&messages), "first");
    }
}
