//! Agent loop - the controller state machine.
//!
//! The loop runs as a single task that owns the chat session and the
//! agent state. Callers talk to it only through the input and output
//! queues of an [`AgentHandle`].

use std::sync::Arc;

use futures_util::{FutureExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::llm::retry::send_streaming_with_retry;
use super::llm::{Chat, ChatResponseStream, Content, FunctionCall, FunctionCallResult, Part, RetryPolicy, Usage};
use super::message::{
    AgentState, InboundMessage, Message, MessageSource, ToolCallRequest, ToolCallResponse,
    UserChoiceOption, UserChoiceRequest,
};
use crate::config::PricingConfig;
use crate::error::Error;
use crate::sessions::{ChatMessageStore, Session};
use crate::tools::ToolRegistry;
use crate::Result;

const INPUT_QUEUE: usize = 16;
const OUTPUT_QUEUE: usize = 128;

const GREETING: &str = "Hey there, what can I help you with today?";
const INPUT_PROMPT: &str = ">>>";
const CLEARED: &str = "Cleared the conversation.";
const DECLINED: &str = "User declined to run this operation.";

const CHOICE_YES: usize = 1;
const CHOICE_YES_DONT_ASK: usize = 2;

/// Tunables for one agent run.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub provider_id: String,
    pub model: String,
    /// Model calls allowed per query.
    pub max_iterations: usize,
    pub skip_permissions: bool,
    /// Stop after the first query.
    pub run_once: bool,
    pub retry: RetryPolicy,
    pub pricing: PricingConfig,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            provider_id: String::new(),
            model: String::new(),
            max_iterations: 20,
            skip_permissions: false,
            run_once: false,
            retry: RetryPolicy::default(),
            pricing: PricingConfig::default(),
        }
    }
}

/// The agent loop processes queries through the model and the tools.
pub struct AgentLoop {
    chat: Box<dyn Chat>,
    tools: ToolRegistry,
    store: Arc<dyn ChatMessageStore>,
    session: Option<Arc<Session>>,
    options: AgentOptions,
}

impl AgentLoop {
    /// Create a new agent loop
    pub fn new(
        chat: Box<dyn Chat>,
        tools: ToolRegistry,
        store: Arc<dyn ChatMessageStore>,
        options: AgentOptions,
    ) -> Self {
        Self {
            chat,
            tools,
            store,
            session: None,
            options,
        }
    }

    /// Record usage counters into this session's metadata.
    pub fn with_session(mut self, session: Arc<Session>) -> Self {
        self.session = Some(session);
        self
    }

    /// Wire the tool schema and replay persisted history into the chat.
    pub fn init(&mut self) -> Result<()> {
        let definitions = self.tools.definitions();
        self.chat.set_function_definitions(&definitions)?;

        let history = self.store.chat_messages();
        if !history.is_empty() {
            info!(messages = history.len(), "resuming conversation");
        }
        if let Err(e) = self.chat.initialize(&history) {
            warn!("failed to initialize chat history: {}", e);
        }
        Ok(())
    }

    /// Start the loop on its own task.
    ///
    /// With an `initial_query` the loop skips the first input request.
    pub fn run(self, cancel: CancellationToken, initial_query: Option<String>) -> AgentHandle {
        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE);
        let (output_tx, output_rx) = mpsc::channel(OUTPUT_QUEUE);
        let (state_tx, state_rx) = watch::channel(AgentState::Idle);

        let skip_permissions = self.options.skip_permissions;
        let runner = Runner {
            agent: self,
            input: input_rx,
            output: output_tx,
            state: state_tx,
            cancel,
            skip_permissions,
            carryover: Vec::new(),
            tally: UsageTally::default(),
        };
        let task = tokio::spawn(runner.run(initial_query));

        AgentHandle {
            input: input_tx,
            output: output_rx,
            state: state_rx,
            task,
        }
    }
}

/// Caller side of a running agent loop.
pub struct AgentHandle {
    input: mpsc::Sender<InboundMessage>,
    output: mpsc::Receiver<Message>,
    state: watch::Receiver<AgentState>,
    task: JoinHandle<()>,
}

impl AgentHandle {
    /// Queue a message for the loop.
    pub async fn send(&self, message: InboundMessage) -> Result<()> {
        self.input
            .send(message)
            .await
            .map_err(|_| Error::Other("agent loop has stopped".to_string()))
    }

    /// Next message from the loop; `None` once it has stopped.
    pub async fn recv(&mut self) -> Option<Message> {
        self.output.recv().await
    }

    pub fn agent_state(&self) -> AgentState {
        *self.state.borrow()
    }

    /// Read-only view of state changes.
    pub fn state_watcher(&self) -> watch::Receiver<AgentState> {
        self.state.clone()
    }

    /// Wait for the loop task to finish.
    pub async fn join(self) -> Result<()> {
        drop(self.input);
        self.task
            .await
            .map_err(|e| Error::Other(format!("agent task failed: {}", e)))
    }
}

/// What to do after a query has been handled.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Done,
}

#[derive(Debug, Default)]
struct UsageTally {
    tokens: u64,
    cost: f64,
    messages: u64,
}

struct Runner {
    agent: AgentLoop,
    input: mpsc::Receiver<InboundMessage>,
    output: mpsc::Sender<Message>,
    state: watch::Sender<AgentState>,
    cancel: CancellationToken,
    skip_permissions: bool,
    /// Tool results not yet delivered to the model.
    carryover: Vec<Content>,
    tally: UsageTally,
}

impl Runner {
    async fn run(mut self, initial_query: Option<String>) {
        self.set_state(AgentState::Greeting);
        self.emit(Message::text(MessageSource::Agent, GREETING)).await;

        let mut next = initial_query.filter(|q| !q.trim().is_empty());
        loop {
            let query = match next.take() {
                Some(query) => query,
                None => {
                    self.set_state(AgentState::WaitingForInput);
                    self.emit(Message::input_request(INPUT_PROMPT)).await;
                    match self.wait_for_query().await {
                        Some(query) => query,
                        None => break,
                    }
                }
            };

            let flow = self.handle_query(&query).await;
            self.flush_usage();
            if flow == Flow::Done || self.agent.options.run_once {
                break;
            }
        }

        self.set_state(AgentState::Done);
        info!("agent loop finished");
    }

    fn set_state(&self, state: AgentState) {
        debug!(%state, "agent state");
        self.state.send_replace(state);
    }

    /// Persist, then deliver. Persistence failures never stop the loop.
    async fn emit(&mut self, message: Message) {
        if let Err(e) = self.agent.store.add_chat_message(&message) {
            error!("Failed to add chat message to store: {}", e);
        }
        self.tally.messages += 1;
        if self.output.send(message).await.is_err() {
            debug!("output queue closed, message dropped");
        }
    }

    async fn wait_for_query(&mut self) -> Option<String> {
        loop {
            let inbound = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("cancelled while waiting for input");
                    return None;
                }
                inbound = self.input.recv() => inbound?,
            };
            match inbound {
                InboundMessage::UserInput { query } => return Some(query),
                InboundMessage::UserChoice { choice } => {
                    warn!(choice, "ignoring choice while waiting for input");
                }
            }
        }
    }

    /// `None` when cancelled or when the caller went away.
    async fn wait_for_choice(&mut self) -> Option<usize> {
        let inbound = tokio::select! {
            _ = self.cancel.cancelled() => {
                info!("cancelled while waiting for approval");
                return None;
            }
            inbound = self.input.recv() => inbound?,
        };
        match inbound {
            InboundMessage::UserChoice { choice } => Some(choice),
            // A typed answer counts when it is a number; anything else declines.
            InboundMessage::UserInput { query } => Some(query.trim().parse().unwrap_or(0)),
        }
    }

    async fn handle_query(&mut self, query: &str) -> Flow {
        match query.trim().to_lowercase().as_str() {
            "clear" | "reset" => {
                self.clear().await;
                return Flow::Continue;
            }
            "exit" | "quit" => return Flow::Done,
            "model" => {
                let text = format!(
                    "Current model is `{}` (provider `{}`)",
                    self.agent.options.model, self.agent.options.provider_id
                );
                self.emit(Message::text(MessageSource::Agent, text)).await;
                return Flow::Continue;
            }
            "tools" => {
                let text = format!("Available tools: {}", self.agent.tools.names().join(", "));
                self.emit(Message::text(MessageSource::Agent, text)).await;
                return Flow::Continue;
            }
            _ => {}
        }

        self.emit(Message::text(MessageSource::User, query)).await;
        self.process(query).await
    }

    async fn clear(&mut self) {
        if let Err(e) = self.agent.store.clear_chat_messages() {
            error!("Failed to clear chat messages: {}", e);
        }
        if let Err(e) = self.agent.chat.initialize(&[]) {
            warn!("failed to reset chat history: {}", e);
        }
        self.carryover.clear();
        info!("conversation cleared");
        self.emit(Message::text(MessageSource::Agent, CLEARED)).await;
    }

    async fn process(&mut self, query: &str) -> Flow {
        self.set_state(AgentState::Processing);

        let mut contents = std::mem::take(&mut self.carryover);
        contents.push(Content::text(query));

        let max_iterations = self.agent.options.max_iterations.max(1);
        for iteration in 1..=max_iterations {
            debug!("Iteration {}/{}", iteration, max_iterations);

            let calls = match self.model_turn(&contents).await {
                Ok(calls) => calls,
                Err(Error::Cancelled) => return Flow::Done,
                Err(e) => {
                    error!("model turn failed: {}", e);
                    // Undelivered tool results go out with the next query.
                    self.carryover = contents
                        .into_iter()
                        .filter(|c| matches!(c, Content::FunctionResult(_)))
                        .collect();
                    self.set_state(AgentState::Error);
                    self.emit(Message::error(format!("Error: {}", e))).await;
                    return Flow::Continue;
                }
            };

            if calls.is_empty() {
                info!(iterations = iteration, "query completed");
                return Flow::Continue;
            }

            contents = match self.execute_calls(calls).await {
                Some(results) => results,
                None => return Flow::Done,
            };
        }

        warn!(max_iterations, "iteration bound reached");
        self.carryover = contents;
        let text = format!(
            "Stopped after {} model calls for this request. Ask me to continue if more work is needed.",
            max_iterations
        );
        self.emit(Message::text(MessageSource::Agent, text)).await;
        Flow::Continue
    }

    /// One model call: emit text as it arrives, collect function calls.
    async fn model_turn(&mut self, contents: &[Content]) -> Result<Vec<FunctionCall>> {
        let policy = self.agent.options.retry.clone();
        let cancel = self.cancel.clone();
        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = send_streaming_with_retry(self.agent.chat.as_mut(), contents, &policy, &cancel) => result?,
        };

        let mut calls = Vec::new();
        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.drain_ready(&mut stream).await;
                    return Err(Error::Cancelled);
                }
                item = stream.next() => item,
            };
            match item {
                None => break,
                Some(Err(e)) => return Err(e),
                Some(Ok(response)) => {
                    if let Some(usage) = response.usage {
                        self.record_usage(usage);
                    }
                    for candidate in response.candidates {
                        for part in candidate.parts {
                            match part {
                                Part::Text { text } => {
                                    if !text.is_empty() {
                                        self.emit(Message::text(MessageSource::Model, text)).await;
                                    }
                                }
                                Part::FunctionCalls { calls: more } => calls.extend(more),
                            }
                        }
                    }
                }
            }
        }
        Ok(calls)
    }

    /// Deliver text the model already produced before stopping.
    async fn drain_ready(&mut self, stream: &mut ChatResponseStream) {
        while let Some(Some(Ok(response))) = stream.next().now_or_never() {
            for part in response.candidates.into_iter().flat_map(|c| c.parts) {
                if let Part::Text { text } = part {
                    if !text.is_empty() {
                        self.emit(Message::text(MessageSource::Model, text)).await;
                    }
                }
            }
        }
    }

    /// Run every call in order. `None` means the run was cancelled.
    async fn execute_calls(&mut self, calls: Vec<FunctionCall>) -> Option<Vec<Content>> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let result = self.execute_call(&call).await?;
            results.push(Content::FunctionResult(FunctionCallResult {
                id: call.id,
                name: call.name,
                result,
            }));
        }
        Some(results)
    }

    async fn execute_call(&mut self, call: &FunctionCall) -> Option<Value> {
        let description = describe_call(call);
        let request = ToolCallRequest {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            description: description.clone(),
        };

        let Some(tool) = self.agent.tools.lookup(&call.name) else {
            warn!(tool = %call.name, "model requested unknown tool");
            self.emit(Message::tool_call_request(&request)).await;
            let message = format!("unknown tool: {}", call.name);
            return Some(self.respond(call, error_result(&message), Some(message), false).await);
        };

        // Tools run without a terminal, so an interactive command would never finish.
        if tool.is_interactive(&call.arguments).unwrap_or(false) {
            info!(tool = %call.name, "refusing interactive command");
            self.emit(Message::tool_call_request(&request)).await;
            let message = "interactive commands are not supported, use a non-interactive alternative".to_string();
            return Some(self.respond(call, error_result(&message), None, true).await);
        }

        let modifies = tool.check_modifies_resource(&call.arguments);
        debug!(tool = %call.name, %modifies, "classified tool call");
        if modifies.needs_approval() && !self.skip_permissions {
            self.set_state(AgentState::WaitingForApproval);
            let choice_request = UserChoiceRequest {
                prompt: format!(
                    "The following command requires your approval to run:\n* {}\nDo you want to proceed?",
                    description
                ),
                options: vec![
                    UserChoiceOption {
                        value: "yes".to_string(),
                        label: "Yes".to_string(),
                    },
                    UserChoiceOption {
                        value: "yes_and_dont_ask_me_again".to_string(),
                        label: "Yes, and don't ask me again".to_string(),
                    },
                    UserChoiceOption {
                        value: "no".to_string(),
                        label: "No".to_string(),
                    },
                ],
            };
            self.emit(Message::choice_request(&choice_request)).await;

            let choice = self.wait_for_choice().await?;
            self.set_state(AgentState::Processing);
            match choice {
                CHOICE_YES => {}
                CHOICE_YES_DONT_ASK => {
                    info!("approvals turned off for the rest of this run");
                    self.skip_permissions = true;
                }
                _ => {
                    info!(tool = %call.name, "operator declined tool call");
                    self.emit(Message::tool_call_request(&request)).await;
                    return Some(self.respond(call, error_result(DECLINED), None, true).await);
                }
            }
        }

        self.emit(Message::tool_call_request(&request)).await;
        let cancel = self.cancel.clone();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => None,
            outcome = tool.run(&call.arguments) => Some(outcome),
        };
        match outcome {
            None => {
                let message = "cancelled".to_string();
                self.respond(call, error_result(&message), Some(message), false).await;
                None
            }
            Some(Ok(result)) => Some(self.respond(call, result, None, false).await),
            Some(Err(e)) => {
                warn!(tool = %call.name, "tool failed: {}", e);
                let message = e.to_string();
                Some(self.respond(call, error_result(&message), Some(message), false).await)
            }
        }
    }

    /// Emit the response paired with a request and return the result.
    async fn respond(
        &mut self,
        call: &FunctionCall,
        result: Value,
        error: Option<String>,
        declined: bool,
    ) -> Value {
        let response = ToolCallResponse {
            id: call.id.clone(),
            name: call.name.clone(),
            result: result.clone(),
            error,
            declined,
        };
        self.emit(Message::tool_call_response(&response)).await;
        result
    }

    fn record_usage(&mut self, usage: Usage) {
        let tokens = if usage.total_tokens > 0 {
            usage.total_tokens
        } else {
            usage.prompt_tokens + usage.completion_tokens
        };
        self.tally.tokens += tokens;
        self.tally.cost += self
            .agent
            .options
            .pricing
            .cost(usage.prompt_tokens, usage.completion_tokens);
    }

    fn flush_usage(&mut self) {
        let tally = std::mem::take(&mut self.tally);
        let Some(session) = &self.agent.session else {
            return;
        };
        if let Err(e) = session.update_usage(tally.tokens, tally.cost, tally.messages) {
            error!(session = %session.id, "failed to update session metadata: {}", e);
        }
    }
}

fn error_result(message: &str) -> Value {
    json!({ "error": message })
}

/// Human-readable summary of a call for approval prompts.
fn describe_call(call: &FunctionCall) -> String {
    match call.arguments.get("command").and_then(Value::as_str) {
        Some(command) => command.to_string(),
        None => format!("{}({})", call.name, Value::Object(call.arguments.clone())),
    }
}
