use crate::config::{AgentConfig, DEFAULT_SYSTEM_PROMPT};
use crate::errors::AgentError;
use crate::permissions::{
    DenyingPrompt, PermissionDecision, PermissionHandle, PermissionManager, PermissionPrompt,
    PromptAnswer,
};
use crate::stats::SessionStats;
use crate::subagents::SubagentManager;
use crate::tools::{ToolContext, ToolRegistry, short_description};
use llama_agent_llm::{
    BackendError, ChatMessage, CompletionBackend, CompletionRequest, ToolCall, ToolSpec,
};
use llama_agent_store::StoreError;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};


/// Why a `run` call returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentStopReason {
    /// Model finished without tool calls.
    Completed,
    /// Hit the iteration limit.
    MaxIterations,
    /// The shared interrupt flag was set.
    UserCancelled,
    /// The backend failed; details were logged.
    AgentError,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopResult {
    pub stop_reason: AgentStopReason,
    pub final_response: String,
    /// Completion rounds executed, not individual tool calls.
    pub iterations: u32,
}

/// Callback fired after each in-memory message append. Failures are logged
/// and swallowed so disk errors never block conversation progress.
pub type MessageCallback = Arc<dyn Fn(&ChatMessage) -> Result<(), StoreError> + Send + Sync>;

/// The bounded completion+tool-call iteration controller for a single
/// conversation.
///
/// Not internally synchronized: all methods must be driven from one task.
/// The interrupt flag is the only cross-thread signal and may be set from a
/// signal handler at any time.
pub struct AgentLoop {
    backend: Arc<dyn CompletionBackend>,
    tools: Arc<ToolRegistry>,
    config: AgentConfig,
    messages: Vec<ChatMessage>,
    permissions: PermissionHandle,
    prompter: Arc<dyn PermissionPrompt>,
    stats: SessionStats,
    interrupt: Arc<AtomicBool>,
    subagent_mgr: Option<Arc<SubagentManager>>,
    on_message: Option<MessageCallback>,
}

impl AgentLoop {
    /// Construct a loop with its own permission state. Used by standalone
    /// runs such as compaction; interactive hosts and subagents use
    /// [`AgentLoop::with_permissions`] to share a session cache.
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        tools: Arc<ToolRegistry>,
        config: AgentConfig,
        interrupt: Arc<AtomicBool>,
    ) -> Result<Self, AgentError> {
        let permissions = PermissionManager::handle(config.yolo_mode);
        Self::with_permissions(
            backend,
            tools,
            config,
            interrupt,
            permissions,
            Arc::new(DenyingPrompt),
        )
    }

    pub fn with_permissions(
        backend: Arc<dyn CompletionBackend>,
        tools: Arc<ToolRegistry>,
        config: AgentConfig,
        interrupt: Arc<AtomicBool>,
        permissions: PermissionHandle,
        prompter: Arc<dyn PermissionPrompt>,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        let system_prompt = build_system_prompt(&config, &tools);
        Ok(Self {
            backend,
            tools,
            config,
            messages: vec![ChatMessage::system(system_prompt)],
            permissions,
            prompter,
            stats: SessionStats::default(),
            interrupt,
            subagent_mgr: None,
            on_message: None,
        })
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Replace the transcript wholesale, used when switching to a persisted
    /// context or reloading after compaction.
    pub fn set_messages(&mut self, messages: Vec<ChatMessage>) {
        self.messages = messages;
    }

    /// Reset to a fresh system-only transcript.
    pub fn clear(&mut self) {
        let system_prompt = build_system_prompt(&self.config, &self.tools);
        self.messages = vec![ChatMessage::system(system_prompt)];
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn context_id(&self) -> &str {
        &self.config.context_id
    }

    pub fn set_context_id(&mut self, id: impl Into<String>) {
        self.config.context_id = id.into();
    }

    pub fn permissions(&self) -> PermissionHandle {
        self.permissions.clone()
    }

    /// Late binding for the manager/loop cycle: the manager is constructed
    /// after the loop because it shares the loop's permission state.
    pub fn set_subagent_manager(&mut self, manager: Arc<SubagentManager>) {
        self.subagent_mgr = Some(manager);
    }

    pub fn set_message_callback(&mut self, callback: MessageCallback) {
        self.on_message = Some(callback);
    }

    /// Run the loop for one user prompt: alternate completion and tool
    /// execution until the model stops calling tools, the iteration budget
    /// runs out, or the interrupt flag is observed.
    pub async fn run(&mut self, user_prompt: impl Into<String>) -> LoopResult {
        self.append(ChatMessage::user(user_prompt.into()));

        let mut iterations = 0u32;
        loop {
            if self.interrupt.load(Ordering::SeqCst) {
                return LoopResult {
                    stop_reason: AgentStopReason::UserCancelled,
                    final_response: String::new(),
                    iterations,
                };
            }
            if iterations >= self.config.max_iterations {
                return LoopResult {
                    stop_reason: AgentStopReason::MaxIterations,
                    final_response: String::new(),
                    iterations,
                };
            }

            let request = CompletionRequest {
                messages: self.messages.clone(),
                tools: self.allowed_tool_specs(),
            };
            let completion = match self.backend.complete(request).await {
                Ok(completion) => completion,
                Err(BackendError::Cancelled) => {
                    // No partial assistant message is appended for a
                    // cancelled completion.
                    return LoopResult {
                        stop_reason: AgentStopReason::UserCancelled,
                        final_response: String::new(),
                        iterations,
                    };
                }
                Err(error) => {
                    tracing::error!(error = %error, "completion request failed");
                    return LoopResult {
                        stop_reason: AgentStopReason::AgentError,
                        final_response: String::new(),
                        iterations,
                    };
                }
            };

            if let Some(warning) = self
                .stats
                .update(&completion.timings, self.backend.context_window())
            {
                tracing::warn!(
                    threshold_pct = warning.threshold_pct,
                    used_tokens = warning.used_tokens,
                    total_tokens = warning.total_tokens,
                    "context window usage is high; consider /compact"
                );
            }

            iterations += 1;
            let assistant = completion.message;
            self.append(assistant.clone());

            if assistant.tool_calls.is_empty() {
                return LoopResult {
                    stop_reason: AgentStopReason::Completed,
                    final_response: assistant.content,
                    iterations,
                };
            }

            // Tool calls run sequentially in emitted order; a failure is
            // reported to the model and does not abort later calls.
            for call in &assistant.tool_calls {
                let message = self.dispatch_tool_call(call).await;
                self.append(message);
            }
        }
    }

    async fn dispatch_tool_call(&mut self, call: &ToolCall) -> ChatMessage {
        let name = call.function.name.as_str();

        if self.tools.get(name).is_none() {
            return ChatMessage::tool_result(&call.id, format!("Error: unknown tool: {name}"));
        }

        let args: Value = match serde_json::from_str(&call.function.arguments) {
            Ok(args) => args,
            Err(error) => {
                return ChatMessage::tool_result(
                    &call.id,
                    format!("Error: invalid tool arguments: {error}"),
                );
            }
        };

        if !self.is_tool_allowed(name) || !self.check_permission(name, &args).await {
            return ChatMessage::tool_result(&call.id, "Permission denied");
        }

        let ctx = self.tool_context();
        let result = match self.tools.execute(name, args, ctx).await {
            Ok(result) => result,
            Err(error) => return ChatMessage::tool_result(&call.id, format!("Error: {error}")),
        };

        if result.success {
            ChatMessage::tool_result(&call.id, result.output)
        } else {
            ChatMessage::tool_result(&call.id, format!("Error: {}", result.error))
        }
    }

    async fn check_permission(&self, tool: &str, args: &Value) -> bool {
        let resource = resource_key(args);
        let decision = self
            .permissions
            .lock()
            .expect("permission mutex should lock")
            .decide(tool, &resource);
        match decision {
            PermissionDecision::Allow => true,
            PermissionDecision::Deny => false,
            PermissionDecision::Prompt => {
                let answer = self.prompter.ask(tool, &resource).await;
                self.permissions
                    .lock()
                    .expect("permission mutex should lock")
                    .record(tool, &resource, answer);
                answer != PromptAnswer::No
            }
        }
    }

    fn is_tool_allowed(&self, name: &str) -> bool {
        self.config.allowed_tools.is_empty()
            || self.config.allowed_tools.iter().any(|allowed| allowed == name)
    }

    fn allowed_tool_specs(&self) -> Vec<ToolSpec> {
        self.tools
            .definitions()
            .into_iter()
            .filter(|tool| self.is_tool_allowed(&tool.name))
            .map(|tool| tool.spec())
            .collect()
    }

    fn tool_context(&self) -> ToolContext {
        ToolContext {
            working_dir: self.config.working_dir.clone(),
            interrupt: self.interrupt.clone(),
            timeout_ms: self.config.tool_timeout_ms,
            context_base_path: self.config.context_base_path.clone(),
            context_id: self.config.context_id.clone(),
            subagent_mgr: self.subagent_mgr.clone(),
            tool_registry: Some(self.tools.clone()),
        }
    }

    fn append(&mut self, message: ChatMessage) {
        self.messages.push(message);
        if let (Some(callback), Some(appended)) = (&self.on_message, self.messages.last()) {
            if let Err(error) = callback(appended) {
                tracing::warn!(error = %error, "message persistence callback failed");
            }
        }
    }
}

/// The resource half of a permission cache key, derived from the most
/// identifying argument a tool call carries.
fn resource_key(args: &Value) -> String {
    for key in ["command", "file_path", "path"] {
        if let Some(value) = args.get(key).and_then(Value::as_str) {
            return value.to_string();
        }
    }
    args.to_string()
}

fn build_system_prompt(config: &AgentConfig, tools: &ToolRegistry) -> String {
    let mut prompt = if config.custom_system_prompt.is_empty() {
        DEFAULT_SYSTEM_PROMPT.to_string()
    } else {
        config.custom_system_prompt.clone()
    };

    if !config.skip_tool_table {
        let mut table = String::from(
            "\n\n# Available Tools\n\n| Tool | Signature | Description |\n|------|-----------|-------------|\n",
        );
        let mut listed = 0usize;
        for tool in tools.definitions() {
            let allowed = config.allowed_tools.is_empty()
                || config.allowed_tools.iter().any(|name| name == &tool.name);
            if !allowed {
                continue;
            }
            table.push_str(&format!(
                "| {} | `{}` | {} |\n",
                tool.name,
                tool.signature,
                short_description(&tool.description)
            ));
            listed += 1;
        }
        if listed > 0 {
            prompt.push_str(&table);
        }
    }

    if !config.skills_prompt_section.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(&config.skills_prompt_section);
    }
    if !config.agents_prompt_section.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(&config.agents_prompt_section);
    }

    prompt
}
