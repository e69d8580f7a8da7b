use crate::config::{
    AgentConfig, DEFAULT_TOOL_TIMEOUT_MS, MAX_SPAWN_DEPTH, clamp_subagent_iterations,
};
use crate::errors::SpawnError;
use crate::permissions::{PermissionHandle, PermissionPrompt};
use crate::session::{AgentLoop, AgentStopReason, MessageCallback};
use crate::stats::SessionStats;
use crate::tools::{ToolRegistry, short_description};
use llama_agent_llm::{ChatMessage, CompletionBackend, Role};
use llama_agent_store::ContextStore;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

pub mod embedded;
pub mod registry;

pub use registry::{AgentDefinition, AgentRegistry};

/// Request to spawn one subagent.
#[derive(Clone, Debug, Default)]
pub struct SubagentRequest {
    pub agent_name: String,
    pub task: String,
    /// Extra context serialized into a `## Context` section; `Null` for none.
    pub context: Value,
    /// Overrides the agent definition's limit when non-zero.
    pub max_iterations: u32,
    pub persist: bool,
    /// Depth of the spawning agent; 0 when the main loop spawns.
    pub spawn_depth: u32,
    /// Overrides the manager's working directory when non-empty.
    pub working_dir: String,
}

#[derive(Clone, Debug, Default)]
pub struct SubagentResult {
    pub success: bool,
    pub output: String,
    /// Structured JSON found in the child's assistant messages.
    pub artifacts: Value,
    pub iterations: u32,
    pub stats: SessionStats,
    pub error: String,
    pub files_modified: Vec<String>,
    pub commands_run: Vec<String>,
}

impl SubagentResult {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            ..Self::default()
        }
    }
}

/// Spawns child agent loops with isolated conversation context over the
/// shared inference backend. Tracks recursion depth and shares the parent's
/// permission state with every child.
pub struct SubagentManager {
    backend: Arc<dyn CompletionBackend>,
    tools: Arc<ToolRegistry>,
    agents: Arc<AgentRegistry>,
    store: Arc<ContextStore>,
    working_dir: PathBuf,
    permissions: PermissionHandle,
    prompter: Arc<dyn PermissionPrompt>,
    depth_stack: Mutex<Vec<u32>>,
    last_messages: Mutex<Vec<ChatMessage>>,
}

impl SubagentManager {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        tools: Arc<ToolRegistry>,
        agents: Arc<AgentRegistry>,
        store: Arc<ContextStore>,
        working_dir: PathBuf,
        permissions: PermissionHandle,
        prompter: Arc<dyn PermissionPrompt>,
    ) -> Self {
        Self {
            backend,
            tools,
            agents,
            store,
            working_dir,
            permissions,
            prompter,
            depth_stack: Mutex::new(Vec::new()),
            last_messages: Mutex::new(Vec::new()),
        }
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    /// Depth of the innermost spawn currently running; 0 outside any spawn.
    pub fn current_spawn_depth(&self) -> u32 {
        self.depth_stack
            .lock()
            .expect("depth stack mutex should lock")
            .last()
            .copied()
            .unwrap_or(0)
    }

    /// Transcript of the most recently finished subagent.
    pub fn last_messages(&self) -> Vec<ChatMessage> {
        self.last_messages
            .lock()
            .expect("last messages mutex should lock")
            .clone()
    }

    pub async fn spawn(
        self: &Arc<Self>,
        request: SubagentRequest,
        interrupt: Arc<AtomicBool>,
    ) -> SubagentResult {
        if request.spawn_depth >= MAX_SPAWN_DEPTH {
            return SubagentResult::failure(SpawnError::DepthExceeded(MAX_SPAWN_DEPTH).to_string());
        }

        let Some(definition) = self.agents.get(&request.agent_name).cloned() else {
            return SubagentResult::failure(
                SpawnError::UnknownAgent(request.agent_name.clone()).to_string(),
            );
        };

        let working_dir = if request.working_dir.is_empty() {
            self.working_dir.clone()
        } else {
            match resolve_working_dir(&request.working_dir, &self.working_dir) {
                Some(dir) => dir,
                None => {
                    return SubagentResult::failure(
                        SpawnError::InvalidWorkingDir(request.working_dir.clone()).to_string(),
                    );
                }
            }
        };

        // Fresh slot for the child; the parent's transcript is its source of
        // truth and will be reprocessed on its next completion.
        self.backend.clear_slot().await;
        self.depth_stack
            .lock()
            .expect("depth stack mutex should lock")
            .push(request.spawn_depth + 1);

        let sub_context_id = if request.persist {
            self.store.create().ok()
        } else {
            None
        };

        let max_iterations = if request.max_iterations > 0 {
            clamp_subagent_iterations(request.max_iterations)
        } else {
            definition.max_iterations
        };
        let config = AgentConfig {
            working_dir,
            max_iterations,
            tool_timeout_ms: DEFAULT_TOOL_TIMEOUT_MS,
            yolo_mode: false,
            allowed_tools: definition.allowed_tools.clone(),
            context_id: sub_context_id.clone().unwrap_or_default(),
            context_base_path: self.store.base_path().to_path_buf(),
            ..AgentConfig::default()
        };

        let result = self
            .run_child(config, &definition, &request, sub_context_id, interrupt)
            .await;

        {
            let mut stack = self
                .depth_stack
                .lock()
                .expect("depth stack mutex should lock");
            stack.pop();
        }
        self.backend.clear_slot().await;

        result
    }

    async fn run_child(
        self: &Arc<Self>,
        config: AgentConfig,
        definition: &AgentDefinition,
        request: &SubagentRequest,
        sub_context_id: Option<String>,
        interrupt: Arc<AtomicBool>,
    ) -> SubagentResult {
        let mut child = match AgentLoop::with_permissions(
            self.backend.clone(),
            self.tools.clone(),
            config,
            interrupt,
            self.permissions.clone(),
            self.prompter.clone(),
        ) {
            Ok(child) => child,
            Err(error) => return SubagentResult::failure(error.to_string()),
        };
        child.set_subagent_manager(self.clone());

        if let Some(context_id) = sub_context_id {
            let store = self.store.clone();
            let persisted_id = context_id.clone();
            let callback: MessageCallback =
                Arc::new(move |message| store.append_message(&persisted_id, message));
            child.set_message_callback(callback);
        }

        let mut prompt = format!(
            "{}\n\n# Task\n\n{}",
            self.generate_system_prompt(definition),
            request.task
        );
        if !request.context.is_null() {
            let rendered = serde_json::to_string_pretty(&request.context)
                .unwrap_or_else(|_| request.context.to_string());
            prompt.push_str(&format!("\n\n## Context\n\n```json\n{rendered}\n```"));
        }

        let loop_result = child.run(prompt).await;

        let messages = child.messages().to_vec();
        let (files_modified, commands_run) = extract_modifications(&messages);
        let mut result = SubagentResult {
            success: loop_result.stop_reason == AgentStopReason::Completed,
            output: loop_result.final_response,
            artifacts: extract_artifacts(&messages),
            iterations: loop_result.iterations,
            stats: *child.stats(),
            error: String::new(),
            files_modified,
            commands_run,
        };
        *self
            .last_messages
            .lock()
            .expect("last messages mutex should lock") = messages;

        if !result.success {
            result.error = match loop_result.stop_reason {
                AgentStopReason::MaxIterations => "Subagent reached max iterations".to_string(),
                AgentStopReason::UserCancelled => "Subagent was cancelled".to_string(),
                _ => "Subagent encountered an error".to_string(),
            };
        }
        result
    }

    /// System prompt for a named agent: identity line, its instructions, the
    /// signature table for its allowed tools, and closing guidelines. Also
    /// used by the planning workflow for its persistent agent.
    pub fn generate_system_prompt(&self, definition: &AgentDefinition) -> String {
        let mut prompt = format!("You are {}, a specialized subagent.\n\n", definition.name);
        if !definition.instructions.is_empty() {
            prompt.push_str(&definition.instructions);
            prompt.push_str("\n\n");
        }

        if definition.allowed_tools.is_empty() {
            prompt.push_str(
                "# No Tools Available\n\nYou do not have access to any tools. Provide your \
analysis and response based on the context provided.\n\n",
            );
        } else {
            prompt.push_str("# Available Tools\n\n");
            prompt.push_str("| Tool | Signature | Description |\n");
            prompt.push_str("|------|-----------|-------------|\n");
            for tool_name in &definition.allowed_tools {
                if let Some(tool) = self.tools.get(tool_name) {
                    prompt.push_str(&format!(
                        "| {} | `{}` | {} |\n",
                        tool.name,
                        tool.signature,
                        short_description(&tool.description)
                    ));
                }
            }
            prompt.push_str("\nUse `describe_tool(tool_name)` for full parameter documentation.\n\n");
        }

        prompt.push_str(
            "# Guidelines\n\n\
- Focus on completing the task efficiently\n\
- Be concise in your responses\n\
- When finished, provide a clear summary of what you accomplished\n",
        );
        prompt
    }
}

fn resolve_working_dir(requested: &str, base: &Path) -> Option<PathBuf> {
    let requested_path = Path::new(requested);
    let candidate = if requested_path.is_absolute() {
        requested_path.to_path_buf()
    } else {
        base.join(requested_path)
    };
    let canonical = std::fs::canonicalize(&candidate).ok()?;
    canonical.is_dir().then_some(canonical)
}

/// Structured JSON emitted by a subagent: the first fenced ```json block of
/// each assistant message, skipping planning Q&A payloads.
pub fn extract_artifacts(messages: &[ChatMessage]) -> Value {
    let mut artifacts = serde_json::Map::new();
    for message in messages {
        if message.role != Role::Assistant {
            continue;
        }
        let Some(block) = fenced_json_block(&message.content) else {
            continue;
        };
        let Ok(parsed) = serde_json::from_str::<Value>(block) else {
            continue;
        };
        if parsed.get("questions").is_some() {
            continue;
        }
        artifacts.insert("data".to_string(), parsed);
    }
    Value::Object(artifacts)
}

fn fenced_json_block(content: &str) -> Option<&str> {
    let start = content.find("```json")?;
    let mut body_start = start + "```json".len();
    if content[body_start..].starts_with('\n') {
        body_start += 1;
    }
    let body_end = content[body_start..].find("```")?;
    Some(&content[body_start..body_start + body_end])
}

/// Derive `files_modified` and `commands_run` from a transcript: write/edit
/// file paths, bash commands (truncated at 200 chars), and the recursive
/// union of nested `spawn_agent` results. Files keep first-seen order.
pub fn extract_modifications(messages: &[ChatMessage]) -> (Vec<String>, Vec<String>) {
    let mut files_modified: Vec<String> = Vec::new();
    let mut commands_run: Vec<String> = Vec::new();

    for message in messages {
        if message.role != Role::Assistant {
            continue;
        }
        for call in &message.tool_calls {
            let Ok(args) = serde_json::from_str::<Value>(&call.function.arguments) else {
                continue;
            };
            match call.function.name.as_str() {
                "write" | "edit" => {
                    let path = args
                        .get("file_path")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    if !path.is_empty() && !files_modified.iter().any(|seen| seen == path) {
                        files_modified.push(path.to_string());
                    }
                }
                "bash" => {
                    let command = args
                        .get("command")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    if !command.is_empty() {
                        commands_run.push(truncate_command(command));
                    }
                }
                "spawn_agent" => {
                    let Some(result) = tool_result_for(messages, &call.id) else {
                        continue;
                    };
                    let Ok(nested) = serde_json::from_str::<Value>(result) else {
                        continue;
                    };
                    if let Some(nested_files) =
                        nested.get("files_modified").and_then(Value::as_array)
                    {
                        for file in nested_files.iter().filter_map(Value::as_str) {
                            if !files_modified.iter().any(|seen| seen == file) {
                                files_modified.push(file.to_string());
                            }
                        }
                    }
                    if let Some(nested_commands) =
                        nested.get("commands_run").and_then(Value::as_array)
                    {
                        for command in nested_commands.iter().filter_map(Value::as_str) {
                            commands_run.push(command.to_string());
                        }
                    }
                }
                _ => {}
            }
        }
    }

    (files_modified, commands_run)
}

fn tool_result_for<'a>(messages: &'a [ChatMessage], call_id: &str) -> Option<&'a str> {
    messages
        .iter()
        .find(|message| {
            message.role == Role::Tool && message.tool_call_id.as_deref() == Some(call_id)
        })
        .map(|message| message.content.as_str())
}

fn truncate_command(command: &str) -> String {
    if command.chars().count() > crate::config::MAX_RECORDED_COMMAND_LEN {
        let head: String = command.chars().take(197).collect();
        format!("{head}...")
    } else {
        command.to_string()
    }
}
