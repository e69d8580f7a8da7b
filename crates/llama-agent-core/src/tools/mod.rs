use crate::errors::ToolError;
use crate::subagents::SubagentManager;
use llama_agent_llm::ToolSpec;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

mod describe_tool;
mod read_plan;
mod spawn_agent;

pub use describe_tool::describe_tool;
pub use read_plan::read_plan_tool;
pub use spawn_agent::spawn_agent_tool;

pub type ToolFuture = Pin<Box<dyn Future<Output = ToolResult> + Send>>;
pub type ToolExecutor = Arc<dyn Fn(Value, ToolContext) -> ToolFuture + Send + Sync>;

/// Execution context handed to every tool invocation.
#[derive(Clone)]
pub struct ToolContext {
    pub working_dir: PathBuf,
    pub interrupt: Arc<AtomicBool>,
    pub timeout_ms: u64,
    /// Canonical base for all context CRUD, from `--data-dir` or the
    /// `<working_dir>/.llama-agent` default.
    pub context_base_path: PathBuf,
    pub context_id: String,
    pub subagent_mgr: Option<Arc<SubagentManager>>,
    pub tool_registry: Option<Arc<ToolRegistry>>,
}

/// Result of a tool execution.
///
/// Contract: `success` implies `error` is empty; failure implies a non-empty
/// `error` (output may still carry a partial result).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    pub error: String,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: String::new(),
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: error.into(),
        }
    }
}

#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// Compact display form, e.g. `spawn_agent(agent_name: string, task: string)`.
    pub signature: String,
    /// JSON schema for the arguments object.
    pub parameters: Value,
    pub execute: ToolExecutor,
}

impl ToolDefinition {
    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// Catalog of tools for one process. Push-only during startup; treated as
/// immutable once the main loop begins.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDefinition>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the orchestration tools this crate owns.
    /// Environment tools (shell, file IO, search) are registered by the host.
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::new();
        registry.register(spawn_agent_tool());
        registry.register(read_plan_tool());
        registry.register(describe_tool());
        registry
    }

    pub fn register(&mut self, tool: ToolDefinition) {
        self.tools.insert(tool.name.clone(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    /// All definitions, name-sorted so prompt tables are deterministic.
    pub fn definitions(&self) -> Vec<&ToolDefinition> {
        let mut definitions: Vec<&ToolDefinition> = self.tools.values().collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    pub async fn execute(
        &self,
        name: &str,
        args: Value,
        ctx: ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        Ok((tool.execute)(args, ctx).await)
    }
}

pub(crate) fn required_string_argument(args: &Value, key: &str) -> Result<String, String> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| format!("{key} is required"))
}

pub(crate) fn optional_string_argument(args: &Value, key: &str) -> String {
    args.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// First sentence of a description when it ends within 100 chars, otherwise
/// the first 77 chars with an ellipsis. Used by tool tables and prompts.
pub fn short_description(description: &str) -> String {
    if let Some(period) = description.find('.') {
        if period < 100 {
            return description[..=period].to_string();
        }
    }
    if description.chars().count() > 80 {
        let head: String = description.chars().take(77).collect();
        return format!("{head}...");
    }
    description.to_string()
}
