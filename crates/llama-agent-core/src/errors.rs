use thiserror::Error;

/// Session-level failures in loop orchestration and configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("invalid planning state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },
    #[error("cancelled by user")]
    Cancelled,
}

/// Tool-level failures in lookup, argument parsing, and execution.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid tool arguments: {0}")]
    InvalidArguments(String),
    #[error("tool execution failed: {0}")]
    Execution(String),
    #[error("permission denied for tool '{0}'")]
    PermissionDenied(String),
}

/// Subagent spawn failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SpawnError {
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),
    #[error("Maximum spawn depth ({0}) exceeded. Cannot spawn more subagents.")]
    DepthExceeded(u32),
    #[error("working_dir does not exist or is not a directory: {0}")]
    InvalidWorkingDir(String),
}

/// Top-level error type for the core crate.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error(transparent)]
    Backend(#[from] llama_agent_llm::BackendError),
    #[error(transparent)]
    Store(#[from] llama_agent_store::StoreError),
    #[error("working_dir does not exist or is not a directory: {0}")]
    InvalidWorkingDir(String),
}
