//! Core orchestration engine for llama-agent.
//!
//! The crate covers the bounded completion+tool-call loop ([`AgentLoop`]),
//! session-scoped permissions, the tool registry and the built-in
//! orchestration tools, subagent spawning with context isolation, the agent
//! definition registry, and the interactive planning workflow. Inference and
//! persistence stay behind the `llama-agent-llm` and `llama-agent-store`
//! contracts.

pub mod config;
pub mod errors;
pub mod permissions;
pub mod planning;
pub mod session;
pub mod stats;
pub mod subagents;
pub mod tools;

pub use config::*;
pub use errors::*;
pub use permissions::*;
pub use session::*;
pub use stats::*;
pub use tools::{ToolContext, ToolDefinition, ToolRegistry, ToolResult};
