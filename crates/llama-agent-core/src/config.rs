use crate::errors::{AgentError, SessionError};
use std::path::PathBuf;

pub const DEFAULT_MAX_ITERATIONS: u32 = 50;
pub const MIN_MAX_ITERATIONS: u32 = 1;
pub const MAX_MAX_ITERATIONS: u32 = 1000;
pub const SUBAGENT_MAX_ITERATIONS_LIMIT: u32 = 100;

pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 120_000;
pub const COMPACT_TOOL_TIMEOUT_MS: u64 = 60_000;

pub const MAX_SPAWN_DEPTH: u32 = 3;

/// Commands recorded from transcripts are truncated to this many characters.
pub const MAX_RECORDED_COMMAND_LEN: usize = 200;

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are llama-agent, a coding assistant operating inside the user's working \
directory. Work step by step: inspect before you modify, prefer small \
verifiable changes, and report what you did when you finish. Use the tools \
listed below to interact with the environment; never invent tool output. \
When a task is ambiguous, state your assumption and proceed.";

/// Runtime configuration for one agent loop. Plain data; collaborators
/// (backend, registry, store, permission handle) are passed to the loop
/// constructor separately.
#[derive(Clone, Debug, PartialEq)]
pub struct AgentConfig {
    pub working_dir: PathBuf,
    pub max_iterations: u32,
    pub tool_timeout_ms: u64,
    pub yolo_mode: bool,
    /// Whitelist of tool names; empty means every registered tool.
    pub allowed_tools: Vec<String>,
    /// Replaces the default system prompt entirely when non-empty. The tool
    /// table is still appended unless `skip_tool_table` is set.
    pub custom_system_prompt: String,
    pub skip_tool_table: bool,
    pub skills_prompt_section: String,
    pub agents_prompt_section: String,
    pub context_id: String,
    pub context_base_path: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tool_timeout_ms: DEFAULT_TOOL_TIMEOUT_MS,
            yolo_mode: false,
            allowed_tools: Vec::new(),
            custom_system_prompt: String::new(),
            skip_tool_table: false,
            skills_prompt_section: String::new(),
            agents_prompt_section: String::new(),
            context_id: String::new(),
            context_base_path: PathBuf::new(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), AgentError> {
        if !self.working_dir.is_dir() {
            return Err(AgentError::InvalidWorkingDir(
                self.working_dir.display().to_string(),
            ));
        }
        if self.max_iterations < MIN_MAX_ITERATIONS || self.max_iterations > MAX_MAX_ITERATIONS {
            return Err(SessionError::InvalidConfiguration(format!(
                "max_iterations must be in [{MIN_MAX_ITERATIONS}, {MAX_MAX_ITERATIONS}] (got {})",
                self.max_iterations
            ))
            .into());
        }
        Ok(())
    }
}

pub fn clamp_max_iterations(value: u32) -> u32 {
    value.clamp(MIN_MAX_ITERATIONS, MAX_MAX_ITERATIONS)
}

pub fn clamp_subagent_iterations(value: u32) -> u32 {
    value.clamp(MIN_MAX_ITERATIONS, SUBAGENT_MAX_ITERATIONS_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_match_baseline() {
        let config = AgentConfig::default();
        assert_eq!(config.max_iterations, 50);
        assert_eq!(config.tool_timeout_ms, 120_000);
        assert!(!config.yolo_mode);
        assert!(config.allowed_tools.is_empty());
        assert!(!config.skip_tool_table);
    }

    #[test]
    fn iteration_clamps_respect_limits() {
        assert_eq!(clamp_max_iterations(0), 1);
        assert_eq!(clamp_max_iterations(5000), 1000);
        assert_eq!(clamp_subagent_iterations(5000), 100);
        assert_eq!(clamp_subagent_iterations(20), 20);
    }

    #[test]
    fn validate_rejects_missing_working_dir() {
        let config = AgentConfig {
            working_dir: PathBuf::from("/definitely/not/a/real/dir"),
            ..AgentConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(AgentError::InvalidWorkingDir(_))
        ));
    }
}
