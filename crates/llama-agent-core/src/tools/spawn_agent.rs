use super::{ToolContext, ToolDefinition, ToolResult, optional_string_argument, required_string_argument};
use crate::subagents::SubagentRequest;
use serde_json::{Value, json};
use std::sync::Arc;

pub fn spawn_agent_tool() -> ToolDefinition {
    ToolDefinition {
        name: "spawn_agent".to_string(),
        description: "Spawn a subagent to perform a specialized task with a fresh context. \
The subagent runs with its own context window, preventing pollution of the main agent's \
context, and its results are returned on completion. Use it for deep exploration, \
specialized behavior such as planning, or a focused delegated subtask."
            .to_string(),
        signature: "spawn_agent(agent_name: string, task: string, context?: object, \
max_iterations?: int, working_dir?: string)"
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "agent_name": {
                    "type": "string",
                    "description": "Name of the agent to spawn (e.g. 'explorer-agent', 'planning-agent')"
                },
                "task": {
                    "type": "string",
                    "description": "The task for the subagent to perform"
                },
                "context": {
                    "type": "object",
                    "description": "Additional context to pass to the subagent (optional)"
                },
                "max_iterations": {
                    "type": "integer",
                    "description": "Maximum iterations for the subagent (default: 20)"
                },
                "working_dir": {
                    "type": "string",
                    "description": "Scope the subagent to this directory, relative to the current one or absolute"
                }
            },
            "required": ["agent_name", "task"]
        }),
        execute: Arc::new(|args, ctx| Box::pin(execute(args, ctx))),
    }
}

async fn execute(args: Value, ctx: ToolContext) -> ToolResult {
    let Some(manager) = ctx.subagent_mgr.clone() else {
        return ToolResult::fail("Subagent manager not available in this context");
    };

    let agent_name = match required_string_argument(&args, "agent_name") {
        Ok(name) => name,
        Err(error) => return ToolResult::fail(error),
    };
    let task = match required_string_argument(&args, "task") {
        Ok(task) => task,
        Err(error) => return ToolResult::fail(error),
    };

    let request = SubagentRequest {
        agent_name: agent_name.clone(),
        task,
        context: args.get("context").cloned().unwrap_or(Value::Null),
        max_iterations: args
            .get("max_iterations")
            .and_then(Value::as_u64)
            .unwrap_or(20) as u32,
        persist: false,
        spawn_depth: manager.current_spawn_depth(),
        working_dir: optional_string_argument(&args, "working_dir"),
    };

    let result = manager.spawn(request, ctx.interrupt.clone()).await;
    if !result.success {
        let error = if result.output.is_empty() {
            result.error
        } else {
            format!("{}\n\nError: {}", result.output, result.error)
        };
        return ToolResult::fail(error);
    }

    let mut output = json!({
        "agent": agent_name,
        "result": result.output,
        "iterations": result.iterations,
        "stats": {
            "input_tokens": result.stats.total_input,
            "output_tokens": result.stats.total_output,
        },
    });
    if result
        .artifacts
        .as_object()
        .is_some_and(|artifacts| !artifacts.is_empty())
    {
        output["artifacts"] = result.artifacts;
    }
    if !result.files_modified.is_empty() {
        output["files_modified"] = json!(result.files_modified);
    }
    if !result.commands_run.is_empty() {
        output["commands_run"] = json!(result.commands_run);
    }

    match serde_json::to_string_pretty(&output) {
        Ok(rendered) => ToolResult::ok(rendered),
        Err(error) => ToolResult::fail(format!("failed to render subagent result: {error}")),
    }
}
