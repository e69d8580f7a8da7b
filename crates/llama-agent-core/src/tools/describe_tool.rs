use super::{ToolContext, ToolDefinition, ToolResult, required_string_argument};
use serde_json::{Value, json};
use std::sync::Arc;

/// Prompt tables show compact signatures only; this tool is the second step
/// of that progressive disclosure, returning a tool's full documentation.
pub fn describe_tool() -> ToolDefinition {
    ToolDefinition {
        name: "describe_tool".to_string(),
        description: "Get the full description and parameter schema for a tool. Tool tables in \
the system prompt only show compact signatures; use this when you need complete parameter \
documentation before calling a tool."
            .to_string(),
        signature: "describe_tool(tool_name: string)".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "tool_name": {
                    "type": "string",
                    "description": "Name of the tool to describe"
                }
            },
            "required": ["tool_name"]
        }),
        execute: Arc::new(|args, ctx| Box::pin(async move { execute(&args, &ctx) })),
    }
}

fn execute(args: &Value, ctx: &ToolContext) -> ToolResult {
    let tool_name = match required_string_argument(args, "tool_name") {
        Ok(name) => name,
        Err(error) => return ToolResult::fail(error),
    };

    let Some(registry) = ctx.tool_registry.as_ref() else {
        return ToolResult::fail("Tool registry not available in this context");
    };
    let Some(tool) = registry.get(&tool_name) else {
        let known = registry.names().join(", ");
        return ToolResult::fail(format!("Unknown tool: {tool_name}. Available tools: {known}"));
    };

    let parameters = serde_json::to_string_pretty(&tool.parameters)
        .unwrap_or_else(|_| tool.parameters.to_string());
    ToolResult::ok(format!(
        "# {}\n\nSignature: `{}`\n\n{}\n\n## Parameters\n\n```json\n{}\n```",
        tool.name, tool.signature, tool.description, parameters
    ))
}
