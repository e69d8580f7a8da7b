use super::{ToolContext, ToolDefinition, ToolResult, optional_string_argument};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

pub fn read_plan_tool() -> ToolDefinition {
    ToolDefinition {
        name: "read_plan".to_string(),
        description: "Read the implementation plan for a context. Returns the plan.md content \
which contains the implementation strategy, phases, design decisions, and success criteria. \
If no context_id is provided, finds the most recent plan."
            .to_string(),
        signature: "read_plan(context_id?: string)".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "context_id": {
                    "type": "string",
                    "description": "The context ID to read the plan from. If omitted, finds the most recent plan."
                }
            }
        }),
        execute: Arc::new(|args, ctx| Box::pin(async move { execute(&args, &ctx) })),
    }
}

fn execute(args: &Value, ctx: &ToolContext) -> ToolResult {
    let base_path = if ctx.context_base_path.as_os_str().is_empty() {
        ctx.working_dir.join(".llama-agent")
    } else {
        ctx.context_base_path.clone()
    };
    let contexts_dir = base_path.join("contexts");

    // Priority: explicit argument, then the current conversation's context,
    // then the most recently modified plan on disk.
    let mut context_id = optional_string_argument(args, "context_id");
    if context_id.is_empty() {
        context_id = ctx.context_id.clone();
    }

    let plan_path = if context_id.is_empty() {
        match find_most_recent_plan(&contexts_dir) {
            Some((path, id)) => {
                context_id = id;
                path
            }
            None => {
                return ToolResult::fail(format!(
                    "No plans found in: {}\nUse context_id parameter to specify a specific plan.",
                    contexts_dir.display()
                ));
            }
        }
    } else {
        contexts_dir.join(&context_id).join("plan.md")
    };

    if !plan_path.exists() {
        return ToolResult::fail(format!(
            "No plan found for context: {context_id}\nExpected path: {}",
            plan_path.display()
        ));
    }

    let content = match std::fs::read_to_string(&plan_path) {
        Ok(content) => content,
        Err(error) => {
            return ToolResult::fail(format!(
                "Failed to read plan file: {} ({error})",
                plan_path.display()
            ));
        }
    };
    if content.is_empty() {
        return ToolResult::fail(format!("Plan file is empty: {}", plan_path.display()));
    }

    ToolResult::ok(format!(
        "# Plan from context: {context_id}\n# Path: {}\n\n{content}",
        plan_path.display()
    ))
}

fn find_most_recent_plan(contexts_dir: &Path) -> Option<(PathBuf, String)> {
    let entries = std::fs::read_dir(contexts_dir).ok()?;

    let mut best: Option<(PathBuf, String, SystemTime)> = None;
    for entry in entries.flatten() {
        if !entry.path().is_dir() {
            continue;
        }
        let candidate = entry.path().join("plan.md");
        let Ok(metadata) = std::fs::metadata(&candidate) else {
            continue;
        };
        let Ok(mtime) = metadata.modified() else {
            continue;
        };
        let id = entry.file_name().to_string_lossy().to_string();
        if best.as_ref().is_none_or(|(_, _, current)| mtime > *current) {
            best = Some((candidate, id, mtime));
        }
    }

    best.map(|(path, id, _)| (path, id))
}
