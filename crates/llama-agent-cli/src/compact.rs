//! `/compact`: archive the current conversation behind an LLM-written
//! summary, keeping the raw history on disk.

use crate::commands::CommandContext;
use llama_agent_core::subagents::extract_modifications;
use llama_agent_core::{
    AgentConfig, AgentLoop, AgentStopReason, COMPACT_TOOL_TIMEOUT_MS, ToolRegistry,
};
use llama_agent_llm::{ChatMessage, Role};
use llama_agent_store::CompactEntry;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

const COMPACTION_PROMPT_TEMPLATE: &str = r#"# Context Compaction

Analyze the conversation and create a JSON summary:

```json
{
  "summary": "2-4 paragraph summary of what was accomplished",
  "key_decisions": {"architectural": [], "implementation": [], "rejected": []},
  "current_state": "Where the work stands now",
  "pending_tasks": ["Unfinished tasks"]
}
```
{{USER_REQUIREMENTS}}
## Conversation
{{CONVERSATION}}"#;

pub async fn run(ctx: &mut CommandContext<'_>, directive: &str) {
    let messages = ctx.agent.messages().to_vec();

    // Phase 1: programmatic extraction.
    let user_messages: Vec<String> = messages
        .iter()
        .filter(|message| message.role == Role::User && !message.content.is_empty())
        .map(|message| truncate_user_message(&message.content))
        .collect();
    let (files_modified, commands_run) = extract_modifications(&messages);
    let plan_ref = if ctx.store.has_plan(ctx.current_context_id) {
        "plan.md".to_string()
    } else {
        String::new()
    };

    // Phase 2: LLM summarization in an isolated one-shot run.
    println!("\nGenerating summary...");
    let summary = summarize(ctx, &messages, directive).await;

    // Phase 3: the hybrid entry.
    let mut entry = CompactEntry {
        user_messages,
        files_modified,
        commands_run,
        plan_ref,
        ..CompactEntry::default()
    };
    match summary {
        Some(llm_fields) => {
            entry.summary = llm_fields.summary;
            entry.key_decisions = llm_fields.key_decisions;
            entry.current_state = llm_fields.current_state;
            entry.pending_tasks = llm_fields.pending_tasks;
        }
        None => {
            // Fallback summary from the extracted counts.
            entry.summary = format!(
                "Conversation with {} user messages. Modified {} files. Ran {} commands.",
                entry.user_messages.len(),
                entry.files_modified.len(),
                entry.commands_run.len()
            );
            eprintln!("LLM summary failed; using extracted counts.");
        }
    }

    // Phase 4: persist and reload.
    match ctx.store.compact(ctx.current_context_id, entry.clone()) {
        Ok(_) => {
            println!("\nContext compacted.");
            println!("\n--- Summary ---\n{}", entry.summary);
            if !entry.current_state.is_empty() {
                println!("\n--- Current State ---\n{}", entry.current_state);
            }
            if !entry.pending_tasks.is_empty() {
                println!("\n--- Pending Tasks ---");
                for task in &entry.pending_tasks {
                    println!("- {task}");
                }
            }
            if let Ok(Some(state)) = ctx.store.load(ctx.current_context_id) {
                ctx.agent.set_messages(state.messages);
            }
        }
        Err(error) => eprintln!("Failed to compact context: {error}"),
    }
}

struct SummaryFields {
    summary: String,
    key_decisions: Value,
    current_state: String,
    pending_tasks: Vec<String>,
}

async fn summarize(
    ctx: &CommandContext<'_>,
    messages: &[ChatMessage],
    directive: &str,
) -> Option<SummaryFields> {
    let mut conversation = String::new();
    for message in messages {
        match message.role {
            Role::User | Role::Assistant => {
                conversation.push_str(&format!(
                    "**{}**: {}\n\n",
                    if message.role == Role::User { "user" } else { "assistant" },
                    message.content
                ));
            }
            _ => {}
        }
    }

    let requirements = if directive.is_empty() {
        String::new()
    } else {
        format!("\n## Additional Requirements\n{directive}\n")
    };
    let prompt = COMPACTION_PROMPT_TEMPLATE
        .replace("{{CONVERSATION}}", &conversation)
        .replace("{{USER_REQUIREMENTS}}", &requirements);

    // The summarization run borrows the inference slot; the main transcript
    // is reprocessed afterwards from its messages.
    ctx.backend.clear_slot().await;
    let config = AgentConfig {
        working_dir: ctx.working_dir.clone(),
        max_iterations: 1,
        tool_timeout_ms: COMPACT_TOOL_TIMEOUT_MS,
        yolo_mode: true,
        skip_tool_table: true,
        context_base_path: ctx.store.base_path().to_path_buf(),
        ..AgentConfig::default()
    };
    // Text generation only: the summarizer gets an empty registry.
    let mut summarizer = match AgentLoop::new(
        ctx.backend.clone(),
        Arc::new(ToolRegistry::new()),
        config,
        Arc::new(AtomicBool::new(false)),
    ) {
        Ok(summarizer) => summarizer,
        Err(error) => {
            tracing::warn!(error = %error, "failed to construct compaction loop");
            return None;
        }
    };
    let result = summarizer.run(prompt).await;
    ctx.backend.clear_slot().await;

    if result.stop_reason != AgentStopReason::Completed {
        return None;
    }
    parse_summary(&result.final_response)
}

fn parse_summary(response: &str) -> Option<SummaryFields> {
    let parsed = fenced_json(response)
        .and_then(|block| serde_json::from_str::<Value>(block).ok())
        .or_else(|| serde_json::from_str::<Value>(response).ok());

    let Some(parsed) = parsed else {
        // Unparseable output still beats losing the turn: use it verbatim.
        return Some(SummaryFields {
            summary: response.to_string(),
            key_decisions: Value::Null,
            current_state: String::new(),
            pending_tasks: Vec::new(),
        });
    };

    Some(SummaryFields {
        summary: parsed
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        key_decisions: parsed.get("key_decisions").cloned().unwrap_or(Value::Null),
        current_state: parsed
            .get("current_state")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        pending_tasks: parsed
            .get("pending_tasks")
            .and_then(Value::as_array)
            .map(|tasks| {
                tasks
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    })
}

fn fenced_json(content: &str) -> Option<&str> {
    let start = content.find("```json")?;
    let mut body_start = start + "```json".len();
    if content[body_start..].starts_with('\n') {
        body_start += 1;
    }
    let body_end = content[body_start..].find("```")?;
    Some(&content[body_start..body_start + body_end])
}

fn truncate_user_message(content: &str) -> String {
    if content.chars().count() > 1000 {
        let head: String = content.chars().take(997).collect();
        format!("{head}...")
    } else {
        content.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_parse_prefers_the_fenced_block() {
        let response = "Here you go:\n```json\n{\"summary\": \"did things\", \"current_state\": \"stable\", \"pending_tasks\": [\"more\"]}\n```";
        let fields = parse_summary(response).expect("summary should parse");
        assert_eq!(fields.summary, "did things");
        assert_eq!(fields.current_state, "stable");
        assert_eq!(fields.pending_tasks, vec!["more"]);
    }

    #[test]
    fn bare_json_and_raw_text_both_degrade_gracefully() {
        let fields =
            parse_summary("{\"summary\": \"inline\"}").expect("bare JSON should parse");
        assert_eq!(fields.summary, "inline");

        let fields = parse_summary("just prose, no JSON").expect("raw text is kept");
        assert_eq!(fields.summary, "just prose, no JSON");
    }

    #[test]
    fn long_user_messages_are_truncated_at_1000_chars() {
        let long = "y".repeat(1500);
        let truncated = truncate_user_message(&long);
        assert_eq!(truncated.chars().count(), 1000);
        assert!(truncated.ends_with("..."));
    }
}
