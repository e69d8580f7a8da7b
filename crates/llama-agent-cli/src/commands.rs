//! Slash-command dispatch for the interactive prompt.

use crate::compact;
use llama_agent_core::planning::{PlanInterviewer, PlanningWorkflow};
use llama_agent_core::subagents::{AgentRegistry, SubagentManager};
use llama_agent_core::{AgentLoop, PermissionHandle, PermissionPrompt, ToolRegistry};
use llama_agent_llm::CompletionBackend;
use llama_agent_store::ContextStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// What the main loop should do after a line of input.
pub enum CommandAction {
    /// Handled; read the next line.
    Continue,
    /// Quit the program.
    Exit,
    /// Not a command; run it as a prompt.
    Prompt(String),
}

pub struct CommandContext<'a> {
    pub agent: &'a mut AgentLoop,
    pub store: Arc<ContextStore>,
    pub tools: Arc<ToolRegistry>,
    pub agents: Arc<AgentRegistry>,
    pub subagents: Arc<SubagentManager>,
    pub backend: Arc<dyn CompletionBackend>,
    pub permissions: PermissionHandle,
    pub prompter: Arc<dyn PermissionPrompt>,
    pub interviewer: Arc<dyn PlanInterviewer>,
    pub current_context_id: &'a mut String,
    pub working_dir: PathBuf,
    pub skills_paths: Vec<PathBuf>,
    pub interrupt: Arc<AtomicBool>,
}

pub async fn dispatch(input: &str, ctx: &mut CommandContext<'_>) -> CommandAction {
    if !input.starts_with('/') {
        return CommandAction::Prompt(input.to_string());
    }

    let (command, args) = match input.split_once(char::is_whitespace) {
        Some((command, args)) => (command, args.trim()),
        None => (input, ""),
    };

    match command {
        "/exit" | "/quit" => CommandAction::Exit,
        "/clear" => {
            ctx.agent.clear();
            match ctx.store.create() {
                Ok(id) => {
                    ctx.agent.set_context_id(id.clone());
                    *ctx.current_context_id = id;
                    println!(
                        "Conversation cleared. New context: {}",
                        short_id(ctx.current_context_id)
                    );
                }
                Err(error) => eprintln!("Failed to create a new context: {error}"),
            }
            CommandAction::Continue
        }
        "/list" => {
            match ctx.store.list() {
                Ok(contexts) if contexts.is_empty() => println!("\nNo saved conversations."),
                Ok(contexts) => {
                    println!("\nSaved conversations:");
                    for context in contexts {
                        let marker = if &context.id == ctx.current_context_id {
                            " *"
                        } else {
                            ""
                        };
                        println!(
                            "  {}{}  [{} msgs]  {}",
                            short_id(&context.id),
                            marker,
                            context.message_count,
                            context.preview
                        );
                    }
                    println!("\n  * = current context");
                }
                Err(error) => eprintln!("Failed to list contexts: {error}"),
            }
            CommandAction::Continue
        }
        "/switch" => {
            let matched = match find_context_by_prefix(&ctx.store, args) {
                Ok(id) => id,
                Err(message) => {
                    eprintln!("{message}");
                    return CommandAction::Continue;
                }
            };
            match ctx.store.load(&matched) {
                Ok(Some(state)) => {
                    let message_count = state.messages.len();
                    ctx.agent.set_messages(state.messages);
                    ctx.agent.set_context_id(matched.clone());
                    *ctx.current_context_id = matched;
                    println!(
                        "Switched to context {} ({} messages)",
                        short_id(ctx.current_context_id),
                        message_count
                    );
                }
                Ok(None) => eprintln!("Failed to load context."),
                Err(error) => eprintln!("Failed to load context: {error}"),
            }
            CommandAction::Continue
        }
        "/delete" => {
            let matched = match find_context_by_prefix(&ctx.store, args) {
                Ok(id) => id,
                Err(message) => {
                    eprintln!("{message}");
                    return CommandAction::Continue;
                }
            };
            if &matched == ctx.current_context_id {
                eprintln!("Cannot delete current context. Use /clear first.");
                return CommandAction::Continue;
            }
            match ctx.store.delete(&matched) {
                Ok(true) => println!("Deleted context {}", short_id(&matched)),
                Ok(false) | Err(_) => eprintln!("Failed to delete context."),
            }
            CommandAction::Continue
        }
        "/compact" => {
            compact::run(ctx, args).await;
            CommandAction::Continue
        }
        "/plan" => {
            let workflow = PlanningWorkflow::new(
                ctx.store.clone(),
                ctx.subagents.clone(),
                ctx.tools.clone(),
                ctx.backend.clone(),
                ctx.permissions.clone(),
                ctx.prompter.clone(),
                ctx.interviewer.clone(),
                ctx.working_dir.clone(),
            );
            if let Err(error) = workflow
                .run(args, ctx.current_context_id, ctx.interrupt.clone())
                .await
            {
                eprintln!("{error}");
            }
            CommandAction::Continue
        }
        "/stats" => {
            let stats = ctx.agent.stats();
            println!("\nSession statistics:");
            println!("  input tokens    : {}", stats.total_input);
            println!("  output tokens   : {}", stats.total_output);
            println!("  cached tokens   : {}", stats.total_cached);
            println!("  prompt time     : {:.1} ms", stats.total_prompt_ms);
            println!("  predict time    : {:.1} ms", stats.total_predicted_ms);
            if stats.n_ctx > 0 {
                println!(
                    "  context usage   : {} / {} tokens ({}%)",
                    stats.current_context_tokens,
                    stats.n_ctx,
                    stats.current_context_tokens * 100 / stats.n_ctx
                );
            }
            CommandAction::Continue
        }
        "/tools" => {
            println!("\nAvailable tools:");
            for tool in ctx.tools.definitions() {
                println!("  {:<14} {}", tool.name, tool.signature);
            }
            CommandAction::Continue
        }
        "/skills" => {
            if ctx.skills_paths.is_empty() {
                println!("\nNo skills configured.");
            } else {
                println!("\nSkill search paths:");
                for path in &ctx.skills_paths {
                    println!("  {}", path.display());
                }
            }
            CommandAction::Continue
        }
        "/subagents" => {
            let agents = ctx.agents.agents();
            if agents.is_empty() {
                println!("\nNo subagents available.");
            } else {
                println!("\nAvailable subagents:");
                for agent in agents {
                    println!("  {:<18} {}", agent.name, agent.description);
                }
            }
            CommandAction::Continue
        }
        // Unrecognized slash input goes to the model unchanged.
        _ => CommandAction::Prompt(input.to_string()),
    }
}

/// Resolve a context-id prefix to exactly one saved context.
pub fn find_context_by_prefix(store: &ContextStore, prefix: &str) -> Result<String, String> {
    if prefix.is_empty() {
        return Err("A context id prefix is required.".to_string());
    }
    let contexts = store
        .list()
        .map_err(|error| format!("Failed to list contexts: {error}"))?;
    let matches: Vec<&str> = contexts
        .iter()
        .filter(|context| context.id.starts_with(prefix))
        .map(|context| context.id.as_str())
        .collect();

    match matches.as_slice() {
        [] => Err(format!("No context matches prefix '{prefix}'.")),
        [only] => Ok((*only).to_string()),
        many => Err(format!(
            "Prefix '{prefix}' is ambiguous ({} matches).",
            many.len()
        )),
    }
}

fn short_id(id: &str) -> &str {
    &id[..id.len().min(8)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_match_requires_exactly_one_hit() {
        let tmp = tempfile::tempdir().expect("tempdir should be created");
        let store = ContextStore::new(tmp.path()).expect("store should initialize");
        let first = store.create().expect("context should be created");
        let second = store.create().expect("context should be created");

        assert_eq!(
            find_context_by_prefix(&store, &first[..8]).expect("unique prefix should match"),
            first
        );
        assert!(find_context_by_prefix(&store, "zzzz").is_err());
        assert!(find_context_by_prefix(&store, "").is_err());

        // A prefix shared by both ids is ambiguous. UUIDs always share the
        // empty prefix; find a real common one only if it exists.
        let common: String = first
            .chars()
            .zip(second.chars())
            .take_while(|(a, b)| a == b)
            .map(|(a, _)| a)
            .collect();
        if !common.is_empty() {
            assert!(find_context_by_prefix(&store, &common).is_err());
        }
    }
}
