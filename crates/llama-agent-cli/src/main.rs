mod commands;
mod compact;
mod logging;
mod qa_ui;

use clap::Parser;
use commands::{CommandAction, CommandContext};
use llama_agent_core::planning::PlanInterviewer;
use llama_agent_core::subagents::{AgentRegistry, SubagentManager};
use llama_agent_core::{
    AgentConfig, AgentLoop, AgentStopReason, PermissionManager, PermissionPrompt, ToolRegistry,
    clamp_max_iterations,
};
use llama_agent_llm::{CompletionBackend, LlamaServerBackend};
use llama_agent_store::ContextStore;
use std::io::{IsTerminal, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

const LOGO: &str = r"
    ____                                                   __
   / / /___ _____ ___  ____ _      ____ _____ ____  ____  / /_
  / / / __ `/ __ `__ \/ __ `/_____/ __ `/ __ `/ _ \/ __ \/ __/
 / / / /_/ / / / / / / /_/ /_____/ /_/ / /_/ /  __/ / / / /_
/_/_/\__,_/_/ /_/ /_/\__,_/      \__,_/\__, /\___/_/ /_/\__/
                                      /____/
";

#[derive(Parser, Debug)]
#[command(name = "llama-agent")]
#[command(about = "Interactive tool-using agent over a llama-server backend")]
struct Cli {
    /// Skip all permission prompts (dangerous!)
    #[arg(long)]
    yolo: bool,

    /// Disable skill discovery
    #[arg(long = "no-skills")]
    no_skills: bool,

    /// Additional skill search paths (repeatable)
    #[arg(long = "skills-path")]
    skills_paths: Vec<PathBuf>,

    /// Max tool execution rounds per prompt, clamped to [1, 1000]
    #[arg(long = "max-iterations", alias = "mi", default_value_t = 50)]
    max_iterations: u32,

    /// Data directory for contexts and plans (default: <working-dir>/.llama-agent)
    #[arg(long = "data-dir", alias = "dd")]
    data_dir: Option<PathBuf>,

    /// Working directory for file operations; must exist
    #[arg(long = "working-dir", short = 'C')]
    working_dir: Option<PathBuf>,

    /// Initial prompt (single use)
    #[arg(long, short = 'p')]
    prompt: Option<String>,

    /// Exit after the first turn
    #[arg(long = "single-turn")]
    single_turn: bool,

    /// Base URL of the llama-server instance
    #[arg(long = "server-url", default_value = "http://127.0.0.1:8080")]
    server_url: String,
}

fn config_dir() -> Option<PathBuf> {
    #[cfg(windows)]
    {
        std::env::var_os("APPDATA").map(|appdata| PathBuf::from(appdata).join("llama-agent"))
    }
    #[cfg(not(windows))]
    {
        std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".llama-agent"))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(mut cli: Cli) -> Result<(), String> {
    // Working directory: CLI override must exist and be a directory.
    let working_dir = match &cli.working_dir {
        Some(requested) => std::fs::canonicalize(requested)
            .ok()
            .filter(|path| path.is_dir())
            .ok_or_else(|| {
                format!(
                    "--working-dir path does not exist or is not a directory: {}",
                    requested.display()
                )
            })?,
        None => std::env::current_dir().map_err(|err| format!("cannot resolve cwd: {err}"))?,
    };

    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| working_dir.join(".llama-agent"));

    let interrupt = Arc::new(AtomicBool::new(false));
    spawn_signal_handler(interrupt.clone());

    // Backend connect is the model-load step; failure is fatal at startup.
    print!("\nConnecting to llama-server... ");
    let _ = std::io::stdout().flush();
    let backend: Arc<dyn CompletionBackend> = Arc::new(
        LlamaServerBackend::connect(&cli.server_url, interrupt.clone())
            .await
            .map_err(|err| format!("\nFailed to reach the backend: {err}"))?,
    );
    println!("ok");

    let store = Arc::new(
        ContextStore::new(&data_dir).map_err(|err| format!("cannot open data dir: {err}"))?,
    );
    let current_context_id = store
        .create()
        .map_err(|err| format!("cannot create context: {err}"))?;

    let tools = Arc::new(ToolRegistry::with_builtin_tools());

    // Agent definitions: embedded always win; disk paths from highest to
    // lowest priority.
    let mut agent_registry = AgentRegistry::new();
    agent_registry.register_embedded();
    let mut agent_paths = vec![data_dir.join("agents")];
    let project_agents = working_dir.join(".llama-agent").join("agents");
    if !agent_paths.contains(&project_agents) {
        agent_paths.push(project_agents);
    }
    if let Some(config_dir) = config_dir() {
        agent_paths.push(config_dir.join("agents"));
    }
    let agent_count = agent_registry.discover(&agent_paths);
    let agents = Arc::new(agent_registry);

    let skills_paths: Vec<PathBuf> = if cli.no_skills {
        Vec::new()
    } else {
        let mut paths = vec![working_dir.join(".llama-agent").join("skills")];
        if let Some(config_dir) = config_dir() {
            paths.push(config_dir.join("skills"));
        }
        paths.extend(cli.skills_paths.clone());
        paths
    };

    let permissions = PermissionManager::handle(cli.yolo);
    let prompter: Arc<dyn PermissionPrompt> = Arc::new(qa_ui::TerminalPermissionPrompt);
    let interviewer: Arc<dyn PlanInterviewer> = Arc::new(qa_ui::TerminalInterviewer);

    let config = AgentConfig {
        working_dir: working_dir.clone(),
        max_iterations: clamp_max_iterations(cli.max_iterations),
        yolo_mode: cli.yolo,
        agents_prompt_section: agents.generate_prompt_section(),
        context_id: current_context_id.clone(),
        context_base_path: data_dir.clone(),
        ..AgentConfig::default()
    };
    let mut agent = AgentLoop::with_permissions(
        backend.clone(),
        tools.clone(),
        config,
        interrupt.clone(),
        permissions.clone(),
        prompter.clone(),
    )
    .map_err(|err| err.to_string())?;

    let subagents = Arc::new(SubagentManager::new(
        backend.clone(),
        tools.clone(),
        agents.clone(),
        store.clone(),
        working_dir.clone(),
        permissions.clone(),
        prompter.clone(),
    ));
    agent.set_subagent_manager(subagents.clone());

    println!("{LOGO}");
    println!("working dir: {}", working_dir.display());
    println!("data dir   : {}", data_dir.display());
    if cli.yolo {
        println!("mode       : YOLO (all permissions auto-approved)");
    }
    if agent_count > 0 {
        println!("subagents  : {agent_count}");
    }
    println!("context    : {}", &current_context_id[..8]);

    // Initial prompt: -p flag, or piped stdin (which implies single-turn).
    let mut initial_prompt = cli.prompt.take();
    if initial_prompt.is_none() && !std::io::stdin().is_terminal() {
        let mut piped = String::new();
        std::io::stdin()
            .read_to_string(&mut piped)
            .map_err(|err| format!("failed to read stdin: {err}"))?;
        let piped = piped.trim_end().to_string();
        if !piped.is_empty() {
            initial_prompt = Some(piped);
        }
        cli.single_turn = true;
    }

    if initial_prompt.is_none() || !cli.single_turn {
        print_command_help();
    }

    let mut current_context_id = current_context_id;
    loop {
        let buffer = match initial_prompt.take() {
            Some(prompt) => {
                println!("\n› {prompt}");
                prompt
            }
            None => {
                print!("\n› ");
                let _ = std::io::stdout().flush();
                match read_line().await {
                    Some(line) => line,
                    None => break,
                }
            }
        };

        if interrupt.load(Ordering::SeqCst) {
            interrupt.store(false, Ordering::SeqCst);
            break;
        }
        let buffer = buffer.trim().to_string();
        if buffer.is_empty() {
            continue;
        }

        let mut command_ctx = CommandContext {
            agent: &mut agent,
            store: store.clone(),
            tools: tools.clone(),
            agents: agents.clone(),
            subagents: subagents.clone(),
            backend: backend.clone(),
            permissions: permissions.clone(),
            prompter: prompter.clone(),
            interviewer: interviewer.clone(),
            current_context_id: &mut current_context_id,
            working_dir: working_dir.clone(),
            skills_paths: skills_paths.clone(),
            interrupt: interrupt.clone(),
        };
        let prompt = match commands::dispatch(&buffer, &mut command_ctx).await {
            CommandAction::Exit => break,
            CommandAction::Continue => continue,
            CommandAction::Prompt(prompt) => prompt,
        };

        println!();
        let result = agent.run(prompt).await;

        // Batch save after the turn; per-message IO would be quadratic.
        if let Err(error) = store.save_messages(&current_context_id, agent.messages()) {
            tracing::warn!(error = %error, "failed to persist conversation");
        }

        match result.stop_reason {
            AgentStopReason::Completed => {
                println!("\n{}", result.final_response);
                println!("\n[Completed in {} iteration(s)]", result.iterations);
            }
            AgentStopReason::MaxIterations => {
                eprintln!("\n[Stopped: max iterations reached ({})]", result.iterations);
            }
            AgentStopReason::UserCancelled => {
                println!("\n[Cancelled by user]");
                interrupt.store(false, Ordering::SeqCst);
            }
            AgentStopReason::AgentError => {
                eprintln!("\n[Error occurred]");
            }
        }

        if cli.single_turn {
            break;
        }
    }

    println!("\nExiting...");
    Ok(())
}

/// First Ctrl+C requests cooperative cancellation; a second one while the
/// first is still pending aborts the process with code 130.
fn spawn_signal_handler(interrupt: Arc<AtomicBool>) {
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            if interrupt.swap(true, Ordering::SeqCst) {
                let _ = std::io::stdout().flush();
                std::process::exit(130);
            }
        }
    });
}

async fn read_line() -> Option<String> {
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line),
            Err(_) => None,
        }
    })
    .await
    .ok()
    .flatten()
}

fn print_command_help() {
    println!("\ncommands:");
    println!("  /exit         exit the agent");
    println!("  /clear        clear and start new conversation");
    println!("  /list         list saved conversations");
    println!("  /switch <id>  switch to a saved conversation");
    println!("  /delete <id>  delete a saved conversation");
    println!("  /compact      compact current context with summary");
    println!("  /plan <task>  spawn planning-agent to create a plan");
    println!("  /stats        show token usage statistics");
    println!("  /tools        list available tools");
    println!("  /skills       list skill search paths");
    println!("  /subagents    list available subagents");
    println!("  Ctrl+C        abort generation (twice to quit)");
}
