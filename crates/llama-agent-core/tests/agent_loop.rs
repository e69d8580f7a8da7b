mod support;

use llama_agent_core::{
    AgentConfig, AgentLoop, AgentStopReason, PermissionManager, PromptAnswer, QueuePrompt,
    ToolRegistry,
};
use llama_agent_llm::{BackendError, Role};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use support::MockBackend;

fn config(tmp: &tempfile::TempDir) -> AgentConfig {
    AgentConfig {
        working_dir: tmp.path().to_path_buf(),
        yolo_mode: true,
        ..AgentConfig::default()
    }
}

fn make_loop(backend: &Arc<MockBackend>, config: AgentConfig) -> AgentLoop {
    AgentLoop::new(
        backend.clone() as Arc<dyn llama_agent_llm::CompletionBackend>,
        Arc::new(support::test_registry()),
        config,
        Arc::new(AtomicBool::new(false)),
    )
    .expect("loop should construct")
}

#[tokio::test(flavor = "current_thread")]
async fn hello_without_tools_completes_in_one_iteration() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    let backend = Arc::new(MockBackend::new());
    backend.queue_text("hello");

    let mut agent = make_loop(&backend, config(&tmp));
    let result = agent.run("hi").await;

    assert_eq!(result.stop_reason, AgentStopReason::Completed);
    assert_eq!(result.final_response, "hello");
    assert_eq!(result.iterations, 1);

    let messages = agent.messages();
    assert_eq!(messages[0].role, Role::System);
    assert_eq!(messages[1].role, Role::User);
    assert_eq!(messages.last().expect("assistant message").content, "hello");
    assert_eq!(agent.stats().total_input, 100);
    assert_eq!(agent.stats().total_output, 20);
}

#[tokio::test(flavor = "current_thread")]
async fn single_tool_call_round_trips_through_the_tool() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    let backend = Arc::new(MockBackend::new());
    backend.queue_tool_calls(vec![("call_1", "bash", json!({"command": "echo x"}))]);
    backend.queue_text("done");

    let mut agent = make_loop(&backend, config(&tmp));
    let result = agent.run("run echo").await;

    assert_eq!(result.stop_reason, AgentStopReason::Completed);
    assert_eq!(result.final_response, "done");
    assert_eq!(result.iterations, 2);

    let tool_message = agent
        .messages()
        .iter()
        .find(|message| message.role == Role::Tool)
        .expect("tool result message appended");
    assert_eq!(tool_message.content, "x\n");
    assert_eq!(tool_message.tool_call_id.as_deref(), Some("call_1"));

    let (files, commands) =
        llama_agent_core::subagents::extract_modifications(agent.messages());
    assert!(files.is_empty());
    assert_eq!(commands, vec!["echo x"]);
}

#[tokio::test(flavor = "current_thread")]
async fn disallowed_tool_is_denied_but_the_turn_continues() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    let backend = Arc::new(MockBackend::new());
    backend.queue_tool_calls(vec![("call_1", "bash", json!({"command": "ls"}))]);
    backend.queue_text("understood");

    let mut agent = make_loop(
        &backend,
        AgentConfig {
            allowed_tools: vec!["read".to_string()],
            ..config(&tmp)
        },
    );
    let result = agent.run("try bash").await;

    assert_eq!(result.stop_reason, AgentStopReason::Completed);
    let tool_message = agent
        .messages()
        .iter()
        .find(|message| message.role == Role::Tool)
        .expect("denial message appended");
    assert_eq!(tool_message.content, "Permission denied");
}

#[tokio::test(flavor = "current_thread")]
async fn prompt_decline_denies_and_cached_answers_do_not_reprompt() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    let backend = Arc::new(MockBackend::new());
    backend.queue_tool_calls(vec![
        ("call_1", "bash", json!({"command": "rm -rf build"})),
        ("call_2", "bash", json!({"command": "rm -rf build"})),
    ]);
    backend.queue_text("done");

    let permissions = PermissionManager::handle(false);
    // One answer queued: the second identical call must hit the cache.
    let prompter = Arc::new(QueuePrompt::with_answers([PromptAnswer::No]));
    let mut agent = AgentLoop::with_permissions(
        backend.clone() as Arc<dyn llama_agent_llm::CompletionBackend>,
        Arc::new(support::test_registry()),
        AgentConfig {
            working_dir: tmp.path().to_path_buf(),
            ..AgentConfig::default()
        },
        Arc::new(AtomicBool::new(false)),
        permissions,
        prompter,
    )
    .expect("loop should construct");

    let result = agent.run("delete build").await;
    assert_eq!(result.stop_reason, AgentStopReason::Completed);

    let denials: Vec<_> = agent
        .messages()
        .iter()
        .filter(|message| message.role == Role::Tool)
        .collect();
    assert_eq!(denials.len(), 2);
    assert!(denials.iter().all(|message| message.content == "Permission denied"));
}

#[tokio::test(flavor = "current_thread")]
async fn max_iterations_one_still_executes_that_rounds_tool_calls() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    let backend = Arc::new(MockBackend::new());
    backend.queue_tool_calls(vec![("call_1", "bash", json!({"command": "echo x"}))]);

    let mut agent = make_loop(
        &backend,
        AgentConfig {
            max_iterations: 1,
            ..config(&tmp)
        },
    );
    let result = agent.run("loop forever").await;

    assert_eq!(result.stop_reason, AgentStopReason::MaxIterations);
    assert_eq!(result.iterations, 1);
    assert_eq!(backend.request_count(), 1);
    // The single round's tool call did execute.
    assert!(agent.messages().iter().any(|message| message.role == Role::Tool));
}

#[tokio::test(flavor = "current_thread")]
async fn interrupt_before_first_completion_cancels_with_zero_iterations() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    let backend = Arc::new(MockBackend::new());
    backend.queue_text("never used");

    let interrupt = Arc::new(AtomicBool::new(true));
    let mut agent = AgentLoop::new(
        backend.clone() as Arc<dyn llama_agent_llm::CompletionBackend>,
        Arc::new(support::test_registry()),
        config(&tmp),
        interrupt,
    )
    .expect("loop should construct");

    let result = agent.run("hi").await;
    assert_eq!(result.stop_reason, AgentStopReason::UserCancelled);
    assert_eq!(result.iterations, 0);
    assert_eq!(backend.request_count(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn cancelled_completion_appends_no_partial_assistant_message() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    let backend = Arc::new(MockBackend::new());
    backend.queue(Err(BackendError::Cancelled));

    let mut agent = make_loop(&backend, config(&tmp));
    let result = agent.run("hi").await;

    assert_eq!(result.stop_reason, AgentStopReason::UserCancelled);
    assert!(
        !agent
            .messages()
            .iter()
            .any(|message| message.role == Role::Assistant)
    );
}

#[tokio::test(flavor = "current_thread")]
async fn backend_failure_ends_the_turn_with_agent_error() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    let backend = Arc::new(MockBackend::new());
    // Queue nothing: the mock reports a completion failure.

    let mut agent = make_loop(&backend, config(&tmp));
    let result = agent.run("hi").await;
    assert_eq!(result.stop_reason, AgentStopReason::AgentError);
    // The user message is still in the transcript for persistence.
    assert!(agent.messages().iter().any(|message| message.role == Role::User));
}

#[tokio::test(flavor = "current_thread")]
async fn unknown_tool_and_bad_arguments_surface_as_tool_messages() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    let backend = Arc::new(MockBackend::new());
    backend.queue(Ok(support::tool_call_completion(vec![
        ("call_1", "no_such_tool", json!({})),
    ])));
    backend.queue_text("recovered");

    let mut agent = make_loop(&backend, config(&tmp));
    let result = agent.run("hi").await;
    assert_eq!(result.stop_reason, AgentStopReason::Completed);

    let tool_message = agent
        .messages()
        .iter()
        .find(|message| message.role == Role::Tool)
        .expect("error surfaced to the model");
    assert!(tool_message.content.contains("unknown tool: no_such_tool"));

    // Malformed JSON arguments are reported, not fatal.
    let backend = Arc::new(MockBackend::new());
    backend.queue(Ok(llama_agent_llm::Completion {
        message: llama_agent_llm::ChatMessage::assistant_with_calls(
            "",
            vec![llama_agent_llm::ToolCall {
                id: "call_2".to_string(),
                function: llama_agent_llm::ToolCallFunction {
                    name: "bash".to_string(),
                    arguments: "{not valid".to_string(),
                },
            }],
        ),
        timings: support::timings(),
    }));
    backend.queue_text("recovered");

    let mut agent = make_loop(&backend, config(&tmp));
    let result = agent.run("hi").await;
    assert_eq!(result.stop_reason, AgentStopReason::Completed);
    let tool_message = agent
        .messages()
        .iter()
        .find(|message| message.role == Role::Tool)
        .expect("parse error surfaced to the model");
    assert!(tool_message.content.contains("invalid tool arguments"));
}

#[tokio::test(flavor = "current_thread")]
async fn tool_calls_execute_sequentially_in_emitted_order() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    let backend = Arc::new(MockBackend::new());
    backend.queue_tool_calls(vec![
        ("call_a", "bash", json!({"command": "echo first"})),
        ("call_b", "no_such_tool", json!({})),
        ("call_c", "bash", json!({"command": "echo third"})),
    ]);
    backend.queue_text("done");

    let mut agent = make_loop(&backend, config(&tmp));
    let result = agent.run("go").await;
    assert_eq!(result.stop_reason, AgentStopReason::Completed);

    let tool_ids: Vec<&str> = agent
        .messages()
        .iter()
        .filter(|message| message.role == Role::Tool)
        .filter_map(|message| message.tool_call_id.as_deref())
        .collect();
    // The failed middle call did not abort the rest, and order is preserved.
    assert_eq!(tool_ids, vec!["call_a", "call_b", "call_c"]);
}

#[tokio::test(flavor = "current_thread")]
async fn every_tool_call_id_references_a_prior_assistant_call() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    let backend = Arc::new(MockBackend::new());
    backend.queue_tool_calls(vec![("call_1", "bash", json!({"command": "echo x"}))]);
    backend.queue_tool_calls(vec![("call_2", "read", json!({"path": "a.txt"}))]);
    backend.queue_text("done");

    let mut agent = make_loop(&backend, config(&tmp));
    agent.run("go").await;

    let mut seen_call_ids: Vec<String> = Vec::new();
    for message in agent.messages() {
        match message.role {
            Role::Assistant => {
                seen_call_ids.extend(message.tool_calls.iter().map(|call| call.id.clone()));
            }
            Role::Tool => {
                let id = message.tool_call_id.as_deref().expect("tool message has id");
                assert!(seen_call_ids.iter().any(|seen| seen == id));
            }
            _ => {}
        }
    }
}

#[tokio::test(flavor = "current_thread")]
async fn message_callback_fires_per_append_and_failures_are_swallowed() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    let backend = Arc::new(MockBackend::new());
    backend.queue_text("hello");

    let mut agent = make_loop(&backend, config(&tmp));
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen_in_callback = seen.clone();
    agent.set_message_callback(Arc::new(move |message| {
        seen_in_callback
            .lock()
            .expect("seen mutex should lock")
            .push(message.role);
        Err(llama_agent_store::StoreError::Io("disk full".to_string()))
    }));

    let result = agent.run("hi").await;
    assert_eq!(result.stop_reason, AgentStopReason::Completed);
    // User + assistant appends both fired despite the callback failing.
    assert_eq!(*seen.lock().expect("seen mutex should lock"), vec![Role::User, Role::Assistant]);
}

#[tokio::test(flavor = "current_thread")]
async fn clear_resets_to_a_fresh_system_only_transcript() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    let backend = Arc::new(MockBackend::new());
    backend.queue_text("hello");

    let mut agent = make_loop(&backend, config(&tmp));
    agent.run("hi").await;
    assert!(agent.messages().len() > 1);

    agent.clear();
    assert_eq!(agent.messages().len(), 1);
    assert_eq!(agent.messages()[0].role, Role::System);
}

#[tokio::test(flavor = "current_thread")]
async fn context_usage_warning_is_emitted_once() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    // Tiny window: the scripted 120-token turns cross 80% immediately.
    let backend = Arc::new(MockBackend::with_context_window(150));
    backend.queue_text("a");
    backend.queue_text("b");

    let mut agent = make_loop(&backend, config(&tmp));
    agent.run("one").await;
    let stats_after_first = *agent.stats();
    agent.run("two").await;

    assert!(stats_after_first.total_input > 0);
    assert!(agent.stats().total_input > stats_after_first.total_input);
    assert!(
        agent.stats().total_input + agent.stats().total_output
            >= agent.stats().current_context_tokens
    );
}

#[tokio::test(flavor = "current_thread")]
async fn empty_tool_registry_sends_no_tool_specs() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    let backend = Arc::new(MockBackend::new());
    backend.queue_text("summary");

    let mut agent = AgentLoop::new(
        backend.clone() as Arc<dyn llama_agent_llm::CompletionBackend>,
        Arc::new(ToolRegistry::new()),
        AgentConfig {
            skip_tool_table: true,
            ..config(&tmp)
        },
        Arc::new(AtomicBool::new(false)),
    )
    .expect("loop should construct");
    agent.run("summarize").await;

    let requests = backend.requests.lock().expect("requests mutex should lock");
    assert!(requests[0].tools.is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn interrupt_flag_reset_allows_reuse() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    let backend = Arc::new(MockBackend::new());
    backend.queue_text("hello");

    let interrupt = Arc::new(AtomicBool::new(true));
    let mut agent = AgentLoop::new(
        backend.clone() as Arc<dyn llama_agent_llm::CompletionBackend>,
        Arc::new(support::test_registry()),
        config(&tmp),
        interrupt.clone(),
    )
    .expect("loop should construct");

    assert_eq!(agent.run("hi").await.stop_reason, AgentStopReason::UserCancelled);

    interrupt.store(false, Ordering::SeqCst);
    assert_eq!(agent.run("hi").await.stop_reason, AgentStopReason::Completed);
}
