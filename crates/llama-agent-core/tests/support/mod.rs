#![allow(dead_code)]

use async_trait::async_trait;
use llama_agent_core::tools::{ToolDefinition, ToolRegistry, ToolResult};
use llama_agent_llm::{
    BackendError, ChatMessage, Completion, CompletionBackend, CompletionRequest,
    CompletionTimings, ToolCall, ToolCallFunction,
};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Scripted backend: pops one queued completion per request and records
/// every request it sees.
pub struct MockBackend {
    completions: Mutex<VecDeque<Result<Completion, BackendError>>>,
    pub requests: Mutex<Vec<CompletionRequest>>,
    pub clear_count: AtomicUsize,
    n_ctx: i64,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::with_context_window(8192)
    }

    pub fn with_context_window(n_ctx: i64) -> Self {
        Self {
            completions: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            clear_count: AtomicUsize::new(0),
            n_ctx,
        }
    }

    pub fn queue(&self, completion: Result<Completion, BackendError>) {
        self.completions
            .lock()
            .expect("completions mutex should lock")
            .push_back(completion);
    }

    pub fn queue_text(&self, text: &str) {
        self.queue(Ok(text_completion(text)));
    }

    pub fn queue_tool_calls(&self, calls: Vec<(&str, &str, Value)>) {
        self.queue(Ok(tool_call_completion(calls)));
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("requests mutex should lock").len()
    }
}

#[async_trait]
impl CompletionBackend for MockBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, BackendError> {
        self.requests
            .lock()
            .expect("requests mutex should lock")
            .push(request);
        self.completions
            .lock()
            .expect("completions mutex should lock")
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::Completion("no completion queued".to_string())))
    }

    async fn clear_slot(&self) {
        self.clear_count.fetch_add(1, Ordering::SeqCst);
    }

    fn context_window(&self) -> i64 {
        self.n_ctx
    }
}

pub fn timings() -> CompletionTimings {
    CompletionTimings {
        prompt_n: 100,
        predicted_n: 20,
        cached_n: 10,
        prompt_ms: 12.0,
        predicted_ms: 30.0,
    }
}

pub fn text_completion(text: &str) -> Completion {
    Completion {
        message: ChatMessage::assistant(text),
        timings: timings(),
    }
}

pub fn tool_call_completion(calls: Vec<(&str, &str, Value)>) -> Completion {
    let tool_calls = calls
        .into_iter()
        .map(|(id, name, args)| ToolCall {
            id: id.to_string(),
            function: ToolCallFunction {
                name: name.to_string(),
                arguments: args.to_string(),
            },
        })
        .collect();
    Completion {
        message: ChatMessage::assistant_with_calls("", tool_calls),
        timings: timings(),
    }
}

/// A no-op tool that records nothing; stands in for environment tools.
pub fn echo_tool(name: &str) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: format!("{name} tool for tests."),
        signature: format!("{name}(...)"),
        parameters: serde_json::json!({"type": "object", "properties": {}}),
        execute: Arc::new(|args, _ctx| {
            Box::pin(async move {
                match args.get("command").and_then(Value::as_str) {
                    Some(command) => match command.strip_prefix("echo ") {
                        Some(payload) => ToolResult::ok(format!("{payload}\n")),
                        None => ToolResult::ok(format!("{command} ran")),
                    },
                    None => ToolResult::ok("ok"),
                }
            })
        }),
    }
}

/// Tool registry with fake environment tools plus the built-ins.
pub fn test_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::with_builtin_tools();
    registry.register(echo_tool("bash"));
    registry.register(echo_tool("read"));
    registry.register(echo_tool("glob"));
    registry.register(echo_tool("write"));
    registry.register(echo_tool("edit"));
    registry
}
