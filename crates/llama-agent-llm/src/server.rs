use crate::backend::{BackendError, CompletionBackend};
use crate::types::{
    ChatMessage, Completion, CompletionRequest, CompletionTimings, Role, ToolCall,
    ToolCallFunction,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Backend over a running llama-server instance, using its OpenAI-compatible
/// `/v1/chat/completions` endpoint. The server's single processing slot maps
/// onto the shared-slot semantics the agent loop expects; `clear_slot` erases
/// it so the next completion reprocesses its transcript.
pub struct LlamaServerBackend {
    base_url: String,
    http: reqwest::Client,
    interrupt: Arc<AtomicBool>,
    n_ctx: i64,
    model_name: String,
}

#[derive(Deserialize)]
struct PropsResponse {
    #[serde(default)]
    default_generation_settings: GenerationSettings,
    #[serde(default)]
    model_path: String,
}

#[derive(Deserialize, Default)]
struct GenerationSettings {
    #[serde(default)]
    n_ctx: i64,
}

impl LlamaServerBackend {
    /// Connect and read the server's properties. Failure here is a startup
    /// error for the host.
    pub async fn connect(
        base_url: impl Into<String>,
        interrupt: Arc<AtomicBool>,
    ) -> Result<Self, BackendError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::new();

        let props: PropsResponse = http
            .get(format!("{base_url}/props"))
            .send()
            .await
            .map_err(|err| BackendError::Completion(format!("server unreachable: {err}")))?
            .json()
            .await
            .map_err(|err| BackendError::Completion(format!("bad /props response: {err}")))?;

        Ok(Self {
            base_url,
            http,
            interrupt,
            n_ctx: props.default_generation_settings.n_ctx,
            model_name: props.model_path,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    fn request_body(&self, request: &CompletionRequest) -> Value {
        let mut body = json!({
            "messages": request.messages,
            "timings_per_token": false,
        });
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(
                request
                    .tools
                    .iter()
                    .map(|tool| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": tool.name,
                                "description": tool.description,
                                "parameters": tool.parameters,
                            }
                        })
                    })
                    .collect(),
            );
        }
        body
    }

    async fn wait_for_interrupt(interrupt: Arc<AtomicBool>) {
        loop {
            if interrupt.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

#[async_trait]
impl CompletionBackend for LlamaServerBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, BackendError> {
        let call = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&self.request_body(&request))
            .send();

        let response = tokio::select! {
            response = call => response
                .map_err(|err| BackendError::Completion(err.to_string()))?,
            _ = Self::wait_for_interrupt(self.interrupt.clone()) => {
                return Err(BackendError::Cancelled);
            }
        };

        let payload: Value = response
            .json()
            .await
            .map_err(|err| BackendError::Completion(format!("bad completion response: {err}")))?;
        if let Some(error) = payload.get("error") {
            return Err(BackendError::Completion(error.to_string()));
        }

        parse_completion(&payload)
    }

    async fn clear_slot(&self) {
        // Best effort: absent or older servers simply reprocess the prompt.
        let _ = self
            .http
            .post(format!("{}/slots/0?action=erase", self.base_url))
            .send()
            .await;
    }

    fn context_window(&self) -> i64 {
        self.n_ctx
    }
}

fn parse_completion(payload: &Value) -> Result<Completion, BackendError> {
    let message = payload
        .pointer("/choices/0/message")
        .ok_or_else(|| BackendError::Completion("completion carried no message".to_string()))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| {
                    Some(ToolCall {
                        id: call.get("id").and_then(Value::as_str)?.to_string(),
                        function: ToolCallFunction {
                            name: call
                                .pointer("/function/name")
                                .and_then(Value::as_str)?
                                .to_string(),
                            arguments: call
                                .pointer("/function/arguments")
                                .and_then(Value::as_str)
                                .unwrap_or("{}")
                                .to_string(),
                        },
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    // llama-server reports its own timing block alongside OpenAI usage.
    let timings = payload
        .get("timings")
        .map(|timings| CompletionTimings {
            prompt_n: timings.get("prompt_n").and_then(Value::as_i64).unwrap_or(0),
            predicted_n: timings
                .get("predicted_n")
                .and_then(Value::as_i64)
                .unwrap_or(0),
            cached_n: timings
                .get("prompt_n_cached")
                .and_then(Value::as_i64)
                .unwrap_or(0),
            prompt_ms: timings
                .get("prompt_ms")
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
            predicted_ms: timings
                .get("predicted_ms")
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
        })
        .unwrap_or_else(|| CompletionTimings {
            prompt_n: payload
                .pointer("/usage/prompt_tokens")
                .and_then(Value::as_i64)
                .unwrap_or(0),
            predicted_n: payload
                .pointer("/usage/completion_tokens")
                .and_then(Value::as_i64)
                .unwrap_or(0),
            ..CompletionTimings::default()
        });

    Ok(Completion {
        message: ChatMessage {
            role: Role::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
        },
        timings,
    })
}
