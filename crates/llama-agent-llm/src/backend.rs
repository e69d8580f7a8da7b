use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Completion, CompletionRequest};

/// Failures reported by the inference backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("completion failed: {0}")]
    Completion(String),
    #[error("completion cancelled")]
    Cancelled,
}

/// Contract between the agent loop and the inference engine.
///
/// The engine runs its own inference thread; `complete` blocks the caller
/// until a full response is available or cancellation is observed. The
/// backend owns a single KV-cache slot shared by every loop in the process;
/// `clear_slot` drops that state so the next completion reprocesses its
/// transcript from scratch. The subagent manager calls it around each spawn
/// to keep parent and child token state isolated.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, BackendError>;

    async fn clear_slot(&self);

    /// Total context window in tokens, for usage warnings.
    fn context_window(&self) -> i64;
}
