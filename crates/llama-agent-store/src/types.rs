use llama_agent_llm::ChatMessage;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Persisted shape of `conversation.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextState {
    pub id: String,
    pub created_at: String,
    pub updated_at: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// One row of `/list` output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextSummary {
    pub id: String,
    pub updated_at: String,
    pub preview: String,
    pub message_count: usize,
}

/// Hybrid compaction record: the extraction fields are derived
/// programmatically from the transcript, the rest come from the
/// summarization model.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompactEntry {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub user_messages: Vec<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub commands_run: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub plan_ref: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_decisions: Value,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub current_state: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_tasks: Vec<String>,
}

/// Reference to one archived conversation generation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveRef {
    pub timestamp: String,
    pub filepath: PathBuf,
    pub compact_filepath: PathBuf,
    pub message_count: usize,
}
