use crate::types::{ArchiveRef, CompactEntry, ContextState, ContextSummary};
use llama_agent_llm::{ChatMessage, Role};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

pub const CONVERSATION_FILE_NAME: &str = "conversation.json";
pub const PLAN_FILE_NAME: &str = "plan.md";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("context store io failed: {0}")]
    Io(String),
    #[error("context store parse failed: {0}")]
    Parse(String),
    #[error("unknown context: {0}")]
    UnknownContext(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Serialize `data` to `<path>.tmp`, then rename over the target so readers
/// never observe a truncated file. A failed rename removes the temp.
pub fn write_json_atomic<T: Serialize>(path: &Path, data: &T) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| StoreError::Io(format!("create {} failed: {err}", parent.display())))?;
    }

    let raw = serde_json::to_vec_pretty(data).map_err(|err| StoreError::Parse(err.to_string()))?;
    let tmp = temp_path(path);
    fs::write(&tmp, raw)
        .map_err(|err| StoreError::Io(format!("write {} failed: {err}", tmp.display())))?;
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(StoreError::Io(format!(
            "rename {} failed: {err}",
            path.display()
        )));
    }
    Ok(())
}

/// Read and parse a JSON file. A missing file is `Ok(None)`; a corrupt one
/// surfaces as a parse error.
pub fn read_json_opt<T: DeserializeOwned>(path: &Path) -> StoreResult<Option<T>> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(StoreError::Io(format!(
                "read {} failed: {err}",
                path.display()
            )));
        }
    };
    let parsed = serde_json::from_slice(&raw)
        .map_err(|err| StoreError::Parse(format!("{}: {err}", path.display())))?;
    Ok(Some(parsed))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    name.push_str(".tmp");
    path.with_file_name(name)
}

/// UTC ISO-8601 with millisecond precision, e.g. `2026-08-02T10:15:00.123Z`.
pub fn iso8601_now() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

/// Filename-safe UTC stamp used for archive and compact files.
pub fn archive_timestamp_now() -> String {
    chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

#[derive(Clone, Debug)]
pub struct ContextStore {
    base: PathBuf,
}

impl ContextStore {
    pub fn new<P: AsRef<Path>>(base: P) -> StoreResult<Self> {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(base.join("contexts")).map_err(|err| {
            StoreError::Io(format!("create store root {} failed: {err}", base.display()))
        })?;
        Ok(Self { base })
    }

    pub fn base_path(&self) -> &Path {
        &self.base
    }

    pub fn context_dir(&self, id: &str) -> PathBuf {
        self.base.join("contexts").join(id)
    }

    fn conversation_path(&self, id: &str) -> PathBuf {
        self.context_dir(id).join(CONVERSATION_FILE_NAME)
    }

    /// Create a fresh context with empty messages; returns its id.
    pub fn create(&self) -> StoreResult<String> {
        let id = Uuid::new_v4().to_string();
        let now = iso8601_now();
        let state = ContextState {
            id: id.clone(),
            created_at: now.clone(),
            updated_at: now,
            messages: Vec::new(),
            metadata: serde_json::Map::new(),
        };
        self.save(&state)?;
        Ok(id)
    }

    pub fn load(&self, id: &str) -> StoreResult<Option<ContextState>> {
        read_json_opt(&self.conversation_path(id))
    }

    pub fn save(&self, state: &ContextState) -> StoreResult<()> {
        write_json_atomic(&self.conversation_path(&state.id), state)
    }

    pub fn append_message(&self, id: &str, message: &ChatMessage) -> StoreResult<()> {
        let mut state = self
            .load(id)?
            .ok_or_else(|| StoreError::UnknownContext(id.to_string()))?;
        state.messages.push(message.clone());
        state.updated_at = iso8601_now();
        self.save(&state)
    }

    /// Replace the full message array in one write. Preferred over
    /// per-message appends after a turn completes, which would be quadratic
    /// in transcript length.
    pub fn save_messages(&self, id: &str, messages: &[ChatMessage]) -> StoreResult<()> {
        let mut state = self
            .load(id)?
            .ok_or_else(|| StoreError::UnknownContext(id.to_string()))?;
        state.messages = messages.to_vec();
        state.updated_at = iso8601_now();
        self.save(&state)
    }

    /// All saved contexts, most recently updated first.
    pub fn list(&self) -> StoreResult<Vec<ContextSummary>> {
        let contexts_dir = self.base.join("contexts");
        let entries = match fs::read_dir(&contexts_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(StoreError::Io(format!(
                    "read {} failed: {err}",
                    contexts_dir.display()
                )));
            }
        };

        let mut summaries = Vec::new();
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().to_string();
            let Some(state) = self.load(&id).unwrap_or(None) else {
                continue;
            };
            summaries.push(ContextSummary {
                id: state.id,
                updated_at: state.updated_at,
                preview: preview_of(&state.messages),
                message_count: state.messages.len(),
            });
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    pub fn delete(&self, id: &str) -> StoreResult<bool> {
        let dir = self.context_dir(id);
        if !dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&dir)
            .map_err(|err| StoreError::Io(format!("delete {} failed: {err}", dir.display())))?;
        Ok(true)
    }

    pub fn exists(&self, id: &str) -> bool {
        self.conversation_path(id).exists()
    }

    /// Archive the current messages, persist the compact entry, and replace
    /// the conversation with a single synthetic system message rendering the
    /// summary. Returns the archive timestamp.
    pub fn compact(&self, id: &str, entry: CompactEntry) -> StoreResult<String> {
        let mut state = self
            .load(id)?
            .ok_or_else(|| StoreError::UnknownContext(id.to_string()))?;
        let ts = archive_timestamp_now();
        let ctx_dir = self.context_dir(id);

        write_json_atomic(
            &ctx_dir.join(format!("conversation_{ts}.json")),
            &state.messages,
        )?;

        let mut entry = entry;
        entry.timestamp = ts.clone();
        write_json_atomic(&ctx_dir.join(format!("compact_{ts}.json")), &entry)?;

        let archives = state
            .metadata
            .entry("archives".to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(archives) = archives {
            archives.push(json!({
                "timestamp": ts,
                "message_count": state.messages.len(),
                "compact_ref": format!("compact_{ts}.json"),
            }));
        }

        let has_plan = !entry.plan_ref.is_empty() || ctx_dir.join(PLAN_FILE_NAME).exists();
        if has_plan {
            state
                .metadata
                .insert("plan_ref".to_string(), Value::String(PLAN_FILE_NAME.into()));
        }

        state.messages = vec![ChatMessage::system(render_compact_summary(&entry, has_plan))];
        state.updated_at = iso8601_now();
        self.save(&state)?;
        Ok(ts)
    }

    /// Archived conversation generations, oldest first.
    pub fn archives(&self, id: &str) -> StoreResult<Vec<ArchiveRef>> {
        let ctx_dir = self.context_dir(id);
        let entries = match fs::read_dir(&ctx_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(StoreError::Io(format!(
                    "read {} failed: {err}",
                    ctx_dir.display()
                )));
            }
        };

        let mut archives = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(ts) = name
                .strip_prefix("conversation_")
                .and_then(|rest| rest.strip_suffix(".json"))
            else {
                continue;
            };
            let message_count = read_json_opt::<Vec<ChatMessage>>(&entry.path())
                .unwrap_or(None)
                .map(|messages| messages.len())
                .unwrap_or(0);
            archives.push(ArchiveRef {
                timestamp: ts.to_string(),
                filepath: entry.path(),
                compact_filepath: ctx_dir.join(format!("compact_{ts}.json")),
                message_count,
            });
        }

        archives.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(archives)
    }

    /// Write `plan.md` and record the reference in context metadata.
    pub fn save_plan(&self, id: &str, content: &str) -> StoreResult<()> {
        let dir = self.context_dir(id);
        fs::create_dir_all(&dir)
            .map_err(|err| StoreError::Io(format!("create {} failed: {err}", dir.display())))?;

        let path = dir.join(PLAN_FILE_NAME);
        let tmp = temp_path(&path);
        fs::write(&tmp, content)
            .map_err(|err| StoreError::Io(format!("write {} failed: {err}", tmp.display())))?;
        if let Err(err) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::Io(format!(
                "rename {} failed: {err}",
                path.display()
            )));
        }

        if let Some(mut state) = self.load(id)? {
            state
                .metadata
                .insert("plan_ref".to_string(), Value::String(PLAN_FILE_NAME.into()));
            state.updated_at = iso8601_now();
            self.save(&state)?;
        }
        Ok(())
    }

    pub fn load_plan(&self, id: &str) -> StoreResult<Option<String>> {
        let path = self.context_dir(id).join(PLAN_FILE_NAME);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::Io(format!(
                "read {} failed: {err}",
                path.display()
            ))),
        }
    }

    pub fn has_plan(&self, id: &str) -> bool {
        self.context_dir(id).join(PLAN_FILE_NAME).exists()
    }
}

/// First line of the most recent user message, truncated for display.
fn preview_of(messages: &[ChatMessage]) -> String {
    for message in messages.iter().rev() {
        if message.role != Role::User {
            continue;
        }
        let first_line = message.content.lines().next().unwrap_or("");
        if first_line.chars().count() > 80 {
            let head: String = first_line.chars().take(77).collect();
            return format!("{head}...");
        }
        return first_line.to_string();
    }
    "(empty)".to_string()
}

fn render_compact_summary(entry: &CompactEntry, has_plan: bool) -> String {
    let mut body = format!("# Previous Context Summary\n\n{}\n", entry.summary);

    if !entry.current_state.is_empty() {
        body.push_str(&format!("\n## Current State\n{}\n", entry.current_state));
    }
    if !entry.pending_tasks.is_empty() {
        body.push_str("\n## Pending Tasks\n");
        for task in &entry.pending_tasks {
            body.push_str(&format!("- {task}\n"));
        }
    }
    if !entry.files_modified.is_empty() {
        body.push_str("\n## Files Modified\n");
        for file in &entry.files_modified {
            body.push_str(&format!("- {file}\n"));
        }
    }
    if has_plan {
        body.push_str("\n## Active Plan\nplan.md exists - use read_plan tool to review if needed\n");
    }

    body
}
