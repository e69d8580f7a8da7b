use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Verdict for one (tool, resource) pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermissionDecision {
    Allow,
    Deny,
    /// No cached answer; the caller must consult the user.
    Prompt,
}

/// Answer collected from the user when a decision requires a prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptAnswer {
    Yes,
    No,
    /// Allow and stop asking for this tool for the rest of the session.
    Always,
}

/// User-facing side of permission prompting. The CLI implements this with a
/// terminal y/n/a prompt; tests queue canned answers.
#[async_trait]
pub trait PermissionPrompt: Send + Sync {
    async fn ask(&self, tool: &str, resource: &str) -> PromptAnswer;
}

/// Prompt used when no interactive surface exists; declines everything.
#[derive(Debug, Default)]
pub struct DenyingPrompt;

#[async_trait]
impl PermissionPrompt for DenyingPrompt {
    async fn ask(&self, _tool: &str, _resource: &str) -> PromptAnswer {
        PromptAnswer::No
    }
}

/// FIFO of scripted answers, falling back to `No` when drained.
#[derive(Default)]
pub struct QueuePrompt {
    answers: Mutex<std::collections::VecDeque<PromptAnswer>>,
}

impl QueuePrompt {
    pub fn with_answers<I: IntoIterator<Item = PromptAnswer>>(answers: I) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
        }
    }
}

#[async_trait]
impl PermissionPrompt for QueuePrompt {
    async fn ask(&self, _tool: &str, _resource: &str) -> PromptAnswer {
        self.answers
            .lock()
            .expect("queue prompt mutex should lock")
            .pop_front()
            .unwrap_or(PromptAnswer::No)
    }
}

/// Session-scoped permission cache, shared by reference between a loop and
/// every subagent spawned under it so decisions apply transitively.
#[derive(Debug, Default)]
pub struct PermissionManager {
    yolo_mode: bool,
    decisions: HashMap<(String, String), bool>,
    always_tools: HashSet<String>,
}

pub type PermissionHandle = Arc<Mutex<PermissionManager>>;

impl PermissionManager {
    pub fn new(yolo_mode: bool) -> Self {
        Self {
            yolo_mode,
            ..Self::default()
        }
    }

    pub fn handle(yolo_mode: bool) -> PermissionHandle {
        Arc::new(Mutex::new(Self::new(yolo_mode)))
    }

    pub fn decide(&self, tool: &str, resource: &str) -> PermissionDecision {
        if self.yolo_mode || self.always_tools.contains(tool) {
            return PermissionDecision::Allow;
        }
        match self
            .decisions
            .get(&(tool.to_string(), resource.to_string()))
        {
            Some(true) => PermissionDecision::Allow,
            Some(false) => PermissionDecision::Deny,
            None => PermissionDecision::Prompt,
        }
    }

    /// Write a prompt answer back so identical (tool, resource) pairs never
    /// re-prompt within the session.
    pub fn record(&mut self, tool: &str, resource: &str, answer: PromptAnswer) {
        let key = (tool.to_string(), resource.to_string());
        match answer {
            PromptAnswer::Yes => {
                self.decisions.insert(key, true);
            }
            PromptAnswer::No => {
                self.decisions.insert(key, false);
            }
            PromptAnswer::Always => {
                self.always_tools.insert(tool.to_string());
                self.decisions.insert(key, true);
            }
        }
    }
}
