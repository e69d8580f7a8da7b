use crate::errors::{AgentError, SessionError};
use llama_agent_store::{ContextStore, StoreResult, iso8601_now, read_json_opt, write_json_atomic};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display};
use std::path::PathBuf;
use std::sync::Arc;

pub const PLAN_STATE_FILE_NAME: &str = "plan_state.json";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanningState {
    #[default]
    Idle,
    Exploring,
    Synthesizing,
    Questioning,
    AwaitingAnswers,
    Refining,
    AwaitingApproval,
    Approved,
    Aborted,
}

impl PlanningState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Exploring => "exploring",
            Self::Synthesizing => "synthesizing",
            Self::Questioning => "questioning",
            Self::AwaitingAnswers => "awaiting_answers",
            Self::Refining => "refining",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Approved => "approved",
            Self::Aborted => "aborted",
        }
    }

    /// Only the listed transitions are legal; everything else is rejected.
    pub fn can_transition_to(&self, next: PlanningState) -> bool {
        use PlanningState::*;
        match self {
            Idle => matches!(next, Exploring),
            Exploring => matches!(next, Synthesizing | Aborted),
            Synthesizing => matches!(next, Questioning | AwaitingApproval | Aborted),
            Questioning => matches!(next, AwaitingAnswers | Aborted),
            AwaitingAnswers => matches!(next, Refining | Aborted),
            Refining => matches!(next, Questioning | AwaitingApproval | Aborted),
            AwaitingApproval => matches!(next, Approved | Refining | Aborted),
            Approved | Aborted => matches!(next, Idle),
        }
    }
}

impl Display for PlanningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted shape of `plan_state.json`, one per context.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanningSession {
    #[serde(default)]
    pub state: PlanningState,
    #[serde(default)]
    pub context_id: String,
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub exploration_findings: String,
    #[serde(default)]
    pub plan_content: String,
    #[serde(default)]
    pub questions: Value,
    #[serde(default)]
    pub answers: Value,
    #[serde(default)]
    pub iteration: u32,
    #[serde(default)]
    pub plan_path: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

/// State machine for the planning workflow. Every transition persists the
/// session atomically, so a crashed or interrupted run resumes from the last
/// completed step.
pub struct PlanningStateMachine {
    session: PlanningSession,
    store: Arc<ContextStore>,
}

impl PlanningStateMachine {
    pub fn new(store: Arc<ContextStore>) -> Self {
        Self {
            session: PlanningSession::default(),
            store,
        }
    }

    pub fn current_state(&self) -> PlanningState {
        self.session.state
    }

    pub fn current_iteration(&self) -> u32 {
        self.session.iteration
    }

    pub fn session(&self) -> &PlanningSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut PlanningSession {
        &mut self.session
    }

    pub fn is_active(&self) -> bool {
        !matches!(
            self.session.state,
            PlanningState::Idle | PlanningState::Approved | PlanningState::Aborted
        )
    }

    pub fn is_interactive(&self) -> bool {
        matches!(
            self.session.state,
            PlanningState::AwaitingAnswers | PlanningState::AwaitingApproval
        )
    }

    /// Begin a new session in EXPLORING. Fails when one is already active.
    pub fn start(&mut self, task: &str, context_id: &str) -> Result<(), AgentError> {
        if self.is_active() {
            return Err(SessionError::InvalidStateTransition {
                from: self.session.state.to_string(),
                to: PlanningState::Exploring.to_string(),
            }
            .into());
        }

        let now = iso8601_now();
        self.session = PlanningSession {
            state: PlanningState::Exploring,
            context_id: context_id.to_string(),
            task: task.to_string(),
            created_at: now.clone(),
            updated_at: now,
            plan_path: self.plan_path_for(context_id).display().to_string(),
            questions: Value::Null,
            answers: Value::Null,
            ..PlanningSession::default()
        };
        self.save()?;
        Ok(())
    }

    pub fn transition_to(&mut self, next: PlanningState) -> Result<(), AgentError> {
        if !self.session.state.can_transition_to(next) {
            return Err(SessionError::InvalidStateTransition {
                from: self.session.state.to_string(),
                to: next.to_string(),
            }
            .into());
        }
        self.session.state = next;
        self.session.updated_at = iso8601_now();
        self.save()?;
        Ok(())
    }

    /// Terminal escape hatch; legal from any state.
    pub fn abort(&mut self) -> Result<(), AgentError> {
        self.session.state = PlanningState::Aborted;
        self.session.updated_at = iso8601_now();
        self.save()?;
        Ok(())
    }

    pub fn set_exploration_findings(&mut self, findings: impl Into<String>) {
        self.session.exploration_findings = findings.into();
        self.session.updated_at = iso8601_now();
    }

    pub fn set_plan_content(&mut self, content: impl Into<String>) {
        self.session.plan_content = content.into();
        self.session.updated_at = iso8601_now();
    }

    pub fn set_questions(&mut self, questions: Value) {
        self.session.questions = questions;
        self.session.updated_at = iso8601_now();
    }

    pub fn set_answers(&mut self, answers: Value) {
        self.session.answers = answers;
        self.session.updated_at = iso8601_now();
    }

    pub fn increment_iteration(&mut self) {
        self.session.iteration += 1;
        self.session.updated_at = iso8601_now();
    }

    pub fn plan_path(&self) -> PathBuf {
        self.plan_path_for(&self.session.context_id)
    }

    fn plan_path_for(&self, context_id: &str) -> PathBuf {
        self.store
            .context_dir(context_id)
            .join(llama_agent_store::PLAN_FILE_NAME)
    }

    pub fn state_path(&self) -> PathBuf {
        self.store
            .context_dir(&self.session.context_id)
            .join(PLAN_STATE_FILE_NAME)
    }

    pub fn save(&self) -> StoreResult<()> {
        write_json_atomic(&self.state_path(), &self.session)
    }

    /// Load the saved session for `context_id`; returns false when none
    /// exists. A corrupt file surfaces as an error rather than silently
    /// restarting the workflow.
    pub fn load(&mut self, context_id: &str) -> StoreResult<bool> {
        self.session = PlanningSession {
            context_id: context_id.to_string(),
            ..PlanningSession::default()
        };
        let Some(mut saved) = read_json_opt::<PlanningSession>(&self.state_path())? else {
            return Ok(false);
        };
        saved.context_id = context_id.to_string();
        self.session = saved;
        Ok(true)
    }

    pub fn has_saved_session(store: &ContextStore, context_id: &str) -> bool {
        store
            .context_dir(context_id)
            .join(PLAN_STATE_FILE_NAME)
            .exists()
    }
}
