use super::format::{self, PlanData};
use super::questions::{
    QaSession, extract_plan_content, extract_questions, format_answers_for_prompt,
};
use super::state::{PlanningState, PlanningStateMachine};
use crate::config::{AgentConfig, DEFAULT_TOOL_TIMEOUT_MS};
use crate::errors::{AgentError, SessionError, SpawnError};
use crate::permissions::{PermissionHandle, PermissionPrompt};
use crate::session::{AgentLoop, AgentStopReason};
use crate::subagents::{AgentDefinition, SubagentManager, SubagentRequest};
use crate::tools::ToolRegistry;
use async_trait::async_trait;
use llama_agent_llm::CompletionBackend;
use llama_agent_store::ContextStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// How the interactive Q&A surface ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QaOutcome {
    Completed,
    Aborted,
    Interrupted,
}

/// The interactive surface of the planning workflow. The CLI implements
/// this with a raw-mode terminal UI; tests script it with queues.
#[async_trait]
pub trait PlanInterviewer: Send + Sync {
    /// Drive the Q&A session to completion, mutating answers in place.
    async fn run_qa(&self, session: &mut QaSession, interrupt: &Arc<AtomicBool>) -> QaOutcome;

    /// Ask a yes/no question (resume offer, plan approval).
    async fn confirm(&self, prompt: &str) -> bool;

    /// Progress note for the user; hosts without a display ignore it.
    async fn inform(&self, _message: &str) {}
}

enum QaScript {
    Answers(Vec<String>),
    Interrupt,
}

/// Scripted interviewer: pops one script entry per `run_qa` call and a FIFO
/// of confirmations. Drained queues abort / decline.
#[derive(Default)]
pub struct QueueInterviewer {
    qa_scripts: std::sync::Mutex<std::collections::VecDeque<QaScript>>,
    confirmations: std::sync::Mutex<std::collections::VecDeque<bool>>,
}

impl QueueInterviewer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_qa_answers<I: IntoIterator<Item = String>>(&self, answers: I) {
        self.qa_scripts
            .lock()
            .expect("qa scripts mutex should lock")
            .push_back(QaScript::Answers(answers.into_iter().collect()));
    }

    /// The next `run_qa` call reports an interruption without answering.
    pub fn push_qa_interrupt(&self) {
        self.qa_scripts
            .lock()
            .expect("qa scripts mutex should lock")
            .push_back(QaScript::Interrupt);
    }

    pub fn push_confirmation(&self, value: bool) {
        self.confirmations
            .lock()
            .expect("confirmations mutex should lock")
            .push_back(value);
    }
}

#[async_trait]
impl PlanInterviewer for QueueInterviewer {
    async fn run_qa(&self, session: &mut QaSession, _interrupt: &Arc<AtomicBool>) -> QaOutcome {
        let script = self
            .qa_scripts
            .lock()
            .expect("qa scripts mutex should lock")
            .pop_front();
        let answers = match script {
            Some(QaScript::Answers(answers)) => answers,
            Some(QaScript::Interrupt) => return QaOutcome::Interrupted,
            None => return QaOutcome::Aborted,
        };
        for (question, answer) in session.questions.iter_mut().zip(answers) {
            let selected_option_index = question
                .options
                .iter()
                .position(|option| option == &answer);
            question.is_custom = selected_option_index.is_none();
            question.selected_option_index =
                selected_option_index.map(|index| index as i64).unwrap_or(-1);
            question.selected_answer = answer;
        }
        QaOutcome::Completed
    }

    async fn confirm(&self, _prompt: &str) -> bool {
        self.confirmations
            .lock()
            .expect("confirmations mutex should lock")
            .pop_front()
            .unwrap_or(false)
    }
}

enum QuestionLoopOutcome {
    /// All questions resolved; continue to approval.
    ReadyForApproval,
    /// The workflow stopped early (abort or interrupt) in this state.
    Stopped(PlanningState),
}

/// Orchestrates `/plan`: explorer spawn, persistent planning agent,
/// interactive Q&A refinement, and final approval, with every step
/// checkpointed through the planning state machine.
pub struct PlanningWorkflow {
    store: Arc<ContextStore>,
    subagents: Arc<SubagentManager>,
    tools: Arc<ToolRegistry>,
    backend: Arc<dyn CompletionBackend>,
    permissions: PermissionHandle,
    prompter: Arc<dyn PermissionPrompt>,
    interviewer: Arc<dyn PlanInterviewer>,
    working_dir: PathBuf,
}

impl PlanningWorkflow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<ContextStore>,
        subagents: Arc<SubagentManager>,
        tools: Arc<ToolRegistry>,
        backend: Arc<dyn CompletionBackend>,
        permissions: PermissionHandle,
        prompter: Arc<dyn PermissionPrompt>,
        interviewer: Arc<dyn PlanInterviewer>,
        working_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            subagents,
            tools,
            backend,
            permissions,
            prompter,
            interviewer,
            working_dir,
        }
    }

    /// Entry point for `/plan <task>`. Offers to resume a saved active
    /// session; otherwise requires a non-empty task. Returns the state the
    /// session ended in.
    pub async fn run(
        &self,
        task: &str,
        context_id: &str,
        interrupt: Arc<AtomicBool>,
    ) -> Result<PlanningState, AgentError> {
        let mut psm = PlanningStateMachine::new(self.store.clone());

        if PlanningStateMachine::has_saved_session(&self.store, context_id)
            && psm.load(context_id)?
            && psm.is_active()
        {
            self.interviewer
                .inform(&format!(
                    "Found existing planning session (state: {}).",
                    psm.current_state()
                ))
                .await;
            if self.interviewer.confirm("Resume existing session?").await {
                return self.resume(&mut psm, interrupt).await;
            }
            self.interviewer
                .inform("Starting fresh planning session...")
                .await;
            psm.abort()?;
        }

        if task.trim().is_empty() {
            return Err(SessionError::InvalidConfiguration(
                "usage: /plan <task description>".to_string(),
            )
            .into());
        }

        psm.start(task, context_id)?;
        self.run_workflow(&mut psm, interrupt).await
    }

    async fn run_workflow(
        &self,
        psm: &mut PlanningStateMachine,
        interrupt: Arc<AtomicBool>,
    ) -> Result<PlanningState, AgentError> {
        let (explorer, planning_agent) = match (
            self.agent_definition("explorer-agent"),
            self.agent_definition("planning-agent"),
        ) {
            (Ok(explorer), Ok(planning_agent)) => (explorer, planning_agent),
            (Err(error), _) | (_, Err(error)) => {
                psm.abort()?;
                return Err(error);
            }
        };

        self.interviewer
            .inform(&format!(
                "Starting planning workflow for: {}",
                psm.session().task
            ))
            .await;

        // Step 1: one-shot exploration.
        self.interviewer
            .inform("[Step 1/5: Exploring codebase...]")
            .await;
        let explore_request = SubagentRequest {
            agent_name: "explorer-agent".to_string(),
            task: build_exploration_prompt(&psm.session().task),
            max_iterations: explorer.max_iterations,
            ..SubagentRequest::default()
        };
        let explore_result = self
            .subagents
            .spawn(explore_request, interrupt.clone())
            .await;
        if !explore_result.success {
            self.interviewer
                .inform(&format!("Exploration failed: {}", explore_result.error))
                .await;
            psm.abort()?;
            return Ok(PlanningState::Aborted);
        }
        psm.set_exploration_findings(explore_result.output.clone());

        // Step 2: persistent planning agent. Constructed directly rather
        // than via spawn so its transcript survives the whole Q&A loop.
        psm.transition_to(PlanningState::Synthesizing)?;
        self.interviewer
            .inform("[Step 2/5: Synthesizing plan...]")
            .await;
        self.backend.clear_slot().await;
        let mut planning_loop = self.make_planning_loop(&planning_agent, interrupt.clone())?;

        let first_prompt =
            build_planning_prompt(&psm.session().task, &explore_result.output);
        let plan_result = planning_loop.run(first_prompt).await;
        if plan_result.stop_reason != AgentStopReason::Completed {
            self.interviewer.inform("Planning failed.").await;
            psm.abort()?;
            self.backend.clear_slot().await;
            return Ok(PlanningState::Aborted);
        }

        psm.set_plan_content(extract_plan_content(&plan_result.final_response));
        let qa = extract_questions(&plan_result.final_response);

        match self
            .question_loop(psm, &mut planning_loop, qa, &interrupt)
            .await?
        {
            QuestionLoopOutcome::Stopped(state) => {
                self.backend.clear_slot().await;
                Ok(state)
            }
            QuestionLoopOutcome::ReadyForApproval => {
                self.backend.clear_slot().await;
                self.approval(psm).await
            }
        }
    }

    /// Steps 3 and 4: run the Q&A UI and continue the same planning agent
    /// with the answers until a reply carries no further questions.
    async fn question_loop(
        &self,
        psm: &mut PlanningStateMachine,
        planning_loop: &mut AgentLoop,
        mut qa: QaSession,
        interrupt: &Arc<AtomicBool>,
    ) -> Result<QuestionLoopOutcome, AgentError> {
        while !qa.questions.is_empty() {
            psm.transition_to(PlanningState::Questioning)?;
            psm.set_questions(qa.to_json());
            psm.save()?;

            self.interviewer
                .inform(&format!(
                    "[Step 3/5: Design decisions needed] {} question(s) to answer.",
                    qa.questions.len()
                ))
                .await;
            psm.transition_to(PlanningState::AwaitingAnswers)?;

            match self.interviewer.run_qa(&mut qa, interrupt).await {
                QaOutcome::Aborted => {
                    self.interviewer.inform("Planning aborted by user.").await;
                    psm.abort()?;
                    return Ok(QuestionLoopOutcome::Stopped(PlanningState::Aborted));
                }
                QaOutcome::Interrupted => {
                    self.interviewer
                        .inform("Planning interrupted. Session saved for later resume.")
                        .await;
                    psm.set_questions(qa.to_json());
                    psm.save()?;
                    return Ok(QuestionLoopOutcome::Stopped(PlanningState::AwaitingAnswers));
                }
                QaOutcome::Completed => {}
            }

            psm.set_answers(qa.to_json());
            psm.transition_to(PlanningState::Refining)?;
            psm.increment_iteration();
            self.interviewer
                .inform(&format!(
                    "[Step 4/5: Refining plan based on your decisions (iteration {})...]",
                    psm.current_iteration()
                ))
                .await;

            // The planning agent's context is already established; the
            // continuation carries only the decisions.
            let continuation = format!(
                "{}\n\nPlease refine the plan based on these decisions. If any critical design \
decisions remain unclear, generate follow-up questions.",
                format_answers_for_prompt(&qa)
            );
            let refine_result = planning_loop.run(continuation).await;
            if refine_result.stop_reason != AgentStopReason::Completed {
                self.interviewer
                    .inform("Refinement failed; keeping the current plan.")
                    .await;
                break;
            }

            psm.set_plan_content(extract_plan_content(&refine_result.final_response));
            qa = extract_questions(&refine_result.final_response);
        }

        Ok(QuestionLoopOutcome::ReadyForApproval)
    }

    /// Step 5: render a summary, prompt for approval, and write `plan.md`.
    async fn approval(
        &self,
        psm: &mut PlanningStateMachine,
    ) -> Result<PlanningState, AgentError> {
        if psm.current_state() != PlanningState::AwaitingApproval {
            psm.transition_to(PlanningState::AwaitingApproval)?;
        }
        self.interviewer
            .inform("[Step 5/5: Plan ready for approval]")
            .await;
        self.interviewer
            .inform(&plan_summary(&psm.session().plan_content))
            .await;

        if !self.interviewer.confirm("Approve this plan?").await {
            self.interviewer
                .inform("Plan not approved. Session saved for later.")
                .await;
            psm.save()?;
            return Ok(PlanningState::AwaitingApproval);
        }

        let answered = QaSession::from_json(&psm.session().answers);
        let data = PlanData {
            task_summary: psm.session().task.clone(),
            created_at: psm.session().created_at.clone(),
            version: psm.current_iteration() + 1,
            status: "approved".to_string(),
            executive_summary: String::new(),
            design_decisions: answered
                .questions
                .iter()
                .filter(|question| question.is_answered())
                .map(|question| (question.text.clone(), question.selected_answer.clone()))
                .collect(),
            plan_body: psm.session().plan_content.clone(),
        };
        let final_plan = format::generate(&data);

        let context_id = psm.session().context_id.clone();
        self.store.save_plan(&context_id, &final_plan)?;
        psm.session_mut().plan_path = psm.plan_path().display().to_string();
        psm.transition_to(PlanningState::Approved)?;

        self.interviewer
            .inform(&format!(
                "Plan approved and saved to: {}",
                psm.session().plan_path
            ))
            .await;
        Ok(PlanningState::Approved)
    }

    /// Pick the workflow back up from a persisted session. The in-memory
    /// planning agent did not survive, so refinement after resume seeds a
    /// fresh agent with the saved plan and the new answers.
    async fn resume(
        &self,
        psm: &mut PlanningStateMachine,
        interrupt: Arc<AtomicBool>,
    ) -> Result<PlanningState, AgentError> {
        self.interviewer
            .inform(&format!(
                "Resuming planning session from state: {}",
                psm.current_state()
            ))
            .await;

        match psm.current_state() {
            PlanningState::Exploring | PlanningState::Synthesizing => {
                self.run_workflow(psm, interrupt).await
            }
            PlanningState::Questioning | PlanningState::AwaitingAnswers => {
                if psm.current_state() == PlanningState::Questioning {
                    psm.transition_to(PlanningState::AwaitingAnswers)?;
                }
                let mut qa = QaSession::from_json(&psm.session().questions);
                if qa.questions.is_empty() {
                    // Nothing left to ask; walk the legal chain to approval.
                    psm.transition_to(PlanningState::Refining)?;
                    return self.approval(psm).await;
                }
                match self.interviewer.run_qa(&mut qa, &interrupt).await {
                    QaOutcome::Aborted => {
                        psm.abort()?;
                        return Ok(PlanningState::Aborted);
                    }
                    QaOutcome::Interrupted => {
                        psm.set_questions(qa.to_json());
                        psm.save()?;
                        return Ok(PlanningState::AwaitingAnswers);
                    }
                    QaOutcome::Completed => {}
                }
                psm.set_answers(qa.to_json());
                psm.transition_to(PlanningState::Refining)?;
                psm.increment_iteration();

                let planning_agent = self.agent_definition("planning-agent")?;
                self.backend.clear_slot().await;
                let mut planning_loop =
                    self.make_planning_loop(&planning_agent, interrupt.clone())?;
                let refine_prompt =
                    build_refinement_prompt(&psm.session().plan_content, &qa);
                let refine_result = planning_loop.run(refine_prompt).await;
                if refine_result.stop_reason == AgentStopReason::Completed {
                    psm.set_plan_content(extract_plan_content(&refine_result.final_response));
                    let follow_ups = extract_questions(&refine_result.final_response);
                    match self
                        .question_loop(psm, &mut planning_loop, follow_ups, &interrupt)
                        .await?
                    {
                        QuestionLoopOutcome::Stopped(state) => {
                            self.backend.clear_slot().await;
                            return Ok(state);
                        }
                        QuestionLoopOutcome::ReadyForApproval => {}
                    }
                }
                self.backend.clear_slot().await;
                self.approval(psm).await
            }
            PlanningState::Refining | PlanningState::AwaitingApproval => {
                self.approval(psm).await
            }
            PlanningState::Approved => {
                self.interviewer
                    .inform(&format!(
                        "Plan already approved. Path: {}",
                        psm.session().plan_path
                    ))
                    .await;
                Ok(PlanningState::Approved)
            }
            PlanningState::Aborted | PlanningState::Idle => {
                self.interviewer
                    .inform("Previous session was aborted. Starting fresh...")
                    .await;
                let task = psm.session().task.clone();
                let context_id = psm.session().context_id.clone();
                psm.start(&task, &context_id)?;
                self.run_workflow(psm, interrupt).await
            }
        }
    }

    fn agent_definition(&self, name: &str) -> Result<AgentDefinition, AgentError> {
        self.subagents
            .agents()
            .get(name)
            .cloned()
            .ok_or_else(|| SpawnError::UnknownAgent(name.to_string()).into())
    }

    fn make_planning_loop(
        &self,
        definition: &AgentDefinition,
        interrupt: Arc<AtomicBool>,
    ) -> Result<AgentLoop, AgentError> {
        let config = AgentConfig {
            working_dir: self.working_dir.clone(),
            max_iterations: definition.max_iterations,
            tool_timeout_ms: DEFAULT_TOOL_TIMEOUT_MS,
            allowed_tools: definition.allowed_tools.clone(),
            // The generated prompt already carries the agent's tool table.
            custom_system_prompt: self.subagents.generate_system_prompt(definition),
            skip_tool_table: true,
            context_base_path: self.store.base_path().to_path_buf(),
            ..AgentConfig::default()
        };
        let mut planning_loop = AgentLoop::with_permissions(
            self.backend.clone(),
            self.tools.clone(),
            config,
            interrupt,
            self.permissions.clone(),
            self.prompter.clone(),
        )?;
        planning_loop.set_subagent_manager(self.subagents.clone());
        Ok(planning_loop)
    }
}

fn build_exploration_prompt(task: &str) -> String {
    format!(
        "## User Task\n\n{task}\n\n## Your Mission\n\nExplore the codebase to understand what \
exists and how the user's task should integrate.\n\n## Deliverables\n\n1. **Relevant Files**: \
List files directly related to the task with brief descriptions\n2. **Architecture Overview**: \
How does this codebase organize code?\n3. **Integration Points**: Where should the new \
functionality hook in?\n4. **Existing Patterns**: What conventions/patterns are already in \
use?\n5. **Dependencies**: What systems/modules would this task touch?\n\nUse glob for \
structure, read for content. Be thorough - your findings will be used to create an \
implementation plan."
    )
}

fn build_planning_prompt(task: &str, exploration_findings: &str) -> String {
    format!(
        "## User Task\n\n{task}\n\n## Codebase Exploration Results\n\n{exploration_findings}\n\n\
## Your Mission\n\nCreate a comprehensive implementation plan based on the exploration findings \
above.\n\nYou do NOT need to explore the codebase - findings are provided above.\nFocus \
entirely on strategic planning and design decisions.\n\n## Required Output\n\n1. A markdown \
implementation plan with phases, files to modify, and steps\n2. **5-7 design decision \
questions** to align with user intent\n\nOutput questions in JSON format:\n```json\n{{\n  \
\"questions\": [\n    {{\n      \"id\": 1,\n      \"text\": \"Which approach do you prefer?\",\n      \
\"options\": [\"Option A\", \"Option B\", \"Option C\"]\n    }}\n  ]\n}}\n```\n\nRemember: Ask \
many thoughtful questions to ensure alignment with user intent."
    )
}

/// Refinement prompt for a freshly constructed agent (resume path), which
/// needs the current plan restated alongside the answers.
fn build_refinement_prompt(current_plan: &str, qa: &QaSession) -> String {
    format!(
        "Based on the user's design decisions, please refine the implementation plan.\n\n{}\n\
Current plan:\n{current_plan}\n\nPlease update the plan to reflect these decisions and \
output:\n1. The refined markdown plan\n2. Any follow-up questions (if needed) in JSON format\n\
If no more questions are needed, omit the questions JSON block.",
        format_answers_for_prompt(qa)
    )
}

/// First 50 lines of the plan for the approval screen.
fn plan_summary(plan_content: &str) -> String {
    let lines: Vec<&str> = plan_content.lines().collect();
    if lines.len() <= 50 {
        return plan_content.to_string();
    }
    let mut summary = lines[..50].join("\n");
    summary.push_str("\n\n... (truncated, full plan will be saved to file)");
    summary
}
