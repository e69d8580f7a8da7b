mod support;

use llama_agent_core::planning::{
    PlanningState, PlanningStateMachine, PlanningWorkflow, QueueInterviewer,
};
use llama_agent_core::subagents::{AgentRegistry, SubagentManager};
use llama_agent_core::{DenyingPrompt, PermissionManager};
use llama_agent_store::ContextStore;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use support::MockBackend;

struct Fixture {
    _tmp: tempfile::TempDir,
    backend: Arc<MockBackend>,
    store: Arc<ContextStore>,
    interviewer: Arc<QueueInterviewer>,
    workflow: PlanningWorkflow,
    context_id: String,
}

fn fixture() -> Fixture {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    let backend = Arc::new(MockBackend::new());
    let store = Arc::new(ContextStore::new(tmp.path().join("data")).expect("store should init"));
    let context_id = store.create().expect("context should be created");

    let mut agents = AgentRegistry::new();
    agents.register_embedded();
    agents.discover(&[]);

    let permissions = PermissionManager::handle(true);
    let prompter = Arc::new(DenyingPrompt);
    let tools = Arc::new(support::test_registry());
    let manager = Arc::new(SubagentManager::new(
        backend.clone() as Arc<dyn llama_agent_llm::CompletionBackend>,
        tools.clone(),
        Arc::new(agents),
        store.clone(),
        tmp.path().to_path_buf(),
        permissions.clone(),
        prompter.clone(),
    ));
    let interviewer = Arc::new(QueueInterviewer::new());
    let workflow = PlanningWorkflow::new(
        store.clone(),
        manager,
        tools,
        backend.clone() as Arc<dyn llama_agent_llm::CompletionBackend>,
        permissions,
        prompter,
        interviewer.clone(),
        tmp.path().to_path_buf(),
    );

    Fixture {
        _tmp: tmp,
        backend,
        store,
        interviewer,
        workflow,
        context_id,
    }
}

fn interrupt() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

const PLAN_WITH_QUESTIONS: &str = "## Plan\n\nPhase 1: do the thing.\n\n```json\n{\"questions\": [\n  {\"id\": 1, \"text\": \"Which storage?\", \"options\": [\"sqlite\", \"flat files\"]},\n  {\"id\": 2, \"text\": \"Which sync?\", \"options\": [\"push\", \"pull\"]}\n]}\n```";

const REFINED_PLAN: &str = "## Plan (refined)\n\nPhase 1: do the thing with flat files.";

#[tokio::test(flavor = "current_thread")]
async fn full_workflow_explores_questions_refines_and_approves() {
    let fx = fixture();
    fx.backend.queue_text("## Findings\nthe codebase");
    fx.backend.queue_text(PLAN_WITH_QUESTIONS);
    fx.backend.queue_text(REFINED_PLAN);

    fx.interviewer
        .push_qa_answers(["flat files".to_string(), "push".to_string()]);
    fx.interviewer.push_confirmation(true); // approve

    let state = fx
        .workflow
        .run("refactor foo", &fx.context_id, interrupt())
        .await
        .expect("workflow should run");
    assert_eq!(state, PlanningState::Approved);

    let plan = fx
        .store
        .load_plan(&fx.context_id)
        .expect("plan should load")
        .expect("plan.md should exist");
    assert!(plan.starts_with("# Implementation Plan: refactor foo"));
    assert!(plan.contains("- Status: approved"));
    assert!(plan.contains("- **Which storage?**: flat files"));
    assert!(plan.contains("## Plan (refined)"));

    let mut psm = PlanningStateMachine::new(fx.store.clone());
    assert!(psm.load(&fx.context_id).expect("state should load"));
    assert_eq!(psm.current_state(), PlanningState::Approved);
    assert_eq!(psm.current_iteration(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn plan_without_questions_goes_straight_to_approval() {
    let fx = fixture();
    fx.backend.queue_text("findings");
    fx.backend.queue_text("## Plan\n\nNo open decisions.");
    fx.interviewer.push_confirmation(true);

    let state = fx
        .workflow
        .run("simple task", &fx.context_id, interrupt())
        .await
        .expect("workflow should run");
    assert_eq!(state, PlanningState::Approved);
    assert!(fx.store.has_plan(&fx.context_id));
    // Exploration + synthesis only; no refinement round.
    assert_eq!(fx.backend.request_count(), 2);
}

#[tokio::test(flavor = "current_thread")]
async fn failed_exploration_aborts_the_session() {
    let fx = fixture();
    // No completions queued: the explorer's completion fails.
    let state = fx
        .workflow
        .run("task", &fx.context_id, interrupt())
        .await
        .expect("workflow should run");
    assert_eq!(state, PlanningState::Aborted);

    let mut psm = PlanningStateMachine::new(fx.store.clone());
    assert!(psm.load(&fx.context_id).expect("state should load"));
    assert_eq!(psm.current_state(), PlanningState::Aborted);
    assert!(!psm.is_active());
}

#[tokio::test(flavor = "current_thread")]
async fn declined_approval_keeps_the_session_awaiting() {
    let fx = fixture();
    fx.backend.queue_text("findings");
    fx.backend.queue_text("## Plan\n\nDone.");
    fx.interviewer.push_confirmation(false); // decline

    let state = fx
        .workflow
        .run("task", &fx.context_id, interrupt())
        .await
        .expect("workflow should run");
    assert_eq!(state, PlanningState::AwaitingApproval);
    assert!(!fx.store.has_plan(&fx.context_id));

    let mut psm = PlanningStateMachine::new(fx.store.clone());
    assert!(psm.load(&fx.context_id).expect("state should load"));
    assert!(psm.is_active());
    assert!(psm.is_interactive());
}

#[tokio::test(flavor = "current_thread")]
async fn interrupted_qa_persists_and_resumes_with_prior_questions() {
    let fx = fixture();
    fx.backend.queue_text("findings");
    fx.backend.queue_text(PLAN_WITH_QUESTIONS);
    fx.interviewer.push_qa_interrupt();

    let state = fx
        .workflow
        .run("refactor foo", &fx.context_id, interrupt())
        .await
        .expect("workflow should run");
    assert_eq!(state, PlanningState::AwaitingAnswers);

    // Saved session carries the questions for the resume.
    let mut psm = PlanningStateMachine::new(fx.store.clone());
    assert!(psm.load(&fx.context_id).expect("state should load"));
    assert_eq!(psm.current_state(), PlanningState::AwaitingAnswers);
    let saved_questions = &psm.session().questions["questions"];
    assert_eq!(saved_questions.as_array().expect("questions array").len(), 2);

    // Second invocation offers resume; answering proceeds to refinement
    // with a reconstructed planning agent, then approval.
    fx.interviewer.push_confirmation(true); // resume? yes
    fx.interviewer
        .push_qa_answers(["sqlite".to_string(), "pull".to_string()]);
    fx.interviewer.push_confirmation(true); // approve
    fx.backend.queue_text(REFINED_PLAN); // refinement completion

    let state = fx
        .workflow
        .run("", &fx.context_id, interrupt())
        .await
        .expect("resume should run");
    assert_eq!(state, PlanningState::Approved);

    let plan = fx
        .store
        .load_plan(&fx.context_id)
        .expect("plan should load")
        .expect("plan.md should exist");
    assert!(plan.contains("- **Which storage?**: sqlite"));
}

#[tokio::test(flavor = "current_thread")]
async fn declined_resume_aborts_the_old_session_and_requires_a_task() {
    let fx = fixture();
    fx.backend.queue_text("findings");
    fx.backend.queue_text(PLAN_WITH_QUESTIONS);
    fx.interviewer.push_qa_interrupt();
    fx.workflow
        .run("original task", &fx.context_id, interrupt())
        .await
        .expect("workflow should run");

    // Decline the resume offer with no new task: usage error.
    fx.interviewer.push_confirmation(false);
    let error = fx
        .workflow
        .run("", &fx.context_id, interrupt())
        .await
        .expect_err("empty task should be rejected");
    assert!(error.to_string().contains("/plan"));

    // Declining also aborted the stale session, so a fresh start works
    // without a resume prompt.
    fx.backend.queue_text("findings again");
    fx.backend.queue_text("## Plan\n\nfresh.");
    fx.interviewer.push_confirmation(true);
    let state = fx
        .workflow
        .run("new task", &fx.context_id, interrupt())
        .await
        .expect("fresh run should work");
    assert_eq!(state, PlanningState::Approved);
}

#[tokio::test(flavor = "current_thread")]
async fn follow_up_questions_loop_until_none_remain() {
    let fx = fixture();
    fx.backend.queue_text("findings");
    fx.backend.queue_text(PLAN_WITH_QUESTIONS);
    // First refinement emits one follow-up question, second emits none.
    fx.backend.queue_text(
        "## Plan v2\n\n```json\n{\"questions\": [{\"id\": 3, \"text\": \"Retries?\", \"options\": [\"yes\", \"no\"]}]}\n```",
    );
    fx.backend.queue_text("## Plan v3\n\nfinal");

    fx.interviewer
        .push_qa_answers(["sqlite".to_string(), "push".to_string()]);
    fx.interviewer.push_qa_answers(["no".to_string()]);
    fx.interviewer.push_confirmation(true);

    let state = fx
        .workflow
        .run("task", &fx.context_id, interrupt())
        .await
        .expect("workflow should run");
    assert_eq!(state, PlanningState::Approved);

    let mut psm = PlanningStateMachine::new(fx.store.clone());
    assert!(psm.load(&fx.context_id).expect("state should load"));
    assert_eq!(psm.current_iteration(), 2);
    assert!(psm.session().plan_content.contains("Plan v3"));
}
