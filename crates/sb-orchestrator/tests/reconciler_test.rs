use std::collections::HashMap;
use std::sync::Arc;

use sb_core::config::Config;
use sb_core::types::{ProjectRef, SparcPhase, Task, TaskStatus};
use sb_github::memory::{MemoryGitHub, Mutation, Operation};
use sb_github::ops::GitHubOps;
use sb_github::types::IssueState;
use sb_orchestrator::readiness::status_index;
use sb_orchestrator::reconciler::{
    ReconcileError, Reconciler, StepFailureKind, StepOutcome, TransitionRequest,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Fixture {
    gh: Arc<MemoryGitHub>,
    reconciler: Reconciler,
    project: ProjectRef,
}

async fn fixture_with(gh: MemoryGitHub) -> Fixture {
    let gh = Arc::new(gh);
    let project = gh.create_project("Epic").await.unwrap();
    let reconciler = Reconciler::new(gh.clone(), &Config::default());
    gh.clear_mutations();
    Fixture {
        gh,
        reconciler,
        project,
    }
}

async fn fixture() -> Fixture {
    fixture_with(MemoryGitHub::new()).await
}

/// A Backlog task with an issue labelled `status:backlog` and a board item.
async fn board_task(f: &Fixture, key: &str, phase: SparcPhase) -> Task {
    let issue = f
        .gh
        .create_issue(key, None, &["status:backlog".to_string()])
        .await
        .unwrap();
    let item = f.gh.add_project_item(&f.project, &issue).await.unwrap();
    f.gh.clear_mutations();

    let mut task = Task::new(key, key, phase).with_issue(issue);
    task.project_item = Some(item);
    task
}

fn board_option(f: &Fixture, task: &Task) -> Option<String> {
    let item = task.project_item.as_ref()?;
    f.gh.item_option(&f.project.id, &item.id, "Status")
}

fn labels(f: &Fixture, task: &Task) -> Vec<String> {
    let number = task.issue.as_ref().unwrap().number;
    f.gh.issue(number).unwrap().labels
}

fn alone(task: &Task) -> HashMap<uuid::Uuid, TaskStatus> {
    status_index(std::slice::from_ref(task))
}

// ---------------------------------------------------------------------------
// Dependency gate
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ready_with_unfinished_dependency_becomes_blocked() {
    let f = fixture().await;
    let a = board_task(&f, "a", SparcPhase::Specification)
        .await
        .with_status(TaskStatus::InProgress);
    let mut b = board_task(&f, "b", SparcPhase::Pseudocode)
        .await
        .with_dependencies([a.id]);
    let statuses = status_index(&[a.clone(), b.clone()]);

    let result = f
        .reconciler
        .request_transition(&mut b, Some(&f.project), TransitionRequest::MarkReady, &statuses)
        .await
        .unwrap();

    assert_eq!(result.requested, TaskStatus::Ready);
    assert_eq!(result.applied, TaskStatus::Blocked);
    assert!(result.was_substituted());
    assert_eq!(result.unsatisfied_dependencies, vec![a.id]);
    assert_eq!(b.status, TaskStatus::Blocked);
    assert_eq!(labels(&f, &b), vec!["status:blocked"]);
    assert_eq!(board_option(&f, &b).as_deref(), Some("Blocked"));
}

#[tokio::test]
async fn ready_with_done_dependency_is_applied() {
    let f = fixture().await;
    let a = board_task(&f, "a", SparcPhase::Specification)
        .await
        .with_status(TaskStatus::Done);
    let mut b = board_task(&f, "b", SparcPhase::Pseudocode)
        .await
        .with_dependencies([a.id]);
    let statuses = status_index(&[a.clone(), b.clone()]);

    let result = f
        .reconciler
        .request_transition(&mut b, Some(&f.project), TransitionRequest::MarkReady, &statuses)
        .await
        .unwrap();

    assert!(!result.was_substituted());
    assert!(result.unsatisfied_dependencies.is_empty());
    assert_eq!(b.status, TaskStatus::Ready);
}

// ---------------------------------------------------------------------------
// Idempotence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn repeating_a_request_makes_no_second_round_of_writes() {
    let f = fixture().await;
    let mut task = board_task(&f, "impl", SparcPhase::Refinement).await;
    let statuses = alone(&task);

    let first = f
        .reconciler
        .request_transition(&mut task, Some(&f.project), TransitionRequest::Start, &statuses)
        .await
        .unwrap();
    assert!(first.succeeded());
    assert_eq!(first.board, StepOutcome::Applied);
    assert_eq!(first.issue, StepOutcome::AlreadySatisfied);
    assert_eq!(first.labels, StepOutcome::Applied);
    assert_eq!(first.mutations, 3);
    assert_eq!(f.gh.mutation_count(), first.mutations);
    assert_eq!(labels(&f, &task), vec!["status:in-progress"]);

    let st = alone(&task);
    let second = f
        .reconciler
        .request_transition(&mut task, Some(&f.project), TransitionRequest::Start, &st)
        .await
        .unwrap();
    assert!(second.is_noop());
    assert_eq!(second.board, StepOutcome::AlreadySatisfied);
    assert_eq!(second.issue, StepOutcome::AlreadySatisfied);
    assert_eq!(second.labels, StepOutcome::AlreadySatisfied);
    assert_eq!(f.gh.mutation_count(), 3);
}

#[tokio::test]
async fn completing_twice_closes_once() {
    let f = fixture().await;
    let mut task = board_task(&f, "done", SparcPhase::Completion).await;
    let request = TransitionRequest::Complete {
        summary: Some("Merged in #42".into()),
    };

    let st = alone(&task);
    let first = f
        .reconciler
        .request_transition(&mut task, Some(&f.project), request.clone(), &st)
        .await
        .unwrap();
    assert!(first.succeeded());
    assert_eq!(task.status, TaskStatus::Done);

    let number = task.issue.as_ref().unwrap().number;
    let issue = f.gh.issue(number).unwrap();
    assert_eq!(issue.state, IssueState::Closed);
    assert_eq!(issue.comments, vec!["Task completed.\n\nMerged in #42"]);
    assert_eq!(issue.labels, vec!["status:done"]);
    let writes = f.gh.mutation_count();
    assert_eq!(writes, first.mutations);

    let st = alone(&task);
    let second = f
        .reconciler
        .request_transition(&mut task, Some(&f.project), request, &st)
        .await
        .unwrap();
    assert!(second.is_noop());
    assert_eq!(f.gh.mutation_count(), writes);
    assert_eq!(f.gh.issue(number).unwrap().comments.len(), 1);
}

#[tokio::test]
async fn leaving_done_reopens_the_issue() {
    let f = fixture().await;
    let mut task = board_task(&f, "redo", SparcPhase::Refinement).await;
    let st = alone(&task);
    f.reconciler
        .request_transition(
            &mut task,
            Some(&f.project),
            TransitionRequest::Complete { summary: None },
            &st,
        )
        .await
        .unwrap();

    let st = alone(&task);
    let result = f
        .reconciler
        .request_transition(&mut task, Some(&f.project), TransitionRequest::Reset, &st)
        .await
        .unwrap();

    assert_eq!(result.issue, StepOutcome::Applied);
    assert_eq!(task.status, TaskStatus::Backlog);
    let number = task.issue.as_ref().unwrap().number;
    assert_eq!(f.gh.issue(number).unwrap().state, IssueState::Open);
    assert_eq!(labels(&f, &task), vec!["status:backlog"]);
}

// ---------------------------------------------------------------------------
// Partial failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_step_keeps_status_and_retry_only_repeats_it() {
    let f = fixture().await;
    let mut task = board_task(&f, "impl", SparcPhase::Refinement).await;
    f.gh.fail(Operation::AddLabel);

    let st = alone(&task);
    let failed = f
        .reconciler
        .request_transition(&mut task, Some(&f.project), TransitionRequest::Start, &st)
        .await
        .unwrap();

    assert!(!failed.succeeded());
    assert_eq!(failed.board, StepOutcome::Applied);
    assert_eq!(failed.issue, StepOutcome::AlreadySatisfied);
    let failure = failed.labels.failure().expect("labels failed");
    assert_eq!(failure.kind, StepFailureKind::ExternalCall);
    assert_eq!(task.status, TaskStatus::Backlog);
    let pending = task.pending.expect("pending sync recorded");
    assert_eq!(pending.target, TaskStatus::InProgress);
    assert!(pending.board && pending.issue && !pending.labels);

    f.gh.heal(Operation::AddLabel);
    f.gh.clear_mutations();

    let st = alone(&task);
    let retried = f
        .reconciler
        .request_transition(&mut task, Some(&f.project), TransitionRequest::Start, &st)
        .await
        .unwrap();

    assert!(retried.succeeded());
    assert_eq!(retried.board, StepOutcome::AlreadySatisfied);
    assert_eq!(retried.labels, StepOutcome::Applied);
    // The stale marker was already removed on the first attempt.
    assert_eq!(
        f.gh.mutations(),
        vec![Mutation::AddLabel {
            number: task.issue.as_ref().unwrap().number,
            label: "status:in-progress".into(),
        }]
    );
    assert_eq!(task.status, TaskStatus::InProgress);
    assert!(task.pending.is_none());
}

#[tokio::test]
async fn failed_close_posts_the_completion_comment_once_on_retry() {
    let f = fixture().await;
    let mut task = board_task(&f, "ship", SparcPhase::Completion).await;
    let number = task.issue.as_ref().unwrap().number;
    f.gh.fail(Operation::SetIssueState);

    let st = alone(&task);
    let failed = f
        .reconciler
        .request_transition(
            &mut task,
            Some(&f.project),
            TransitionRequest::Complete { summary: None },
            &st,
        )
        .await
        .unwrap();
    assert_eq!(
        failed.issue.failure().map(|e| e.kind),
        Some(StepFailureKind::ExternalCall)
    );
    assert!(f.gh.issue(number).unwrap().comments.is_empty());

    f.gh.heal(Operation::SetIssueState);
    let st = alone(&task);
    let retried = f
        .reconciler
        .request_transition(
            &mut task,
            Some(&f.project),
            TransitionRequest::Complete { summary: None },
            &st,
        )
        .await
        .unwrap();

    assert!(retried.succeeded());
    let issue = f.gh.issue(number).unwrap();
    assert_eq!(issue.state, IssueState::Closed);
    assert_eq!(issue.comments, vec!["Task completed."]);
}

#[tokio::test]
async fn failed_comment_after_close_is_the_only_write_retried() {
    let f = fixture().await;
    let mut task = board_task(&f, "ship", SparcPhase::Completion).await;
    let number = task.issue.as_ref().unwrap().number;
    f.gh.fail(Operation::AddComment);

    let st = alone(&task);
    let failed = f
        .reconciler
        .request_transition(
            &mut task,
            Some(&f.project),
            TransitionRequest::Complete { summary: None },
            &st,
        )
        .await
        .unwrap();

    assert!(failed.issue.is_failed());
    assert_eq!(f.gh.issue(number).unwrap().state, IssueState::Closed);
    assert_eq!(f.gh.mutation_count(), failed.mutations);
    assert_eq!(task.status, TaskStatus::Backlog);
    let pending = task.pending.expect("pending sync recorded");
    assert!(pending.comment_owed && !pending.issue);

    f.gh.heal(Operation::AddComment);
    f.gh.clear_mutations();
    let st = alone(&task);
    let retried = f
        .reconciler
        .request_transition(
            &mut task,
            Some(&f.project),
            TransitionRequest::Complete { summary: None },
            &st,
        )
        .await
        .unwrap();

    assert!(retried.succeeded());
    assert_eq!(retried.issue, StepOutcome::Applied);
    assert_eq!(f.gh.mutations(), vec![Mutation::AddComment { number }]);
    assert_eq!(f.gh.issue(number).unwrap().comments, vec!["Task completed."]);
    assert_eq!(task.status, TaskStatus::Done);
}

#[tokio::test]
async fn label_removal_failing_midway_resumes_with_the_remaining_markers() {
    let f = fixture().await;
    let mut task = board_task(&f, "impl", SparcPhase::Refinement).await;
    let number = task.issue.as_ref().unwrap().number;
    f.gh.set_issue_externally(number, IssueState::Open, &["status:backlog", "status:review"]);
    f.gh.fail_after(Operation::RemoveLabel, 1);

    let st = alone(&task);
    let failed = f
        .reconciler
        .request_transition(&mut task, Some(&f.project), TransitionRequest::Start, &st)
        .await
        .unwrap();

    let failure = failed.labels.failure().expect("labels failed");
    assert_eq!(failure.kind, StepFailureKind::ExternalCall);
    assert_eq!(labels(&f, &task), vec!["status:review"]);
    assert_eq!(failed.mutations, 2);
    assert_eq!(task.status, TaskStatus::Backlog);
    let pending = task.pending.expect("pending sync recorded");
    assert!(pending.board && !pending.labels);

    f.gh.heal(Operation::RemoveLabel);
    f.gh.clear_mutations();
    let st = alone(&task);
    let retried = f
        .reconciler
        .request_transition(&mut task, Some(&f.project), TransitionRequest::Start, &st)
        .await
        .unwrap();

    assert!(retried.succeeded());
    assert_eq!(
        f.gh.mutations(),
        vec![
            Mutation::RemoveLabel {
                number,
                label: "status:review".into(),
            },
            Mutation::AddLabel {
                number,
                label: "status:in-progress".into(),
            },
        ]
    );
    assert_eq!(labels(&f, &task), vec!["status:in-progress"]);
}

#[tokio::test]
async fn pending_sync_for_another_target_starts_over() {
    let f = fixture().await;
    let mut task = board_task(&f, "impl", SparcPhase::Refinement).await;
    f.gh.fail(Operation::GetIssueState);

    let st = alone(&task);
    f.reconciler
        .request_transition(&mut task, Some(&f.project), TransitionRequest::Start, &st)
        .await
        .unwrap();
    assert_eq!(task.pending.map(|p| p.target), Some(TaskStatus::InProgress));

    f.gh.heal(Operation::GetIssueState);
    f.gh.clear_mutations();

    let st = alone(&task);
    let result = f
        .reconciler
        .request_transition(
            &mut task,
            Some(&f.project),
            TransitionRequest::SubmitForReview,
            &st,
        )
        .await
        .unwrap();

    assert!(result.succeeded());
    assert_eq!(result.board, StepOutcome::Applied);
    assert_eq!(board_option(&f, &task).as_deref(), Some("Review"));
    assert_eq!(labels(&f, &task), vec!["status:review"]);
}

#[tokio::test]
async fn missing_board_option_is_a_data_inconsistency() {
    let f = fixture_with(MemoryGitHub::with_status_options(&["Todo", "Done"])).await;
    let mut task = board_task(&f, "impl", SparcPhase::Refinement).await;

    let st = alone(&task);
    let result = f
        .reconciler
        .request_transition(&mut task, Some(&f.project), TransitionRequest::Start, &st)
        .await
        .unwrap();

    let failure = result.board.failure().expect("board failed");
    assert_eq!(failure.kind, StepFailureKind::DataInconsistency);
    assert!(failure.message.contains("In Progress"));
    // The other steps still ran.
    assert_eq!(result.labels, StepOutcome::Applied);
    assert_eq!(task.status, TaskStatus::Backlog);
    assert!(task.pending.is_some());
}

#[tokio::test]
async fn unreachable_status_field_is_an_external_call_failure() {
    let f = fixture().await;
    let mut task = board_task(&f, "impl", SparcPhase::Refinement).await;
    f.gh.fail(Operation::GetProjectField);

    let st = alone(&task);
    let failed = f
        .reconciler
        .request_transition(&mut task, Some(&f.project), TransitionRequest::Start, &st)
        .await
        .unwrap();

    let failure = failed.board.failure().expect("board failed");
    assert_eq!(failure.kind, StepFailureKind::ExternalCall);
    assert_eq!(failed.labels, StepOutcome::Applied);
    assert_eq!(board_option(&f, &task), None);
    assert_eq!(task.status, TaskStatus::Backlog);

    f.gh.heal(Operation::GetProjectField);
    let st = alone(&task);
    let retried = f
        .reconciler
        .request_transition(&mut task, Some(&f.project), TransitionRequest::Start, &st)
        .await
        .unwrap();

    assert_eq!(retried.board, StepOutcome::Applied);
    assert_eq!(retried.labels, StepOutcome::AlreadySatisfied);
    assert_eq!(board_option(&f, &task).as_deref(), Some("In Progress"));
    assert_eq!(task.status, TaskStatus::InProgress);
}

#[tokio::test]
async fn status_markers_match_regardless_of_case() {
    let f = fixture().await;
    let mut task = board_task(&f, "impl", SparcPhase::Refinement).await;
    let number = task.issue.as_ref().unwrap().number;
    f.gh.set_issue_externally(number, IssueState::Open, &["Status:Review", "bug"]);

    let st = alone(&task);
    let result = f
        .reconciler
        .request_transition(&mut task, Some(&f.project), TransitionRequest::Start, &st)
        .await
        .unwrap();

    assert!(result.succeeded());
    assert_eq!(labels(&f, &task), vec!["bug", "status:in-progress"]);

    f.gh.set_issue_externally(number, IssueState::Open, &["Status:In-Progress"]);
    f.gh.clear_mutations();
    task.status = TaskStatus::Backlog;
    let st = alone(&task);
    let again = f
        .reconciler
        .request_transition(&mut task, Some(&f.project), TransitionRequest::Start, &st)
        .await
        .unwrap();

    assert_eq!(again.labels, StepOutcome::AlreadySatisfied);
    assert_eq!(labels(&f, &task), vec!["Status:In-Progress"]);
}

#[tokio::test]
async fn status_field_is_looked_up_once_per_project() {
    let f = fixture().await;
    let mut task = board_task(&f, "impl", SparcPhase::Refinement).await;

    let st = alone(&task);
    f.reconciler
        .request_transition(&mut task, Some(&f.project), TransitionRequest::Start, &st)
        .await
        .unwrap();

    // Served from the cache from now on.
    f.gh.fail(Operation::GetProjectField);
    let st = alone(&task);
    let result = f
        .reconciler
        .request_transition(
            &mut task,
            Some(&f.project),
            TransitionRequest::SubmitForReview,
            &st,
        )
        .await
        .unwrap();

    assert_eq!(result.board, StepOutcome::Applied);
    assert_eq!(board_option(&f, &task).as_deref(), Some("Review"));
}

// ---------------------------------------------------------------------------
// Preconditions and skips
// ---------------------------------------------------------------------------

#[tokio::test]
async fn task_without_issue_is_rejected() {
    let f = fixture().await;
    let mut task = Task::new("orphan", "Orphan", SparcPhase::Specification);

    let st = alone(&task);
    let err = f
        .reconciler
        .request_transition(&mut task, Some(&f.project), TransitionRequest::Start, &st)
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Precondition { task_id, missing: "issue" } if task_id == task.id));
    assert_eq!(f.gh.mutation_count(), 0);
}

#[tokio::test]
async fn task_without_board_item_skips_the_board() {
    let f = fixture().await;
    let mut task = board_task(&f, "impl", SparcPhase::Refinement).await;
    task.project_item = None;

    let st = alone(&task);
    let result = f
        .reconciler
        .request_transition(&mut task, None, TransitionRequest::Start, &st)
        .await
        .unwrap();

    assert!(matches!(result.board, StepOutcome::Skipped { .. }));
    assert!(result.succeeded());
    assert_eq!(task.status, TaskStatus::InProgress);
}
