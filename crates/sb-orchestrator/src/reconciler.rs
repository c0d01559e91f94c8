//! Brings GitHub into agreement with a requested task status.
//!
//! A transition touches three places, always in this order: the board's
//! status field, the issue's open/closed state, and the issue's status-marker
//! labels. Each step is awaited on its own and its outcome recorded; a failed
//! step never aborts the others. The task's in-memory status moves only once
//! every step has converged.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use sb_core::config::{BoardConfig, Config, DependencyPolicy, LabelConfig, ReconcilerConfig};
use sb_core::types::{IssueRef, PendingSync, ProjectRef, Task, TaskStatus};
use sb_github::github::client::GitHubError;
use sb_github::ops::GitHubOps;
use sb_github::types::{IssueState, ProjectField};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::readiness::unsatisfied_dependencies;

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TransitionRequest {
    MarkReady,
    Start,
    SubmitForReview,
    Complete {
        /// Appended to the completion comment on the issue.
        #[serde(default)]
        summary: Option<String>,
    },
    Block,
    Reset,
}

impl TransitionRequest {
    pub fn target(&self) -> TaskStatus {
        match self {
            TransitionRequest::MarkReady => TaskStatus::Ready,
            TransitionRequest::Start => TaskStatus::InProgress,
            TransitionRequest::SubmitForReview => TaskStatus::Review,
            TransitionRequest::Complete { .. } => TaskStatus::Done,
            TransitionRequest::Block => TaskStatus::Blocked,
            TransitionRequest::Reset => TaskStatus::Backlog,
        }
    }

    fn summary(&self) -> Option<&str> {
        match self {
            TransitionRequest::Complete { summary } => summary.as_deref(),
            _ => None,
        }
    }
}

impl From<TaskStatus> for TransitionRequest {
    fn from(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Backlog => TransitionRequest::Reset,
            TaskStatus::Ready => TransitionRequest::MarkReady,
            TaskStatus::InProgress => TransitionRequest::Start,
            TaskStatus::Review => TransitionRequest::SubmitForReview,
            TaskStatus::Done => TransitionRequest::Complete { summary: None },
            TaskStatus::Blocked => TransitionRequest::Block,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepFailureKind {
    /// The GitHub call itself failed.
    ExternalCall,
    /// GitHub answered, but not with what the configuration expects
    /// (missing field or option).
    DataInconsistency,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub kind: StepFailureKind,
    pub message: String,
}

impl StepFailure {
    fn external(err: &GitHubError) -> Self {
        Self {
            kind: StepFailureKind::ExternalCall,
            message: err.to_string(),
        }
    }

    fn inconsistent(message: impl Into<String>) -> Self {
        Self {
            kind: StepFailureKind::DataInconsistency,
            message: message.into(),
        }
    }
}

/// How one reconciliation sub-step ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Applied,
    AlreadySatisfied,
    Skipped { reason: String },
    Failed(StepFailure),
}

impl StepOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }

    pub fn failure(&self) -> Option<&StepFailure> {
        match self {
            StepOutcome::Failed(f) => Some(f),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub task_id: Uuid,
    pub requested: TaskStatus,
    /// Status actually reconciled to; differs from `requested` when the
    /// dependency gate substituted `Blocked`.
    pub applied: TaskStatus,
    /// In-memory status before the call.
    pub previous: TaskStatus,
    pub unsatisfied_dependencies: Vec<Uuid>,
    pub board: StepOutcome,
    pub issue: StepOutcome,
    pub labels: StepOutcome,
    /// Number of writes sent to GitHub.
    pub mutations: usize,
}

impl ReconciliationResult {
    pub fn succeeded(&self) -> bool {
        !(self.board.is_failed() || self.issue.is_failed() || self.labels.is_failed())
    }

    pub fn is_noop(&self) -> bool {
        self.succeeded() && self.mutations == 0
    }

    pub fn was_substituted(&self) -> bool {
        self.requested != self.applied
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("task {task_id} cannot be reconciled: no {missing}")]
    Precondition { task_id: Uuid, missing: &'static str },

    #[error("epic {0} not found")]
    EpicNotFound(Uuid),

    #[error("task {task_id} not found in epic {epic_id}")]
    TaskNotFound { epic_id: Uuid, task_id: Uuid },
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

pub struct Reconciler {
    ops: Arc<dyn GitHubOps>,
    board: BoardConfig,
    labels: LabelConfig,
    settings: ReconcilerConfig,
    /// (project id, field name) -> field with options. Never evicted.
    field_cache: DashMap<(String, String), ProjectField>,
}

impl Reconciler {
    pub fn new(ops: Arc<dyn GitHubOps>, config: &Config) -> Self {
        Self {
            ops,
            board: config.board.clone(),
            labels: config.labels.clone(),
            settings: config.reconciler.clone(),
            field_cache: DashMap::new(),
        }
    }

    /// Status the request resolves to once the dependency gate is applied.
    pub fn effective_target(&self, requested: TaskStatus, unsatisfied: &[Uuid]) -> TaskStatus {
        if unsatisfied.is_empty() {
            return requested;
        }
        let gated = match self.settings.dependency_policy {
            DependencyPolicy::GateReady => requested == TaskStatus::Ready,
            DependencyPolicy::GateAll => {
                !matches!(requested, TaskStatus::Done | TaskStatus::Blocked)
            }
        };
        if gated {
            TaskStatus::Blocked
        } else {
            requested
        }
    }

    /// Reconcile `task` towards `request`.
    ///
    /// `statuses` holds the current status of every task in the epic and is
    /// used for the dependency gate. `project` is the epic's board, if any.
    /// Only a task without an issue is an error; everything GitHub does wrong
    /// is reported in the returned outcomes.
    pub async fn request_transition(
        &self,
        task: &mut Task,
        project: Option<&ProjectRef>,
        request: TransitionRequest,
        statuses: &HashMap<Uuid, TaskStatus>,
    ) -> Result<ReconciliationResult, ReconcileError> {
        let Some(issue) = task.issue.clone() else {
            return Err(ReconcileError::Precondition {
                task_id: task.id,
                missing: "issue",
            });
        };

        let requested = request.target();
        let unsatisfied = unsatisfied_dependencies(task, statuses);
        let applied = self.effective_target(requested, &unsatisfied);
        if applied != requested {
            info!(
                task_id = %task.id,
                requested = %requested,
                blocked_on = unsatisfied.len(),
                "dependencies not done, reconciling to Blocked"
            );
        }

        let mut result = ReconciliationResult {
            task_id: task.id,
            requested,
            applied,
            previous: task.status,
            unsatisfied_dependencies: unsatisfied,
            board: StepOutcome::AlreadySatisfied,
            issue: StepOutcome::AlreadySatisfied,
            labels: StepOutcome::AlreadySatisfied,
            mutations: 0,
        };

        if task.status == applied && task.pending.is_none() {
            debug!(task_id = %task.id, status = %applied, "already reconciled");
            return Ok(result);
        }

        // Resume an interrupted reconciliation to the same target; anything
        // else starts from scratch.
        let mut progress = match task.pending {
            Some(p) if p.target == applied => p,
            _ => PendingSync::new(applied),
        };
        let mut mutations = 0;

        if !progress.board {
            result.board = self.sync_board(task, project, applied, &mut mutations).await;
            progress.board = !result.board.is_failed();
        }
        if !progress.issue {
            result.issue = self
                .sync_issue(&issue, applied, request.summary(), &mut progress, &mut mutations)
                .await;
            progress.issue = !result.issue.is_failed();
        }
        if !progress.labels {
            result.labels = self.sync_labels(&issue, applied, &mut mutations).await;
            progress.labels = !result.labels.is_failed();
        }
        result.mutations = mutations;

        for (step, outcome) in [
            ("board", &result.board),
            ("issue", &result.issue),
            ("labels", &result.labels),
        ] {
            if let Some(failure) = outcome.failure() {
                warn!(
                    task_id = %task.id,
                    step,
                    kind = ?failure.kind,
                    error = %failure.message,
                    "reconciliation step failed"
                );
            }
        }

        if result.succeeded() {
            task.status = applied;
            task.pending = None;
            task.updated_at = Utc::now();
            info!(
                task_id = %task.id,
                from = %result.previous,
                to = %applied,
                mutations,
                "task reconciled"
            );
        } else {
            task.pending = Some(progress);
        }
        Ok(result)
    }

    async fn sync_board(
        &self,
        task: &Task,
        project: Option<&ProjectRef>,
        target: TaskStatus,
        mutations: &mut usize,
    ) -> StepOutcome {
        let (Some(project), Some(item)) = (project, task.project_item.as_ref()) else {
            return StepOutcome::Skipped {
                reason: "task is not on a project board".to_string(),
            };
        };

        let field = match self.status_field(project).await {
            Ok(field) => field,
            Err(failure) => return StepOutcome::Failed(failure),
        };
        let option_name = self.board.status_options.option_for(target);
        let Some(option) = field.option_named(option_name) else {
            return StepOutcome::Failed(StepFailure::inconsistent(format!(
                "field `{}` has no option `{option_name}`",
                field.name
            )));
        };

        match self
            .ops
            .set_project_item_field(project, item, &field.id, &option.id)
            .await
        {
            Ok(()) => {
                *mutations += 1;
                StepOutcome::Applied
            }
            Err(e) => StepOutcome::Failed(StepFailure::external(&e)),
        }
    }

    async fn status_field(&self, project: &ProjectRef) -> Result<ProjectField, StepFailure> {
        let key = (project.id.clone(), self.board.status_field.clone());
        let cached = self.field_cache.get(&key).map(|f| f.value().clone());
        if let Some(field) = cached {
            return Ok(field);
        }

        match self
            .ops
            .get_project_field(project, &self.board.status_field)
            .await
        {
            Ok(field) => {
                debug!(project = %project.id, field = %field.name, "cached status field");
                self.field_cache.insert(key, field.clone());
                Ok(field)
            }
            Err(GitHubError::NotFound(what)) => Err(StepFailure::inconsistent(format!(
                "{what} not found on project {}",
                project.id
            ))),
            Err(e) => Err(StepFailure::external(&e)),
        }
    }

    /// Close (with the completion comment) or reopen the issue.
    ///
    /// Closing and commenting are two writes. The comment is only owed once
    /// our close lands, and `progress.comment_owed` carries that debt across
    /// a failed attempt so a retry posts it exactly once.
    async fn sync_issue(
        &self,
        issue: &IssueRef,
        target: TaskStatus,
        summary: Option<&str>,
        progress: &mut PendingSync,
        mutations: &mut usize,
    ) -> StepOutcome {
        let current = match self.ops.get_issue_state(issue).await {
            Ok(state) => state,
            Err(e) => return StepOutcome::Failed(StepFailure::external(&e)),
        };
        let desired = if target == TaskStatus::Done {
            IssueState::Closed
        } else {
            IssueState::Open
        };

        let mut changed = false;
        if current != desired {
            if let Err(e) = self.ops.set_issue_state(issue, desired).await {
                return StepOutcome::Failed(StepFailure::external(&e));
            }
            *mutations += 1;
            changed = true;
            progress.comment_owed = desired == IssueState::Closed;
        }

        if progress.comment_owed {
            let body = self.completion_comment(summary);
            if let Err(e) = self.ops.add_comment(issue, &body).await {
                return StepOutcome::Failed(StepFailure::external(&e));
            }
            *mutations += 1;
            changed = true;
            progress.comment_owed = false;
        }

        if changed {
            StepOutcome::Applied
        } else {
            StepOutcome::AlreadySatisfied
        }
    }

    fn completion_comment(&self, summary: Option<&str>) -> String {
        match summary.map(str::trim).filter(|s| !s.is_empty()) {
            Some(summary) => format!("{}\n\n{summary}", self.settings.completion_comment),
            None => self.settings.completion_comment.clone(),
        }
    }

    async fn sync_labels(
        &self,
        issue: &IssueRef,
        target: TaskStatus,
        mutations: &mut usize,
    ) -> StepOutcome {
        let current = match self.ops.list_labels(issue).await {
            Ok(labels) => labels,
            Err(e) => return StepOutcome::Failed(StepFailure::external(&e)),
        };
        let wanted = self.labels.status_label(target);
        let mut changed = false;

        // GitHub label names compare case-insensitively.
        for stale in current.iter().filter(|l| {
            !l.eq_ignore_ascii_case(&wanted) && self.labels.status_from_label(l).is_some()
        }) {
            if let Err(e) = self.ops.remove_label(issue, stale).await {
                return StepOutcome::Failed(StepFailure::external(&e));
            }
            *mutations += 1;
            changed = true;
        }

        if !current.iter().any(|l| l.eq_ignore_ascii_case(&wanted)) {
            if let Err(e) = self.ops.add_label(issue, &wanted).await {
                return StepOutcome::Failed(StepFailure::external(&e));
            }
            *mutations += 1;
            changed = true;
        }

        if changed {
            StepOutcome::Applied
        } else {
            StepOutcome::AlreadySatisfied
        }
    }
}
