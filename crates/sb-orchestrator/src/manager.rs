//! Epic lifecycle: creation on GitHub, transitions, readiness queries and
//! completion detection.
//!
//! Epics live in memory for the lifetime of the manager. GitHub stays the
//! authoritative store; [`EpicManager::refresh_from_remote`] pulls its view
//! back in.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use sb_core::config::Config;
use sb_core::types::{AgentAssignment, Epic, IssueRef, SparcPhase, Task, TaskStatus};
use sb_github::github::client::GitHubError;
use sb_github::ops::GitHubOps;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::completion::{self, artifact_path, CompletionReport, FileProbe, LocalFiles};
use crate::matcher::best_assignment;
use crate::observer::EpicObserver;
use crate::readiness::{self, ReadyFilter};
use crate::reconciler::{ReconcileError, ReconciliationResult, Reconciler, TransitionRequest};
use crate::sync::derive_status;

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// One task of an [`EpicDefinition`]. Dependencies refer to other tasks of
/// the same definition by `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub key: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub phase: SparcPhase,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub required_skills: Vec<String>,
}

impl TaskDefinition {
    pub fn new(key: impl Into<String>, title: impl Into<String>, phase: SparcPhase) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            description: None,
            phase,
            depends_on: Vec::new(),
            required_skills: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn depends_on<S: Into<String>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.depends_on = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_skills<S: Into<String>>(mut self, skills: impl IntoIterator<Item = S>) -> Self {
        self.required_skills = skills.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpicDefinition {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,
}

#[derive(Debug, Error)]
pub enum EpicError {
    #[error("epic title must not be empty")]
    MissingTitle,

    #[error("task key `{0}` is used more than once")]
    DuplicateTaskKey(String),

    #[error("task `{task}` depends on unknown task `{dependency}`")]
    UnknownDependency { task: String, dependency: String },

    #[error("github error: {0}")]
    GitHub(#[from] GitHubError),
}

// ---------------------------------------------------------------------------
// EpicManager
// ---------------------------------------------------------------------------

pub struct EpicManager {
    ops: Arc<dyn GitHubOps>,
    config: Config,
    reconciler: Reconciler,
    probe: Arc<dyn FileProbe>,
    observers: Vec<Arc<dyn EpicObserver>>,
    epics: RwLock<HashMap<Uuid, Epic>>,
}

impl EpicManager {
    pub fn new(ops: Arc<dyn GitHubOps>, config: Config) -> Self {
        Self {
            reconciler: Reconciler::new(Arc::clone(&ops), &config),
            ops,
            config,
            probe: Arc::new(LocalFiles),
            observers: Vec::new(),
            epics: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn EpicObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Replace the filesystem used by [`detect_completed`](Self::detect_completed).
    pub fn with_file_probe(mut self, probe: Arc<dyn FileProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Create an epic and mirror it onto GitHub.
    ///
    /// The tracking issue is required: if it cannot be created nothing is
    /// stored. The project board, task issues and board items are
    /// best-effort; a failure is logged and the reference left empty.
    pub async fn create_epic(&self, definition: EpicDefinition) -> Result<Epic, EpicError> {
        let mut epic = build_epic(&definition, &self.config)?;

        for cycle in readiness::find_dependency_cycles(&epic.tasks) {
            warn!(
                epic = %epic.title,
                tasks = cycle.len(),
                "dependency cycle; these tasks will never become ready"
            );
        }

        let labels = &self.config.labels;
        let tracking = self
            .ops
            .create_issue(
                &epic.title,
                epic.description.as_deref(),
                std::slice::from_ref(&labels.epic_label),
            )
            .await?;
        info!(epic_id = %epic.id, issue = tracking.number, "created tracking issue");

        if self.config.board.create_project {
            match self.ops.create_project(&epic.title).await {
                Ok(project) => epic.project = Some(project),
                Err(e) => warn!(epic_id = %epic.id, error = %e, "could not create project board"),
            }
        }

        for task in &mut epic.tasks {
            let body = task_body(task, &tracking);
            let task_labels = vec![
                labels.phase_label(task.phase),
                labels.status_label(TaskStatus::Backlog),
            ];
            match self.ops.create_issue(&task.title, Some(body.as_str()), &task_labels).await {
                Ok(issue) => task.issue = Some(issue),
                Err(e) => {
                    warn!(task = %task.key, error = %e, "could not create task issue");
                    continue;
                }
            }

            if let (Some(project), Some(issue)) = (epic.project.as_ref(), task.issue.as_ref()) {
                match self.ops.add_project_item(project, issue).await {
                    Ok(item) => task.project_item = Some(item),
                    Err(e) => warn!(task = %task.key, error = %e, "could not add task to board"),
                }
            }
        }

        let checklist = checklist(&epic.tasks);
        if !checklist.is_empty() {
            if let Err(e) = self.ops.add_comment(&tracking, &checklist).await {
                warn!(epic_id = %epic.id, error = %e, "could not post task checklist");
            }
        }
        epic.tracking_issue = Some(tracking);

        self.epics.write().await.insert(epic.id, epic.clone());
        info!(epic_id = %epic.id, tasks = epic.tasks.len(), "epic created");
        for observer in &self.observers {
            observer.epic_created(&epic);
            for task in &epic.tasks {
                observer.task_created(epic.id, task);
            }
        }
        Ok(epic)
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub async fn epic(&self, epic_id: Uuid) -> Option<Epic> {
        self.epics.read().await.get(&epic_id).cloned()
    }

    /// All epics, oldest first.
    pub async fn epics(&self) -> Vec<Epic> {
        let mut all: Vec<Epic> = self.epics.read().await.values().cloned().collect();
        all.sort_by_key(|e| e.created_at);
        all
    }

    async fn tasks_of(&self, epic_id: Uuid) -> Result<Vec<Task>, ReconcileError> {
        self.epics
            .read()
            .await
            .get(&epic_id)
            .map(|e| e.tasks.clone())
            .ok_or(ReconcileError::EpicNotFound(epic_id))
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Reconcile one task towards `request`.
    ///
    /// The epic lock is not held while GitHub is called. Two concurrent
    /// transitions of the same task race; the last one to finish wins.
    pub async fn request_transition(
        &self,
        epic_id: Uuid,
        task_id: Uuid,
        request: TransitionRequest,
    ) -> Result<ReconciliationResult, ReconcileError> {
        let (mut task, project, statuses) = {
            let epics = self.epics.read().await;
            let epic = epics
                .get(&epic_id)
                .ok_or(ReconcileError::EpicNotFound(epic_id))?;
            let task = epic
                .task(task_id)
                .cloned()
                .ok_or(ReconcileError::TaskNotFound { epic_id, task_id })?;
            (task, epic.project.clone(), readiness::status_index(&epic.tasks))
        };

        let result = self
            .reconciler
            .request_transition(&mut task, project.as_ref(), request, &statuses)
            .await?;

        {
            let mut epics = self.epics.write().await;
            if let Some(epic) = epics.get_mut(&epic_id) {
                if let Some(slot) = epic.task_mut(task_id) {
                    *slot = task;
                }
                debug!(epic_id = %epic_id, progress = epic.progress(), "epic progress");
            }
        }

        for observer in &self.observers {
            observer.transition_reconciled(epic_id, &result);
        }
        Ok(result)
    }

    /// Re-request `Ready` for every blocked task whose dependencies are done.
    pub async fn release_unblocked(
        &self,
        epic_id: Uuid,
    ) -> Result<Vec<ReconciliationResult>, ReconcileError> {
        let tasks = self.tasks_of(epic_id).await?;
        let ids: Vec<Uuid> = readiness::blocked_but_satisfied(&tasks)
            .iter()
            .map(|t| t.id)
            .collect();
        debug!(epic_id = %epic_id, candidates = ids.len(), "releasing unblocked tasks");

        let mut results = Vec::with_capacity(ids.len());
        for task_id in ids {
            if let Some(result) = self
                .transition_or_skip(epic_id, task_id, TransitionRequest::MarkReady)
                .await?
            {
                results.push(result);
            }
        }
        Ok(results)
    }

    /// Like [`request_transition`](Self::request_transition), but a task with
    /// no issue is logged and skipped instead of failing a batch.
    async fn transition_or_skip(
        &self,
        epic_id: Uuid,
        task_id: Uuid,
        request: TransitionRequest,
    ) -> Result<Option<ReconciliationResult>, ReconcileError> {
        match self.request_transition(epic_id, task_id, request).await {
            Ok(result) => Ok(Some(result)),
            Err(e @ ReconcileError::Precondition { .. }) => {
                warn!(task_id = %task_id, error = %e, "skipping task");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    // -----------------------------------------------------------------------
    // Readiness
    // -----------------------------------------------------------------------

    pub async fn compute_ready_tasks(
        &self,
        epic_id: Uuid,
        filter: &ReadyFilter,
    ) -> Result<Vec<Task>, ReconcileError> {
        let tasks = self.tasks_of(epic_id).await?;
        Ok(readiness::compute_ready_tasks(&tasks, filter)
            .into_iter()
            .cloned()
            .collect())
    }

    pub async fn compute_next_task(
        &self,
        epic_id: Uuid,
        agent_type: Option<&str>,
    ) -> Result<Option<Task>, ReconcileError> {
        let tasks = self.tasks_of(epic_id).await?;
        Ok(readiness::compute_next_task(&tasks, agent_type).cloned())
    }

    pub async fn dependency_cycles(&self, epic_id: Uuid) -> Result<Vec<Vec<Uuid>>, ReconcileError> {
        let tasks = self.tasks_of(epic_id).await?;
        Ok(readiness::find_dependency_cycles(&tasks))
    }

    // -----------------------------------------------------------------------
    // Agents
    // -----------------------------------------------------------------------

    /// Pick the best agent for a task from the configured catalog and store
    /// it on the task.
    pub async fn assign_agent(
        &self,
        epic_id: Uuid,
        task_id: Uuid,
    ) -> Result<Option<AgentAssignment>, ReconcileError> {
        let mut epics = self.epics.write().await;
        let task = epics
            .get_mut(&epic_id)
            .ok_or(ReconcileError::EpicNotFound(epic_id))?
            .task_mut(task_id)
            .ok_or(ReconcileError::TaskNotFound { epic_id, task_id })?;

        let assignment = best_assignment(&self.config.agents, &task.required_skills);
        if let Some(a) = &assignment {
            debug!(task_id = %task_id, agent = %a.agent_id, score = a.score, "agent assigned");
        }
        task.assigned_agent = assignment.clone();
        task.updated_at = Utc::now();
        Ok(assignment)
    }

    // -----------------------------------------------------------------------
    // Completion
    // -----------------------------------------------------------------------

    /// Check which tasks have produced their artifact under `root`.
    pub async fn detect_completed(
        &self,
        epic_id: Uuid,
        root: &Path,
    ) -> Result<CompletionReport, ReconcileError> {
        let tasks = self.tasks_of(epic_id).await?;
        let expectations = self.expectations(&tasks);
        Ok(completion::detect_completed(
            &tasks,
            &expectations,
            root,
            self.probe.as_ref(),
        ))
    }

    /// Complete every not-yet-done task whose artifact exists.
    pub async fn apply_completion(
        &self,
        epic_id: Uuid,
        root: &Path,
    ) -> Result<Vec<ReconciliationResult>, ReconcileError> {
        let tasks = self.tasks_of(epic_id).await?;
        let expectations = self.expectations(&tasks);
        let report =
            completion::detect_completed(&tasks, &expectations, root, self.probe.as_ref());

        let mut results = Vec::new();
        for task_id in report.completed {
            let already_done = tasks
                .iter()
                .any(|t| t.id == task_id && t.status == TaskStatus::Done);
            if already_done {
                continue;
            }
            let summary = expectations
                .get(&task_id)
                .map(|p| format!("Artifact found at `{}`.", p.display()));
            if let Some(result) = self
                .transition_or_skip(epic_id, task_id, TransitionRequest::Complete { summary })
                .await?
            {
                results.push(result);
            }
        }
        Ok(results)
    }

    fn expectations(&self, tasks: &[Task]) -> HashMap<Uuid, PathBuf> {
        let pattern = &self.config.completion.artifact_pattern;
        tasks
            .iter()
            .map(|t| (t.id, artifact_path(t, pattern)))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Remote refresh
    // -----------------------------------------------------------------------

    /// Overwrite in-memory statuses with what GitHub currently shows.
    ///
    /// Returns the number of tasks whose status changed. Tasks whose issue
    /// cannot be read keep their status. Remote statuses pass the same
    /// dependency gate as requested ones, judged against the refreshed
    /// statuses, so a `status:ready` marker on a task with an unfinished
    /// dependency refreshes to `Blocked`.
    pub async fn refresh_from_remote(&self, epic_id: Uuid) -> Result<usize, ReconcileError> {
        let tasks = self.tasks_of(epic_id).await?;
        let mut updates = Vec::new();

        for task in &tasks {
            let Some(issue) = &task.issue else { continue };
            let state = match self.ops.get_issue_state(issue).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "could not read issue state");
                    continue;
                }
            };
            let labels = match self.ops.list_labels(issue).await {
                Ok(labels) => labels,
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "could not read issue labels");
                    continue;
                }
            };
            match derive_status(state, labels.as_slice(), &self.config.labels) {
                Some(status) if status != task.status => updates.push((task.id, status)),
                Some(_) => {}
                None => debug!(task_id = %task.id, "no status derivable from issue"),
            }
        }

        let mut refreshed = readiness::status_index(&tasks);
        refreshed.extend(updates.iter().copied());
        let updates: Vec<(Uuid, TaskStatus)> = tasks
            .iter()
            .filter_map(|task| {
                let (_, remote) = updates.iter().find(|(id, _)| *id == task.id)?;
                let unsatisfied = readiness::unsatisfied_dependencies(task, &refreshed);
                let gated = self.reconciler.effective_target(*remote, &unsatisfied);
                if gated != *remote {
                    warn!(
                        task_id = %task.id,
                        remote = %remote,
                        blocked_on = unsatisfied.len(),
                        "GitHub status ignores unfinished dependencies, keeping Blocked"
                    );
                }
                (gated != task.status).then_some((task.id, gated))
            })
            .collect();

        let mut epics = self.epics.write().await;
        let Some(epic) = epics.get_mut(&epic_id) else {
            return Err(ReconcileError::EpicNotFound(epic_id));
        };
        let changed = updates.len();
        for (task_id, status) in updates {
            if let Some(task) = epic.task_mut(task_id) {
                info!(task_id = %task_id, from = %task.status, to = %status, "status refreshed from GitHub");
                task.status = status;
                task.pending = None;
                task.updated_at = Utc::now();
            }
        }
        Ok(changed)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Validate a definition and turn it into a local epic, before any GitHub
/// call is made.
fn build_epic(definition: &EpicDefinition, config: &Config) -> Result<Epic, EpicError> {
    let title = definition.title.trim();
    if title.is_empty() {
        return Err(EpicError::MissingTitle);
    }

    let mut epic = Epic::new(title, definition.description.clone());
    let mut ids: HashMap<&str, Uuid> = HashMap::new();
    let mut seen = HashSet::new();

    for def in &definition.tasks {
        if !seen.insert(def.key.as_str()) {
            return Err(EpicError::DuplicateTaskKey(def.key.clone()));
        }
        let mut task = Task::new(def.key.clone(), def.title.clone(), def.phase);
        task.description = def.description.clone();
        task.required_skills = def
            .required_skills
            .iter()
            .map(|s| s.to_lowercase())
            .collect();
        if !task.required_skills.is_empty() {
            task.assigned_agent = best_assignment(&config.agents, &task.required_skills);
        }
        ids.insert(def.key.as_str(), task.id);
        epic.tasks.push(task);
    }

    for (def, task) in definition.tasks.iter().zip(epic.tasks.iter_mut()) {
        task.dependencies = def
            .depends_on
            .iter()
            .map(|key| {
                ids.get(key.as_str())
                    .copied()
                    .ok_or_else(|| EpicError::UnknownDependency {
                        task: def.key.clone(),
                        dependency: key.clone(),
                    })
            })
            .collect::<Result<_, _>>()?;
    }
    Ok(epic)
}

fn task_body(task: &Task, tracking: &IssueRef) -> String {
    let mut body = String::new();
    if let Some(description) = &task.description {
        body.push_str(description);
        body.push_str("\n\n");
    }
    body.push_str(&format!("SPARC phase: {}\n", task.phase));
    if let Some(agent) = &task.assigned_agent {
        body.push_str(&format!("Suggested agent: {} ({:.0})\n", agent.agent_id, agent.score));
    }
    body.push_str(&format!("\nPart of #{}", tracking.number));
    body
}

/// Markdown checklist of the tasks that got an issue.
fn checklist(tasks: &[Task]) -> String {
    tasks
        .iter()
        .filter_map(|t| {
            t.issue
                .as_ref()
                .map(|issue| format!("- [ ] #{} {}", issue.number, t.title))
        })
        .collect::<Vec<_>>()
        .join("\n")
}
