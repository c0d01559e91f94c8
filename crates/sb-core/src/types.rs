use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// Reconciled lifecycle status of a task.
///
/// GitHub (issue state, board column, labels) is the authoritative store; this
/// value is the last status the reconciler brought GitHub into agreement with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Backlog,
    Ready,
    InProgress,
    Review,
    Done,
    Blocked,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Backlog,
        TaskStatus::Ready,
        TaskStatus::InProgress,
        TaskStatus::Review,
        TaskStatus::Done,
        TaskStatus::Blocked,
    ];

    /// Slug used for status-marker labels (`status:in-progress`).
    pub fn slug(&self) -> &'static str {
        match self {
            TaskStatus::Backlog => "backlog",
            TaskStatus::Ready => "ready",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Review => "review",
            TaskStatus::Done => "done",
            TaskStatus::Blocked => "blocked",
        }
    }

    pub fn from_slug(slug: &str) -> Option<TaskStatus> {
        TaskStatus::ALL
            .into_iter()
            .find(|s| s.slug().eq_ignore_ascii_case(slug.trim()))
    }

    /// Statuses a task may be picked up from.
    pub fn is_startable(&self) -> bool {
        matches!(self, TaskStatus::Backlog | TaskStatus::Ready)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskStatus::Backlog => "Backlog",
            TaskStatus::Ready => "Ready",
            TaskStatus::InProgress => "In Progress",
            TaskStatus::Review => "Review",
            TaskStatus::Done => "Done",
            TaskStatus::Blocked => "Blocked",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// SparcPhase
// ---------------------------------------------------------------------------

/// SPARC development stage. Declaration order is priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SparcPhase {
    Specification = 0,
    Pseudocode = 1,
    Architecture = 2,
    Refinement = 3,
    Completion = 4,
}

impl SparcPhase {
    pub fn rank(&self) -> u8 {
        *self as u8
    }

    pub fn slug(&self) -> &'static str {
        match self {
            SparcPhase::Specification => "specification",
            SparcPhase::Pseudocode => "pseudocode",
            SparcPhase::Architecture => "architecture",
            SparcPhase::Refinement => "refinement",
            SparcPhase::Completion => "completion",
        }
    }
}

impl fmt::Display for SparcPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SparcPhase::Specification => "Specification",
            SparcPhase::Pseudocode => "Pseudocode",
            SparcPhase::Architecture => "Architecture",
            SparcPhase::Refinement => "Refinement",
            SparcPhase::Completion => "Completion",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// External references
// ---------------------------------------------------------------------------

/// A GitHub issue as seen from the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRef {
    pub number: u64,
    pub url: String,
    /// GraphQL node id, needed to add the issue to a Projects v2 board.
    #[serde(default)]
    pub node_id: Option<String>,
}

/// A GitHub Projects v2 board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub id: String,
    pub number: u64,
    #[serde(default)]
    pub url: Option<String>,
}

/// An item (card) on a Projects v2 board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectItemRef {
    pub id: String,
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

/// A persona from the static agent catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub name: String,
    pub agent_type: String,
    pub skills: Vec<String>,
}

impl AgentProfile {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        agent_type: impl Into<String>,
        skills: &[&str],
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            agent_type: agent_type.into(),
            skills: skills.iter().map(|s| s.to_lowercase()).collect(),
        }
    }
}

/// The agent recommended for a task, with the score it was picked at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAssignment {
    pub agent_id: String,
    pub agent_type: String,
    pub score: f64,
}

// ---------------------------------------------------------------------------
// PendingSync
// ---------------------------------------------------------------------------

/// Progress of a reconciliation that did not fully converge.
///
/// Each step flag is `true` once that sub-step reached the target state, so a
/// retry of the same target only repeats the steps still `false`.
/// `comment_owed` is set when the issue was closed but its completion comment
/// has not been posted yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSync {
    pub target: TaskStatus,
    pub board: bool,
    pub issue: bool,
    pub labels: bool,
    #[serde(default)]
    pub comment_owed: bool,
}

impl PendingSync {
    pub fn new(target: TaskStatus) -> Self {
        Self {
            target,
            board: false,
            issue: false,
            labels: false,
            comment_owed: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub key: String,
    pub title: String,
    pub description: Option<String>,
    pub phase: SparcPhase,
    pub status: TaskStatus,
    pub dependencies: Vec<Uuid>,
    #[serde(default)]
    pub required_skills: Vec<String>,
    pub issue: Option<IssueRef>,
    pub project_item: Option<ProjectItemRef>,
    pub assigned_agent: Option<AgentAssignment>,
    #[serde(default)]
    pub pending: Option<PendingSync>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(key: impl Into<String>, title: impl Into<String>, phase: SparcPhase) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            key: key.into(),
            title: title.into(),
            description: None,
            phase,
            status: TaskStatus::Backlog,
            dependencies: Vec::new(),
            required_skills: Vec::new(),
            issue: None,
            project_item: None,
            assigned_agent: None,
            pending: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = Uuid>) -> Self {
        self.dependencies = deps.into_iter().collect();
        self
    }

    pub fn with_issue(mut self, issue: IssueRef) -> Self {
        self.issue = Some(issue);
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Lowercase, dash-separated form of the title, used for artifact paths.
    pub fn slug(&self) -> String {
        let mut slug = String::with_capacity(self.title.len());
        let mut dash = false;
        for c in self.title.chars() {
            if c.is_ascii_alphanumeric() {
                slug.push(c.to_ascii_lowercase());
                dash = false;
            } else if !dash && !slug.is_empty() {
                slug.push('-');
                dash = true;
            }
        }
        while slug.ends_with('-') {
            slug.pop();
        }
        slug
    }
}

// ---------------------------------------------------------------------------
// Epic
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Epic {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub project: Option<ProjectRef>,
    pub tracking_issue: Option<IssueRef>,
    pub tasks: Vec<Task>,
    pub created_at: DateTime<Utc>,
}

impl Epic {
    pub fn new(title: impl Into<String>, description: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description,
            project: None,
            tracking_issue: None,
            tasks: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn task(&self, id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: Uuid) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn task_by_key(&self, key: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.key == key)
    }

    /// Fraction of tasks in `Done`, 0.0 for an empty epic.
    pub fn progress(&self) -> f64 {
        if self.tasks.is_empty() {
            return 0.0;
        }
        let done = self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Done)
            .count();
        done as f64 / self.tasks.len() as f64
    }
}
