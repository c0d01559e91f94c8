//! In-process [`GitHubOps`] implementation.
//!
//! Keeps issues, labels and boards in memory and records every mutating call,
//! so callers can assert on exactly which writes a reconciliation performed.
//! Individual operations can be made to fail to exercise partial-failure paths.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use sb_core::config::StatusOptions;
use sb_core::types::{IssueRef, ProjectItemRef, ProjectRef, TaskStatus};

use crate::github::client::{GitHubError, Result};
use crate::ops::GitHubOps;
use crate::types::{FieldOption, IssueState, ProjectField};

/// Name of each [`GitHubOps`] method, used to inject failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetIssueState,
    SetIssueState,
    ListLabels,
    AddLabel,
    RemoveLabel,
    GetProjectField,
    SetProjectItemField,
    CreateIssue,
    AddComment,
    CreateProject,
    AddProjectItem,
}

/// A write that reached the fake remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    CreateIssue { number: u64 },
    SetIssueState { number: u64, state: IssueState },
    AddComment { number: u64 },
    AddLabel { number: u64, label: String },
    RemoveLabel { number: u64, label: String },
    CreateProject { id: String },
    AddProjectItem { item: String, number: u64 },
    SetProjectItemField { item: String, option_id: String },
}

/// Snapshot of a stored issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryIssue {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub state: IssueState,
    pub labels: Vec<String>,
    pub comments: Vec<String>,
}

#[derive(Debug)]
struct MemoryProject {
    number: u64,
    fields: HashMap<String, ProjectField>,
    /// item id -> (issue number, selected option id per field id)
    items: HashMap<String, (u64, HashMap<String, String>)>,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_issue: u64,
    next_project: u64,
    next_item: u64,
    issues: BTreeMap<u64, MemoryIssue>,
    projects: HashMap<String, MemoryProject>,
    mutations: Vec<Mutation>,
    failing: HashSet<Operation>,
    /// op -> successful calls left before it starts failing
    allowances: HashMap<Operation, usize>,
    status_options: Vec<String>,
}

#[derive(Debug)]
pub struct MemoryGitHub {
    state: Mutex<MemoryState>,
}

impl MemoryGitHub {
    /// New fake whose boards get a `Status` field with the default option names.
    pub fn new() -> Self {
        let options = StatusOptions::default();
        let names: Vec<String> = TaskStatus::ALL
            .iter()
            .map(|s| options.option_for(*s).to_string())
            .collect();
        Self::with_status_options(&names[..])
    }

    /// New fake whose boards get a `Status` field with exactly these options.
    pub fn with_status_options<S: AsRef<str>>(options: &[S]) -> Self {
        let state = MemoryState {
            next_issue: 1,
            next_project: 1,
            next_item: 1,
            status_options: options.iter().map(|o| o.as_ref().to_string()).collect(),
            ..MemoryState::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    /// Make every call to `op` fail until [`heal`](Self::heal) is called.
    pub fn fail(&self, op: Operation) {
        self.lock().failing.insert(op);
    }

    /// Let `op` succeed `successes` more times, then fail until healed.
    pub fn fail_after(&self, op: Operation, successes: usize) {
        self.lock().allowances.insert(op, successes);
    }

    pub fn heal(&self, op: Operation) {
        let mut state = self.lock();
        state.failing.remove(&op);
        state.allowances.remove(&op);
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.lock().mutations.clone()
    }

    pub fn mutation_count(&self) -> usize {
        self.lock().mutations.len()
    }

    pub fn clear_mutations(&self) {
        self.lock().mutations.clear();
    }

    pub fn issue(&self, number: u64) -> Option<MemoryIssue> {
        self.lock().issues.get(&number).cloned()
    }

    /// Option name currently selected for `field_name` on a board item.
    pub fn item_option(&self, project_id: &str, item_id: &str, field_name: &str) -> Option<String> {
        let state = self.lock();
        let project = state.projects.get(project_id)?;
        let field = project.fields.get(field_name)?;
        let (_, values) = project.items.get(item_id)?;
        let option_id = values.get(&field.id)?;
        field
            .options
            .iter()
            .find(|o| &o.id == option_id)
            .map(|o| o.name.clone())
    }

    /// Change an issue behind the orchestrator's back (not recorded).
    pub fn set_issue_externally(&self, number: u64, state: IssueState, labels: &[&str]) {
        let mut guard = self.lock();
        if let Some(issue) = guard.issues.get_mut(&number) {
            issue.state = state;
            issue.labels = labels.iter().map(|l| l.to_string()).collect();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().expect("MemoryGitHub lock poisoned")
    }
}

impl Default for MemoryGitHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryState {
    fn check(&mut self, op: Operation) -> Result<()> {
        let exhausted = match self.allowances.get_mut(&op) {
            Some(0) => true,
            Some(left) => {
                *left -= 1;
                false
            }
            None => false,
        };
        if exhausted || self.failing.contains(&op) {
            return Err(GitHubError::Rejected(format!("{op:?} failed (injected)")));
        }
        Ok(())
    }

    fn issue_mut(&mut self, number: u64) -> Result<&mut MemoryIssue> {
        self.issues
            .get_mut(&number)
            .ok_or_else(|| GitHubError::NotFound(format!("issue #{number}")))
    }

    fn project(&self, id: &str) -> Result<&MemoryProject> {
        self.projects
            .get(id)
            .ok_or_else(|| GitHubError::NotFound(format!("project {id}")))
    }
}

#[async_trait]
impl GitHubOps for MemoryGitHub {
    async fn get_issue_state(&self, issue: &IssueRef) -> Result<IssueState> {
        let mut state = self.lock();
        state.check(Operation::GetIssueState)?;
        Ok(state.issue_mut(issue.number)?.state)
    }

    async fn set_issue_state(&self, issue: &IssueRef, new_state: IssueState) -> Result<()> {
        let mut state = self.lock();
        state.check(Operation::SetIssueState)?;
        state.issue_mut(issue.number)?.state = new_state;
        state.mutations.push(Mutation::SetIssueState {
            number: issue.number,
            state: new_state,
        });
        Ok(())
    }

    async fn list_labels(&self, issue: &IssueRef) -> Result<Vec<String>> {
        let mut state = self.lock();
        state.check(Operation::ListLabels)?;
        Ok(state.issue_mut(issue.number)?.labels.clone())
    }

    async fn add_label(&self, issue: &IssueRef, label: &str) -> Result<()> {
        let mut state = self.lock();
        state.check(Operation::AddLabel)?;
        let stored = state.issue_mut(issue.number)?;
        if !stored.labels.iter().any(|l| l.eq_ignore_ascii_case(label)) {
            stored.labels.push(label.to_string());
        }
        state.mutations.push(Mutation::AddLabel {
            number: issue.number,
            label: label.to_string(),
        });
        Ok(())
    }

    async fn remove_label(&self, issue: &IssueRef, label: &str) -> Result<()> {
        let mut state = self.lock();
        state.check(Operation::RemoveLabel)?;
        let stored = state.issue_mut(issue.number)?;
        stored.labels.retain(|l| !l.eq_ignore_ascii_case(label));
        state.mutations.push(Mutation::RemoveLabel {
            number: issue.number,
            label: label.to_string(),
        });
        Ok(())
    }

    async fn get_project_field(
        &self,
        project: &ProjectRef,
        field_name: &str,
    ) -> Result<ProjectField> {
        let mut state = self.lock();
        state.check(Operation::GetProjectField)?;
        state
            .project(&project.id)?
            .fields
            .get(field_name)
            .cloned()
            .ok_or_else(|| GitHubError::NotFound(format!("single-select field `{field_name}`")))
    }

    async fn set_project_item_field(
        &self,
        project: &ProjectRef,
        item: &ProjectItemRef,
        field_id: &str,
        option_id: &str,
    ) -> Result<()> {
        let mut state = self.lock();
        state.check(Operation::SetProjectItemField)?;
        let stored = state
            .projects
            .get_mut(&project.id)
            .ok_or_else(|| GitHubError::NotFound(format!("project {}", project.id)))?;
        let known_option = stored
            .fields
            .values()
            .any(|f| f.id == field_id && f.options.iter().any(|o| o.id == option_id));
        if !known_option {
            return Err(GitHubError::Rejected(format!(
                "option {option_id} is not valid for field {field_id}"
            )));
        }
        let (_, values) = stored
            .items
            .get_mut(&item.id)
            .ok_or_else(|| GitHubError::NotFound(format!("project item {}", item.id)))?;
        values.insert(field_id.to_string(), option_id.to_string());
        state.mutations.push(Mutation::SetProjectItemField {
            item: item.id.clone(),
            option_id: option_id.to_string(),
        });
        Ok(())
    }

    async fn create_issue(
        &self,
        title: &str,
        body: Option<&str>,
        labels: &[String],
    ) -> Result<IssueRef> {
        let mut state = self.lock();
        state.check(Operation::CreateIssue)?;
        let number = state.next_issue;
        state.next_issue += 1;
        state.issues.insert(
            number,
            MemoryIssue {
                number,
                title: title.to_string(),
                body: body.map(|b| b.to_string()),
                state: IssueState::Open,
                labels: labels.to_vec(),
                comments: Vec::new(),
            },
        );
        state.mutations.push(Mutation::CreateIssue { number });
        Ok(IssueRef {
            number,
            url: format!("https://github.com/memory/repo/issues/{number}"),
            node_id: Some(format!("I_{number}")),
        })
    }

    async fn add_comment(&self, issue: &IssueRef, body: &str) -> Result<()> {
        let mut state = self.lock();
        state.check(Operation::AddComment)?;
        state.issue_mut(issue.number)?.comments.push(body.to_string());
        state.mutations.push(Mutation::AddComment {
            number: issue.number,
        });
        Ok(())
    }

    async fn create_project(&self, _title: &str) -> Result<ProjectRef> {
        let mut state = self.lock();
        state.check(Operation::CreateProject)?;
        let number = state.next_project;
        state.next_project += 1;
        let id = format!("PVT_{number}");

        let options = state
            .status_options
            .iter()
            .enumerate()
            .map(|(i, name)| FieldOption {
                id: format!("opt_{i}"),
                name: name.clone(),
            })
            .collect();
        let status = ProjectField {
            id: format!("{id}_status"),
            name: "Status".to_string(),
            options,
        };

        state.projects.insert(
            id.clone(),
            MemoryProject {
                number,
                fields: HashMap::from([(status.name.clone(), status)]),
                items: HashMap::new(),
            },
        );
        state.mutations.push(Mutation::CreateProject { id: id.clone() });
        Ok(ProjectRef {
            id,
            number,
            url: Some(format!("https://github.com/orgs/memory/projects/{number}")),
        })
    }

    async fn add_project_item(
        &self,
        project: &ProjectRef,
        issue: &IssueRef,
    ) -> Result<ProjectItemRef> {
        let mut state = self.lock();
        state.check(Operation::AddProjectItem)?;
        state.issue_mut(issue.number)?;
        let board_number = state.project(&project.id)?.number;
        let item = format!("PVTI_{}_{}", board_number, state.next_item);
        state.next_item += 1;
        if let Some(stored) = state.projects.get_mut(&project.id) {
            stored
                .items
                .insert(item.clone(), (issue.number, HashMap::new()));
        }
        state.mutations.push(Mutation::AddProjectItem {
            item: item.clone(),
            number: issue.number,
        });
        Ok(ProjectItemRef { id: item })
    }
}
