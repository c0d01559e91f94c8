use async_trait::async_trait;
use sb_core::types::{IssueRef, ProjectItemRef, ProjectRef};

use crate::github::client::Result;
use crate::types::{IssueState, ProjectField};

/// Everything the orchestrator needs from GitHub.
///
/// Every write method performs exactly one remote write, so a failed call
/// never leaves half of a compound change behind. `add_project_item` may read
/// the issue's node id before writing. Ordering, retries and failure
/// recording are the caller's concern.
#[async_trait]
pub trait GitHubOps: Send + Sync {
    async fn get_issue_state(&self, issue: &IssueRef) -> Result<IssueState>;

    /// Open or close an issue.
    async fn set_issue_state(&self, issue: &IssueRef, state: IssueState) -> Result<()>;

    async fn list_labels(&self, issue: &IssueRef) -> Result<Vec<String>>;

    async fn add_label(&self, issue: &IssueRef, label: &str) -> Result<()>;

    async fn remove_label(&self, issue: &IssueRef, label: &str) -> Result<()>;

    /// Look up a single-select field and its options by name.
    async fn get_project_field(&self, project: &ProjectRef, field_name: &str)
        -> Result<ProjectField>;

    async fn set_project_item_field(
        &self,
        project: &ProjectRef,
        item: &ProjectItemRef,
        field_id: &str,
        option_id: &str,
    ) -> Result<()>;

    async fn create_issue(&self, title: &str, body: Option<&str>, labels: &[String])
        -> Result<IssueRef>;

    async fn add_comment(&self, issue: &IssueRef, body: &str) -> Result<()>;

    async fn create_project(&self, title: &str) -> Result<ProjectRef>;

    async fn add_project_item(&self, project: &ProjectRef, issue: &IssueRef)
        -> Result<ProjectItemRef>;
}
