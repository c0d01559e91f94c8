pub mod client;
pub mod issues;
pub mod projects;

use async_trait::async_trait;
use sb_core::types::{IssueRef, ProjectItemRef, ProjectRef};

use crate::ops::GitHubOps;
use crate::types::{IssueState, ProjectField};

use client::{GitHubClient, Result};

#[async_trait]
impl GitHubOps for GitHubClient {
    async fn get_issue_state(&self, issue: &IssueRef) -> Result<IssueState> {
        issues::get_issue_state(self, issue.number).await
    }

    async fn set_issue_state(&self, issue: &IssueRef, state: IssueState) -> Result<()> {
        issues::set_issue_state(self, issue.number, state).await
    }

    async fn list_labels(&self, issue: &IssueRef) -> Result<Vec<String>> {
        issues::list_labels(self, issue.number).await
    }

    async fn add_label(&self, issue: &IssueRef, label: &str) -> Result<()> {
        issues::add_label(self, issue.number, label).await
    }

    async fn remove_label(&self, issue: &IssueRef, label: &str) -> Result<()> {
        issues::remove_label(self, issue.number, label).await
    }

    async fn get_project_field(
        &self,
        project: &ProjectRef,
        field_name: &str,
    ) -> Result<ProjectField> {
        projects::get_single_select_field(self, &project.id, field_name).await
    }

    async fn set_project_item_field(
        &self,
        project: &ProjectRef,
        item: &ProjectItemRef,
        field_id: &str,
        option_id: &str,
    ) -> Result<()> {
        projects::set_item_single_select(self, &project.id, &item.id, field_id, option_id).await
    }

    async fn create_issue(
        &self,
        title: &str,
        body: Option<&str>,
        labels: &[String],
    ) -> Result<IssueRef> {
        issues::create_issue(self, title, body, labels).await
    }

    async fn add_comment(&self, issue: &IssueRef, body: &str) -> Result<()> {
        issues::create_comment(self, issue.number, body).await
    }

    async fn create_project(&self, title: &str) -> Result<ProjectRef> {
        projects::create_project(self, title).await
    }

    async fn add_project_item(
        &self,
        project: &ProjectRef,
        issue: &IssueRef,
    ) -> Result<ProjectItemRef> {
        let content_id = match &issue.node_id {
            Some(id) => id.clone(),
            None => issues::issue_node_id(self, issue.number).await?,
        };
        projects::add_item(self, &project.id, &content_id).await
    }
}
