use sb_core::types::IssueRef;

use crate::types::IssueState;

use super::client::{GitHubClient, Result};

/// Read the open/closed state of an issue.
pub async fn get_issue_state(client: &GitHubClient, number: u64) -> Result<IssueState> {
    let issue = client
        .octocrab
        .issues(&client.owner, &client.repo)
        .get(number)
        .await?;

    Ok(convert_state(&issue.state))
}

/// GraphQL node id of an issue, needed to put it on a project board.
pub async fn issue_node_id(client: &GitHubClient, number: u64) -> Result<String> {
    let issue = client
        .octocrab
        .issues(&client.owner, &client.repo)
        .get(number)
        .await?;

    Ok(issue.node_id)
}

/// Open or close an issue.
pub async fn set_issue_state(client: &GitHubClient, number: u64, state: IssueState) -> Result<()> {
    let param = match state {
        IssueState::Open => octocrab::models::IssueState::Open,
        IssueState::Closed => octocrab::models::IssueState::Closed,
    };

    client
        .octocrab
        .issues(&client.owner, &client.repo)
        .update(number)
        .state(param)
        .send()
        .await?;

    tracing::debug!(issue = number, ?state, "issue state updated");
    Ok(())
}

/// Create an issue and return the reference the core keeps.
pub async fn create_issue(
    client: &GitHubClient,
    title: &str,
    body: Option<&str>,
    labels: &[String],
) -> Result<IssueRef> {
    let issue_handler = client.octocrab.issues(&client.owner, &client.repo);

    let mut builder = issue_handler.create(title);

    if let Some(b) = body {
        builder = builder.body(b);
    }

    if !labels.is_empty() {
        builder = builder.labels(labels.to_vec());
    }

    let issue = builder.send().await?;

    Ok(IssueRef {
        number: issue.number,
        url: issue.html_url.to_string(),
        node_id: Some(issue.node_id),
    })
}

pub async fn create_comment(client: &GitHubClient, number: u64, body: &str) -> Result<()> {
    client
        .octocrab
        .issues(&client.owner, &client.repo)
        .create_comment(number, body)
        .await?;
    Ok(())
}

/// Names of the labels currently on an issue.
pub async fn list_labels(client: &GitHubClient, number: u64) -> Result<Vec<String>> {
    let page = client
        .octocrab
        .issues(&client.owner, &client.repo)
        .list_labels_for_issue(number)
        .per_page(100)
        .send()
        .await?;

    Ok(page.items.into_iter().map(|l| l.name).collect())
}

pub async fn add_label(client: &GitHubClient, number: u64, label: &str) -> Result<()> {
    client
        .octocrab
        .issues(&client.owner, &client.repo)
        .add_labels(number, &[label.to_string()])
        .await?;
    Ok(())
}

pub async fn remove_label(client: &GitHubClient, number: u64, label: &str) -> Result<()> {
    client
        .octocrab
        .issues(&client.owner, &client.repo)
        .remove_label(number, label)
        .await?;
    Ok(())
}

// ---- internal helpers -------------------------------------------------------

fn convert_state(state: &octocrab::models::IssueState) -> IssueState {
    match state {
        octocrab::models::IssueState::Closed => IssueState::Closed,
        _ => IssueState::Open,
    }
}
