//! Projects v2 access. The REST API does not cover boards, so everything here
//! goes through octocrab's GraphQL endpoint.

use sb_core::types::{ProjectItemRef, ProjectRef};
use serde_json::{json, Value};

use crate::types::{FieldOption, ProjectField};

use super::client::{GitHubClient, GitHubError, Result};

const FIELD_QUERY: &str = r#"query($projectId: ID!, $name: String!) {
    node(id: $projectId) {
        ... on ProjectV2 {
            field(name: $name) {
                ... on ProjectV2SingleSelectField { id name options { id name } }
            }
        }
    }
}"#;

const SET_FIELD_MUTATION: &str = r#"mutation($projectId: ID!, $itemId: ID!, $fieldId: ID!, $optionId: String!) {
    updateProjectV2ItemFieldValue(input: {
        projectId: $projectId
        itemId: $itemId
        fieldId: $fieldId
        value: { singleSelectOptionId: $optionId }
    }) { projectV2Item { id } }
}"#;

const REPOSITORY_QUERY: &str = r#"query($owner: String!, $name: String!) {
    repository(owner: $owner, name: $name) { id owner { id } }
}"#;

const CREATE_PROJECT_MUTATION: &str = r#"mutation($ownerId: ID!, $repositoryId: ID!, $title: String!) {
    createProjectV2(input: { ownerId: $ownerId, repositoryId: $repositoryId, title: $title }) {
        projectV2 { id number url }
    }
}"#;

const ADD_ITEM_MUTATION: &str = r#"mutation($projectId: ID!, $contentId: ID!) {
    addProjectV2ItemById(input: { projectId: $projectId, contentId: $contentId }) {
        item { id }
    }
}"#;

/// Look up a single-select field (and its options) on a board.
pub async fn get_single_select_field(
    client: &GitHubClient,
    project_id: &str,
    field_name: &str,
) -> Result<ProjectField> {
    let body = graphql(
        client,
        FIELD_QUERY,
        json!({ "projectId": project_id, "name": field_name }),
    )
    .await?;

    parse_field(&body["data"]["node"]["field"])
        .ok_or_else(|| GitHubError::NotFound(format!("single-select field `{field_name}`")))
}

pub async fn set_item_single_select(
    client: &GitHubClient,
    project_id: &str,
    item_id: &str,
    field_id: &str,
    option_id: &str,
) -> Result<()> {
    graphql(
        client,
        SET_FIELD_MUTATION,
        json!({
            "projectId": project_id,
            "itemId": item_id,
            "fieldId": field_id,
            "optionId": option_id,
        }),
    )
    .await?;
    Ok(())
}

/// Create a board owned by the repository owner and linked to the repository.
pub async fn create_project(client: &GitHubClient, title: &str) -> Result<ProjectRef> {
    let repo = graphql(
        client,
        REPOSITORY_QUERY,
        json!({ "owner": client.owner, "name": client.repo }),
    )
    .await?;

    let repository = &repo["data"]["repository"];
    let (Some(repository_id), Some(owner_id)) =
        (repository["id"].as_str(), repository["owner"]["id"].as_str())
    else {
        return Err(GitHubError::NotFound(format!(
            "repository {}/{}",
            client.owner, client.repo
        )));
    };

    let body = graphql(
        client,
        CREATE_PROJECT_MUTATION,
        json!({ "ownerId": owner_id, "repositoryId": repository_id, "title": title }),
    )
    .await?;

    let project = parse_project(&body["data"]["createProjectV2"]["projectV2"])
        .ok_or_else(|| GitHubError::GraphQl("createProjectV2 returned no project".into()))?;
    tracing::info!(project = project.number, title, "created project board");
    Ok(project)
}

pub async fn add_item(
    client: &GitHubClient,
    project_id: &str,
    content_id: &str,
) -> Result<ProjectItemRef> {
    let body = graphql(
        client,
        ADD_ITEM_MUTATION,
        json!({ "projectId": project_id, "contentId": content_id }),
    )
    .await?;

    body["data"]["addProjectV2ItemById"]["item"]["id"]
        .as_str()
        .map(|id| ProjectItemRef { id: id.to_string() })
        .ok_or_else(|| GitHubError::GraphQl("addProjectV2ItemById returned no item".into()))
}

// ---- internal helpers -------------------------------------------------------

/// Run a GraphQL document and return the parsed body. GraphQL-level errors
/// come back with HTTP 200, so they are checked here.
async fn graphql(client: &GitHubClient, query: &str, variables: Value) -> Result<Value> {
    let payload = json!({ "query": query, "variables": variables });
    let body: Value = client.octocrab.graphql(&payload).await?;
    check_errors(body)
}

fn check_errors(body: Value) -> Result<Value> {
    match body.get("errors") {
        Some(errors) if !errors.is_null() => Err(GitHubError::GraphQl(errors.to_string())),
        _ => Ok(body),
    }
}

fn parse_field(node: &Value) -> Option<ProjectField> {
    let id = node["id"].as_str()?;
    let options = node["options"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|o| {
                    Some(FieldOption {
                        id: o["id"].as_str()?.to_string(),
                        name: o["name"].as_str()?.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(ProjectField {
        id: id.to_string(),
        name: node["name"].as_str().unwrap_or_default().to_string(),
        options,
    })
}

fn parse_project(node: &Value) -> Option<ProjectRef> {
    Some(ProjectRef {
        id: node["id"].as_str()?.to_string(),
        number: node["number"].as_u64()?,
        url: node["url"].as_str().map(|s| s.to_string()),
    })
}
