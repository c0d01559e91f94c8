use serde::{Deserialize, Serialize};

use sb_core::config::GitHubSection;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    pub token: Option<String>,
    pub owner: String,
    pub repo: String,
}

impl GitHubConfig {
    /// Build from the `[github]` config section, reading the token from the
    /// environment variable it names.
    pub fn from_section(section: &GitHubSection) -> Self {
        Self {
            token: std::env::var(&section.token_env).ok(),
            owner: section.owner.clone(),
            repo: section.repo.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueState {
    Open,
    Closed,
}

/// One choice of a single-select project field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOption {
    pub id: String,
    pub name: String,
}

/// A single-select field on a Projects v2 board (e.g. `Status`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectField {
    pub id: String,
    pub name: String,
    pub options: Vec<FieldOption>,
}

impl ProjectField {
    /// Find an option by name, ignoring case.
    pub fn option_named(&self, name: &str) -> Option<&FieldOption> {
        self.options
            .iter()
            .find(|o| o.name.eq_ignore_ascii_case(name))
    }
}
