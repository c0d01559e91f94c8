use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::{AgentProfile, TaskStatus};

/// Top-level configuration loaded from `~/.sparc-board/config.toml`.
///
/// Built once by the caller and passed into the epic manager; there is no
/// process-wide instance.
///
/// **Security**: the GitHub token is never stored here. `github.token_env`
/// names the environment variable it is read from at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub github: GitHubSection,
    #[serde(default)]
    pub board: BoardConfig,
    #[serde(default)]
    pub labels: LabelConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default = "default_agents")]
    pub agents: Vec<AgentProfile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            github: GitHubSection::default(),
            board: BoardConfig::default(),
            labels: LabelConfig::default(),
            reconciler: ReconcilerConfig::default(),
            completion: CompletionConfig::default(),
            agents: default_agents(),
        }
    }
}

impl Config {
    /// Load config from `~/.sparc-board/config.toml`, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg = Self::from_toml(&text)?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(cfg)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings that are not fully expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.board.validate()?;
        self.labels.validate()?;
        self.completion.validate()?;

        let mut ids = HashSet::new();
        for agent in &self.agents {
            if agent.id.trim().is_empty() {
                return Err(ConfigError::Validation("agents: id must not be empty".into()));
            }
            if !ids.insert(agent.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "agents: duplicate id `{}`",
                    agent.id
                )));
            }
        }
        Ok(())
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sparc-board")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Human,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_project_name")]
    pub project_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            project_name: default_project_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_project_name() -> String {
    "sparc-board".into()
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> LogFormat {
    LogFormat::Human
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubSection {
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub repo: String,
    /// Environment variable holding the personal access token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

impl Default for GitHubSection {
    fn default() -> Self {
        Self {
            owner: String::new(),
            repo: String::new(),
            token_env: default_token_env(),
        }
    }
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardConfig {
    /// Create a Projects v2 board for every new epic.
    #[serde(default = "default_true")]
    pub create_project: bool,
    /// Name of the single-select field holding the task status.
    #[serde(default = "default_status_field")]
    pub status_field: String,
    #[serde(default)]
    pub status_options: StatusOptions,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            create_project: true,
            status_field: default_status_field(),
            status_options: StatusOptions::default(),
        }
    }
}

impl BoardConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.status_field.trim().is_empty() {
            return Err(ConfigError::Validation(
                "board.status_field must not be empty".into(),
            ));
        }
        let mut seen = HashSet::new();
        for status in TaskStatus::ALL {
            let name = self.status_options.option_for(status);
            if name.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "board.status_options.{} must not be empty",
                    status.slug().replace('-', "_")
                )));
            }
            if !seen.insert(name.to_lowercase()) {
                return Err(ConfigError::Validation(format!(
                    "board.status_options: `{name}` is mapped from more than one status"
                )));
            }
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}
fn default_status_field() -> String {
    "Status".into()
}

/// Board option name for each task status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusOptions {
    #[serde(default = "opt_backlog")]
    pub backlog: String,
    #[serde(default = "opt_ready")]
    pub ready: String,
    #[serde(default = "opt_in_progress")]
    pub in_progress: String,
    #[serde(default = "opt_review")]
    pub review: String,
    #[serde(default = "opt_done")]
    pub done: String,
    #[serde(default = "opt_blocked")]
    pub blocked: String,
}

impl Default for StatusOptions {
    fn default() -> Self {
        Self {
            backlog: opt_backlog(),
            ready: opt_ready(),
            in_progress: opt_in_progress(),
            review: opt_review(),
            done: opt_done(),
            blocked: opt_blocked(),
        }
    }
}

impl StatusOptions {
    pub fn option_for(&self, status: TaskStatus) -> &str {
        match status {
            TaskStatus::Backlog => &self.backlog,
            TaskStatus::Ready => &self.ready,
            TaskStatus::InProgress => &self.in_progress,
            TaskStatus::Review => &self.review,
            TaskStatus::Done => &self.done,
            TaskStatus::Blocked => &self.blocked,
        }
    }
}

fn opt_backlog() -> String {
    "Backlog".into()
}
fn opt_ready() -> String {
    "Ready".into()
}
fn opt_in_progress() -> String {
    "In Progress".into()
}
fn opt_review() -> String {
    "Review".into()
}
fn opt_done() -> String {
    "Done".into()
}
fn opt_blocked() -> String {
    "Blocked".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelConfig {
    #[serde(default = "default_status_prefix")]
    pub status_prefix: String,
    #[serde(default = "default_phase_prefix")]
    pub phase_prefix: String,
    #[serde(default = "default_epic_label")]
    pub epic_label: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            status_prefix: default_status_prefix(),
            phase_prefix: default_phase_prefix(),
            epic_label: default_epic_label(),
        }
    }
}

impl LabelConfig {
    /// Marker label mirroring `status` on the issue.
    pub fn status_label(&self, status: TaskStatus) -> String {
        format!("{}{}", self.status_prefix, status.slug())
    }

    /// Parse a label back into the status it marks, if it is a marker.
    /// Matching ignores ASCII case, as GitHub does for label names.
    pub fn status_from_label(&self, label: &str) -> Option<TaskStatus> {
        let split = self.status_prefix.len();
        let prefix = label.get(..split)?;
        if !prefix.eq_ignore_ascii_case(&self.status_prefix) {
            return None;
        }
        TaskStatus::from_slug(&label[split..])
    }

    pub fn phase_label(&self, phase: crate::types::SparcPhase) -> String {
        format!("{}{}", self.phase_prefix, phase.slug())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.status_prefix.is_empty() {
            return Err(ConfigError::Validation(
                "labels.status_prefix must not be empty".into(),
            ));
        }
        if self.status_prefix == self.phase_prefix {
            return Err(ConfigError::Validation(
                "labels.status_prefix and labels.phase_prefix must differ".into(),
            ));
        }
        Ok(())
    }
}

fn default_status_prefix() -> String {
    "status:".into()
}
fn default_phase_prefix() -> String {
    "sparc:".into()
}
fn default_epic_label() -> String {
    "epic".into()
}

/// Which requested statuses are gated on dependencies being `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyPolicy {
    /// Only a request for `Ready` is turned into `Blocked`.
    GateReady,
    /// Every request except `Done` and `Blocked` is turned into `Blocked`.
    GateAll,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    #[serde(default = "default_dependency_policy")]
    pub dependency_policy: DependencyPolicy,
    /// Comment posted on an issue when it is closed as done.
    #[serde(default = "default_completion_comment")]
    pub completion_comment: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            dependency_policy: default_dependency_policy(),
            completion_comment: default_completion_comment(),
        }
    }
}

fn default_dependency_policy() -> DependencyPolicy {
    DependencyPolicy::GateReady
}
fn default_completion_comment() -> String {
    "Task completed.".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Relative path of a task's expected artifact. `{phase}` and `{slug}`
    /// are substituted.
    #[serde(default = "default_artifact_pattern")]
    pub artifact_pattern: String,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            artifact_pattern: default_artifact_pattern(),
        }
    }
}

impl CompletionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.artifact_pattern.contains("{slug}") {
            return Err(ConfigError::Validation(
                "completion.artifact_pattern must contain `{slug}`".into(),
            ));
        }
        Ok(())
    }
}

fn default_artifact_pattern() -> String {
    "{phase}/{slug}.md".into()
}

/// The built-in persona pool.
pub fn default_agents() -> Vec<AgentProfile> {
    vec![
        AgentProfile::new(
            "coder",
            "Coder",
            "coder",
            &["typescript", "nodejs", "api", "database", "testing"],
        ),
        AgentProfile::new(
            "researcher",
            "Researcher",
            "researcher",
            &["research", "analysis", "documentation"],
        ),
        AgentProfile::new(
            "architect",
            "System Architect",
            "architect",
            &["architecture", "system-design", "api", "database"],
        ),
        AgentProfile::new(
            "tester",
            "Tester",
            "tester",
            &["testing", "qa", "validation", "automation"],
        ),
        AgentProfile::new(
            "reviewer",
            "Reviewer",
            "reviewer",
            &["review", "code-quality", "security", "performance"],
        ),
    ]
}
