use sb_core::config::LabelConfig;
use sb_core::types::TaskStatus;
use sb_github::types::IssueState;

/// Status implied by GitHub's view of an issue.
///
/// A closed issue is `Done`. An open issue takes the status of its marker
/// label; with no marker (or several conflicting ones) nothing can be derived
/// and the caller keeps its local status.
///
/// The board column is not consulted: [`GitHubOps`](sb_github::ops::GitHubOps)
/// can set an item's field value but not read it back. A card moved by hand
/// without touching the labels is therefore not picked up.
pub fn derive_status<S: AsRef<str>>(
    state: IssueState,
    labels: &[S],
    label_config: &LabelConfig,
) -> Option<TaskStatus> {
    if state == IssueState::Closed {
        return Some(TaskStatus::Done);
    }

    let mut marked = labels
        .iter()
        .filter_map(|l| label_config.status_from_label(l.as_ref()));
    let first = marked.next()?;
    if marked.any(|other| other != first) {
        return None;
    }
    Some(first)
}
