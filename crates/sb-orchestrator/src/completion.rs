//! Artifact-based completion detection.
//!
//! A task counts as complete when the file it is expected to produce exists.
//! Nothing about the file is inspected; the result is a hint for the
//! reconciler, not ground truth.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sb_core::types::Task;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Filesystem access needed by the detector.
pub trait FileProbe: Send + Sync {
    fn file_exists(&self, path: &Path) -> bool;
}

/// [`FileProbe`] backed by the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFiles;

impl FileProbe for LocalFiles {
    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionReport {
    pub completed: Vec<Uuid>,
    pub pending: Vec<Uuid>,
}

/// Expected artifact of a task, relative to the project root.
///
/// `{phase}` and `{slug}` in `pattern` are replaced with the phase slug and
/// the task's title slug.
pub fn artifact_path(task: &Task, pattern: &str) -> PathBuf {
    PathBuf::from(
        pattern
            .replace("{phase}", task.phase.slug())
            .replace("{slug}", &task.slug()),
    )
}

/// Partition `tasks` by whether `root.join(expected)` exists.
///
/// Tasks with no entry in `expectations` are pending. Input order is kept in
/// both halves.
pub fn detect_completed(
    tasks: &[Task],
    expectations: &HashMap<Uuid, PathBuf>,
    root: &Path,
    probe: &dyn FileProbe,
) -> CompletionReport {
    let mut report = CompletionReport::default();
    for task in tasks {
        let exists = expectations
            .get(&task.id)
            .map(|rel| probe.file_exists(&root.join(rel)))
            .unwrap_or(false);
        if exists {
            report.completed.push(task.id);
        } else {
            report.pending.push(task.id);
        }
    }
    tracing::debug!(
        completed = report.completed.len(),
        pending = report.pending.len(),
        root = %root.display(),
        "artifact scan finished"
    );
    report
}
