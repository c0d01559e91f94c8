//! Which tasks may start now.
//!
//! A task is ready when its own status is `Backlog` or `Ready` and every
//! dependency is `Done`. Results are ordered by SPARC phase, then creation
//! order. Dependency cycles leave every task on the cycle permanently
//! non-ready; [`find_dependency_cycles`] reports them but the resolver itself
//! never consults it.

use std::collections::{HashMap, HashSet};

use sb_core::types::{SparcPhase, Task, TaskStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Optional narrowing of [`compute_ready_tasks`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyFilter {
    pub phase: Option<SparcPhase>,
    /// Matches the `agent_type` of the task's assigned agent.
    pub agent_type: Option<String>,
}

impl ReadyFilter {
    pub fn phase(phase: SparcPhase) -> Self {
        Self {
            phase: Some(phase),
            agent_type: None,
        }
    }

    pub fn agent_type(agent_type: impl Into<String>) -> Self {
        Self {
            phase: None,
            agent_type: Some(agent_type.into()),
        }
    }

    fn matches(&self, task: &Task) -> bool {
        if let Some(phase) = self.phase {
            if task.phase != phase {
                return false;
            }
        }
        if let Some(wanted) = &self.agent_type {
            let assigned = task.assigned_agent.as_ref().map(|a| a.agent_type.as_str());
            if assigned != Some(wanted.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Status of every task, keyed by id.
pub fn status_index(tasks: &[Task]) -> HashMap<Uuid, TaskStatus> {
    tasks.iter().map(|t| (t.id, t.status)).collect()
}

/// Dependencies of `task` that are not `Done`. Ids missing from `statuses`
/// count as not done.
pub fn unsatisfied_dependencies(task: &Task, statuses: &HashMap<Uuid, TaskStatus>) -> Vec<Uuid> {
    task.dependencies
        .iter()
        .filter(|dep| statuses.get(dep) != Some(&TaskStatus::Done))
        .copied()
        .collect()
}

/// Tasks eligible to start, in phase rank then creation order.
pub fn compute_ready_tasks<'a>(tasks: &'a [Task], filter: &ReadyFilter) -> Vec<&'a Task> {
    let statuses = status_index(tasks);
    let mut ready: Vec<&Task> = tasks
        .iter()
        .filter(|t| t.status.is_startable())
        .filter(|t| unsatisfied_dependencies(t, &statuses).is_empty())
        .filter(|t| filter.matches(t))
        .collect();
    // Stable: equal phases keep slice (creation) order.
    ready.sort_by_key(|t| t.phase.rank());
    ready
}

/// Head of [`compute_ready_tasks`], optionally restricted to an agent type.
pub fn compute_next_task<'a>(tasks: &'a [Task], agent_type: Option<&str>) -> Option<&'a Task> {
    let filter = ReadyFilter {
        phase: None,
        agent_type: agent_type.map(str::to_string),
    };
    compute_ready_tasks(tasks, &filter).into_iter().next()
}

/// `Blocked` tasks whose dependencies have all reached `Done` since.
pub fn blocked_but_satisfied(tasks: &[Task]) -> Vec<&Task> {
    let statuses = status_index(tasks);
    tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Blocked)
        .filter(|t| unsatisfied_dependencies(t, &statuses).is_empty())
        .collect()
}

/// Every dependency cycle among `tasks`, each as the ids along the cycle.
///
/// Diagnostic only. Dependencies pointing outside `tasks` are ignored.
pub fn find_dependency_cycles(tasks: &[Task]) -> Vec<Vec<Uuid>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        id: Uuid,
        edges: &HashMap<Uuid, &[Uuid]>,
        marks: &mut HashMap<Uuid, Mark>,
        stack: &mut Vec<Uuid>,
        cycles: &mut Vec<Vec<Uuid>>,
    ) {
        marks.insert(id, Mark::Visiting);
        stack.push(id);

        for dep in edges.get(&id).copied().unwrap_or_default() {
            if !edges.contains_key(dep) {
                continue;
            }
            match marks.get(dep) {
                Some(Mark::Visiting) => {
                    if let Some(start) = stack.iter().position(|s| s == dep) {
                        cycles.push(stack[start..].to_vec());
                    }
                }
                Some(Mark::Done) => {}
                None => visit(*dep, edges, marks, stack, cycles),
            }
        }

        stack.pop();
        marks.insert(id, Mark::Done);
    }

    let edges: HashMap<Uuid, &[Uuid]> = tasks
        .iter()
        .map(|t| (t.id, t.dependencies.as_slice()))
        .collect();
    let mut marks = HashMap::new();
    let mut stack = Vec::new();
    let mut cycles = Vec::new();

    for task in tasks {
        if !marks.contains_key(&task.id) {
            visit(task.id, &edges, &mut marks, &mut stack, &mut cycles);
        }
    }

    // A self-loop and longer cycles are both reported once.
    let mut seen: HashSet<Vec<Uuid>> = HashSet::new();
    cycles.retain(|c| {
        let mut key = c.clone();
        key.sort();
        seen.insert(key)
    });
    cycles
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_core::types::AgentAssignment;

    fn task(key: &str, phase: SparcPhase, status: TaskStatus) -> Task {
        Task::new(key, key.to_uppercase(), phase).with_status(status)
    }

    #[test]
    fn later_phase_waits_behind_earlier_phase() {
        let refine = task("refine", SparcPhase::Refinement, TaskStatus::Backlog);
        let spec = task("spec", SparcPhase::Specification, TaskStatus::Ready);
        let tasks = vec![refine, spec];

        let ready = compute_ready_tasks(&tasks, &ReadyFilter::default());
        let keys: Vec<&str> = ready.iter().map(|t| t.key.as_str()).collect();
        assert_eq!(keys, vec!["spec", "refine"]);
    }

    #[test]
    fn same_phase_keeps_creation_order() {
        let tasks = vec![
            task("b", SparcPhase::Architecture, TaskStatus::Backlog),
            task("a", SparcPhase::Architecture, TaskStatus::Backlog),
            task("c", SparcPhase::Architecture, TaskStatus::Ready),
        ];
        let keys: Vec<&str> = compute_ready_tasks(&tasks, &ReadyFilter::default())
            .iter()
            .map(|t| t.key.as_str())
            .collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn unknown_dependency_blocks_readiness() {
        let t = task("x", SparcPhase::Specification, TaskStatus::Backlog)
            .with_dependencies([Uuid::new_v4()]);
        let tasks = vec![t];
        assert!(compute_ready_tasks(&tasks, &ReadyFilter::default()).is_empty());
    }

    #[test]
    fn blocked_tasks_are_not_ready_but_are_reported_once_satisfied() {
        let a = task("a", SparcPhase::Specification, TaskStatus::Done);
        let b = task("b", SparcPhase::Pseudocode, TaskStatus::Blocked).with_dependencies([a.id]);
        let tasks = vec![a, b];

        assert!(compute_ready_tasks(&tasks, &ReadyFilter::default()).is_empty());
        let released: Vec<&str> = blocked_but_satisfied(&tasks)
            .iter()
            .map(|t| t.key.as_str())
            .collect();
        assert_eq!(released, vec!["b"]);
    }

    #[test]
    fn filter_by_phase_and_agent_type() {
        let mut coder_task = task("impl", SparcPhase::Refinement, TaskStatus::Backlog);
        coder_task.assigned_agent = Some(AgentAssignment {
            agent_id: "coder".into(),
            agent_type: "coder".into(),
            score: 100.0,
        });
        let research = task("research", SparcPhase::Specification, TaskStatus::Backlog);
        let tasks = vec![coder_task, research];

        let by_phase = compute_ready_tasks(&tasks, &ReadyFilter::phase(SparcPhase::Specification));
        assert_eq!(by_phase.len(), 1);
        assert_eq!(by_phase[0].key, "research");

        let next = compute_next_task(&tasks, Some("coder")).expect("coder task");
        assert_eq!(next.key, "impl");
        assert!(compute_next_task(&tasks, Some("tester")).is_none());
        assert_eq!(compute_next_task(&tasks, None).unwrap().key, "research");
    }

    #[test]
    fn cycle_detection_reports_two_cycle_once() {
        let mut a = task("a", SparcPhase::Specification, TaskStatus::Backlog);
        let mut b = task("b", SparcPhase::Specification, TaskStatus::Backlog);
        a.dependencies = vec![b.id];
        b.dependencies = vec![a.id];
        let c = task("c", SparcPhase::Specification, TaskStatus::Backlog).with_dependencies([a.id]);
        let ids = (a.id, b.id);
        let tasks = vec![a, b, c];

        let cycles = find_dependency_cycles(&tasks);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), 2);
        assert!(cycles[0].contains(&ids.0) && cycles[0].contains(&ids.1));

        // The resolver does not break cycles: nobody on or behind it is ready.
        assert!(compute_ready_tasks(&tasks, &ReadyFilter::default()).is_empty());
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let mut a = task("a", SparcPhase::Specification, TaskStatus::Backlog);
        a.dependencies = vec![a.id];
        let cycles = find_dependency_cycles(std::slice::from_ref(&a));
        assert_eq!(cycles, vec![vec![a.id]]);
    }

    #[test]
    fn acyclic_graph_has_no_cycles() {
        let a = task("a", SparcPhase::Specification, TaskStatus::Backlog);
        let b = task("b", SparcPhase::Pseudocode, TaskStatus::Backlog).with_dependencies([a.id]);
        let c = task("c", SparcPhase::Architecture, TaskStatus::Backlog)
            .with_dependencies([a.id, b.id]);
        assert!(find_dependency_cycles(&[a, b, c]).is_empty());
    }
}
