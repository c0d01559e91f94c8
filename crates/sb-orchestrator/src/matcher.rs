//! Agent recommendation by skill overlap.
//!
//! Matching is deliberately loose: an agent skill counts when it contains, or
//! is contained in, any required skill (case-insensitive). Every agent gets a
//! flat 40-point availability floor; full overlap reaches 100.

use sb_core::types::{AgentAssignment, AgentProfile};

const AVAILABILITY_FLOOR: f64 = 40.0;
const SKILL_WEIGHT: f64 = 60.0;
const MAX_SCORE: f64 = 100.0;

/// Score an agent's skills against a task's required skills, in `[0, 100]`.
pub fn score_agent<A, R>(agent_skills: &[A], required_skills: &[R]) -> f64
where
    A: AsRef<str>,
    R: AsRef<str>,
{
    let required: Vec<String> = required_skills
        .iter()
        .map(|r| r.as_ref().to_lowercase())
        .collect();

    let matched = agent_skills
        .iter()
        .map(|s| s.as_ref().to_lowercase())
        .filter(|skill| {
            required
                .iter()
                .any(|r| skill.contains(r.as_str()) || r.contains(skill.as_str()))
        })
        .count();

    let fraction = matched as f64 / required.len().max(1) as f64;
    (fraction * SKILL_WEIGHT + AVAILABILITY_FLOOR).min(MAX_SCORE)
}

/// Agents ordered by descending score; ties keep catalog order.
pub fn rank_agents<'a, R: AsRef<str>>(
    agents: &'a [AgentProfile],
    required_skills: &[R],
) -> Vec<(&'a AgentProfile, f64)> {
    let mut ranked: Vec<(&AgentProfile, f64)> = agents
        .iter()
        .map(|a| (a, score_agent(&a.skills, required_skills)))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked
}

/// Best agent for the skills, as an assignment ready to store on a task.
pub fn best_assignment<R: AsRef<str>>(
    agents: &[AgentProfile],
    required_skills: &[R],
) -> Option<AgentAssignment> {
    rank_agents(agents, required_skills)
        .into_iter()
        .next()
        .map(|(agent, score)| AgentAssignment {
            agent_id: agent.id.clone(),
            agent_type: agent.agent_type.clone(),
            score,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_core::config::default_agents;

    #[test]
    fn full_overlap_scores_100() {
        let agent = ["typescript", "nodejs", "api", "database", "testing"];
        let required = ["typescript", "nodejs", "api"];
        assert_eq!(score_agent(&agent, &required), 100.0);
    }

    #[test]
    fn no_overlap_scores_floor() {
        let agent = ["research", "analysis"];
        let required = ["typescript", "nodejs", "api"];
        assert_eq!(score_agent(&agent, &required), 40.0);
    }

    #[test]
    fn substring_matches_both_directions() {
        // "test" is inside "testing"; "api" contains "ap".
        assert_eq!(score_agent(&["test"], &["testing"]), 100.0);
        assert_eq!(score_agent(&["api"], &["ap"]), 100.0);
        assert_eq!(score_agent(&["TypeScript"], &["typescript", "rust"]), 70.0);
    }

    #[test]
    fn empty_requirements_use_denominator_one() {
        let none: [&str; 0] = [];
        assert_eq!(score_agent(&["rust"], &none), 40.0);
    }

    #[test]
    fn matched_agent_skills_beyond_requirements_cap_at_100() {
        // Two agent skills match the single requirement: fraction 2.0.
        assert_eq!(score_agent(&["api", "api-design"], &["api"]), 100.0);
    }

    #[test]
    fn ranking_is_descending_and_stable() {
        let agents = default_agents();
        let required = ["api", "database"];
        let first = rank_agents(&agents, &required);
        let second = rank_agents(&agents, &required);

        let ids = |r: &[(&AgentProfile, f64)]| r.iter().map(|(a, _)| a.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
        assert!(first.windows(2).all(|w| w[0].1 >= w[1].1));
        // coder and architect both cover api+database; coder comes first in the catalog.
        assert_eq!(first[0].0.id, "coder");
        assert_eq!(first[1].0.id, "architect");
    }

    #[test]
    fn empty_catalog_ranks_nothing() {
        assert!(rank_agents(&[], &["rust"]).is_empty());
        assert!(best_assignment(&[], &["rust"]).is_none());
    }

    #[test]
    fn best_assignment_caches_type_and_score() {
        let agents = default_agents();
        let assignment = best_assignment(&agents, &["research"]).expect("assignment");
        assert_eq!(assignment.agent_id, "researcher");
        assert_eq!(assignment.agent_type, "researcher");
        assert_eq!(assignment.score, 100.0);
    }
}
