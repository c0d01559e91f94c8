//! GitHub collaborator for sparc-board.
//!
//! The orchestrator only talks to GitHub through [`ops::GitHubOps`]. Two
//! implementations are provided: [`github::client::GitHubClient`] (octocrab,
//! REST for issues and labels, GraphQL for Projects v2) and
//! [`memory::MemoryGitHub`], an in-process double that records every mutation.

pub mod github;
pub mod memory;
pub mod ops;
pub mod types;
