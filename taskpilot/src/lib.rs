//! File-backed task lifecycle engine for agent-driven development.
//!
//! Tasks move through three persisted collections (backlog, in-progress,
//! done) under `.taskpilot/`. The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (readiness, candidate selection,
//!   checkpoint policy, the orchestrator state machine, markdown parsing).
//! - **[`io`]**: Side-effecting operations (documents on disk, agent and
//!   verification processes, context generation).
//!
//! Orchestration modules ([`change`], [`session`], [`autopilot`]) combine the
//! two to implement CLI commands.

pub mod autopilot;
pub mod change;
pub mod checkpoint;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod session;
pub mod task;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
