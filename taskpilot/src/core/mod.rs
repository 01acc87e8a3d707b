//! Deterministic, pure logic shared by the lifecycle engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod checkpoint_policy;
pub mod fsm;
pub mod invariants;
pub mod markdown;
pub mod readiness;
pub mod selector;
pub mod slug;
pub mod task_detail;
pub mod task_list;
pub mod types;
