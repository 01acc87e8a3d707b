//! Side-effecting operations: documents on disk and child processes.

pub mod atomic;
pub mod change_store;
pub mod checkpoint_store;
pub mod config;
pub mod context;
pub mod executor;
pub mod init;
pub mod probe;
pub mod process;
pub mod spec_resolver;
pub mod task_store;
pub mod templates;
pub mod verify;
