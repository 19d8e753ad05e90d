//! Side-effecting adapters: filesystem, subprocesses, git.
//!
//! Each pipeline stage the orchestrator drives sits behind a trait defined
//! here ([`acquirer::Acquirer`], [`transformer::Transformer`],
//! [`git::Repository`], [`version_store::VersionStore`]) so tests can swap in
//! scripted fakes.

pub mod acquirer;
pub mod config;
pub mod credentials;
pub mod dirs;
pub mod git;
pub mod manifest;
pub mod process;
pub mod transformer;
pub mod version_store;
