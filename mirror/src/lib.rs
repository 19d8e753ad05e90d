//! Version-gated mirror of a remote Android artifact.
//!
//! One `sync` run fetches the newest build, decompiles it into a git working
//! directory, reads its version from the manifest, and commits and
//! force-pushes the tree only when that version is strictly newer than the
//! last one published. The crate is split the usual way:
//!
//! - **[`core`]**: Pure, deterministic logic (version type, gate, manifest
//!   parsing, outcomes). No I/O.
//! - **[`io`]**: Side-effecting adapters (config, git, subprocesses, scratch
//!   directory, version record). Each pipeline stage sits behind a trait.
//!
//! [`sync`] wires the stages together and is what the CLI calls.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod sync;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
