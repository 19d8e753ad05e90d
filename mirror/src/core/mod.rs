//! Deterministic, pure logic for the mirror pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data (manifest text, version codes) and return deterministic outputs
//! suitable for tests.

pub mod gate;
pub mod manifest;
pub mod types;
