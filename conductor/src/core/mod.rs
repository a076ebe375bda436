//! Deterministic, pure logic shared by the conductor.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod decision;
pub mod no_progress;
pub mod normalize;
pub mod phase;
pub mod retry;
pub mod state_machine;
pub mod tags;
pub mod types;
pub mod validator;
