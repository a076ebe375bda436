//! Supervisor for multi-turn exchanges with a text generator that produces a
//! patch.
//!
//! Every generated response carries delimiter tags (`%_Plan_%`,
//! `%_Modified_%`, `%%_Fin_%%`, ...). The conductor detects them, keeps only
//! those meaningful in the conversation's current phase, validates the turn,
//! advances the phase state machine, and detects conversations that stopped
//! making progress. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (tags, phases, validation,
//!   decision table, retry accounting). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting seams (configuration, persistence, producers).
//!
//! [`controller`] coordinates both to run turns; [`registry`] holds the
//! in-memory sessions it works on.

pub mod controller;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod registry;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
