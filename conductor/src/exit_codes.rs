//! Stable exit codes for conductor CLI commands.

/// Command succeeded; for `replay`, no turn ended in a protocol failure.
pub const OK: i32 = 0;
/// Invalid input, config, or store, or a response that failed validation in
/// `check`.
pub const INVALID: i32 = 1;
/// `replay` ended with the conversation in `ERROR`.
pub const PROTOCOL_FAILURE: i32 = 2;
