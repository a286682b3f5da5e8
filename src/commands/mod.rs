//! Request-handler entry points
//!
//! Each command resolves its inputs from storage, runs the pure component and
//! persists the outcome. Errors come back as `ComplianceError`, which
//! serializes to its message for the caller.

pub mod compliance;
pub mod matching;
pub mod schedule;
