//! Integration tests for cst-runner
//!
//! These exercise the full provision-then-execute flow with fake tools so no
//! network access or container runtime is needed.

pub mod cli;
pub mod helpers;
pub mod run_flow;
