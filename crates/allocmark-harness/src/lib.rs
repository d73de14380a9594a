//! Verification tooling for allocmark.
//!
//! This crate provides:
//! - Case verification: runs every (strategy, size) pair behind the
//!   diagnostics probe and checks the execution contract
//! - Reports: machine-readable verification report
//! - Structured logging: JSONL run logs and an artifact index

#![forbid(unsafe_code)]

pub mod checks;
pub mod error;
pub mod report;
pub mod structured_log;

pub use checks::{CaseResult, VerifyOptions, verify_case, verify_registry};
pub use error::HarnessError;
pub use report::VerifyReport;
