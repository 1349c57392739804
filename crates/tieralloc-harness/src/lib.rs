//! Workload harness for tieralloc.
//!
//! This crate provides:
//! - Scenarios: deterministic, seeded allocator workloads
//! - Runner: executes scenarios with aliasing and content checks
//! - Structured logs: JSONL timeline plus allocator lifecycle records
//! - Reports: JSON and plain-text run summaries

#![deny(unsafe_code)]

pub mod error;
pub mod report;
#[allow(unsafe_code)]
pub mod runner;
pub mod scenario;
pub mod structured_log;

pub use error::HarnessError;
pub use report::RunReport;
pub use runner::{ScenarioResult, ScenarioRunner};
pub use scenario::{Scenario, ScenarioOptions};
