//! Run report generation.

use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;

use crate::runner::ScenarioResult;
use crate::scenario::ScenarioOptions;
use crate::structured_log::now_utc;

/// Machine-readable summary of one harness invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub generated_utc: String,
    pub options: ScenarioOptions,
    pub refill_batch: usize,
    pub max_growth_bytes: Option<usize>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<ScenarioResult>,
}

impl RunReport {
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        options: ScenarioOptions,
        refill_batch: usize,
        max_growth_bytes: Option<usize>,
        results: Vec<ScenarioResult>,
    ) -> Self {
        let passed = results.iter().filter(|r| r.passed).count();
        Self {
            run_id: run_id.into(),
            generated_utc: now_utc(),
            options,
            refill_batch,
            max_growth_bytes,
            total: results.len(),
            passed,
            failed: results.len() - passed,
            results,
        }
    }

    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_json(&self, path: &Path) -> Result<(), crate::HarnessError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Human-readable table.
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "run {}: {}/{} scenarios passed (seed {:#x}, ops {})",
            self.run_id, self.passed, self.total, self.options.seed, self.options.ops
        );
        let _ = writeln!(
            out,
            "{:<18} {:>6} {:>8} {:>10} {:>7} {:>7} {:>6} {:>6}",
            "scenario", "result", "ops", "heap", "grows", "cannib", "donate", "ms"
        );
        for r in &self.results {
            let _ = writeln!(
                out,
                "{:<18} {:>6} {:>8} {:>10} {:>7} {:>7} {:>6} {:>6}",
                r.scenario.as_str(),
                if r.passed { "PASS" } else { "FAIL" },
                r.ops_executed,
                r.stats.heap_size,
                r.stats.growth_events,
                r.stats.cannibalizations,
                r.stats.donations,
                r.duration_ms,
            );
            for v in &r.violations {
                let _ = writeln!(out, "    - {v}");
            }
        }
        out
    }
}
