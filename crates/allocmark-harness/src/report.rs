//! Verification report generation.

use std::path::Path;

use allocmark_core::AllocatorInstance;
use serde::{Deserialize, Serialize};

use crate::checks::{CaseResult, VerifyOptions};
use crate::structured_log::{Outcome, now_utc};

/// A loaded third-party instance as recorded in the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Resolved `malloc` address, hex.
    pub identity: String,
}

impl From<&AllocatorInstance> for InstanceInfo {
    fn from(instance: &AllocatorInstance) -> Self {
        Self {
            label: instance.label().to_owned(),
            path: instance.path().map(|p| p.display().to_string()),
            identity: format!("{:#x}", instance.identity()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub skipped: usize,
}

impl Summary {
    fn of(cases: &[CaseResult]) -> Self {
        let mut summary = Self {
            total: cases.len(),
            ..Self::default()
        };
        for case in cases {
            match case.outcome {
                Outcome::Pass => summary.passed += 1,
                Outcome::Fail => summary.failed += 1,
                Outcome::Error => summary.errored += 1,
                Outcome::Skip => summary.skipped += 1,
            }
        }
        summary
    }
}

/// Machine-readable result of a `verify` run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyReport {
    pub report_version: u32,
    pub run_id: String,
    pub generated_utc: String,
    pub iterations: usize,
    pub sizes: Vec<usize>,
    /// Whether a counting global allocator was registered.
    pub counting_allocator: bool,
    pub instances: Vec<InstanceInfo>,
    pub outcome: Outcome,
    pub summary: Summary,
    pub cases: Vec<CaseResult>,
}

impl VerifyReport {
    #[must_use]
    pub fn new(run_id: impl Into<String>, options: &VerifyOptions, cases: Vec<CaseResult>) -> Self {
        let summary = Summary::of(&cases);
        let outcome = if summary.errored > 0 {
            Outcome::Error
        } else if summary.failed > 0 {
            Outcome::Fail
        } else {
            Outcome::Pass
        };
        Self {
            report_version: 1,
            run_id: run_id.into(),
            generated_utc: now_utc(),
            iterations: options.iterations,
            sizes: options.sizes.clone(),
            counting_allocator: allocmark_core::tracking::is_active(),
            instances: Vec::new(),
            outcome,
            summary,
            cases,
        }
    }

    #[must_use]
    pub fn with_instances(mut self, instances: Vec<InstanceInfo>) -> Self {
        self.instances = instances;
        self
    }

    /// Overrides the generation time, for reproducible output.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.generated_utc = timestamp.into();
        self
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.summary.failed + self.summary.errored
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        self.failed() == 0
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_json(&self, path: &Path) -> Result<(), crate::HarnessError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Human-readable summary table.
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("# allocmark verification\n\n");
        out.push_str(&format!(
            "- run: `{}`\n- generated: {}\n- iterations per case: {}\n- leak accounting: {}\n",
            self.run_id,
            self.generated_utc,
            self.iterations,
            if self.counting_allocator { "on" } else { "off" },
        ));
        for instance in &self.instances {
            out.push_str(&format!(
                "- instance `{}`: {} ({})\n",
                instance.label,
                instance.path.as_deref().unwrap_or("<linked>"),
                instance.identity
            ));
        }
        out.push_str(&format!(
            "\n**{}** passed, **{}** failed, **{}** errored, **{}** skipped of {}\n\n",
            self.summary.passed,
            self.summary.failed,
            self.summary.errored,
            self.summary.skipped,
            self.summary.total
        ));
        out.push_str("| Strategy | Family | Size | Outcome | Leaks | ns/cycle | Notes |\n");
        out.push_str("|---|---|---:|---|---|---:|---|\n");
        for case in &self.cases {
            out.push_str(&format!(
                "| {} | {} | {} | {:?} | {} | {} | {} |\n",
                case.strategy,
                case.family.as_str(),
                case.size,
                case.outcome,
                if case.leak_checked { "checked" } else { "unchecked" },
                case.latency_ns,
                case.failures.join("; ")
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::verify_case;
    use allocmark_core::StrategyRegistry;

    fn report() -> VerifyReport {
        let registry = StrategyRegistry::builtin();
        let options = VerifyOptions {
            iterations: 2,
            sizes: vec![16],
        };
        let cases = ["libc_calloc", "stack_zeroed", "mimalloc_linked_aligned"]
            .iter()
            .map(|name| verify_case(registry.get(name).expect("registered"), 16, 2))
            .collect();
        VerifyReport::new("run-test", &options, cases).with_timestamp("2026-01-01T00:00:00.000Z")
    }

    #[test]
    fn summary_counts_outcomes() {
        let report = report();
        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.passed, 3);
        assert_eq!(report.outcome, Outcome::Pass);
        assert!(report.passed());
        assert!(!report.counting_allocator);
    }

    #[test]
    fn json_round_trips_cases() {
        let json = report().to_json().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["generated_utc"], "2026-01-01T00:00:00.000Z");
        assert_eq!(parsed["cases"][0]["strategy"], "libc_calloc");
        assert_eq!(parsed["cases"][0]["family"], "native-heap-zeroed");
        assert_eq!(parsed["cases"][1]["zeroing"], "zeroed");
        assert!(parsed["cases"][0].get("failures").is_none());
        assert_eq!(parsed["cases"][0]["accounting"], "raw-block");
        assert_eq!(parsed["cases"][0]["raw_blocks"]["adopted"], 2);
        assert_eq!(parsed["cases"][2]["strategy"], "mimalloc_linked_aligned");
    }

    #[test]
    fn markdown_lists_every_case() {
        let md = report().to_markdown();
        assert!(md.contains("| libc_calloc | native-heap-zeroed | 16 | Pass | checked |"));
        assert!(md.contains("| stack_zeroed | stack | 16 | Pass | unchecked |"));
        assert!(md.contains("| mimalloc_linked_aligned | third-party | 16 | Pass | checked |"));
    }
}
