//! Run outcome aggregation

use serde::{Deserialize, Serialize};

use shotcheck_common::RunMode;

use crate::orchestrator::{ShotOutcome, ShotResult};

/// Counts per outcome and the verdict of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub mode: RunMode,
    pub total: usize,
    pub stable: usize,
    pub differences: usize,
    pub missing_baselines: usize,
    pub capture_failures: usize,
    pub comparison_failures: usize,
    pub success: bool,
    /// One `[i/n] name: outcome` line per shot, in input order
    pub lines: Vec<String>,
}

impl Summary {
    pub fn aggregate(results: &[ShotResult], mode: RunMode, fail_on_difference: bool) -> Self {
        let count = |outcome: ShotOutcome| results.iter().filter(|r| r.outcome == outcome).count();

        let stable = count(ShotOutcome::Stable);
        let differences = count(ShotOutcome::DifferenceFound);
        let missing_baselines = count(ShotOutcome::MissingBaseline);
        let capture_failures = count(ShotOutcome::CaptureFailed);
        let comparison_failures = count(ShotOutcome::ComparisonFailed);

        let differences_fail = mode == RunMode::Compare || fail_on_difference;
        let success = capture_failures == 0
            && comparison_failures == 0
            && !(differences_fail && differences > 0)
            && !(mode == RunMode::Compare && missing_baselines > 0);

        let total = results.len();
        let lines = results
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let mut line = format!("[{}/{}] {}: {}", i + 1, total, r.item.shot_name, r.outcome);
                if let Some(diff) = r.pixel_diff_count.filter(|d| *d > 0) {
                    line.push_str(&format!(" ({} px)", diff));
                }
                if let Some(error) = &r.error {
                    line.push_str(&format!(" - {}", error));
                }
                line
            })
            .collect();

        Self {
            mode,
            total,
            stable,
            differences,
            missing_baselines,
            capture_failures,
            comparison_failures,
            success,
            lines,
        }
    }

    pub fn failures(&self) -> usize {
        self.capture_failures + self.comparison_failures
    }

    pub fn exit_code(&self) -> i32 {
        if self.success {
            0
        } else {
            1
        }
    }

    /// One-line description of the counts
    pub fn headline(&self) -> String {
        format!(
            "{} shots: {} stable, {} differ, {} missing baseline, {} failed",
            self.total,
            self.stable,
            self.differences,
            self.missing_baselines,
            self.failures()
        )
    }
}
