//! Shot orchestration
//!
//! Drives every shot item through capture, comparison and flakiness retries
//! with bounded concurrency. Each item runs an explicit state machine:
//!
//! ```text
//! Pending → Capturing → Captured → Comparing → Done(outcome)
//!              ↑                       │
//!              └────── FlakyRetry ─────┘
//! ```
//!
//! Capture errors and comparison mismatches share one attempt budget of
//! `1 + retries`. A failing item never affects its siblings.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use shotcheck_common::hash::hash_bytes;
use shotcheck_common::{ExtendedShotItem, RunMode, ShotConfig, ShotItem};

use crate::capture::CaptureEngine;
use crate::compare::{Comparison, ComparisonEngine};
use crate::error::{CaptureError, ComparisonError};

/// Allowance for launching the browser on top of the stage timeouts
const BROWSER_STARTUP: Duration = Duration::from_secs(10);

/// When and how often a shot is re-captured
#[derive(Debug, Clone)]
pub struct FlakinessPolicy {
    /// Re-capture when the comparison exceeds the threshold
    pub compare_after_shot: bool,
    pub retries: u32,
    pub wait_between: Duration,
}

impl FlakinessPolicy {
    pub fn max_attempts(&self) -> u32 {
        1 + self.retries
    }
}

impl Default for FlakinessPolicy {
    fn default() -> Self {
        Self {
            compare_after_shot: false,
            retries: 5,
            wait_between: Duration::from_millis(2_000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunPolicy {
    pub mode: RunMode,
    pub shot_concurrency: usize,
    pub compare_concurrency: usize,
    /// Bound for a single capture attempt, not counting the item's own
    /// screenshot wait
    pub capture_timeout: Duration,
    pub flakiness: FlakinessPolicy,
    /// Overwrite baselines with confirmed differences
    pub update_baselines: bool,
}

impl RunPolicy {
    pub fn from_config(config: &ShotConfig) -> Self {
        Self {
            mode: config.mode,
            shot_concurrency: config.shot_concurrency,
            compare_concurrency: config.compare_concurrency,
            capture_timeout: config
                .timeouts
                .capture_budget()
                .saturating_add(BROWSER_STARTUP)
                .saturating_add(Duration::from_millis(config.wait_for_first_request)),
            flakiness: FlakinessPolicy {
                compare_after_shot: config.compare_after_shot,
                retries: config.flakyness_retries,
                wait_between: config.wait_between_retries(),
            },
            update_baselines: false,
        }
    }
}

impl RunPolicy {
    /// Bound for one capture attempt of `item`
    pub fn capture_timeout_for(&self, item: &ShotItem) -> Duration {
        let wait = Duration::from_millis(item.wait_before_screenshot.unwrap_or(0));
        self.capture_timeout.saturating_add(wait)
    }

    /// Whether a missing baseline is filled in from the current image.
    /// The platform owns baselines in platform mode.
    pub fn seeds_baselines(&self) -> bool {
        match self.mode {
            RunMode::GenerateOnly => true,
            RunMode::Compare => self.update_baselines,
            RunMode::Platform => false,
        }
    }

    /// Whether a confirmed difference overwrites the local baseline
    pub fn updates_baselines(&self) -> bool {
        self.update_baselines && self.mode != RunMode::Platform
    }
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self::from_config(&ShotConfig::default())
    }
}

/// Terminal state of a shot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShotOutcome {
    Stable,
    DifferenceFound,
    MissingBaseline,
    CaptureFailed,
    ComparisonFailed,
}

impl ShotOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShotOutcome::Stable => "stable",
            ShotOutcome::DifferenceFound => "difference found",
            ShotOutcome::MissingBaseline => "missing baseline",
            ShotOutcome::CaptureFailed => "capture failed",
            ShotOutcome::ComparisonFailed => "comparison failed",
        }
    }
}

impl std::fmt::Display for ShotOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one shot item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShotResult {
    /// Position in the input batch
    pub index: usize,
    pub item: ShotItem,
    pub outcome: ShotOutcome,
    pub pixel_diff_count: Option<u64>,
    pub error: Option<String>,
    pub attempts: u32,
    /// SHA-256 of the current image, set iff it was captured
    pub hash: Option<String>,
    pub duration_ms: u64,
}

impl ShotResult {
    /// Upload view of a captured shot
    pub fn extended(&self) -> Option<ExtendedShotItem> {
        self.hash
            .clone()
            .map(|hash| ExtendedShotItem::new(self.item.clone(), hash))
    }
}

enum ShotState {
    Pending,
    Capturing,
    Captured(Vec<u8>),
    Comparing { baseline: Vec<u8>, current: Vec<u8> },
    FlakyRetry,
    Done(ShotOutcome),
}

/// Per-item bookkeeping carried across states
#[derive(Default)]
struct Attempt {
    count: u32,
    hash: Option<String>,
    pixel_diff_count: Option<u64>,
    error: Option<String>,
}

pub struct Orchestrator {
    capture: Arc<dyn CaptureEngine>,
    compare: Arc<dyn ComparisonEngine>,
    policy: RunPolicy,
    compare_slots: Arc<Semaphore>,
}

impl Orchestrator {
    pub fn new(
        capture: Arc<dyn CaptureEngine>,
        compare: Arc<dyn ComparisonEngine>,
        policy: RunPolicy,
    ) -> Self {
        let compare_slots = Arc::new(Semaphore::new(policy.compare_concurrency.max(1)));
        Self {
            capture,
            compare,
            policy,
            compare_slots,
        }
    }

    pub fn policy(&self) -> &RunPolicy {
        &self.policy
    }

    /// Run all items; results come back in input order
    pub async fn run(&self, items: Vec<ShotItem>) -> Vec<ShotResult> {
        let total = items.len();
        info!(
            "Processing {} shots ({} concurrent captures, {} concurrent comparisons)",
            total, self.policy.shot_concurrency, self.policy.compare_concurrency
        );

        let mut results: Vec<ShotResult> = stream::iter(items.into_iter().enumerate())
            .map(|(index, item)| self.process(index, item, total))
            .buffer_unordered(self.policy.shot_concurrency.max(1))
            .collect()
            .await;

        results.sort_by_key(|r| r.index);
        results
    }

    async fn process(&self, index: usize, item: ShotItem, total: usize) -> ShotResult {
        let start = Instant::now();
        let max_attempts = self.policy.flakiness.max_attempts();
        let mut attempt = Attempt::default();
        let mut state = ShotState::Pending;

        let outcome = loop {
            state = match state {
                ShotState::Pending => ShotState::Capturing,

                ShotState::Capturing => {
                    attempt.count += 1;
                    debug!("[{}/{}] {}: capture attempt {}", index + 1, total, item.shot_name, attempt.count);

                    match self.capture_once(&item).await {
                        Ok(bytes) => ShotState::Captured(bytes),
                        Err(e) => {
                            warn!("[{}/{}] {}: {}", index + 1, total, item.shot_name, e);
                            attempt.error = Some(e.to_string());
                            if attempt.count < max_attempts {
                                tokio::time::sleep(self.policy.flakiness.wait_between).await;
                                ShotState::Capturing
                            } else {
                                attempt.hash = None;
                                attempt.pixel_diff_count = None;
                                ShotState::Done(ShotOutcome::CaptureFailed)
                            }
                        }
                    }
                }

                ShotState::Captured(current) => self.on_captured(&item, current, &mut attempt).await,

                ShotState::Comparing { baseline, current } => {
                    match self.compare_once(&item, baseline, current.clone()).await {
                        Ok(comparison) => {
                            self.on_compared(&item, comparison, &current, &mut attempt, max_attempts)
                                .await
                        }
                        Err(e) => {
                            attempt.error = Some(e.to_string());
                            ShotState::Done(ShotOutcome::ComparisonFailed)
                        }
                    }
                }

                ShotState::FlakyRetry => {
                    debug!("{} differs, re-capturing", item.shot_name);
                    tokio::time::sleep(self.policy.flakiness.wait_between).await;
                    ShotState::Capturing
                }

                ShotState::Done(outcome) => break outcome,
            };
        };

        match outcome {
            ShotOutcome::CaptureFailed | ShotOutcome::ComparisonFailed => error!(
                "[{}/{}] {}: {} ({})",
                index + 1,
                total,
                item.shot_name,
                outcome,
                attempt.error.as_deref().unwrap_or("unknown error")
            ),
            _ => info!("[{}/{}] {}: {}", index + 1, total, item.shot_name, outcome),
        }

        ShotResult {
            index,
            item,
            outcome,
            pixel_diff_count: attempt.pixel_diff_count,
            error: attempt.error,
            attempts: attempt.count,
            hash: attempt.hash,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn capture_once(&self, item: &ShotItem) -> Result<Vec<u8>, CaptureError> {
        let budget = self.policy.capture_timeout_for(item);
        match tokio::time::timeout(budget, self.capture.capture(item)).await {
            Ok(result) => result,
            Err(_) => Err(CaptureError::Timeout {
                stage: "capture".to_string(),
                after: budget,
            }),
        }
    }

    /// Persist the current image and decide whether there is anything to compare
    async fn on_captured(&self, item: &ShotItem, current: Vec<u8>, attempt: &mut Attempt) -> ShotState {
        if let Err(e) = write_file(&item.file_path_current, &current).await {
            attempt.error = Some(format!(
                "cannot write {}: {}",
                item.file_path_current.display(),
                e
            ));
            attempt.hash = None;
            attempt.pixel_diff_count = None;
            return ShotState::Done(ShotOutcome::CaptureFailed);
        }
        attempt.hash = Some(hash_bytes(&current));
        attempt.error = None;

        match tokio::fs::read(&item.file_path_baseline).await {
            Ok(baseline) => ShotState::Comparing { baseline, current },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if self.policy.seeds_baselines() {
                    if let Err(e) = write_file(&item.file_path_baseline, &current).await {
                        attempt.error = Some(format!("cannot seed baseline: {}", e));
                        return ShotState::Done(ShotOutcome::ComparisonFailed);
                    }
                    debug!("Seeded baseline for {}", item.shot_name);
                }
                ShotState::Done(ShotOutcome::MissingBaseline)
            }
            Err(e) => {
                attempt.error = Some(
                    ComparisonError::Read {
                        path: item.file_path_baseline.clone(),
                        reason: e.to_string(),
                    }
                    .to_string(),
                );
                ShotState::Done(ShotOutcome::ComparisonFailed)
            }
        }
    }

    async fn compare_once(
        &self,
        item: &ShotItem,
        baseline: Vec<u8>,
        current: Vec<u8>,
    ) -> Result<Comparison, ComparisonError> {
        let _permit = self
            .compare_slots
            .acquire()
            .await
            .map_err(|e| ComparisonError::Encode(e.to_string()))?;

        let engine = Arc::clone(&self.compare);
        let masks = item.mask_regions();
        tokio::task::spawn_blocking(move || engine.compare(&baseline, &current, &masks))
            .await
            .map_err(|e| ComparisonError::Encode(format!("comparison task failed: {}", e)))?
    }

    async fn on_compared(
        &self,
        item: &ShotItem,
        comparison: Comparison,
        current: &[u8],
        attempt: &mut Attempt,
        max_attempts: u32,
    ) -> ShotState {
        attempt.pixel_diff_count = Some(comparison.diff_pixel_count);

        let written = match &comparison.diff_image {
            Some(png) => write_file(&item.file_path_difference, png).await,
            None => remove_stale(&item.file_path_difference).await,
        };
        if let Err(e) = written {
            warn!("Cannot update difference image for {}: {}", item.shot_name, e);
        }

        if item
            .threshold
            .allows(comparison.diff_pixel_count, comparison.total_pixels)
        {
            return ShotState::Done(ShotOutcome::Stable);
        }

        debug!(
            "{}: {} of {} pixels differ (threshold {})",
            item.shot_name, comparison.diff_pixel_count, comparison.total_pixels, item.threshold
        );

        if self.policy.flakiness.compare_after_shot && attempt.count < max_attempts {
            return ShotState::FlakyRetry;
        }

        if self.policy.updates_baselines() {
            if let Err(e) = write_file(&item.file_path_baseline, current).await {
                attempt.error = Some(format!("cannot update baseline: {}", e));
                return ShotState::Done(ShotOutcome::ComparisonFailed);
            }
            info!("Updated baseline for {}", item.shot_name);
        }

        ShotState::Done(ShotOutcome::DifferenceFound)
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await
}

async fn remove_stale(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
