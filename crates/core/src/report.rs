//! JSON run report

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::orchestrator::ShotResult;
use crate::platform::UploadReport;
use crate::summary::Summary;

pub const REPORT_FILE_NAME: &str = "shotcheck-report.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub summary: Summary,
    pub results: Vec<ShotResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload: Option<UploadReport>,
}

impl RunReport {
    pub fn new(summary: Summary, results: Vec<ShotResult>) -> Self {
        Self {
            version: shotcheck_common::VERSION.to_string(),
            generated_at: Utc::now(),
            summary,
            results,
            upload: None,
        }
    }

    pub fn with_upload(mut self, upload: UploadReport) -> Self {
        self.upload = Some(upload);
        self
    }

    /// Report location: next to the current image directory
    pub fn default_path(current_root: &Path) -> PathBuf {
        current_root
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .join(REPORT_FILE_NAME)
    }

    pub fn write(&self, path: &Path) -> Result<PathBuf> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;

        info!("Report written to: {}", path.display());
        Ok(path.to_path_buf())
    }
}
