//! Hash-based upload negotiation

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use shotcheck_common::{ExtendedShotItem, PlatformConfig};

use super::{BuildIdentity, PlatformApi, PrepareUploadRequest};
use crate::error::PlatformError;

/// Protocol phase; only ever moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UploadPhase {
    Idle,
    Initialized,
    Prepared,
    Uploaded,
    Finalized,
}

impl std::fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UploadPhase::Idle => "idle",
            UploadPhase::Initialized => "initialized",
            UploadPhase::Prepared => "prepared",
            UploadPhase::Uploaded => "uploaded",
            UploadPhase::Finalized => "finalized",
        };
        f.write_str(name)
    }
}

/// What a negotiation sent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReport {
    /// Distinct hashes offered to the server
    pub offered: usize,
    /// Hashes the server asked for
    pub required: usize,
    /// Names of the uploaded images
    pub uploaded: Vec<String>,
}

impl UploadReport {
    pub fn skipped(&self) -> usize {
        self.offered.saturating_sub(self.uploaded.len())
    }
}

/// Drives `init → prepare_upload → upload_shot* → finalize`
pub struct UploadNegotiator {
    api: Arc<dyn PlatformApi>,
    build: BuildIdentity,
    build_number: String,
    phase: UploadPhase,
    api_token: Option<String>,
    upload_token: Option<String>,
    required: HashSet<String>,
}

impl UploadNegotiator {
    pub fn new(api: Arc<dyn PlatformApi>, config: &PlatformConfig) -> Result<Self, PlatformError> {
        Ok(Self {
            api,
            build: BuildIdentity::from_config(config)?,
            build_number: config.ci_build_number.clone(),
            phase: UploadPhase::Idle,
            api_token: None,
            upload_token: None,
            required: HashSet::new(),
        })
    }

    pub fn phase(&self) -> UploadPhase {
        self.phase
    }

    fn expect_phase(&self, action: &'static str, expected: UploadPhase) -> Result<(), PlatformError> {
        if self.phase != expected {
            return Err(PlatformError::OutOfOrder {
                action,
                phase: self.phase.to_string(),
            });
        }
        Ok(())
    }

    fn token(&self) -> &str {
        self.api_token.as_deref().unwrap_or_default()
    }

    /// Obtain a token and announce the build
    pub async fn init(&mut self) -> Result<(), PlatformError> {
        self.expect_phase("init", UploadPhase::Idle)?;

        let token = self.api.get_api_token().await?;
        self.api.init(&token, &self.build).await?;

        self.api_token = Some(token);
        self.phase = UploadPhase::Initialized;
        Ok(())
    }

    /// Offer every distinct hash; returns the ones the server lacks
    pub async fn prepare(&mut self, shots: &[ExtendedShotItem]) -> Result<Vec<String>, PlatformError> {
        self.expect_phase("prepare upload", UploadPhase::Initialized)?;

        let mut seen = HashSet::new();
        let file_hashes: Vec<String> = shots
            .iter()
            .filter(|s| seen.insert(s.hash.as_str()))
            .map(|s| s.hash.clone())
            .collect();

        let request = PrepareUploadRequest {
            branch_name: self.build.branch_name.clone(),
            commit: self.build.commit.clone(),
            build_number: self.build_number.clone(),
            file_hashes,
        };
        let response = self.api.prepare_upload(self.token(), &request).await?;

        info!(
            "Platform requires {} of {} images",
            response.required_file_hashes.len(),
            request.file_hashes.len()
        );

        self.required = response.required_file_hashes.iter().cloned().collect();
        self.upload_token = Some(response.upload_token);
        self.phase = UploadPhase::Prepared;
        Ok(response.required_file_hashes)
    }

    /// Upload each required hash once
    pub async fn upload(&mut self, shots: &[ExtendedShotItem]) -> Result<UploadReport, PlatformError> {
        self.expect_phase("upload shots", UploadPhase::Prepared)?;

        let upload_token = self.upload_token.clone().unwrap_or_default();
        let mut offered = HashSet::new();
        let mut uploaded_hashes = HashSet::new();
        let mut report = UploadReport {
            required: self.required.len(),
            ..UploadReport::default()
        };

        for shot in shots {
            offered.insert(shot.hash.as_str());
            if !self.required.contains(&shot.hash) || uploaded_hashes.contains(shot.hash.as_str()) {
                debug!("Skipping {} (already on the platform)", shot.unique_name);
                continue;
            }

            self.api
                .upload_shot(
                    self.token(),
                    &upload_token,
                    &shot.unique_name,
                    &shot.item.file_path_current,
                )
                .await?;

            uploaded_hashes.insert(shot.hash.as_str());
            report.uploaded.push(shot.unique_name.clone());
        }

        let missing = self
            .required
            .iter()
            .filter(|h| !uploaded_hashes.contains(h.as_str()))
            .count();
        if missing > 0 {
            warn!("Platform asked for {} hashes this run did not produce", missing);
        }

        report.offered = offered.len();
        self.phase = UploadPhase::Uploaded;
        info!(
            "Uploaded {} images, skipped {}",
            report.uploaded.len(),
            report.skipped()
        );
        Ok(report)
    }

    /// `init`, `prepare` and `upload` in sequence
    pub async fn negotiate(&mut self, shots: &[ExtendedShotItem]) -> Result<UploadReport, PlatformError> {
        self.init().await?;
        self.prepare(shots).await?;
        self.upload(shots).await
    }

    /// Close the build after uploading
    pub async fn finalize(&mut self) -> Result<(), PlatformError> {
        self.expect_phase("finalize", UploadPhase::Uploaded)?;
        self.api.finalize(self.token(), &self.build).await?;
        self.phase = UploadPhase::Finalized;
        Ok(())
    }
}

/// Finalize a build from a separate process, after all runs uploaded
pub async fn finalize_build(api: &dyn PlatformApi, config: &PlatformConfig) -> Result<(), PlatformError> {
    let build = BuildIdentity::from_config(config)?;
    let token = api.get_api_token().await?;
    api.finalize(&token, &build).await?;
    info!("Finalized build {} on {}", build.commit, build.branch_name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::PrepareUploadResponse;
    use async_trait::async_trait;
    use shotcheck_common::{ShotItem, ShotMode, Threshold};
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    /// In-memory platform that remembers every uploaded hash
    #[derive(Default)]
    struct MockPlatform {
        stored: Mutex<HashSet<String>>,
        pending: Mutex<Vec<(String, String)>>,
        calls: Mutex<Vec<String>>,
    }

    impl MockPlatform {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn uploads(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|c| c.strip_prefix("upload:").map(str::to_string))
                .collect()
        }
    }

    #[async_trait]
    impl PlatformApi for MockPlatform {
        async fn get_api_token(&self) -> Result<String, PlatformError> {
            self.calls.lock().unwrap().push("token".into());
            Ok("tok".into())
        }

        async fn init(&self, api_token: &str, _build: &BuildIdentity) -> Result<(), PlatformError> {
            assert_eq!(api_token, "tok");
            self.calls.lock().unwrap().push("init".into());
            Ok(())
        }

        async fn prepare_upload(
            &self,
            _api_token: &str,
            request: &PrepareUploadRequest,
        ) -> Result<PrepareUploadResponse, PlatformError> {
            self.calls.lock().unwrap().push("prepare".into());
            let stored = self.stored.lock().unwrap();
            Ok(PrepareUploadResponse {
                required_file_hashes: request
                    .file_hashes
                    .iter()
                    .filter(|h| !stored.contains(*h))
                    .cloned()
                    .collect(),
                upload_token: "up".into(),
            })
        }

        async fn upload_shot(
            &self,
            _api_token: &str,
            upload_token: &str,
            name: &str,
            file: &Path,
        ) -> Result<(), PlatformError> {
            assert_eq!(upload_token, "up");
            self.calls.lock().unwrap().push(format!("upload:{}", name));
            self.pending
                .lock()
                .unwrap()
                .push((name.to_string(), file.to_string_lossy().to_string()));
            Ok(())
        }

        async fn finalize(&self, _api_token: &str, _build: &BuildIdentity) -> Result<(), PlatformError> {
            self.calls.lock().unwrap().push("finalize".into());
            Ok(())
        }
    }

    impl MockPlatform {
        /// Persist uploads as if the platform processed them
        fn commit(&self, shots: &[ExtendedShotItem]) {
            let pending = std::mem::take(&mut *self.pending.lock().unwrap());
            let mut stored = self.stored.lock().unwrap();
            for (name, _) in pending {
                if let Some(shot) = shots.iter().find(|s| s.unique_name == name) {
                    stored.insert(shot.hash.clone());
                }
            }
        }
    }

    fn shot(name: &str, hash: &str) -> ExtendedShotItem {
        ExtendedShotItem::new(
            ShotItem {
                shot_mode: ShotMode::Storybook,
                id: name.to_string(),
                shot_name: name.to_string(),
                url: "http://localhost".to_string(),
                file_path_baseline: PathBuf::from(format!("b/{name}.png")),
                file_path_current: PathBuf::from(format!("c/{name}.png")),
                file_path_difference: PathBuf::from(format!("d/{name}.png")),
                threshold: Threshold::default(),
                mask: vec![],
                viewport: None,
                wait_before_screenshot: None,
                breakpoint: None,
                breakpoint_group: None,
            },
            hash.to_string(),
        )
    }

    fn config() -> PlatformConfig {
        PlatformConfig {
            url: "https://platform.test/api".into(),
            api_key: "key".into(),
            project_id: "proj".into(),
            repository: "acme/widgets".into(),
            commit_ref_name: "main".into(),
            commit_hash: "abc".into(),
            ci_build_number: "7".into(),
            ..PlatformConfig::default()
        }
    }

    #[tokio::test]
    async fn test_known_hashes_never_uploaded_across_runs() {
        let api = Arc::new(MockPlatform::default());
        api.stored.lock().unwrap().insert("h-known".into());

        let shots = vec![shot("a", "h-a"), shot("b", "h-known"), shot("c", "h-c")];

        let mut first = UploadNegotiator::new(api.clone(), &config()).unwrap();
        let report = first.negotiate(&shots).await.unwrap();
        assert_eq!(report.uploaded, vec!["a", "c"]);
        assert_eq!(report.offered, 3);
        assert_eq!(report.required, 2);
        assert_eq!(report.skipped(), 1);
        api.commit(&shots);

        let mut second = UploadNegotiator::new(api.clone(), &config()).unwrap();
        let report = second.negotiate(&shots).await.unwrap();
        assert!(report.uploaded.is_empty());
        assert_eq!(report.skipped(), 3);

        assert_eq!(api.uploads(), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_duplicate_hash_uploaded_once() {
        let api = Arc::new(MockPlatform::default());
        let shots = vec![shot("left", "same"), shot("right", "same")];

        let mut negotiator = UploadNegotiator::new(api.clone(), &config()).unwrap();
        let required = {
            negotiator.init().await.unwrap();
            negotiator.prepare(&shots).await.unwrap()
        };
        assert_eq!(required, vec!["same"]);

        let report = negotiator.upload(&shots).await.unwrap();
        assert_eq!(report.uploaded, vec!["left"]);
        assert_eq!(report.offered, 1);
    }

    #[tokio::test]
    async fn test_phases_are_monotonic() {
        let api = Arc::new(MockPlatform::default());
        let mut negotiator = UploadNegotiator::new(api.clone(), &config()).unwrap();

        let err = negotiator.prepare(&[]).await.unwrap_err();
        assert!(matches!(err, PlatformError::OutOfOrder { action: "prepare upload", .. }));
        assert!(matches!(
            negotiator.finalize().await,
            Err(PlatformError::OutOfOrder { .. })
        ));

        negotiator.negotiate(&[shot("a", "h")]).await.unwrap();
        assert_eq!(negotiator.phase(), UploadPhase::Uploaded);
        assert!(matches!(negotiator.init().await, Err(PlatformError::OutOfOrder { .. })));

        negotiator.finalize().await.unwrap();
        assert_eq!(negotiator.phase(), UploadPhase::Finalized);
        assert!(matches!(
            negotiator.finalize().await,
            Err(PlatformError::OutOfOrder { .. })
        ));

        assert_eq!(
            api.calls(),
            vec!["token", "init", "prepare", "upload:a", "finalize"]
        );
    }

    #[tokio::test]
    async fn test_finalize_build() {
        let api = MockPlatform::default();
        finalize_build(&api, &config()).await.unwrap();
        assert_eq!(api.calls(), vec!["token", "finalize"]);
    }

    /// Platform that rejects every upload
    struct Rejecting;

    #[async_trait]
    impl PlatformApi for Rejecting {
        async fn get_api_token(&self) -> Result<String, PlatformError> {
            Ok("tok".into())
        }

        async fn init(&self, _: &str, _: &BuildIdentity) -> Result<(), PlatformError> {
            Ok(())
        }

        async fn prepare_upload(
            &self,
            _: &str,
            request: &PrepareUploadRequest,
        ) -> Result<PrepareUploadResponse, PlatformError> {
            Ok(PrepareUploadResponse {
                required_file_hashes: request.file_hashes.clone(),
                upload_token: "up".into(),
            })
        }

        async fn upload_shot(&self, _: &str, _: &str, _: &str, _: &Path) -> Result<(), PlatformError> {
            Err(PlatformError::Status {
                action: "uploadShot",
                status: 500,
                body: "storage unavailable".into(),
            })
        }

        async fn finalize(&self, _: &str, _: &BuildIdentity) -> Result<(), PlatformError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_upload_failure_is_fatal() {
        let mut negotiator = UploadNegotiator::new(Arc::new(Rejecting), &config()).unwrap();
        let err = negotiator.negotiate(&[shot("a", "h")]).await.unwrap_err();
        assert!(matches!(err, PlatformError::Status { status: 500, .. }));
        assert_eq!(negotiator.phase(), UploadPhase::Prepared);
    }
}
