//! Platform upload protocol
//!
//! The platform owns baselines in platform mode. A run announces its build,
//! offers the content hashes of its current images, and uploads only the
//! images whose hashes the server asks for.

mod client;
mod negotiator;

pub use client::PlatformClient;
pub use negotiator::{finalize_build, UploadNegotiator, UploadPhase, UploadReport};

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use shotcheck_common::PlatformConfig;

use crate::error::PlatformError;

/// Identifies the build in `init` and `finalize`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildIdentity {
    pub project_id: String,
    pub branch_name: String,
    pub repo_owner: String,
    pub repo_name: String,
    pub commit: String,
}

impl BuildIdentity {
    pub fn from_config(config: &PlatformConfig) -> Result<Self, PlatformError> {
        let (repo_owner, repo_name) = config.repo_owner_and_name()?;
        Ok(Self {
            project_id: config.project_id.clone(),
            branch_name: config.commit_ref_name.clone(),
            repo_owner,
            repo_name,
            commit: config.commit_hash.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareUploadRequest {
    pub branch_name: String,
    pub commit: String,
    pub build_number: String,
    pub file_hashes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareUploadResponse {
    /// Hashes the server does not have yet
    pub required_file_hashes: Vec<String>,
    pub upload_token: String,
}

/// Remote platform operations
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// Exchange the API key for a bearer token
    async fn get_api_token(&self) -> Result<String, PlatformError>;

    async fn init(&self, api_token: &str, build: &BuildIdentity) -> Result<(), PlatformError>;

    async fn prepare_upload(
        &self,
        api_token: &str,
        request: &PrepareUploadRequest,
    ) -> Result<PrepareUploadResponse, PlatformError>;

    async fn upload_shot(
        &self,
        api_token: &str,
        upload_token: &str,
        name: &str,
        file: &Path,
    ) -> Result<(), PlatformError>;

    async fn finalize(&self, api_token: &str, build: &BuildIdentity) -> Result<(), PlatformError>;
}
