//! HTTP client for the platform API

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};

use shotcheck_common::PlatformConfig;

use super::{BuildIdentity, PlatformApi, PrepareUploadRequest, PrepareUploadResponse};
use crate::error::PlatformError;

const API_VERSION: &str = "3";
const API_VERSION_WARNING: &str = "x-api-version-warning";

/// Platform endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApiAction {
    GetApiToken,
    Init,
    Finalize,
    PrepareUpload,
    UploadShot,
}

impl ApiAction {
    fn name(self) -> &'static str {
        match self {
            ApiAction::GetApiToken => "getApiToken",
            ApiAction::Init => "init",
            ApiAction::Finalize => "finalize",
            ApiAction::PrepareUpload => "prepareUpload",
            ApiAction::UploadShot => "uploadShot",
        }
    }

    fn route(self) -> &'static str {
        match self {
            ApiAction::GetApiToken => "/auth/get-api-token",
            ApiAction::Init => "/app/init",
            ApiAction::Finalize => "/app/finalize",
            ApiAction::PrepareUpload => "/file/prepare-upload",
            ApiAction::UploadShot => "/file/upload-shot",
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiTokenRequest<'a> {
    api_key: &'a str,
    project_identifier: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiTokenResponse {
    api_token: String,
}

pub struct PlatformClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    project_id: String,
}

impl PlatformClient {
    pub fn new(config: &PlatformConfig) -> Result<Self, PlatformError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|source| PlatformError::Request {
                action: "connect",
                source,
            })?;

        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            project_id: config.project_id.clone(),
        })
    }

    fn post(&self, action: ApiAction, api_token: Option<&str>) -> reqwest::RequestBuilder {
        let request = self
            .http
            .post(format!("{}{}", self.base_url, action.route()))
            .header("x-api-version", API_VERSION);

        match api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a request and check the status
    async fn send(
        &self,
        action: ApiAction,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, PlatformError> {
        let action = action.name();
        info!("Sending to API [{}]", action);

        let response = request.send().await.map_err(|source| {
            error!("Request [{}] failed: {}", action, source);
            PlatformError::Request { action, source }
        })?;

        if let Some(warning) = response.headers().get(API_VERSION_WARNING) {
            warn!("{}", warning.to_str().unwrap_or("platform API version is outdated"));
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("API response [{}] {}: {}", action, status, body);
            return Err(PlatformError::Status {
                action,
                status: status.as_u16(),
                body,
            });
        }

        info!("Successfully sent to API [{}]", action);
        Ok(response)
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        action: ApiAction,
        request: reqwest::RequestBuilder,
    ) -> Result<T, PlatformError> {
        self.send(action, request)
            .await?
            .json()
            .await
            .map_err(|source| PlatformError::Request {
                action: action.name(),
                source,
            })
    }
}

#[async_trait]
impl PlatformApi for PlatformClient {
    async fn get_api_token(&self) -> Result<String, PlatformError> {
        let body = ApiTokenRequest {
            api_key: &self.api_key,
            project_identifier: &self.project_id,
        };
        let response: ApiTokenResponse = self
            .send_json(ApiAction::GetApiToken, self.post(ApiAction::GetApiToken, None).json(&body))
            .await?;
        Ok(response.api_token)
    }

    async fn init(&self, api_token: &str, build: &BuildIdentity) -> Result<(), PlatformError> {
        self.send(ApiAction::Init, self.post(ApiAction::Init, Some(api_token)).json(build))
            .await
            .map(|_| ())
    }

    async fn prepare_upload(
        &self,
        api_token: &str,
        request: &PrepareUploadRequest,
    ) -> Result<PrepareUploadResponse, PlatformError> {
        self.send_json(
            ApiAction::PrepareUpload,
            self.post(ApiAction::PrepareUpload, Some(api_token)).json(request),
        )
        .await
    }

    async fn upload_shot(
        &self,
        api_token: &str,
        upload_token: &str,
        name: &str,
        file: &Path,
    ) -> Result<(), PlatformError> {
        let file_err = |source| PlatformError::File {
            path: file.to_path_buf(),
            source,
        };

        let handle = tokio::fs::File::open(file).await.map_err(file_err)?;
        let length = handle.metadata().await.map_err(file_err)?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(handle));

        let part = Part::stream_with_length(body, length)
            .file_name(format!("{}.png", name))
            .mime_str("image/png")
            .map_err(|source| PlatformError::Request {
                action: ApiAction::UploadShot.name(),
                source,
            })?;

        let form = Form::new()
            .text("uploadToken", upload_token.to_string())
            .text("name", name.to_string())
            .part("file", part);

        self.send(
            ApiAction::UploadShot,
            self.post(ApiAction::UploadShot, Some(api_token)).multipart(form),
        )
            .await
            .map(|_| ())
    }

    async fn finalize(&self, api_token: &str, build: &BuildIdentity) -> Result<(), PlatformError> {
        self.send(ApiAction::Finalize, self.post(ApiAction::Finalize, Some(api_token)).json(build))
            .await
            .map(|_| ())
    }
}
