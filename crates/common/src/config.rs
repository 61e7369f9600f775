//! Project configuration
//!
//! Loaded once from `shotcheck.toml` and passed by value to every component.
//! Every field has a default so a config file only names what it changes.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::types::{Mask, Threshold, Viewport};
use crate::CONFIG_FILE_NAME;

/// How a run treats differences and missing baselines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// Record differences without failing; seed missing baselines
    #[default]
    GenerateOnly,
    /// Differences and missing baselines fail the run
    Compare,
    /// Upload current images to the platform, which owns the baselines
    Platform,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::GenerateOnly => write!(f, "generate-only"),
            RunMode::Compare => write!(f, "compare"),
            RunMode::Platform => write!(f, "platform"),
        }
    }
}

/// Browser engine used for captures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// Stage timeouts in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Fetching the story index of a catalog
    pub fetch_stories: u64,
    /// Waiting for the page load state
    pub load_state: u64,
    /// Waiting for network requests to settle
    pub network_requests: u64,
}

impl Timeouts {
    pub fn fetch_stories(&self) -> Duration {
        Duration::from_millis(self.fetch_stories)
    }

    pub fn load_state(&self) -> Duration {
        Duration::from_millis(self.load_state)
    }

    pub fn network_requests(&self) -> Duration {
        Duration::from_millis(self.network_requests)
    }

    /// Upper bound for one whole capture attempt
    pub fn capture_budget(&self) -> Duration {
        Duration::from_millis(self.load_state + self.network_requests)
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            fetch_stories: 30_000,
            load_state: 30_000,
            network_requests: 30_000,
        }
    }
}

/// Shots taken from a component catalog build (Storybook, Ladle, Histoire)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogShots {
    /// URL or local folder of the static catalog build
    pub url: String,

    /// Default breakpoints for every story
    #[serde(default)]
    pub breakpoints: Vec<u32>,

    /// Masks applied to every story
    #[serde(default)]
    pub mask: Vec<Mask>,
}

/// A single page of a page list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageShot {
    /// Path relative to the base URL
    pub path: String,

    /// Shot id
    pub name: String,

    #[serde(default)]
    pub viewport: Option<Viewport>,

    #[serde(default)]
    pub threshold: Option<Threshold>,

    #[serde(default)]
    pub mask: Vec<Mask>,

    #[serde(default)]
    pub wait_before_screenshot: Option<u64>,

    #[serde(default)]
    pub breakpoints: Vec<u32>,
}

/// Shots of arbitrary pages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageShots {
    pub base_url: String,

    #[serde(default)]
    pub pages: Vec<PageShot>,

    #[serde(default)]
    pub breakpoints: Vec<u32>,
}

/// Pre-captured images supplied by the user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomShots {
    /// Directory holding the current PNG images
    pub current_shots_path: PathBuf,
}

/// Story id filters, as regular expressions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Keep only ids matching one of these (all when empty)
    pub include: Vec<String>,
    /// Drop ids matching any of these
    pub exclude: Vec<String>,
}

/// Extra masks for every story whose id matches a pattern
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskRule {
    pub id_pattern: String,
    pub mask: Vec<Mask>,
}

/// Platform connection settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Base URL of the platform API
    pub url: String,
    pub api_key: String,
    pub project_id: String,
    /// `owner/name`
    pub repository: String,
    /// Full ref, e.g. `refs/heads/main`
    pub commit_ref: String,
    /// Branch name, e.g. `main`
    pub commit_ref_name: String,
    pub commit_hash: String,
    pub ci_build_id: String,
    pub ci_build_number: String,
}

impl PlatformConfig {
    /// Split `repository` into owner and name
    pub fn repo_owner_and_name(&self) -> ConfigResult<(String, String)> {
        match self.repository.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() => {
                Ok((owner.to_string(), name.to_string()))
            }
            _ => Err(ConfigError::Invalid(format!(
                "platform.repository must be 'owner/name', got '{}'",
                self.repository
            ))),
        }
    }

    fn missing_properties(&self) -> Vec<String> {
        let required = [
            ("url", &self.url),
            ("api_key", &self.api_key),
            ("project_id", &self.project_id),
            ("repository", &self.repository),
            ("commit_ref_name", &self.commit_ref_name),
            ("commit_hash", &self.commit_hash),
        ];

        required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| format!("platform.{}", name))
            .collect()
    }
}

/// Full project configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShotConfig {
    pub mode: RunMode,
    pub browser: Browser,

    pub storybook_shots: Option<CatalogShots>,
    pub ladle_shots: Option<CatalogShots>,
    pub histoire_shots: Option<CatalogShots>,
    pub page_shots: Option<PageShots>,
    pub custom_shots: Option<CustomShots>,

    pub image_path_baseline: PathBuf,
    pub image_path_current: PathBuf,
    pub image_path_difference: PathBuf,

    /// Concurrent captures
    pub shot_concurrency: usize,
    /// Concurrent comparisons
    pub compare_concurrency: usize,

    pub timeouts: Timeouts,

    /// Milliseconds to wait before each screenshot
    pub wait_before_screenshot: u64,
    /// Milliseconds to wait for the first network request
    pub wait_for_first_request: u64,
    /// Milliseconds of network quiet before capturing
    pub wait_for_last_request: u64,

    pub pixel_difference_threshold: Threshold,

    /// Re-capture on a difference before reporting it
    pub compare_after_shot: bool,
    pub flakyness_retries: u32,
    /// Milliseconds between flakiness retries
    pub wait_between_flakyness_retries: u64,

    /// Fail generate-only runs on differences
    pub fail_on_difference: bool,

    pub filter: FilterConfig,
    pub mask_rules: Vec<MaskRule>,

    pub platform: Option<PlatformConfig>,
}

impl Default for ShotConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::GenerateOnly,
            browser: Browser::Chromium,
            storybook_shots: None,
            ladle_shots: None,
            histoire_shots: None,
            page_shots: None,
            custom_shots: None,
            image_path_baseline: PathBuf::from(".shotcheck/baseline"),
            image_path_current: PathBuf::from(".shotcheck/current"),
            image_path_difference: PathBuf::from(".shotcheck/difference"),
            shot_concurrency: 5,
            compare_concurrency: 10,
            timeouts: Timeouts::default(),
            wait_before_screenshot: 1_000,
            wait_for_first_request: 1_000,
            wait_for_last_request: 1_000,
            pixel_difference_threshold: Threshold::Pixels(0),
            compare_after_shot: false,
            flakyness_retries: 5,
            wait_between_flakyness_retries: 2_000,
            fail_on_difference: false,
            filter: FilterConfig::default(),
            mask_rules: Vec::new(),
            platform: None,
        }
    }
}

/// Environment variables filling empty platform settings
const PLATFORM_ENV: [&str; 8] = [
    "SHOTCHECK_API_KEY",
    "SHOTCHECK_PROJECT_ID",
    "GITHUB_REPOSITORY",
    "GITHUB_REF",
    "GITHUB_REF_NAME",
    "GITHUB_SHA",
    "GITHUB_RUN_ID",
    "GITHUB_RUN_NUMBER",
];

fn platform_env_slot<'a>(platform: &'a mut PlatformConfig, key: &str) -> Option<&'a mut String> {
    match key {
        "SHOTCHECK_API_KEY" => Some(&mut platform.api_key),
        "SHOTCHECK_PROJECT_ID" => Some(&mut platform.project_id),
        "GITHUB_REPOSITORY" => Some(&mut platform.repository),
        "GITHUB_REF" => Some(&mut platform.commit_ref),
        "GITHUB_REF_NAME" => Some(&mut platform.commit_ref_name),
        "GITHUB_SHA" => Some(&mut platform.commit_hash),
        "GITHUB_RUN_ID" => Some(&mut platform.ci_build_id),
        "GITHUB_RUN_NUMBER" => Some(&mut platform.ci_build_number),
        _ => None,
    }
}

impl ShotConfig {
    /// Load and validate `shotcheck.toml` from a directory
    pub fn load(dir: &Path) -> ConfigResult<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        info!("Loading project configuration from {}", path.display());

        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }

        let content = std::fs::read_to_string(&path)?;
        let mut config = Self::parse(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a config without validating it
    pub fn parse(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Fill empty platform settings from the environment.
    ///
    /// Values already present in the file win.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.platform.is_none() && self.mode != RunMode::Platform {
            return;
        }

        let platform = self.platform.get_or_insert_with(PlatformConfig::default);
        for key in PLATFORM_ENV {
            let Some(slot) = platform_env_slot(platform, key) else {
                continue;
            };
            if slot.trim().is_empty() {
                if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                    debug!("Using {} from environment", key);
                    *slot = value;
                }
            }
        }
    }

    /// Check required settings, reporting every missing property at once
    pub fn validate(&self) -> ConfigResult<()> {
        let mut missing = Vec::new();

        if self.storybook_shots.is_none()
            && self.ladle_shots.is_none()
            && self.histoire_shots.is_none()
            && self.page_shots.is_none()
            && self.custom_shots.is_none()
        {
            missing.push(
                "storybook_shots | ladle_shots | histoire_shots | page_shots | custom_shots"
                    .to_string(),
            );
        }

        if self.mode == RunMode::Platform {
            match &self.platform {
                Some(platform) => missing.extend(platform.missing_properties()),
                None => missing.push("platform".to_string()),
            }
        }

        if !missing.is_empty() {
            return Err(ConfigError::MissingProperties(missing));
        }

        if self.shot_concurrency == 0 {
            return Err(ConfigError::Invalid("shot_concurrency must be at least 1".into()));
        }
        if self.compare_concurrency == 0 {
            return Err(ConfigError::Invalid("compare_concurrency must be at least 1".into()));
        }

        if let Some(platform) = &self.platform {
            if self.mode == RunMode::Platform {
                platform.repo_owner_and_name()?;
            }
        }

        Ok(())
    }

    pub fn wait_between_retries(&self) -> Duration {
        Duration::from_millis(self.wait_between_flakyness_retries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ShotConfig::default();
        assert_eq!(config.shot_concurrency, 5);
        assert_eq!(config.compare_concurrency, 10);
        assert_eq!(config.mode, RunMode::GenerateOnly);
        assert_eq!(config.pixel_difference_threshold, Threshold::Pixels(0));
        assert_eq!(config.timeouts.load_state, 30_000);
        assert_eq!(config.flakyness_retries, 5);
    }

    #[test]
    fn test_parse_minimal() {
        let config = ShotConfig::parse(
            r#"
[storybook_shots]
url = "./storybook-static"
breakpoints = [320, 768]
"#,
        )
        .unwrap();

        let shots = config.storybook_shots.as_ref().unwrap();
        assert_eq!(shots.url, "./storybook-static");
        assert_eq!(shots.breakpoints, vec![320, 768]);
        assert_eq!(config.image_path_baseline, PathBuf::from(".shotcheck/baseline"));
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_full() {
        let config = ShotConfig::parse(
            r#"
mode = "compare"
browser = "firefox"
compare_after_shot = true
flakyness_retries = 5
wait_between_flakyness_retries = 500
pixel_difference_threshold = 0.01

[page_shots]
base_url = "http://localhost:3000"

[[page_shots.pages]]
path = "/"
name = "home"
mask = [{ selector = ".clock" }]

[filter]
exclude = ["^internal-"]

[[mask_rules]]
id_pattern = "^dashboard"
mask = [{ x = 0, y = 0, width = 100, height = 20 }]
"#,
        )
        .unwrap();

        assert_eq!(config.mode, RunMode::Compare);
        assert_eq!(config.browser, Browser::Firefox);
        assert_eq!(config.flakyness_retries, 5);
        assert_eq!(config.pixel_difference_threshold, Threshold::Ratio(0.01));
        assert_eq!(config.page_shots.as_ref().unwrap().pages[0].mask.len(), 1);
        assert_eq!(config.filter.exclude, vec!["^internal-".to_string()]);
        assert_eq!(config.mask_rules.len(), 1);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_requires_a_source() {
        let err = ShotConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingProperties(_)));
    }

    #[test]
    fn test_validate_platform_lists_all_missing() {
        let config = ShotConfig::parse(
            r#"
mode = "platform"

[custom_shots]
current_shots_path = "shots"

[platform]
url = "https://platform.test/api"
api_key = "key"
"#,
        )
        .unwrap();

        match config.validate().unwrap_err() {
            ConfigError::MissingProperties(missing) => {
                assert_eq!(
                    missing,
                    vec![
                        "platform.project_id",
                        "platform.repository",
                        "platform.commit_ref_name",
                        "platform.commit_hash",
                    ]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_env_overrides_fill_only_empty_fields() {
        let mut config = ShotConfig::parse(
            r#"
mode = "platform"

[custom_shots]
current_shots_path = "shots"

[platform]
url = "https://platform.test/api"
project_id = "from-file"
"#,
        )
        .unwrap();

        let env: HashMap<&str, &str> = [
            ("SHOTCHECK_API_KEY", "secret"),
            ("SHOTCHECK_PROJECT_ID", "from-env"),
            ("GITHUB_REPOSITORY", "acme/widgets"),
            ("GITHUB_REF_NAME", "main"),
            ("GITHUB_SHA", "abc123"),
        ]
        .into_iter()
        .collect();

        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        let platform = config.platform.as_ref().unwrap();
        assert_eq!(platform.api_key, "secret");
        assert_eq!(platform.project_id, "from-file");
        assert_eq!(
            platform.repo_owner_and_name().unwrap(),
            ("acme".to_string(), "widgets".to_string())
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ShotConfig::load(dir.path()).unwrap_err(),
            ConfigError::NotFound(_)
        ));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = ShotConfig::default();
        config.custom_shots = Some(CustomShots {
            current_shots_path: PathBuf::from("shots"),
        });
        config.shot_concurrency = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
