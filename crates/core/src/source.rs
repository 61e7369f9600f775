//! Story sources
//!
//! A source enumerates raw story descriptors. Sources never build shot
//! items themselves; that is the builder's job.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use shotcheck_common::{
    resolve_target_url, CatalogShots, Mask, PageShots, ShotConfig, ShotMode, StoryDescriptor,
    Threshold, Viewport,
};

use crate::error::SourceError;

/// Producer of story descriptors
#[async_trait]
pub trait StorySource: Send + Sync {
    /// Human-readable name for logs
    fn name(&self) -> String;

    /// List descriptors. An empty list is a valid answer.
    async fn list(&self) -> Result<Vec<StoryDescriptor>, SourceError>;
}

/// Resolve a catalog location (URL or folder) into a URL
pub fn catalog_url(location: &str) -> String {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    resolve_target_url(location, &cwd)
}

/// URL of the Storybook iframe document
pub fn iframe_url(catalog: &str) -> String {
    format!("{}/iframe.html", catalog.trim_end_matches('/'))
}

/// Join a base URL and a page path with exactly one slash
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Per-story options read from `parameters.shotcheck`
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct StoryOptions {
    disable: bool,
    viewport: Option<Viewport>,
    threshold: Option<Threshold>,
    mask: Vec<Mask>,
    wait_before_screenshot: Option<u64>,
    breakpoints: Vec<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct CatalogIndex {
    #[serde(default)]
    entries: BTreeMap<String, CatalogEntry>,
    #[serde(default)]
    stories: BTreeMap<String, CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, alias = "kind")]
    title: Option<String>,
    #[serde(default, alias = "story")]
    name: Option<String>,
    #[serde(default, rename = "type")]
    entry_type: Option<String>,
    #[serde(default)]
    parameters: BTreeMap<String, serde_json::Value>,
}

/// Stories from a static Storybook, Ladle or Histoire build
pub struct CatalogSource {
    mode: ShotMode,
    url: String,
    breakpoints: Vec<u32>,
    mask: Vec<Mask>,
    fetch_timeout: Duration,
    http: reqwest::Client,
}

impl CatalogSource {
    pub fn new(mode: ShotMode, shots: &CatalogShots, fetch_timeout: Duration) -> Self {
        Self {
            mode,
            url: catalog_url(&shots.url),
            breakpoints: shots.breakpoints.clone(),
            mask: shots.mask.clone(),
            fetch_timeout,
            http: reqwest::Client::new(),
        }
    }

    /// Index documents to look for, most specific first
    fn index_files(&self) -> &'static [&'static str] {
        match self.mode {
            ShotMode::Storybook => &["index.json", "stories.json"],
            ShotMode::Ladle => &["meta.json"],
            _ => &["index.json"],
        }
    }

    /// URL that renders a single story
    fn story_url(&self, id: &str) -> String {
        match self.mode {
            ShotMode::Ladle => format!("{}/?story={}&mode=preview", self.url.trim_end_matches('/'), id),
            ShotMode::Histoire => join_url(&self.url, &format!("__sandbox.html?storyId={}", id)),
            _ => format!("{}?id={}&viewMode=story", iframe_url(&self.url), id),
        }
    }

    async fn fetch_index(&self) -> Result<String, SourceError> {
        for file in self.index_files() {
            let location = join_url(&self.url, file);
            debug!("Looking for story index at {}", location);

            if let Some(path) = file_url_path(&location) {
                match tokio::fs::read_to_string(path).await {
                    Ok(content) => return Ok(content),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                }
            }

            let response = match self.http.get(&location).timeout(self.fetch_timeout).send().await {
                Ok(response) => response,
                Err(e) if e.is_timeout() => {
                    return Err(SourceError::Timeout {
                        url: location,
                        after: self.fetch_timeout,
                    })
                }
                Err(e) => {
                    return Err(SourceError::InvalidSource(format!(
                        "Invalid url {}: {}",
                        self.url, e
                    )))
                }
            };

            if !response.status().is_success() {
                debug!("{} returned {}", location, response.status());
                continue;
            }

            return response.text().await.map_err(|e| {
                SourceError::InvalidSource(format!("Invalid url {}: {}", self.url, e))
            });
        }

        Err(SourceError::InvalidSource(format!(
            "Invalid url {}: no story index found",
            self.url
        )))
    }

    fn parse_index(&self, content: &str) -> Result<Vec<StoryDescriptor>, SourceError> {
        let index: CatalogIndex = serde_json::from_str(content)?;
        let entries = if index.entries.is_empty() {
            index.stories
        } else {
            index.entries
        };

        let mut descriptors = Vec::with_capacity(entries.len());
        for (key, entry) in entries {
            if entry.entry_type.as_deref() == Some("docs") {
                continue;
            }

            let options: StoryOptions = match entry.parameters.get("shotcheck") {
                Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|e| {
                    warn!("Ignoring invalid shotcheck parameters on '{}': {}", key, e);
                    StoryOptions::default()
                }),
                None => StoryOptions::default(),
            };

            if options.disable {
                debug!("Story '{}' disabled by parameters", key);
                continue;
            }

            let id = entry.id.unwrap_or(key);
            let mut mask = self.mask.clone();
            mask.extend(options.mask);

            descriptors.push(StoryDescriptor {
                mode: self.mode,
                url: Some(self.story_url(&id)),
                id: Some(id),
                kind: entry.title,
                story: entry.name,
                parameters: entry.parameters,
                viewport: options.viewport,
                mask,
                wait_before_screenshot: options.wait_before_screenshot,
                threshold: options.threshold,
                breakpoints: if options.breakpoints.is_empty() {
                    self.breakpoints.clone()
                } else {
                    options.breakpoints
                },
            });
        }

        Ok(descriptors)
    }
}

#[async_trait]
impl StorySource for CatalogSource {
    fn name(&self) -> String {
        format!("{} at {}", self.mode, self.url)
    }

    async fn list(&self) -> Result<Vec<StoryDescriptor>, SourceError> {
        let content = self.fetch_index().await?;
        let descriptors = self.parse_index(&content)?;
        info!("Found {} {} stories", descriptors.len(), self.mode);
        Ok(descriptors)
    }
}

/// Fixed list of pages
pub struct PageSource {
    shots: PageShots,
}

impl PageSource {
    pub fn new(shots: PageShots) -> Self {
        Self { shots }
    }
}

#[async_trait]
impl StorySource for PageSource {
    fn name(&self) -> String {
        format!("pages at {}", self.shots.base_url)
    }

    async fn list(&self) -> Result<Vec<StoryDescriptor>, SourceError> {
        if url::Url::parse(&self.shots.base_url).is_err() {
            return Err(SourceError::InvalidSource(format!(
                "Invalid base url {}",
                self.shots.base_url
            )));
        }

        Ok(self
            .shots
            .pages
            .iter()
            .map(|page| StoryDescriptor {
                mode: ShotMode::Page,
                id: Some(page.name.clone()),
                kind: None,
                story: None,
                url: Some(join_url(&self.shots.base_url, &page.path)),
                parameters: BTreeMap::new(),
                viewport: page.viewport,
                mask: page.mask.clone(),
                wait_before_screenshot: page.wait_before_screenshot,
                threshold: page.threshold,
                breakpoints: if page.breakpoints.is_empty() {
                    self.shots.breakpoints.clone()
                } else {
                    page.breakpoints.clone()
                },
            })
            .collect())
    }
}

/// Pre-captured PNG images in a directory
pub struct CustomShotsSource {
    dir: PathBuf,
}

impl CustomShotsSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl StorySource for CustomShotsSource {
    fn name(&self) -> String {
        format!("custom shots in {}", self.dir.display())
    }

    async fn list(&self) -> Result<Vec<StoryDescriptor>, SourceError> {
        if !self.dir.is_dir() {
            return Err(SourceError::InvalidSource(format!(
                "Custom shots directory not found: {}",
                self.dir.display()
            )));
        }

        let mut paths: Vec<PathBuf> = walkdir::WalkDir::new(&self.dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|p| p.is_file() && p.extension().map(|ext| ext == "png").unwrap_or(false))
            .collect();
        paths.sort();

        Ok(paths
            .into_iter()
            .filter_map(|path| {
                let stem = path.file_stem()?.to_string_lossy().to_string();
                Some(StoryDescriptor::new(ShotMode::Custom).with_id(stem).with_url(path.to_string_lossy()))
            })
            .collect())
    }
}

/// Source backed by a user function
pub struct FnSource<F> {
    name: String,
    f: F,
}

impl<F> FnSource<F>
where
    F: Fn() -> Result<Vec<StoryDescriptor>, SourceError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

#[async_trait]
impl<F> StorySource for FnSource<F>
where
    F: Fn() -> Result<Vec<StoryDescriptor>, SourceError> + Send + Sync,
{
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn list(&self) -> Result<Vec<StoryDescriptor>, SourceError> {
        (self.f)()
    }
}

/// Every source the configuration enables
pub fn sources_from_config(config: &ShotConfig) -> Vec<Box<dyn StorySource>> {
    let mut sources: Vec<Box<dyn StorySource>> = Vec::new();
    let fetch_timeout = config.timeouts.fetch_stories();

    let catalogs = [
        (ShotMode::Storybook, &config.storybook_shots),
        (ShotMode::Ladle, &config.ladle_shots),
        (ShotMode::Histoire, &config.histoire_shots),
    ];
    for (mode, shots) in catalogs {
        if let Some(shots) = shots {
            sources.push(Box::new(CatalogSource::new(mode, shots, fetch_timeout)));
        }
    }

    if let Some(pages) = &config.page_shots {
        sources.push(Box::new(PageSource::new(pages.clone())));
    }

    if let Some(custom) = &config.custom_shots {
        sources.push(Box::new(CustomShotsSource::new(&custom.current_shots_path)));
    }

    sources
}

/// List every source in order
pub async fn collect_descriptors(
    sources: &[Box<dyn StorySource>],
) -> Result<Vec<StoryDescriptor>, SourceError> {
    let mut all = Vec::new();
    for source in sources {
        let descriptors = source.list().await?;
        if descriptors.is_empty() {
            warn!("No stories found in {}", source.name());
        }
        all.extend(descriptors);
    }
    Ok(all)
}

/// Directory part of a `file://` URL
pub fn file_url_path(url: &str) -> Option<&Path> {
    url.strip_prefix("file://").map(Path::new)
}
