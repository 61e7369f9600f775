//! Core types for shotcheck

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Capture strategy of a shot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShotMode {
    Storybook,
    Ladle,
    Histoire,
    Page,
    Custom,
}

impl ShotMode {
    /// Whether the shot comes from a component catalog build
    pub fn is_catalog(&self) -> bool {
        matches!(self, ShotMode::Storybook | ShotMode::Ladle | ShotMode::Histoire)
    }
}

impl std::fmt::Display for ShotMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShotMode::Storybook => write!(f, "storybook"),
            ShotMode::Ladle => write!(f, "ladle"),
            ShotMode::Histoire => write!(f, "histoire"),
            ShotMode::Page => write!(f, "page"),
            ShotMode::Custom => write!(f, "custom"),
        }
    }
}

/// Browser viewport. A missing height lets the page decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// Pixel rectangle in image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x
            && y >= self.y
            && (x - self.x) < self.width
            && (y - self.y) < self.height
    }
}

/// Region excluded from comparison.
///
/// Selectors are painted over by the browser at capture time; rectangles are
/// skipped by the comparator when counting differing pixels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Mask {
    Selector { selector: String },
    Region(Rect),
}

impl Mask {
    pub fn selector(&self) -> Option<&str> {
        match self {
            Mask::Selector { selector } => Some(selector),
            Mask::Region(_) => None,
        }
    }

    pub fn region(&self) -> Option<Rect> {
        match self {
            Mask::Region(rect) => Some(*rect),
            Mask::Selector { .. } => None,
        }
    }
}

/// Allowed amount of differing pixels.
///
/// Written as a plain number: integers are absolute pixel counts, values in
/// `[0, 1)` are a fraction of the image area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Threshold {
    Pixels(u64),
    Ratio(f64),
}

impl Threshold {
    /// Whether `diff` differing pixels out of `total` are within tolerance
    pub fn allows(&self, diff: u64, total: u64) -> bool {
        match *self {
            Threshold::Pixels(max) => diff <= max,
            Threshold::Ratio(ratio) => {
                if total == 0 {
                    return diff == 0;
                }
                (diff as f64 / total as f64) <= ratio
            }
        }
    }

    fn from_number(value: f64) -> Result<Self, String> {
        if !value.is_finite() || value < 0.0 {
            return Err(format!("threshold must be a non-negative number, got {}", value));
        }
        if value < 1.0 && value.fract() != 0.0 {
            Ok(Threshold::Ratio(value))
        } else if value.fract() == 0.0 {
            Ok(Threshold::Pixels(value as u64))
        } else {
            Err(format!(
                "threshold {} is neither a pixel count nor a ratio below 1",
                value
            ))
        }
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Threshold::Pixels(0)
    }
}

impl std::fmt::Display for Threshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Threshold::Pixels(n) => write!(f, "{} px", n),
            Threshold::Ratio(r) => write!(f, "{:.2}%", r * 100.0),
        }
    }
}

impl Serialize for Threshold {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match *self {
            Threshold::Pixels(n) => serializer.serialize_u64(n),
            Threshold::Ratio(r) => serializer.serialize_f64(r),
        }
    }
}

impl<'de> Deserialize<'de> for Threshold {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Threshold::from_number(value).map_err(serde::de::Error::custom)
    }
}

/// Raw story descriptor as produced by a story source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryDescriptor {
    pub mode: ShotMode,

    /// Framework id, when the source provides one
    #[serde(default)]
    pub id: Option<String>,

    /// Component title / story kind
    #[serde(default)]
    pub kind: Option<String>,

    /// Story name within its kind
    #[serde(default)]
    pub story: Option<String>,

    /// Target URL or file path
    #[serde(default)]
    pub url: Option<String>,

    /// Free-form framework parameters
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,

    #[serde(default)]
    pub viewport: Option<Viewport>,

    #[serde(default)]
    pub mask: Vec<Mask>,

    /// Milliseconds to wait before taking the screenshot
    #[serde(default)]
    pub wait_before_screenshot: Option<u64>,

    #[serde(default)]
    pub threshold: Option<Threshold>,

    /// Viewport widths this story is rendered at
    #[serde(default)]
    pub breakpoints: Vec<u32>,
}

impl StoryDescriptor {
    pub fn new(mode: ShotMode) -> Self {
        Self {
            mode,
            id: None,
            kind: None,
            story: None,
            url: None,
            parameters: BTreeMap::new(),
            viewport: None,
            mask: Vec::new(),
            wait_before_screenshot: None,
            threshold: None,
            breakpoints: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Canonical id: the framework id, else `kind--story`, else the URL
    pub fn canonical_id(&self) -> Option<String> {
        if let Some(id) = self.id.as_deref().filter(|id| !id.trim().is_empty()) {
            return Some(id.trim().to_string());
        }
        match (self.kind.as_deref(), self.story.as_deref()) {
            (Some(kind), Some(story)) => Some(format!("{}--{}", slugify(kind), slugify(story))),
            (Some(kind), None) => Some(slugify(kind)),
            (None, _) => self.url.as_deref().map(slugify).filter(|s| !s.is_empty()),
        }
    }
}

/// A unit of screenshot-compare work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotItem {
    pub shot_mode: ShotMode,
    pub id: String,
    pub shot_name: String,
    pub url: String,
    pub file_path_baseline: PathBuf,
    pub file_path_current: PathBuf,
    pub file_path_difference: PathBuf,
    pub threshold: Threshold,
    #[serde(default)]
    pub mask: Vec<Mask>,
    #[serde(default)]
    pub viewport: Option<Viewport>,
    #[serde(default)]
    pub wait_before_screenshot: Option<u64>,
    #[serde(default)]
    pub breakpoint: Option<u32>,
    #[serde(default)]
    pub breakpoint_group: Option<String>,
}

impl ShotItem {
    /// Rectangles the comparator must ignore
    pub fn mask_regions(&self) -> Vec<Rect> {
        self.mask.iter().filter_map(Mask::region).collect()
    }

    /// Selectors the browser must paint over
    pub fn mask_selectors(&self) -> Vec<&str> {
        self.mask.iter().filter_map(Mask::selector).collect()
    }
}

/// A shot item whose current image was captured
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedShotItem {
    #[serde(flatten)]
    pub item: ShotItem,

    /// Name the image is uploaded under
    pub unique_name: String,

    /// SHA-256 of the captured current image
    pub hash: String,
}

impl ExtendedShotItem {
    pub fn new(item: ShotItem, hash: String) -> Self {
        let unique_name = item.shot_name.clone();
        Self { item, unique_name, hash }
    }
}

/// Lowercase, dash-separated form of a label
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;

    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    slug
}

/// Replace characters that are unsafe in file names
pub fn sanitize_shot_name(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Shot name for one breakpoint of a group
pub fn breakpoint_shot_name(shot_name: &str, width: u32) -> String {
    format!("{}__w{}px", shot_name, width)
}

/// Image path for a shot under an output root
pub fn shot_file_path(root: &Path, shot_name: &str) -> PathBuf {
    root.join(format!("{}.png", shot_name))
}

const KNOWN_SCHEMES: [&str; 3] = ["http", "https", "file"];

/// Resolve a configured target into an absolute URL.
///
/// URLs with a recognised scheme are kept; paths become `file://` URLs,
/// relative ones anchored at `cwd`.
pub fn resolve_target_url(target: &str, cwd: &Path) -> String {
    if let Ok(parsed) = url::Url::parse(target) {
        if KNOWN_SCHEMES.contains(&parsed.scheme()) {
            return target.to_string();
        }
    }

    let path = Path::new(target);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };

    format!("file://{}", absolute.to_string_lossy())
}
