//! Shot item construction
//!
//! Turns raw descriptors into shot items: derives ids, expands breakpoints,
//! applies filters and extra mask regions, and lays out image paths.

use std::collections::HashMap;
use std::path::PathBuf;

use regex::Regex;
use tracing::debug;

use shotcheck_common::{
    breakpoint_shot_name, resolve_target_url, sanitize_shot_name, shot_file_path, FilterConfig,
    Mask, MaskRule, ShotConfig, ShotItem, StoryDescriptor, Threshold, Viewport,
};

use crate::error::BuildError;

/// Everything the builder needs from the configuration
#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub baseline_root: PathBuf,
    pub current_root: PathBuf,
    pub difference_root: PathBuf,
    pub default_threshold: Threshold,
    pub default_wait: u64,
    /// Anchor for relative target paths
    pub cwd: PathBuf,
}

impl BuildSettings {
    pub fn from_config(config: &ShotConfig) -> Self {
        Self {
            baseline_root: config.image_path_baseline.clone(),
            current_root: config.image_path_current.clone(),
            difference_root: config.image_path_difference.clone(),
            default_threshold: config.pixel_difference_threshold,
            default_wait: config.wait_before_screenshot,
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

/// Decides whether a descriptor becomes a shot
pub trait DescriptorFilter: Send + Sync {
    fn keep(&self, id: &str, descriptor: &StoryDescriptor) -> bool;
}

impl<F> DescriptorFilter for F
where
    F: Fn(&str, &StoryDescriptor) -> bool + Send + Sync,
{
    fn keep(&self, id: &str, descriptor: &StoryDescriptor) -> bool {
        self(id, descriptor)
    }
}

/// Supplies extra mask regions for a descriptor
pub trait RegionProvider: Send + Sync {
    fn masks(&self, id: &str, descriptor: &StoryDescriptor) -> Vec<Mask>;
}

impl<F> RegionProvider for F
where
    F: Fn(&str, &StoryDescriptor) -> Vec<Mask> + Send + Sync,
{
    fn masks(&self, id: &str, descriptor: &StoryDescriptor) -> Vec<Mask> {
        self(id, descriptor)
    }
}

fn compile(pattern: &str) -> Result<Regex, BuildError> {
    Regex::new(pattern).map_err(|e| BuildError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// Include/exclude regexes over shot ids
pub struct PatternFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl PatternFilter {
    pub fn from_config(config: &FilterConfig) -> Result<Self, BuildError> {
        Ok(Self {
            include: config.include.iter().map(|p| compile(p)).collect::<Result<_, _>>()?,
            exclude: config.exclude.iter().map(|p| compile(p)).collect::<Result<_, _>>()?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }
}

impl DescriptorFilter for PatternFilter {
    fn keep(&self, id: &str, _descriptor: &StoryDescriptor) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|re| re.is_match(id));
        included && !self.exclude.iter().any(|re| re.is_match(id))
    }
}

/// Masks attached to every id matching a pattern
pub struct MaskRules {
    rules: Vec<(Regex, Vec<Mask>)>,
}

impl MaskRules {
    pub fn from_config(rules: &[MaskRule]) -> Result<Self, BuildError> {
        let rules = rules
            .iter()
            .map(|rule| Ok((compile(&rule.id_pattern)?, rule.mask.clone())))
            .collect::<Result<_, BuildError>>()?;
        Ok(Self { rules })
    }
}

impl RegionProvider for MaskRules {
    fn masks(&self, id: &str, _descriptor: &StoryDescriptor) -> Vec<Mask> {
        self.rules
            .iter()
            .filter(|(re, _)| re.is_match(id))
            .flat_map(|(_, masks)| masks.iter().cloned())
            .collect()
    }
}

pub struct ShotItemBuilder {
    settings: BuildSettings,
    filters: Vec<Box<dyn DescriptorFilter>>,
    regions: Vec<Box<dyn RegionProvider>>,
}

impl ShotItemBuilder {
    pub fn new(settings: BuildSettings) -> Self {
        Self {
            settings,
            filters: Vec::new(),
            regions: Vec::new(),
        }
    }

    /// Builder with the filters and mask rules named in the configuration
    pub fn from_config(config: &ShotConfig) -> Result<Self, BuildError> {
        let mut builder = Self::new(BuildSettings::from_config(config));

        let filter = PatternFilter::from_config(&config.filter)?;
        if !filter.is_empty() {
            builder = builder.with_filter(filter);
        }
        if !config.mask_rules.is_empty() {
            builder = builder.with_regions(MaskRules::from_config(&config.mask_rules)?);
        }

        Ok(builder)
    }

    pub fn with_filter(mut self, filter: impl DescriptorFilter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn with_regions(mut self, provider: impl RegionProvider + 'static) -> Self {
        self.regions.push(Box::new(provider));
        self
    }

    /// Build shot items in descriptor order.
    ///
    /// Filters match on the derived id, so ids are derived first: a
    /// descriptor without a derivable id fails the build even when a filter
    /// would have dropped it.
    pub fn build(&self, descriptors: &[StoryDescriptor]) -> Result<Vec<ShotItem>, BuildError> {
        let mut items = Vec::with_capacity(descriptors.len());
        let mut seen: HashMap<String, String> = HashMap::new();

        for descriptor in descriptors {
            let id = descriptor
                .canonical_id()
                .ok_or_else(|| BuildError::MissingId(format!("{} descriptor", descriptor.mode)))?;

            if !self.filters.iter().all(|f| f.keep(&id, descriptor)) {
                debug!("Filtered out '{}'", id);
                continue;
            }

            for item in self.expand(&id, descriptor)? {
                if let Some(previous) = seen.insert(item.shot_name.clone(), item.id.clone()) {
                    return Err(BuildError::DuplicateShot {
                        shot_name: item.shot_name,
                        id: previous,
                    });
                }
                items.push(item);
            }
        }

        debug!("Built {} shot items from {} descriptors", items.len(), descriptors.len());
        Ok(items)
    }

    /// One item per breakpoint, or a single item without breakpoints
    fn expand(&self, id: &str, descriptor: &StoryDescriptor) -> Result<Vec<ShotItem>, BuildError> {
        let target = descriptor
            .url
            .as_deref()
            .ok_or_else(|| BuildError::MissingUrl(id.to_string()))?;
        let url = resolve_target_url(target, &self.settings.cwd);

        let mut mask = descriptor.mask.clone();
        for provider in &self.regions {
            mask.extend(provider.masks(id, descriptor));
        }

        let base_name = sanitize_shot_name(id);
        let mut breakpoints = descriptor.breakpoints.clone();
        breakpoints.sort_unstable();
        breakpoints.dedup();

        let item = |shot_name: String, viewport: Option<Viewport>, breakpoint: Option<u32>| ShotItem {
            shot_mode: descriptor.mode,
            id: id.to_string(),
            file_path_baseline: shot_file_path(&self.settings.baseline_root, &shot_name),
            file_path_current: shot_file_path(&self.settings.current_root, &shot_name),
            file_path_difference: shot_file_path(&self.settings.difference_root, &shot_name),
            shot_name,
            url: url.clone(),
            threshold: descriptor.threshold.unwrap_or(self.settings.default_threshold),
            mask: mask.clone(),
            viewport,
            wait_before_screenshot: Some(
                descriptor.wait_before_screenshot.unwrap_or(self.settings.default_wait),
            ),
            breakpoint,
            breakpoint_group: breakpoint.map(|_| id.to_string()),
        };

        if breakpoints.is_empty() {
            return Ok(vec![item(base_name, descriptor.viewport, None)]);
        }

        Ok(breakpoints
            .into_iter()
            .map(|width| {
                let viewport = Viewport {
                    width,
                    height: descriptor.viewport.and_then(|v| v.height),
                };
                item(breakpoint_shot_name(&base_name, width), Some(viewport), Some(width))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use shotcheck_common::{Rect, ShotMode};
    use std::collections::HashSet;
    use std::path::Path;

    fn settings() -> BuildSettings {
        BuildSettings {
            baseline_root: PathBuf::from("/shots/baseline"),
            current_root: PathBuf::from("/shots/current"),
            difference_root: PathBuf::from("/shots/difference"),
            default_threshold: Threshold::Pixels(0),
            default_wait: 1_000,
            cwd: PathBuf::from("/work"),
        }
    }

    fn story(kind: &str, name: &str) -> StoryDescriptor {
        let mut d = StoryDescriptor::new(ShotMode::Storybook).with_url("http://localhost:6006/iframe.html");
        d.kind = Some(kind.to_string());
        d.story = Some(name.to_string());
        d
    }

    #[test]
    fn test_single_item_paths() {
        let items = ShotItemBuilder::new(settings())
            .build(&[story("Button", "Primary")])
            .unwrap();

        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.id, "button--primary");
        assert_eq!(item.shot_name, "button--primary");
        assert_eq!(item.file_path_baseline, Path::new("/shots/baseline/button--primary.png"));
        assert_eq!(item.file_path_current, Path::new("/shots/current/button--primary.png"));
        assert_eq!(item.file_path_difference, Path::new("/shots/difference/button--primary.png"));
        assert_eq!(item.wait_before_screenshot, Some(1_000));
        assert_eq!(item.breakpoint_group, None);
    }

    #[test]
    fn test_breakpoint_expansion() {
        let mut d = story("Card", "Default");
        d.breakpoints = vec![1024, 320, 768, 320];
        d.viewport = Some(Viewport { width: 1, height: Some(600) });

        let items = ShotItemBuilder::new(settings()).build(&[d]).unwrap();
        let names: Vec<_> = items.iter().map(|i| i.shot_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["card--default__w320px", "card--default__w768px", "card--default__w1024px"]
        );
        assert!(items.iter().all(|i| i.id == "card--default"));
        assert!(items.iter().all(|i| i.breakpoint_group.as_deref() == Some("card--default")));
        assert_eq!(items[1].viewport, Some(Viewport { width: 768, height: Some(600) }));
    }

    #[test]
    fn test_duplicate_shot_name_fails() {
        let a = StoryDescriptor::new(ShotMode::Page).with_id("a/b").with_url("http://x/1");
        let b = StoryDescriptor::new(ShotMode::Page).with_id("a:b").with_url("http://x/2");

        let err = ShotItemBuilder::new(settings()).build(&[a, b]).unwrap_err();
        assert!(matches!(err, BuildError::DuplicateShot { ref shot_name, .. } if shot_name == "a_b"));
    }

    #[test]
    fn test_missing_id_and_url() {
        let builder = ShotItemBuilder::new(settings());
        assert!(matches!(
            builder.build(&[StoryDescriptor::new(ShotMode::Page)]),
            Err(BuildError::MissingId(_))
        ));
        assert!(matches!(
            builder.build(&[StoryDescriptor::new(ShotMode::Page).with_id("home")]),
            Err(BuildError::MissingUrl(_))
        ));
    }

    #[test]
    fn test_missing_id_checked_before_filters() {
        let anonymous = StoryDescriptor::new(ShotMode::Page).with_url("");
        let err = ShotItemBuilder::new(settings())
            .with_filter(|_: &str, _: &StoryDescriptor| false)
            .build(&[anonymous])
            .unwrap_err();
        assert!(matches!(err, BuildError::MissingId(_)));
    }

    #[test]
    fn test_relative_target_resolved_against_cwd() {
        let d = StoryDescriptor::new(ShotMode::Custom).with_id("logo").with_url("shots/logo.png");
        let items = ShotItemBuilder::new(settings()).build(&[d]).unwrap();
        assert_eq!(items[0].url, "file:///work/shots/logo.png");
    }

    #[test]
    fn test_closure_filter_and_pattern_filter() {
        let descriptors = vec![
            story("Button", "Primary"),
            story("Internal", "Debug"),
            story("Button", "Secondary"),
        ];

        let pattern = PatternFilter::from_config(&FilterConfig {
            include: vec!["^button".to_string(), "^internal".to_string()],
            exclude: vec!["^internal".to_string()],
        })
        .unwrap();
        let items = ShotItemBuilder::new(settings())
            .with_filter(pattern)
            .with_filter(|id: &str, _: &StoryDescriptor| !id.ends_with("secondary"))
            .build(&descriptors)
            .unwrap();

        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["button--primary"]);
    }

    #[test]
    fn test_invalid_pattern() {
        let err = PatternFilter::from_config(&FilterConfig {
            include: vec!["(".to_string()],
            exclude: vec![],
        })
        .err()
        .unwrap();
        assert!(matches!(err, BuildError::InvalidPattern { .. }));
    }

    #[test]
    fn test_mask_rules_append_regions() {
        let header = Mask::Region(Rect { x: 0, y: 0, width: 100, height: 20 });
        let rules = MaskRules::from_config(&[MaskRule {
            id_pattern: "^dashboard".to_string(),
            mask: vec![header.clone()],
        }])
        .unwrap();

        let mut dashboard = story("Dashboard", "Overview");
        dashboard.mask = vec![Mask::Selector { selector: ".clock".to_string() }];

        let items = ShotItemBuilder::new(settings())
            .with_regions(rules)
            .build(&[dashboard, story("Button", "Primary")])
            .unwrap();

        assert_eq!(items[0].mask.len(), 2);
        assert_eq!(items[0].mask_regions(), vec![header.region().unwrap()]);
        assert_eq!(items[0].mask_selectors(), vec![".clock"]);
        assert!(items[1].mask.is_empty());
    }

    #[test]
    fn test_generated_batches_have_unique_names_and_paths() {
        let mut rng = rand::thread_rng();
        const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789-";

        for _ in 0..50 {
            let mut ids = HashSet::new();
            let count = rng.gen_range(1..40);
            while ids.len() < count {
                let len = rng.gen_range(1..12);
                let id: String = (0..len)
                    .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
                    .collect();
                ids.insert(id);
            }

            let mut expected = 0;
            let descriptors: Vec<_> = ids
                .iter()
                .map(|id| {
                    let mut d = StoryDescriptor::new(ShotMode::Storybook)
                        .with_id(id.clone())
                        .with_url("http://localhost:6006");
                    let widths: HashSet<u32> =
                        (0..rng.gen_range(0..4)).map(|_| rng.gen_range(200..2000)).collect();
                    expected += widths.len().max(1);
                    d.breakpoints = widths.into_iter().collect();
                    d
                })
                .collect();

            let items = ShotItemBuilder::new(settings()).build(&descriptors).unwrap();
            assert_eq!(items.len(), expected);

            let names: HashSet<_> = items.iter().map(|i| &i.shot_name).collect();
            let currents: HashSet<_> = items.iter().map(|i| &i.file_path_current).collect();
            let diffs: HashSet<_> = items.iter().map(|i| &i.file_path_difference).collect();
            assert_eq!(names.len(), items.len());
            assert_eq!(currents.len(), items.len());
            assert_eq!(diffs.len(), items.len());
        }
    }
}
