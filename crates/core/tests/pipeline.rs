//! End-to-end runs over pre-captured images

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use image::{ImageFormat, Rgba, RgbaImage};

use shotcheck_common::{RunMode, ShotConfig, ShotMode, StoryDescriptor};
use shotcheck_core::builder::BuildSettings;
use shotcheck_core::orchestrator::FlakinessPolicy;
use shotcheck_core::source::{collect_descriptors, CustomShotsSource, FnSource, StorySource};
use shotcheck_core::{
    FileCapture, Orchestrator, PixelComparator, RunPolicy, ShotItemBuilder, ShotOutcome, Summary,
};

fn write_png(path: &Path, img: &RgbaImage) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    std::fs::write(path, out.into_inner()).unwrap();
}

fn settings(root: &Path) -> BuildSettings {
    let config = ShotConfig {
        image_path_baseline: root.join("baseline"),
        image_path_current: root.join("current"),
        image_path_difference: root.join("difference"),
        ..ShotConfig::default()
    };
    let mut settings = BuildSettings::from_config(&config);
    settings.cwd = root.to_path_buf();
    settings
}

fn policy(mode: RunMode) -> RunPolicy {
    RunPolicy {
        mode,
        shot_concurrency: 2,
        compare_concurrency: 2,
        capture_timeout: Duration::from_secs(5),
        flakiness: FlakinessPolicy {
            compare_after_shot: false,
            retries: 1,
            wait_between: Duration::ZERO,
        },
        update_baselines: false,
    }
}

#[tokio::test]
async fn missing_current_image_fails_only_its_item() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let shots = root.join("shots");

    let white = RgbaImage::from_pixel(100, 100, Rgba([255, 255, 255, 255]));
    let mut changed = white.clone();
    for x in 0..10 {
        changed.put_pixel(x, 50, Rgba([0, 0, 0, 255]));
    }

    write_png(&shots.join("home.png"), &white);
    write_png(&shots.join("pricing.png"), &changed);
    write_png(&root.join("baseline/home.png"), &white);
    write_png(&root.join("baseline/pricing.png"), &white);

    let ghost = root.join("shots/ghost.png");
    let sources: Vec<Box<dyn StorySource>> = vec![
        Box::new(CustomShotsSource::new(&shots)),
        Box::new(FnSource::new("ghost", move || {
            Ok(vec![StoryDescriptor::new(ShotMode::Custom)
                .with_id("ghost")
                .with_url(ghost.to_string_lossy())])
        })),
    ];

    let descriptors = collect_descriptors(&sources).await.unwrap();
    let items = ShotItemBuilder::new(settings(root)).build(&descriptors).unwrap();
    assert_eq!(items.len(), 3);

    let orchestrator = Orchestrator::new(
        Arc::new(FileCapture),
        Arc::new(PixelComparator::default()),
        policy(RunMode::Compare),
    );
    let results = orchestrator.run(items).await;

    let outcomes: Vec<_> = results.iter().map(|r| (r.item.shot_name.as_str(), r.outcome)).collect();
    assert_eq!(
        outcomes,
        vec![
            ("home", ShotOutcome::Stable),
            ("pricing", ShotOutcome::DifferenceFound),
            ("ghost", ShotOutcome::CaptureFailed),
        ]
    );

    assert_eq!(results[1].pixel_diff_count, Some(10));
    assert!(root.join("difference/pricing.png").exists());
    assert!(root.join("current/home.png").exists());
    assert_eq!(results[2].attempts, 2);
    assert!(results[2]
        .error
        .as_deref()
        .unwrap()
        .starts_with("Missing current image"));

    let summary = Summary::aggregate(&results, RunMode::Compare, false);
    assert_eq!(summary.exit_code(), 1);
    assert_eq!(summary.lines[0], "[1/3] home: stable");
}

#[tokio::test]
async fn generate_only_seeds_baselines_then_passes_compare() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let shots = root.join("shots");

    write_png(&shots.join("card.png"), &RgbaImage::from_pixel(20, 20, Rgba([9, 9, 9, 255])));
    write_png(&shots.join("hero.png"), &RgbaImage::from_pixel(30, 10, Rgba([90, 0, 0, 255])));

    let source = CustomShotsSource::new(&shots);
    let descriptors = source.list().await.unwrap();
    let items = ShotItemBuilder::new(settings(root)).build(&descriptors).unwrap();

    let engine = |mode: RunMode| {
        Orchestrator::new(
            Arc::new(FileCapture),
            Arc::new(PixelComparator::default()),
            policy(mode),
        )
    };

    let first = engine(RunMode::GenerateOnly).run(items.clone()).await;
    assert!(first.iter().all(|r| r.outcome == ShotOutcome::MissingBaseline));
    assert_eq!(Summary::aggregate(&first, RunMode::GenerateOnly, false).exit_code(), 0);
    assert!(root.join("baseline/card.png").exists());

    let second = engine(RunMode::Compare).run(items).await;
    assert!(second.iter().all(|r| r.outcome == ShotOutcome::Stable));
    assert_eq!(Summary::aggregate(&second, RunMode::Compare, false).exit_code(), 0);

    let hashes: Vec<_> = second.iter().filter_map(|r| r.extended()).map(|e| e.hash).collect();
    assert_eq!(hashes.len(), 2);
    assert_ne!(hashes[0], hashes[1]);
}
