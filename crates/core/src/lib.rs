//! shotcheck visual regression pipeline
//!
//! This crate turns story descriptors into screenshots and verdicts:
//! - Story sources enumerate what to capture
//! - The builder normalizes descriptors into shot items
//! - The orchestrator captures, compares and retries flaky shots
//! - The summary decides the run outcome
//! - The platform negotiator uploads only images the server lacks
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     shotcheck pipeline                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  StorySource::list() -> [StoryDescriptor]                   │
//! │    └── ShotItemBuilder::build() -> [ShotItem]               │
//! │          └── Orchestrator::run() -> [ShotResult]            │
//! │                ├── CaptureEngine::capture(item) -> bytes    │
//! │                ├── ComparisonEngine::compare(b, c, mask)    │
//! │                └── Summary::aggregate(results) -> verdict   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  platform mode                                              │
//! │    UploadNegotiator: init → prepare_upload → upload_shot*   │
//! │                      → finalize                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod builder;
pub mod capture;
pub mod compare;
pub mod error;
pub mod orchestrator;
pub mod platform;
pub mod report;
pub mod source;
pub mod summary;

pub use builder::{BuildSettings, ShotItemBuilder};
pub use capture::{CaptureEngine, FileCapture, ModeCapture, PlaywrightCapture};
pub use compare::{Comparison, ComparisonEngine, PixelComparator};
pub use error::{
    BuildError, CaptureError, ComparisonError, Error, PlatformError, Result, SourceError,
};
pub use orchestrator::{FlakinessPolicy, Orchestrator, RunPolicy, ShotOutcome, ShotResult};
pub use platform::{PlatformApi, PlatformClient, UploadNegotiator, UploadReport};
pub use source::StorySource;
pub use summary::Summary;
