//! shotcheck CLI
//!
//! Command-line interface for visual regression runs: writes the starter
//! configuration, runs the capture/compare pipeline and finalizes platform
//! builds.

pub mod commands;
pub mod output;
