//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

use shotcheck_core::{ShotOutcome, ShotResult};

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// Plain text format
    Plain,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

/// Table row for one shot result
#[derive(Debug, Serialize)]
pub struct ShotRow<'a> {
    pub shot: &'a str,
    pub mode: String,
    pub outcome: ShotOutcome,
    pub pixel_diff_count: Option<u64>,
    pub attempts: u32,
    pub error: Option<&'a str>,
}

impl<'a> From<&'a ShotResult> for ShotRow<'a> {
    fn from(result: &'a ShotResult) -> Self {
        Self {
            shot: &result.item.shot_name,
            mode: result.item.shot_mode.to_string(),
            outcome: result.outcome,
            pixel_diff_count: result.pixel_diff_count,
            attempts: result.attempts,
            error: result.error.as_deref(),
        }
    }
}

impl TableDisplay for ShotRow<'_> {
    fn headers() -> Vec<&'static str> {
        vec!["Shot", "Mode", "Outcome", "Diff px", "Attempts", "Error"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.shot.to_string(),
            self.mode.clone(),
            colored_outcome(self.outcome),
            self.pixel_diff_count.map(|d| d.to_string()).unwrap_or_else(|| "-".into()),
            self.attempts.to_string(),
            self.error.unwrap_or("").to_string(),
        ]
    }
}

fn colored_outcome(outcome: ShotOutcome) -> String {
    let text = outcome.as_str();
    match outcome {
        ShotOutcome::Stable => text.green().to_string(),
        ShotOutcome::DifferenceFound | ShotOutcome::MissingBaseline => text.yellow().to_string(),
        ShotOutcome::CaptureFailed | ShotOutcome::ComparisonFailed => text.red().to_string(),
    }
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    if items.is_empty() {
        println!("No shots found.");
        return;
    }

    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic);

            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }

            println!("{table}");
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(items).unwrap_or_default());
        }
        OutputFormat::Plain => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    println!("---");
                }
                let row = item.row();
                for (header, value) in T::headers().iter().zip(row.iter()) {
                    println!("{}: {}", header, value);
                }
            }
        }
    }
}

/// Print a simple message
pub fn print_message(message: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "message": message }));
        }
        _ => {
            println!("{}", message);
        }
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("✅ {}", message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("❌ {}", message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("⚠️  {}", message);
}
