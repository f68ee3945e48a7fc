mod exports;
mod progress;
mod reports;
mod styling;
mod summary;
mod tables;

pub use exports::{print_json, write_json};
pub use progress::PhaseProgress;
pub use reports::{
    print_executions, print_ingest_report, print_load_outcome, print_log_entries,
    print_parsed_report,
};
pub use styling::{bright_yellow, dim, magenta_bold};
pub use summary::{print_summary, print_task_summaries};

/// Prints the `PipeLens` banner to stderr.
///
/// Displays the tool name, version, and description at the start of execution.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        magenta_bold("📈 PipeLens"),
        dim(env!("CARGO_PKG_VERSION")),
        dim("CI pipeline summary statistics")
    );
}
