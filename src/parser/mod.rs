//! Pipeline summary parsing.
//!
//! Turns the free-form "Pipeline Summary" comments posted by CI bots into
//! [`PipelineExecution`] records. Three body layouts are understood (markdown
//! table, labeled fields with a task list, bare bullet list); see
//! [`layout::ParsedLayout`].

mod fields;
mod layout;
mod normalize;

use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use thiserror::Error;

use crate::models::{PipelineExecution, ReportMetadata};

pub use fields::ReportFields;
pub use layout::ParsedLayout;
pub use normalize::{normalize_duration, normalize_status};

lazy_static! {
    static ref SUMMARY_HEADING: Regex =
        Regex::new(r"(?im)^\s{0,3}#{1,6}[^\w\n]*pipeline\s+summary\b").unwrap();
}

const UNKNOWN_PIPELINE: &str = "unknown-pipeline";

/// Why a comment could not be turned into a pipeline execution.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseFailure {
    #[error("no pipeline summary heading found")]
    NoSummaryFound,

    #[error("pipeline summary found but no task entries could be extracted")]
    MalformedBody,
}

/// Returns true if the text carries a "Pipeline Summary" heading at any level.
pub fn is_pipeline_summary(text: &str) -> bool {
    SUMMARY_HEADING.is_match(text)
}

/// Everything the parser found in a report, before it is bound to metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReport {
    pub layout: ParsedLayout,
    pub fields: ReportFields,
}

/// Detects the summary heading and classifies the body that follows it.
///
/// # Errors
///
/// Returns [`ParseFailure::NoSummaryFound`] when the heading is missing and
/// [`ParseFailure::MalformedBody`] when no layout yields a single task.
pub fn parse_report(raw_text: &str) -> Result<ParsedReport, ParseFailure> {
    let heading = SUMMARY_HEADING
        .find(raw_text)
        .ok_or(ParseFailure::NoSummaryFound)?;

    let body = &raw_text[heading.end()..];
    let layout = layout::classify(body).ok_or(ParseFailure::MalformedBody)?;
    let fields = fields::extract_fields(body);

    debug!(
        "Classified report as {} layout with {} tasks",
        layout.name(),
        layout.tasks().len()
    );

    Ok(ParsedReport { layout, fields })
}

/// Parses a raw comment into a pipeline execution.
///
/// Repository, PR and timestamp always come from `metadata`. The overall
/// status is derived from the extracted task statuses; a success rate printed
/// in the report is kept only as `reported_success_rate`.
///
/// # Errors
///
/// See [`parse_report`].
pub fn parse(raw_text: &str, metadata: &ReportMetadata) -> Result<PipelineExecution, ParseFailure> {
    let ParsedReport { layout, fields } = parse_report(raw_text)?;
    let tasks = layout.into_tasks();

    Ok(PipelineExecution {
        name: fields
            .pipeline_name
            .unwrap_or_else(|| UNKNOWN_PIPELINE.to_string()),
        repository: metadata.repository.clone(),
        pr_number: metadata.pr_number,
        pr_url: metadata.pr_url.clone(),
        comment_id: metadata.comment_id,
        run_id: metadata.run_id.clone().or(fields.pipeline_run),
        observed_at: metadata.observed_at,
        started_at: fields.started_at,
        status: PipelineExecution::derive_status(&tasks),
        tasks,
        reported_success_rate: fields.success_rate,
        reported_duration_secs: fields.duration_secs,
        log_url: fields.log_url,
        troubleshooting_url: fields.troubleshooting_url,
        restart_command: fields.restart_command,
    })
}
