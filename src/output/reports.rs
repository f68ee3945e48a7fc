use std::fmt::Write;

use comfy_table::Cell;

use crate::models::{PipelineExecution, Status};
use crate::parser::ParsedReport;
use crate::store::{IngestReport, LoadOutcome, LogEntry};

use super::styling::{
    add_section_header, bright_green, bright_red, bright_yellow, cyan, dim, rate, status,
};
use super::tables::{color_coded_duration_cell, create_table, format_duration, header, status_cell};

pub fn print_executions(executions: &[&PipelineExecution]) {
    println!("{}", render_executions(executions));
}

pub fn print_log_entries(entries: &[LogEntry]) {
    println!("{}", render_log_entries(entries));
}

pub fn print_parsed_report(report: &ParsedReport) {
    println!("{}", render_parsed_report(report));
}

pub fn print_ingest_report(report: &IngestReport) {
    println!("{}", render_ingest_report(report));
}

/// Warns on stderr when the store had to be reset on open.
pub fn print_load_outcome(outcome: &LoadOutcome) {
    if let Some(warning) = render_load_outcome(outcome) {
        eprintln!("{warning}");
    }
}

#[allow(clippy::cast_precision_loss)]
fn render_executions(executions: &[&PipelineExecution]) -> String {
    let mut output = String::new();
    add_section_header(&mut output, "🕒", "Executions");

    if executions.is_empty() {
        let _ = writeln!(output, "{}", bright_yellow("No executions match."));
        return output;
    }

    let mut table = create_table();
    table.set_header(header(&[
        "Observed",
        "Pipeline",
        "Repository",
        "PR",
        "Status",
        "Tasks",
        "Failed Tasks",
        "Duration",
    ]));

    for exec in executions {
        let failed: Vec<&str> = exec
            .tasks
            .iter()
            .filter(|t| t.status == Status::Failed)
            .map(|t| t.name.as_str())
            .collect();
        table.add_row(vec![
            Cell::new(exec.observed_at.format("%Y-%m-%d %H:%M")),
            Cell::new(&exec.name),
            Cell::new(&exec.repository),
            Cell::new(format!("#{}", exec.pr_number)),
            status_cell(exec.status),
            Cell::new(exec.tasks.len()),
            Cell::new(if failed.is_empty() {
                "-".to_string()
            } else {
                failed.join("\n")
            }),
            color_coded_duration_cell(exec.duration_secs().map(|d| d as f64)),
        ]);
    }

    let _ = writeln!(output, "{table}");
    output
}

fn render_log_entries(entries: &[LogEntry]) -> String {
    let mut output = String::new();
    add_section_header(&mut output, "🔗", "Log Links");

    if entries.is_empty() {
        let _ = writeln!(output, "{}", bright_yellow("No executions match."));
        return output;
    }

    for entry in entries {
        let subject = match &entry.task {
            Some(task) => format!("{} / {task}", entry.pipeline),
            None => entry.pipeline.clone(),
        };
        let _ = writeln!(
            output,
            "  {} {} {}",
            status(entry.task_status.unwrap_or(entry.status)),
            cyan(subject),
            dim(format!(
                "{}#{} {}",
                entry.repository,
                entry.pr_number,
                entry.observed_at.format("%Y-%m-%d %H:%M")
            ))
        );

        let links = [
            ("Task logs:", entry.task_log_url.as_deref()),
            ("Pipeline logs:", entry.pipeline_log_url.as_deref()),
            ("Troubleshooting:", entry.troubleshooting_url.as_deref()),
            ("Pull request:", entry.pr_url.as_deref()),
        ];
        let mut any_link = false;
        for (label, url) in links {
            if let Some(url) = url {
                let _ = writeln!(output, "      {} {url}", dim(label));
                any_link = true;
            }
        }
        if let Some(command) = &entry.restart_command {
            let _ = writeln!(output, "      {} {command}", dim("Restart:"));
        }
        if !any_link {
            let _ = writeln!(output, "      {}", dim("no links recorded"));
        }
    }

    output
}

#[allow(clippy::cast_precision_loss)]
fn render_parsed_report(report: &ParsedReport) -> String {
    let mut output = String::new();
    add_section_header(&mut output, "🔍", "Parsed Report");

    let fields = &report.fields;
    let tasks = report.layout.tasks();
    let derived = PipelineExecution::derive_status(tasks);

    let _ = writeln!(output, "  {} {}", dim("Layout:"), cyan(report.layout.name()));
    let _ = writeln!(
        output,
        "  {} {}",
        dim("Pipeline:"),
        cyan(fields.pipeline_name.as_deref().unwrap_or("(not found)"))
    );
    if let Some(run) = &fields.pipeline_run {
        let _ = writeln!(output, "  {} {run}", dim("Pipeline run:"));
    }
    if let Some(started) = fields.started_at {
        let _ = writeln!(output, "  {} {}", dim("Started:"), started.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    let _ = writeln!(output, "  {} {}", dim("Derived status:"), status(derived));
    if let Some(reported) = fields.success_rate {
        let _ = writeln!(output, "  {} {}", dim("Reported success rate:"), rate(reported));
    }
    if let Some(secs) = fields.duration_secs {
        let text = format_duration(secs as f64);
        let _ = writeln!(output, "  {} {text}", dim("Reported duration:"));
    }
    for (label, value) in [
        ("Logs:", fields.log_url.as_deref()),
        ("Troubleshooting:", fields.troubleshooting_url.as_deref()),
        ("Restart:", fields.restart_command.as_deref()),
    ] {
        if let Some(value) = value {
            let _ = writeln!(output, "  {} {value}", dim(label));
        }
    }
    let _ = writeln!(output);

    let mut table = create_table();
    table.set_header(header(&["Task", "Status", "Duration", "Note"]));
    for task in tasks {
        table.add_row(vec![
            Cell::new(&task.name),
            status_cell(task.status),
            color_coded_duration_cell(task.duration_secs.map(|d| d as f64)),
            Cell::new(
                task.error_message
                    .as_deref()
                    .or(task.log_url.as_deref())
                    .unwrap_or(""),
            ),
        ]);
    }
    let _ = writeln!(output, "{table}");
    output
}

fn render_ingest_report(report: &IngestReport) -> String {
    let mut output = String::new();
    add_section_header(&mut output, "📥", "Ingestion");

    let _ = writeln!(
        output,
        "  {} {}\n  {} {}\n  {} {}",
        dim("Added:"),
        bright_green(report.added),
        dim("Already recorded:"),
        bright_yellow(report.duplicates),
        dim("Skipped:"),
        if report.skipped.is_empty() {
            dim(0)
        } else {
            bright_red(report.skipped.len())
        }
    );

    for item in &report.skipped {
        let _ = writeln!(output, "    {} {}", dim(&item.source), dim(&item.reason));
    }
    output
}

fn render_load_outcome(outcome: &LoadOutcome) -> Option<String> {
    let LoadOutcome::Reset { reason, backup } = outcome else {
        return None;
    };
    let mut output = format!(
        "{} {}\n  {}",
        bright_yellow("⚠️"),
        bright_yellow("Statistics store was unusable and has been reset."),
        dim(reason)
    );
    if let Some(backup) = backup {
        let _ = write!(output, "\n  {} {}", dim("Previous contents kept at:"), backup.display());
    }
    Some(output)
}
