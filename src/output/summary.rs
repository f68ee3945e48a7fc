use std::fmt::Write;

use crate::store::{Overview, PipelineStats, TaskSummary};

use super::styling::{add_section_header, bright_yellow, cyan, dim, rate};
use super::tables::{
    color_coded_duration_cell, color_coded_failure_cell, color_coded_success_cell, create_table,
    header,
};

/// Prints the overview and the per-pipeline table to stdout.
///
/// When `tasks` is given, each pipeline is followed by its task breakdown.
///
/// Color coding:
/// - Green: success >80%, failures <25%, average duration ≤10min
/// - Yellow: success 50-80%, failures 25-50%, average duration 10-15min
/// - Red: success <50%, failures ≥50%, average duration >15min
pub fn print_summary(overview: &Overview, pipelines: &[PipelineStats], tasks: Option<&[TaskSummary]>) {
    println!("{}", render_summary(overview, pipelines, tasks));
}

pub fn print_task_summaries(tasks: &[TaskSummary], cross_pipeline: bool) {
    println!("{}", render_task_summaries(tasks, cross_pipeline));
}

fn render_overview(output: &mut String, overview: &Overview) {
    add_section_header(output, "📊", "Overview");

    let last_updated = overview
        .last_updated
        .map_or_else(|| "never".to_string(), |t| t.format("%Y-%m-%d %H:%M UTC").to_string());

    let _ = write!(
        output,
        "  {} {}\n  {} {}\n  {} {}\n  {} {}\n  {} {}\n  {} {}\n\n",
        dim("Pipelines:"),
        bright_yellow(overview.pipelines),
        dim("Executions:"),
        bright_yellow(overview.executions),
        dim("Repositories:"),
        bright_yellow(overview.repositories),
        dim("Successful / failed:"),
        bright_yellow(format!("{} / {}", overview.successful, overview.failed)),
        dim("Overall success rate:"),
        rate(overview.success_rate),
        dim("Last updated:"),
        dim(last_updated)
    );
}

fn render_summary(
    overview: &Overview,
    pipelines: &[PipelineStats],
    tasks: Option<&[TaskSummary]>,
) -> String {
    let mut output = String::new();
    render_overview(&mut output, overview);

    if pipelines.is_empty() {
        let _ = writeln!(output, "{}", bright_yellow("No pipeline data found."));
        return output;
    }

    add_section_header(&mut output, "📋", "Pipelines");

    let mut table = create_table();
    table.set_header(header(&[
        "Pipeline",
        "Total",
        "Success",
        "Failed",
        "Avg Duration",
        "Repositories",
        "Last Seen",
    ]));

    for pipeline in pipelines {
        let stats = &pipeline.stats;
        table.add_row(vec![
            comfy_table::Cell::new(&pipeline.name),
            comfy_table::Cell::new(stats.total()),
            color_coded_success_cell(stats.success_rate()),
            color_coded_failure_cell(stats.failure_rate()),
            color_coded_duration_cell(stats.average_duration_secs()),
            comfy_table::Cell::new(stats.repositories.len()),
            comfy_table::Cell::new(
                stats
                    .last_seen
                    .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string()),
            ),
        ]);
    }
    let _ = writeln!(output, "{table}\n");

    if let Some(tasks) = tasks {
        for pipeline in pipelines {
            let rows: Vec<&TaskSummary> = tasks
                .iter()
                .filter(|t| t.pipelines.contains(&pipeline.name))
                .collect();
            if rows.is_empty() {
                continue;
            }
            let _ = writeln!(output, "  {} {}", dim("Tasks of"), cyan(&pipeline.name));
            let _ = writeln!(output, "{}\n", task_table(&rows, false));
        }
    }

    output
}

fn task_table(rows: &[&TaskSummary], show_pipelines: bool) -> comfy_table::Table {
    let mut table = create_table();
    let mut labels = vec!["Task"];
    if show_pipelines {
        labels.push("Pipelines");
    }
    labels.extend(["Total", "Success", "Failed", "Skipped", "Avg Duration"]);
    table.set_header(header(&labels));

    for row in rows {
        let stats = &row.stats;
        let mut cells = vec![comfy_table::Cell::new(&row.name)];
        if show_pipelines {
            cells.push(comfy_table::Cell::new(row.pipelines.join("\n")));
        }
        cells.extend([
            comfy_table::Cell::new(stats.total()),
            color_coded_success_cell(stats.success_rate()),
            color_coded_failure_cell(stats.failure_rate()),
            comfy_table::Cell::new(stats.counts.skipped),
            color_coded_duration_cell(stats.average_duration_secs()),
        ]);
        table.add_row(cells);
    }
    table
}

fn render_task_summaries(tasks: &[TaskSummary], cross_pipeline: bool) -> String {
    let mut output = String::new();
    let title = if cross_pipeline {
        "Tasks (all pipelines)"
    } else {
        "Tasks"
    };
    add_section_header(&mut output, "🧩", title);

    if tasks.is_empty() {
        let _ = writeln!(output, "{}", bright_yellow("No task data found."));
        return output;
    }

    let rows: Vec<&TaskSummary> = tasks.iter().collect();
    let _ = writeln!(output, "{}", task_table(&rows, true));
    output
}
