use lazy_static::lazy_static;
use regex::Regex;

use crate::models::{Status, TaskExecution};

use super::fields::{is_labeled_key, labeled_line, parse_timestamp};
use super::normalize::{normalize_duration, normalize_status};

lazy_static! {
    static ref BULLET_LINE: Regex = Regex::new(r"^\s*[-*+]\s+(.+?)\s*:\s*(.*)$").unwrap();
    static ref TASK_SECTION_HEADING: Regex =
        Regex::new(r"(?i)^\s{0,3}#{1,6}\s*[^\w\n]*task").unwrap();
    static ref SEPARATOR_CELL: Regex = Regex::new(r"^:?-{1,}:?$").unwrap();
    static ref MARKDOWN_LINK: Regex = Regex::new(r"^\[([^\]]+)\]\(([^)\s]+)\)$").unwrap();
}

/// Report body shapes the parser understands, each with its extracted tasks.
///
/// Tried in declaration order; the first layout that yields at least one
/// task wins.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLayout {
    /// Markdown table with Status/Task/Duration/Start Time columns in any order
    Table(Vec<TaskExecution>),
    /// `Pipeline:`/`Success Rate:`/`Duration:` fields followed by a bulleted task section
    Labeled(Vec<TaskExecution>),
    /// Bare `- task: status (duration)` lines
    Bulleted(Vec<TaskExecution>),
}

impl ParsedLayout {
    pub fn name(&self) -> &'static str {
        match self {
            ParsedLayout::Table(_) => "table",
            ParsedLayout::Labeled(_) => "labeled",
            ParsedLayout::Bulleted(_) => "bulleted",
        }
    }

    pub fn tasks(&self) -> &[TaskExecution] {
        match self {
            ParsedLayout::Table(tasks)
            | ParsedLayout::Labeled(tasks)
            | ParsedLayout::Bulleted(tasks) => tasks,
        }
    }

    pub fn into_tasks(self) -> Vec<TaskExecution> {
        match self {
            ParsedLayout::Table(tasks)
            | ParsedLayout::Labeled(tasks)
            | ParsedLayout::Bulleted(tasks) => tasks,
        }
    }
}

/// Classifies a report body, falling through layouts that yield no tasks.
pub fn classify(body: &str) -> Option<ParsedLayout> {
    let lines: Vec<&str> = body.lines().collect();

    non_empty(extract_table(&lines))
        .map(ParsedLayout::Table)
        .or_else(|| non_empty(extract_labeled(&lines)).map(ParsedLayout::Labeled))
        .or_else(|| non_empty(extract_bulleted(&lines)).map(ParsedLayout::Bulleted))
}

fn non_empty(tasks: Vec<TaskExecution>) -> Option<Vec<TaskExecution>> {
    (!tasks.is_empty()).then_some(tasks)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Status,
    Task,
    StartTime,
    Duration,
    Other,
}

fn column_for(label: &str) -> Column {
    let label = label
        .trim_matches(|c: char| matches!(c, '*' | '_' | '`') || c.is_whitespace())
        .to_lowercase();
    match label.as_str() {
        "status" | "state" | "result" => Column::Status,
        "task" | "task name" | "name" | "step" => Column::Task,
        "start time" | "started" | "start" | "started at" => Column::StartTime,
        "duration" | "elapsed" | "time" => Column::Duration,
        _ => Column::Other,
    }
}

fn split_row(line: &str) -> Option<Vec<&str>> {
    let trimmed = line.trim();
    if !trimmed.starts_with('|') {
        return None;
    }
    let inner = trimmed.trim_start_matches('|');
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    Some(inner.split('|').map(str::trim).collect())
}

fn is_separator_row(line: &str) -> bool {
    split_row(line).is_some_and(|cells| {
        !cells.is_empty() && cells.iter().all(|cell| SEPARATOR_CELL.is_match(cell))
    })
}

/// Extracts tasks from the first markdown table whose header names at least
/// a task and a status column.
fn extract_table(lines: &[&str]) -> Vec<TaskExecution> {
    let mut idx = 0;
    while idx + 1 < lines.len() {
        let header = split_row(lines[idx]).map(|cells| {
            cells.iter().map(|cell| column_for(cell)).collect::<Vec<_>>()
        });

        let Some(columns) = header else {
            idx += 1;
            continue;
        };

        let has_required =
            columns.contains(&Column::Task) && columns.contains(&Column::Status);
        if !has_required || !is_separator_row(lines[idx + 1]) {
            idx += 1;
            continue;
        }

        let rows: Vec<&str> = lines[idx + 2..]
            .iter()
            .take_while(|line| line.trim().starts_with('|'))
            .copied()
            .collect();

        let tasks: Vec<TaskExecution> = rows
            .iter()
            .filter_map(|row| table_row_to_task(&columns, row))
            .collect();

        if !tasks.is_empty() {
            return tasks;
        }
        idx += 2 + rows.len();
    }

    Vec::new()
}

fn table_row_to_task(columns: &[Column], row: &str) -> Option<TaskExecution> {
    let cells = split_row(row)?;
    let cell = |wanted: Column| {
        columns
            .iter()
            .position(|c| *c == wanted)
            .and_then(|pos| cells.get(pos))
            .copied()
            .unwrap_or("")
    };

    let (name, log_url) = unwrap_task_name(cell(Column::Task));
    if name.is_empty() {
        return None;
    }

    Some(TaskExecution {
        name,
        status: normalize_status(cell(Column::Status)),
        duration_secs: normalize_duration(cell(Column::Duration)),
        log_url,
        start_time: parse_timestamp(cell(Column::StartTime)),
        error_message: None,
    })
}

/// Strips markdown decoration from a task name, returning the link target
/// when the name is a `[task](url)` link.
fn unwrap_task_name(raw: &str) -> (String, Option<String>) {
    let raw = raw.trim();
    if let Some(caps) = MARKDOWN_LINK.captures(raw) {
        let name = clean_name(&caps[1]);
        return (name, Some(caps[2].to_string()));
    }
    (clean_name(raw), None)
}

fn clean_name(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| matches!(c, '*' | '_' | '`'))
        .trim()
        .to_string()
}

/// Labeled layout: requires at least one labeled field; tasks come from the
/// bullets of a `## Task...` section, or the bullets after the last field.
fn extract_labeled(lines: &[&str]) -> Vec<TaskExecution> {
    let Some(last_field) = lines.iter().rposition(|line| labeled_line(line).is_some()) else {
        return Vec::new();
    };

    let section_start = lines
        .iter()
        .position(|line| TASK_SECTION_HEADING.is_match(line))
        .map_or(last_field + 1, |heading| heading + 1);

    let section = lines[section_start.min(lines.len())..]
        .iter()
        .take_while(|line| !is_other_heading(line));

    section.filter_map(|line| bullet_to_task(line)).collect()
}

fn is_other_heading(line: &str) -> bool {
    line.trim_start().starts_with('#') && !TASK_SECTION_HEADING.is_match(line)
}

fn extract_bulleted(lines: &[&str]) -> Vec<TaskExecution> {
    lines.iter().filter_map(|line| bullet_to_task(line)).collect()
}

/// Parses `- name: status (note)`; the note is a duration or, for failed
/// tasks, an error message.
fn bullet_to_task(line: &str) -> Option<TaskExecution> {
    let caps = BULLET_LINE.captures(line)?;
    let (name, log_url) = unwrap_task_name(&caps[1]);
    if name.is_empty() || is_labeled_key(&name) {
        return None;
    }

    let rest = caps[2].trim();
    if rest.starts_with("http://") || rest.starts_with("https://") {
        return None;
    }

    let (status_text, note) = match rest.find('(') {
        Some(open) => {
            let note = rest[open + 1..].split(')').next().unwrap_or("").trim();
            (rest[..open].trim(), Some(note).filter(|n| !n.is_empty()))
        }
        None => (rest, None),
    };

    let status = normalize_status(status_text);
    let duration_secs = match note {
        Some(note) => normalize_duration(note),
        None => normalize_duration(status_text),
    };
    let error_message = note
        .filter(|_| duration_secs.is_none() && status == Status::Failed)
        .map(str::to_string);

    Some(TaskExecution {
        name,
        status,
        duration_secs,
        log_url,
        start_time: None,
        error_message,
    })
}
