use std::fmt::Write;

use console::{style, StyledObject};

use crate::models::Status;

/// Styling helpers for terminal output
pub fn bright_yellow(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).bright().yellow()
}

pub fn bright_green(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).bright().green()
}

pub fn bright_red(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).bright().red()
}

pub fn cyan(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).cyan()
}

pub fn dim(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).dim()
}

pub fn bright(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).bright()
}

pub fn magenta_bold(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).magenta().bold()
}

/// Success rate colored green above 80%, yellow from 50%, red below.
pub fn rate(value: f64) -> StyledObject<String> {
    let text = format!("{value:.1}%");
    if value > 80.0 {
        bright_green(text)
    } else if value >= 50.0 {
        bright_yellow(text)
    } else {
        bright_red(text)
    }
}

pub fn status(status: Status) -> StyledObject<String> {
    let text = format!("{} {status}", status.emoji());
    match status {
        Status::Success => bright_green(text),
        Status::Failed => bright_red(text),
        Status::Running | Status::Pending => bright_yellow(text),
        Status::Skipped | Status::Unknown => dim(text),
    }
}

pub fn add_section_header(output: &mut String, emoji: &str, title: &str) {
    let _ = writeln!(output, "{} {}", bright(emoji), bright(title).underlined());
}
