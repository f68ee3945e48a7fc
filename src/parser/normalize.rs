use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

use crate::models::Status;

lazy_static! {
    /// One `<amount> <unit>` pair. The amount is a number or an article ("a minute").
    static ref DURATION_PART: Regex = Regex::new(
        r"(?i)(?:(\d+(?:\.\d+)?)\s*|\b(an?)\s+)(hours?|hrs?|h|minutes?|mins?|m|seconds?|secs?|s)"
    )
    .unwrap();
    /// `MM:SS` or `HH:MM:SS`
    static ref CLOCK: Regex = Regex::new(r"^\s*(\d{1,4}):([0-5]\d)(?::([0-5]\d))?\s*$").unwrap();
    static ref BARE_SECONDS: Regex = Regex::new(r"^\s*(\d+(?:\.\d+)?)\s*$").unwrap();
}

const VARIATION_SELECTOR: char = '\u{fe0f}';
/// Durations beyond a year are treated as unreadable.
const MAX_DURATION_SECS: f64 = 366.0 * 24.0 * 3600.0;

/// Maps a status marker (emoji, GitHub shortcode or word) to a [`Status`].
///
/// Unrecognized markers become [`Status::Unknown`]. When the whole token is
/// not a known marker, each word is tried in turn so that "✅ Succeeded" or
/// "failed after retry" still resolve.
pub fn normalize_status(token: &str) -> Status {
    let cleaned: String = token.chars().filter(|c| *c != VARIATION_SELECTOR).collect();
    let cleaned = strip_decoration(&cleaned).to_lowercase();

    let whole = match_marker(&cleaned);
    if whole != Status::Unknown {
        return whole;
    }

    cleaned
        .split_whitespace()
        .map(|word| match_marker(strip_decoration(word)))
        .find(|status| *status != Status::Unknown)
        .unwrap_or(Status::Unknown)
}

fn strip_decoration(text: &str) -> &str {
    text.trim()
        .trim_matches(|c: char| matches!(c, '*' | '_' | '`' | ',' | '.' | '!'))
        .trim()
}

fn match_marker(marker: &str) -> Status {
    match marker {
        "✅" | "✔" | "✓" | "☑" | "🟢" | ":heavy_check_mark:" | ":white_check_mark:"
        | ":ballot_box_with_check:" | "success" | "succeeded" | "successful" | "passed"
        | "pass" | "ok" | "done" | "completed" => Status::Success,
        "❌" | "✖" | "✗" | "✘" | "❎" | "🔴" | ":x:" | ":heavy_multiplication_x:"
        | ":negative_squared_cross_mark:" | "failed" | "failure" | "fail" | "error"
        | "errored" => Status::Failed,
        "⏭" | "⤼" | ":fast_forward:" | ":next_track_button:" | "skip" | "skipped" => {
            Status::Skipped
        }
        "🔄" | "⏳" | "⌛" | ":arrows_counterclockwise:" | ":hourglass:"
        | ":hourglass_flowing_sand:" | "running" | "in progress" | "in-progress" => {
            Status::Running
        }
        "⏸" | ":pause_button:" | "pending" | "queued" | "waiting" => Status::Pending,
        _ => Status::Unknown,
    }
}

/// Parses a human duration phrase into whole seconds.
///
/// Accepts compound phrases ("1h 2m 3s", "2m15s"), long unit words
/// ("59 seconds"), articles ("a minute", "an hour"), clock notation
/// ("02:15", "1:02:03") and a bare number of seconds ("45"). Returns `None`
/// when nothing matches or the value exceeds a year.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn normalize_duration(text: &str) -> Option<u64> {
    let total = clock_seconds(text)
        .or_else(|| {
            BARE_SECONDS
                .captures(text)
                .and_then(|caps| caps[1].parse::<f64>().ok())
        })
        .or_else(|| unit_phrase_seconds(text))?;

    if !total.is_finite() || total > MAX_DURATION_SECS {
        debug!("Ignoring implausible duration '{}'", text.trim());
        return None;
    }

    Some(total.round() as u64)
}

fn clock_seconds(text: &str) -> Option<f64> {
    let caps = CLOCK.captures(text)?;
    let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<f64>().ok());

    match field(3) {
        Some(seconds) => Some(field(1)? * 3600.0 + field(2)? * 60.0 + seconds),
        None => Some(field(1)? * 60.0 + field(2)?),
    }
}

fn unit_phrase_seconds(text: &str) -> Option<f64> {
    let mut total = 0.0_f64;
    let mut matched = false;

    for caps in DURATION_PART.captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };

        // "5ms" or "3 mice" must not read as minutes
        let followed_by_letter = text[whole.end()..]
            .chars()
            .next()
            .is_some_and(char::is_alphabetic);
        if followed_by_letter {
            continue;
        }

        let amount = match (caps.get(1), caps.get(2)) {
            (Some(number), _) => match number.as_str().parse::<f64>() {
                Ok(value) => value,
                Err(_) => continue,
            },
            (None, Some(_article)) => 1.0,
            (None, None) => continue,
        };

        let unit = caps.get(3).map_or("", |u| u.as_str());
        total += amount * unit_seconds(unit);
        matched = true;
    }

    matched.then_some(total)
}

fn unit_seconds(unit: &str) -> f64 {
    match unit.to_lowercase().chars().next() {
        Some('h') => 3600.0,
        Some('m') => 60.0,
        _ => 1.0,
    }
}
