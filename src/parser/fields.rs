use chrono::{DateTime, NaiveDateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use super::normalize::normalize_duration;

lazy_static! {
    static ref LABELED_LINE: Regex = Regex::new(
        r"(?i)^\s*(?:[-*+]\s+|#{1,6}\s*)?[*_]{0,2}\s*(pipeline\s*name|pipelinerun|pipeline\s+run|pipeline\s+logs|running\s+pipeline|pipeline|success\s*rate|duration|start\s*time)\s*[*_]{0,2}\s*:\s*[*_]{0,2}\s*(.*?)\s*$"
    )
    .unwrap();
    static ref TABLE_PIPELINE_FIELD: Regex =
        Regex::new(r"(?i)^\s*\|\s*[*_]{0,2}pipeline(?:\s*name)?[*_]{0,2}\s*\|\s*([^|]+?)\s*\|")
            .unwrap();
    static ref BACKTICK_TOKEN: Regex = Regex::new(r"`([^`\s]+)`").unwrap();
    static ref PIPELINE_NAME: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/-]*$").unwrap();
    static ref PERCENTAGE: Regex = Regex::new(r"(\d+(?:\.\d+)?)\s*%").unwrap();
    static ref URL: Regex = Regex::new(r"https?://[^\s)>\]]+").unwrap();
    static ref LOG_LINK: Regex =
        Regex::new(r"(?i)\[([^\]]*\blogs?\b[^\]]*)\]\((https?://[^)\s]+)\)").unwrap();
    static ref TROUBLESHOOTING_LINK: Regex =
        Regex::new(r"(?i)\[troubleshooting guide\]\(([^)\s]+)\)").unwrap();
    static ref RESTART_COMMAND: Regex =
        Regex::new(r"(?i)Run\s+`([^`]+)`\s+in case of pipeline failure").unwrap();
}

/// Labeled report fields recognized at the start of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Label {
    Pipeline,
    PipelineRun,
    PipelineLogs,
    SuccessRate,
    Duration,
    StartTime,
}

impl Label {
    fn from_key(key: &str) -> Option<Self> {
        let key = key.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        match key.as_str() {
            "pipeline" | "pipeline name" | "pipelinename" | "running pipeline" => {
                Some(Label::Pipeline)
            }
            "pipelinerun" | "pipeline run" => Some(Label::PipelineRun),
            "pipeline logs" => Some(Label::PipelineLogs),
            "success rate" | "successrate" => Some(Label::SuccessRate),
            "duration" => Some(Label::Duration),
            "start time" | "starttime" => Some(Label::StartTime),
            _ => None,
        }
    }
}

/// Recognizes `key: value` and `**key**: value` lines, returning the label
/// and the value with emphasis and code markers removed.
pub(super) fn labeled_line(line: &str) -> Option<(Label, String)> {
    let caps = LABELED_LINE.captures(line)?;
    let label = Label::from_key(&caps[1])?;
    Some((label, clean_value(&caps[2])))
}

pub(super) fn is_labeled_key(name: &str) -> bool {
    Label::from_key(name).is_some()
}

fn clean_value(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| matches!(c, '*' | '_' | '`'))
        .trim()
        .to_string()
}

/// Parses the timestamp formats seen in reports; `None` for blanks, dashes
/// and anything unreadable.
pub(super) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    const OFFSET_FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%:z",
        "%Y-%m-%d %H:%M:%S%z",
        "%Y-%m-%d %H:%M:%S %z",
        "%Y-%m-%dT%H:%M:%S%z",
    ];
    const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

    let text = clean_value(raw);
    if text.is_empty() || text == "-" {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(&text) {
        return Some(parsed.with_timezone(&Utc));
    }

    OFFSET_FORMATS
        .iter()
        .find_map(|format| DateTime::parse_from_str(&text, format).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
        .or_else(|| {
            let naive = text.trim_end_matches(" UTC").trim_end_matches('Z');
            NAIVE_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(naive, format).ok())
                .map(|parsed| parsed.and_utc())
        })
}

/// Pipeline-level values found in a report body.
///
/// `success_rate` and `duration_secs` are what the report claims; they are
/// kept for display and never used to derive statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportFields {
    pub pipeline_name: Option<String>,
    pub pipeline_run: Option<String>,
    pub success_rate: Option<f64>,
    pub duration_secs: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub log_url: Option<String>,
    pub troubleshooting_url: Option<String>,
    pub restart_command: Option<String>,
}

pub(super) fn extract_fields(body: &str) -> ReportFields {
    let mut fields = ReportFields::default();

    for (label, value) in body.lines().filter_map(labeled_line) {
        match label {
            Label::Pipeline if fields.pipeline_name.is_none() => {
                fields.pipeline_name = pipeline_token(&value);
            }
            Label::PipelineRun if fields.pipeline_run.is_none() => {
                fields.pipeline_run = pipeline_token(&value);
            }
            Label::PipelineLogs if fields.log_url.is_none() => {
                fields.log_url = URL.find(&value).map(|m| m.as_str().to_string());
            }
            Label::SuccessRate if fields.success_rate.is_none() => {
                fields.success_rate = PERCENTAGE
                    .captures(&value)
                    .and_then(|caps| caps[1].parse().ok());
            }
            Label::Duration if fields.duration_secs.is_none() => {
                fields.duration_secs = normalize_duration(&value);
            }
            Label::StartTime if fields.started_at.is_none() => {
                fields.started_at = parse_timestamp(&value);
            }
            _ => {}
        }
    }

    if fields.pipeline_name.is_none() {
        fields.pipeline_name = body
            .lines()
            .find_map(|line| TABLE_PIPELINE_FIELD.captures(line))
            .and_then(|caps| pipeline_token(&caps[1]))
            .or_else(|| backtick_pipeline_name(body));
    }

    if fields.log_url.is_none() {
        fields.log_url = LOG_LINK.captures(body).map(|caps| caps[2].to_string());
    }

    fields.troubleshooting_url = TROUBLESHOOTING_LINK
        .captures(body)
        .map(|caps| caps[1].to_string());
    fields.restart_command = RESTART_COMMAND
        .captures(body)
        .map(|caps| caps[1].trim().to_string());

    fields
}

fn pipeline_token(value: &str) -> Option<String> {
    let token = clean_value(value.split_whitespace().next().unwrap_or(""));
    PIPELINE_NAME.is_match(&token).then_some(token)
}

fn backtick_pipeline_name(body: &str) -> Option<String> {
    BACKTICK_TOKEN
        .captures_iter(body)
        .map(|caps| caps[1].to_string())
        .find(|token| token.contains('-') && PIPELINE_NAME.is_match(token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_labeled_line_variants() {
        let (label, value) = labeled_line("**Pipeline**: `example-tekton-pipeline`").unwrap();
        assert_eq!(label, Label::Pipeline);
        assert_eq!(value, "example-tekton-pipeline");

        let (label, value) = labeled_line("Pipeline: *operator-hosted-pipeline*").unwrap();
        assert_eq!(label, Label::Pipeline);
        assert_eq!(value, "operator-hosted-pipeline");

        let (label, value) = labeled_line("**Success Rate:** 75.0%").unwrap();
        assert_eq!(label, Label::SuccessRate);
        assert_eq!(value, "75.0%");

        let (label, _) = labeled_line("Pipeline logs: https://example.com/x").unwrap();
        assert_eq!(label, Label::PipelineLogs);

        let (label, value) = labeled_line("PipelineRun: *op-run-x7k2q*").unwrap();
        assert_eq!(label, Label::PipelineRun);
        assert_eq!(value, "op-run-x7k2q");

        assert!(labeled_line("| Status | Task |").is_none());
        assert!(labeled_line("- build: ✅").is_none());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 2, 10, 0, 5).unwrap();
        assert_eq!(parse_timestamp("2024-05-02 10:00:05+00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-02T10:00:05Z"), Some(expected));
        assert_eq!(parse_timestamp("*2024-05-02 10:00:05*"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-02 12:00:05+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-02 10:00:05"), Some(expected));
        assert_eq!(parse_timestamp("-"), None);
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_extract_fields_from_labeled_report() {
        let body = "\
# Pipeline Summary

**Pipeline**: `example-tekton-pipeline`
**Success Rate**: 75.0%
**Duration**: 12m 45s
Start Time: 2024-05-02 10:00:00+00:00
Pipeline logs: https://console.example.com/logs/run-1

Please refer to the [troubleshooting guide](https://docs.example.com/ts).
Run `/pipeline restart example-tekton-pipeline` in case of pipeline failure.
";
        let fields = extract_fields(body);
        assert_eq!(fields.pipeline_name.as_deref(), Some("example-tekton-pipeline"));
        assert_eq!(fields.success_rate, Some(75.0));
        assert_eq!(fields.duration_secs, Some(765));
        assert_eq!(
            fields.started_at,
            Some(Utc.with_ymd_and_hms(2024, 5, 2, 10, 0, 0).unwrap())
        );
        assert_eq!(
            fields.log_url.as_deref(),
            Some("https://console.example.com/logs/run-1")
        );
        assert_eq!(
            fields.troubleshooting_url.as_deref(),
            Some("https://docs.example.com/ts")
        );
        assert_eq!(
            fields.restart_command.as_deref(),
            Some("/pipeline restart example-tekton-pipeline")
        );
    }

    #[test]
    fn test_pipeline_name_fallbacks() {
        let table = "| Pipeline | `release-pipeline` |\n|---|---|\n";
        assert_eq!(
            extract_fields(table).pipeline_name.as_deref(),
            Some("release-pipeline")
        );

        let backtick = "Ran `static-checks` on commit `abc 123`.";
        assert_eq!(
            extract_fields(backtick).pipeline_name.as_deref(),
            Some("static-checks")
        );

        assert_eq!(extract_fields("no name here").pipeline_name, None);
    }

    #[test]
    fn test_log_link_fallback() {
        let body = "See [pipeline logs](https://ci.example.com/run/9) for details.";
        assert_eq!(
            extract_fields(body).log_url.as_deref(),
            Some("https://ci.example.com/run/9")
        );
    }
}
