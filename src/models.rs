use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Canonical status of a task or of a whole pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failed,
    Skipped,
    Running,
    Pending,
    Unknown,
}

impl Status {
    pub const ALL: [Status; 6] = [
        Status::Success,
        Status::Failed,
        Status::Skipped,
        Status::Running,
        Status::Pending,
        Status::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Failed => "failed",
            Status::Skipped => "skipped",
            Status::Running => "running",
            Status::Pending => "pending",
            Status::Unknown => "unknown",
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            Status::Success => "✅",
            Status::Failed => "❌",
            Status::Skipped => "⏭️",
            Status::Running => "🔄",
            Status::Pending => "⏸️",
            Status::Unknown => "❓",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| {
                format!(
                    "invalid status '{s}'. Valid options: success, failed, skipped, running, pending, unknown"
                )
            })
    }
}

/// Identity form of a task name: case-insensitive with whitespace collapsed.
pub fn task_identity(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// One task (step) of a pipeline run as reported in a summary comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecution {
    /// Task name as displayed in the report, trimmed
    pub name: String,
    pub status: Status,
    /// Task duration in seconds, absent when the report had none or it was unreadable
    pub duration_secs: Option<u64>,
    /// Link to the task's logs
    pub log_url: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    /// Free-form note attached to a failed task (e.g. "test failure")
    pub error_message: Option<String>,
}

impl TaskExecution {
    pub fn identity(&self) -> String {
        task_identity(&self.name)
    }
}

/// Metadata about where a report was found.
///
/// Supplied by whoever fetched the comment; the report text itself does not
/// reliably carry repository or PR information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Repository in `owner/name` form
    pub repository: String,
    pub pr_number: u64,
    /// When the report was posted (or observed)
    pub observed_at: DateTime<Utc>,
    /// Run identifier known to the caller; takes precedence over one found in the text
    pub run_id: Option<String>,
    pub pr_url: Option<String>,
    pub comment_id: Option<u64>,
}

/// A single pipeline run extracted from a summary comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineExecution {
    pub name: String,
    pub repository: String,
    pub pr_number: u64,
    pub pr_url: Option<String>,
    pub comment_id: Option<u64>,
    /// PipelineRun name or caller-supplied run id
    pub run_id: Option<String>,
    pub observed_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    /// Derived from task statuses, never copied from report text
    pub status: Status,
    pub tasks: Vec<TaskExecution>,
    /// Success rate as printed in the report (display hint only)
    pub reported_success_rate: Option<f64>,
    /// Duration as printed in the report (display hint only)
    pub reported_duration_secs: Option<u64>,
    pub log_url: Option<String>,
    pub troubleshooting_url: Option<String>,
    pub restart_command: Option<String>,
}

impl PipelineExecution {
    /// Derives the overall status of a run from its tasks.
    ///
    /// Any failed task makes the run failed. Otherwise the run is successful
    /// when at least one task succeeded and none is unknown. Everything else
    /// is unknown.
    pub fn derive_status(tasks: &[TaskExecution]) -> Status {
        if tasks.iter().any(|t| t.status == Status::Failed) {
            Status::Failed
        } else if tasks.iter().any(|t| t.status == Status::Success)
            && tasks.iter().all(|t| t.status != Status::Unknown)
        {
            Status::Success
        } else {
            Status::Unknown
        }
    }

    /// Key used to recognize the same run when it is ingested again.
    ///
    /// Uses the run id when known; otherwise a SHA-256 over the pipeline name,
    /// the ordered task identities and the observed timestamp.
    pub fn identity_key(&self) -> String {
        let discriminator = match &self.run_id {
            Some(run_id) => format!("run:{run_id}"),
            None => {
                let mut hasher = Sha256::new();
                hasher.update(self.name.as_bytes());
                for task in &self.tasks {
                    hasher.update(b"\n");
                    hasher.update(task.identity().as_bytes());
                }
                hasher.update(b"\n");
                hasher.update(self.observed_at.to_rfc3339().as_bytes());
                format!("sha256:{}", hex::encode(hasher.finalize()))
            }
        };

        format!("{}#{}/{discriminator}", self.repository, self.pr_number)
    }

    pub fn count_tasks(&self, status: Status) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// Share of successful tasks, recomputed from the task list.
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.tasks.is_empty() {
            return 0.0;
        }
        (self.count_tasks(Status::Success) as f64 / self.tasks.len() as f64) * 100.0
    }

    /// Run duration in seconds.
    ///
    /// When every timed task also has a start time this is the wall-clock
    /// span from the first start to the last finish, so parallel tasks are
    /// not counted twice. Otherwise it is the sum of the known task
    /// durations. The reported duration is only used when no task carries one.
    pub fn duration_secs(&self) -> Option<u64> {
        let timed: Vec<&TaskExecution> = self
            .tasks
            .iter()
            .filter(|t| t.duration_secs.is_some())
            .collect();
        if timed.is_empty() {
            return self.reported_duration_secs;
        }

        wall_clock_span(&timed).or_else(|| {
            Some(
                timed
                    .iter()
                    .filter_map(|t| t.duration_secs)
                    .fold(0, u64::saturating_add),
            )
        })
    }

    pub fn task(&self, name: &str) -> Option<&TaskExecution> {
        let wanted = task_identity(name);
        self.tasks.iter().find(|t| t.identity() == wanted)
    }
}

/// First start to last finish, if every task has both a start and a duration.
fn wall_clock_span(tasks: &[&TaskExecution]) -> Option<u64> {
    let mut first_start: Option<DateTime<Utc>> = None;
    let mut last_finish: Option<DateTime<Utc>> = None;

    for task in tasks {
        let start = task.start_time?;
        let secs = i64::try_from(task.duration_secs?).ok()?;
        let finish = start.checked_add_signed(chrono::Duration::try_seconds(secs)?)?;

        first_start = Some(first_start.map_or(start, |s| s.min(start)));
        last_finish = Some(last_finish.map_or(finish, |f| f.max(finish)));
    }

    u64::try_from((last_finish? - first_start?).num_seconds()).ok()
}
