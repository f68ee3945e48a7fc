use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Status;

#[allow(clippy::cast_precision_loss)]
pub(crate) fn calculate_rate(count: u64, total: u64) -> f64 {
    if total > 0 {
        (count as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}

/// Per-status execution counters. `total` always equals the sum of the others.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub skipped: u64,
    pub running: u64,
    pub pending: u64,
    pub unknown: u64,
}

impl StatusCounts {
    pub fn record(&mut self, status: Status) {
        self.total += 1;
        *self.counter_mut(status) += 1;
    }

    pub fn get(&self, status: Status) -> u64 {
        match status {
            Status::Success => self.success,
            Status::Failed => self.failed,
            Status::Skipped => self.skipped,
            Status::Running => self.running,
            Status::Pending => self.pending,
            Status::Unknown => self.unknown,
        }
    }

    fn counter_mut(&mut self, status: Status) -> &mut u64 {
        match status {
            Status::Success => &mut self.success,
            Status::Failed => &mut self.failed,
            Status::Skipped => &mut self.skipped,
            Status::Running => &mut self.running,
            Status::Pending => &mut self.pending,
            Status::Unknown => &mut self.unknown,
        }
    }

    pub fn is_consistent(&self) -> bool {
        let sum: u64 = Status::ALL.iter().map(|s| self.get(*s)).sum();
        sum == self.total
    }

    fn merge(&mut self, other: &StatusCounts) {
        self.total += other.total;
        for status in Status::ALL {
            *self.counter_mut(status) += other.get(status);
        }
    }
}

/// Running statistics for a pipeline or for one task within a pipeline.
///
/// Durations are kept as a sum and a count so the average can be updated
/// without re-reading history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub counts: StatusCounts,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub repositories: BTreeSet<String>,
    pub duration_sum_secs: u64,
    pub duration_count: u64,
}

impl Aggregate {
    pub fn fold(
        &mut self,
        status: Status,
        observed_at: DateTime<Utc>,
        repository: &str,
        duration_secs: Option<u64>,
    ) {
        self.counts.record(status);

        if self.first_seen.map_or(true, |first| observed_at < first) {
            self.first_seen = Some(observed_at);
        }
        if self.last_seen.map_or(true, |last| observed_at > last) {
            self.last_seen = Some(observed_at);
        }

        if !repository.is_empty() {
            self.repositories.insert(repository.to_string());
        }

        if let Some(secs) = duration_secs {
            self.duration_sum_secs = self.duration_sum_secs.saturating_add(secs);
            self.duration_count += 1;
        }
    }

    /// Combines two aggregates, used for cross-pipeline task views.
    pub fn merge(&mut self, other: &Aggregate) {
        self.counts.merge(&other.counts);
        self.first_seen = match (self.first_seen, other.first_seen) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.last_seen = match (self.last_seen, other.last_seen) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.repositories.extend(other.repositories.iter().cloned());
        self.duration_sum_secs = self.duration_sum_secs.saturating_add(other.duration_sum_secs);
        self.duration_count += other.duration_count;
    }

    pub fn total(&self) -> u64 {
        self.counts.total
    }

    pub fn success_rate(&self) -> f64 {
        calculate_rate(self.counts.success, self.counts.total)
    }

    pub fn failure_rate(&self) -> f64 {
        calculate_rate(self.counts.failed, self.counts.total)
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn average_duration_secs(&self) -> Option<f64> {
        (self.duration_count > 0)
            .then(|| self.duration_sum_secs as f64 / self.duration_count as f64)
    }
}

/// Persisted statistics of one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub name: String,
    pub stats: Aggregate,
}

/// Persisted statistics of one task, always scoped to a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStats {
    pub pipeline: String,
    /// Display name as first seen; lookups use the task identity
    pub name: String,
    pub stats: Aggregate,
}
