use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

use crate::models::{task_identity, PipelineExecution, Status, TaskExecution};

use super::aggregate::{calculate_rate, Aggregate, PipelineStats};
use super::StatsStore;

/// Conjunctive query filters. Every field is optional.
///
/// `status` is the overall status of an execution. `task` keeps executions
/// that contain the task; `task_status` keeps executions with a task in that
/// status (the named task, when `task` is also set). `min_executions` keeps
/// pipelines with at least that many recorded executions (retained ones, when
/// history is bounded). `limit` is applied last.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    pub repository: Option<String>,
    pub pipeline: Option<String>,
    pub task: Option<String>,
    pub status: Option<Status>,
    pub task_status: Option<Status>,
    pub min_executions: Option<u64>,
    pub limit: Option<usize>,
}

impl QueryFilter {
    /// True when the filter looks inside executions, so summaries must be
    /// folded from history instead of read from the stored aggregates.
    fn narrows_history(&self) -> bool {
        self.repository.is_some()
            || self.status.is_some()
            || self.task.is_some()
            || self.task_status.is_some()
    }

    fn matches(&self, execution: &PipelineExecution, totals: &HashMap<&str, u64>) -> bool {
        if self
            .repository
            .as_ref()
            .is_some_and(|repo| *repo != execution.repository)
        {
            return false;
        }
        if self.pipeline.as_ref().is_some_and(|name| *name != execution.name) {
            return false;
        }
        if self.status.is_some_and(|status| status != execution.status) {
            return false;
        }
        if self.min_executions.is_some_and(|min| {
            totals.get(execution.name.as_str()).copied().unwrap_or(0) < min
        }) {
            return false;
        }

        match (&self.task, self.task_status) {
            (Some(task), wanted) => execution
                .task(task)
                .is_some_and(|t| wanted.map_or(true, |status| t.status == status)),
            (None, Some(status)) => execution.tasks.iter().any(|t| t.status == status),
            (None, None) => true,
        }
    }

    /// Task-level predicate used by task views and task log entries.
    fn matches_task(&self, task: &TaskExecution) -> bool {
        let name_ok = self
            .task
            .as_ref()
            .map_or(true, |name| task_identity(name) == task.identity());
        let status_ok = self.task_status.map_or(true, |status| task.status == status);
        name_ok && status_ok
    }

    fn without_limit(&self) -> Self {
        Self {
            limit: None,
            ..self.clone()
        }
    }
}

/// Statistics of one task, scoped to one pipeline or merged across several.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSummary {
    pub name: String,
    pub pipelines: Vec<String>,
    pub stats: Aggregate,
}

/// Headline numbers over everything a filter selects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overview {
    pub pipelines: usize,
    pub executions: u64,
    pub repositories: usize,
    pub successful: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Where to look when a run (or one of its tasks) needs attention.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub pipeline: String,
    pub repository: String,
    pub pr_number: u64,
    pub pr_url: Option<String>,
    pub observed_at: DateTime<Utc>,
    pub status: Status,
    pub task: Option<String>,
    pub task_status: Option<Status>,
    pub pipeline_log_url: Option<String>,
    pub task_log_url: Option<String>,
    pub troubleshooting_url: Option<String>,
    pub restart_command: Option<String>,
}

impl StatsStore {
    /// True when executions may be missing from history, either because the
    /// history is bounded or because runs were evicted earlier. Queries then
    /// work from retained history only.
    fn history_is_partial(&self) -> bool {
        self.max_history.is_some() || !self.document.retired_keys.is_empty()
    }

    /// Executions per pipeline as seen by queries.
    fn pipeline_totals(&self) -> HashMap<&str, u64> {
        if self.history_is_partial() {
            let mut totals = HashMap::new();
            for exec in &self.document.executions {
                *totals.entry(exec.name.as_str()).or_insert(0) += 1;
            }
            totals
        } else {
            self.document
                .pipelines
                .iter()
                .map(|(name, p)| (name.as_str(), p.stats.total()))
                .collect()
        }
    }

    fn folds_history(&self, filter: &QueryFilter) -> bool {
        filter.narrows_history() || self.history_is_partial()
    }

    /// Retained executions matching `filter`, most recent first.
    ///
    /// Executions observed at the same instant are ordered by ingestion,
    /// later first.
    pub fn list_executions(&self, filter: &QueryFilter) -> Vec<&PipelineExecution> {
        let totals = self.pipeline_totals();
        let mut matching: Vec<(usize, &PipelineExecution)> = self
            .document
            .executions
            .iter()
            .enumerate()
            .filter(|(_, exec)| filter.matches(exec, &totals))
            .collect();

        matching.sort_by(|(ia, a), (ib, b)| {
            b.observed_at.cmp(&a.observed_at).then_with(|| ib.cmp(ia))
        });

        matching
            .into_iter()
            .map(|(_, exec)| exec)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect()
    }

    /// Per-pipeline statistics, busiest pipeline first.
    ///
    /// Filters that only select pipelines are answered from the stored
    /// aggregates. Filters that look inside executions, and any query on a
    /// bounded history, fold the matching history with the same fold used on
    /// update, so the counts always agree with [`StatsStore::list_executions`]
    /// for the same filter. Lifetime totals of a bounded store stay available
    /// through [`StatsStore::pipeline_stats`].
    pub fn pipeline_summaries(&self, filter: &QueryFilter) -> Vec<PipelineStats> {
        let mut summaries: Vec<PipelineStats> = if self.folds_history(filter) {
            let mut folded: IndexMap<&str, Aggregate> = IndexMap::new();
            for exec in self.matching_in_order(filter) {
                folded.entry(exec.name.as_str()).or_default().fold(
                    exec.status,
                    exec.observed_at,
                    &exec.repository,
                    exec.duration_secs(),
                );
            }
            folded
                .into_iter()
                .map(|(name, stats)| PipelineStats {
                    name: name.to_string(),
                    stats,
                })
                .collect()
        } else {
            self.document
                .pipelines
                .values()
                .filter(|p| filter.pipeline.as_ref().map_or(true, |name| *name == p.name))
                .filter(|p| filter.min_executions.map_or(true, |min| p.stats.total() >= min))
                .cloned()
                .collect()
        };

        summaries.sort_by(|a, b| {
            b.stats
                .total()
                .cmp(&a.stats.total())
                .then_with(|| a.name.cmp(&b.name))
        });
        summaries.truncate(filter.limit.unwrap_or(usize::MAX));
        summaries
    }

    /// Per-task statistics.
    ///
    /// Each row is one (pipeline, task) pair unless `cross_pipeline` is set,
    /// in which case tasks with the same identity are merged across
    /// pipelines. With `task_status` set only task runs in that status are
    /// counted.
    pub fn task_summaries(&self, filter: &QueryFilter, cross_pipeline: bool) -> Vec<TaskSummary> {
        let scoped: Vec<TaskSummary> = if self.folds_history(filter) {
            let mut folded: IndexMap<(&str, String), TaskSummary> = IndexMap::new();
            for exec in self.matching_in_order(filter) {
                for task in exec.tasks.iter().filter(|t| filter.matches_task(t)) {
                    folded
                        .entry((exec.name.as_str(), task.identity()))
                        .or_insert_with(|| TaskSummary {
                            name: task.name.clone(),
                            pipelines: vec![exec.name.clone()],
                            stats: Aggregate::default(),
                        })
                        .stats
                        .fold(task.status, exec.observed_at, &exec.repository, task.duration_secs);
                }
            }
            folded.into_values().collect()
        } else {
            self.document
                .tasks
                .iter()
                .filter(|(pipeline, _)| {
                    filter.pipeline.as_ref().map_or(true, |name| name == *pipeline)
                })
                .filter(|(pipeline, _)| {
                    filter.min_executions.map_or(true, |min| {
                        self.document
                            .pipelines
                            .get(*pipeline)
                            .map_or(0, |p| p.stats.total())
                            >= min
                    })
                })
                .flat_map(|(_, tasks)| tasks.values())
                .map(|t| TaskSummary {
                    name: t.name.clone(),
                    pipelines: vec![t.pipeline.clone()],
                    stats: t.stats.clone(),
                })
                .collect()
        };

        let mut summaries = if cross_pipeline {
            merge_across_pipelines(scoped)
        } else {
            scoped
        };

        summaries.sort_by(|a, b| {
            b.stats
                .total()
                .cmp(&a.stats.total())
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.pipelines.cmp(&b.pipelines))
        });
        summaries.truncate(filter.limit.unwrap_or(usize::MAX));
        summaries
    }

    /// Headline numbers, computed from the same rows as
    /// [`StatsStore::pipeline_summaries`].
    pub fn overview(&self, filter: &QueryFilter) -> Overview {
        let summaries = self.pipeline_summaries(&filter.without_limit());

        let executions: u64 = summaries.iter().map(|p| p.stats.counts.total).sum();
        let successful: u64 = summaries.iter().map(|p| p.stats.counts.success).sum();
        let failed: u64 = summaries.iter().map(|p| p.stats.counts.failed).sum();
        let repositories: BTreeSet<&str> = summaries
            .iter()
            .flat_map(|p| p.stats.repositories.iter().map(String::as_str))
            .collect();

        Overview {
            pipelines: summaries.len(),
            executions,
            repositories: repositories.len(),
            successful,
            failed,
            success_rate: calculate_rate(successful, executions),
            last_updated: self.document.last_updated,
        }
    }

    /// Log links of matching executions, most recent first.
    ///
    /// With a `task` or `task_status` filter one entry per matching task is
    /// returned, otherwise one entry per execution.
    pub fn log_entries(&self, filter: &QueryFilter) -> Vec<LogEntry> {
        let task_level = filter.task.is_some() || filter.task_status.is_some();

        let entries = self
            .list_executions(&filter.without_limit())
            .into_iter()
            .flat_map(|exec| {
                let base = LogEntry {
                    pipeline: exec.name.clone(),
                    repository: exec.repository.clone(),
                    pr_number: exec.pr_number,
                    pr_url: exec.pr_url.clone(),
                    observed_at: exec.observed_at,
                    status: exec.status,
                    task: None,
                    task_status: None,
                    pipeline_log_url: exec.log_url.clone(),
                    task_log_url: None,
                    troubleshooting_url: exec.troubleshooting_url.clone(),
                    restart_command: exec.restart_command.clone(),
                };

                if task_level {
                    exec.tasks
                        .iter()
                        .filter(|t| filter.matches_task(t))
                        .map(|t| LogEntry {
                            task: Some(t.name.clone()),
                            task_status: Some(t.status),
                            task_log_url: t.log_url.clone(),
                            ..base.clone()
                        })
                        .collect::<Vec<_>>()
                } else {
                    vec![base]
                }
            });

        entries.take(filter.limit.unwrap_or(usize::MAX)).collect()
    }

    /// Matching executions in ingestion order, the order used for folding.
    fn matching_in_order<'a>(
        &'a self,
        filter: &'a QueryFilter,
    ) -> impl Iterator<Item = &'a PipelineExecution> + 'a {
        let totals = self.pipeline_totals();
        self.document
            .executions
            .iter()
            .filter(move |exec| filter.matches(exec, &totals))
    }
}

fn merge_across_pipelines(scoped: Vec<TaskSummary>) -> Vec<TaskSummary> {
    let mut merged: IndexMap<String, TaskSummary> = IndexMap::new();
    for summary in scoped {
        match merged.get_mut(&task_identity(&summary.name)) {
            Some(existing) => {
                existing.stats.merge(&summary.stats);
                existing.pipelines.extend(summary.pipelines);
                existing.pipelines.sort();
                existing.pipelines.dedup();
            }
            None => {
                merged.insert(task_identity(&summary.name), summary);
            }
        }
    }
    merged.into_values().collect()
}
