//! Statistics store.
//!
//! Owns the persisted document (aggregates plus execution history) and is the
//! only component that reads or writes the backing file. Updates take
//! `&mut self` and queries take `&self`, so a query always sees a consistent
//! snapshot and updates are serialized by ownership.

mod aggregate;
mod persist;
mod query;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{debug, info};
use serde::Serialize;

use crate::error::Result;
use crate::models::{PipelineExecution, ReportMetadata};
use crate::parser;

pub use aggregate::{Aggregate, PipelineStats, StatusCounts, TaskStats};
pub use persist::LoadOutcome;
pub use query::{LogEntry, Overview, QueryFilter, TaskSummary};

use persist::{StoreDocument, StoreLock};

/// Result of folding a single execution into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateResult {
    Added,
    Duplicate,
}

/// Input that never reached the store, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedItem {
    pub source: String,
    pub reason: String,
}

/// Outcome of a batch ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub added: usize,
    pub duplicates: usize,
    pub skipped: Vec<SkippedItem>,
}

impl IngestReport {
    pub fn processed(&self) -> usize {
        self.added + self.duplicates + self.skipped.len()
    }
}

/// Persistent pipeline statistics backed by a single JSON file.
pub struct StatsStore {
    path: PathBuf,
    document: StoreDocument,
    /// Identity keys of every execution ever accepted
    seen: HashSet<String>,
    max_history: Option<usize>,
    _lock: StoreLock,
}

impl StatsStore {
    /// Opens the store at `path`, creating an empty one if the file is absent.
    ///
    /// The store is held exclusively until the returned value is dropped; a
    /// second open of the same path fails with
    /// [`PipeLensError::StoreLocked`](crate::error::PipeLensError::StoreLocked).
    ///
    /// An unusable file (corrupt, unknown format version, inconsistent
    /// counters) is moved aside to `<path>.corrupt` (timestamped when that
    /// name is taken) and an empty store is started; the returned
    /// [`LoadOutcome`] tells the caller which case applied.
    ///
    /// # Arguments
    ///
    /// * `path` - Location of the store file
    /// * `max_history` - Maximum number of executions kept as raw history;
    ///   `None` keeps everything. Aggregates are never trimmed.
    pub fn open(
        path: impl Into<PathBuf>,
        max_history: Option<usize>,
    ) -> Result<(Self, LoadOutcome)> {
        let path = path.into();
        let lock = StoreLock::acquire(&path)?;
        let (document, outcome) = persist::load(&path);

        let seen = document
            .executions
            .iter()
            .map(PipelineExecution::identity_key)
            .chain(document.retired_keys.iter().cloned())
            .collect();

        info!("Statistics store opened at: {}", path.display());

        let store = Self {
            path,
            document,
            seen,
            max_history,
            _lock: lock,
        };
        Ok((store, outcome))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Folds one execution into the store and persists it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written. The in-memory and
    /// on-disk state are then left exactly as before the call.
    pub fn update(&mut self, execution: PipelineExecution) -> Result<UpdateResult> {
        let (added, _) = self.update_batch(std::iter::once(execution))?;
        Ok(if added == 1 {
            UpdateResult::Added
        } else {
            UpdateResult::Duplicate
        })
    }

    /// Folds many executions and persists once at the end.
    ///
    /// Returns `(added, duplicates)`. Nothing is written when every execution
    /// was a duplicate.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written; no execution of the
    /// batch is kept in that case.
    pub fn update_batch(
        &mut self,
        executions: impl IntoIterator<Item = PipelineExecution>,
    ) -> Result<(usize, usize)> {
        let mut staged = self.document.clone();
        let mut staged_seen = self.seen.clone();
        let (mut added, mut duplicates) = (0, 0);

        for execution in executions {
            match fold_execution(&mut staged, &mut staged_seen, execution, self.max_history) {
                UpdateResult::Added => added += 1,
                UpdateResult::Duplicate => duplicates += 1,
            }
        }

        if added > 0 {
            staged.last_updated = Some(Utc::now());
            persist::write_json_atomic(&self.path, &staged)?;
            self.document = staged;
            self.seen = staged_seen;
            info!(
                "Saved {added} new executions to {} ({} retained)",
                self.path.display(),
                self.document.executions.len()
            );
        }

        Ok((added, duplicates))
    }

    /// Parses raw comments and folds every recognized report into the store.
    ///
    /// Comments without a pipeline summary or without tasks are reported as
    /// skipped and never touch the store.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store cannot be written.
    pub fn ingest<'a>(
        &mut self,
        comments: impl IntoIterator<Item = (&'a str, ReportMetadata)>,
    ) -> Result<IngestReport> {
        let (executions, skipped) = parse_batch(comments);
        let (added, duplicates) = self.update_batch(executions)?;
        Ok(IngestReport {
            added,
            duplicates,
            skipped,
        })
    }

    /// Writes the whole store document to `destination`.
    ///
    /// # Errors
    ///
    /// Returns an error if the destination cannot be written.
    pub fn export(&self, destination: &Path) -> Result<()> {
        persist::write_json_atomic(destination, &self.document)?;
        info!("Exported statistics store to: {}", destination.display());
        Ok(())
    }

    pub fn executions(&self) -> &[PipelineExecution] {
        &self.document.executions
    }

    pub fn pipeline_stats(&self, pipeline: &str) -> Option<&PipelineStats> {
        self.document.pipelines.get(pipeline)
    }

    pub fn task_stats(&self, pipeline: &str, task: &str) -> Option<&TaskStats> {
        self.document
            .tasks
            .get(pipeline)
            .and_then(|tasks| tasks.get(&crate::models::task_identity(task)))
    }

    pub fn last_updated(&self) -> Option<chrono::DateTime<Utc>> {
        self.document.last_updated
    }
}

/// Parses raw comments, separating recognized executions from skipped items.
///
/// Parsing never fails the batch; every comment yields either an execution
/// or a [`SkippedItem`].
pub fn parse_batch<'a>(
    comments: impl IntoIterator<Item = (&'a str, ReportMetadata)>,
) -> (Vec<PipelineExecution>, Vec<SkippedItem>) {
    let mut executions = Vec::new();
    let mut skipped = Vec::new();

    for (text, metadata) in comments {
        match parser::parse(text, &metadata) {
            Ok(execution) => executions.push(execution),
            Err(failure) => {
                let source = describe_source(&metadata);
                debug!("Skipping {source}: {failure}");
                skipped.push(SkippedItem {
                    source,
                    reason: failure.to_string(),
                });
            }
        }
    }

    (executions, skipped)
}

fn describe_source(metadata: &ReportMetadata) -> String {
    match metadata.comment_id {
        Some(id) => format!("{}#{} comment {id}", metadata.repository, metadata.pr_number),
        None => format!("{}#{}", metadata.repository, metadata.pr_number),
    }
}

/// Applies one execution to the document: dedup, history append, pipeline
/// aggregate and per-(pipeline, task) aggregates.
fn fold_execution(
    document: &mut StoreDocument,
    seen: &mut HashSet<String>,
    execution: PipelineExecution,
    max_history: Option<usize>,
) -> UpdateResult {
    let key = execution.identity_key();
    if !seen.insert(key.clone()) {
        debug!("Duplicate execution {key}, skipping");
        return UpdateResult::Duplicate;
    }

    let pipeline = document
        .pipelines
        .entry(execution.name.clone())
        .or_insert_with(|| PipelineStats {
            name: execution.name.clone(),
            stats: Aggregate::default(),
        });
    pipeline.stats.fold(
        execution.status,
        execution.observed_at,
        &execution.repository,
        execution.duration_secs(),
    );

    let tasks = document.tasks.entry(execution.name.clone()).or_default();
    for task in &execution.tasks {
        let entry = tasks.entry(task.identity()).or_insert_with(|| TaskStats {
            pipeline: execution.name.clone(),
            name: task.name.clone(),
            stats: Aggregate::default(),
        });
        entry.stats.fold(
            task.status,
            execution.observed_at,
            &execution.repository,
            task.duration_secs,
        );
    }

    document.executions.push(execution);

    if let Some(limit) = max_history {
        let excess = document.executions.len().saturating_sub(limit);
        for evicted in document.executions.drain(..excess) {
            document.retired_keys.insert(evicted.identity_key());
        }
    }

    UpdateResult::Added
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::tests::{execution, task};
    use crate::models::Status;
    use crate::parser::tests::{metadata, SAMPLE_TABLE_REPORT};
    use crate::parser::ParseFailure;
    use std::fs;
    use tempfile::TempDir;

    pub(crate) fn open_temp(dir: &TempDir) -> StatsStore {
        StatsStore::open(dir.path().join("pipeline_stats.json"), None)
            .unwrap()
            .0
    }

    /// Mixed history over two repositories and two pipelines.
    pub(crate) fn seeded_store(dir: &TempDir) -> StatsStore {
        let mut store = open_temp(dir);
        let executions = vec![
            execution("build", "org/a", 1, 1, vec![task("compile", Status::Success, Some(60))]),
            execution("build", "org/a", 2, 2, vec![task("compile", Status::Failed, Some(30))]),
            execution("build", "org/b", 3, 3, vec![task("compile", Status::Failed, None)]),
            execution("build", "org/a", 4, 4, vec![task("compile", Status::Failed, Some(10))]),
            execution("build", "org/a", 5, 5, vec![task("compile", Status::Success, Some(20))]),
            execution(
                "release",
                "org/a",
                6,
                6,
                vec![
                    task("compile", Status::Success, Some(40)),
                    task("publish", Status::Failed, Some(5)),
                ],
            ),
            execution("release", "org/b", 7, 7, vec![task("publish", Status::Skipped, None)]),
        ];
        let (added, duplicates) = store.update_batch(executions).unwrap();
        assert_eq!((added, duplicates), (7, 0));
        store
    }

    #[test]
    fn test_update_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut store = open_temp(&dir);
        let exec = execution("p", "org/a", 1, 10, vec![task("t", Status::Success, Some(5))]);

        assert_eq!(store.update(exec.clone()).unwrap(), UpdateResult::Added);
        let after_first = store.pipeline_stats("p").cloned();
        assert_eq!(store.update(exec).unwrap(), UpdateResult::Duplicate);

        assert_eq!(store.pipeline_stats("p").cloned(), after_first);
        assert_eq!(store.executions().len(), 1);
        assert_eq!(store.task_stats("p", "t").unwrap().stats.total(), 1);
    }

    #[test]
    fn test_duplicates_within_one_batch() {
        let dir = TempDir::new().unwrap();
        let mut store = open_temp(&dir);
        let exec = execution("p", "org/a", 1, 10, vec![task("t", Status::Success, None)]);

        let result = store.update_batch(vec![exec.clone(), exec]).unwrap();
        assert_eq!(result, (1, 1));
    }

    #[test]
    fn test_run_id_dedups_across_timestamps() {
        let dir = TempDir::new().unwrap();
        let mut store = open_temp(&dir);
        let mut first = execution("p", "org/a", 1, 10, vec![task("t", Status::Success, None)]);
        first.run_id = Some("p-run-1".to_string());
        let mut second = execution("p", "org/a", 1, 11, vec![task("t", Status::Success, None)]);
        second.run_id = Some("p-run-1".to_string());

        assert_eq!(store.update(first).unwrap(), UpdateResult::Added);
        assert_eq!(store.update(second).unwrap(), UpdateResult::Duplicate);
    }

    #[test]
    fn test_sample_report_end_to_end() {
        let dir = TempDir::new().unwrap();
        let mut store = open_temp(&dir);

        let report = store
            .ingest(vec![(SAMPLE_TABLE_REPORT, metadata("org/operators", 42))])
            .unwrap();
        assert_eq!(report.added, 1);

        let pipeline = store.pipeline_stats("operator-hosted-pipeline").unwrap();
        assert_eq!(pipeline.stats.counts.total, 1);
        assert_eq!(pipeline.stats.counts.failed, 1);

        let detect = store
            .task_stats("operator-hosted-pipeline", "detect-changes")
            .unwrap();
        assert_eq!(detect.stats.counts.failed, 1);

        let clone = store
            .task_stats("operator-hosted-pipeline", "clone-repository")
            .unwrap();
        assert_eq!(clone.stats.counts.success, 1);
        assert_eq!(clone.stats.average_duration_secs(), Some(59.0));

        let clone_base = store
            .task_stats("operator-hosted-pipeline", "Clone-Repository-Base")
            .unwrap();
        assert_eq!(clone_base.stats.counts.success, 1);
        assert_eq!(clone_base.stats.average_duration_secs(), Some(60.0));
    }

    #[test]
    fn test_reingesting_sample_counts_once() {
        let dir = TempDir::new().unwrap();
        let mut store = open_temp(&dir);

        let first = store
            .ingest(vec![(SAMPLE_TABLE_REPORT, metadata("org/operators", 42))])
            .unwrap();
        let second = store
            .ingest(vec![(SAMPLE_TABLE_REPORT, metadata("org/operators", 42))])
            .unwrap();

        assert_eq!((first.added, first.duplicates), (1, 0));
        assert_eq!((second.added, second.duplicates), (0, 1));
        let stats = store.pipeline_stats("operator-hosted-pipeline").unwrap();
        assert_eq!(stats.stats.total(), 1, "Should count the run once");
    }

    #[test]
    fn test_comment_without_summary_does_not_mutate_store() {
        let dir = TempDir::new().unwrap();
        let mut store = open_temp(&dir);

        let report = store
            .ingest(vec![("Thanks, looks good to me!", metadata("org/repo", 1))])
            .unwrap();

        assert_eq!(report.added, 0);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].reason, ParseFailure::NoSummaryFound.to_string());
        assert!(store.executions().is_empty());
        assert!(
            !store.path().exists(),
            "Should not write the store when nothing was added"
        );
    }

    #[test]
    fn test_batch_continues_past_bad_items() {
        let dir = TempDir::new().unwrap();
        let mut store = open_temp(&dir);

        let report = store
            .ingest(vec![
                ("# Pipeline Summary\n\nnothing here\n", metadata("org/repo", 1)),
                ("no heading", metadata("org/repo", 2)),
                (SAMPLE_TABLE_REPORT, metadata("org/repo", 3)),
            ])
            .unwrap();

        assert_eq!(report.added, 1);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.processed(), 3);
        assert_eq!(report.skipped[0].source, "org/repo#1 comment 9001");
    }

    #[test]
    fn test_totals_equal_sum_of_counters() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir);

        for name in ["build", "release"] {
            let stats = store.pipeline_stats(name).unwrap();
            assert!(stats.stats.counts.is_consistent(), "Should be consistent for {name}");
        }
        for (pipeline, task) in [("build", "compile"), ("release", "compile"), ("release", "publish")] {
            let stats = store.task_stats(pipeline, task).unwrap();
            assert!(stats.stats.counts.is_consistent());
        }
    }

    #[test]
    fn test_task_stats_are_scoped_per_pipeline() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir);

        assert_eq!(store.task_stats("build", "compile").unwrap().stats.total(), 5);
        assert_eq!(store.task_stats("release", "compile").unwrap().stats.total(), 1);
        assert!(store.task_stats("build", "publish").is_none());
    }

    #[test]
    fn test_aggregates_match_fold_over_history() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir);

        let mut expected = Aggregate::default();
        for exec in store.executions().iter().filter(|e| e.name == "build") {
            expected.fold(exec.status, exec.observed_at, &exec.repository, exec.duration_secs());
        }
        assert_eq!(store.pipeline_stats("build").unwrap().stats, expected);
    }

    #[test]
    fn test_success_rate_recomputed_from_counters() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir);

        let stats = &store.pipeline_stats("build").unwrap().stats;
        assert_eq!(stats.counts.success, 2);
        assert_eq!(stats.counts.total, 5);
        assert!((stats.success_rate() - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reload_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pipeline_stats.json");
        let exec = execution("p", "org/a", 1, 10, vec![task("t", Status::Failed, Some(7))]);

        {
            let (mut store, outcome) = StatsStore::open(&path, None).unwrap();
            assert_eq!(outcome, LoadOutcome::Created);
            store.update(exec.clone()).unwrap();
        }

        let (mut reopened, outcome) = StatsStore::open(&path, None).unwrap();
        assert_eq!(outcome, LoadOutcome::Loaded { executions: 1 });
        assert_eq!(reopened.executions(), &[exec.clone()]);
        assert_eq!(reopened.pipeline_stats("p").unwrap().stats.counts.failed, 1);
        assert!(reopened.last_updated().is_some());
        assert_eq!(
            reopened.update(exec).unwrap(),
            UpdateResult::Duplicate,
            "Should remember identities across reloads"
        );
    }

    #[test]
    fn test_corrupt_store_resets_and_informs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pipeline_stats.json");
        fs::write(&path, "[1, 2,").unwrap();

        let (store, outcome) = StatsStore::open(&path, None).unwrap();
        assert!(matches!(outcome, LoadOutcome::Reset { .. }));
        assert!(store.executions().is_empty());
        assert!(dir.path().join("pipeline_stats.json.corrupt").exists());
    }

    #[test]
    fn test_second_open_is_refused_while_held() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pipeline_stats.json");

        let (mut store, _) = StatsStore::open(&path, None).unwrap();
        let err = StatsStore::open(&path, None).err().unwrap();
        assert!(
            matches!(err, crate::error::PipeLensError::StoreLocked { .. }),
            "Should refuse a concurrent open, got {err:?}"
        );

        store
            .update(execution("p", "org/a", 1, 10, vec![task("t", Status::Success, None)]))
            .unwrap();
        drop(store);

        let (reopened, outcome) = StatsStore::open(&path, None).unwrap();
        assert_eq!(outcome, LoadOutcome::Loaded { executions: 1 });
        assert_eq!(reopened.executions().len(), 1);
    }

    #[test]
    fn test_failed_persist_leaves_store_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pipeline_stats.json");
        let (mut store, _) = StatsStore::open(&path, None).unwrap();
        // A non-empty directory at the store path makes the final rename fail.
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep"), "").unwrap();

        let exec = execution("p", "org/a", 1, 10, vec![task("t", Status::Success, None)]);

        assert!(store.update(exec).is_err(), "Should surface the write failure");
        assert!(store.executions().is_empty());
        assert!(store.pipeline_stats("p").is_none());
        assert!(path.is_dir());
    }

    #[test]
    fn test_bounded_history_keeps_aggregates_and_dedup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pipeline_stats.json");
        let (mut store, _) = StatsStore::open(&path, Some(2)).unwrap();

        let runs: Vec<_> = (1..=3)
            .map(|hour| execution("p", "org/a", 1, hour, vec![task("t", Status::Success, None)]))
            .collect();
        store.update_batch(runs.clone()).unwrap();

        assert_eq!(store.executions().len(), 2);
        assert_eq!(store.executions()[0], runs[1]);
        assert_eq!(store.pipeline_stats("p").unwrap().stats.total(), 3);

        drop(store);
        let (mut reopened, _) = StatsStore::open(&path, Some(2)).unwrap();
        assert_eq!(
            reopened.update(runs[0].clone()).unwrap(),
            UpdateResult::Duplicate,
            "Should still recognize evicted executions"
        );
    }

    #[test]
    fn test_export_writes_document() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir);
        let target = dir.path().join("export").join("stats.json");

        store.export(&target).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&target).unwrap()).unwrap();
        assert_eq!(value["format_version"], 1);
        assert_eq!(value["executions"].as_array().unwrap().len(), 7);
        assert!(value["tasks"]["release"]["publish"].is_object());
    }
}
