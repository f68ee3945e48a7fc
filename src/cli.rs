use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use log::info;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::{Config, OutputFormat};
use crate::github::{GitHubClient, RawComment};
use crate::models::{ReportMetadata, Status};
use crate::output::{self, PhaseProgress};
use crate::parser;
use crate::store::{self, IngestReport, Overview, PipelineStats, QueryFilter, StatsStore, TaskSummary};

#[derive(Parser)]
#[command(name = "pipelens")]
#[command(author, version, about = "CI pipeline summary statistics", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ./pipelens.{toml,json,yaml,yml})
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the statistics store
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Print results as JSON instead of tables
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch pipeline summary comments and fold them into the store
    Ingest(IngestArgs),

    /// Show overall and per-pipeline statistics
    Stats {
        #[command(flatten)]
        filter: FilterArgs,

        /// Break each pipeline down by task
        #[arg(long, default_value_t = false)]
        tasks: bool,
    },

    /// Show per-task statistics
    Tasks {
        #[command(flatten)]
        filter: FilterArgs,

        /// Merge tasks with the same name across pipelines
        #[arg(long, default_value_t = false)]
        cross_pipeline: bool,
    },

    /// List recorded executions, newest first
    List {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Show log links of recorded executions
    Logs {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Write the whole statistics store to a JSON file
    Export { path: PathBuf },

    /// Parse a single report from a file and show what was found
    TestParser { file: PathBuf },
}

#[derive(Args)]
struct IngestArgs {
    /// Repository to scan, e.g. 'owner/repo'
    #[arg(short, long)]
    repo: Option<String>,

    /// Only this pull request
    #[arg(long)]
    pr: Option<u64>,

    /// Maximum number of recent PRs to scan
    #[arg(short, long)]
    limit: Option<usize>,

    /// Only PRs and comments from the last N days
    #[arg(long)]
    days_back: Option<u32>,

    /// Maximum number of PRs listed from the API
    #[arg(long)]
    max_prs: Option<usize>,

    #[arg(short, long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// GitHub API base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Read comments from a JSON file instead of GitHub
    #[arg(long, conflicts_with_all = ["repo", "pr"])]
    from_file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
struct FilterArgs {
    /// Only executions from this repository
    #[arg(short, long)]
    repo: Option<String>,

    /// Only this pipeline
    #[arg(short = 'P', long)]
    pipeline: Option<String>,

    /// Only executions containing this task
    #[arg(short, long)]
    task: Option<String>,

    /// Only executions with this overall status
    #[arg(short, long)]
    status: Option<Status>,

    /// Only executions with a task in this status
    #[arg(long)]
    task_status: Option<Status>,

    /// Only pipelines with at least this many executions
    #[arg(long)]
    min_executions: Option<u64>,

    /// Maximum number of rows
    #[arg(short, long)]
    limit: Option<usize>,
}

impl From<&FilterArgs> for QueryFilter {
    fn from(args: &FilterArgs) -> Self {
        Self {
            repository: args.repo.clone(),
            pipeline: args.pipeline.clone(),
            task: args.task.clone(),
            status: args.status,
            task_status: args.task_status,
            min_executions: args.min_executions,
            limit: args.limit,
        }
    }
}

#[derive(Serialize)]
struct StatsView {
    overview: Overview,
    pipelines: Vec<PipelineStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tasks: Option<Vec<TaskSummary>>,
}

/// Output settings after merging flags over the config file.
#[derive(Debug, Clone, Copy)]
struct Rendering {
    json: bool,
    pretty: bool,
}

impl Cli {
    fn rendering(&self, config: &Config) -> Rendering {
        Rendering {
            json: self.json || config.output.format == OutputFormat::Json,
            pretty: self.pretty || config.output.pretty,
        }
    }

    fn open_store(&self, config: &Config) -> Result<StatsStore> {
        let path = config.store_path(self.data_dir.as_deref())?;
        let (store, outcome) = StatsStore::open(path, config.storage.max_history)?;
        output::print_load_outcome(&outcome);
        Ok(store)
    }

    async fn fetch_comments(config: &Config, args: &IngestArgs) -> Result<Vec<RawComment>> {
        if let Some(path) = &args.from_file {
            return read_comments(path);
        }

        let Some(repo) = args.repo.as_ref().or(config.github.repository.as_ref()) else {
            bail!("No repository given; pass --repo or set github.repository in the config file");
        };
        let token = args.token.clone().or_else(|| config.github.token.clone());
        let base_url = args.base_url.as_deref().unwrap_or(&config.github.base_url);

        let client = GitHubClient::new(base_url, repo, token)?;

        let comments = match args.pr {
            Some(pr) => client.pr_pipeline_comments(pr).await?,
            None => {
                client
                    .search_pipeline_comments(
                        args.limit.unwrap_or(config.github.limit),
                        args.days_back.unwrap_or(config.github.days_back),
                        args.max_prs.unwrap_or(config.github.max_prs),
                    )
                    .await?
            }
        };
        Ok(comments)
    }

    async fn execute_ingest(&self, config: &Config, args: &IngestArgs) -> Result<()> {
        let mut store = self.open_store(config)?;

        let source = match (&args.from_file, &args.repo, args.pr) {
            (Some(path), _, _) => path.display().to_string(),
            (None, Some(repo), Some(pr)) => format!("{repo}#{pr}"),
            (None, Some(repo), None) => repo.clone(),
            (None, None, _) => config
                .github
                .repository
                .clone()
                .unwrap_or_else(|| "GitHub".to_string()),
        };
        info!("Ingesting pipeline summaries from: {source}");

        let progress = PhaseProgress::start_fetch(&source);
        let comments = match Self::fetch_comments(config, args).await {
            Ok(comments) => comments,
            Err(e) => {
                progress.abandon();
                return Err(e);
            }
        };

        let progress = progress.finish_fetch_start_parse(comments.len());
        let (executions, skipped) =
            store::parse_batch(comments.iter().map(|c| (c.body.as_str(), c.metadata())));

        let progress = progress.finish_parse_start_save();
        let (added, duplicates) = match store.update_batch(executions) {
            Ok(counts) => counts,
            Err(e) => {
                progress.abandon();
                return Err(e).with_context(|| {
                    format!("Failed to save statistics to {}", store.path().display())
                });
            }
        };
        progress.finish_save(added);

        let report = IngestReport {
            added,
            duplicates,
            skipped,
        };
        let rendering = self.rendering(config);
        if rendering.json {
            output::print_json(&report, rendering.pretty)
        } else {
            output::print_ingest_report(&report);
            Ok(())
        }
    }

    fn execute_stats(&self, config: &Config, filter: &QueryFilter, with_tasks: bool) -> Result<()> {
        let store = self.open_store(config)?;
        let view = StatsView {
            overview: store.overview(filter),
            pipelines: store.pipeline_summaries(filter),
            tasks: with_tasks.then(|| store.task_summaries(filter, false)),
        };

        let rendering = self.rendering(config);
        if rendering.json {
            return output::print_json(&view, rendering.pretty);
        }
        output::print_summary(&view.overview, &view.pipelines, view.tasks.as_deref());
        Ok(())
    }

    fn execute_tasks(&self, config: &Config, filter: &QueryFilter, cross_pipeline: bool) -> Result<()> {
        let store = self.open_store(config)?;
        let tasks = store.task_summaries(filter, cross_pipeline);

        let rendering = self.rendering(config);
        if rendering.json {
            return output::print_json(&tasks, rendering.pretty);
        }
        output::print_task_summaries(&tasks, cross_pipeline);
        Ok(())
    }

    fn execute_list(&self, config: &Config, filter: &QueryFilter) -> Result<()> {
        let store = self.open_store(config)?;
        let executions = store.list_executions(filter);

        let rendering = self.rendering(config);
        if rendering.json {
            return output::print_json(&executions, rendering.pretty);
        }
        output::print_executions(&executions);
        Ok(())
    }

    fn execute_logs(&self, config: &Config, filter: &QueryFilter) -> Result<()> {
        let store = self.open_store(config)?;
        let entries = store.log_entries(filter);

        let rendering = self.rendering(config);
        if rendering.json {
            return output::print_json(&entries, rendering.pretty);
        }
        output::print_log_entries(&entries);
        Ok(())
    }

    fn execute_export(&self, config: &Config, path: &Path) -> Result<()> {
        let store = self.open_store(config)?;
        store
            .export(path)
            .with_context(|| format!("Failed to export statistics to {}", path.display()))?;
        eprintln!(
            "{} {}",
            output::dim("Statistics written to:"),
            output::bright_yellow(path.display())
        );
        Ok(())
    }

    fn execute_test_parser(&self, config: &Config, file: &Path) -> Result<()> {
        let text = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read report file: {}", file.display()))?;

        let report = parser::parse_report(&text)
            .with_context(|| format!("No pipeline report recognized in {}", file.display()))?;

        let rendering = self.rendering(config);
        if rendering.json {
            let metadata = ReportMetadata {
                repository: "local/file".to_string(),
                pr_number: 0,
                observed_at: Utc::now(),
                run_id: None,
                pr_url: None,
                comment_id: None,
            };
            let execution = parser::parse(&text, &metadata)?;
            return output::print_json(&execution, rendering.pretty);
        }
        output::print_parsed_report(&report);
        Ok(())
    }

    pub async fn execute(&self) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;

        match &self.command {
            Commands::Ingest(args) => self.execute_ingest(&config, args).await,
            Commands::Stats { filter, tasks } => {
                self.execute_stats(&config, &QueryFilter::from(filter), *tasks)
            }
            Commands::Tasks {
                filter,
                cross_pipeline,
            } => self.execute_tasks(&config, &QueryFilter::from(filter), *cross_pipeline),
            Commands::List { filter } => self.execute_list(&config, &QueryFilter::from(filter)),
            Commands::Logs { filter } => self.execute_logs(&config, &QueryFilter::from(filter)),
            Commands::Export { path } => self.execute_export(&config, path),
            Commands::TestParser { file } => self.execute_test_parser(&config, file),
        }
    }
}

/// Reads an array of comments in the `RawComment` JSON format.
fn read_comments(path: &Path) -> Result<Vec<RawComment>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read comments file: {}", path.display()))?;
    let comments: Vec<RawComment> = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse comments file: {}", path.display()))?;
    info!("Read {} comments from {}", comments.len(), path.display());
    Ok(comments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::tests::SAMPLE_TABLE_REPORT;

    mod parsing {
        use super::*;

        #[test]
        fn filter_flags_become_query_filter() {
            let cli = Cli::try_parse_from([
                "pipelens",
                "list",
                "--repo",
                "org/a",
                "-P",
                "release",
                "--status",
                "FAILED",
                "--task-status",
                "skipped",
                "--min-executions",
                "3",
                "--limit",
                "5",
            ])
            .unwrap();

            let Commands::List { filter } = &cli.command else {
                panic!("Should parse the list command");
            };
            let filter = QueryFilter::from(filter);
            assert_eq!(filter.repository.as_deref(), Some("org/a"));
            assert_eq!(filter.pipeline.as_deref(), Some("release"));
            assert_eq!(filter.status, Some(Status::Failed), "Should parse case-insensitively");
            assert_eq!(filter.task_status, Some(Status::Skipped));
            assert_eq!(filter.min_executions, Some(3));
            assert_eq!(filter.limit, Some(5));
            assert_eq!(filter.task, None);
        }

        #[test]
        fn invalid_status_is_rejected() {
            let result = Cli::try_parse_from(["pipelens", "stats", "--status", "green"]);
            assert!(result.is_err(), "Should reject unknown statuses");
        }

        #[test]
        fn global_flags_after_subcommand() {
            let cli = Cli::try_parse_from([
                "pipelens",
                "tasks",
                "--cross-pipeline",
                "--json",
                "--data-dir",
                "/tmp/pl",
            ])
            .unwrap();

            assert!(cli.json);
            assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/pl")));
            assert!(matches!(
                cli.command,
                Commands::Tasks {
                    cross_pipeline: true,
                    ..
                }
            ));
        }

        #[test]
        fn from_file_conflicts_with_repo() {
            let result = Cli::try_parse_from([
                "pipelens",
                "ingest",
                "--from-file",
                "comments.json",
                "--repo",
                "org/a",
            ]);
            assert!(result.is_err(), "Should not mix offline and GitHub sources");
        }
    }

    #[test]
    fn test_rendering_merges_config() {
        let cli = Cli::try_parse_from(["pipelens", "logs"]).unwrap();
        let mut config = Config::default();
        let rendering = cli.rendering(&config);
        assert!(!rendering.json);
        assert!(!rendering.pretty);

        config.output.format = OutputFormat::Json;
        config.output.pretty = true;
        let rendering = cli.rendering(&config);
        assert!(rendering.json, "Should honor the configured format");
        assert!(rendering.pretty);
    }

    #[test]
    fn test_read_comments() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("comments.json");
        let comments = vec![RawComment {
            body: SAMPLE_TABLE_REPORT.to_string(),
            repository: "org/operators".to_string(),
            pr_number: 42,
            pr_url: None,
            comment_id: Some(7),
            created_at: Utc::now(),
        }];
        std::fs::write(&path, serde_json::to_string(&comments).unwrap()).unwrap();

        assert_eq!(read_comments(&path).unwrap(), comments);

        std::fs::write(&path, "{not json").unwrap();
        assert!(read_comments(&path).is_err(), "Should fail on malformed input");
    }

    #[tokio::test]
    async fn test_ingest_from_file_then_query() {
        let temp_dir = tempfile::tempdir().unwrap();
        let comments_path = temp_dir.path().join("comments.json");
        let comments = vec![
            RawComment {
                body: SAMPLE_TABLE_REPORT.to_string(),
                repository: "org/operators".to_string(),
                pr_number: 42,
                pr_url: None,
                comment_id: Some(7),
                created_at: Utc::now(),
            },
            RawComment {
                body: "Thanks, LGTM".to_string(),
                repository: "org/operators".to_string(),
                pr_number: 42,
                pr_url: None,
                comment_id: Some(8),
                created_at: Utc::now(),
            },
        ];
        std::fs::write(&comments_path, serde_json::to_string(&comments).unwrap()).unwrap();

        let data_dir = temp_dir.path().join("data");
        let args = [
            "pipelens",
            "ingest",
            "--from-file",
            comments_path.to_str().unwrap(),
            "--data-dir",
            data_dir.to_str().unwrap(),
            "--json",
        ];
        let cli = Cli::try_parse_from(args).unwrap();
        cli.execute().await.unwrap();
        // same comments again are all duplicates
        Cli::try_parse_from(args).unwrap().execute().await.unwrap();

        let (store, _) = StatsStore::open(data_dir.join("pipeline_stats.json"), None).unwrap();
        assert_eq!(store.executions().len(), 1, "Should record the summary once");
        assert_eq!(
            store.executions()[0].comment_id,
            Some(7),
            "Should skip the non-summary comment"
        );
    }
}
