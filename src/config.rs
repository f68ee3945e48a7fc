use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::PipeLensError;

pub const STORE_FILE_NAME: &str = "pipeline_stats.json";
const CONFIG_CANDIDATES: [&str; 4] = [
    "pipelens.toml",
    "pipelens.json",
    "pipelens.yaml",
    "pipelens.yml",
];

/// Configuration file structure for PipeLens.
///
/// Holds defaults for comment fetching, where the statistics store lives and
/// how results are printed. Command-line flags override every value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub github: GitHubConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GitHubConfig {
    /// GitHub personal access token
    pub token: Option<String>,

    /// GitHub API base URL
    #[serde(default = "default_github_base_url")]
    pub base_url: String,

    /// Default repository to scan (e.g., 'owner/repo')
    pub repository: Option<String>,

    /// Maximum number of recent PRs to scan for comments
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Only PRs and comments from the last N days
    #[serde(default = "default_days_back")]
    pub days_back: u32,

    /// Maximum number of PRs listed from the API before date filtering
    #[serde(default = "default_max_prs")]
    pub max_prs: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StorageConfig {
    /// Directory holding the statistics store
    pub data_dir: Option<PathBuf>,

    /// Number of executions kept as raw history; unbounded when absent
    pub max_history: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,

    /// Pretty-print JSON output
    #[serde(default)]
    pub pretty: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            base_url: default_github_base_url(),
            repository: None,
            limit: default_limit(),
            days_back: default_days_back(),
            max_prs: default_max_prs(),
        }
    }
}

fn default_github_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_limit() -> usize {
    50
}

fn default_days_back() -> u32 {
    30
}

fn default_max_prs() -> usize {
    500
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./pipelens.toml
    /// 3. ./pipelens.json
    /// 4. ./pipelens.yaml
    /// 5. ./pipelens.yml
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::discover(Path::new(".")),
        }
    }

    fn discover(dir: &Path) -> Result<Self> {
        CONFIG_CANDIDATES
            .iter()
            .map(|candidate| dir.join(candidate))
            .find(|path| path.exists())
            .map_or_else(|| Ok(Self::default()), |path| Self::load_from_path(&path))
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => {
                // Try TOML first, then JSON, then YAML
                toml::from_str(&contents)
                    .or_else(|_| serde_json::from_str(&contents))
                    .or_else(|_| serde_yaml::from_str(&contents))
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))
            }
        }
    }

    /// Location of the statistics store file.
    ///
    /// `data_dir` (usually from the command line) wins over the configured
    /// directory, which wins over the platform data directory
    /// (e.g. `~/.local/share/pipelens` on Linux).
    pub fn store_path(&self, data_dir: Option<&Path>) -> Result<PathBuf> {
        let dir = match data_dir.or(self.storage.data_dir.as_deref()) {
            Some(dir) => dir.to_path_buf(),
            None => dirs::data_dir()
                .ok_or_else(|| PipeLensError::Config("No data directory found".into()))?
                .join("pipelens"),
        };
        Ok(dir.join(STORE_FILE_NAME))
    }
}
