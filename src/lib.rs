//! Statistics over CI "Pipeline Summary" comments.
//!
//! [`parser`] turns summary comments into [`models::PipelineExecution`]
//! records, [`store::StatsStore`] folds them into persistent per-pipeline and
//! per-task aggregates, and [`github`] fetches the comments from pull
//! requests. The `pipelens` binary wires them together through [`cli`].

pub mod cli;
pub mod config;
pub mod error;
pub mod github;
pub mod models;
pub mod output;
pub mod parser;
pub mod store;
