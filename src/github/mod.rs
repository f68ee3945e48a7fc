//! GitHub REST access: recent pull requests and their comments.

mod client;
mod types;

pub use client::GitHubClient;
pub use types::RawComment;
