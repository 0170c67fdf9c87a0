//! Git adapter.

pub mod cli;

pub use cli::{parse_unmerged_paths, GitCli};
