//! CLI command implementations.

pub mod assignments;
pub mod dispatch;
pub mod graph;
pub mod merge;
pub mod slots;
