//! Adapters for the ports in `domain::ports`.

pub mod claude_code;
pub mod git;
pub mod github;
pub mod memory;
pub mod mock;
pub mod sqlite;
