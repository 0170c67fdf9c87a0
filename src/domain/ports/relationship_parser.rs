//! Relationship parser port.

use crate::domain::models::RelationshipRef;

/// References found in one issue's text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationshipParse {
    pub references: Vec<RelationshipRef>,
    /// Lines that looked like a relationship but could not be read
    pub malformed: Vec<String>,
}

/// Extracts typed relationship references from free text.
pub trait RelationshipParser: Send + Sync {
    fn parse(&self, issue_number: u64, text: &str) -> RelationshipParse;
}
