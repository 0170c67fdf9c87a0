//! Persona reviewer port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Persona, PersonaVerdict};

/// Material a persona reviews.
#[derive(Debug, Clone)]
pub struct ReviewContext {
    /// Issue under review.
    pub issue_number: u64,
    /// Its title.
    pub issue_title: String,
    /// Feature branch merged into integration.
    pub branch_name: String,
    /// `main...integration` diff
    pub diff: String,
}

/// Produces one persona's verdict on a change.
#[async_trait]
pub trait PersonaReviewer: Send + Sync {
    /// One persona's verdict. The gate treats an error as a failing verdict.
    async fn review(&self, persona: &Persona, context: &ReviewContext) -> DomainResult<PersonaVerdict>;
}
