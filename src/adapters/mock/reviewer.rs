//! Reviewer with fixed verdicts per persona.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Persona, PersonaVerdict};
use crate::domain::ports::{PersonaReviewer, ReviewContext};

/// Personas without a script pass.
#[derive(Debug, Default)]
pub struct ScriptedReviewer {
    verdicts: HashMap<String, (bool, String)>,
    errors: HashMap<String, String>,
    calls: AtomicUsize,
}

impl ScriptedReviewer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verdict(mut self, persona: &str, passed: bool, feedback: &str) -> Self {
        self.verdicts
            .insert(persona.to_string(), (passed, feedback.to_string()));
        self
    }

    pub fn with_error(mut self, persona: &str, message: &str) -> Self {
        self.errors.insert(persona.to_string(), message.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PersonaReviewer for ScriptedReviewer {
    async fn review(&self, persona: &Persona, _context: &ReviewContext) -> DomainResult<PersonaVerdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.errors.get(&persona.name) {
            return Err(DomainError::ProcessError(message.clone()));
        }
        let (passed, feedback) = self
            .verdicts
            .get(&persona.name)
            .cloned()
            .unwrap_or((true, "looks good".to_string()));
        Ok(PersonaVerdict::new(persona.name.clone(), passed, feedback))
    }
}
