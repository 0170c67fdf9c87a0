use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Assignment, AssignmentStatus};
use crate::domain::ports::AssignmentRepository;

/// Assignment storage backed by a map.
#[derive(Debug, Default)]
pub struct InMemoryAssignmentRepository {
    assignments: RwLock<HashMap<Uuid, Assignment>>,
}

impl InMemoryAssignmentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted(mut assignments: Vec<Assignment>) -> Vec<Assignment> {
    assignments.sort_by(|a, b| {
        a.issue_number
            .cmp(&b.issue_number)
            .then(a.assigned_at.cmp(&b.assigned_at))
    });
    assignments
}

#[async_trait]
impl AssignmentRepository for InMemoryAssignmentRepository {
    async fn create(&self, assignment: &Assignment) -> DomainResult<()> {
        let mut map = self.assignments.write().await;
        if map.contains_key(&assignment.id) {
            return Err(DomainError::DatabaseError(format!(
                "Assignment {} already exists",
                assignment.id
            )));
        }
        map.insert(assignment.id, assignment.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Assignment>> {
        Ok(self.assignments.read().await.get(&id).cloned())
    }

    async fn get_active_by_issue(&self, issue_number: u64) -> DomainResult<Option<Assignment>> {
        Ok(self
            .assignments
            .read()
            .await
            .values()
            .find(|a| a.issue_number == issue_number && a.is_active())
            .cloned())
    }

    async fn update(&self, assignment: &Assignment) -> DomainResult<()> {
        let mut map = self.assignments.write().await;
        match map.get_mut(&assignment.id) {
            Some(existing) => {
                *existing = assignment.clone();
                Ok(())
            }
            None => Err(DomainError::AssignmentNotFound(assignment.id)),
        }
    }

    async fn list_by_status(&self, status: AssignmentStatus) -> DomainResult<Vec<Assignment>> {
        let map = self.assignments.read().await;
        Ok(sorted(
            map.values().filter(|a| a.status == status).cloned().collect(),
        ))
    }

    async fn list_all(&self) -> DomainResult<Vec<Assignment>> {
        Ok(sorted(self.assignments.read().await.values().cloned().collect()))
    }
}
