//! SQLite implementation of the AssignmentRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{parse_datetime, parse_optional_datetime};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Assignment, AssignmentStatus, ReviewResult, WorkSession};
use crate::domain::ports::AssignmentRepository;

pub struct SqliteAssignmentRepository {
    pool: SqlitePool,
}

impl SqliteAssignmentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AssignmentRepository for SqliteAssignmentRepository {
    async fn create(&self, assignment: &Assignment) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO assignments (id, issue_number, issue_title, external_link_id, provider, instance_id,
                   worktree_path, branch_name, process_handle, status, is_phase_master, assigned_at, started_at,
                   last_activity_at, completed_at, merged_at, stage_commit, main_commit, review_result,
                   work_sessions, rejection_count, last_rejection, version)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(assignment.id.to_string())
        .bind(assignment.issue_number as i64)
        .bind(&assignment.issue_title)
        .bind(&assignment.external_link_id)
        .bind(&assignment.provider)
        .bind(&assignment.instance_id)
        .bind(&assignment.worktree_path)
        .bind(&assignment.branch_name)
        .bind(assignment.process_handle.map(i64::from))
        .bind(assignment.status.as_str())
        .bind(assignment.is_phase_master)
        .bind(assignment.assigned_at.to_rfc3339())
        .bind(assignment.started_at.map(|dt| dt.to_rfc3339()))
        .bind(assignment.last_activity_at.to_rfc3339())
        .bind(assignment.completed_at.map(|dt| dt.to_rfc3339()))
        .bind(assignment.merged_at.map(|dt| dt.to_rfc3339()))
        .bind(&assignment.stage_commit)
        .bind(&assignment.main_commit)
        .bind(assignment.review_result.as_ref().map(serde_json::to_string).transpose()?)
        .bind(serde_json::to_string(&assignment.work_sessions)?)
        .bind(i64::from(assignment.rejection_count))
        .bind(&assignment.last_rejection)
        .bind(assignment.version as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.is_unique_violation() {
                    return DomainError::DuplicateAssignment(assignment.issue_number);
                }
            }
            DomainError::from(e)
        })?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Assignment>> {
        let row: Option<AssignmentRow> = sqlx::query_as("SELECT * FROM assignments WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.try_into()).transpose()
    }

    async fn get_active_by_issue(&self, issue_number: u64) -> DomainResult<Option<Assignment>> {
        let row: Option<AssignmentRow> = sqlx::query_as(
            "SELECT * FROM assignments WHERE issue_number = ? AND status != 'merged' ORDER BY assigned_at DESC LIMIT 1",
        )
        .bind(issue_number as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.try_into()).transpose()
    }

    async fn update(&self, assignment: &Assignment) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE assignments SET issue_title = ?, external_link_id = ?, instance_id = ?, worktree_path = ?,
                   branch_name = ?, process_handle = ?, status = ?, is_phase_master = ?, started_at = ?,
                   last_activity_at = ?, completed_at = ?, merged_at = ?, stage_commit = ?, main_commit = ?,
                   review_result = ?, work_sessions = ?, rejection_count = ?, last_rejection = ?, version = ?
               WHERE id = ?"#,
        )
        .bind(&assignment.issue_title)
        .bind(&assignment.external_link_id)
        .bind(&assignment.instance_id)
        .bind(&assignment.worktree_path)
        .bind(&assignment.branch_name)
        .bind(assignment.process_handle.map(i64::from))
        .bind(assignment.status.as_str())
        .bind(assignment.is_phase_master)
        .bind(assignment.started_at.map(|dt| dt.to_rfc3339()))
        .bind(assignment.last_activity_at.to_rfc3339())
        .bind(assignment.completed_at.map(|dt| dt.to_rfc3339()))
        .bind(assignment.merged_at.map(|dt| dt.to_rfc3339()))
        .bind(&assignment.stage_commit)
        .bind(&assignment.main_commit)
        .bind(assignment.review_result.as_ref().map(serde_json::to_string).transpose()?)
        .bind(serde_json::to_string(&assignment.work_sessions)?)
        .bind(i64::from(assignment.rejection_count))
        .bind(&assignment.last_rejection)
        .bind(assignment.version as i64)
        .bind(assignment.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::AssignmentNotFound(assignment.id));
        }

        Ok(())
    }

    async fn list_by_status(&self, status: AssignmentStatus) -> DomainResult<Vec<Assignment>> {
        let rows: Vec<AssignmentRow> =
            sqlx::query_as("SELECT * FROM assignments WHERE status = ? ORDER BY issue_number, assigned_at")
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    async fn list_all(&self) -> DomainResult<Vec<Assignment>> {
        let rows: Vec<AssignmentRow> = sqlx::query_as("SELECT * FROM assignments ORDER BY issue_number, assigned_at")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }
}

#[derive(sqlx::FromRow)]
struct AssignmentRow {
    id: String,
    issue_number: i64,
    issue_title: String,
    external_link_id: Option<String>,
    provider: String,
    instance_id: Option<String>,
    worktree_path: String,
    branch_name: String,
    process_handle: Option<i64>,
    status: String,
    is_phase_master: bool,
    assigned_at: String,
    started_at: Option<String>,
    last_activity_at: String,
    completed_at: Option<String>,
    merged_at: Option<String>,
    stage_commit: Option<String>,
    main_commit: Option<String>,
    review_result: Option<String>,
    work_sessions: String,
    rejection_count: i64,
    last_rejection: Option<String>,
    version: i64,
}

impl TryFrom<AssignmentRow> for Assignment {
    type Error = DomainError;

    fn try_from(row: AssignmentRow) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&row.id).map_err(|e| DomainError::SerializationError(e.to_string()))?;

        let status = AssignmentStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid status: {}", row.status)))?;

        let review_result: Option<ReviewResult> = row
            .review_result
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        let work_sessions: Vec<WorkSession> = serde_json::from_str(&row.work_sessions)?;

        let process_handle = row
            .process_handle
            .map(u32::try_from)
            .transpose()
            .map_err(|e| DomainError::SerializationError(format!("Invalid process handle: {e}")))?;

        Ok(Assignment {
            id,
            issue_number: row.issue_number as u64,
            issue_title: row.issue_title,
            external_link_id: row.external_link_id,
            provider: row.provider,
            instance_id: row.instance_id,
            worktree_path: row.worktree_path,
            branch_name: row.branch_name,
            process_handle,
            status,
            is_phase_master: row.is_phase_master,
            assigned_at: parse_datetime(&row.assigned_at)?,
            started_at: parse_optional_datetime(row.started_at)?,
            last_activity_at: parse_datetime(&row.last_activity_at)?,
            completed_at: parse_optional_datetime(row.completed_at)?,
            merged_at: parse_optional_datetime(row.merged_at)?,
            stage_commit: row.stage_commit,
            main_commit: row.main_commit,
            review_result,
            work_sessions,
            rejection_count: row.rejection_count as u32,
            last_rejection: row.last_rejection,
            version: row.version as u64,
        })
    }
}
