use crate::db::errors::{DbError, Result};
use crate::db::models::success_step::{SuccessStep, SuccessStepCreate};
use crate::types::StepStatus;
use sqlx::PgConnection;
use uuid::Uuid;

/// Repository over the `success_step` table (spec.md §4.4).
pub struct SuccessStepRepo<'a> {
    conn: &'a mut PgConnection,
}

impl<'a> SuccessStepRepo<'a> {
    pub fn new(conn: &'a mut PgConnection) -> Self {
        Self { conn }
    }

    /// `BatchInsertSuccessStep(rows)`, atomic over the batch. Callers run this
    /// inside an open transaction so a failure partway through rolls back
    /// everything already inserted for this request.
    pub async fn batch_insert(&mut self, rows: &[SuccessStepCreate]) -> Result<Vec<SuccessStep>> {
        let mut inserted = Vec::with_capacity(rows.len());
        for row in rows {
            let step = sqlx::query_as::<_, SuccessStep>(
                r#"
                INSERT INTO success_step (id, request_id, index, url, method, param, result, status, resp, created_at)
                VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, $6, $7, $8, now())
                RETURNING id, request_id, index, url, method, param, result, status, resp, created_at
                "#,
            )
            .bind(row.request_id)
            .bind(row.index)
            .bind(&row.url)
            .bind(row.method)
            .bind(&row.param)
            .bind(&row.result)
            .bind(row.status)
            .bind(&row.resp)
            .fetch_one(&mut *self.conn)
            .await
            .map_err(DbError::from)?;
            inserted.push(step);
        }
        Ok(inserted)
    }

    pub async fn list_for_request(&mut self, request_id: Uuid) -> Result<Vec<SuccessStep>> {
        sqlx::query_as::<_, SuccessStep>(
            "SELECT id, request_id, index, url, method, param, result, status, resp, created_at \
             FROM success_step WHERE request_id = $1 ORDER BY index ASC",
        )
        .bind(request_id)
        .fetch_all(&mut *self.conn)
        .await
        .map_err(DbError::from)
    }

    /// `UpdateSuccessStepStatus(request_id, step_id, new_status)`.
    pub async fn update_status(&mut self, request_id: Uuid, step_id: Uuid, new_status: StepStatus) -> Result<SuccessStep> {
        sqlx::query_as::<_, SuccessStep>(
            r#"
            UPDATE success_step
            SET status = $3
            WHERE id = $1 AND request_id = $2
            RETURNING id, request_id, index, url, method, param, result, status, resp, created_at
            "#,
        )
        .bind(step_id)
        .bind(request_id)
        .bind(new_status)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(DbError::from)
    }
}
