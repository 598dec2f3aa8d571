use crate::db::errors::{DbError, Result};
use crate::db::models::request_info::{RequestInfo, RequestInfoCreate};
use crate::types::{RequestStatus, SendStatus};
use sqlx::PgConnection;
use uuid::Uuid;

/// Repository over the `request_info` table (spec.md §4.4).
pub struct RequestInfoRepo<'a> {
    conn: &'a mut PgConnection,
}

impl<'a> RequestInfoRepo<'a> {
    pub fn new(conn: &'a mut PgConnection) -> Self {
        Self { conn }
    }

    /// `InsertRequestInfo(row) -> id`. Always inserted with `status=Trying`,
    /// `times=0`, `is_send=NotSent` — the caller has no way to start a row in
    /// any other state.
    pub async fn insert(&mut self, request: &RequestInfoCreate) -> Result<RequestInfo> {
        sqlx::query_as::<_, RequestInfo>(
            r#"
            INSERT INTO request_info (id, url, method, param, status, times, is_send, created_at, updated_at)
            VALUES (gen_random_uuid(), $1, $2, $3, 0, 0, 0, now(), now())
            RETURNING id, url, method, param, status, times, is_send, created_at, updated_at
            "#,
        )
        .bind(&request.url)
        .bind(request.method)
        .bind(&request.param)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(DbError::from)
    }

    pub async fn get_by_id(&mut self, id: Uuid) -> Result<RequestInfo> {
        sqlx::query_as::<_, RequestInfo>(
            "SELECT id, url, method, param, status, times, is_send, created_at, updated_at FROM request_info WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(DbError::from)
    }

    /// `UpdateRequestInfoStatus(status, id)`. Idempotent: re-applying the
    /// current terminal status is a no-op; moving between distinct terminal
    /// states is `IllegalTransition` (spec.md §4.4).
    pub async fn update_status(&mut self, id: Uuid, new_status: RequestStatus) -> Result<RequestInfo> {
        let current = self.get_by_id(id).await?;

        if current.status.is_terminal() {
            if format!("{:?}", current.status) == format!("{:?}", new_status) {
                return Ok(current);
            }
            return Err(DbError::IllegalTransition {
                from: format!("{:?}", current.status),
                to: format!("{:?}", new_status),
            });
        }

        sqlx::query_as::<_, RequestInfo>(
            r#"
            UPDATE request_info
            SET status = $2, updated_at = now()
            WHERE id = $1
            RETURNING id, url, method, param, status, times, is_send, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(new_status)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(DbError::from)
    }

    /// `Confirm(id)`. The data model carries no per-participant confirm
    /// accounting beyond `status`, so this is the no-op marker spec.md §4.4
    /// allows: it bumps `updated_at` to record that a confirm was observed.
    pub async fn mark_confirmed(&mut self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE request_info SET updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }

    /// Bumps `times` by exactly one, called once per reconciler tick that
    /// observes an exceptional row regardless of retry outcome.
    pub async fn increment_times(&mut self, id: Uuid) -> Result<RequestInfo> {
        sqlx::query_as::<_, RequestInfo>(
            r#"
            UPDATE request_info
            SET times = times + 1, updated_at = now()
            WHERE id = $1
            RETURNING id, url, method, param, status, times, is_send, created_at, updated_at
            "#,
        )
        .bind(id)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(DbError::from)
    }

    /// `ListExceptionalRequestInfo() -> rows`: rows in `{ConfirmFailed, CancelFailed}`.
    pub async fn list_exceptional(&mut self) -> Result<Vec<RequestInfo>> {
        sqlx::query_as::<_, RequestInfo>(
            "SELECT id, url, method, param, status, times, is_send, created_at, updated_at \
             FROM request_info WHERE status IN (2, 4) ORDER BY created_at ASC",
        )
        .fetch_all(&mut *self.conn)
        .await
        .map_err(DbError::from)
    }

    /// `UpdateRequestInfoSend(id)`. Idempotent: setting `is_send = SendSuccess`
    /// on an already-sent row leaves it unchanged.
    pub async fn mark_sent(&mut self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE request_info SET is_send = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(SendStatus::SendSuccess)
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }
}
