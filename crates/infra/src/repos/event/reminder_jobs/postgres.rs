use super::IReminderJobRepo;
use calendar_reminders_domain::{ReminderJob, ReminderPayload, ID};
use sqlx::{
    types::{Json, Uuid},
    FromRow, PgPool,
};

pub struct PostgresReminderJobRepo {
    pool: PgPool,
}

impl PostgresReminderJobRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct JobRaw {
    reminder_uid: Uuid,
    due_at: i64,
    payload: Json<ReminderPayload>,
}

impl Into<ReminderJob> for JobRaw {
    fn into(self) -> ReminderJob {
        ReminderJob {
            reminder_id: self.reminder_uid.into(),
            due_at: self.due_at,
            payload: self.payload.0,
        }
    }
}

#[async_trait::async_trait]
impl IReminderJobRepo for PostgresReminderJobRepo {
    async fn put(&self, job: &ReminderJob) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO reminder_jobs
            (reminder_uid, due_at, payload)
            VALUES($1, $2, $3)
            ON CONFLICT (reminder_uid) DO UPDATE
            SET due_at = EXCLUDED.due_at,
                payload = EXCLUDED.payload
            "#,
        )
        .bind(job.reminder_id.inner_ref())
        .bind(job.due_at)
        .bind(Json(&job.payload))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, reminder_id: &ID) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            DELETE FROM reminder_jobs AS j
            WHERE j.reminder_uid = $1
            "#,
        )
        .bind(reminder_id.inner_ref())
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn find_all_pending(&self) -> anyhow::Result<Vec<ReminderJob>> {
        let jobs: Vec<JobRaw> = sqlx::query_as("SELECT * FROM reminder_jobs")
            .fetch_all(&self.pool)
            .await?;
        Ok(jobs.into_iter().map(|job| job.into()).collect())
    }
}
