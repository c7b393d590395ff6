use super::IReminderRepo;
use calendar_reminders_domain::{Reminder, ID};
use sqlx::{types::Uuid, FromRow, PgPool};
use tracing::error;

pub struct PostgresReminderRepo {
    pool: PgPool,
}

impl PostgresReminderRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct ReminderRaw {
    reminder_uid: Uuid,
    event_uid: Uuid,
    seconds_before: i64,
    notify_by_email: bool,
    notify_by_popup: bool,
}

impl Into<Reminder> for ReminderRaw {
    fn into(self) -> Reminder {
        Reminder {
            id: self.reminder_uid.into(),
            event_id: self.event_uid.into(),
            seconds_before: self.seconds_before,
            notify_by_email: self.notify_by_email,
            notify_by_popup: self.notify_by_popup,
        }
    }
}

#[async_trait::async_trait]
impl IReminderRepo for PostgresReminderRepo {
    async fn insert(&self, reminder: &Reminder) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO reminders
            (reminder_uid, event_uid, seconds_before, notify_by_email, notify_by_popup)
            VALUES($1, $2, $3, $4, $5)
            "#,
        )
        .bind(reminder.id.inner_ref())
        .bind(reminder.event_id.inner_ref())
        .bind(reminder.seconds_before)
        .bind(reminder.notify_by_email)
        .bind(reminder.notify_by_popup)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save(&self, reminder: &Reminder) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE reminders
            SET seconds_before = $2,
                notify_by_email = $3,
                notify_by_popup = $4
            WHERE reminder_uid = $1
            "#,
        )
        .bind(reminder.id.inner_ref())
        .bind(reminder.seconds_before)
        .bind(reminder.notify_by_email)
        .bind(reminder.notify_by_popup)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(&self, reminder_id: &ID) -> Option<Reminder> {
        let res: Result<Option<ReminderRaw>, _> = sqlx::query_as(
            r#"
            SELECT * FROM reminders AS r
            WHERE r.reminder_uid = $1
            "#,
        )
        .bind(reminder_id.inner_ref())
        .fetch_optional(&self.pool)
        .await;

        match res {
            Ok(reminder) => reminder.map(|r| r.into()),
            Err(e) => {
                error!("Unable to find reminder: {:?}. Error: {:?}", reminder_id, e);
                None
            }
        }
    }

    async fn find_all(&self) -> anyhow::Result<Vec<Reminder>> {
        let reminders: Vec<ReminderRaw> = sqlx::query_as("SELECT * FROM reminders")
            .fetch_all(&self.pool)
            .await?;
        Ok(reminders.into_iter().map(|r| r.into()).collect())
    }

    async fn find_by_event(&self, event_id: &ID) -> anyhow::Result<Vec<Reminder>> {
        let reminders: Vec<ReminderRaw> = sqlx::query_as(
            r#"
            SELECT * FROM reminders AS r
            WHERE r.event_uid = $1
            "#,
        )
        .bind(event_id.inner_ref())
        .fetch_all(&self.pool)
        .await?;
        Ok(reminders.into_iter().map(|r| r.into()).collect())
    }

    async fn delete(&self, reminder_id: &ID) -> Option<Reminder> {
        let res: Result<Option<ReminderRaw>, _> = sqlx::query_as(
            r#"
            DELETE FROM reminders AS r
            WHERE r.reminder_uid = $1
            RETURNING *
            "#,
        )
        .bind(reminder_id.inner_ref())
        .fetch_optional(&self.pool)
        .await;

        match res {
            Ok(reminder) => reminder.map(|r| r.into()),
            Err(e) => {
                error!("Unable to delete reminder: {:?}. Error: {:?}", reminder_id, e);
                None
            }
        }
    }

    async fn delete_by_event(&self, event_id: &ID) -> anyhow::Result<Vec<Reminder>> {
        let reminders: Vec<ReminderRaw> = sqlx::query_as(
            r#"
            DELETE FROM reminders AS r
            WHERE r.event_uid = $1
            RETURNING *
            "#,
        )
        .bind(event_id.inner_ref())
        .fetch_all(&self.pool)
        .await?;
        Ok(reminders.into_iter().map(|r| r.into()).collect())
    }
}
