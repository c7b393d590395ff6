use super::IEventRepo;
use calendar_reminders_domain::{CalendarEvent, ID};
use sqlx::{types::Uuid, FromRow, PgPool};
use tracing::error;

pub struct PostgresEventRepo {
    pool: PgPool,
}

impl PostgresEventRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct EventRaw {
    event_uid: Uuid,
    user_uid: Uuid,
    title: String,
    start_ts: i64,
    end_ts: i64,
    location: Option<String>,
    description: Option<String>,
}

impl Into<CalendarEvent> for EventRaw {
    fn into(self) -> CalendarEvent {
        CalendarEvent {
            id: self.event_uid.into(),
            user_id: self.user_uid.into(),
            title: self.title,
            start_ts: self.start_ts,
            end_ts: self.end_ts,
            location: self.location,
            description: self.description,
        }
    }
}

#[async_trait::async_trait]
impl IEventRepo for PostgresEventRepo {
    async fn insert(&self, e: &CalendarEvent) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO calendar_events
            (event_uid, user_uid, title, start_ts, end_ts, location, description)
            VALUES($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(e.id.inner_ref())
        .bind(e.user_id.inner_ref())
        .bind(&e.title)
        .bind(e.start_ts)
        .bind(e.end_ts)
        .bind(&e.location)
        .bind(&e.description)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save(&self, e: &CalendarEvent) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE calendar_events
            SET title = $2,
                start_ts = $3,
                end_ts = $4,
                location = $5,
                description = $6
            WHERE event_uid = $1
            "#,
        )
        .bind(e.id.inner_ref())
        .bind(&e.title)
        .bind(e.start_ts)
        .bind(e.end_ts)
        .bind(&e.location)
        .bind(&e.description)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(&self, event_id: &ID) -> Option<CalendarEvent> {
        let res: Result<Option<EventRaw>, _> = sqlx::query_as(
            r#"
            SELECT * FROM calendar_events AS e
            WHERE e.event_uid = $1
            "#,
        )
        .bind(event_id.inner_ref())
        .fetch_optional(&self.pool)
        .await;

        match res {
            Ok(event) => event.map(|e| e.into()),
            Err(e) => {
                error!("Unable to find calendar event: {:?}. Error: {:?}", event_id, e);
                None
            }
        }
    }

    async fn delete(&self, event_id: &ID) -> Option<CalendarEvent> {
        let res: Result<Option<EventRaw>, _> = sqlx::query_as(
            r#"
            DELETE FROM calendar_events AS e
            WHERE e.event_uid = $1
            RETURNING *
            "#,
        )
        .bind(event_id.inner_ref())
        .fetch_optional(&self.pool)
        .await;

        match res {
            Ok(event) => event.map(|e| e.into()),
            Err(e) => {
                error!("Unable to delete calendar event: {:?}. Error: {:?}", event_id, e);
                None
            }
        }
    }
}
