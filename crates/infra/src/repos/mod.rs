mod event;
mod shared;
mod user;

use event::{
    InMemoryEventRepo, InMemoryReminderJobRepo, InMemoryReminderRepo, PostgresEventRepo,
    PostgresReminderJobRepo, PostgresReminderRepo,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::info;
use user::{InMemoryUserRepo, PostgresUserRepo};

pub use event::{IEventRepo, IReminderJobRepo, IReminderRepo};
pub use user::IUserRepo;

#[derive(Clone)]
pub struct Repos {
    pub events: Arc<dyn IEventRepo>,
    pub reminders: Arc<dyn IReminderRepo>,
    pub users: Arc<dyn IUserRepo>,
    pub reminder_jobs: Arc<dyn IReminderJobRepo>,
}

impl Repos {
    pub async fn create_postgres(connection_string: &str) -> anyhow::Result<Self> {
        info!("DB CHECKING CONNECTION ...");
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(connection_string)
            .await?;
        info!("DB CHECKING CONNECTION ... [done]");

        info!("DB EXECUTING MIGRATION ...");
        sqlx::migrate!().run(&pool).await?;
        info!("DB EXECUTING MIGRATION ... [done]");

        Ok(Self {
            events: Arc::new(PostgresEventRepo::new(pool.clone())),
            reminders: Arc::new(PostgresReminderRepo::new(pool.clone())),
            users: Arc::new(PostgresUserRepo::new(pool.clone())),
            reminder_jobs: Arc::new(PostgresReminderJobRepo::new(pool)),
        })
    }

    pub fn create_inmemory() -> Self {
        Self {
            events: Arc::new(InMemoryEventRepo::new()),
            reminders: Arc::new(InMemoryReminderRepo::new()),
            users: Arc::new(InMemoryUserRepo::new()),
            reminder_jobs: Arc::new(InMemoryReminderJobRepo::new()),
        }
    }
}
