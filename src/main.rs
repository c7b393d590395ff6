mod telemetry;

use calendar_reminders_infra::setup_context;
use calendar_reminders_scheduler::{ReminderScheduler, TracingDispatcher};
use std::sync::Arc;
use telemetry::{get_subscriber, init_subscriber};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    openssl_probe::init_ssl_cert_env_vars();

    let subscriber = get_subscriber("calendar_reminders".into(), "info".into());
    init_subscriber(subscriber);

    let context = setup_context().await?;

    let scheduler = ReminderScheduler::new(context, Arc::new(TracingDispatcher {}));
    let pending = scheduler.start().await?;
    info!("Reminder scheduler is running with {} pending reminders", pending);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down reminder scheduler");
    scheduler.stop();

    Ok(())
}
