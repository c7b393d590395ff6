use calendar_reminders_domain::{EventSnapshot, ReminderSnapshot, UserSnapshot};
use tracing::info;

/// Delivers a due `Reminder` to its `User`, e.g. by email or as a popup.
///
/// Errors are logged by the `ReminderScheduler` and the reminder is not
/// retried, so implementations that want retries must do them internally.
#[async_trait::async_trait]
pub trait IReminderDispatcher: Send + Sync {
    async fn deliver(
        &self,
        reminder: &ReminderSnapshot,
        event: &EventSnapshot,
        user: &UserSnapshot,
    ) -> anyhow::Result<()>;
}

/// Only writes the reminder to the log
pub struct TracingDispatcher {}

#[async_trait::async_trait]
impl IReminderDispatcher for TracingDispatcher {
    async fn deliver(
        &self,
        reminder: &ReminderSnapshot,
        event: &EventSnapshot,
        user: &UserSnapshot,
    ) -> anyhow::Result<()> {
        info!(
            reminder_id = %reminder.id,
            event_id = %event.id,
            email = reminder.notify_by_email,
            popup = reminder.notify_by_popup,
            "Reminder for {} <{}>: `{}` starts at {}",
            user.name,
            user.email,
            event.title,
            event.start_ts
        );
        Ok(())
    }
}
