mod inmemory;
mod postgres;

use calendar_reminders_domain::{ReminderJob, ID};
pub use inmemory::InMemoryReminderJobRepo;
pub use postgres::PostgresReminderJobRepo;

/// Durable store of the pending `ReminderJob`s, keyed by `Reminder` id.
///
/// Jobs are removed once they have fired, so every stored job is pending.
#[async_trait::async_trait]
pub trait IReminderJobRepo: Send + Sync {
    /// Inserts the job or replaces the job stored for the same `Reminder`
    async fn put(&self, job: &ReminderJob) -> anyhow::Result<()>;
    /// Returns whether a job was stored for the given `Reminder`
    async fn delete(&self, reminder_id: &ID) -> anyhow::Result<bool>;
    /// All pending jobs in no particular order
    async fn find_all_pending(&self) -> anyhow::Result<Vec<ReminderJob>>;
}
