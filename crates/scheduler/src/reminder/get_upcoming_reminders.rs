use super::resolve_reminder_snapshot::{
    ResolveReminderSnapshotUseCase, UseCaseError as ResolveError,
};
use crate::shared::usecase::UseCase;
use calendar_reminders_domain::ReminderJob;
use calendar_reminders_infra::ReminderContext;
use tracing::{debug, warn};

/// Derives the `ReminderJob`s that should be pending right now from the
/// current `Reminder`s and `CalendarEvent`s.
///
/// Due times are always recomputed from the event start, as the event may
/// have been moved since the reminder was last scheduled. Reminders that are
/// already due (beyond the configured grace window) are skipped.
#[derive(Debug)]
pub struct GetUpcomingRemindersUseCase {}

#[derive(Debug)]
pub enum UseCaseError {
    StorageError(anyhow::Error),
}

#[derive(Debug)]
pub struct UpcomingReminders {
    pub jobs: Vec<ReminderJob>,
    pub skipped_overdue: usize,
    pub skipped_unresolved: usize,
}

#[async_trait::async_trait]
impl UseCase for GetUpcomingRemindersUseCase {
    type Response = UpcomingReminders;

    type Errors = UseCaseError;

    const NAME: &'static str = "GetUpcomingReminders";

    async fn execute(&mut self, ctx: &ReminderContext) -> Result<Self::Response, Self::Errors> {
        let reminders = ctx.repos.reminders.find_all().await.map_err(|e| {
            warn!("Unable to load reminders: {:?}", e);
            UseCaseError::StorageError(e)
        })?;

        let now = ctx.sys.get_timestamp_millis();
        let grace_millis = ctx.config.reminder_overdue_grace_millis;
        let mut upcoming = UpcomingReminders {
            jobs: Vec::with_capacity(reminders.len()),
            skipped_overdue: 0,
            skipped_unresolved: 0,
        };

        for reminder in reminders {
            let mut resolve = ResolveReminderSnapshotUseCase {
                reminder_id: reminder.id.clone(),
            };
            let job = match resolve.execute(ctx).await {
                Ok(job) => job,
                Err(e) => {
                    match e {
                        ResolveError::InvalidReminder(_) => {
                            warn!("Skipping invalid reminder: {:?}", e)
                        }
                        _ => debug!("Skipping reminder that could not be resolved: {:?}", e),
                    }
                    upcoming.skipped_unresolved += 1;
                    continue;
                }
            };

            if job.is_overdue(now, grace_millis) {
                upcoming.skipped_overdue += 1;
                continue;
            }
            upcoming.jobs.push(job);
        }

        Ok(upcoming)
    }
}
