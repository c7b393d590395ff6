use crate::shared::usecase::UseCase;
use calendar_reminders_domain::{ReminderJob, ReminderPayload, ID};
use calendar_reminders_infra::ReminderContext;

/// Loads a `Reminder` together with its `CalendarEvent` and the `User` owning
/// that event and freezes them into a `ReminderJob` due at the current
/// start of the event minus the offset
#[derive(Debug)]
pub struct ResolveReminderSnapshotUseCase {
    pub reminder_id: ID,
}

#[derive(Debug, PartialEq)]
pub enum UseCaseError {
    ReminderNotFound(ID),
    EventNotFound(ID),
    UserNotFound(ID),
    InvalidReminder(ID),
}

#[async_trait::async_trait]
impl UseCase for ResolveReminderSnapshotUseCase {
    type Response = ReminderJob;

    type Errors = UseCaseError;

    const NAME: &'static str = "ResolveReminderSnapshot";

    async fn execute(&mut self, ctx: &ReminderContext) -> Result<Self::Response, Self::Errors> {
        let reminder = ctx
            .repos
            .reminders
            .find(&self.reminder_id)
            .await
            .ok_or_else(|| UseCaseError::ReminderNotFound(self.reminder_id.clone()))?;
        if !reminder.is_valid() {
            return Err(UseCaseError::InvalidReminder(reminder.id));
        }

        let event = ctx
            .repos
            .events
            .find(&reminder.event_id)
            .await
            .ok_or_else(|| UseCaseError::EventNotFound(reminder.event_id.clone()))?;

        let user = ctx
            .repos
            .users
            .find(&event.user_id)
            .await
            .ok_or_else(|| UseCaseError::UserNotFound(event.user_id.clone()))?;

        let due_at = reminder
            .remind_at(&event)
            .ok_or_else(|| UseCaseError::InvalidReminder(reminder.id.clone()))?;

        Ok(ReminderJob::new(
            ReminderPayload::new(&reminder, &event, &user),
            due_at,
        ))
    }
}
