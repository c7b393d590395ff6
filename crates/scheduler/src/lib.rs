mod dispatcher;
mod error;
mod job_schedulers;
mod reminder;
mod shared;

pub use dispatcher::{IReminderDispatcher, TracingDispatcher};
pub use error::SchedulerError;
pub use job_schedulers::{ReminderScheduler, ScheduleOutcome};
pub use reminder::get_upcoming_reminders::{GetUpcomingRemindersUseCase, UpcomingReminders};
pub use reminder::resolve_reminder_snapshot::ResolveReminderSnapshotUseCase;
pub use shared::usecase::{execute, UseCase};
