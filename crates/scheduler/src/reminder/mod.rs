pub mod get_upcoming_reminders;
pub mod resolve_reminder_snapshot;
