mod event;
mod reminder;
mod reminder_jobs;

pub use event::IEventRepo;
pub use event::InMemoryEventRepo;
pub use event::PostgresEventRepo;

pub use reminder::IReminderRepo;
pub use reminder::InMemoryReminderRepo;
pub use reminder::PostgresReminderRepo;

pub use reminder_jobs::IReminderJobRepo;
pub use reminder_jobs::InMemoryReminderJobRepo;
pub use reminder_jobs::PostgresReminderJobRepo;
