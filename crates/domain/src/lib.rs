mod event;
mod reminder;
mod shared;
mod snapshot;
mod user;

pub use event::CalendarEvent;
pub use reminder::{Reminder, ReminderJob};
pub use shared::entity::{Entity, InvalidIDError, ID};
pub use snapshot::{EventSnapshot, ReminderPayload, ReminderSnapshot, UserSnapshot};
pub use user::User;
