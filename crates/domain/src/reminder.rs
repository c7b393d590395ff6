use crate::{
    event::CalendarEvent,
    shared::entity::{Entity, ID},
    snapshot::ReminderPayload,
};

/// A `Reminder` represents a specific time before the start of a
/// `CalendarEvent` at which the owner of the event should be notified.
#[derive(Debug, Clone, PartialEq)]
pub struct Reminder {
    pub id: ID,
    /// The `CalendarEvent` this `Reminder` is associated with
    pub event_id: ID,
    /// How many seconds before the start of the `CalendarEvent` the
    /// notification should be sent
    pub seconds_before: i64,
    pub notify_by_email: bool,
    pub notify_by_popup: bool,
}

impl Reminder {
    pub fn new(event_id: ID, seconds_before: i64) -> Self {
        Self {
            id: Default::default(),
            event_id,
            seconds_before,
            notify_by_email: true,
            notify_by_popup: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.offset_millis().is_some()
    }

    fn offset_millis(&self) -> Option<i64> {
        if self.seconds_before < 0 {
            return None;
        }
        self.seconds_before.checked_mul(1000)
    }

    /// The timestamp in millis at which this `Reminder` is due for the given
    /// `CalendarEvent`, or `None` if the offset is invalid or the due time
    /// does not fit in a timestamp
    pub fn remind_at(&self, event: &CalendarEvent) -> Option<i64> {
        event.start_ts.checked_sub(self.offset_millis()?)
    }
}

impl Entity for Reminder {
    fn id(&self) -> &ID {
        &self.id
    }
}

/// A pending notification for a `Reminder`. There is at most one
/// `ReminderJob` per `Reminder` and it is keyed by the `Reminder` id.
#[derive(Debug, Clone, PartialEq)]
pub struct ReminderJob {
    pub reminder_id: ID,
    /// Timestamp in millis at which the job should fire
    pub due_at: i64,
    /// Values frozen at the time the job was scheduled
    pub payload: ReminderPayload,
}

impl ReminderJob {
    pub fn new(payload: ReminderPayload, due_at: i64) -> Self {
        Self {
            reminder_id: payload.reminder.id.clone(),
            due_at,
            payload,
        }
    }

    pub fn event_id(&self) -> &ID {
        &self.payload.event.id
    }

    /// Jobs that are due more than `grace_millis` before `now` are considered
    /// stale and should never fire.
    pub fn is_overdue(&self, now: i64, grace_millis: i64) -> bool {
        self.due_at <= now.saturating_sub(grace_millis)
    }
}

impl Entity for ReminderJob {
    fn id(&self) -> &ID {
        &self.reminder_id
    }
}
