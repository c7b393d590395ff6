//! Immutable copies of the entities a notification is built from.
//!
//! A snapshot is taken when a `Reminder` is scheduled and travels with the
//! `ReminderJob`, so later changes to (or deletion of) the source records do
//! not affect what is delivered.

use crate::{event::CalendarEvent, reminder::Reminder, shared::entity::ID, user::User};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderSnapshot {
    pub id: ID,
    pub event_id: ID,
    pub seconds_before: i64,
    pub notify_by_email: bool,
    pub notify_by_popup: bool,
}

impl From<&Reminder> for ReminderSnapshot {
    fn from(r: &Reminder) -> Self {
        Self {
            id: r.id.clone(),
            event_id: r.event_id.clone(),
            seconds_before: r.seconds_before,
            notify_by_email: r.notify_by_email,
            notify_by_popup: r.notify_by_popup,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSnapshot {
    pub id: ID,
    pub title: String,
    pub start_ts: i64,
    pub end_ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub user_id: ID,
}

impl From<&CalendarEvent> for EventSnapshot {
    fn from(e: &CalendarEvent) -> Self {
        Self {
            id: e.id.clone(),
            title: e.title.clone(),
            start_ts: e.start_ts,
            end_ts: e.end_ts,
            location: e.location.clone(),
            description: e.description.clone(),
            user_id: e.user_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSnapshot {
    pub id: ID,
    pub email: String,
    pub name: String,
}

impl From<&User> for UserSnapshot {
    fn from(u: &User) -> Self {
        Self {
            id: u.id.clone(),
            email: u.email.clone(),
            name: u.name.clone(),
        }
    }
}

/// Everything the delivery side needs to notify a `User` about a `Reminder`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderPayload {
    pub reminder: ReminderSnapshot,
    pub event: EventSnapshot,
    pub user: UserSnapshot,
}

impl ReminderPayload {
    pub fn new(reminder: &Reminder, event: &CalendarEvent, user: &User) -> Self {
        Self {
            reminder: reminder.into(),
            event: event.into(),
            user: user.into(),
        }
    }
}
