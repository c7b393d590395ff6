use crate::shared::entity::{Entity, ID};

/// A `CalendarEvent` owned by a `User`.
///
/// Timestamps are unix millis.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarEvent {
    pub id: ID,
    pub title: String,
    pub start_ts: i64,
    pub end_ts: i64,
    pub location: Option<String>,
    pub description: Option<String>,
    pub user_id: ID,
}

impl CalendarEvent {
    pub fn new(user_id: ID, title: impl Into<String>, start_ts: i64, end_ts: i64) -> Self {
        Self {
            id: Default::default(),
            title: title.into(),
            start_ts,
            end_ts,
            location: None,
            description: None,
            user_id,
        }
    }
}

impl Entity for CalendarEvent {
    fn id(&self) -> &ID {
        &self.id
    }
}
