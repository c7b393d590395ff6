use calendar_reminders_domain::{
    CalendarEvent, EventSnapshot, Reminder, ReminderPayload, ReminderSnapshot, User, UserSnapshot,
};
use calendar_reminders_infra::{MockSys, ReminderContext};
use calendar_reminders_scheduler::{IReminderDispatcher, ReminderScheduler};
use chrono::DateTime;
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct RecordingDispatcher {
    delivered: Mutex<Vec<ReminderPayload>>,
}

impl RecordingDispatcher {
    pub fn delivered(&self) -> Vec<ReminderPayload> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl IReminderDispatcher for RecordingDispatcher {
    async fn deliver(
        &self,
        reminder: &ReminderSnapshot,
        event: &EventSnapshot,
        user: &UserSnapshot,
    ) -> anyhow::Result<()> {
        self.delivered.lock().unwrap().push(ReminderPayload {
            reminder: reminder.clone(),
            event: event.clone(),
            user: user.clone(),
        });
        Ok(())
    }
}

pub struct TestApp {
    pub ctx: ReminderContext,
    pub sys: Arc<MockSys>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub scheduler: ReminderScheduler,
}

impl TestApp {
    /// A new scheduler over the same data, as after a process restart
    pub fn restart(&self) -> Self {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        Self {
            ctx: self.ctx.clone(),
            sys: self.sys.clone(),
            scheduler: ReminderScheduler::new(self.ctx.clone(), dispatcher.clone()),
            dispatcher,
        }
    }

    pub async fn insert_event(&self, title: &str, start_ts: i64) -> CalendarEvent {
        let user = User::new("grace@example.com", "Grace Hopper");
        self.ctx.repos.users.insert(&user).await.unwrap();
        let event = CalendarEvent::new(user.id.clone(), title, start_ts, start_ts + 1000 * 60 * 60);
        self.ctx.repos.events.insert(&event).await.unwrap();
        event
    }

    pub async fn insert_reminder(&self, event: &CalendarEvent, seconds_before: i64) -> Reminder {
        let reminder = Reminder::new(event.id.clone(), seconds_before);
        self.ctx.repos.reminders.insert(&reminder).await.unwrap();
        reminder
    }
}

/// Builds a scheduler on in-memory repos with the clock frozen at `now`
pub fn spawn_scheduler(now: i64) -> TestApp {
    let mut ctx = ReminderContext::create_inmemory();
    let sys = Arc::new(MockSys::new(now));
    ctx.sys = sys.clone();
    ctx.config.reminder_overdue_grace_millis = 0;

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let scheduler = ReminderScheduler::new(ctx.clone(), dispatcher.clone());
    TestApp {
        ctx,
        sys,
        dispatcher,
        scheduler,
    }
}

pub fn timestamp(rfc3339: &str) -> i64 {
    DateTime::parse_from_rfc3339(rfc3339)
        .expect("Valid RFC 3339 timestamp")
        .timestamp_millis()
}
