use crate::{
    dispatcher::IReminderDispatcher,
    error::SchedulerError,
    reminder::{
        get_upcoming_reminders::GetUpcomingRemindersUseCase,
        get_upcoming_reminders::UseCaseError as UpcomingError,
        resolve_reminder_snapshot::{ResolveReminderSnapshotUseCase, UseCaseError as ResolveError},
    },
    shared::usecase::{execute, UseCase},
};
use calendar_reminders_domain::{ReminderJob, ID};
use calendar_reminders_infra::ReminderContext;
use futures::{future::join_all, FutureExt};
use std::any::Any;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_futures::Instrument;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScheduleOutcome {
    /// A job is pending and will fire at `due_at`
    Scheduled { due_at: i64 },
    /// The `Reminder` was already due when it was scheduled, so it is dropped
    Overdue { due_at: i64 },
}

/// The pending jobs ordered by due time. Jobs with the same due time are
/// ordered by `Reminder` id.
#[derive(Default)]
struct PendingJobs {
    queue: BTreeSet<(i64, ID)>,
    jobs: HashMap<ID, ReminderJob>,
}

impl PendingJobs {
    fn insert(&mut self, job: ReminderJob) {
        self.remove(&job.reminder_id);
        self.queue.insert((job.due_at, job.reminder_id.clone()));
        self.jobs.insert(job.reminder_id.clone(), job);
    }

    fn remove(&mut self, reminder_id: &ID) -> Option<ReminderJob> {
        let job = self.jobs.remove(reminder_id)?;
        self.queue.remove(&(job.due_at, job.reminder_id.clone()));
        Some(job)
    }

    fn next_due_at(&self) -> Option<i64> {
        self.queue.iter().next().map(|(due_at, _)| *due_at)
    }

    fn take_due(&mut self, now: i64) -> Vec<ReminderJob> {
        let mut due = Vec::new();
        while let Some((due_at, reminder_id)) = self.queue.iter().next().cloned() {
            if due_at > now {
                break;
            }
            self.queue.remove(&(due_at, reminder_id.clone()));
            if let Some(job) = self.jobs.remove(&reminder_id) {
                due.push(job);
            }
        }
        due
    }

    fn ids_for_event(&self, event_id: &ID) -> Vec<ID> {
        self.jobs
            .values()
            .filter(|job| job.event_id() == event_id)
            .map(|job| job.reminder_id.clone())
            .collect()
    }

    fn ordered(&self) -> Vec<ReminderJob> {
        self.queue
            .iter()
            .filter_map(|(_, reminder_id)| self.jobs.get(reminder_id).cloned())
            .collect()
    }
}

struct Inner {
    ctx: ReminderContext,
    dispatcher: Arc<dyn IReminderDispatcher>,
    /// Every change to the pending jobs and to the job store goes through
    /// this lock
    pending: Mutex<PendingJobs>,
    /// Wakes up the firing loop when the pending jobs change
    wakeup: Notify,
    runner: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Sends each `Reminder` to the `IReminderDispatcher` once, at the time it is
/// due.
///
/// Create one at startup and share clones of it with whatever creates,
/// updates or deletes `Reminder`s.
#[derive(Clone)]
pub struct ReminderScheduler {
    inner: Arc<Inner>,
}

impl ReminderScheduler {
    pub fn new(ctx: ReminderContext, dispatcher: Arc<dyn IReminderDispatcher>) -> Self {
        Self {
            inner: Arc::new(Inner {
                ctx,
                dispatcher,
                pending: Mutex::new(PendingJobs::default()),
                wakeup: Notify::new(),
                runner: std::sync::Mutex::new(None),
            }),
        }
    }

    /// Reconciles the pending jobs with the current reminders and starts the
    /// background task firing them. Returns the number of pending jobs.
    pub async fn start(&self) -> Result<usize, SchedulerError> {
        let scheduled = self.reconcile().await?;

        let handle = tokio::spawn(
            self.clone()
                .run()
                .instrument(tracing::info_span!("reminder_scheduler")),
        );
        if let Ok(mut runner) = self.inner.runner.lock() {
            if let Some(previous) = runner.replace(handle) {
                previous.abort();
            }
        }

        Ok(scheduled)
    }

    /// Stops the background task. Pending jobs stay in the job store.
    pub fn stop(&self) {
        if let Ok(mut runner) = self.inner.runner.lock() {
            if let Some(handle) = runner.take() {
                handle.abort();
            }
        }
    }

    /// Rebuilds the pending jobs from the current `Reminder`s and
    /// `CalendarEvent`s instead of trusting the due times in the job store.
    /// Stored jobs that are no longer upcoming are deleted.
    pub async fn reconcile(&self) -> Result<usize, SchedulerError> {
        let ctx = &self.inner.ctx;
        let mut pending = self.inner.pending.lock().await;

        let persisted = ctx
            .repos
            .reminder_jobs
            .find_all_pending()
            .await
            .map_err(SchedulerError::store)?;
        let upcoming = execute(GetUpcomingRemindersUseCase {}, ctx)
            .await
            .map_err(|e| match e {
                UpcomingError::StorageError(e) => SchedulerError::store(e),
            })?;

        let mut scheduled = HashSet::with_capacity(upcoming.jobs.len());
        for job in upcoming.jobs {
            ctx.repos
                .reminder_jobs
                .put(&job)
                .await
                .map_err(SchedulerError::store)?;
            scheduled.insert(job.reminder_id.clone());
            pending.insert(job);
        }

        let stale = persisted
            .into_iter()
            .map(|job| job.reminder_id)
            .chain(pending.jobs.keys().cloned())
            .filter(|reminder_id| !scheduled.contains(reminder_id))
            .collect::<HashSet<_>>();
        for reminder_id in &stale {
            self.cancel(&mut pending, reminder_id).await?;
        }
        drop(pending);
        self.inner.wakeup.notify_one();

        info!(
            "Reconciled reminders: {} pending, {} overdue dropped, {} unresolved, {} stale jobs removed",
            scheduled.len(),
            upcoming.skipped_overdue,
            upcoming.skipped_unresolved,
            stale.len()
        );
        Ok(scheduled.len())
    }

    /// Schedules the `Reminder` with the current values of the reminder, its
    /// event and its user, replacing any job already pending for it.
    #[tracing::instrument(name = "Scheduling reminder", skip(self))]
    pub async fn add(&self, reminder_id: &ID) -> Result<ScheduleOutcome, SchedulerError> {
        let ctx = &self.inner.ctx;
        let mut pending = self.inner.pending.lock().await;

        let mut resolve = ResolveReminderSnapshotUseCase {
            reminder_id: reminder_id.clone(),
        };
        let job = match resolve.execute(ctx).await {
            Ok(job) => job,
            Err(e) => {
                // A job left from an earlier add must not outlive its reminder
                self.cancel(&mut pending, reminder_id).await?;
                return Err(match e {
                    ResolveError::ReminderNotFound(id) => SchedulerError::NotFound(format!(
                        "The reminder with id: {}, was not found.",
                        id
                    )),
                    ResolveError::EventNotFound(id) => SchedulerError::NotFound(format!(
                        "The calendar event with id: {}, was not found.",
                        id
                    )),
                    ResolveError::UserNotFound(id) => SchedulerError::NotFound(format!(
                        "The user with id: {}, was not found.",
                        id
                    )),
                    ResolveError::InvalidReminder(id) => SchedulerError::InvalidReminder(format!(
                        "The reminder with id: {}, has an offset that is negative or out of range.",
                        id
                    )),
                });
            }
        };

        let due_at = job.due_at;
        let now = ctx.sys.get_timestamp_millis();
        if job.is_overdue(now, ctx.config.reminder_overdue_grace_millis) {
            self.cancel(&mut pending, reminder_id).await?;
            info!(
                "Reminder was due {} ms ago and is dropped",
                now.saturating_sub(due_at)
            );
            return Ok(ScheduleOutcome::Overdue { due_at });
        }

        ctx.repos
            .reminder_jobs
            .put(&job)
            .await
            .map_err(SchedulerError::store)?;
        pending.insert(job);
        drop(pending);
        self.inner.wakeup.notify_one();

        Ok(ScheduleOutcome::Scheduled { due_at })
    }

    /// Cancels the pending job of the `Reminder`. Does nothing if there is no
    /// such job, for example because it has already fired.
    #[tracing::instrument(name = "Removing reminder", skip(self))]
    pub async fn remove(&self, reminder_id: &ID) -> Result<(), SchedulerError> {
        let mut pending = self.inner.pending.lock().await;
        if self.cancel(&mut pending, reminder_id).await? {
            info!("Cancelled pending reminder");
        }
        Ok(())
    }

    /// Reschedules all `Reminder`s of a `CalendarEvent`, e.g. after it was
    /// moved. Returns the number of pending jobs for the event.
    #[tracing::instrument(name = "Syncing event reminders", skip(self))]
    pub async fn sync_event(&self, event_id: &ID) -> Result<usize, SchedulerError> {
        let reminders = self
            .inner
            .ctx
            .repos
            .reminders
            .find_by_event(event_id)
            .await
            .map_err(SchedulerError::store)?;

        let mut scheduled = 0;
        for reminder in &reminders {
            match self.add(&reminder.id).await {
                Ok(ScheduleOutcome::Scheduled { .. }) => scheduled += 1,
                Ok(ScheduleOutcome::Overdue { .. }) => {}
                Err(SchedulerError::StoreUnavailable(e)) => {
                    return Err(SchedulerError::StoreUnavailable(e))
                }
                Err(e) => warn!("Reminder {} was not scheduled: {}", reminder.id, e),
            }
        }

        // Jobs of reminders that were deleted from the event. The list above
        // may be stale by now, so a reminder is only dropped if it is gone
        // while the lock is held.
        let current = reminders
            .into_iter()
            .map(|reminder| reminder.id)
            .collect::<HashSet<_>>();
        let mut pending = self.inner.pending.lock().await;
        let candidates = pending
            .ids_for_event(event_id)
            .into_iter()
            .filter(|reminder_id| !current.contains(reminder_id))
            .collect::<Vec<_>>();
        for reminder_id in &candidates {
            if self.inner.ctx.repos.reminders.find(reminder_id).await.is_none() {
                self.cancel(&mut pending, reminder_id).await?;
            }
        }

        Ok(scheduled)
    }

    /// Cancels every pending job of a `CalendarEvent`, e.g. after it was
    /// deleted. Returns the number of cancelled jobs.
    #[tracing::instrument(name = "Removing event reminders", skip(self))]
    pub async fn remove_event(&self, event_id: &ID) -> Result<usize, SchedulerError> {
        let mut pending = self.inner.pending.lock().await;
        let reminder_ids = pending.ids_for_event(event_id);
        for reminder_id in &reminder_ids {
            self.cancel(&mut pending, reminder_id).await?;
        }
        Ok(reminder_ids.len())
    }

    /// The pending jobs ordered by due time
    pub async fn pending_jobs(&self) -> Vec<ReminderJob> {
        self.inner.pending.lock().await.ordered()
    }

    /// Fires every job that is due and returns how many were fired.
    ///
    /// A job is removed before its delivery starts, so a concurrent `remove`
    /// either prevents the delivery or is a no-op.
    pub async fn fire_due_jobs(&self) -> usize {
        let ctx = &self.inner.ctx;
        let due = {
            let mut pending = self.inner.pending.lock().await;
            let due = pending.take_due(ctx.sys.get_timestamp_millis());
            for job in &due {
                if let Err(e) = ctx.repos.reminder_jobs.delete(&job.reminder_id).await {
                    error!(
                        "Unable to remove fired reminder job: {} from the store. Error: {:?}",
                        job.reminder_id, e
                    );
                }
            }
            due
        };

        join_all(due.iter().map(|job| self.deliver(job))).await;
        due.len()
    }

    async fn deliver(&self, job: &ReminderJob) {
        let payload = &job.payload;
        let delivery =
            self.inner
                .dispatcher
                .deliver(&payload.reminder, &payload.event, &payload.user);
        // A panicking dispatcher must not take the firing loop down with it
        let e = match AssertUnwindSafe(delivery).catch_unwind().await {
            Ok(Ok(())) => {
                info!(
                    "Delivered reminder: {} for event: {}",
                    job.reminder_id, payload.event.id
                );
                return;
            }
            Ok(Err(e)) => SchedulerError::DeliveryFailure(format!("{:?}", e)),
            Err(panic) => SchedulerError::DeliveryFailure(format!(
                "Dispatcher panicked: {}",
                panic_message(&*panic)
            )),
        };
        error!("Reminder: {} will not be retried. {}", job.reminder_id, e);
    }

    async fn cancel(
        &self,
        pending: &mut PendingJobs,
        reminder_id: &ID,
    ) -> Result<bool, SchedulerError> {
        let stored = self
            .inner
            .ctx
            .repos
            .reminder_jobs
            .delete(reminder_id)
            .await
            .map_err(SchedulerError::store)?;
        Ok(pending.remove(reminder_id).is_some() || stored)
    }

    async fn run(self) {
        info!("Reminder scheduler started");
        loop {
            self.fire_due_jobs().await;

            let max_idle_millis = self.inner.ctx.config.scheduler_max_idle_millis;
            let next_due_at = self.inner.pending.lock().await.next_due_at();
            let now = self.inner.ctx.sys.get_timestamp_millis();
            let sleep_millis = match next_due_at {
                Some(due_at) => due_at.saturating_sub(now).max(0).min(max_idle_millis),
                None => max_idle_millis,
            };

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(sleep_millis as u64)) => {}
                _ = self.inner.wakeup.notified() => {}
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calendar_reminders_domain::{
        CalendarEvent, EventSnapshot, Reminder, ReminderPayload, ReminderSnapshot, User,
        UserSnapshot,
    };
    use calendar_reminders_infra::{IReminderJobRepo, IReminderRepo, ISys, MockSys};
    use std::sync::atomic::{AtomicBool, Ordering};

    const NOW: i64 = 1613862000000; // Sun Feb 21 2021 00:00:00 GMT+0100
    const HOUR: i64 = 1000 * 60 * 60;

    #[derive(Default)]
    struct RecordingDispatcher {
        delivered: std::sync::Mutex<Vec<ReminderPayload>>,
        fail: bool,
        panic_once: AtomicBool,
    }

    impl RecordingDispatcher {
        fn delivered(&self) -> Vec<ReminderPayload> {
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
            if self.fail {
                anyhow::bail!("SMTP server unreachable");
            }
            if self.panic_once.swap(false, Ordering::SeqCst) {
                panic!("Dispatcher bug");
            }
            Ok(())
        }
    }

    /// Lists the reminders of an event as they were before `hidden` was
    /// created
    struct StaleReminderRepo {
        inner: Arc<dyn IReminderRepo>,
        hidden: ID,
    }

    #[async_trait::async_trait]
    impl IReminderRepo for StaleReminderRepo {
        async fn insert(&self, reminder: &Reminder) -> anyhow::Result<()> {
            self.inner.insert(reminder).await
        }
        async fn save(&self, reminder: &Reminder) -> anyhow::Result<()> {
            self.inner.save(reminder).await
        }
        async fn find(&self, reminder_id: &ID) -> Option<Reminder> {
            self.inner.find(reminder_id).await
        }
        async fn find_all(&self) -> anyhow::Result<Vec<Reminder>> {
            self.inner.find_all().await
        }
        async fn find_by_event(&self, event_id: &ID) -> anyhow::Result<Vec<Reminder>> {
            let reminders = self.inner.find_by_event(event_id).await?;
            Ok(reminders
                .into_iter()
                .filter(|reminder| reminder.id != self.hidden)
                .collect())
        }
        async fn delete(&self, reminder_id: &ID) -> Option<Reminder> {
            self.inner.delete(reminder_id).await
        }
        async fn delete_by_event(&self, event_id: &ID) -> anyhow::Result<Vec<Reminder>> {
            self.inner.delete_by_event(event_id).await
        }
    }

    struct UnavailableJobRepo {}

    #[async_trait::async_trait]
    impl IReminderJobRepo for UnavailableJobRepo {
        async fn put(&self, _job: &ReminderJob) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }

        async fn delete(&self, _reminder_id: &ID) -> anyhow::Result<bool> {
            anyhow::bail!("connection refused")
        }

        async fn find_all_pending(&self) -> anyhow::Result<Vec<ReminderJob>> {
            anyhow::bail!("connection refused")
        }
    }

    struct TestContext {
        ctx: ReminderContext,
        sys: Arc<MockSys>,
        dispatcher: Arc<RecordingDispatcher>,
        scheduler: ReminderScheduler,
    }

    fn setup_with_dispatcher(dispatcher: RecordingDispatcher) -> TestContext {
        let mut ctx = ReminderContext::create_inmemory();
        let sys = Arc::new(MockSys::new(NOW));
        ctx.sys = sys.clone();
        ctx.config.reminder_overdue_grace_millis = 0;
        let dispatcher = Arc::new(dispatcher);
        let scheduler = ReminderScheduler::new(ctx.clone(), dispatcher.clone());
        TestContext {
            ctx,
            sys,
            dispatcher,
            scheduler,
        }
    }

    fn setup() -> TestContext {
        setup_with_dispatcher(RecordingDispatcher::default())
    }

    async fn insert_event(ctx: &ReminderContext, start_ts: i64) -> CalendarEvent {
        let user = User::new("ada@example.com", "Ada");
        ctx.repos.users.insert(&user).await.unwrap();
        let event =
            CalendarEvent::new(user.id.clone(), "Board meeting", start_ts, start_ts + HOUR);
        ctx.repos.events.insert(&event).await.unwrap();
        event
    }

    async fn insert_reminder(
        ctx: &ReminderContext,
        event: &CalendarEvent,
        seconds_before: i64,
    ) -> Reminder {
        let reminder = Reminder::new(event.id.clone(), seconds_before);
        ctx.repos.reminders.insert(&reminder).await.unwrap();
        reminder
    }

    #[tokio::test]
    async fn fires_once_at_due_time() {
        let t = setup();
        let event = insert_event(&t.ctx, NOW + 2 * HOUR).await;
        let reminder = insert_reminder(&t.ctx, &event, 60 * 60).await;

        let outcome = t.scheduler.add(&reminder.id).await.expect("To schedule reminder");
        assert_eq!(outcome, ScheduleOutcome::Scheduled { due_at: NOW + HOUR });

        t.sys.set_timestamp_millis(NOW + HOUR - 1);
        assert_eq!(t.scheduler.fire_due_jobs().await, 0);
        assert!(t.dispatcher.delivered().is_empty());

        t.sys.set_timestamp_millis(NOW + HOUR);
        assert_eq!(t.scheduler.fire_due_jobs().await, 1);
        let delivered = t.dispatcher.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].reminder.id, reminder.id);
        assert_eq!(delivered[0].event.title, "Board meeting");
        assert_eq!(delivered[0].user.email, "ada@example.com");

        t.sys.advance_millis(HOUR);
        assert_eq!(t.scheduler.fire_due_jobs().await, 0);
        assert_eq!(t.dispatcher.delivered().len(), 1);
        assert!(t.scheduler.pending_jobs().await.is_empty());
        assert!(t.ctx.repos.reminder_jobs.find_all_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn adding_again_supersedes_previous_job() {
        let t = setup();
        let event = insert_event(&t.ctx, NOW + 2 * HOUR).await;
        let mut reminder = insert_reminder(&t.ctx, &event, 60 * 10).await;
        t.scheduler.add(&reminder.id).await.unwrap();
        t.scheduler.add(&reminder.id).await.unwrap();

        reminder.seconds_before = 60 * 60;
        t.ctx.repos.reminders.save(&reminder).await.unwrap();
        t.scheduler.add(&reminder.id).await.unwrap();

        let pending = t.scheduler.pending_jobs().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].due_at, NOW + HOUR);
        let stored = t.ctx.repos.reminder_jobs.find_all_pending().await.unwrap();
        assert_eq!(stored, pending);

        t.sys.set_timestamp_millis(NOW + 2 * HOUR);
        assert_eq!(t.scheduler.fire_due_jobs().await, 1);
        let delivered = t.dispatcher.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].reminder.seconds_before, 60 * 60);
    }

    #[tokio::test]
    async fn removed_job_never_fires() {
        let t = setup();
        let event = insert_event(&t.ctx, NOW + HOUR).await;
        let reminder = insert_reminder(&t.ctx, &event, 60).await;
        t.scheduler.add(&reminder.id).await.unwrap();

        t.scheduler.remove(&reminder.id).await.expect("To remove reminder");
        // Removing again or removing something unknown is fine
        t.scheduler.remove(&reminder.id).await.expect("To remove reminder");
        t.scheduler.remove(&ID::default()).await.expect("To remove reminder");

        t.sys.set_timestamp_millis(NOW + 2 * HOUR);
        assert_eq!(t.scheduler.fire_due_jobs().await, 0);
        assert!(t.dispatcher.delivered().is_empty());
        assert!(t.ctx.repos.reminder_jobs.find_all_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_event_is_not_found() {
        let t = setup();
        let event = insert_event(&t.ctx, NOW + HOUR).await;
        let reminder = insert_reminder(&t.ctx, &event, 60).await;
        t.scheduler.add(&reminder.id).await.unwrap();

        t.ctx.repos.events.delete(&event.id).await;
        match t.scheduler.add(&reminder.id).await {
            Err(SchedulerError::NotFound(_)) => {}
            res => panic!("Expected not found, got: {:?}", res),
        }
        assert!(t.scheduler.pending_jobs().await.is_empty());

        match t.scheduler.add(&ID::default()).await {
            Err(SchedulerError::NotFound(_)) => {}
            res => panic!("Expected not found, got: {:?}", res),
        }
    }

    #[tokio::test]
    async fn negative_offset_is_invalid() {
        let t = setup();
        let event = insert_event(&t.ctx, NOW + HOUR).await;
        let reminder = insert_reminder(&t.ctx, &event, -60).await;

        match t.scheduler.add(&reminder.id).await {
            Err(SchedulerError::InvalidReminder(_)) => {}
            res => panic!("Expected invalid reminder, got: {:?}", res),
        }
        assert!(t.scheduler.pending_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn overdue_reminder_is_dropped() {
        let t = setup();
        let event = insert_event(&t.ctx, NOW + HOUR).await;
        let mut reminder = insert_reminder(&t.ctx, &event, 60).await;
        t.scheduler.add(&reminder.id).await.unwrap();

        // Moving the reminder into the past drops the job that was pending
        reminder.seconds_before = 2 * 60 * 60;
        t.ctx.repos.reminders.save(&reminder).await.unwrap();
        let outcome = t.scheduler.add(&reminder.id).await.unwrap();
        assert_eq!(outcome, ScheduleOutcome::Overdue { due_at: NOW - HOUR });
        assert!(t.scheduler.pending_jobs().await.is_empty());
        assert!(t.ctx.repos.reminder_jobs.find_all_pending().await.unwrap().is_empty());

        assert_eq!(t.scheduler.fire_due_jobs().await, 0);
        assert!(t.dispatcher.delivered().is_empty());
    }

    #[tokio::test]
    async fn failed_delivery_is_not_retried() {
        let t = setup_with_dispatcher(RecordingDispatcher {
            fail: true,
            ..Default::default()
        });
        let event = insert_event(&t.ctx, NOW + HOUR).await;
        let reminder = insert_reminder(&t.ctx, &event, 60).await;
        t.scheduler.add(&reminder.id).await.unwrap();

        t.sys.set_timestamp_millis(NOW + HOUR);
        assert_eq!(t.scheduler.fire_due_jobs().await, 1);
        assert_eq!(t.scheduler.fire_due_jobs().await, 0);
        assert_eq!(t.dispatcher.delivered().len(), 1);
        assert!(t.scheduler.pending_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn unavailable_store_fails_add_and_remove() {
        let mut t = setup();
        t.ctx.repos.reminder_jobs = Arc::new(UnavailableJobRepo {});
        let scheduler = ReminderScheduler::new(t.ctx.clone(), t.dispatcher.clone());
        let event = insert_event(&t.ctx, NOW + HOUR).await;
        let reminder = insert_reminder(&t.ctx, &event, 60).await;

        match scheduler.add(&reminder.id).await {
            Err(SchedulerError::StoreUnavailable(_)) => {}
            res => panic!("Expected store unavailable, got: {:?}", res),
        }
        assert!(scheduler.pending_jobs().await.is_empty());
        assert!(matches!(
            scheduler.remove(&reminder.id).await,
            Err(SchedulerError::StoreUnavailable(_))
        ));
        assert!(matches!(
            scheduler.reconcile().await,
            Err(SchedulerError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn jobs_fire_in_due_time_order() {
        let t = setup();
        let event = insert_event(&t.ctx, NOW + 2 * HOUR).await;
        let late = insert_reminder(&t.ctx, &event, 60).await;
        let early = insert_reminder(&t.ctx, &event, 60 * 60).await;
        t.scheduler.add(&late.id).await.unwrap();
        t.scheduler.add(&early.id).await.unwrap();

        let pending = t.scheduler.pending_jobs().await;
        assert_eq!(pending[0].reminder_id, early.id);
        assert_eq!(pending[1].reminder_id, late.id);

        t.sys.set_timestamp_millis(NOW + HOUR);
        assert_eq!(t.scheduler.fire_due_jobs().await, 1);
        assert_eq!(t.dispatcher.delivered()[0].reminder.id, early.id);
    }

    #[tokio::test]
    async fn sync_event_follows_moved_event() {
        let t = setup();
        let mut event = insert_event(&t.ctx, NOW + 2 * HOUR).await;
        let r1 = insert_reminder(&t.ctx, &event, 60).await;
        let r2 = insert_reminder(&t.ctx, &event, 60 * 30).await;
        assert_eq!(t.scheduler.sync_event(&event.id).await.unwrap(), 2);

        event.start_ts = NOW + 3 * HOUR;
        t.ctx.repos.events.save(&event).await.unwrap();
        t.ctx.repos.reminders.delete(&r2.id).await;
        assert_eq!(t.scheduler.sync_event(&event.id).await.unwrap(), 1);

        let pending = t.scheduler.pending_jobs().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].reminder_id, r1.id);
        assert_eq!(pending[0].due_at, NOW + 3 * HOUR - 60 * 1000);
    }

    #[tokio::test]
    async fn remove_event_cancels_all_its_jobs() {
        let t = setup();
        let event = insert_event(&t.ctx, NOW + 2 * HOUR).await;
        let other_event = insert_event(&t.ctx, NOW + 2 * HOUR).await;
        insert_reminder(&t.ctx, &event, 60).await;
        insert_reminder(&t.ctx, &event, 120).await;
        let other = insert_reminder(&t.ctx, &other_event, 60).await;
        t.scheduler.sync_event(&event.id).await.unwrap();
        t.scheduler.add(&other.id).await.unwrap();

        t.ctx.repos.reminders.delete_by_event(&event.id).await.unwrap();
        t.ctx.repos.events.delete(&event.id).await;
        assert_eq!(t.scheduler.remove_event(&event.id).await.unwrap(), 2);

        let pending = t.scheduler.pending_jobs().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].reminder_id, other.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_add_and_remove_leave_at_most_one_job() {
        let t = setup();
        let event = insert_event(&t.ctx, NOW + HOUR).await;
        let reminder = insert_reminder(&t.ctx, &event, 60).await;

        let mut handles = Vec::new();
        for i in 0..50 {
            let scheduler = t.scheduler.clone();
            let reminder_id = reminder.id.clone();
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    scheduler.add(&reminder_id).await.map(|_| ())
                } else {
                    scheduler.remove(&reminder_id).await
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let pending = t.scheduler.pending_jobs().await;
        let stored = t.ctx.repos.reminder_jobs.find_all_pending().await.unwrap();
        assert!(pending.len() <= 1);
        assert_eq!(stored, pending);
    }

    #[tokio::test]
    async fn background_task_fires_due_jobs() {
        let mut ctx = ReminderContext::create_inmemory();
        ctx.config.reminder_overdue_grace_millis = 0;
        ctx.config.scheduler_max_idle_millis = 1000;
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let scheduler = ReminderScheduler::new(ctx.clone(), dispatcher.clone());
        assert_eq!(scheduler.start().await.unwrap(), 0);

        let now = ctx.sys.get_timestamp_millis();
        let event = insert_event(&ctx, now + 300).await;
        let reminder = insert_reminder(&ctx, &event, 0).await;
        scheduler.add(&reminder.id).await.unwrap();

        for _ in 0..50 {
            if !dispatcher.delivered().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        scheduler.stop();

        let delivered = dispatcher.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].reminder.id, reminder.id);
        assert!(scheduler.pending_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn panicking_dispatcher_does_not_stop_later_deliveries() {
        let t = setup_with_dispatcher(RecordingDispatcher {
            panic_once: AtomicBool::new(true),
            ..Default::default()
        });
        let event = insert_event(&t.ctx, NOW + 2 * HOUR).await;
        let first = insert_reminder(&t.ctx, &event, 60 * 60).await;
        let second = insert_reminder(&t.ctx, &event, 60).await;
        t.scheduler.add(&first.id).await.unwrap();
        t.scheduler.add(&second.id).await.unwrap();

        t.sys.set_timestamp_millis(NOW + HOUR);
        assert_eq!(t.scheduler.fire_due_jobs().await, 1);

        t.sys.set_timestamp_millis(NOW + 2 * HOUR);
        assert_eq!(t.scheduler.fire_due_jobs().await, 1);
        let delivered = t.dispatcher.delivered();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[1].reminder.id, second.id);
        assert!(t.scheduler.pending_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn background_task_survives_panicking_dispatcher() {
        let mut ctx = ReminderContext::create_inmemory();
        ctx.config.reminder_overdue_grace_millis = 0;
        ctx.config.scheduler_max_idle_millis = 1000;
        let dispatcher = Arc::new(RecordingDispatcher {
            panic_once: AtomicBool::new(true),
            ..Default::default()
        });
        let scheduler = ReminderScheduler::new(ctx.clone(), dispatcher.clone());
        scheduler.start().await.unwrap();

        let now = ctx.sys.get_timestamp_millis();
        let first_event = insert_event(&ctx, now + 200).await;
        let second_event = insert_event(&ctx, now + 700).await;
        let first = insert_reminder(&ctx, &first_event, 0).await;
        let second = insert_reminder(&ctx, &second_event, 0).await;
        scheduler.add(&first.id).await.unwrap();
        scheduler.add(&second.id).await.unwrap();

        for _ in 0..50 {
            if dispatcher.delivered().len() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        scheduler.stop();

        let delivered = dispatcher.delivered();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].reminder.id, first.id);
        assert_eq!(delivered[1].reminder.id, second.id);
    }

    #[tokio::test]
    async fn sync_event_keeps_reminders_created_while_it_runs() {
        let t = setup();
        let event = insert_event(&t.ctx, NOW + 2 * HOUR).await;
        let existing = insert_reminder(&t.ctx, &event, 60).await;
        let deleted = insert_reminder(&t.ctx, &event, 60 * 10).await;
        // Created and added by another caller after sync_event listed the
        // reminders of the event
        let created = insert_reminder(&t.ctx, &event, 60 * 30).await;

        let mut ctx = t.ctx.clone();
        ctx.repos.reminders = Arc::new(StaleReminderRepo {
            inner: t.ctx.repos.reminders.clone(),
            hidden: created.id.clone(),
        });
        let scheduler = ReminderScheduler::new(ctx, t.dispatcher.clone());
        scheduler.add(&deleted.id).await.unwrap();
        scheduler.add(&created.id).await.unwrap();
        t.ctx.repos.reminders.delete(&deleted.id).await;

        assert_eq!(scheduler.sync_event(&event.id).await.unwrap(), 1);

        let pending = scheduler
            .pending_jobs()
            .await
            .into_iter()
            .map(|job| job.reminder_id)
            .collect::<Vec<_>>();
        assert_eq!(pending, vec![created.id.clone(), existing.id.clone()]);
        let stored = t.ctx.repos.reminder_jobs.find_all_pending().await.unwrap();
        assert_eq!(stored.len(), 2);
    }
}
