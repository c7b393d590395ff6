use super::IReminderJobRepo;
use crate::repos::shared::inmemory_repo::*;
use calendar_reminders_domain::{ReminderJob, ID};

pub struct InMemoryReminderJobRepo {
    jobs: std::sync::Mutex<Vec<ReminderJob>>,
}

impl InMemoryReminderJobRepo {
    pub fn new() -> Self {
        Self {
            jobs: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl IReminderJobRepo for InMemoryReminderJobRepo {
    async fn put(&self, job: &ReminderJob) -> anyhow::Result<()> {
        upsert(job, &self.jobs);
        Ok(())
    }

    async fn delete(&self, reminder_id: &ID) -> anyhow::Result<bool> {
        Ok(delete(reminder_id, &self.jobs).is_some())
    }

    async fn find_all_pending(&self) -> anyhow::Result<Vec<ReminderJob>> {
        Ok(find_by(&self.jobs, |_| true))
    }
}
