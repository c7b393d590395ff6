use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("404 Not found. Error message: `{0}`")]
    NotFound(String),
    #[error("Invalid reminder. Error message: `{0}`")]
    InvalidReminder(String),
    #[error("The reminder job store is unavailable. Error message: `{0}`")]
    StoreUnavailable(String),
    #[error("Failed to deliver reminder. Error message: `{0}`")]
    DeliveryFailure(String),
}

impl SchedulerError {
    pub(crate) fn store(e: anyhow::Error) -> Self {
        Self::StoreUnavailable(format!("{:?}", e))
    }
}
