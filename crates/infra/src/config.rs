use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Config {
    /// How far in the past (in millis) a reminder may be due when it is
    /// scheduled and still fire. Reminders that are due earlier than this are
    /// dropped instead of being sent late, which avoids a burst of stale
    /// notifications after downtime.
    pub reminder_overdue_grace_millis: i64,
    /// Upper bound in millis for a single sleep of the reminder firing loop.
    /// The loop re-checks the clock at least this often so that wall-clock
    /// adjustments are picked up.
    pub scheduler_max_idle_millis: i64,
}

fn secs_from_env(name: &str, default_secs: i64) -> i64 {
    let default_millis = default_secs * 1000;
    let value = match std::env::var(name) {
        Ok(value) => value,
        Err(_) => return default_millis,
    };
    let millis = value
        .parse::<i64>()
        .ok()
        .filter(|secs| *secs >= 0)
        .and_then(|secs| secs.checked_mul(1000));
    match millis {
        Some(millis) => millis,
        None => {
            warn!(
                "The given {}: {} is not valid, falling back to the default: {}.",
                name, value, default_secs
            );
            default_millis
        }
    }
}

impl Config {
    pub fn new() -> Self {
        let reminder_overdue_grace_millis = secs_from_env("REMINDER_OVERDUE_GRACE_SECS", 0);
        let scheduler_max_idle_millis = secs_from_env("SCHEDULER_MAX_IDLE_SECS", 60).max(1000);
        info!(
            "Reminders overdue by more than {} ms will be dropped",
            reminder_overdue_grace_millis
        );
        Self {
            reminder_overdue_grace_millis,
            scheduler_max_idle_millis,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
