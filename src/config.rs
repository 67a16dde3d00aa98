use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Lease term used by the lock service before an unrenewed lock is reclaimed.
pub const DEFAULT_TERM_DURATION_MS: u64 = 5_000;

/// Time to wait before retrying leadership after a failed acquisition.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2_000;

pub const DEFAULT_WORKER_THREADS: usize = 25;

pub const DEFAULT_UPDATES_SUBJECT: &str = "leadership-contest-updates";

/// Tuning for one leadership manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeadershipConfig {
    /// Lease duration requested on every grant and extension.
    pub term_duration_ms: u64,
    /// Fixed delay between acquisition attempts.
    pub retry_delay_ms: u64,
    /// Upper bound on task bodies (acquisitions and renewals) running at once.
    pub worker_threads: usize,
    /// Messaging channel carrying leadership gossip.
    pub updates_subject: String,
}

impl Default for LeadershipConfig {
    fn default() -> Self {
        Self {
            term_duration_ms: DEFAULT_TERM_DURATION_MS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            worker_threads: DEFAULT_WORKER_THREADS,
            updates_subject: DEFAULT_UPDATES_SUBJECT.to_string(),
        }
    }
}

impl LeadershipConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid leadership config: {}", e)))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Overrides fields from `LEADERSHIP_TERM_MS`, `LEADERSHIP_RETRY_MS`
    /// and `LEADERSHIP_WORKERS` when set.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(term) = env_number::<u64>("LEADERSHIP_TERM_MS")? {
            self.term_duration_ms = term;
        }
        if let Some(retry) = env_number::<u64>("LEADERSHIP_RETRY_MS")? {
            self.retry_delay_ms = retry;
        }
        if let Some(workers) = env_number::<usize>("LEADERSHIP_WORKERS")? {
            self.worker_threads = workers;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.term_duration_ms < 2 {
            return Err(Error::Config(
                "term_duration_ms must be at least 2".to_string(),
            ));
        }
        if self.retry_delay_ms == 0 {
            return Err(Error::Config("retry_delay_ms must be positive".to_string()));
        }
        if self.worker_threads == 0 {
            return Err(Error::Config("worker_threads must be positive".to_string()));
        }
        if self.updates_subject.is_empty() {
            return Err(Error::Config("updates_subject must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn term_duration(&self) -> Duration {
        Duration::from_millis(self.term_duration_ms)
    }

    /// Renewal fires halfway through the term.
    pub fn renewal_interval(&self) -> Duration {
        Duration::from_millis(self.term_duration_ms / 2)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

fn env_number<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{} is not a valid number: {:?}", name, raw))),
        Err(_) => Ok(None),
    }
}
