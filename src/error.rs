use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to acquire lease for topic {topic:?}: {reason}")]
    AcquisitionFailure { topic: String, reason: String },

    #[error("Lease lost for topic {topic:?}")]
    LeaseLost { topic: String },

    #[error("Broadcast failed: {0}")]
    BroadcastFailure(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Rejects the empty topic before any side effect takes place.
pub(crate) fn check_topic(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(Error::InvalidArgument("topic must not be empty".to_string()));
    }
    Ok(())
}
