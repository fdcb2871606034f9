use thiserror::Error;

/// The broker could not be reached.
#[derive(Error, Debug, Clone)]
#[error("cannot reach broker at {brokers}: {detail}")]
pub struct ConnectionError {
    pub brokers: String,
    pub detail: String,
}

impl ConnectionError {
    pub fn new(brokers: impl Into<String>, detail: impl ToString) -> Self {
        Self {
            brokers: brokers.into(),
            detail: detail.to_string(),
        }
    }
}

/// Caller input that never reaches the broker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid topic: {0}")]
    Topic(String),
    #[error("invalid request: {0}")]
    Request(String),
}

/// The broker rejected a message or did not acknowledge it in time.
#[derive(Error, Debug, Clone)]
pub enum PublishError {
    #[error("delivery to '{topic}' timed out")]
    Timeout { topic: String },
    #[error("broker rejected message for '{topic}': {reason}")]
    Rejected { topic: String, reason: String },
}

/// A subscription handler failed on a record.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    pub fn new(detail: impl ToString) -> Self {
        Self(detail.to_string())
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self(format!("{:#}", err))
    }
}

/// Admin and receive-side broker failures.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("topic '{0}' not found")]
    TopicNotFound(String),
    #[error("topic '{0}' already exists")]
    TopicExists(String),
    #[error("{0}")]
    Kafka(String),
}
