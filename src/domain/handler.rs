use crate::domain::error::HandlerError;
use crate::domain::message::ConsumerRecord;
use async_trait::async_trait;

/// Processing callback of a subscription.
///
/// A handler is invoked for one record at a time per subscription.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, record: &ConsumerRecord) -> Result<(), HandlerError>;

    fn name(&self) -> &str {
        "handler"
    }
}

/// Adapts a plain function or closure into a [`MessageHandler`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&ConsumerRecord) -> Result<(), HandlerError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(&ConsumerRecord) -> Result<(), HandlerError> + Send + Sync,
{
    async fn handle(&self, record: &ConsumerRecord) -> Result<(), HandlerError> {
        (self.f)(record)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Logs every record it receives. This is what configured subscriptions run.
#[derive(Debug, Default)]
pub struct LoggingHandler;

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn handle(&self, record: &ConsumerRecord) -> Result<(), HandlerError> {
        tracing::info!(
            topic = %record.topic(),
            partition = record.partition,
            offset = record.offset,
            key = ?record.message.key(),
            payload = %record.message.payload_lossy(),
            "received message"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}
