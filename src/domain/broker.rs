use crate::domain::error::{BrokerError, PublishError};
use crate::domain::message::{ConsumerRecord, DeliveryResult, Message};
use crate::domain::topic::Topic;
use async_trait::async_trait;
use std::time::Duration;

/// Where a consumer group with no committed position starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartOffset {
    /// Replay everything still retained.
    Earliest,
    #[default]
    Latest,
}

/// Connection to a message broker, shared by every request task and
/// subscription of the process.
///
/// Implementations must be safe for concurrent use; callers hold it as
/// `Arc<dyn BrokerClient>`.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Publishes one message and waits for the broker acknowledgement.
    async fn publish(&self, message: Message) -> Result<DeliveryResult, PublishError>;

    /// Opens a receive stream on `topic` as a member of `group`.
    async fn open_stream(
        &self,
        topic: &str,
        group: &str,
        start: StartOffset,
    ) -> Result<Box<dyn MessageStream>, BrokerError>;

    async fn check_connection(&self) -> Result<(), BrokerError>;

    async fn list_topics(&self) -> Result<Vec<Topic>, BrokerError>;

    async fn create_topic(&self, topic: &Topic) -> Result<(), BrokerError>;

    /// Waits for outstanding publishes, at most `timeout`.
    async fn flush(&self, timeout: Duration) -> Result<(), BrokerError>;

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}

/// Ordered receive side of one subscription.
#[async_trait]
pub trait MessageStream: Send {
    /// Next record, waiting until one is available. `None` means the stream
    /// is closed for good.
    async fn next(&mut self) -> Option<Result<ConsumerRecord, BrokerError>>;

    /// Marks `record` as processed for the group.
    fn commit(&mut self, record: &ConsumerRecord) -> Result<(), BrokerError>;
}
