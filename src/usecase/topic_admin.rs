use crate::domain::broker::BrokerClient;
use crate::domain::error::{BrokerError, ValidationError};
use crate::domain::topic::{check_topic_name, Topic, DEFAULT_MAX_PARTITIONS};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdminError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Topic administration and broker health.
#[derive(Clone)]
pub struct TopicAdmin {
    broker: Arc<dyn BrokerClient>,
    max_partitions: i32,
}

impl TopicAdmin {
    pub fn new(broker: Arc<dyn BrokerClient>) -> Self {
        Self {
            broker,
            max_partitions: DEFAULT_MAX_PARTITIONS,
        }
    }

    pub fn with_max_partitions(mut self, max_partitions: i32) -> Self {
        self.max_partitions = max_partitions;
        self
    }

    pub async fn list_topics(&self) -> Result<Vec<Topic>, AdminError> {
        Ok(self.broker.list_topics().await?)
    }

    pub async fn create_topic(&self, topic: Topic) -> Result<Topic, AdminError> {
        check_topic_name(&topic.name).map_err(ValidationError::Topic)?;
        if topic.partitions < 1 {
            return Err(ValidationError::Request("partitions must be at least 1".to_string()).into());
        }
        if topic.partitions > self.max_partitions {
            return Err(ValidationError::Request(format!(
                "partitions must be at most {}",
                self.max_partitions
            ))
            .into());
        }
        if topic.replication_factor < 1 {
            return Err(ValidationError::Request(
                "replication_factor must be at least 1".to_string(),
            )
            .into());
        }

        self.broker.create_topic(&topic).await?;
        Ok(topic)
    }

    pub async fn check_connection(&self) -> Result<(), AdminError> {
        Ok(self.broker.check_connection().await?)
    }

    pub fn backend(&self) -> &'static str {
        self.broker.name()
    }
}
