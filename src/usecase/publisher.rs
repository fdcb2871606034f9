use crate::domain::broker::BrokerClient;
use crate::domain::error::ValidationError;
use crate::domain::message::{DeliveryResult, Message};
use crate::domain::topic::check_topic_name;
use std::sync::Arc;

/// Validates outgoing messages and hands them to the broker client.
///
/// Broker failures come back as a failed [`DeliveryResult`], leaving the
/// retry decision to the caller. Only bad input is an `Err`.
#[derive(Clone)]
pub struct Publisher {
    broker: Arc<dyn BrokerClient>,
    default_topic: Option<String>,
}

impl Publisher {
    pub fn new(broker: Arc<dyn BrokerClient>) -> Self {
        Self {
            broker,
            default_topic: None,
        }
    }

    pub fn with_default_topic(mut self, topic: impl Into<String>) -> Self {
        self.default_topic = Some(topic.into());
        self
    }

    pub fn default_topic(&self) -> Option<&str> {
        self.default_topic.as_deref()
    }

    pub async fn send(
        &self,
        topic: &str,
        payload: impl Into<Vec<u8>>,
        key: Option<String>,
    ) -> Result<DeliveryResult, ValidationError> {
        self.send_message(Message::new(topic, payload).with_optional_key(key))
            .await
    }

    pub async fn send_message(&self, message: Message) -> Result<DeliveryResult, ValidationError> {
        check_topic_name(message.topic()).map_err(ValidationError::Topic)?;

        let topic = message.topic().to_string();
        match self.broker.publish(message).await {
            Ok(result) => {
                tracing::debug!(
                    topic = %result.topic,
                    partition = ?result.partition,
                    offset = ?result.offset,
                    "message published"
                );
                Ok(result)
            }
            Err(e) => {
                tracing::warn!(topic = %topic, error = %e, "publish failed");
                Ok(DeliveryResult::failed(topic, e.to_string()))
            }
        }
    }
}
