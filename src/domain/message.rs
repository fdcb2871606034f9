use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A message on its way to the broker.
///
/// Fields are private so a message cannot change after it has been built;
/// the `with_*` methods consume and return it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    topic: String,
    key: Option<String>,
    payload: Vec<u8>,
    headers: BTreeMap<String, Vec<u8>>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            payload: payload.into(),
            headers: BTreeMap::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_optional_key(mut self, key: Option<String>) -> Self {
        self.key = key;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn headers(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers.get(name).map(Vec::as_slice)
    }

    /// Payload as text, replacing invalid UTF-8.
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).to_string()
    }
}

/// A message as it came back from the broker, with the position the broker
/// assigned to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerRecord {
    pub message: Message,
    pub partition: i32,
    pub offset: i64,
    pub timestamp: Option<i64>,
}

impl ConsumerRecord {
    pub fn topic(&self) -> &str {
        self.message.topic()
    }
}

/// Outcome of a single publish.
///
/// `partition` and `offset` are only present when the broker acknowledged
/// the write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryResult {
    pub fn delivered(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition: Some(partition),
            offset: Some(offset),
            success: true,
            error: None,
        }
    }

    pub fn failed(topic: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            partition: None,
            offset: None,
            success: false,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}
