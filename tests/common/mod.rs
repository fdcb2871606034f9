#![allow(dead_code)]

use async_trait::async_trait;
use gateway_lib::domain::error::{BrokerError, ConnectionError, PublishError};
use gateway_lib::domain::topic::Topic;
use gateway_lib::{
    BrokerClient, ConsumerRecord, DeliveryResult, Message, MessageStream, StartOffset,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Broker double that counts publishes and either acknowledges every
/// message at partition 0 or rejects all of them.
pub struct CountingBroker {
    publishes: AtomicUsize,
    reject_with: Option<String>,
}

impl CountingBroker {
    pub fn accepting() -> Self {
        Self {
            publishes: AtomicUsize::new(0),
            reject_with: None,
        }
    }

    pub fn rejecting(reason: &str) -> Self {
        Self {
            publishes: AtomicUsize::new(0),
            reject_with: Some(reason.to_string()),
        }
    }

    pub fn publishes(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerClient for CountingBroker {
    async fn publish(&self, message: Message) -> Result<DeliveryResult, PublishError> {
        let n = self.publishes.fetch_add(1, Ordering::SeqCst);
        match &self.reject_with {
            Some(reason) => Err(PublishError::Rejected {
                topic: message.topic().to_string(),
                reason: reason.clone(),
            }),
            None => Ok(DeliveryResult::delivered(message.topic(), 0, n as i64)),
        }
    }

    async fn open_stream(
        &self,
        topic: &str,
        _group: &str,
        _start: StartOffset,
    ) -> Result<Box<dyn MessageStream>, BrokerError> {
        Err(BrokerError::TopicNotFound(topic.to_string()))
    }

    async fn check_connection(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn list_topics(&self) -> Result<Vec<Topic>, BrokerError> {
        Ok(Vec::new())
    }

    async fn create_topic(&self, _topic: &Topic) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn flush(&self, _timeout: Duration) -> Result<(), BrokerError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

/// What the next receive on a [`FlakyBroker`] stream yields.
#[derive(Debug, Clone)]
pub enum Step {
    Fail(&'static str),
    Record(&'static str),
    Close,
}

#[derive(Default)]
struct Script {
    steps: VecDeque<Step>,
    next_offset: i64,
    opens: usize,
    failing_reopens: usize,
    commits: Vec<i64>,
}

/// Broker double whose streams replay a fixed script shared by every stream
/// it opens, then wait forever. Records arrive on topic `flaky`, partition 0.
pub struct FlakyBroker {
    script: Arc<Mutex<Script>>,
}

impl FlakyBroker {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                steps: steps.into_iter().collect(),
                ..Script::default()
            })),
        }
    }

    /// Every open after the first fails, `count` times.
    pub fn with_failing_reopens(self, count: usize) -> Self {
        self.script.lock().unwrap().failing_reopens = count;
        self
    }

    pub fn opens(&self) -> usize {
        self.script.lock().unwrap().opens
    }

    pub fn commits(&self) -> Vec<i64> {
        self.script.lock().unwrap().commits.clone()
    }
}

#[async_trait]
impl BrokerClient for FlakyBroker {
    async fn publish(&self, message: Message) -> Result<DeliveryResult, PublishError> {
        Ok(DeliveryResult::delivered(message.topic(), 0, 0))
    }

    async fn open_stream(
        &self,
        _topic: &str,
        _group: &str,
        _start: StartOffset,
    ) -> Result<Box<dyn MessageStream>, BrokerError> {
        let mut script = self.script.lock().unwrap();
        script.opens += 1;
        if script.opens > 1 && script.failing_reopens > 0 {
            script.failing_reopens -= 1;
            return Err(ConnectionError::new("flaky:9092", "connection refused").into());
        }
        Ok(Box::new(FlakyStream {
            script: self.script.clone(),
        }))
    }

    async fn check_connection(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn list_topics(&self) -> Result<Vec<Topic>, BrokerError> {
        Ok(Vec::new())
    }

    async fn create_topic(&self, _topic: &Topic) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn flush(&self, _timeout: Duration) -> Result<(), BrokerError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

struct FlakyStream {
    script: Arc<Mutex<Script>>,
}

#[async_trait]
impl MessageStream for FlakyStream {
    async fn next(&mut self) -> Option<Result<ConsumerRecord, BrokerError>> {
        let step = {
            let mut script = self.script.lock().unwrap();
            match script.steps.pop_front() {
                Some(Step::Record(payload)) => {
                    let offset = script.next_offset;
                    script.next_offset += 1;
                    Some(Some(Ok(ConsumerRecord {
                        message: Message::new("flaky", payload),
                        partition: 0,
                        offset,
                        timestamp: None,
                    })))
                }
                Some(Step::Fail(detail)) => Some(Some(Err(BrokerError::Kafka(detail.to_string())))),
                Some(Step::Close) => Some(None),
                None => None,
            }
        };
        match step {
            Some(next) => next,
            None => std::future::pending().await,
        }
    }

    fn commit(&mut self, record: &ConsumerRecord) -> Result<(), BrokerError> {
        self.script.lock().unwrap().commits.push(record.offset);
        Ok(())
    }
}
