use crate::domain::broker::{BrokerClient, MessageStream, StartOffset};
use crate::domain::error::{BrokerError, PublishError};
use crate::domain::message::{ConsumerRecord, DeliveryResult, Message};
use crate::domain::topic::Topic;
use crate::infrastructure::partitioner::partition_for_key;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;

/// In-process broker for local runs and tests.
///
/// Keeps every record in memory. Offsets start at 0 in each partition.
/// Members of one consumer group share a cursor per partition, so each record
/// is handed to one member of the group. A member joining an existing group
/// rewinds the cursor to the committed offsets, so records handed out but never
/// committed are delivered again.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    appended: Notify,
    default_partitions: i32,
    auto_create: bool,
}

#[derive(Default)]
struct State {
    topics: HashMap<String, TopicLog>,
    groups: HashMap<(String, String), GroupState>,
}

struct TopicLog {
    partitions: Vec<Vec<StoredRecord>>,
    replication_factor: i32,
    next_partition: usize,
}

struct StoredRecord {
    message: Message,
    timestamp: i64,
}

struct GroupState {
    // Next offset to hand out, per partition
    positions: Vec<i64>,
    committed: Vec<Option<i64>>,
    // Where the group started before anything was committed
    origin: Vec<i64>,
}

impl GroupState {
    fn rewind(&mut self) {
        for (p, position) in self.positions.iter_mut().enumerate() {
            *position = self.committed[p].map_or(self.origin[p], |c| c + 1);
        }
    }
}

impl TopicLog {
    fn new(partitions: i32, replication_factor: i32) -> Self {
        Self {
            partitions: (0..partitions).map(|_| Vec::new()).collect(),
            replication_factor,
            next_partition: 0,
        }
    }

    fn choose_partition(&mut self, key: Option<&str>) -> i32 {
        let count = self.partitions.len() as i32;
        match key {
            Some(k) => partition_for_key(k.as_bytes(), count),
            None => {
                let p = self.next_partition % self.partitions.len();
                self.next_partition = self.next_partition.wrapping_add(1);
                p as i32
            }
        }
    }
}

impl MemoryBroker {
    pub fn new(default_partitions: i32) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                appended: Notify::new(),
                default_partitions: default_partitions.max(1),
                auto_create: true,
            }),
        }
    }

    /// Broker that refuses to publish to topics nobody created.
    pub fn without_auto_create(default_partitions: i32) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                appended: Notify::new(),
                default_partitions: default_partitions.max(1),
                auto_create: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Critical sections never panic halfway through an update.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Last committed offset of `group` on one partition.
    pub fn committed_offset(&self, topic: &str, group: &str, partition: i32) -> Option<i64> {
        let state = self.lock();
        state
            .groups
            .get(&(topic.to_string(), group.to_string()))
            .and_then(|g| g.committed.get(partition as usize).copied().flatten())
    }

    /// Number of records stored in one partition.
    pub fn partition_len(&self, topic: &str, partition: i32) -> usize {
        let state = self.lock();
        state
            .topics
            .get(topic)
            .and_then(|t| t.partitions.get(partition as usize))
            .map(Vec::len)
            .unwrap_or(0)
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[async_trait]
impl BrokerClient for MemoryBroker {
    async fn publish(&self, message: Message) -> Result<DeliveryResult, PublishError> {
        let topic = message.topic().to_string();
        let (partition, offset) = {
            let mut state = self.lock();
            if !state.topics.contains_key(&topic) {
                if !self.inner.auto_create {
                    return Err(PublishError::Rejected {
                        topic,
                        reason: "unknown topic or partition".to_string(),
                    });
                }
                state.topics.insert(
                    topic.clone(),
                    TopicLog::new(self.inner.default_partitions, 1),
                );
            }
            let log = state
                .topics
                .get_mut(&topic)
                .ok_or_else(|| PublishError::Rejected {
                    topic: topic.clone(),
                    reason: "unknown topic or partition".to_string(),
                })?;
            let partition = log.choose_partition(message.key());
            let records = &mut log.partitions[partition as usize];
            let offset = records.len() as i64;
            records.push(StoredRecord {
                message,
                timestamp: now_millis(),
            });
            (partition, offset)
        };
        self.inner.appended.notify_waiters();
        Ok(DeliveryResult::delivered(topic, partition, offset))
    }

    async fn open_stream(
        &self,
        topic: &str,
        group: &str,
        start: StartOffset,
    ) -> Result<Box<dyn MessageStream>, BrokerError> {
        let mut state = self.lock();
        if !state.topics.contains_key(topic) {
            if !self.inner.auto_create {
                return Err(BrokerError::TopicNotFound(topic.to_string()));
            }
            state.topics.insert(
                topic.to_string(),
                TopicLog::new(self.inner.default_partitions, 1),
            );
        }
        let ends: Vec<i64> = state.topics[topic]
            .partitions
            .iter()
            .map(|p| p.len() as i64)
            .collect();
        let key = (topic.to_string(), group.to_string());
        match state.groups.get_mut(&key) {
            Some(existing) => existing.rewind(),
            None => {
                let origin = match start {
                    StartOffset::Earliest => vec![0; ends.len()],
                    StartOffset::Latest => ends,
                };
                state.groups.insert(
                    key,
                    GroupState {
                        positions: origin.clone(),
                        committed: vec![None; origin.len()],
                        origin,
                    },
                );
            }
        }
        tracing::debug!(topic, group, ?start, "memory stream opened");
        Ok(Box::new(MemoryStream {
            broker: self.clone(),
            topic: topic.to_string(),
            group: group.to_string(),
            next_partition: 0,
        }))
    }

    async fn check_connection(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn list_topics(&self) -> Result<Vec<Topic>, BrokerError> {
        let state = self.lock();
        let mut topics: Vec<Topic> = state
            .topics
            .iter()
            .map(|(name, log)| Topic {
                name: name.clone(),
                partitions: log.partitions.len() as i32,
                replication_factor: log.replication_factor,
            })
            .collect();
        topics.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(topics)
    }

    async fn create_topic(&self, topic: &Topic) -> Result<(), BrokerError> {
        let mut state = self.lock();
        if state.topics.contains_key(&topic.name) {
            return Err(BrokerError::TopicExists(topic.name.clone()));
        }
        state.topics.insert(
            topic.name.clone(),
            TopicLog::new(topic.partitions.max(1), topic.replication_factor),
        );
        Ok(())
    }

    async fn flush(&self, _timeout: Duration) -> Result<(), BrokerError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryStream {
    broker: MemoryBroker,
    topic: String,
    group: String,
    // Partition to look at first, rotated so no partition starves
    next_partition: usize,
}

impl MemoryStream {
    fn try_fetch(&mut self) -> Option<ConsumerRecord> {
        let mut state = self.broker.lock();
        let State { topics, groups } = &mut *state;
        let log = topics.get(&self.topic)?;
        let group = groups.get_mut(&(self.topic.clone(), self.group.clone()))?;
        let count = log.partitions.len();

        for i in 0..count {
            let partition = (self.next_partition + i) % count;
            let position = group.positions[partition];
            if let Some(stored) = log.partitions[partition].get(position as usize) {
                group.positions[partition] = position + 1;
                self.next_partition = (partition + 1) % count;
                return Some(ConsumerRecord {
                    message: stored.message.clone(),
                    partition: partition as i32,
                    offset: position,
                    timestamp: Some(stored.timestamp),
                });
            }
        }
        None
    }
}

#[async_trait]
impl MessageStream for MemoryStream {
    async fn next(&mut self) -> Option<Result<ConsumerRecord, BrokerError>> {
        let inner = self.broker.inner.clone();
        loop {
            let appended = inner.appended.notified();
            tokio::pin!(appended);
            // Register before checking so an append in between is not missed
            appended.as_mut().enable();

            if let Some(record) = self.try_fetch() {
                return Some(Ok(record));
            }
            appended.await;
        }
    }

    fn commit(&mut self, record: &ConsumerRecord) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        let group = state
            .groups
            .get_mut(&(self.topic.clone(), self.group.clone()))
            .ok_or_else(|| BrokerError::TopicNotFound(self.topic.clone()))?;
        let slot = group
            .committed
            .get_mut(record.partition as usize)
            .ok_or_else(|| BrokerError::Kafka(format!("no partition {}", record.partition)))?;
        *slot = Some(slot.map_or(record.offset, |c| c.max(record.offset)));
        Ok(())
    }
}
