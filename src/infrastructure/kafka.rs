use crate::domain::broker::{BrokerClient, MessageStream, StartOffset};
use crate::domain::cluster::{ClusterConfig, SecurityConfig};
use crate::domain::error::{BrokerError, ConnectionError, PublishError};
use crate::domain::message::{ConsumerRecord, DeliveryResult, Message as GatewayMessage};
use crate::domain::topic::Topic;
use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Header, Headers, Message, OwnedHeaders};
use rdkafka::metadata::Metadata;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use std::sync::Arc;
use std::time::Duration;

const METADATA_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka backend.
///
/// One `FutureProducer` is created at connect time and shared by every
/// publishing task; librdkafka multiplexes it over its broker connections.
/// Each subscription gets its own `StreamConsumer`.
///
/// Metadata requests and producer flushes block inside librdkafka, so they run
/// on the blocking pool.
pub struct KafkaBroker {
    cluster: ClusterConfig,
    producer: FutureProducer,
    admin: Arc<AdminClient<DefaultClientContext>>,
    message_timeout: Duration,
}

impl KafkaBroker {
    /// Builds the clients and checks the cluster answers a metadata request.
    pub async fn connect(
        cluster: ClusterConfig,
        message_timeout: Duration,
    ) -> Result<Self, ConnectionError> {
        let mut producer_config = create_config(&cluster);
        producer_config.set("message.timeout.ms", message_timeout.as_millis().to_string());
        let producer: FutureProducer = producer_config
            .create()
            .map_err(|e| ConnectionError::new(&cluster.brokers, e))?;
        let admin: AdminClient<DefaultClientContext> = create_config(&cluster)
            .create()
            .map_err(|e| ConnectionError::new(&cluster.brokers, e))?;

        let broker = Self {
            cluster,
            producer,
            admin: Arc::new(admin),
            message_timeout,
        };
        broker.check_connection().await.map_err(|e| match e {
            BrokerError::Connection(c) => c,
            other => ConnectionError::new(&broker.cluster.brokers, other),
        })?;
        tracing::info!(brokers = %broker.cluster.brokers, "connected to kafka");
        Ok(broker)
    }

    pub fn cluster(&self) -> &ClusterConfig {
        &self.cluster
    }

    async fn fetch_metadata(&self) -> Result<Metadata, BrokerError> {
        let admin = self.admin.clone();
        tokio::task::spawn_blocking(move || admin.inner().fetch_metadata(None, METADATA_TIMEOUT))
            .await
            .map_err(|e| BrokerError::Kafka(format!("metadata task failed: {}", e)))?
            .map_err(|e| ConnectionError::new(&self.cluster.brokers, e).into())
    }
}

fn create_config(cluster: &ClusterConfig) -> ClientConfig {
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", &cluster.brokers);
    config.set("client.id", &cluster.client_id);

    match &cluster.security {
        SecurityConfig::Plaintext => {
            config.set("security.protocol", "plaintext");
        }
        SecurityConfig::Ssl {
            ca_location,
            certificate_location,
            key_location,
            key_password,
        } => {
            config.set("security.protocol", "ssl");
            if let Some(ca) = ca_location {
                config.set("ssl.ca.location", ca);
            }
            if let Some(cert) = certificate_location {
                config.set("ssl.certificate.location", cert);
            }
            if let Some(key) = key_location {
                config.set("ssl.key.location", key);
            }
            if let Some(kp) = key_password {
                config.set("ssl.key.password", kp);
            }
        }
        SecurityConfig::SaslSsl {
            mechanism,
            username,
            ca_location,
        } => {
            config.set("security.protocol", "sasl_ssl");
            config.set("sasl.mechanism", mechanism.as_str());
            config.set("sasl.username", username);
            if let Some(p) = &cluster.password {
                config.set("sasl.password", p);
            }
            if let Some(ca) = ca_location {
                config.set("ssl.ca.location", ca);
            }
        }
    }
    config
}

fn to_owned_headers(message: &GatewayMessage) -> Option<OwnedHeaders> {
    if message.headers().is_empty() {
        return None;
    }
    let headers = message
        .headers()
        .iter()
        .fold(OwnedHeaders::new(), |headers, (key, value)| {
            headers.insert(Header {
                key: key.as_str(),
                value: Some(value.as_slice()),
            })
        });
    Some(headers)
}

fn publish_error(topic: &str, err: KafkaError) -> PublishError {
    match err {
        KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut) => {
            PublishError::Timeout {
                topic: topic.to_string(),
            }
        }
        other => PublishError::Rejected {
            topic: topic.to_string(),
            reason: other.to_string(),
        },
    }
}

#[async_trait]
impl BrokerClient for KafkaBroker {
    async fn publish(&self, message: GatewayMessage) -> Result<DeliveryResult, PublishError> {
        let topic = message.topic();
        let headers = to_owned_headers(&message);

        let mut record = FutureRecord::to(topic).payload(message.payload());
        if let Some(k) = message.key() {
            record = record.key(k);
        }
        if let Some(h) = headers {
            record = record.headers(h);
        }

        // The queue timeout only covers a full local queue; delivery itself is
        // bounded by message.timeout.ms.
        let delivery = self
            .producer
            .send(record, self.message_timeout)
            .await
            .map_err(|(e, _)| publish_error(topic, e))?;

        tracing::debug!(
            topic,
            partition = delivery.partition,
            offset = delivery.offset,
            "delivered"
        );
        Ok(DeliveryResult::delivered(
            topic,
            delivery.partition,
            delivery.offset,
        ))
    }

    async fn open_stream(
        &self,
        topic: &str,
        group: &str,
        start: StartOffset,
    ) -> Result<Box<dyn MessageStream>, BrokerError> {
        let mut config = create_config(&self.cluster);
        config.set("group.id", group);
        config.set(
            "client.id",
            format!("{}-{}", self.cluster.client_id, uuid::Uuid::new_v4()),
        );
        config.set(
            "auto.offset.reset",
            match start {
                StartOffset::Earliest => "earliest",
                StartOffset::Latest => "latest",
            },
        );
        // Offsets are stored by hand after the handler ran, then committed
        // in the background.
        config.set("enable.auto.commit", "true");
        config.set("enable.auto.offset.store", "false");

        let consumer: StreamConsumer = config
            .create()
            .map_err(|e| ConnectionError::new(&self.cluster.brokers, e))?;
        consumer
            .subscribe(&[topic])
            .map_err(|e| BrokerError::Kafka(format!("Failed to subscribe to {}: {}", topic, e)))?;

        Ok(Box::new(KafkaStream { consumer }))
    }

    async fn check_connection(&self) -> Result<(), BrokerError> {
        // Simple metadata fetch to test connectivity
        self.fetch_metadata().await.map(|_| ())
    }

    async fn list_topics(&self) -> Result<Vec<Topic>, BrokerError> {
        let metadata = self.fetch_metadata().await?;

        let topics = metadata
            .topics()
            .iter()
            .map(|t| Topic {
                name: t.name().to_string(),
                partitions: t.partitions().len() as i32,
                replication_factor: t
                    .partitions()
                    .first()
                    .map(|p| p.replicas().len() as i32)
                    .unwrap_or(1),
            })
            .collect();

        tracing::debug!(count = metadata.topics().len(), "fetched topic metadata");
        Ok(topics)
    }

    async fn create_topic(&self, topic: &Topic) -> Result<(), BrokerError> {
        let new_topic = NewTopic::new(
            &topic.name,
            topic.partitions,
            TopicReplication::Fixed(topic.replication_factor),
        );

        let opts = AdminOptions::new().operation_timeout(Some(Duration::from_secs(30)));

        let results = self
            .admin
            .create_topics(&[new_topic], &opts)
            .await
            .map_err(|e| BrokerError::Kafka(format!("Failed to create topic: {}", e)))?;

        for result in results {
            match result {
                Ok(_) => {}
                Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    return Err(BrokerError::TopicExists(name));
                }
                Err((name, code)) => {
                    return Err(BrokerError::Kafka(format!(
                        "Failed to create topic '{}': {:?}",
                        name, code
                    )));
                }
            }
        }

        tracing::info!(topic = %topic.name, partitions = topic.partitions, "created topic");
        Ok(())
    }

    async fn flush(&self, timeout: Duration) -> Result<(), BrokerError> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| BrokerError::Kafka(format!("flush task failed: {}", e)))?
            .map_err(|e| BrokerError::Kafka(format!("Failed to flush producer: {}", e)))
    }

    fn name(&self) -> &'static str {
        "kafka"
    }
}

struct KafkaStream {
    consumer: StreamConsumer,
}

#[async_trait]
impl MessageStream for KafkaStream {
    async fn next(&mut self) -> Option<Result<ConsumerRecord, BrokerError>> {
        let msg = match self.consumer.recv().await {
            Ok(msg) => msg,
            Err(e) => return Some(Err(BrokerError::Kafka(e.to_string()))),
        };

        let mut message = GatewayMessage::new(msg.topic(), msg.payload().unwrap_or_default())
            .with_optional_key(msg.key().map(|k| String::from_utf8_lossy(k).to_string()));
        if let Some(headers) = msg.headers() {
            for header in headers.iter() {
                message = message.with_header(header.key, header.value.unwrap_or_default());
            }
        }

        Some(Ok(ConsumerRecord {
            message,
            partition: msg.partition(),
            offset: msg.offset(),
            timestamp: msg.timestamp().to_millis(),
        }))
    }

    fn commit(&mut self, record: &ConsumerRecord) -> Result<(), BrokerError> {
        // The stored position is the next offset to read
        self.consumer
            .store_offset(record.topic(), record.partition, record.offset + 1)
            .map_err(|e| BrokerError::Kafka(format!("Failed to store offset: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cluster::SaslMechanism;
    use pretty_assertions::assert_eq;

    fn cluster(security: SecurityConfig) -> ClusterConfig {
        ClusterConfig {
            brokers: "kafka-1:9092,kafka-2:9092".to_string(),
            client_id: "gw".to_string(),
            security,
            password: None,
        }
    }

    #[test]
    fn plaintext_config() {
        let config = create_config(&cluster(SecurityConfig::Plaintext));
        assert_eq!(config.get("bootstrap.servers"), Some("kafka-1:9092,kafka-2:9092"));
        assert_eq!(config.get("client.id"), Some("gw"));
        assert_eq!(config.get("security.protocol"), Some("plaintext"));
        assert_eq!(config.get("sasl.mechanism"), None);
    }

    #[test]
    fn sasl_config_carries_password_from_environment() {
        let mut cluster = cluster(SecurityConfig::SaslSsl {
            mechanism: SaslMechanism::ScramSha512,
            username: "gateway".to_string(),
            ca_location: Some("/etc/ssl/ca.pem".to_string()),
        });
        cluster.password = Some("secret".to_string());

        let config = create_config(&cluster);
        assert_eq!(config.get("security.protocol"), Some("sasl_ssl"));
        assert_eq!(config.get("sasl.mechanism"), Some("SCRAM-SHA-512"));
        assert_eq!(config.get("sasl.username"), Some("gateway"));
        assert_eq!(config.get("sasl.password"), Some("secret"));
        assert_eq!(config.get("ssl.ca.location"), Some("/etc/ssl/ca.pem"));
    }

    #[test]
    fn sasl_config_without_password_leaves_it_unset() {
        let config = create_config(&cluster(SecurityConfig::SaslSsl {
            mechanism: SaslMechanism::Plain,
            username: "gateway".to_string(),
            ca_location: None,
        }));
        assert_eq!(config.get("sasl.password"), None);
        assert_eq!(config.get("ssl.ca.location"), None);
    }

    #[test]
    fn ssl_config_sets_only_given_files() {
        let config = create_config(&cluster(SecurityConfig::Ssl {
            ca_location: Some("ca.pem".to_string()),
            certificate_location: None,
            key_location: Some("client.key".to_string()),
            key_password: None,
        }));
        assert_eq!(config.get("security.protocol"), Some("ssl"));
        assert_eq!(config.get("ssl.ca.location"), Some("ca.pem"));
        assert_eq!(config.get("ssl.certificate.location"), None);
        assert_eq!(config.get("ssl.key.location"), Some("client.key"));
    }

    #[test]
    fn timed_out_delivery_is_a_timeout() {
        let err = publish_error(
            "orders",
            KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut),
        );
        assert!(matches!(err, PublishError::Timeout { topic } if topic == "orders"));
    }

    #[test]
    fn other_production_errors_are_rejections() {
        let err = publish_error(
            "orders",
            KafkaError::MessageProduction(RDKafkaErrorCode::MessageSizeTooLarge),
        );
        match err {
            PublishError::Rejected { topic, reason } => {
                assert_eq!(topic, "orders");
                assert!(!reason.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
