use crate::domain::cluster::ClusterConfig;
use crate::domain::handler::LoggingHandler;
use crate::domain::topic::{check_topic_name, DEFAULT_MAX_PARTITIONS};
use crate::usecase::subscriber::{HandlerPolicy, Subscription};
use crate::Error;
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "gateway", about = "Publishes HTTP requests to Kafka and consumes topics")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the gateway
    Serve(ServeArgs),
}

#[derive(Args, Clone, Debug, Default)]
pub struct ServeArgs {
    /// Path to the TOML config file; built-in defaults when absent
    #[arg(long, env = "GATEWAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Overrides `[server] bind`
    #[arg(long, env = "GATEWAY_BIND")]
    pub bind: Option<SocketAddr>,

    /// Overrides `[broker] brokers`
    #[arg(long, env = "GATEWAY_BROKERS")]
    pub brokers: Option<String>,

    /// SASL password for `SaslSsl` security
    #[arg(long, env = "GATEWAY_SASL_PASSWORD", hide_env_values = true)]
    pub sasl_password: Option<String>,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub producer: ProducerConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    /// Upper bound for draining requests, subscriptions and the producer.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Kafka,
    Memory,
}

#[derive(Debug, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub backend: Backend,
    #[serde(flatten)]
    pub cluster: ClusterConfig,
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
    /// Partitions of topics the memory backend creates on first use.
    #[serde(default = "default_memory_partitions")]
    pub memory_partitions: i32,
    /// Ceiling for `POST /topics`.
    #[serde(default = "default_max_partitions")]
    pub max_partitions: i32,
    // Keys neither this section nor the cluster settings know; rejected by
    // `validate` since `deny_unknown_fields` does not work with `flatten`.
    #[serde(flatten)]
    pub unknown: BTreeMap<String, toml::Value>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            cluster: ClusterConfig::default(),
            message_timeout_ms: default_message_timeout_ms(),
            startup_timeout_ms: default_startup_timeout_ms(),
            memory_partitions: default_memory_partitions(),
            max_partitions: default_max_partitions(),
            unknown: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ProducerConfig {
    /// Used by `POST /messages` when the request names no topic.
    pub default_topic: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsumerConfig {
    #[serde(default = "default_group_id")]
    pub group_id: String,
    /// How long a subscription keeps reconnecting through a broker outage
    /// before it is reported failed and the gateway shuts down.
    #[serde(default = "default_reconnect_budget_ms")]
    pub reconnect_budget_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group_id: default_group_id(),
            reconnect_budget_ms: default_reconnect_budget_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionConfig {
    pub topic: String,
    /// Falls back to `[consumer] group_id`.
    pub group: Option<String>,
    #[serde(default)]
    pub from_beginning: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    pub dead_letter_topic: Option<String>,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}
fn default_shutdown_timeout_ms() -> u64 {
    10_000
}
fn default_message_timeout_ms() -> u64 {
    5_000
}
fn default_startup_timeout_ms() -> u64 {
    30_000
}
fn default_memory_partitions() -> i32 {
    1
}
fn default_max_partitions() -> i32 {
    DEFAULT_MAX_PARTITIONS
}
fn default_reconnect_budget_ms() -> u64 {
    300_000
}
fn default_group_id() -> String {
    "gateway".to_string()
}
fn default_max_attempts() -> u32 {
    1
}
fn default_retry_backoff_ms() -> u64 {
    500
}

impl GatewayConfig {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
            context: "read",
            detail: format!("'{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            Error::Config { context, detail } => Error::Config {
                context,
                detail: format!("'{}': {}", path.display(), detail),
            },
            other => other,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, Error> {
        toml::from_str(content).map_err(|e| Error::Config {
            context: "parse",
            detail: e.to_string(),
        })
    }

    /// Command-line and environment values win over the file.
    pub fn apply_overrides(&mut self, args: &ServeArgs) {
        if let Some(bind) = args.bind {
            self.server.bind = bind;
        }
        if let Some(brokers) = &args.brokers {
            self.broker.cluster.brokers = brokers.clone();
        }
        if let Some(password) = &args.sasl_password {
            self.broker.cluster.password = Some(password.clone());
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |detail: String| Error::Config {
            context: "validate",
            detail,
        };

        if self.broker.cluster.brokers.trim().is_empty() {
            return Err(invalid("broker.brokers must not be empty".to_string()));
        }
        if let Some(key) = self.broker.unknown.keys().next() {
            return Err(invalid(format!("unknown key broker.{}", key)));
        }
        if self.broker.max_partitions < 1 {
            return Err(invalid("broker.max_partitions must be at least 1".to_string()));
        }
        if !(1..=self.broker.max_partitions).contains(&self.broker.memory_partitions) {
            return Err(invalid(format!(
                "broker.memory_partitions must be between 1 and {}",
                self.broker.max_partitions
            )));
        }
        if let Some(topic) = &self.producer.default_topic {
            check_topic_name(topic).map_err(|e| invalid(format!("producer.default_topic: {}", e)))?;
        }
        for (i, sub) in self.subscriptions.iter().enumerate() {
            check_topic_name(&sub.topic)
                .map_err(|e| invalid(format!("subscriptions[{}].topic: {}", i, e)))?;
            if sub.max_attempts < 1 {
                return Err(invalid(format!(
                    "subscriptions[{}].max_attempts must be at least 1",
                    i
                )));
            }
            if let Some(dlq) = &sub.dead_letter_topic {
                check_topic_name(dlq).map_err(|e| {
                    invalid(format!("subscriptions[{}].dead_letter_topic: {}", i, e))
                })?;
                if dlq == &sub.topic {
                    return Err(invalid(format!(
                        "subscriptions[{}] dead-letters into its own topic",
                        i
                    )));
                }
            }
            if sub.group.as_deref().is_some_and(str::is_empty) {
                return Err(invalid(format!("subscriptions[{}].group must not be empty", i)));
            }
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.server.shutdown_timeout_ms)
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.broker.message_timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.broker.startup_timeout_ms)
    }

    pub fn reconnect_budget(&self) -> Duration {
        Duration::from_millis(self.consumer.reconnect_budget_ms)
    }

    /// Configured subscriptions, each bound to the logging handler.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        let handler = Arc::new(LoggingHandler);
        self.subscriptions
            .iter()
            .map(|sub| {
                let group = sub
                    .group
                    .clone()
                    .unwrap_or_else(|| self.consumer.group_id.clone());
                let subscription = Subscription::new(&sub.topic, group, handler.clone())
                    .with_policy(HandlerPolicy {
                        max_attempts: sub.max_attempts,
                        retry_backoff: Duration::from_millis(sub.retry_backoff_ms),
                        dead_letter_topic: sub.dead_letter_topic.clone(),
                    });
                if sub.from_beginning {
                    subscription.from_beginning()
                } else {
                    subscription
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::broker::StartOffset;
    use crate::domain::cluster::SecurityConfig;
    use pretty_assertions::assert_eq;

    const FULL: &str = r#"
        [server]
        bind = "127.0.0.1:9000"
        shutdown_timeout_ms = 2000

        [broker]
        backend = "memory"
        brokers = "kafka:9092"
        client_id = "gw-test"
        memory_partitions = 3

        [producer]
        default_topic = "demo-topic"

        [consumer]
        group_id = "demo-group"

        [[subscriptions]]
        topic = "demo-topic"
        from_beginning = true

        [[subscriptions]]
        topic = "orders"
        group = "billing"
        max_attempts = 3
        dead_letter_topic = "orders.dlq"
    "#;

    #[test]
    fn empty_file_uses_defaults() {
        let config = GatewayConfig::from_toml_str("").unwrap();
        assert_eq!(config.server.bind, default_bind());
        assert_eq!(config.broker.backend, Backend::Kafka);
        assert_eq!(config.broker.cluster.brokers, "localhost:9092");
        assert!(matches!(config.broker.cluster.security, SecurityConfig::Plaintext));
        assert_eq!(config.consumer.group_id, "gateway");
        assert!(config.subscriptions.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn full_file_parses() {
        let config = GatewayConfig::from_toml_str(FULL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.bind, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(2));
        assert_eq!(config.broker.backend, Backend::Memory);
        assert_eq!(config.broker.cluster.client_id, "gw-test");
        assert_eq!(config.broker.memory_partitions, 3);
        assert_eq!(config.producer.default_topic.as_deref(), Some("demo-topic"));

        let subs = config.subscriptions();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].group, "demo-group");
        assert_eq!(subs[0].start, StartOffset::Earliest);
        assert_eq!(subs[1].group, "billing");
        assert_eq!(subs[1].start, StartOffset::Latest);
        assert_eq!(subs[1].policy.max_attempts, 3);
        assert_eq!(subs[1].policy.dead_letter_topic.as_deref(), Some("orders.dlq"));
    }

    #[test]
    fn overrides_win_over_file() {
        let mut config = GatewayConfig::from_toml_str(FULL).unwrap();
        config.apply_overrides(&ServeArgs {
            bind: Some("0.0.0.0:1234".parse().unwrap()),
            brokers: Some("other:9092".to_string()),
            sasl_password: Some("secret".to_string()),
            ..ServeArgs::default()
        });

        assert_eq!(config.server.bind.port(), 1234);
        assert_eq!(config.broker.cluster.brokers, "other:9092");
        assert_eq!(config.broker.cluster.password.as_deref(), Some("secret"));
    }

    #[test]
    fn invalid_subscription_rejected() {
        let config = GatewayConfig::from_toml_str(
            r#"
            [[subscriptions]]
            topic = ""
            "#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("subscriptions[0].topic"));
    }

    #[test]
    fn misspelled_server_key_rejected() {
        let err = GatewayConfig::from_toml_str("[server]\nshutdown_timeout = 5000").unwrap_err();
        assert!(matches!(err, Error::Config { context: "parse", .. }));
    }

    #[test]
    fn misspelled_broker_key_rejected() {
        let config = GatewayConfig::from_toml_str(
            r#"
            [broker]
            brokers = "kafka:9092"
            broker_list = "kafka:9092"
            "#,
        )
        .unwrap();
        assert_eq!(config.broker.cluster.brokers, "kafka:9092");

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("broker.broker_list"));
    }

    #[test]
    fn cluster_keys_are_not_reported_unknown() {
        let config = GatewayConfig::from_toml_str(
            r#"
            [broker]
            brokers = "kafka:9092"
            client_id = "gw"
            max_partitions = 64

            [broker.security]
            type = "SaslSsl"
            config = { mechanism = "ScramSha512", username = "gateway" }
            "#,
        )
        .unwrap();
        assert!(config.broker.unknown.is_empty());
        assert_eq!(config.broker.max_partitions, 64);
        assert!(matches!(config.broker.cluster.security, SecurityConfig::SaslSsl { .. }));
        config.validate().unwrap();
    }

    #[test]
    fn memory_partitions_above_ceiling_rejected() {
        let config = GatewayConfig::from_toml_str(
            "[broker]\nmax_partitions = 4\nmemory_partitions = 5",
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_section_rejected() {
        let err = GatewayConfig::from_toml_str("[kafka]\nbrokers = \"x\"").unwrap_err();
        assert!(matches!(err, Error::Config { context: "parse", .. }));
    }
}
