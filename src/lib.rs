pub mod api;
pub mod app;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod usecase;

use crate::domain::error::{BrokerError, ConnectionError};
use thiserror::Error;

pub use crate::domain::broker::{BrokerClient, MessageStream, StartOffset};
pub use crate::domain::handler::{FnHandler, LoggingHandler, MessageHandler};
pub use crate::domain::message::{ConsumerRecord, DeliveryResult, Message};
pub use crate::infrastructure::kafka::KafkaBroker;
pub use crate::infrastructure::memory::MemoryBroker;
pub use crate::usecase::publisher::Publisher;
pub use crate::usecase::subscriber::{
    Subscriber, Subscription, SubscriptionHandle, SubscriptionStatus,
};

/// Startup and shutdown failures of the gateway process.
#[derive(Error, Debug)]
pub enum Error {
    #[error("config ({context}): {detail}")]
    Config {
        context: &'static str,
        detail: String,
    },
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("broker: {0}")]
    Broker(#[from] BrokerError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("subscription on '{topic}' (group {group}) failed: {detail}")]
    Subscription {
        topic: String,
        group: String,
        detail: String,
    },
}
