use crate::api;
use crate::api::handlers::AppState;
use crate::config::{Backend, GatewayConfig, ServeArgs};
use crate::domain::broker::BrokerClient;
use crate::domain::error::ConnectionError;
use crate::infrastructure::backoff::Backoff;
use crate::infrastructure::kafka::KafkaBroker;
use crate::infrastructure::memory::MemoryBroker;
use crate::usecase::publisher::Publisher;
use crate::usecase::subscriber::{Subscriber, SubscriptionHandle};
use crate::usecase::topic_admin::TopicAdmin;
use crate::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub async fn run(args: ServeArgs) -> Result<(), Error> {
    tracing::info!("gateway starting");

    // --- Load config ---
    let mut config = match &args.config {
        Some(path) => {
            let config = GatewayConfig::load(path)?;
            tracing::info!(config = %path.display(), "loaded config");
            config
        }
        None => {
            tracing::info!("no config file given, using defaults");
            GatewayConfig::default()
        }
    };
    config.apply_overrides(&args);
    config.validate()?;

    // --- Broker ---
    let broker = connect(&config).await?;

    // --- Subscriptions ---
    let failures = CancellationToken::new();
    let subscriber = Subscriber::new(broker.clone())
        .with_reconnect_budget(config.reconnect_budget())
        .with_failure_signal(failures.clone());
    let mut subscriptions = Vec::new();
    for subscription in config.subscriptions() {
        subscriptions.push(subscriber.start_subscription(subscription).await?);
    }
    let statuses: Vec<_> = subscriptions.iter().map(|h| h.status()).collect();

    // --- API server ---
    let mut publisher = Publisher::new(broker.clone());
    if let Some(topic) = &config.producer.default_topic {
        publisher = publisher.with_default_topic(topic);
    }
    let admin = TopicAdmin::new(broker.clone()).with_max_partitions(config.broker.max_partitions);
    let state = AppState::new(publisher, admin).with_subscriptions(statuses.clone());
    let token = CancellationToken::new();
    let mut server = tokio::spawn(api::serve(config.server.bind, state, token.clone()));
    tracing::info!(
        backend = broker.name(),
        subscriptions = subscriptions.len(),
        "gateway ready"
    );

    // --- Wait for a signal, a dead subscription, or the server dying ---
    let early_exit = tokio::select! {
        signal = shutdown_signal() => {
            signal?;
            None
        }
        _ = failures.cancelled() => {
            tracing::error!("a subscription gave up, shutting down");
            None
        }
        served = &mut server => Some(served),
    };

    let timeout = config.shutdown_timeout();
    tracing::info!(timeout_ms = timeout.as_millis() as u64, "shutting down...");
    token.cancel();

    let served = match early_exit {
        Some(served) => served,
        None => match tokio::time::timeout(timeout, &mut server).await {
            Ok(served) => served,
            Err(_) => {
                tracing::warn!("in-flight requests did not finish in time, aborting");
                server.abort();
                Ok(Ok(()))
            }
        },
    };

    stop_subscriptions(subscriptions, timeout).await;

    if let Err(e) = broker.flush(timeout).await {
        tracing::error!(error = %e, "flush error");
    }
    drop(broker);

    if let Some(dead) = statuses.iter().find(|s| s.is_failed()) {
        return Err(Error::Subscription {
            topic: dead.topic().to_string(),
            group: dead.group().to_string(),
            detail: dead.failure().unwrap_or_default().to_string(),
        });
    }

    match served {
        Ok(Ok(())) => {
            tracing::info!("shutdown complete");
            Ok(())
        }
        Ok(Err(e)) => Err(Error::Io(e)),
        Err(e) => Err(Error::Io(std::io::Error::other(e))),
    }
}

/// Builds the configured backend, retrying within the startup timeout.
pub async fn connect(config: &GatewayConfig) -> Result<Arc<dyn BrokerClient>, Error> {
    match config.broker.backend {
        Backend::Memory => {
            tracing::info!(
                partitions = config.broker.memory_partitions,
                "using in-memory broker"
            );
            Ok(Arc::new(MemoryBroker::new(config.broker.memory_partitions)))
        }
        Backend::Kafka => {
            let cluster = &config.broker.cluster;
            let budget = config.startup_timeout();
            let message_timeout = config.message_timeout();
            let backoff = Backoff::within(budget);
            let attempts = backoff.retry("connect to kafka", || {
                KafkaBroker::connect(cluster.clone(), message_timeout)
            });
            let broker = tokio::time::timeout(budget, attempts)
                .await
                .map_err(|_| {
                    ConnectionError::new(
                        &cluster.brokers,
                        format!("no answer within {} ms", budget.as_millis()),
                    )
                })??;
            Ok(Arc::new(broker))
        }
    }
}

async fn stop_subscriptions(subscriptions: Vec<SubscriptionHandle>, timeout: Duration) {
    if subscriptions.is_empty() {
        return;
    }
    let stops = futures::future::join_all(subscriptions.into_iter().map(|h| h.stop()));
    match tokio::time::timeout(timeout, stops).await {
        Ok(stats) => {
            for s in stats {
                tracing::info!(
                    received = s.received,
                    handled = s.handled,
                    failed = s.failed,
                    dead_lettered = s.dead_lettered,
                    "subscription totals"
                );
            }
        }
        Err(_) => tracing::warn!("subscriptions did not stop in time"),
    }
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r,
            _ = terminate.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
