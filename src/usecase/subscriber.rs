use crate::domain::broker::{BrokerClient, MessageStream, StartOffset};
use crate::domain::error::{BrokerError, HandlerError};
use crate::domain::handler::MessageHandler;
use crate::domain::message::{ConsumerRecord, Message};
use crate::infrastructure::backoff::Backoff;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Header names attached to dead-lettered records.
pub const DLQ_TOPIC_HEADER: &str = "dlq.topic";
pub const DLQ_PARTITION_HEADER: &str = "dlq.partition";
pub const DLQ_OFFSET_HEADER: &str = "dlq.offset";
pub const DLQ_ERROR_HEADER: &str = "dlq.error";

/// What happens when a handler fails on a record.
///
/// The record is retried in place up to `max_attempts` times in total, then
/// optionally republished to `dead_letter_topic`. Either way its offset is
/// committed afterwards and the loop moves on. A record whose retries are cut
/// short by stop is left uncommitted and redelivered to the next member.
#[derive(Debug, Clone)]
pub struct HandlerPolicy {
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub dead_letter_topic: Option<String>,
}

impl Default for HandlerPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            retry_backoff: Duration::from_millis(500),
            dead_letter_topic: None,
        }
    }
}

/// A topic/group pair bound to the handler that processes its records.
#[derive(Clone)]
pub struct Subscription {
    pub topic: String,
    pub group: String,
    pub handler: Arc<dyn MessageHandler>,
    pub start: StartOffset,
    pub policy: HandlerPolicy,
}

impl Subscription {
    pub fn new(
        topic: impl Into<String>,
        group: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            topic: topic.into(),
            group: group.into(),
            handler,
            start: StartOffset::default(),
            policy: HandlerPolicy::default(),
        }
    }

    pub fn from_beginning(mut self) -> Self {
        self.start = StartOffset::Earliest;
        self
    }

    pub fn with_policy(mut self, policy: HandlerPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    handled: AtomicU64,
    failed: AtomicU64,
    dead_lettered: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubscriptionStats {
    pub received: u64,
    pub handled: u64,
    pub failed: u64,
    pub dead_lettered: u64,
}

impl Counters {
    fn snapshot(&self) -> SubscriptionStats {
        SubscriptionStats {
            received: self.received.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

/// Shared view of whether a receive loop is still alive.
///
/// Cheap to clone; the HTTP health check holds one per subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionStatus {
    inner: Arc<StatusInner>,
}

#[derive(Debug)]
struct StatusInner {
    topic: String,
    group: String,
    failure: OnceLock<String>,
}

impl SubscriptionStatus {
    fn new(topic: &str, group: &str) -> Self {
        Self {
            inner: Arc::new(StatusInner {
                topic: topic.to_string(),
                group: group.to_string(),
                failure: OnceLock::new(),
            }),
        }
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    pub fn group(&self) -> &str {
        &self.inner.group
    }

    /// Why the loop gave up, if it did.
    pub fn failure(&self) -> Option<&str> {
        self.inner.failure.get().map(String::as_str)
    }

    pub fn is_failed(&self) -> bool {
        self.inner.failure.get().is_some()
    }

    fn fail(&self, detail: String) {
        let _ = self.inner.failure.set(detail);
    }
}

/// A running receive loop.
///
/// Dropping the handle leaves the loop running; call [`stop`](Self::stop) to
/// end it.
pub struct SubscriptionHandle {
    status: SubscriptionStatus,
    token: CancellationToken,
    task: JoinHandle<()>,
    counters: Arc<Counters>,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &str {
        self.status.topic()
    }

    pub fn group(&self) -> &str {
        self.status.group()
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.status.clone()
    }

    pub fn stats(&self) -> SubscriptionStats {
        self.counters.snapshot()
    }

    /// True once the loop has exited, either stopped or after giving up.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Asks the loop to exit and waits for it.
    ///
    /// A handler that is running when this is called finishes first; no
    /// further record is received afterwards.
    pub async fn stop(self) -> SubscriptionStats {
        let topic = self.status.topic();
        let group = self.status.group();
        self.token.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(topic, group, error = %e, "subscription task failed");
        }
        tracing::info!(topic, group, "subscription stopped");
        self.counters.snapshot()
    }
}

/// Starts receive loops against a shared broker client.
///
/// A running loop rides out broker errors with capped backoff, reopening its
/// stream when needed. Once errors have lasted longer than the reconnect
/// budget without a record getting through, the loop marks its
/// [`SubscriptionStatus`] failed, cancels the failure signal and exits.
#[derive(Clone)]
pub struct Subscriber {
    broker: Arc<dyn BrokerClient>,
    reconnect: Backoff,
    reconnect_budget: Duration,
    failures: CancellationToken,
}

impl Subscriber {
    pub fn new(broker: Arc<dyn BrokerClient>) -> Self {
        Self {
            broker,
            reconnect: Backoff::default(),
            reconnect_budget: Duration::from_secs(300),
            failures: CancellationToken::new(),
        }
    }

    /// Delays between retries, and the attempt count for the initial open.
    pub fn with_reconnect_backoff(mut self, backoff: Backoff) -> Self {
        self.reconnect = backoff;
        self
    }

    pub fn with_reconnect_budget(mut self, budget: Duration) -> Self {
        self.reconnect_budget = budget;
        self
    }

    /// Token cancelled when any loop started here gives up.
    pub fn with_failure_signal(mut self, failures: CancellationToken) -> Self {
        self.failures = failures;
        self
    }

    /// Starts a loop on `topic` for `group` with the default policy,
    /// reading only records published from now on.
    pub async fn start(
        &self,
        topic: &str,
        group: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionHandle, BrokerError> {
        self.start_subscription(Subscription::new(topic, group, handler))
            .await
    }

    pub async fn start_subscription(
        &self,
        subscription: Subscription,
    ) -> Result<SubscriptionHandle, BrokerError> {
        let stream = open_with_retry(&self.broker, &subscription, self.reconnect).await?;

        let token = CancellationToken::new();
        let counters = Arc::new(Counters::default());
        let status = SubscriptionStatus::new(&subscription.topic, &subscription.group);
        let receive_loop = ReceiveLoop {
            broker: self.broker.clone(),
            subscription: subscription.clone(),
            reconnect: self.reconnect,
            reconnect_budget: self.reconnect_budget,
            token: token.clone(),
            failures: self.failures.clone(),
            status: status.clone(),
            counters: counters.clone(),
        };
        let task = tokio::spawn(receive_loop.run(stream));

        tracing::info!(
            topic = %subscription.topic,
            group = %subscription.group,
            handler = subscription.handler.name(),
            start = ?subscription.start,
            "subscription started"
        );
        Ok(SubscriptionHandle {
            status,
            token,
            task,
            counters,
        })
    }

    pub async fn stop(&self, handle: SubscriptionHandle) -> SubscriptionStats {
        handle.stop().await
    }
}

/// Registers `handler` for every record of `topic` received by `group`.
pub async fn subscribe(
    broker: &Arc<dyn BrokerClient>,
    topic: &str,
    group: &str,
    handler: Arc<dyn MessageHandler>,
) -> Result<SubscriptionHandle, BrokerError> {
    Subscriber::new(broker.clone())
        .start(topic, group, handler)
        .await
}

async fn open_with_retry(
    broker: &Arc<dyn BrokerClient>,
    subscription: &Subscription,
    backoff: Backoff,
) -> Result<Box<dyn MessageStream>, BrokerError> {
    let what = format!("open stream on {}", subscription.topic);
    backoff
        .retry(&what, || {
            let broker = broker.clone();
            let topic = subscription.topic.clone();
            let group = subscription.group.clone();
            let start = subscription.start;
            async move { broker.open_stream(&topic, &group, start).await }
        })
        .await
}

enum Outcome {
    Handled,
    Failed(HandlerError),
    // Stop arrived while attempts were left
    Abandoned,
}

// Consecutive receive-side failures with no record in between.
struct Outage {
    since: Instant,
    errors: u32,
}

struct ReceiveLoop {
    broker: Arc<dyn BrokerClient>,
    subscription: Subscription,
    reconnect: Backoff,
    reconnect_budget: Duration,
    token: CancellationToken,
    failures: CancellationToken,
    status: SubscriptionStatus,
    counters: Arc<Counters>,
}

impl ReceiveLoop {
    async fn run(self, stream: Box<dyn MessageStream>) {
        let topic = self.subscription.topic.as_str();
        let group = self.subscription.group.as_str();
        let mut stream = Some(stream);
        let mut outage: Option<Outage> = None;

        loop {
            let Some(current) = stream.as_mut() else {
                let opened = tokio::select! {
                    biased;
                    _ = self.token.cancelled() => break,
                    opened = self.broker.open_stream(topic, group, self.subscription.start) => opened,
                };
                match opened {
                    Ok(reopened) => {
                        tracing::info!(topic, group, "stream reopened");
                        stream = Some(reopened);
                    }
                    Err(e) => {
                        if self.recover(&mut outage, e.to_string()).await.is_break() {
                            break;
                        }
                    }
                }
                continue;
            };

            // Only the wait for the next record is raced against stop; a
            // record already received is always processed to the end.
            let next = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                next = current.next() => next,
            };

            match next {
                Some(Ok(record)) => {
                    if let Some(ended) = outage.take() {
                        tracing::info!(topic, group, errors = ended.errors, "receiving again");
                    }
                    self.counters.received.fetch_add(1, Ordering::Relaxed);
                    if !self.process(&record).await {
                        continue;
                    }
                    if let Err(e) = current.commit(&record) {
                        tracing::warn!(topic, group, offset = record.offset, error = %e, "commit failed");
                    }
                }
                Some(Err(e)) => {
                    if self.recover(&mut outage, e.to_string()).await.is_break() {
                        break;
                    }
                }
                None => {
                    tracing::warn!(topic, group, "stream closed, reopening");
                    stream = None;
                    if self
                        .recover(&mut outage, "stream closed".to_string())
                        .await
                        .is_break()
                    {
                        break;
                    }
                }
            }
        }
    }

    /// Waits out one receive-side failure. Breaks on stop, or after marking
    /// the subscription failed once the outage outlasts the budget.
    async fn recover(&self, outage: &mut Option<Outage>, detail: String) -> ControlFlow<()> {
        let topic = self.subscription.topic.as_str();
        let group = self.subscription.group.as_str();
        let now = Instant::now();
        let current = outage.get_or_insert(Outage {
            since: now,
            errors: 0,
        });
        current.errors += 1;

        let elapsed = now.duration_since(current.since);
        if elapsed >= self.reconnect_budget {
            tracing::error!(
                topic,
                group,
                errors = current.errors,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %detail,
                "broker unavailable for too long, giving up"
            );
            self.status.fail(format!(
                "{} (failing for {} ms)",
                detail,
                elapsed.as_millis()
            ));
            self.failures.cancel();
            return ControlFlow::Break(());
        }

        let delay = self.reconnect.delay(current.errors);
        tracing::warn!(
            topic,
            group,
            attempt = current.errors,
            delay_ms = delay.as_millis() as u64,
            error = %detail,
            "receive failed"
        );
        if self.pause(delay).await {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(())
        }
    }

    /// Sleeps unless stop is requested first. Returns false on stop.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Runs the handler under the policy. Returns whether the record may be
    /// committed.
    async fn process(&self, record: &ConsumerRecord) -> bool {
        let policy = &self.subscription.policy;
        let handler = &self.subscription.handler;
        let mut attempt = 1;

        let outcome = loop {
            match handler.handle(record).await {
                Ok(()) => break Outcome::Handled,
                Err(e) => {
                    tracing::warn!(
                        topic = %record.topic(),
                        partition = record.partition,
                        offset = record.offset,
                        handler = handler.name(),
                        attempt,
                        error = %e,
                        "handler failed"
                    );
                    if attempt >= policy.max_attempts {
                        break Outcome::Failed(e);
                    }
                    if self.token.is_cancelled() || !self.pause(policy.retry_backoff).await {
                        break Outcome::Abandoned;
                    }
                    attempt += 1;
                }
            }
        };

        match outcome {
            Outcome::Handled => {
                self.counters.handled.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Failed(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                if let Some(dlq) = &policy.dead_letter_topic {
                    self.dead_letter(dlq, record, &e).await;
                }
            }
            Outcome::Abandoned => {
                tracing::info!(
                    topic = %record.topic(),
                    partition = record.partition,
                    offset = record.offset,
                    attempt,
                    "stopping with retries left, record stays uncommitted"
                );
                return false;
            }
        }
        true
    }

    async fn dead_letter(&self, dlq: &str, record: &ConsumerRecord, error: &HandlerError) {
        let original = &record.message;
        let mut message = Message::new(dlq, original.payload())
            .with_optional_key(original.key().map(str::to_string));
        for (name, value) in original.headers() {
            message = message.with_header(name.as_str(), value.clone());
        }
        let message = message
            .with_header(DLQ_TOPIC_HEADER, original.topic())
            .with_header(DLQ_PARTITION_HEADER, record.partition.to_string())
            .with_header(DLQ_OFFSET_HEADER, record.offset.to_string())
            .with_header(DLQ_ERROR_HEADER, error.to_string());

        match self.broker.publish(message).await {
            Ok(result) => {
                self.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    topic = %original.topic(),
                    offset = record.offset,
                    dead_letter_topic = dlq,
                    dead_letter_offset = ?result.offset,
                    "record dead-lettered"
                );
            }
            Err(e) => {
                tracing::error!(
                    topic = %original.topic(),
                    offset = record.offset,
                    dead_letter_topic = dlq,
                    error = %e,
                    "dead-letter publish failed, record dropped"
                );
            }
        }
    }
}
