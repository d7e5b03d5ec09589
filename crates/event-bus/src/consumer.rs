//! Consumer group member: delivery loop with commit-after-success.

use std::time::Duration;

use tokio::sync::watch;

use crate::bus::{EventBus, MemberId};
use crate::error::HandlerError;
use crate::handler::EventHandler;
use crate::{BusError, Offset, PAYMENT_COMPLETED_TOPIC, PaymentCompleted, Record, Result, TopicPartition};

/// Where a group starts reading a partition it has never committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetReset {
    /// Replay the whole retained backlog.
    #[default]
    Earliest,
    /// Only records appended after the member first sees the partition.
    Latest,
}

/// Consumer settings.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub group: String,
    pub topics: Vec<String>,
    pub offset_reset: OffsetReset,
    /// Upper bound of records fetched from one partition per poll.
    pub max_batch: usize,
    /// How long an idle member waits for new records before polling again.
    pub poll_interval: Duration,
    /// Pause after a handler failure before the record is delivered again.
    pub retry_backoff: Duration,
}

impl ConsumerConfig {
    /// Settings for `group` subscribed to `payment-completed`.
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            topics: vec![PAYMENT_COMPLETED_TOPIC.to_string()],
            offset_reset: OffsetReset::Earliest,
            max_batch: 100,
            poll_interval: Duration::from_millis(500),
            retry_backoff: Duration::from_secs(1),
        }
    }
}

/// Outcome counters of one poll over the member's partitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Records handed to the handler (or found undecodable).
    pub delivered: usize,
    /// Offsets advanced.
    pub committed: usize,
    /// Handler failures; each one stops its partition until the next poll.
    pub failed: usize,
    /// Undecodable records committed past.
    pub skipped: usize,
}

enum Dispatch {
    Handled,
    Failed(HandlerError),
    Poison(String),
}

/// One member of a consumer group.
///
/// For every partition it owns it delivers records in offset order and
/// commits `offset + 1` only after the handler returned `Ok`. A handler error
/// stops that partition without committing, so the same record is delivered
/// again on the next poll, or to the next owner after a rebalance.
pub struct Consumer<B: EventBus, H: EventHandler> {
    bus: B,
    handler: H,
    config: ConsumerConfig,
}

impl<B: EventBus, H: EventHandler> Consumer<B, H> {
    pub fn new(bus: B, handler: H, config: ConsumerConfig) -> Self {
        Self {
            bus,
            handler,
            config,
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Joins the group, returning this member's identity.
    pub async fn join(&self) -> Result<MemberId> {
        self.bus
            .join_group(&self.config.group, &self.config.topics)
            .await
    }

    /// Leaves the group so its partitions move to the remaining members.
    pub async fn leave(&self, member: &MemberId) -> Result<()> {
        self.bus.leave_group(&self.config.group, member).await
    }

    /// Polls every partition the member currently owns once.
    pub async fn poll(&self, member: &MemberId) -> Result<PollSummary> {
        self.poll_inner(member, None).await
    }

    /// Runs the delivery loop until `shutdown` turns true or its sender is
    /// dropped, then leaves the group.
    ///
    /// Shutdown is checked between records; a handler call already in flight
    /// always finishes and its offset is committed or not as a unit.
    #[tracing::instrument(skip_all, fields(group = %self.config.group, handler = self.handler.name()))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let member = self.join().await?;
        tracing::info!(%member, topics = ?self.config.topics, "consumer started");
        let mut appends = self.bus.appends();

        loop {
            if *shutdown.borrow() {
                break;
            }

            // Appends from here on wake the idle wait below.
            appends.borrow_and_update();
            let backoff = match self.poll_inner(&member, Some(&shutdown)).await {
                Ok(summary) if summary.failed > 0 => Some(self.config.retry_backoff),
                Ok(summary) if summary.delivered > 0 => continue,
                Ok(_) => None,
                Err(e) => {
                    tracing::error!(error = %e, "poll failed");
                    Some(self.config.retry_backoff)
                }
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                () = self.idle(backoff, &mut appends) => {}
            }
        }

        self.leave(&member).await?;
        tracing::info!(%member, "consumer stopped");
        Ok(())
    }

    async fn idle(&self, backoff: Option<Duration>, appends: &mut watch::Receiver<u64>) {
        match backoff {
            Some(delay) => tokio::time::sleep(delay).await,
            None => {
                let _ = tokio::time::timeout(self.config.poll_interval, appends.changed()).await;
            }
        }
    }

    async fn poll_inner(
        &self,
        member: &MemberId,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Result<PollSummary> {
        let assignment = self.bus.assignment(&self.config.group, member).await?;
        let mut summary = PollSummary::default();

        for partition in &assignment.partitions {
            if is_shutting_down(shutdown) {
                break;
            }
            match self
                .poll_partition(member, partition, shutdown, &mut summary)
                .await
            {
                Ok(()) => {}
                Err(BusError::NotAssigned { partition, .. }) => {
                    tracing::info!(%partition, "partition moved to another member");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(summary)
    }

    async fn start_offset(&self, member: &MemberId, partition: &TopicPartition) -> Result<Offset> {
        if let Some(offset) = self.bus.committed(&self.config.group, partition).await? {
            return Ok(offset);
        }
        match self.config.offset_reset {
            OffsetReset::Earliest => Ok(Offset::earliest()),
            OffsetReset::Latest => {
                let end = self.bus.end_offset(partition).await?;
                self.bus
                    .commit(&self.config.group, member, partition, end)
                    .await?;
                Ok(end)
            }
        }
    }

    #[tracing::instrument(skip(self, member, partition, shutdown, summary), fields(%partition))]
    async fn poll_partition(
        &self,
        member: &MemberId,
        partition: &TopicPartition,
        shutdown: Option<&watch::Receiver<bool>>,
        summary: &mut PollSummary,
    ) -> Result<()> {
        let start = self.start_offset(member, partition).await?;
        let records = self
            .bus
            .fetch(partition, start, self.config.max_batch)
            .await?;

        for record in records {
            if is_shutting_down(shutdown) {
                break;
            }
            summary.delivered += 1;

            match self.dispatch(&record).await {
                Dispatch::Handled => {
                    metrics::counter!("bus_records_consumed_total", "group" => self.config.group.clone())
                        .increment(1);
                }
                Dispatch::Poison(reason) => {
                    tracing::error!(offset = %record.offset, %reason, "undecodable record skipped");
                    metrics::counter!("bus_poison_records_total", "group" => self.config.group.clone())
                        .increment(1);
                    summary.skipped += 1;
                }
                Dispatch::Failed(err) => {
                    tracing::warn!(offset = %record.offset, error = %err, "handler failed, record will be redelivered");
                    metrics::counter!("bus_handler_failures_total", "group" => self.config.group.clone())
                        .increment(1);
                    summary.failed += 1;
                    return Ok(());
                }
            }

            self.bus
                .commit(&self.config.group, member, partition, record.offset.next())
                .await?;
            summary.committed += 1;
        }

        Ok(())
    }

    async fn dispatch(&self, record: &Record) -> Dispatch {
        match record.topic.as_str() {
            PAYMENT_COMPLETED_TOPIC => {
                let event: PaymentCompleted = match serde_json::from_slice(&record.payload) {
                    Ok(event) => event,
                    Err(e) => return Dispatch::Poison(e.to_string()),
                };
                tracing::debug!(
                    payment_id = %event.payment_id,
                    offset = %record.offset,
                    "delivering payment completed"
                );
                match self.handler.handle_payment_completed(&event).await {
                    Ok(()) => Dispatch::Handled,
                    Err(e) => Dispatch::Failed(e),
                }
            }
            other => {
                tracing::debug!(topic = other, "no handler for topic");
                Dispatch::Handled
            }
        }
    }
}

fn is_shutting_down(shutdown: Option<&watch::Receiver<bool>>) -> bool {
    shutdown.is_some_and(|rx| *rx.borrow())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryEventBus, Producer};
    use async_trait::async_trait;
    use chrono::Utc;
    use common::{Money, OrderId, PaymentId, UserId};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<String>>,
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn handle_payment_completed(
            &self,
            event: &PaymentCompleted,
        ) -> std::result::Result<(), HandlerError> {
            self.seen.lock().await.push(event.payment_id.to_string());
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(HandlerError::new("store unavailable"));
            }
            Ok(())
        }
    }

    fn event(payment_id: &str) -> PaymentCompleted {
        PaymentCompleted {
            payment_id: PaymentId::new(payment_id),
            order_id: OrderId::new("order_1"),
            user_id: UserId::new("u1"),
            amount: Money::from_cents(1000),
            currency: "USD".to_string(),
            payment_method: "card".to_string(),
            completed_at: Utc::now(),
        }
    }

    fn consumer(
        bus: &InMemoryEventBus,
        handler: Arc<RecordingHandler>,
    ) -> Consumer<InMemoryEventBus, Arc<RecordingHandler>> {
        Consumer::new(bus.clone(), handler, ConsumerConfig::new("test-group"))
    }

    #[tokio::test]
    async fn new_group_replays_backlog_in_partition_order() {
        let bus = InMemoryEventBus::with_partitions(1);
        let producer = Producer::new(bus.clone());
        for id in ["pay_1", "pay_2", "pay_3"] {
            producer.publish(&event(id)).await.unwrap();
        }

        let handler = Arc::new(RecordingHandler::default());
        let consumer = consumer(&bus, handler.clone());
        let member = consumer.join().await.unwrap();

        let summary = consumer.poll(&member).await.unwrap();
        assert_eq!(summary.committed, 3);
        assert_eq!(*handler.seen.lock().await, vec!["pay_1", "pay_2", "pay_3"]);

        let tp = TopicPartition::new(PAYMENT_COMPLETED_TOPIC, 0);
        assert_eq!(
            bus.committed("test-group", &tp).await.unwrap(),
            Some(Offset::new(3))
        );
    }

    #[tokio::test]
    async fn handler_failure_leaves_offset_and_redelivers() {
        let bus = InMemoryEventBus::with_partitions(1);
        Producer::new(bus.clone())
            .publish(&event("pay_1"))
            .await
            .unwrap();

        let handler = Arc::new(RecordingHandler::default());
        handler.failures_left.store(1, Ordering::SeqCst);
        let consumer = consumer(&bus, handler.clone());
        let member = consumer.join().await.unwrap();
        let tp = TopicPartition::new(PAYMENT_COMPLETED_TOPIC, 0);

        let first = consumer.poll(&member).await.unwrap();
        assert_eq!(first.failed, 1);
        assert_eq!(first.committed, 0);
        assert_eq!(bus.committed("test-group", &tp).await.unwrap(), None);

        let second = consumer.poll(&member).await.unwrap();
        assert_eq!(second.committed, 1);
        assert_eq!(*handler.seen.lock().await, vec!["pay_1", "pay_1"]);
    }

    #[tokio::test]
    async fn failure_blocks_later_records_of_same_partition() {
        let bus = InMemoryEventBus::with_partitions(1);
        let producer = Producer::new(bus.clone());
        producer.publish(&event("pay_1")).await.unwrap();
        producer.publish(&event("pay_2")).await.unwrap();

        let handler = Arc::new(RecordingHandler::default());
        handler.failures_left.store(1, Ordering::SeqCst);
        let consumer = consumer(&bus, handler.clone());
        let member = consumer.join().await.unwrap();

        consumer.poll(&member).await.unwrap();
        assert_eq!(*handler.seen.lock().await, vec!["pay_1"]);

        consumer.poll(&member).await.unwrap();
        assert_eq!(
            *handler.seen.lock().await,
            vec!["pay_1", "pay_1", "pay_2"]
        );
    }

    #[tokio::test]
    async fn undecodable_record_is_skipped_and_committed() {
        let bus = InMemoryEventBus::with_partitions(1);
        Producer::new(bus.clone())
            .publish_to(PAYMENT_COMPLETED_TOPIC, "junk", &serde_json::json!({"nope": 1}))
            .await
            .unwrap();
        Producer::new(bus.clone())
            .publish(&event("pay_1"))
            .await
            .unwrap();

        let handler = Arc::new(RecordingHandler::default());
        let consumer = consumer(&bus, handler.clone());
        let member = consumer.join().await.unwrap();

        let summary = consumer.poll(&member).await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.committed, 2);
        assert_eq!(*handler.seen.lock().await, vec!["pay_1"]);
    }

    #[tokio::test]
    async fn latest_reset_ignores_backlog() {
        let bus = InMemoryEventBus::with_partitions(1);
        let producer = Producer::new(bus.clone());
        producer.publish(&event("pay_old")).await.unwrap();

        let handler = Arc::new(RecordingHandler::default());
        let mut config = ConsumerConfig::new("latest-group");
        config.offset_reset = OffsetReset::Latest;
        let consumer = Consumer::new(bus.clone(), handler.clone(), config);
        let member = consumer.join().await.unwrap();

        assert_eq!(consumer.poll(&member).await.unwrap().delivered, 0);

        producer.publish(&event("pay_new")).await.unwrap();
        consumer.poll(&member).await.unwrap();
        assert_eq!(*handler.seen.lock().await, vec!["pay_new"]);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_and_leaves_group() {
        let bus = InMemoryEventBus::with_partitions(1);
        let handler = Arc::new(RecordingHandler::default());
        let consumer = Arc::new(consumer(&bus, handler.clone()));
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn({
            let consumer = consumer.clone();
            async move { consumer.run(rx).await }
        });

        Producer::new(bus.clone())
            .publish(&event("pay_1"))
            .await
            .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while handler.seen.lock().await.is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "record never delivered");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        tx.send(true).unwrap();
        task.await.unwrap().unwrap();

        // joined (1) and left (2)
        assert_eq!(bus.generation("test-group").await, 2);
    }

    #[tokio::test]
    async fn idle_member_wakes_on_append_without_waiting_poll_interval() {
        let bus = InMemoryEventBus::with_partitions(1);
        let handler = Arc::new(RecordingHandler::default());
        let mut config = ConsumerConfig::new("test-group");
        config.poll_interval = Duration::from_secs(3600);
        let consumer = Arc::new(Consumer::new(bus.clone(), handler.clone(), config));
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn({
            let consumer = consumer.clone();
            async move { consumer.run(rx).await }
        });

        let producer = Producer::new(bus.clone());
        for (round, id) in ["pay_1", "pay_2", "pay_3"].into_iter().enumerate() {
            producer.publish(&event(id)).await.unwrap();
            let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
            while handler.seen.lock().await.len() <= round {
                assert!(tokio::time::Instant::now() < deadline, "{id} not delivered");
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }

        tx.send(true).unwrap();
        task.await.unwrap().unwrap();
    }
}
