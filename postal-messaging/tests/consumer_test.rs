//! Integration tests for the email consumers

use async_trait::async_trait;
use postal_mail::{EmailSender, MailError};
use postal_messaging::*;
use postal_pool::WorkerPool;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

/// Records deliveries; fails for one recipient; can be held closed.
#[derive(Default)]
struct RecordingSender {
    delivered: Mutex<Vec<String>>,
    attempts: Mutex<Vec<String>>,
    fail_to: Option<String>,
    gate: Option<Arc<Semaphore>>,
}

impl RecordingSender {
    fn failing_for(recipient: &str) -> Self {
        Self {
            fail_to: Some(recipient.to_string()),
            ..Default::default()
        }
    }

    fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Default::default()
        }
    }

    fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }

    fn attempts(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}

#[async_trait]
impl EmailSender for RecordingSender {
    async fn send_email(
        &self,
        _from: &str,
        to: &str,
        _subject: &str,
        _template: &str,
        _data: &HashMap<String, Value>,
    ) -> postal_mail::Result<()> {
        self.attempts.lock().unwrap().push(to.to_string());
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }
        if self.fail_to.as_deref() == Some(to) {
            return Err(MailError::Smtp("mailbox unavailable".into()));
        }
        self.delivered.lock().unwrap().push(to.to_string());
        Ok(())
    }
}

fn event_to(to: &str) -> OutboundMessage {
    let event = EmailEvent::new(EmailMessage::new("noreply@example.com", to, "Hello", "welcome"));
    OutboundMessage::new(event.to_bytes().unwrap())
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        sleep(Duration::from_millis(5)).await;
    }
}

struct Harness {
    broker: InMemoryBroker,
    pool: WorkerPool,
    consumer: Arc<PooledConsumer>,
    results: Arc<CollectingResultHandler>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<Result<()>>,
}

impl Harness {
    fn start(sender: Arc<RecordingSender>, workers: usize, buffer: usize) -> Self {
        let broker = InMemoryBroker::new(TOPIC_EMAIL_QUEUE);
        let pool = WorkerPool::new(workers, buffer);
        pool.start().unwrap();

        let results = Arc::new(CollectingResultHandler::new());
        let consumer = Arc::new(
            PooledConsumer::new(Arc::new(broker.reader()), sender, pool.clone())
                .with_result_handler(results.clone())
                .with_fetch_backoff(Duration::from_millis(10)),
        );

        let cancel = CancellationToken::new();
        let task = {
            let consumer = consumer.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { consumer.start(cancel).await })
        };

        Self {
            broker,
            pool,
            consumer,
            results,
            cancel,
            task,
        }
    }

    async fn shutdown(self) -> (InMemoryBroker, Arc<CollectingResultHandler>) {
        self.cancel.cancel();
        let outcome = timeout(Duration::from_secs(2), self.task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, Err(MessagingError::Cancelled)));

        self.consumer.close().await.unwrap();
        self.pool.stop_with_timeout(Duration::from_secs(2)).await.unwrap();
        self.consumer.wait_for_results().await;
        (self.broker, self.results)
    }
}

#[tokio::test]
async fn test_pooled_consumer_delivers_and_reports() {
    let sender = Arc::new(RecordingSender::failing_for("bounce@example.com"));
    let harness = Harness::start(sender.clone(), 2, 5);

    harness.broker.push(event_to("a@example.com"));
    harness.broker.push(event_to("bounce@example.com"));
    harness.broker.push(OutboundMessage::new("not json"));

    let mut exhausted = EmailMessage::new("noreply@example.com", "c@example.com", "Hi", "welcome");
    exhausted.retry_count = 3;
    harness
        .broker
        .push(OutboundMessage::new(EmailEvent::new(exhausted).to_bytes().unwrap()));
    harness.broker.push(event_to("d@example.com"));

    let results = harness.results.clone();
    wait_until("five results", || results.len() == 5).await;
    let (broker, results) = harness.shutdown().await;

    let mut delivered = sender.delivered();
    delivered.sort();
    assert_eq!(delivered, ["a@example.com", "d@example.com"]);

    let by_id: HashMap<_, _> = results
        .results()
        .into_iter()
        .map(|r| (r.job_id.clone(), r))
        .collect();
    assert!(by_id["email-0-0"].success);
    assert!(!by_id["email-0-1"].success);
    assert!(by_id["email-0-2"].error.as_deref().unwrap().contains("failed to unmarshal event"));
    assert_eq!(by_id["email-0-3"].error.as_deref(), Some("message exceeded max retries"));
    assert!(by_id["email-0-4"].success);

    // Failures are committed too: the offset moves as soon as a job is queued.
    assert_eq!(broker.commits().len(), 5);
    assert_eq!(broker.committed_offset(), Some(5));
}

#[tokio::test]
async fn test_offset_committed_before_delivery_completes() {
    let gate = Arc::new(Semaphore::new(0));
    let sender = Arc::new(RecordingSender::gated(gate.clone()));
    let harness = Harness::start(sender.clone(), 1, 4);

    harness.broker.push(event_to("a@example.com"));

    let broker = harness.broker.clone();
    wait_until("commit", || broker.committed_offset() == Some(1)).await;
    wait_until("send attempt", || sender.attempts() == 1).await;
    assert!(sender.delivered().is_empty());
    assert!(harness.results.is_empty());

    gate.add_permits(1);
    let results = harness.results.clone();
    wait_until("result", || results.len() == 1).await;

    let (_, results) = harness.shutdown().await;
    assert!(results.results()[0].success);
}

#[tokio::test]
async fn test_full_queue_waits_for_space() {
    let gate = Arc::new(Semaphore::new(0));
    let sender = Arc::new(RecordingSender::gated(gate.clone()));
    let harness = Harness::start(sender.clone(), 1, 1);

    for i in 0..3 {
        harness.broker.push(event_to(&format!("user{i}@example.com")));
    }

    // One job executing, one queued, the third waiting for a slot.
    let broker = harness.broker.clone();
    wait_until("two commits", || broker.commits().len() == 2).await;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.commits().len(), 2);

    gate.add_permits(3);
    wait_until("three commits", || broker.commits().len() == 3).await;
    let results = harness.results.clone();
    wait_until("three results", || results.len() == 3).await;

    let (_, results) = harness.shutdown().await;
    assert!(results.results().iter().all(|r| r.success));
    assert_eq!(sender.delivered().len(), 3);
}

#[tokio::test]
async fn test_cancel_while_queue_full_skips_commit() {
    let gate = Arc::new(Semaphore::new(0));
    let sender = Arc::new(RecordingSender::gated(gate.clone()));
    let harness = Harness::start(sender.clone(), 1, 1);

    for i in 0..3 {
        harness.broker.push(event_to(&format!("user{i}@example.com")));
    }
    let broker = harness.broker.clone();
    wait_until("two commits", || broker.commits().len() == 2).await;

    // The third job is still waiting for a slot when the consumer stops.
    harness.cancel.cancel();
    wait_until("consumer exit", || harness.task.is_finished()).await;

    gate.add_permits(3);
    let (broker, results) = harness.shutdown().await;
    assert_eq!(broker.committed_offset(), Some(2));
    assert_eq!(results.len(), 2);
}

#[tokio::test]
async fn test_fetch_failures_are_retried() {
    let sender = Arc::new(RecordingSender::default());
    let harness = Harness::start(sender.clone(), 1, 2);

    harness.broker.fail_next_fetches(3);
    harness.broker.push(event_to("a@example.com"));

    let results = harness.results.clone();
    wait_until("result", || results.len() == 1).await;
    harness.shutdown().await;

    assert_eq!(sender.delivered(), ["a@example.com"]);
}

#[tokio::test]
async fn test_sequential_consumer_commits_only_successes() {
    let sender = Arc::new(RecordingSender::failing_for("bounce@example.com"));
    let broker = InMemoryBroker::new(TOPIC_EMAIL_QUEUE);
    let consumer = Arc::new(SequentialConsumer::new(Arc::new(broker.reader()), sender.clone()));

    broker.push(event_to("a@example.com"));
    broker.push(event_to("bounce@example.com"));
    broker.push(event_to("b@example.com"));

    let cancel = CancellationToken::new();
    let task = {
        let consumer = consumer.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { consumer.start(cancel).await })
    };

    wait_until("three attempts", || sender.attempts() == 3).await;
    let committed = broker.clone();
    wait_until("two commits", || committed.commits().len() == 2).await;

    cancel.cancel();
    let outcome = task.await.unwrap();
    assert!(matches!(outcome, Err(MessagingError::Cancelled)));
    consumer.close().await.unwrap();

    let offsets: Vec<i64> = broker.commits().iter().map(|p| p.offset).collect();
    assert_eq!(offsets, [0, 2]);
}

#[tokio::test]
async fn test_sequential_process_message_returns_updated_event() {
    let sender = Arc::new(RecordingSender::failing_for("bounce@example.com"));
    let broker = InMemoryBroker::new(TOPIC_EMAIL_QUEUE);
    let consumer = SequentialConsumer::new(Arc::new(broker.reader()), sender);

    broker.push(event_to("a@example.com"));
    let record = broker.messages().remove(0);

    let event = consumer
        .process_message(&record, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(event.message.status, EmailStatus::Sent);
    assert_eq!(event.message.to, "a@example.com");
}
