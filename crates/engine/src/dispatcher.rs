//! Paced dispatcher: the single consumer of the [`DispatchQueue`].
//!
//! Messages are sent strictly one at a time. After each attempt, if more
//! messages are waiting, the drain loop sleeps for the configured delay before
//! taking the next one, so the messaging account never sends in bursts.
//!
//! At most one drain loop runs at a time. Ownership of the loop is an atomic
//! flag claimed with compare-and-swap by whichever enqueue finds it clear.
//! The message being sent still counts toward reported queue positions.
//! Failed sends (not ready, or rejected by the transport) are logged and the
//! message is dropped; nothing is re-queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;

use courier_common::error::DeliveryError;
use courier_common::types::{EnqueueReceipt, QueuedMessage};

use crate::queue::DispatchQueue;
use crate::session::SessionController;

pub struct Dispatcher {
    queue: DispatchQueue,
    session: Arc<SessionController>,
    delay: Duration,
    draining: AtomicBool,
}

impl Dispatcher {
    pub fn new(session: Arc<SessionController>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            queue: DispatchQueue::new(),
            session,
            delay,
            draining: AtomicBool::new(false),
        })
    }

    /// Queue a notification and start a drain loop if none is running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn enqueue_and_maybe_start(self: &Arc<Self>, message: QueuedMessage) -> EnqueueReceipt {
        let order_id = message.order_id.clone();
        let receipt = self.queue.enqueue(message);

        tracing::info!(
            order_id = %order_id,
            position = receipt.position,
            queue_len = receipt.queue_len,
            "Notification queued"
        );

        if self.try_claim() {
            tokio::spawn(Arc::clone(self).drain());
        }

        receipt
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Whether a drain loop is currently active.
    pub fn is_processing(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn session(&self) -> &Arc<SessionController> {
        &self.session
    }

    fn try_claim(&self) -> bool {
        self.draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    async fn drain(self: Arc<Self>) {
        tracing::info!(queue_len = self.queue.len(), "Processing dispatch queue");

        loop {
            let Some(message) = self.queue.take_next() else {
                self.draining.store(false, Ordering::SeqCst);
                // An enqueue that landed between the empty read and the release
                // saw the flag still set and did not start a loop.
                if self.queue.is_empty() || !self.try_claim() {
                    break;
                }
                continue;
            };

            self.deliver(&message).await;
            self.queue.finish();

            let remaining = self.queue.len();
            if remaining > 0 {
                tracing::info!(
                    remaining,
                    delay_secs = self.delay.as_secs(),
                    "Waiting before next message"
                );
                tokio::time::sleep(self.delay).await;
            }
        }

        tracing::info!("Dispatch queue empty");
    }

    /// One attempt; failures are logged and the message is dropped.
    async fn deliver(&self, message: &QueuedMessage) {
        let waited_secs = (Utc::now() - message.enqueued_at).num_seconds();

        match self.session.send(&message.phone, &message.body).await {
            Ok(()) => tracing::info!(
                order_id = %message.order_id,
                phone = %message.phone,
                waited_secs,
                "Notification sent"
            ),
            Err(e @ DeliveryError::NotReady { .. }) => tracing::warn!(
                order_id = %message.order_id,
                error = %e,
                "Notification dropped, session not ready"
            ),
            Err(e @ DeliveryError::DeliveryFailed(_)) => tracing::error!(
                order_id = %message.order_id,
                phone = %message.phone,
                error = %e,
                "Notification delivery failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_common::types::{SessionEvent, SessionState};
    use courier_notifier::MemoryTransport;
    use tokio::time::Instant;

    const DELAY: Duration = Duration::from_secs(120);

    fn ready_dispatcher(transport: Arc<MemoryTransport>) -> Arc<Dispatcher> {
        ready_dispatcher_with_delay(transport, DELAY)
    }

    fn ready_dispatcher_with_delay(transport: Arc<MemoryTransport>, delay: Duration) -> Arc<Dispatcher> {
        let session = SessionController::new(transport);
        session.apply(SessionEvent::Ready);
        Dispatcher::new(session, delay)
    }

    fn message(n: usize) -> QueuedMessage {
        QueuedMessage::new(
            format!("23760000000{n}@c.us"),
            format!("message {n}"),
            format!("CMD-{n}"),
        )
    }

    async fn wait_idle(dispatcher: &Dispatcher) {
        while dispatcher.is_processing() {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Wall-clock variant for multi-threaded tests.
    async fn wait_delivered(dispatcher: &Dispatcher, transport: &MemoryTransport, expected: usize) {
        tokio::time::timeout(Duration::from_secs(30), async {
            while transport.attempts() < expected || dispatcher.is_processing() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("dispatcher did not drain in time");
    }

    fn assert_paced(transport: &MemoryTransport) {
        assert_paced_by(transport, DELAY);
    }

    fn assert_paced_by(transport: &MemoryTransport, delay: Duration) {
        let sent = transport.sent();
        for pair in sent.windows(2) {
            let gap = pair[1].sent_at - pair[0].sent_at;
            assert!(gap >= delay, "sends only {gap:?} apart");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_enqueue_positions() {
        let transport = Arc::new(MemoryTransport::new());
        let dispatcher = ready_dispatcher(transport.clone());

        let first = dispatcher.enqueue_and_maybe_start(message(1));
        let second = dispatcher.enqueue_and_maybe_start(message(2));

        assert_eq!(first.position, 1);
        assert_eq!(second.position, 2);
        assert!(dispatcher.is_processing());

        wait_idle(&dispatcher).await;
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_is_fifo_and_paced() {
        let transport = Arc::new(MemoryTransport::new());
        let dispatcher = ready_dispatcher(transport.clone());

        let started = Instant::now();
        for n in 1..=4 {
            dispatcher.enqueue_and_maybe_start(message(n));
        }
        wait_idle(&dispatcher).await;

        let sent = transport.sent();
        let bodies: Vec<&str> = sent.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, ["message 1", "message 2", "message 3", "message 4"]);
        assert_paced(&transport);
        assert!(started.elapsed() >= DELAY * 3);
        assert_eq!(dispatcher.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_message_does_not_wait() {
        let transport = Arc::new(MemoryTransport::new());
        let dispatcher = ready_dispatcher(transport.clone());

        let started = Instant::now();
        dispatcher.enqueue_and_maybe_start(message(1));
        wait_idle(&dispatcher).await;

        assert_eq!(transport.sent().len(), 1);
        assert!(started.elapsed() < DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_during_delay_joins_active_loop() {
        let transport = Arc::new(MemoryTransport::new());
        let dispatcher = ready_dispatcher(transport.clone());

        dispatcher.enqueue_and_maybe_start(message(1));
        dispatcher.enqueue_and_maybe_start(message(2));

        // First send done, loop now sleeping out the delay.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.sent().len(), 1);

        for n in 3..=5 {
            let receipt = dispatcher.enqueue_and_maybe_start(message(n));
            assert!(dispatcher.is_processing());
            assert_eq!(receipt.queue_len, n - 1);
        }

        wait_idle(&dispatcher).await;
        assert_eq!(transport.sent().len(), 5);
        assert_paced(&transport);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_during_slow_send_never_overlaps() {
        let transport = Arc::new(MemoryTransport::new().with_send_latency(Duration::from_secs(30)));
        let dispatcher = ready_dispatcher(transport.clone());

        dispatcher.enqueue_and_maybe_start(message(1));
        tokio::time::sleep(Duration::from_secs(5)).await;
        // Send of message 1 is still in flight.
        assert_eq!(transport.attempts(), 1);
        let receipt = dispatcher.enqueue_and_maybe_start(message(2));
        assert_eq!(transport.attempts(), 1);
        assert_eq!(receipt.position, 2);
        assert_eq!(receipt.queue_len, 1);

        wait_idle(&dispatcher).await;
        assert_eq!(transport.attempts(), 2);
        assert_eq!(transport.max_concurrent_sends(), 1);
        assert_paced(&transport);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_loop_after_idle() {
        let transport = Arc::new(MemoryTransport::new());
        let dispatcher = ready_dispatcher(transport.clone());

        dispatcher.enqueue_and_maybe_start(message(1));
        wait_idle(&dispatcher).await;
        assert!(!dispatcher.is_processing());

        dispatcher.enqueue_and_maybe_start(message(2));
        wait_idle(&dispatcher).await;
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_send_is_dropped_and_loop_continues() {
        let transport = Arc::new(MemoryTransport::new());
        let dispatcher = ready_dispatcher(transport.clone());
        transport.set_fail_sends(true);

        dispatcher.enqueue_and_maybe_start(message(1));
        dispatcher.enqueue_and_maybe_start(message(2));

        tokio::time::sleep(Duration::from_secs(10)).await;
        transport.set_fail_sends(false);

        wait_idle(&dispatcher).await;
        assert_eq!(transport.attempts(), 2);
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body, "message 2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_mid_drain_drops_remaining() {
        let transport = Arc::new(MemoryTransport::new());
        let dispatcher = ready_dispatcher(transport.clone());

        for n in 1..=4 {
            dispatcher.enqueue_and_maybe_start(message(n));
        }
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(dispatcher.queue_len(), 3);

        let state = dispatcher.session().apply(SessionEvent::Disconnected {
            reason: "phone offline".to_string(),
        });
        assert_eq!(state, SessionState::Disconnected);

        wait_idle(&dispatcher).await;
        assert_eq!(dispatcher.queue_len(), 0);
        // The three remaining attempts failed with NotReady before the transport.
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_ready_session_drops_without_reaching_transport() {
        let transport = Arc::new(MemoryTransport::new());
        let session = SessionController::new(transport.clone());
        let dispatcher = Dispatcher::new(session, DELAY);

        dispatcher.enqueue_and_maybe_start(message(1));
        dispatcher.enqueue_and_maybe_start(message(2));
        wait_idle(&dispatcher).await;

        assert_eq!(dispatcher.queue_len(), 0);
        assert_eq!(transport.attempts(), 0);
    }

    // ------------------------------------------------------------
    // Multi-threaded runtime
    // ------------------------------------------------------------

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_position_counts_message_being_sent() {
        let transport = Arc::new(MemoryTransport::new().with_send_latency(Duration::from_millis(500)));
        let dispatcher = ready_dispatcher_with_delay(transport.clone(), Duration::from_millis(10));

        let first = dispatcher.enqueue_and_maybe_start(message(1));
        // Give the drain task time to take message 1 off the queue.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.attempts(), 1);
        let second = dispatcher.enqueue_and_maybe_start(message(2));

        assert_eq!(first.position, 1);
        assert_eq!(second.position, 2);
        assert_eq!(second.queue_len, 1);

        wait_delivered(&dispatcher, &transport, 2).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_producers_share_one_drain_loop() {
        const PRODUCERS: usize = 8;
        const PER_PRODUCER: usize = 25;

        let transport = Arc::new(MemoryTransport::new().with_send_latency(Duration::from_millis(1)));
        let dispatcher = ready_dispatcher_with_delay(transport.clone(), Duration::from_millis(2));

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    for i in 0..PER_PRODUCER {
                        dispatcher.enqueue_and_maybe_start(QueuedMessage::new(
                            "237600000001@c.us".to_string(),
                            format!("{p}-{i}"),
                            format!("CMD-{p}-{i}"),
                        ));
                        // Let the queue run dry now and then so loops end and restart.
                        if i % 5 == 4 {
                            tokio::time::sleep(Duration::from_millis(15)).await;
                        } else {
                            tokio::task::yield_now().await;
                        }
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.await.unwrap();
        }

        wait_delivered(&dispatcher, &transport, PRODUCERS * PER_PRODUCER).await;

        assert_eq!(transport.max_concurrent_sends(), 1);
        assert_eq!(transport.sent().len(), PRODUCERS * PER_PRODUCER);
        assert_eq!(dispatcher.queue_len(), 0);

        let mut next = [0usize; PRODUCERS];
        for sent in transport.sent() {
            let (p, i) = sent.body.split_once('-').unwrap();
            let (p, i): (usize, usize) = (p.parse().unwrap(), i.parse().unwrap());
            assert_eq!(i, next[p], "producer {p} delivered out of order");
            next[p] += 1;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_burst_is_paced() {
        const BURST: usize = 12;
        let delay = Duration::from_millis(20);

        let transport = Arc::new(MemoryTransport::new().with_send_latency(Duration::from_millis(100)));
        let dispatcher = ready_dispatcher_with_delay(transport.clone(), delay);

        // Keep the loop busy while the burst lands.
        dispatcher.enqueue_and_maybe_start(message(0));
        let producers: Vec<_> = (1..=BURST)
            .map(|n| {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move { dispatcher.enqueue_and_maybe_start(message(n)) })
            })
            .collect();
        for producer in producers {
            producer.await.unwrap();
        }

        wait_delivered(&dispatcher, &transport, BURST + 1).await;

        assert_eq!(transport.max_concurrent_sends(), 1);
        assert_eq!(transport.sent().len(), BURST + 1);
        assert_paced_by(&transport, delay);
    }
}
