//! FIFO buffer of pending notifications.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use courier_common::types::{EnqueueReceipt, QueuedMessage};

/// Unbounded, insertion-ordered queue shared between request handlers and the
/// drain loop. Every operation takes the lock briefly and never waits.
///
/// The head taken by [`take_next`](Self::take_next) stays accounted for until
/// [`finish`](Self::finish), so positions reported while it is being sent
/// still count it.
#[derive(Debug, Default)]
pub struct DispatchQueue {
    state: Mutex<QueueState>,
}

#[derive(Debug, Default)]
struct QueueState {
    messages: VecDeque<QueuedMessage>,
    in_flight: bool,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // A panic while holding the lock cannot leave the deque half-modified.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append to the tail.
    pub fn enqueue(&self, message: QueuedMessage) -> EnqueueReceipt {
        let mut state = self.lock();
        state.messages.push_back(message);
        let queue_len = state.messages.len();
        EnqueueReceipt {
            position: queue_len + usize::from(state.in_flight),
            queue_len,
        }
    }

    /// Remove the head, or `None` when empty.
    pub fn dequeue_front(&self) -> Option<QueuedMessage> {
        self.lock().messages.pop_front()
    }

    /// Remove the head and mark it in flight until [`finish`](Self::finish).
    pub fn take_next(&self) -> Option<QueuedMessage> {
        let mut state = self.lock();
        let next = state.messages.pop_front();
        state.in_flight = next.is_some();
        next
    }

    /// The message returned by the last [`take_next`](Self::take_next) is done.
    pub fn finish(&self) {
        self.lock().in_flight = false;
    }

    /// Messages waiting, excluding one in flight.
    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn message(order_id: &str) -> QueuedMessage {
        QueuedMessage::new(
            "237600000001@c.us".to_string(),
            format!("body for {order_id}"),
            order_id.to_string(),
        )
    }

    #[test]
    fn test_enqueue_reports_position_and_length() {
        let queue = DispatchQueue::new();
        assert_eq!(
            queue.enqueue(message("CMD-1")),
            EnqueueReceipt {
                position: 1,
                queue_len: 1
            }
        );
        assert_eq!(queue.enqueue(message("CMD-2")).position, 2);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_fifo_order() {
        let queue = DispatchQueue::new();
        let ids: Vec<String> = (0..50).map(|i| format!("CMD-{i}")).collect();
        for id in &ids {
            queue.enqueue(message(id));
        }

        let drained: Vec<String> = std::iter::from_fn(|| queue.dequeue_front())
            .map(|m| m.order_id)
            .collect();
        assert_eq!(drained, ids);
    }

    #[test]
    fn test_dequeue_empty_returns_none() {
        let queue = DispatchQueue::new();
        assert!(queue.dequeue_front().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_in_flight_head_counts_toward_position() {
        let queue = DispatchQueue::new();
        queue.enqueue(message("CMD-1"));
        assert_eq!(queue.take_next().unwrap().order_id, "CMD-1");

        let receipt = queue.enqueue(message("CMD-2"));
        assert_eq!(receipt.position, 2);
        assert_eq!(receipt.queue_len, 1);

        queue.finish();
        assert_eq!(queue.enqueue(message("CMD-3")).position, 2);
    }

    #[test]
    fn test_take_next_on_empty_clears_in_flight() {
        let queue = DispatchQueue::new();
        queue.enqueue(message("CMD-1"));
        queue.take_next();
        assert!(queue.take_next().is_none());
        assert_eq!(queue.enqueue(message("CMD-2")).position, 1);
    }

    #[test]
    fn test_duplicate_order_ids_are_kept() {
        let queue = DispatchQueue::new();
        queue.enqueue(message("CMD-1"));
        queue.enqueue(message("CMD-1"));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_concurrent_enqueue_keeps_per_producer_order() {
        let queue = Arc::new(DispatchQueue::new());
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        queue.enqueue(message(&format!("{p}-{i}")));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        assert_eq!(queue.len(), 400);

        let mut next = [0usize; 4];
        while let Some(msg) = queue.dequeue_front() {
            let (p, i) = msg.order_id.split_once('-').unwrap();
            let (p, i): (usize, usize) = (p.parse().unwrap(), i.parse().unwrap());
            assert_eq!(i, next[p]);
            next[p] += 1;
        }
    }
}
