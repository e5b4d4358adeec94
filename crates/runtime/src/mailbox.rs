use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;

/// Mailbox send error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MailboxSendError {
	/// Mailbox is closed; the message was dropped.
	#[error("mailbox closed")]
	Closed,
}

struct MailboxState<M> {
	queue: VecDeque<M>,
	closed: bool,
}

struct MailboxInner<M> {
	state: Mutex<MailboxState<M>>,
	notify: Notify,
}

/// Multi-producer mailbox sender. Enqueueing never blocks.
pub struct MailboxSender<M> {
	inner: Arc<MailboxInner<M>>,
}

/// Single-consumer mailbox receiver, owned by the actor's receive loop.
pub struct MailboxReceiver<M> {
	inner: Arc<MailboxInner<M>>,
}

/// Unbounded FIFO message queue bound to exactly one actor.
pub struct Mailbox<M> {
	inner: Arc<MailboxInner<M>>,
}

impl<M> Clone for MailboxSender<M> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<M> Default for Mailbox<M> {
	fn default() -> Self {
		Self::new()
	}
}

impl<M> Mailbox<M> {
	/// Creates an empty mailbox.
	pub fn new() -> Self {
		Self {
			inner: Arc::new(MailboxInner {
				state: Mutex::new(MailboxState {
					queue: VecDeque::new(),
					closed: false,
				}),
				notify: Notify::new(),
			}),
		}
	}

	/// Returns a sender handle.
	pub fn sender(&self) -> MailboxSender<M> {
		MailboxSender {
			inner: Arc::clone(&self.inner),
		}
	}

	/// Returns the receiver handle.
	pub fn receiver(&self) -> MailboxReceiver<M> {
		MailboxReceiver {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<M> MailboxSender<M> {
	/// Enqueues one message. Never blocks; fails only once the mailbox is closed.
	pub fn push(&self, message: M) -> Result<(), MailboxSendError> {
		let mut state = self.inner.state.lock();
		if state.closed {
			return Err(MailboxSendError::Closed);
		}
		state.queue.push_back(message);
		drop(state);
		self.inner.notify.notify_one();
		Ok(())
	}

	/// Closes the mailbox. The receiver drains remaining items then gets `None`.
	pub fn close(&self) {
		let mut state = self.inner.state.lock();
		state.closed = true;
		drop(state);
		self.inner.notify.notify_waiters();
	}

	/// Returns current queue depth.
	pub fn len(&self) -> usize {
		self.inner.state.lock().queue.len()
	}

	/// Returns `true` when no messages are queued.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl<M> MailboxReceiver<M> {
	/// Receives one message, waiting while the queue is empty.
	///
	/// Returns `None` once the mailbox is closed and drained. The wait is a
	/// genuine blocking wait, never a spin.
	pub async fn recv(&self) -> Option<M> {
		loop {
			// Register the notification future *before* checking the queue
			// to avoid lost-wakeup between the lock drop and the await.
			let notified = self.inner.notify.notified();
			{
				let mut state = self.inner.state.lock();
				if let Some(message) = state.queue.pop_front() {
					return Some(message);
				}
				if state.closed {
					return None;
				}
			}
			notified.await;
		}
	}

	/// Returns current queue depth.
	pub fn len(&self) -> usize {
		self.inner.state.lock().queue.len()
	}

	/// Returns `true` when no messages are queued.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;

	#[tokio::test]
	async fn fifo_order_preserved() {
		let mailbox = Mailbox::new();
		let tx = mailbox.sender();
		let rx = mailbox.receiver();

		for i in 0..5u32 {
			tx.push(i).unwrap();
		}

		for i in 0..5u32 {
			assert_eq!(rx.recv().await, Some(i));
		}
	}

	#[tokio::test]
	async fn recv_blocks_until_push() {
		let mailbox = Mailbox::new();
		let tx = mailbox.sender();
		let rx = mailbox.receiver();

		// recv on empty should block, not return None.
		let blocked = tokio::time::timeout(Duration::from_millis(20), rx.recv()).await;
		assert!(blocked.is_err(), "recv on empty should block");

		tx.push(42u32).unwrap();
		assert_eq!(rx.recv().await, Some(42));
	}

	#[tokio::test]
	async fn recv_drains_then_returns_none_after_close() {
		let mailbox = Mailbox::new();
		let tx = mailbox.sender();
		let rx = mailbox.receiver();

		tx.push(10u32).unwrap();
		tx.push(20).unwrap();
		tx.close();

		assert_eq!(rx.recv().await, Some(10));
		assert_eq!(rx.recv().await, Some(20));
		assert_eq!(rx.recv().await, None);
		// Repeated recv after drain still returns None.
		assert_eq!(rx.recv().await, None);
	}

	#[tokio::test]
	async fn push_after_close_returns_closed() {
		let mailbox = Mailbox::new();
		let tx = mailbox.sender();
		tx.close();

		assert_eq!(tx.push(1u32), Err(MailboxSendError::Closed));
	}

	#[tokio::test]
	async fn close_wakes_blocked_receiver() {
		let mailbox: Mailbox<u32> = Mailbox::new();
		let tx = mailbox.sender();
		let rx = mailbox.receiver();

		let recv_task = tokio::spawn(async move { rx.recv().await });
		tokio::time::sleep(Duration::from_millis(10)).await;
		tx.close();

		let got = tokio::time::timeout(Duration::from_millis(100), recv_task)
			.await
			.expect("blocked recv should wake on close")
			.unwrap();
		assert_eq!(got, None);
	}

	#[tokio::test]
	async fn len_tracks_queue_depth() {
		let mailbox = Mailbox::new();
		let tx = mailbox.sender();
		let rx = mailbox.receiver();

		assert_eq!(tx.len(), 0);
		tx.push(1u32).unwrap();
		tx.push(2).unwrap();
		assert_eq!(tx.len(), 2);
		assert_eq!(rx.len(), 2);

		let _ = rx.recv().await;
		assert_eq!(tx.len(), 1);
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn multi_producer_no_loss_or_duplication() {
		const SENDERS: usize = 8;
		const ITEMS_PER_SENDER: usize = 200;
		let total = SENDERS * ITEMS_PER_SENDER;

		let mailbox = Mailbox::new();
		let rx = mailbox.receiver();

		// Producers push from plain OS threads; push is synchronous.
		let mut handles = Vec::new();
		for sender_id in 0..SENDERS {
			let tx = mailbox.sender();
			handles.push(std::thread::spawn(move || {
				for seq in 0..ITEMS_PER_SENDER {
					tx.push((sender_id * ITEMS_PER_SENDER + seq) as u32).unwrap();
				}
			}));
		}
		for handle in handles {
			handle.join().unwrap();
		}

		let mut received = Vec::with_capacity(total);
		for _ in 0..total {
			received.push(rx.recv().await.expect("mailbox should hold all items"));
		}

		received.sort_unstable();
		let expected: Vec<u32> = (0..total as u32).collect();
		assert_eq!(received, expected, "all items delivered without loss or duplication");
	}

	#[tokio::test]
	async fn per_sender_order_survives_interleaving() {
		let mailbox = Mailbox::new();
		let rx = mailbox.receiver();

		let tx_a = mailbox.sender();
		let tx_b = mailbox.sender();
		let a = std::thread::spawn(move || {
			for i in 0..100u32 {
				tx_a.push((0, i)).unwrap();
			}
		});
		let b = std::thread::spawn(move || {
			for i in 0..100u32 {
				tx_b.push((1, i)).unwrap();
			}
		});
		a.join().unwrap();
		b.join().unwrap();

		let mut last = [None::<u32>, None];
		for _ in 0..200 {
			let (sender, seq) = rx.recv().await.unwrap();
			if let Some(prev) = last[sender] {
				assert!(seq > prev, "sender {sender} out of order: {seq} after {prev}");
			}
			last[sender] = Some(seq);
		}
	}
}
