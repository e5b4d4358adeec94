use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::actor::{ActorCell, ActorFlow, MessageHandler, Signal};
use crate::mailbox::MailboxReceiver;
use crate::registry::Registry;

struct WorkerInner {
	index: usize,
	handle: tokio::runtime::Handle,
	load: AtomicUsize,
	tasks: AtomicUsize,
	idle: Notify,
	cancel: CancellationToken,
	thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

/// One of a fixed pool of execution contexts.
///
/// A worker is a dedicated OS thread driving a current-thread tokio runtime.
/// Every actor assigned here runs its receive loop, deadline callbacks, and
/// termination hooks on this thread, which is what makes handler state
/// single-writer without locks.
#[derive(Clone)]
pub(crate) struct Worker {
	inner: Arc<WorkerInner>,
}

impl Worker {
	fn start(index: usize) -> Self {
		let runtime = tokio::runtime::Builder::new_current_thread()
			.enable_time()
			.build()
			.expect("failed to build worker runtime");
		let inner = Arc::new(WorkerInner {
			index,
			handle: runtime.handle().clone(),
			load: AtomicUsize::new(0),
			tasks: AtomicUsize::new(0),
			idle: Notify::new(),
			cancel: CancellationToken::new(),
			thread: Mutex::new(None),
		});

		let thread_inner = Arc::clone(&inner);
		let thread = std::thread::Builder::new()
			.name(format!("courier-worker-{index}"))
			.spawn(move || {
				runtime.block_on(async move {
					thread_inner.cancel.cancelled().await;
					// Drain in-flight tasks before letting the runtime drop.
					loop {
						let notified = thread_inner.idle.notified();
						if thread_inner.tasks.load(Ordering::Acquire) == 0 {
							break;
						}
						notified.await;
					}
				});
			})
			.expect("failed to spawn worker thread");
		*inner.thread.lock() = Some(thread);

		Self { inner }
	}

	pub(crate) fn index(&self) -> usize {
		self.inner.index
	}

	/// Number of actors currently assigned to this worker.
	pub(crate) fn load(&self) -> usize {
		self.inner.load.load(Ordering::Acquire)
	}

	pub(crate) fn add_load(&self) {
		self.inner.load.fetch_add(1, Ordering::AcqRel);
	}

	/// Spawns a task on this worker, tracked for shutdown draining.
	pub(crate) fn run_task<F>(&self, fut: F)
	where
		F: Future<Output = ()> + Send + 'static,
	{
		if self.inner.cancel.is_cancelled() {
			return;
		}
		self.inner.tasks.fetch_add(1, Ordering::AcqRel);
		let inner = Arc::clone(&self.inner);
		self.inner.handle.spawn(async move {
			fut.await;
			if inner.tasks.fetch_sub(1, Ordering::AcqRel) == 1 {
				inner.idle.notify_waiters();
			}
		});
	}

	/// Binds an assigned actor's receive loop to this worker.
	///
	/// The loop runs to completion here; a panicking handler is contained to
	/// its own task and converted into an error termination for that actor
	/// alone. Completion reports back through the load counter the registry
	/// balances on.
	pub(crate) fn assign<M>(&self, cell: Arc<ActorCell>, rx: MailboxReceiver<M>, handler: Option<MessageHandler<M>>, registry: Weak<Registry>)
	where
		M: Send + 'static,
	{
		tracing::trace!(actor = %cell.id(), name = cell.name(), worker = self.inner.index, "actor.assign");
		if self.inner.cancel.is_cancelled() {
			return;
		}
		let loop_task = self.inner.handle.spawn(run_actor(Arc::clone(&cell), rx, handler, Weak::clone(&registry)));
		let worker = self.clone();
		self.run_task(async move {
			if let Err(err) = loop_task.await
				&& let Some(message) = join_error_panic_message(err)
				&& let Some(registry) = registry.upgrade()
			{
				registry.terminate(cell.id(), Signal::Error(message));
			}
			worker.inner.load.fetch_sub(1, Ordering::AcqRel);
		});
	}

	/// Runs `callback` on this worker after `delay`, iff the actor is still
	/// alive at fire time.
	pub(crate) fn schedule_once(&self, cell: Arc<ActorCell>, delay: Duration, callback: Box<dyn FnOnce() + Send>) {
		self.run_task(async move {
			tokio::time::sleep(delay).await;
			if cell.is_alive() {
				callback();
			}
		});
	}

	fn cancel(&self) {
		self.inner.cancel.cancel();
	}

	fn join(&self) {
		let handle = self.inner.thread.lock().take();
		if let Some(handle) = handle {
			let _ = handle.join();
		}
	}
}

/// Receive loop for one actor: blocking dequeue, evaluate, repeat.
///
/// Exactly one of these ever runs for a given actor, so the handler's captured
/// state has a single writer. A handler error terminates only this actor.
async fn run_actor<M>(cell: Arc<ActorCell>, rx: MailboxReceiver<M>, mut handler: Option<MessageHandler<M>>, registry: Weak<Registry>)
where
	M: Send + 'static,
{
	while cell.is_alive() {
		let Some(message) = rx.recv().await else {
			break;
		};
		// Messages left in the queue when termination finalized elsewhere are
		// drained but never evaluated.
		if !cell.is_alive() {
			break;
		}
		let Some(handler) = handler.as_mut() else {
			continue;
		};
		match handler(message) {
			Ok(ActorFlow::Continue) => {}
			Ok(ActorFlow::Stop) => {
				if let Some(registry) = registry.upgrade() {
					registry.terminate(cell.id(), Signal::Normal);
				}
				break;
			}
			Err(cause) => {
				if let Some(registry) = registry.upgrade() {
					registry.terminate(cell.id(), Signal::Error(cause));
				}
				break;
			}
		}
	}
}

/// Extracts a panic payload message from a [`JoinError`], if it was a panic.
fn join_error_panic_message(err: JoinError) -> Option<String> {
	if !err.is_panic() {
		return None;
	}
	let payload = err.into_panic();
	if let Some(message) = payload.downcast_ref::<&'static str>() {
		return Some((*message).to_string());
	}
	if let Some(message) = payload.downcast_ref::<String>() {
		return Some(message.clone());
	}
	Some("message handler panicked".to_string())
}

/// Fixed-size pool of homogeneous workers.
pub(crate) struct WorkerPool {
	workers: Vec<Worker>,
}

impl WorkerPool {
	pub(crate) fn new(count: usize) -> Self {
		let count = count.max(1);
		Self {
			workers: (0..count).map(Worker::start).collect(),
		}
	}

	pub(crate) fn len(&self) -> usize {
		self.workers.len()
	}

	/// Returns the worker with the fewest assigned actors.
	///
	/// Ties break deterministically to the lowest worker index.
	pub(crate) fn least_loaded(&self) -> Worker {
		self.workers
			.iter()
			.min_by_key(|worker| (worker.load(), worker.index()))
			.expect("worker pool is never empty")
			.clone()
	}

	#[cfg(test)]
	pub(crate) fn loads(&self) -> Vec<usize> {
		self.workers.iter().map(Worker::load).collect()
	}

	pub(crate) fn cancel(&self) {
		for worker in &self.workers {
			worker.cancel();
		}
	}

	pub(crate) fn join(&self) {
		for worker in &self.workers {
			worker.join();
		}
	}
}
