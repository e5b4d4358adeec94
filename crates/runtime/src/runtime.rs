use std::sync::{Arc, Weak};

use crate::actor::{ActorBuilder, ActorCell, ActorHandle, ActorId, Signal};
use crate::mailbox::Mailbox;
use crate::registry::Registry;
use crate::worker::WorkerPool;

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
	workers: usize,
}

impl RuntimeConfig {
	/// Creates the default configuration.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the worker pool size.
	///
	/// # Panics
	///
	/// Panics if `count` is zero.
	#[must_use]
	pub fn workers(mut self, count: usize) -> Self {
		assert!(count > 0, "worker count must be > 0");
		self.workers = count;
		self
	}
}

impl Default for RuntimeConfig {
	fn default() -> Self {
		Self {
			workers: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(2),
		}
	}
}

struct RuntimeInner {
	pool: WorkerPool,
	registry: Arc<Registry>,
}

impl Drop for RuntimeInner {
	fn drop(&mut self) {
		self.registry.close();
		self.registry.terminate_all(Signal::Killed);
		self.pool.cancel();
	}
}

/// Unified entrypoint: owns the worker pool and the actor registry.
///
/// Cheap to clone; all clones share the same pool and registry. Only the
/// registry owns actor lifetimes — handles and loops hold non-owning
/// references back into it.
#[derive(Clone)]
pub struct Runtime {
	inner: Arc<RuntimeInner>,
}

impl Default for Runtime {
	fn default() -> Self {
		Self::new()
	}
}

impl Runtime {
	/// Creates a runtime with the default configuration.
	pub fn new() -> Self {
		Self::with_config(RuntimeConfig::default())
	}

	/// Creates a runtime with an explicit configuration.
	pub fn with_config(config: RuntimeConfig) -> Self {
		Self {
			inner: Arc::new(RuntimeInner {
				pool: WorkerPool::new(config.workers),
				registry: Arc::new(Registry::new()),
			}),
		}
	}

	/// Spawns one actor.
	///
	/// The `build` closure installs the message handler and lifecycle hooks;
	/// the actor is then registered on the least-loaded worker and evaluates
	/// messages asynchronously. Returns immediately.
	pub fn spawn<M>(&self, build: impl FnOnce(&mut ActorBuilder<M>)) -> ActorHandle<M>
	where
		M: Send + 'static,
	{
		let mut builder = ActorBuilder::new();
		build(&mut builder);

		let mailbox = Mailbox::new();
		let tx = mailbox.sender();
		let rx = mailbox.receiver();
		let close_tx = mailbox.sender();
		let cell = Arc::new(ActorCell::new(
			builder.name.take(),
			builder.on_terminate.take(),
			builder.on_peer_exit.take(),
			Box::new(move || close_tx.close()),
		));

		let registry = Arc::downgrade(&self.inner.registry);
		let handle = ActorHandle {
			cell: Arc::clone(&cell),
			tx,
			registry: Weak::clone(&registry),
		};

		let Some(worker) = self.inner.registry.assign(&self.inner.pool, &cell) else {
			// Shutting down; the actor never runs.
			cell.mark_dead();
			return handle;
		};
		worker.assign(Arc::clone(&cell), rx, builder.handler.take(), registry);
		if let Some((delay, callback)) = builder.deadline.take() {
			worker.schedule_once(Arc::clone(&cell), delay, callback);
		}
		handle
	}

	/// Links `a` and `b`: either side's death terminates the other, carrying
	/// the dead side's signal. Commutative and idempotent.
	pub fn link(&self, a: ActorId, b: ActorId) {
		self.inner.registry.link(a, b);
	}

	/// Removes the link between `a` and `b`.
	pub fn unlink(&self, a: ActorId, b: ActorId) {
		self.inner.registry.unlink(a, b);
	}

	/// Monitors `target` from `observer`: the observer is notified of the
	/// target's death but does not terminate. Idempotent.
	pub fn monitor(&self, observer: ActorId, target: ActorId) {
		self.inner.registry.monitor(observer, target);
	}

	/// Removes a monitor of `target` by `observer`.
	pub fn demonitor(&self, observer: ActorId, target: ActorId) {
		self.inner.registry.demonitor(observer, target);
	}

	/// Returns whether `id` is still registered live.
	pub fn is_alive(&self, id: ActorId) -> bool {
		self.inner.registry.is_alive(id)
	}

	/// Number of live actors.
	pub fn live_count(&self) -> usize {
		self.inner.registry.live_count()
	}

	/// Worker pool size.
	pub fn worker_count(&self) -> usize {
		self.inner.pool.len()
	}

	/// Terminates every live actor with `Signal::Killed`, drains worker
	/// tasks, and joins the worker threads.
	///
	/// Dropping the last runtime clone performs the same teardown without
	/// joining, so `shutdown` must not be called from a worker context.
	pub fn shutdown(&self) {
		self.inner.registry.close();
		self.inner.registry.terminate_all(Signal::Killed);
		self.inner.pool.cancel();
		self.inner.pool.join();
	}

	pub(crate) fn registry(&self) -> &Arc<Registry> {
		&self.inner.registry
	}

	#[cfg(test)]
	pub(crate) fn worker_loads(&self) -> Vec<usize> {
		self.inner.pool.loads()
	}
}
