use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::mailbox::MailboxSender;
use crate::registry::Registry;
use crate::worker::Worker;

/// Stable, process-unique actor identity.
///
/// The registry keys every table by `ActorId`; nothing in the runtime ever
/// addresses an actor by memory location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActorId(u64);

impl ActorId {
	/// Mints the next process-unique identity.
	pub(crate) fn next() -> Self {
		static NEXT: AtomicU64 = AtomicU64::new(0);
		Self(NEXT.fetch_add(1, Ordering::AcqRel).wrapping_add(1))
	}
}

impl fmt::Display for ActorId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "actor-{}", self.0)
	}
}

/// Outcome carried through termination, cascades, and observer notifications.
///
/// Cascades propagate the dead actor's signal verbatim to linked actors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
	/// Clean stop.
	Normal,
	/// Deadline or request-timeout driven stop.
	Timeout,
	/// Forced termination.
	Killed,
	/// The actor's message handler failed.
	Error(String),
}

/// Continuation directive from one message handling step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorFlow {
	/// Keep processing messages.
	Continue,
	/// Stop this actor with `Signal::Normal`.
	Stop,
}

pub(crate) type MessageHandler<M> = Box<dyn FnMut(M) -> Result<ActorFlow, String> + Send>;
pub(crate) type TerminateHook = Box<dyn FnOnce(Signal) + Send>;
pub(crate) type PeerExitHook = Box<dyn FnMut(ActorId, Signal) + Send>;
pub(crate) type DeadlineHook = Box<dyn FnOnce() + Send>;

/// Builder handed to [`crate::Runtime::spawn`] closures.
///
/// Every hook is optional; each may be installed at most once, before the
/// actor starts running.
pub struct ActorBuilder<M> {
	pub(crate) name: Option<String>,
	pub(crate) handler: Option<MessageHandler<M>>,
	pub(crate) on_terminate: Option<TerminateHook>,
	pub(crate) on_peer_exit: Option<PeerExitHook>,
	pub(crate) deadline: Option<(Duration, DeadlineHook)>,
}

impl<M> ActorBuilder<M> {
	pub(crate) fn new() -> Self {
		Self {
			name: None,
			handler: None,
			on_terminate: None,
			on_peer_exit: None,
			deadline: None,
		}
	}

	/// Sets a diagnostic name used in tracing events.
	pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
		self.name = Some(name.into());
		self
	}

	/// Installs the message handler.
	///
	/// The handler runs on the actor's worker, one message at a time; state it
	/// captures needs no locking.
	pub fn on_message(&mut self, handler: impl FnMut(M) -> Result<ActorFlow, String> + Send + 'static) -> &mut Self {
		self.handler = Some(Box::new(handler));
		self
	}

	/// Installs a hook invoked exactly once, on the actor's worker, when
	/// termination finalizes.
	pub fn on_terminate(&mut self, hook: impl FnOnce(Signal) + Send + 'static) -> &mut Self {
		self.on_terminate = Some(Box::new(hook));
		self
	}

	/// Installs the observer-side callback for link and monitor deaths.
	///
	/// Called with the dead peer's identity and signal, on this actor's
	/// worker, once per observed death.
	pub fn on_peer_exit(&mut self, hook: impl FnMut(ActorId, Signal) + Send + 'static) -> &mut Self {
		self.on_peer_exit = Some(Box::new(hook));
		self
	}

	/// Schedules a one-shot callback `delay` after registration.
	///
	/// Fires only if the actor is still alive at that point. The callback does
	/// not itself terminate the actor; termination-on-timeout is an explicit
	/// composition (see [`crate::ActorHandle::terminate`]).
	pub fn after(&mut self, delay: Duration, callback: impl FnOnce() + Send + 'static) -> &mut Self {
		self.deadline = Some((delay, Box::new(callback)));
		self
	}
}

/// Registry-owned control block for one actor, shared type-erased across the
/// handle, the worker loop, and the dependency graph.
pub(crate) struct ActorCell {
	id: ActorId,
	name: Option<String>,
	alive: AtomicBool,
	worker: Mutex<Option<Worker>>,
	on_terminate: Mutex<Option<TerminateHook>>,
	on_peer_exit: Mutex<Option<PeerExitHook>>,
	close_mailbox: Box<dyn Fn() + Send + Sync>,
}

impl ActorCell {
	pub(crate) fn new(
		name: Option<String>,
		on_terminate: Option<TerminateHook>,
		on_peer_exit: Option<PeerExitHook>,
		close_mailbox: Box<dyn Fn() + Send + Sync>,
	) -> Self {
		Self {
			id: ActorId::next(),
			name,
			alive: AtomicBool::new(true),
			worker: Mutex::new(None),
			on_terminate: Mutex::new(on_terminate),
			on_peer_exit: Mutex::new(on_peer_exit),
			close_mailbox,
		}
	}

	pub(crate) fn id(&self) -> ActorId {
		self.id
	}

	pub(crate) fn name(&self) -> &str {
		self.name.as_deref().unwrap_or("anonymous")
	}

	pub(crate) fn is_alive(&self) -> bool {
		self.alive.load(Ordering::Acquire)
	}

	/// Irreversibly marks the actor dead and closes its mailbox.
	///
	/// Returns `true` for the caller that performed the flip.
	pub(crate) fn mark_dead(&self) -> bool {
		let flipped = self.alive.swap(false, Ordering::AcqRel);
		(self.close_mailbox)();
		flipped
	}

	pub(crate) fn worker(&self) -> Option<Worker> {
		self.worker.lock().clone()
	}

	pub(crate) fn set_worker(&self, worker: Worker) {
		*self.worker.lock() = Some(worker);
	}

	pub(crate) fn take_worker(&self) -> Option<Worker> {
		self.worker.lock().take()
	}

	pub(crate) fn take_on_terminate(&self) -> Option<TerminateHook> {
		self.on_terminate.lock().take()
	}

	/// Runs the observer-side notification callback, if installed.
	///
	/// Only ever invoked from tasks on this actor's worker, so the lock is
	/// uncontended.
	pub(crate) fn notify_peer_exit(&self, peer: ActorId, signal: Signal) {
		if let Some(hook) = self.on_peer_exit.lock().as_mut() {
			hook(peer, signal);
		}
	}
}

/// Cloneable handle to a spawned actor.
pub struct ActorHandle<M> {
	pub(crate) cell: Arc<ActorCell>,
	pub(crate) tx: MailboxSender<M>,
	pub(crate) registry: Weak<Registry>,
}

impl<M> Clone for ActorHandle<M> {
	fn clone(&self) -> Self {
		Self {
			cell: Arc::clone(&self.cell),
			tx: self.tx.clone(),
			registry: Weak::clone(&self.registry),
		}
	}
}

impl<M> ActorHandle<M>
where
	M: Send + 'static,
{
	/// Returns the actor's identity.
	pub fn id(&self) -> ActorId {
		self.cell.id()
	}

	/// Returns `true` until termination finalizes.
	pub fn is_alive(&self) -> bool {
		self.cell.is_alive()
	}

	/// Enqueues one message.
	///
	/// A silent no-op once the actor has terminated; nothing is ever evaluated
	/// after termination.
	pub fn send(&self, message: M) {
		if !self.cell.is_alive() {
			tracing::trace!(actor = %self.cell.id(), "actor.send.dropped");
			return;
		}
		let _ = self.tx.push(message);
	}

	/// Terminates the actor with `signal`.
	///
	/// Idempotent; the first caller wins and later calls observe no effect.
	pub fn terminate(&self, signal: Signal) {
		let Some(registry) = self.registry.upgrade() else {
			return;
		};
		registry.terminate(self.cell.id(), signal);
	}

	/// Terminates the actor with `Signal::Normal`.
	pub fn stop(&self) {
		self.terminate(Signal::Normal);
	}

	/// Schedules a one-shot callback on the actor's worker, `delay` from now.
	///
	/// Fires only if the actor is still alive at that point.
	pub fn after(&self, delay: Duration, callback: impl FnOnce() + Send + 'static) {
		let Some(worker) = self.cell.worker() else {
			return;
		};
		worker.schedule_once(Arc::clone(&self.cell), delay, Box::new(callback));
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashSet;

	use super::*;

	#[test]
	fn ids_are_unique_across_threads() {
		let mut handles = Vec::new();
		for _ in 0..8 {
			handles.push(std::thread::spawn(|| (0..100).map(|_| ActorId::next()).collect::<Vec<_>>()));
		}

		let mut seen = HashSet::new();
		for handle in handles {
			for id in handle.join().unwrap() {
				assert!(seen.insert(id), "duplicate id {id}");
			}
		}
	}

	#[test]
	fn mark_dead_is_one_shot() {
		let cell = ActorCell::new(None, None, None, Box::new(|| {}));
		assert!(cell.is_alive());
		assert!(cell.mark_dead(), "first caller flips the flag");
		assert!(!cell.mark_dead(), "second caller observes it already dead");
		assert!(!cell.is_alive());
	}
}
