use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::actor::{ActorCell, ActorId, Signal};
use crate::worker::{Worker, WorkerPool};

/// How an observer relates to the actor it depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Relationship {
	/// Symmetric: both parties terminate together, and each is notified of
	/// the other's death.
	Link,
	/// Asymmetric: the observer is notified only.
	Monitor,
}

impl Relationship {
	const fn auto_terminates(self) -> bool {
		matches!(self, Self::Link)
	}

	const fn notifies_observer(self) -> bool {
		true
	}
}

/// One dependency edge, stored under the dependent's identity.
struct Edge {
	observer: ActorId,
	relationship: Relationship,
}

#[derive(Default)]
struct RegistryState {
	closed: bool,
	live: HashMap<ActorId, Arc<ActorCell>>,
	deps: HashMap<ActorId, Vec<Edge>>,
}

/// Process-wide directory of live actors and their dependency graph.
///
/// The live set and the dependency table are the only structures touched by
/// multiple workers concurrently; every mutation runs under the single table
/// lock, and nothing awaits while it is held. Check-and-remove on the live
/// set is the one synchronization point that arbitrates racing terminations.
#[derive(Default)]
pub(crate) struct Registry {
	state: Mutex<RegistryState>,
}

impl Registry {
	pub(crate) fn new() -> Self {
		Self::default()
	}

	/// Assigns a new actor to the least-loaded worker and records it live.
	///
	/// Returns `None` once the registry has been closed for shutdown.
	pub(crate) fn assign(&self, pool: &WorkerPool, cell: &Arc<ActorCell>) -> Option<Worker> {
		let mut state = self.state.lock();
		if state.closed {
			return None;
		}
		let worker = pool.least_loaded();
		worker.add_load();
		cell.set_worker(worker.clone());
		state.live.insert(cell.id(), Arc::clone(cell));
		Some(worker)
	}

	pub(crate) fn is_alive(&self, id: ActorId) -> bool {
		self.state.lock().live.contains_key(&id)
	}

	pub(crate) fn live_count(&self) -> usize {
		self.state.lock().live.len()
	}

	/// Installs a symmetric link between `a` and `b`.
	pub(crate) fn link(&self, a: ActorId, b: ActorId) {
		if a == b {
			return;
		}
		let mut state = self.state.lock();
		if !state.live.contains_key(&a) || !state.live.contains_key(&b) {
			return;
		}
		add_edge(&mut state, a, b, Relationship::Link);
		add_edge(&mut state, b, a, Relationship::Link);
	}

	/// Removes the link between `a` and `b`, if present.
	pub(crate) fn unlink(&self, a: ActorId, b: ActorId) {
		let mut state = self.state.lock();
		remove_edge(&mut state, a, b, Relationship::Link);
		remove_edge(&mut state, b, a, Relationship::Link);
	}

	/// Installs a monitor of `target` by `observer`.
	pub(crate) fn monitor(&self, observer: ActorId, target: ActorId) {
		if observer == target {
			return;
		}
		let mut state = self.state.lock();
		if !state.live.contains_key(&observer) || !state.live.contains_key(&target) {
			return;
		}
		add_edge(&mut state, observer, target, Relationship::Monitor);
	}

	/// Removes a monitor of `target` by `observer`, if present.
	pub(crate) fn demonitor(&self, observer: ActorId, target: ActorId) {
		let mut state = self.state.lock();
		remove_edge(&mut state, observer, target, Relationship::Monitor);
	}

	/// Terminates `id` with `signal` and resolves its dependency edges.
	///
	/// Idempotent: terminating an actor that is no longer live is a no-op, so
	/// at most one cascade ever executes per actor, even when two link
	/// partners die simultaneously on different workers.
	pub(crate) fn terminate(&self, id: ActorId, signal: Signal) {
		let mut state = self.state.lock();
		let mut visited = HashSet::new();
		cascade(&mut state, id, signal, &mut visited);
	}

	/// Terminates every live actor with `signal`.
	pub(crate) fn terminate_all(&self, signal: Signal) {
		let mut state = self.state.lock();
		while let Some(id) = state.live.keys().next().copied() {
			let mut visited = HashSet::new();
			cascade(&mut state, id, signal.clone(), &mut visited);
		}
	}

	/// Refuses further registrations; used during runtime shutdown.
	pub(crate) fn close(&self) {
		self.state.lock().closed = true;
	}

	#[cfg(test)]
	pub(crate) fn edge_count(&self) -> usize {
		self.state.lock().deps.values().map(Vec::len).sum()
	}
}

fn add_edge(state: &mut RegistryState, observer: ActorId, dependent: ActorId, relationship: Relationship) {
	let edges = state.deps.entry(dependent).or_default();
	if let Some(existing) = edges.iter_mut().find(|edge| edge.observer == observer) {
		// Re-adding the same pair is a no-op; a different relationship
		// updates the edge in place.
		existing.relationship = relationship;
	} else {
		edges.push(Edge { observer, relationship });
	}
}

fn remove_edge(state: &mut RegistryState, observer: ActorId, dependent: ActorId, relationship: Relationship) {
	if let Some(edges) = state.deps.get_mut(&dependent) {
		edges.retain(|edge| !(edge.observer == observer && edge.relationship == relationship));
		if edges.is_empty() {
			state.deps.remove(&dependent);
		}
	}
}

/// The termination cascade.
///
/// `visited` tracks every actor processed within one top-level invocation so
/// a link cycle terminates each member exactly once and never recurses
/// infinitely. Hooks and notifications are handed to the owning workers as
/// tasks; nothing user-visible runs under the table lock.
fn cascade(state: &mut RegistryState, id: ActorId, signal: Signal, visited: &mut HashSet<ActorId>) {
	if !visited.insert(id) {
		return;
	}
	let Some(cell) = state.live.remove(&id) else {
		return;
	};

	cell.mark_dead();
	tracing::debug!(actor = %id, name = cell.name(), signal = ?signal, "actor.exit");

	if let Some(worker) = cell.take_worker()
		&& let Some(hook) = cell.take_on_terminate()
	{
		let hook_signal = signal.clone();
		worker.run_task(async move { hook(hook_signal) });
	}

	let edges = state.deps.remove(&id).unwrap_or_default();
	// Drop the reverse direction: anywhere the dead actor is an observer.
	state.deps.retain(|_, list| {
		list.retain(|edge| edge.observer != id);
		!list.is_empty()
	});

	for edge in edges {
		let Some(observer) = state.live.get(&edge.observer).map(Arc::clone) else {
			continue;
		};
		if edge.relationship.notifies_observer()
			&& let Some(worker) = observer.worker()
		{
			let peer_signal = signal.clone();
			let observer_cell = Arc::clone(&observer);
			worker.run_task(async move { observer_cell.notify_peer_exit(id, peer_signal) });
		}
		if edge.relationship.auto_terminates() {
			cascade(state, edge.observer, signal.clone(), visited);
		}
	}
}
