use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::actor::{ActorFlow, ActorHandle, ActorId, Signal};
use crate::runtime::Runtime;

/// Error surface of the request/response layer.
///
/// Callers receive timeouts and terminate-errors as ordinary failure results;
/// nothing crosses the server boundary as a panic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServerError {
	/// The caller's wait deadline elapsed before a reply settled.
	#[error("request timed out")]
	Timeout,
	/// `initialize` chose not to start the server.
	#[error("server start ignored")]
	Ignored,
	/// `initialize` failed the startup.
	#[error("server rejected startup: {0}")]
	Rejected(String),
	/// The server terminated, or was not running when called.
	#[error("server terminated: {0}")]
	Terminated(String),
}

/// Startup decision returned by [`ServerContext::initialize`].
pub enum Init {
	/// Start the server. `idle_timeout`, when set, terminates the server with
	/// `Signal::Timeout` once it elapses.
	Ready { idle_timeout: Option<Duration> },
	/// Fail startup with an error cause.
	Stop(String),
	/// Decline to start without an error cause.
	Ignore,
}

/// User-supplied server logic.
///
/// All operations funnel through one internal actor's mailbox, so `&mut self`
/// here is only ever touched by one logical thread at a time; implementations
/// need no internal locking.
pub trait ServerContext: Send + Sized + 'static {
	type Config;
	type Request: Send + 'static;
	type Response: Send + 'static;

	/// Decides whether the server starts.
	fn initialize(&mut self, config: Self::Config) -> Init;

	/// Handles one blocking request. The outcome is communicated only through
	/// `receiver`.
	fn on_call(&mut self, server: &Server<Self>, client: Option<ActorId>, request: Self::Request, receiver: &ResponseReceiver<Self::Response>);

	/// Handles one fire-and-forget request.
	fn on_cast(&mut self, server: &Server<Self>, client: Option<ActorId>, request: Self::Request, receiver: &ResponseReceiver<Self::Response>);

	/// Invoked exactly once when the server terminates. `error` is `None` for
	/// a clean stop.
	fn on_terminate(&mut self, _server: &Server<Self>, _error: Option<ServerError>) {}
}

/// Internal operation envelope carried by the server's actor.
enum Operation<C>
where
	C: ServerContext,
{
	Call {
		client: Option<ActorId>,
		request: C::Request,
		receiver: ResponseReceiver<C::Response>,
	},
	Cast {
		client: Option<ActorId>,
		request: C::Request,
		receiver: ResponseReceiver<C::Response>,
	},
}

/// Single atomically-settled outcome slot for one pending call.
///
/// Whichever of reply, terminate, or the caller's deadline settles first
/// wins; the others become no-ops. The caller's wait is a genuine blocking
/// wait on the notify, never a poll.
enum ReceiverState<R> {
	Waiting { deadline: Instant },
	/// Cast envelope: no caller is waiting.
	Detached,
	Settled(Result<Option<R>, ServerError>),
	Taken,
}

struct ReceiverShared<R> {
	state: Mutex<ReceiverState<R>>,
	notify: Notify,
}

struct ServerShared {
	stop_error: Mutex<Option<ServerError>>,
	stop: OnceLock<Box<dyn Fn() + Send + Sync>>,
}

/// Completion handle a handler uses to answer, defer, or fail one request.
pub struct ResponseReceiver<R> {
	shared: Arc<ReceiverShared<R>>,
	server: Arc<ServerShared>,
}

impl<R> Clone for ResponseReceiver<R> {
	fn clone(&self) -> Self {
		Self {
			shared: Arc::clone(&self.shared),
			server: Arc::clone(&self.server),
		}
	}
}

impl<R> ResponseReceiver<R> {
	fn waiting(server: Arc<ServerShared>, deadline: Instant) -> Self {
		Self {
			shared: Arc::new(ReceiverShared {
				state: Mutex::new(ReceiverState::Waiting { deadline }),
				notify: Notify::new(),
			}),
			server,
		}
	}

	fn detached(server: Arc<ServerShared>) -> Self {
		Self {
			shared: Arc::new(ReceiverShared {
				state: Mutex::new(ReceiverState::Detached),
				notify: Notify::new(),
			}),
			server,
		}
	}

	/// Completes the pending call with `response`.
	///
	/// A no-op if the call already settled (timed out, failed, or was a
	/// cast).
	pub fn reply(&self, response: Option<R>) {
		self.settle(Ok(response));
	}

	/// Completes the pending call with an error and schedules the whole
	/// server's termination.
	pub fn terminate(&self, cause: impl Into<String>) {
		let error = ServerError::Terminated(cause.into());
		self.settle(Err(error.clone()));
		*self.server.stop_error.lock() = Some(error);
		if let Some(stop) = self.server.stop.get() {
			stop();
		}
	}

	/// Defers the reply: moves the caller's deadline to `timeout` from now.
	///
	/// Lets a handler legitimately answer later, from a different message,
	/// without the caller timing out in the meantime.
	pub fn extend_wait(&self, timeout: Duration) {
		let mut state = self.shared.state.lock();
		if let ReceiverState::Waiting { deadline } = &mut *state {
			*deadline = Instant::now() + timeout;
			drop(state);
			self.shared.notify.notify_waiters();
		}
	}

	fn settle(&self, outcome: Result<Option<R>, ServerError>) {
		let mut state = self.shared.state.lock();
		if matches!(*state, ReceiverState::Waiting { .. }) {
			*state = ReceiverState::Settled(outcome);
			drop(state);
			self.shared.notify.notify_waiters();
		}
	}

	/// Blocks the caller until the slot settles or the deadline wins.
	async fn wait(&self) -> Result<Option<R>, ServerError> {
		loop {
			// Register the notification future *before* inspecting the slot
			// to avoid lost-wakeup between the lock drop and the await.
			let notified = self.shared.notify.notified();
			let deadline = {
				let mut state = self.shared.state.lock();
				match &*state {
					ReceiverState::Settled(_) => {
						let ReceiverState::Settled(outcome) = std::mem::replace(&mut *state, ReceiverState::Taken) else {
							unreachable!()
						};
						return outcome;
					}
					ReceiverState::Waiting { deadline } => *deadline,
					ReceiverState::Detached | ReceiverState::Taken => {
						unreachable!("wait is only entered for a pending call")
					}
				}
			};
			tokio::select! {
				_ = notified => {}
				_ = tokio::time::sleep_until(deadline) => {
					let mut state = self.shared.state.lock();
					// Re-check under the lock: a reply or an extended deadline
					// may have beaten the timer.
					if let ReceiverState::Waiting { deadline } = &*state
						&& *deadline <= Instant::now()
					{
						*state = ReceiverState::Taken;
						return Err(ServerError::Timeout);
					}
				}
			}
		}
	}
}

/// Request/response abstraction over one internal actor.
///
/// Concurrent `call`/`cast` invocations from any number of callers are
/// serialized in arrival order by the actor's mailbox.
pub struct Server<C>
where
	C: ServerContext,
{
	actor: ActorHandle<Operation<C>>,
	shared: Arc<ServerShared>,
}

impl<C> Clone for Server<C>
where
	C: ServerContext,
{
	fn clone(&self) -> Self {
		Self {
			actor: self.actor.clone(),
			shared: Arc::clone(&self.shared),
		}
	}
}

impl<C> Server<C>
where
	C: ServerContext,
{
	/// Runs `initialize` and, if it accepts, spawns the server's actor.
	pub fn start(runtime: &Runtime, mut context: C, config: C::Config) -> Result<Self, ServerError> {
		let idle_timeout = match context.initialize(config) {
			Init::Ignore => return Err(ServerError::Ignored),
			Init::Stop(cause) => return Err(ServerError::Rejected(cause)),
			Init::Ready { idle_timeout } => idle_timeout,
		};

		let context = Arc::new(Mutex::new(context));
		let shared = Arc::new(ServerShared {
			stop_error: Mutex::new(None),
			stop: OnceLock::new(),
		});
		// The server value does not exist until after the actor is spawned;
		// hooks reach it through this slot, filled before any request can
		// arrive.
		let slot: Arc<OnceLock<Server<C>>> = Arc::new(OnceLock::new());

		let handler_context = Arc::clone(&context);
		let handler_slot = Arc::clone(&slot);
		let hook_context = Arc::clone(&context);
		let hook_slot = Arc::clone(&slot);
		let hook_shared = Arc::clone(&shared);

		let actor = runtime.spawn(move |builder| {
			builder.name("server");
			builder.on_message(move |operation: Operation<C>| {
				let Some(server) = handler_slot.get() else {
					return Ok(ActorFlow::Continue);
				};
				let mut context = handler_context.lock();
				match operation {
					Operation::Call { client, request, receiver } => context.on_call(server, client, request, &receiver),
					Operation::Cast { client, request, receiver } => context.on_cast(server, client, request, &receiver),
				}
				Ok(ActorFlow::Continue)
			});
			builder.on_terminate(move |signal| {
				let error = hook_shared.stop_error.lock().take().or(match signal {
					Signal::Normal => None,
					Signal::Timeout => Some(ServerError::Timeout),
					Signal::Killed => Some(ServerError::Terminated("killed".to_string())),
					Signal::Error(cause) => Some(ServerError::Terminated(cause)),
				});
				if let Some(server) = hook_slot.get() {
					hook_context.lock().on_terminate(server, error);
				}
			});
		});

		let stop_handle = actor.clone();
		let _ = shared.stop.set(Box::new(move || stop_handle.stop()));

		let server = Self { actor, shared };
		let _ = slot.set(server.clone());

		if let Some(timeout) = idle_timeout {
			let timer = server.actor.clone();
			server.actor.after(timeout, move || timer.terminate(Signal::Timeout));
		}
		tracing::debug!(actor = %server.actor.id(), "server.start");
		Ok(server)
	}

	/// Blocking request: waits for the handler's reply, an error, or
	/// `timeout`, whichever settles first.
	pub async fn call(&self, request: C::Request, timeout: Duration) -> Result<Option<C::Response>, ServerError> {
		self.call_inner(None, request, timeout).await
	}

	/// [`Self::call`] carrying the calling actor's identity in the envelope.
	pub async fn call_from(&self, client: ActorId, request: C::Request, timeout: Duration) -> Result<Option<C::Response>, ServerError> {
		self.call_inner(Some(client), request, timeout).await
	}

	/// Fire-and-forget request. Returns immediately.
	pub fn cast(&self, request: C::Request) {
		self.cast_inner(None, request);
	}

	/// [`Self::cast`] carrying the calling actor's identity in the envelope.
	pub fn cast_from(&self, client: ActorId, request: C::Request) {
		self.cast_inner(Some(client), request);
	}

	/// Cleanly stops the server; `on_terminate` observes no error.
	pub fn stop(&self) {
		self.actor.stop();
	}

	/// Returns `true` while the server's actor is live.
	pub fn is_running(&self) -> bool {
		self.actor.is_alive()
	}

	/// Identity of the server's internal actor, usable with links and
	/// monitors.
	pub fn id(&self) -> ActorId {
		self.actor.id()
	}

	async fn call_inner(&self, client: Option<ActorId>, request: C::Request, timeout: Duration) -> Result<Option<C::Response>, ServerError> {
		if !self.actor.is_alive() {
			return Err(ServerError::Terminated("server is not running".to_string()));
		}
		let receiver = ResponseReceiver::waiting(Arc::clone(&self.shared), Instant::now() + timeout);
		self.actor.send(Operation::Call {
			client,
			request,
			receiver: receiver.clone(),
		});
		receiver.wait().await
	}

	fn cast_inner(&self, client: Option<ActorId>, request: C::Request) {
		let receiver = ResponseReceiver::detached(Arc::clone(&self.shared));
		self.actor.send(Operation::Cast { client, request, receiver });
	}
}
