//! End-to-end scenarios over the public API.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;

use courier_runtime::{ActorFlow, ActorId, Init, ResponseReceiver, Runtime, Server, ServerContext, ServerError, Signal};

enum Area {
	Rectangle(u32, u32),
	Circle(f32),
	Exit,
}

#[test]
fn area_actor_processes_three_messages_in_order_then_stops() {
	let runtime = Runtime::new();
	let (event_tx, event_rx) = mpsc::channel();
	let (exit_tx, exit_rx) = mpsc::channel();

	let actor = runtime.spawn(|builder| {
		builder.name("area");
		builder.on_message(move |message: Area| {
			match message {
				Area::Rectangle(width, height) => {
					let _ = event_tx.send(format!("rectangle:{}", width * height));
				}
				Area::Circle(radius) => {
					let _ = event_tx.send(format!("circle:{}", 3.14159 * radius * radius));
				}
				Area::Exit => {
					let _ = event_tx.send("exit".to_string());
					return Ok(ActorFlow::Stop);
				}
			}
			Ok(ActorFlow::Continue)
		});
		builder.on_terminate(move |signal| {
			let _ = exit_tx.send(signal);
		});
	});

	actor.send(Area::Rectangle(6, 10));
	actor.send(Area::Circle(23.0));
	actor.send(Area::Exit);

	let timeout = Duration::from_secs(2);
	assert_eq!(event_rx.recv_timeout(timeout).unwrap(), "rectangle:60");
	assert_eq!(event_rx.recv_timeout(timeout).unwrap(), format!("circle:{}", 3.14159f32 * 23.0 * 23.0));
	assert_eq!(event_rx.recv_timeout(timeout).unwrap(), "exit");
	assert!(event_rx.recv_timeout(Duration::from_millis(100)).is_err(), "exactly three evaluations");

	assert_eq!(exit_rx.recv_timeout(timeout).unwrap(), Signal::Normal);
	runtime.shutdown();
}

#[test]
fn linked_actors_die_together_while_monitors_only_watch() {
	let runtime = Runtime::new();

	let worker = runtime.spawn(|builder| {
		builder.name("worker");
		builder.on_message(|()| Err("worker crashed".to_string()));
	});

	let (partner_exit_tx, partner_exit_rx) = mpsc::channel();
	let partner = runtime.spawn::<()>(|builder| {
		builder.name("partner");
		builder.on_terminate(move |signal| {
			let _ = partner_exit_tx.send(signal);
		});
	});

	let (watcher_tx, watcher_rx) = mpsc::channel();
	let watcher = runtime.spawn::<()>(|builder| {
		builder.name("watcher");
		builder.on_peer_exit(move |peer, signal| {
			let _ = watcher_tx.send((peer, signal));
		});
	});

	runtime.link(worker.id(), partner.id());
	runtime.monitor(watcher.id(), worker.id());

	worker.send(());

	let timeout = Duration::from_secs(2);
	let partner_signal = partner_exit_rx.recv_timeout(timeout).expect("linked partner terminates");
	assert_eq!(partner_signal, Signal::Error("worker crashed".to_string()));

	let (peer, watcher_signal) = watcher_rx.recv_timeout(timeout).expect("monitor is notified");
	assert_eq!(peer, worker.id());
	assert_eq!(watcher_signal, Signal::Error("worker crashed".to_string()));

	std::thread::sleep(Duration::from_millis(50));
	assert!(watcher.is_alive(), "monitoring must not terminate the observer");
	assert!(!worker.is_alive());
	assert!(!partner.is_alive());
	runtime.shutdown();
}

enum BankRequest {
	New(String),
	Add(String, i64),
	Remove(String, i64),
	Stop,
}

struct Bank {
	accounts: HashMap<String, i64>,
	exits: Arc<AtomicUsize>,
	last_error: Arc<Mutex<Option<ServerError>>>,
}

impl ServerContext for Bank {
	type Config = ();
	type Request = BankRequest;
	type Response = i64;

	fn initialize(&mut self, (): ()) -> Init {
		Init::Ready { idle_timeout: None }
	}

	fn on_call(&mut self, _server: &Server<Self>, _client: Option<ActorId>, request: BankRequest, receiver: &ResponseReceiver<i64>) {
		match request {
			BankRequest::New(who) => {
				self.accounts.insert(who, 0);
				receiver.reply(Some(0));
			}
			BankRequest::Add(who, amount) => match self.accounts.get_mut(&who) {
				Some(balance) => {
					*balance += amount;
					receiver.reply(Some(*balance));
				}
				None => receiver.reply(None),
			},
			BankRequest::Remove(who, amount) => match self.accounts.get_mut(&who) {
				Some(balance) => {
					*balance -= amount;
					receiver.reply(Some(*balance));
				}
				None => receiver.reply(None),
			},
			BankRequest::Stop => receiver.terminate("stop"),
		}
	}

	fn on_cast(&mut self, _server: &Server<Self>, _client: Option<ActorId>, _request: BankRequest, _receiver: &ResponseReceiver<i64>) {}

	fn on_terminate(&mut self, _server: &Server<Self>, error: Option<ServerError>) {
		self.exits.fetch_add(1, Ordering::SeqCst);
		*self.last_error.lock().unwrap() = error;
	}
}

#[tokio::test]
async fn bank_server_round_trip() {
	let runtime = Runtime::new();
	let exits = Arc::new(AtomicUsize::new(0));
	let last_error = Arc::new(Mutex::new(None));
	let bank = Bank {
		accounts: HashMap::new(),
		exits: Arc::clone(&exits),
		last_error: Arc::clone(&last_error),
	};
	let server = Server::start(&runtime, bank, ()).unwrap();
	let timeout = Duration::from_secs(2);

	assert_eq!(server.call(BankRequest::New("alice".into()), timeout).await, Ok(Some(0)));
	assert_eq!(server.call(BankRequest::Add("alice".into(), 50), timeout).await, Ok(Some(50)));
	assert_eq!(server.call(BankRequest::Remove("alice".into(), 20), timeout).await, Ok(Some(30)));

	// Unknown accounts produce an absent response, not an error.
	assert_eq!(server.call(BankRequest::Add("bob".into(), 5), timeout).await, Ok(None));

	let stopped = server.call(BankRequest::Stop, timeout).await;
	assert_eq!(stopped, Err(ServerError::Terminated("stop".to_string())));

	tokio::time::timeout(timeout, async {
		while server.is_running() {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.expect("server should stop");

	assert_eq!(exits.load(Ordering::SeqCst), 1, "on_terminate fires exactly once");
	assert_eq!(
		*last_error.lock().unwrap(),
		Some(ServerError::Terminated("stop".to_string()))
	);

	let late = server.call(BankRequest::New("carol".into()), timeout).await;
	assert!(matches!(late, Err(ServerError::Terminated(_))), "calls after stop fail fast");
}

#[test]
fn server_actor_participates_in_the_dependency_graph() {
	let runtime = Runtime::new();
	let exits = Arc::new(AtomicUsize::new(0));
	let last_error = Arc::new(Mutex::new(None));
	let bank = Bank {
		accounts: HashMap::new(),
		exits: Arc::clone(&exits),
		last_error: Arc::clone(&last_error),
	};
	let server = Server::start(&runtime, bank, ()).unwrap();

	let (down_tx, down_rx) = mpsc::channel();
	let watcher = runtime.spawn::<()>(|builder| {
		builder.on_peer_exit(move |peer, signal| {
			let _ = down_tx.send((peer, signal));
		});
	});
	runtime.monitor(watcher.id(), server.id());

	server.stop();

	let (peer, signal) = down_rx.recv_timeout(Duration::from_secs(2)).expect("watcher sees the server die");
	assert_eq!(peer, server.id());
	assert_eq!(signal, Signal::Normal);
	runtime.shutdown();
}
