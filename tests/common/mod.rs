#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use looplane::{ClientHandler, Connection, ConnectorBuilder, ServerHandler, Timeout, Unix, UnixAddr, loopback_name};
use rand::Rng;

/// Upper bound on any wait in these tests.
pub const WAIT: Duration = Duration::from_secs(10);

pub fn init_logging() {
	let _ = env_logger::builder().is_test(true).try_init();
}

pub fn random_bytes(len: usize) -> Vec<u8> {
	let mut data = vec![0u8; len];
	rand::rng().fill(&mut data[..]);
	data
}

/// A port that was free a moment ago.
pub fn free_port() -> u16 {
	let listener = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
	listener.local_addr().unwrap().port()
}

/// A unique abstract local name for this test process.
pub fn unique_name(tag: &str) -> String {
	static COUNTER: AtomicUsize = AtomicUsize::new(0);
	format!("@looplane-test.{}.{}.{}", std::process::id(), tag, COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Waits until the loopback listener of the TCP server on `port` accepts
/// connections, which happens just after `on_started`.
pub fn wait_for_loopback(port: u16) {
	let addr = UnixAddr::from_name(&loopback_name(port)).unwrap();
	let deadline = Instant::now() + WAIT;
	while ConnectorBuilder::<Unix>::new().connect(addr.clone()).is_err() {
		assert!(Instant::now() < deadline, "loopback listener for port {} never opened", port);
		std::thread::sleep(Duration::from_millis(5));
	}
}

/// A value other threads update and tests wait on.
pub struct Watch<T> {
	value: Mutex<T>,
	cond: Condvar,
}

impl<T: Default> Default for Watch<T> {
	fn default() -> Self {
		Self { value: Mutex::new(T::default()), cond: Condvar::new() }
	}
}

impl<T> Watch<T> {
	pub fn update(&self, f: impl FnOnce(&mut T)) {
		f(&mut self.value.lock().unwrap());
		self.cond.notify_all();
	}

	pub fn lock(&self) -> MutexGuard<'_, T> {
		self.value.lock().unwrap()
	}

	/// Waits up to [`WAIT`] for `done` to hold.
	pub fn wait_until(&self, done: impl Fn(&T) -> bool) -> bool {
		let deadline = Instant::now() + WAIT;
		let mut value = self.value.lock().unwrap();
		while !done(&value) {
			let now = Instant::now();
			if now >= deadline {
				return false;
			}
			value = self.cond.wait_timeout(value, deadline - now).unwrap().0;
		}
		true
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
	FailedToStart,
	Started,
	Connected(String),
	Disconnected(String),
	Stopped,
}

pub fn count<T: PartialEq>(events: &[T], event: &T) -> usize {
	events.iter().filter(|e| *e == event).count()
}

/// Echoes everything back and records what happens.
#[derive(Default)]
pub struct EchoServer {
	pub events: Watch<Vec<ServerEvent>>,
	pub received: Watch<usize>,
	/// What `on_failed_to_start` answers; `None` keeps the configured delay.
	pub relisten: Mutex<Option<Timeout>>,
	/// Close every connection as soon as it is accepted.
	pub hang_up: bool,
}

impl EchoServer {
	pub fn hanging_up() -> Self {
		Self { hang_up: true, ..Self::default() }
	}

	pub fn giving_up() -> Self {
		Self { relisten: Mutex::new(Some(Timeout::Infinite)), ..Self::default() }
	}

	pub fn wait_for(&self, event: &ServerEvent) -> bool {
		self.events.wait_until(|events| events.contains(event))
	}

	pub fn events(&self) -> Vec<ServerEvent> {
		self.events.lock().clone()
	}
}

impl ServerHandler for EchoServer {
	fn on_failed_to_start(&self, relisten_timeout: &mut Timeout) {
		if let Some(timeout) = *self.relisten.lock().unwrap() {
			*relisten_timeout = timeout;
		}
		self.events.update(|events| events.push(ServerEvent::FailedToStart));
	}

	fn on_started(&self) {
		self.events.update(|events| events.push(ServerEvent::Started));
	}

	fn on_connected(&self, connection: &Arc<Connection>) {
		self.events.update(|events| events.push(ServerEvent::Connected(connection.address().to_owned())));
		if self.hang_up {
			connection.close();
		}
	}

	fn on_received(&self, connection: &Arc<Connection>, data: &[u8]) {
		assert!(connection.send(data).unwrap());
		self.received.update(|received| *received += data.len());
	}

	fn on_disconnected(&self, connection: &Arc<Connection>) {
		self.events.update(|events| events.push(ServerEvent::Disconnected(connection.address().to_owned())));
	}

	fn on_stopped(&self) {
		self.events.update(|events| events.push(ServerEvent::Stopped));
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
	Started,
	Connected(String),
	Disconnected,
	FailedToConnect,
	Stopped,
}

/// Sends `payload` once per connection and collects whatever comes back.
///
/// Each reconnect decision is taken from `decisions` in order; once it runs
/// out the configured timeout is kept.
#[derive(Default)]
pub struct Collector {
	pub events: Watch<Vec<ClientEvent>>,
	pub received: Watch<Vec<u8>>,
	pub attempts: Mutex<Vec<Instant>>,
	payload: Vec<u8>,
	decisions: Mutex<Vec<Timeout>>,
}

impl Collector {
	pub fn sending(payload: Vec<u8>) -> Self {
		Self { payload, ..Self::default() }
	}

	pub fn deciding(decisions: Vec<Timeout>) -> Self {
		let mut decisions = decisions;
		decisions.reverse();
		Self { decisions: Mutex::new(decisions), ..Self::default() }
	}

	fn decide(&self, reconnect_timeout: &mut Timeout) {
		if let Some(timeout) = self.decisions.lock().unwrap().pop() {
			*reconnect_timeout = timeout;
		}
	}

	pub fn wait_for(&self, event: &ClientEvent) -> bool {
		self.events.wait_until(|events| events.contains(event))
	}

	pub fn events(&self) -> Vec<ClientEvent> {
		self.events.lock().clone()
	}
}

impl ClientHandler for Collector {
	fn on_started(&self) {
		self.events.update(|events| events.push(ClientEvent::Started));
	}

	fn on_connected(&self, connection: &Arc<Connection>) {
		self.events.update(|events| events.push(ClientEvent::Connected(connection.address().to_owned())));
		if !self.payload.is_empty() {
			// echoes come back on this thread, so send from another one
			let connection = Arc::clone(connection);
			let payload = self.payload.clone();
			std::thread::spawn(move || connection.send(&payload).unwrap());
		}
	}

	fn on_received(&self, _connection: &Arc<Connection>, data: &[u8]) {
		self.received.update(|received| received.extend_from_slice(data));
	}

	fn on_disconnected(&self, _connection: &Arc<Connection>, reconnect_timeout: &mut Timeout) {
		self.decide(reconnect_timeout);
		self.events.update(|events| events.push(ClientEvent::Disconnected));
	}

	fn on_failed_to_connect(&self, reconnect_timeout: &mut Timeout) {
		self.attempts.lock().unwrap().push(Instant::now());
		self.decide(reconnect_timeout);
		self.events.update(|events| events.push(ClientEvent::FailedToConnect));
	}

	fn on_stopped(&self) {
		self.events.update(|events| events.push(ClientEvent::Stopped));
	}
}
