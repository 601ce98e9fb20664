//! Server engine: binds (retrying as the handler asks), announces itself once,
//! then runs the poll loop until dropped.
//!
//! With optimized loopback a TCP server also listens on the local socket
//! named after its port, served by a second thread. The two threads meet
//! before `on_started` so the handler is told about the server exactly once,
//! and the local listener only starts accepting after that call returns.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use crate::addr::{UnixAddr, loopback_name};
use crate::backend::{Acceptor, Backend, LocalAcceptor, ReservedName, ShutdownHandle, TcpAcceptor};
use crate::connection::Connection;
use crate::error::is_bind_failure;
use crate::signal::StopSignal;
use crate::timeout::Timeout;

/// How many times the loopback listener tries to bind before the server
/// settles for TCP alone.
const LOOPBACK_BIND_ATTEMPTS: usize = 3;

/// Server event callbacks.
///
/// Every call concerning one connection comes from the thread serving that
/// connection's transport, so per-connection events never race each other.
pub trait ServerHandler: Send + Sync + 'static {
	/// Binding failed. `relisten_timeout` holds the configured delay before the
	/// next attempt; set it to [`Timeout::Infinite`] to give up.
	fn on_failed_to_start(&self, relisten_timeout: &mut Timeout) {
		let _ = relisten_timeout;
	}

	fn on_started(&self) {}

	fn on_connected(&self, connection: &Arc<Connection>) {
		let _ = connection;
	}

	fn on_received(&self, connection: &Arc<Connection>, data: &[u8]);

	fn on_disconnected(&self, connection: &Arc<Connection>) {
		let _ = connection;
	}

	/// The server stopped after having started.
	fn on_stopped(&self) {}
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerOptions {
	/// Delay before retrying a failed bind. Default: 1 second.
	pub relisten_timeout: Timeout,
	/// How long a stopping server lets its peers close gracefully before
	/// aborting them. Default: infinite.
	pub shutdown_timeout: Timeout,
	/// Also listen on a local socket for clients on this machine. Default: on.
	///
	/// If that socket's name is taken, binding it is tried three times,
	/// `relisten_timeout` apart, before the server settles for TCP alone. That
	/// holds up `on_started` by twice `relisten_timeout`. With a zero or
	/// infinite `relisten_timeout` the first failure settles it.
	pub optimized_loopback: bool,
	/// Size of each read. Default: 64 KiB.
	pub buffer_size: usize,
	/// Listen backlog. Default: 16.
	pub backlog: i32,
}

impl Default for ServerOptions {
	fn default() -> Self {
		Self {
			relisten_timeout: Timeout::Millis(1000),
			shutdown_timeout: Timeout::Infinite,
			optimized_loopback: true,
			buffer_size: 64 * 1024,
			backlog: 16,
		}
	}
}

impl ServerOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn relisten_timeout(mut self, timeout: Timeout) -> Self {
		self.relisten_timeout = timeout;
		self
	}

	pub fn shutdown_timeout(mut self, timeout: Timeout) -> Self {
		self.shutdown_timeout = timeout;
		self
	}

	pub fn optimized_loopback(mut self, enable: bool) -> Self {
		self.optimized_loopback = enable;
		self
	}

	pub fn buffer_size(mut self, size: usize) -> Self {
		self.buffer_size = size;
		self
	}

	pub fn backlog(mut self, backlog: i32) -> Self {
		self.backlog = backlog;
		self
	}
}

#[derive(Debug, Clone)]
enum Endpoint {
	Tcp(u16),
	Local(UnixAddr),
}

impl std::fmt::Display for Endpoint {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Tcp(port) => write!(f, "tcp:{}", port),
			Self::Local(addr) => write!(f, "local:{}", addr),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Loopback {
	Pending,
	Ready,
	Failed,
}

#[derive(Debug)]
struct State {
	backends: Vec<ShutdownHandle>,
	port: Option<u16>,
	loopback: Loopback,
	announced: bool,
}

struct Shared {
	handler: Arc<dyn ServerHandler>,
	options: ServerOptions,
	stop: StopSignal,
	state: Mutex<State>,
	/// Signalled when the loopback listener is bound or has given up.
	loopback_settled: Condvar,
	/// Signalled once `on_started` has returned.
	started: Condvar,
}

impl Shared {
	fn lock(&self) -> MutexGuard<'_, State> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Makes `backend` reachable by `Server::drop`. Returns false if the
	/// server is already stopping, in which case the backend must not run.
	fn register(&self, backend: &Backend, port: Option<u16>) -> bool {
		let mut state = self.lock();
		// checked under the lock so a concurrent drop either sees the backend
		// or is seen here
		if self.stop.is_stopped() {
			return false;
		}
		state.backends.push(backend.shutdown_handle());
		if port.is_some() {
			state.port = port;
		}
		true
	}

	fn settle_loopback(&self, outcome: Loopback) {
		self.lock().loopback = outcome;
		self.loopback_settled.notify_all();
	}
}

/// A server listening on TCP or on a local socket.
///
/// Starts on construction and runs on background threads. Dropping it stops
/// accepting, closes every connection and waits for the threads to finish.
pub struct Server {
	shared: Arc<Shared>,
	endpoint: Endpoint,
	thread: Option<JoinHandle<()>>,
}

impl Server {
	/// Listens on `port` on every IPv4 interface; port 0 picks a free port,
	/// reported by [`Server::port`] once bound.
	pub fn create_tcp<H: ServerHandler>(handler: Arc<H>, port: u16, options: ServerOptions) -> std::io::Result<Self> {
		Self::start(handler, Endpoint::Tcp(port), options)
	}

	/// Listens on a local socket: `/path` for a filesystem socket, `@name` or
	/// a bare `name` for an abstract one.
	pub fn create_local<H: ServerHandler>(handler: Arc<H>, name: &str, options: ServerOptions) -> std::io::Result<Self> {
		let addr = UnixAddr::from_name(name)?;
		Self::start(handler, Endpoint::Local(addr), options)
	}

	fn start(handler: Arc<dyn ServerHandler>, endpoint: Endpoint, options: ServerOptions) -> std::io::Result<Self> {
		let shared = Arc::new(Shared {
			handler,
			options,
			stop: StopSignal::new(),
			state: Mutex::new(State {
				backends: Vec::new(),
				port: None,
				loopback: Loopback::Pending,
				announced: false,
			}),
			loopback_settled: Condvar::new(),
			started: Condvar::new(),
		});
		let thread = {
			let shared = Arc::clone(&shared);
			let endpoint = endpoint.clone();
			std::thread::Builder::new()
				.name("looplane-server".into())
				.spawn(move || run(shared, endpoint))?
		};
		Ok(Self { shared, endpoint, thread: Some(thread) })
	}

	/// The bound TCP port, once known. `None` for local servers.
	pub fn port(&self) -> Option<u16> {
		self.shared.lock().port
	}

	/// The local socket name, for local servers.
	pub fn name(&self) -> Option<String> {
		match &self.endpoint {
			Endpoint::Tcp(_) => None,
			Endpoint::Local(addr) => Some(addr.to_string()),
		}
	}
}

impl Drop for Server {
	fn drop(&mut self) {
		self.shared.stop.stop();
		{
			let state = self.shared.lock();
			for backend in &state.backends {
				backend.shutdown();
			}
			self.shared.loopback_settled.notify_all();
			self.shared.started.notify_all();
		}
		if let Some(thread) = self.thread.take() {
			if thread.thread().id() == std::thread::current().id() {
				log::error!("server dropped from its own callback; not waiting for it");
				return;
			}
			if thread.join().is_err() {
				log::error!("server thread panicked");
			}
		}
	}
}

fn run(shared: Arc<Shared>, endpoint: Endpoint) {
	match serve(&shared, &endpoint) {
		Ok(true) => {
			log::info!("server {} stopped", endpoint);
			shared.handler.on_stopped();
		}
		Ok(false) => log::debug!("server {} stopped before starting", endpoint),
		Err(err) => log::error!("server {} failed: {}", endpoint, err),
	}
}

/// Returns whether the server got as far as `on_started`.
fn serve(shared: &Arc<Shared>, endpoint: &Endpoint) -> std::io::Result<bool> {
	let Some((backend, port)) = bind(shared, endpoint)? else {
		return Ok(false);
	};
	match port {
		Some(port) => log::info!("server listening on tcp:{}", port),
		None => log::info!("server listening on {}", endpoint),
	}

	let loopback = match (endpoint, port) {
		(Endpoint::Tcp(_), Some(port)) if shared.options.optimized_loopback => {
			let shared = Arc::clone(shared);
			let thread = std::thread::Builder::new()
				.name("looplane-loopback".into())
				.spawn(move || serve_loopback(&shared, port));
			match thread {
				Ok(thread) => Some(thread),
				Err(err) => {
					log::warn!("failed to spawn loopback listener: {}", err);
					None
				}
			}
		}
		_ => None,
	};

	if loopback.is_some() {
		let mut state = shared.lock();
		while state.loopback == Loopback::Pending && !shared.stop.is_stopped() {
			state = shared.loopback_settled.wait(state).unwrap_or_else(PoisonError::into_inner);
		}
	}

	let started = !shared.stop.is_stopped();
	let result = if started {
		shared.handler.on_started();
		shared.lock().announced = true;
		shared.started.notify_all();
		backend.run(shared.handler.as_ref())
	} else {
		Ok(())
	};

	if let Some(thread) = loopback {
		if thread.join().is_err() {
			log::error!("loopback listener thread panicked");
		}
	}
	result.map(|()| started)
}

/// Binds the main listener, asking the handler after every failure whether
/// and when to try again. `None` means the server gave up or was stopped.
fn bind(shared: &Shared, endpoint: &Endpoint) -> std::io::Result<Option<(Backend, Option<u16>)>> {
	let options = &shared.options;
	loop {
		if shared.stop.is_stopped() {
			return Ok(None);
		}
		let attempt: std::io::Result<(Box<dyn Acceptor>, Option<u16>)> = match endpoint {
			Endpoint::Tcp(port) => TcpAcceptor::bind(*port, options.backlog).map(|acceptor| {
				let port = acceptor.port();
				(Box::new(acceptor) as Box<dyn Acceptor>, Some(port))
			}),
			Endpoint::Local(addr) => {
				LocalAcceptor::bind(addr, options.backlog).map(|acceptor| (Box::new(acceptor) as Box<dyn Acceptor>, None))
			}
		};
		match attempt {
			Ok((acceptor, port)) => {
				let backend = Backend::new(acceptor, options.buffer_size, options.shutdown_timeout)?;
				if !shared.register(&backend, port) {
					return Ok(None);
				}
				return Ok(Some((backend, port)));
			}
			Err(err) if is_bind_failure(&err) => {
				log::warn!("server {} failed to start: {}", endpoint, err);
				let mut relisten_timeout = options.relisten_timeout;
				shared.handler.on_failed_to_start(&mut relisten_timeout);
				if relisten_timeout.is_infinite() {
					return Ok(None);
				}
				log::debug!("server {} retrying in {}", endpoint, relisten_timeout);
				if shared.stop.wait(relisten_timeout.as_duration()) {
					return Ok(None);
				}
			}
			Err(err) => return Err(err),
		}
	}
}

/// Body of the loopback thread: claim the name, report the outcome, wait for
/// the server to be announced, then listen and poll.
fn serve_loopback(shared: &Shared, port: u16) {
	let Some(reserved) = reserve_loopback(shared, port) else {
		shared.settle_loopback(Loopback::Failed);
		return;
	};
	shared.settle_loopback(Loopback::Ready);

	{
		let mut state = shared.lock();
		while !state.announced && !shared.stop.is_stopped() {
			state = shared.started.wait(state).unwrap_or_else(PoisonError::into_inner);
		}
		if !state.announced {
			return;
		}
	}

	let options = &shared.options;
	let name = reserved.name().to_owned();
	let backend = reserved
		.listen(options.backlog)
		.and_then(|acceptor| Backend::new(Box::new(acceptor), options.buffer_size, options.shutdown_timeout));
	let backend = match backend {
		Ok(backend) => backend,
		Err(err) => {
			log::warn!("loopback listener {} failed to start: {}", name, err);
			return;
		}
	};
	if !shared.register(&backend, None) {
		return;
	}
	log::info!("server also listening on {}", name);
	if let Err(err) = backend.run(shared.handler.as_ref()) {
		log::error!("loopback listener {} failed: {}", name, err);
	}
}

fn reserve_loopback(shared: &Shared, port: u16) -> Option<ReservedName> {
	let addr = match UnixAddr::from_name(&loopback_name(port)) {
		Ok(addr) => addr,
		Err(err) => {
			log::warn!("no loopback listener for port {}: {}", port, err);
			return None;
		}
	};
	for attempt in 1..=LOOPBACK_BIND_ATTEMPTS {
		match LocalAcceptor::reserve(&addr) {
			Ok(reserved) => return Some(reserved),
			Err(err) if is_bind_failure(&err) => {
				log::warn!("loopback listener {} failed to bind (attempt {}): {}", addr, attempt, err);
				let delay = match shared.options.relisten_timeout {
					Timeout::Millis(millis) if millis > 0 => Timeout::Millis(millis),
					_ => return None,
				};
				if attempt == LOOPBACK_BIND_ATTEMPTS || shared.stop.wait(delay.as_duration()) {
					return None;
				}
			}
			Err(err) => {
				log::warn!("loopback listener {} failed: {}", addr, err);
				return None;
			}
		}
	}
	None
}
