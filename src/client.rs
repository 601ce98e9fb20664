//! Client engine: one thread per client that connects, reads until the peer
//! goes away, and reconnects for as long as the handler wants it to.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Instant;

use crate::addr::{Domain, InetAddr, Ipv4, Ipv6, Resolution, ToSockAddr, Unix, UnixAddr, loopback_name};
use crate::connection::{Connection, Received, Side};
use crate::error::is_connect_failure;
use crate::signal::StopSignal;
use crate::socket::ConnectorBuilder;
use crate::timeout::Timeout;

/// Client event callbacks, all invoked from the client's own thread.
pub trait ClientHandler: Send + Sync + 'static {
	/// Called once, before the first connection attempt.
	fn on_started(&self) {}

	fn on_connected(&self, connection: &Arc<Connection>) {
		let _ = connection;
	}

	fn on_received(&self, connection: &Arc<Connection>, data: &[u8]);

	/// The connection is gone. `reconnect_timeout` holds the configured delay
	/// before the next attempt: leave it, change it, or set it to
	/// [`Timeout::Infinite`] to stop the client.
	fn on_disconnected(&self, connection: &Arc<Connection>, reconnect_timeout: &mut Timeout) {
		let _ = (connection, reconnect_timeout);
	}

	/// Every candidate address refused. Same `reconnect_timeout` contract as
	/// [`on_disconnected`](Self::on_disconnected).
	fn on_failed_to_connect(&self, reconnect_timeout: &mut Timeout) {
		let _ = reconnect_timeout;
	}

	/// Called once the client has stopped for good.
	fn on_stopped(&self) {}
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientOptions {
	/// Delay before reconnecting, as offered to the handler. Default: 1 second.
	pub reconnect_timeout: Timeout,
	/// How long dropping a connected client waits for the server to
	/// acknowledge a graceful close. Default: abort at once.
	pub disconnect_timeout: Timeout,
	/// Prefer the server's local socket when it runs on this machine.
	/// Default: on.
	pub optimized_loopback: bool,
	/// Size of each read. Default: 64 KiB.
	pub buffer_size: usize,
}

impl Default for ClientOptions {
	fn default() -> Self {
		Self {
			reconnect_timeout: Timeout::Millis(1000),
			disconnect_timeout: Timeout::Immediate,
			optimized_loopback: true,
			buffer_size: 64 * 1024,
		}
	}
}

impl ClientOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn reconnect_timeout(mut self, timeout: Timeout) -> Self {
		self.reconnect_timeout = timeout;
		self
	}

	pub fn disconnect_timeout(mut self, timeout: Timeout) -> Self {
		self.disconnect_timeout = timeout;
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
}

#[derive(Debug, Clone)]
enum Target {
	Tcp { host: String, port: u16 },
	Local(UnixAddr),
}

impl std::fmt::Display for Target {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Tcp { host, port } => write!(f, "{}:{}", host, port),
			Self::Local(addr) => write!(f, "{}", addr),
		}
	}
}

struct Shared {
	handler: Arc<dyn ClientHandler>,
	options: ClientOptions,
	stop: StopSignal,
	/// The live connection, if any. At most one at a time.
	active: Mutex<Option<Arc<Connection>>>,
	/// Signalled when `active` is cleared.
	idle: Condvar,
}

impl Shared {
	fn lock(&self) -> MutexGuard<'_, Option<Arc<Connection>>> {
		self.active.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Makes `connection` the active one until the returned guard is dropped.
	/// Returns `None` if the client is stopping, in which case the connection
	/// must not be used.
	fn publish(&self, connection: &Arc<Connection>) -> Option<Published<'_>> {
		let mut active = self.lock();
		// checked under the lock so a concurrent drop either sees the
		// connection or is seen here
		if self.stop.is_stopped() {
			return None;
		}
		*active = Some(Arc::clone(connection));
		Some(Published { shared: self, connection: Arc::clone(connection) })
	}
}

/// The active connection's registration. Dropping it aborts the connection
/// and clears `active`, including while a panicking callback unwinds, so a
/// waiting `Client::drop` always wakes up.
struct Published<'a> {
	shared: &'a Shared,
	connection: Arc<Connection>,
}

impl Drop for Published<'_> {
	fn drop(&mut self) {
		self.connection.abort();
		*self.shared.lock() = None;
		self.shared.idle.notify_all();
	}
}

/// A client connected (or trying to connect) to one server.
///
/// Starts on construction. Dropping it stops reconnecting, shuts the live
/// connection down as `disconnect_timeout` allows, and waits for the client
/// thread to finish.
pub struct Client {
	shared: Arc<Shared>,
	target: Target,
	thread: Option<JoinHandle<()>>,
}

impl Client {
	/// Connects to `host:port`, trying every resolved address in order. With
	/// optimized loopback, a server on this machine is reached through its
	/// local socket instead.
	pub fn create_tcp<H: ClientHandler>(
		handler: Arc<H>,
		host: &str,
		port: u16,
		options: ClientOptions,
	) -> std::io::Result<Self> {
		Self::start(handler, Target::Tcp { host: host.to_owned(), port }, options)
	}

	/// Connects to a local socket: `/path`, `@name` or a bare abstract `name`.
	pub fn create_local<H: ClientHandler>(handler: Arc<H>, name: &str, options: ClientOptions) -> std::io::Result<Self> {
		let addr = UnixAddr::from_name(name)?;
		Self::start(handler, Target::Local(addr), options)
	}

	fn start(handler: Arc<dyn ClientHandler>, target: Target, options: ClientOptions) -> std::io::Result<Self> {
		let shared = Arc::new(Shared {
			handler,
			options,
			stop: StopSignal::new(),
			active: Mutex::new(None),
			idle: Condvar::new(),
		});
		let thread = {
			let shared = Arc::clone(&shared);
			let target = target.clone();
			std::thread::Builder::new()
				.name("looplane-client".into())
				.spawn(move || run(shared, target))?
		};
		Ok(Self { shared, target, thread: Some(thread) })
	}

	/// What this client connects to: `host:port` or a local name.
	pub fn target(&self) -> String {
		self.target.to_string()
	}
}

impl Drop for Client {
	fn drop(&mut self) {
		self.shared.stop.stop();
		{
			let mut active = self.shared.lock();
			if let Some(connection) = active.clone() {
				match self.shared.options.disconnect_timeout {
					Timeout::Immediate | Timeout::Millis(0) => connection.abort(),
					Timeout::Infinite => {
						connection.close();
						while active.is_some() {
							active = self.shared.idle.wait(active).unwrap_or_else(PoisonError::into_inner);
						}
					}
					Timeout::Millis(millis) => {
						connection.close();
						let deadline = Instant::now() + std::time::Duration::from_millis(u64::from(millis));
						while active.is_some() {
							let now = Instant::now();
							if now >= deadline {
								log::debug!("client {}: no close acknowledgement after {}ms", self.target, millis);
								connection.abort();
								break;
							}
							active = self
								.shared
								.idle
								.wait_timeout(active, deadline - now)
								.unwrap_or_else(PoisonError::into_inner)
								.0;
						}
					}
				}
			}
		}
		if let Some(thread) = self.thread.take() {
			if thread.thread().id() == std::thread::current().id() {
				log::error!("client dropped from its own callback; not waiting for it");
				return;
			}
			if thread.join().is_err() {
				log::error!("client thread panicked");
			}
		}
	}
}

fn run(shared: Arc<Shared>, target: Target) {
	shared.handler.on_started();
	match connect_loop(&shared, &target) {
		Ok(()) => {
			log::info!("client {} stopped", target);
			shared.handler.on_stopped();
		}
		Err(err) => log::error!("client {} failed: {}", target, err),
	}
}

fn connect_loop(shared: &Shared, target: &Target) -> std::io::Result<()> {
	let mut buffer = vec![0u8; shared.options.buffer_size.max(1)];
	while !shared.stop.is_stopped() {
		let mut reconnect_timeout = shared.options.reconnect_timeout;
		match connect(shared, target)? {
			Some(connection) => {
				let connection = Arc::new(connection);
				let Some(published) = shared.publish(&connection) else {
					connection.abort();
					break;
				};
				log::info!("client {} connected via {}", target, connection.address());
				shared.handler.on_connected(&connection);
				let result = receive_loop(shared, &connection, &mut buffer);
				// the stream is finished either way
				drop(published);
				result?;
				log::info!("client {} disconnected", target);
				shared.handler.on_disconnected(&connection, &mut reconnect_timeout);
			}
			None => {
				log::warn!("client {} failed to connect", target);
				shared.handler.on_failed_to_connect(&mut reconnect_timeout);
			}
		}
		if reconnect_timeout.is_infinite() {
			break;
		}
		log::debug!("client {} reconnecting in {}", target, reconnect_timeout);
		if shared.stop.wait(reconnect_timeout.as_duration()) {
			break;
		}
	}
	Ok(())
}

fn receive_loop(shared: &Shared, connection: &Arc<Connection>, buffer: &mut [u8]) -> std::io::Result<()> {
	loop {
		match connection.receive(buffer)? {
			Received::Data(n) => {
				log::trace!("{}: received {} byte(s)", connection.address(), n);
				shared.handler.on_received(connection, &buffer[..n]);
			}
			Received::Disconnected => return Ok(()),
			// blocking reads report a stray timeout as an error instead
			Received::WouldBlock => continue,
		}
	}
}

/// One connection attempt over every candidate. `None` if all of them
/// refused.
fn connect(shared: &Shared, target: &Target) -> std::io::Result<Option<Connection>> {
	match target {
		Target::Local(addr) => attempt::<Unix>(addr.clone(), addr.to_string()),
		Target::Tcp { host, port } => {
			let resolution = Resolution::resolve(host, *port)?;
			if shared.options.optimized_loopback && resolution.is_local() {
				let name = loopback_name(*port);
				if let Some(connection) = attempt::<Unix>(UnixAddr::from_name(&name)?, name)? {
					return Ok(Some(connection));
				}
			}
			for candidate in resolution.addresses() {
				let connection = match *candidate {
					InetAddr::V4(addr) => attempt::<Ipv4>(addr, addr.to_string())?,
					InetAddr::V6(addr) => attempt::<Ipv6>(addr, addr.to_string())?,
				};
				if connection.is_some() {
					return Ok(connection);
				}
			}
			Ok(None)
		}
	}
}

fn attempt<D: Domain>(addr: D::Addr, address: String) -> std::io::Result<Option<Connection>>
where
	D::Addr: ToSockAddr + std::fmt::Debug,
{
	match ConnectorBuilder::<D>::new().connect(addr) {
		Ok(stream) => Ok(Some(Connection::new(address, stream.into_socket(), Side::Client))),
		Err(err) if is_connect_failure(&err) => {
			log::debug!("{}", err);
			Ok(None)
		}
		Err(err) => Err(err),
	}
}
