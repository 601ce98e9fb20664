//! The server side of one transport: a listening socket plus the poll loop
//! that accepts peers and reads from them.

mod local;
mod tcp;

pub(crate) use self::local::{LocalAcceptor, ReservedName};
pub(crate) use self::tcp::TcpAcceptor;

use std::collections::HashMap;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::Instant;

use crate::connection::{Connection, Received};
use crate::server::ServerHandler;
use crate::socket::{PollSet, Waker};
use crate::timeout::Timeout;

/// A listening socket that turns pending connections into [`Connection`]s.
pub(crate) trait Acceptor: Send {
	fn listener_fd(&self) -> RawFd;

	/// Accepts one pending peer. `Ok(None)` covers the outcomes the loop just
	/// polls past: the peer gave up before being accepted, a signal, or
	/// nothing was actually pending.
	fn accept(&self) -> std::io::Result<Option<Connection>>;

	/// What this acceptor listens on, for logs.
	fn describe(&self) -> String;
}

/// Stops a running [`Backend`] from another thread.
#[derive(Debug, Clone)]
pub(crate) struct ShutdownHandle {
	waker: Arc<Waker>,
}

impl ShutdownHandle {
	/// Asks the loop to stop accepting and close every peer. Returns at once;
	/// the loop finishes once its peers are gone.
	pub(crate) fn shutdown(&self) {
		if let Err(err) = self.waker.wake() {
			log::error!("failed to wake backend: {}", err);
		}
	}
}

/// Per-backend event loop. Owns its peers exclusively; nothing in here is
/// shared with other threads except the waker.
pub(crate) struct Backend {
	acceptor: Box<dyn Acceptor>,
	waker: Arc<Waker>,
	buffer_size: usize,
	shutdown_timeout: Timeout,
}

impl Backend {
	pub(crate) fn new(acceptor: Box<dyn Acceptor>, buffer_size: usize, shutdown_timeout: Timeout) -> std::io::Result<Self> {
		Ok(Self {
			acceptor,
			waker: Arc::new(Waker::new()?),
			buffer_size: buffer_size.max(1),
			shutdown_timeout,
		})
	}

	pub(crate) fn shutdown_handle(&self) -> ShutdownHandle {
		ShutdownHandle { waker: Arc::clone(&self.waker) }
	}

	/// Runs until shut down and every peer has disconnected.
	///
	/// All handler calls for this backend's peers happen on the calling
	/// thread.
	pub(crate) fn run(self, handler: &dyn ServerHandler) -> std::io::Result<()> {
		let Self { acceptor, waker, buffer_size, shutdown_timeout } = self;
		let name = acceptor.describe();
		let mut listener = Some(acceptor);
		let mut peers: HashMap<RawFd, Arc<Connection>> = HashMap::new();
		let mut buffer = vec![0u8; buffer_size];
		let mut set = PollSet::with_capacity(2);
		let mut draining = false;
		let mut deadline: Option<Instant> = None;

		log::debug!("{}: polling", name);
		loop {
			if draining && peers.is_empty() {
				break;
			}

			set.clear();
			let waker_slot = (!draining).then(|| set.push(waker.as_raw_fd()));
			let listener_slot = listener.as_ref().map(|listener| set.push(listener.listener_fd()));
			let first_peer = set.len();
			for fd in peers.keys() {
				set.push(*fd);
			}

			let timeout = deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
			set.wait(timeout)?;

			if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
				log::debug!("{}: aborting {} peer(s) still open after {}", name, peers.len(), shutdown_timeout);
				abort_all(&mut peers, handler);
				continue;
			}

			let woken = waker_slot.is_some_and(|slot| set.readiness(slot).is_readable());
			let listener_failed = listener_slot.is_some_and(|slot| set.readiness(slot).is_closed());
			if woken || listener_failed {
				if listener_failed {
					log::warn!("{}: listening socket failed, shutting down", name);
				}
				log::debug!("{}: draining {} peer(s)", name, peers.len());
				draining = true;
				listener = None;
				match shutdown_timeout {
					Timeout::Immediate | Timeout::Millis(0) => abort_all(&mut peers, handler),
					Timeout::Infinite => peers.values().for_each(|peer| peer.close()),
					Timeout::Millis(millis) => {
						peers.values().for_each(|peer| peer.close());
						deadline = Some(Instant::now() + std::time::Duration::from_millis(u64::from(millis)));
					}
				}
				continue;
			}

			if let (Some(acceptor), Some(slot)) = (listener.as_ref(), listener_slot) {
				if set.readiness(slot).is_readable() {
					if let Some(connection) = acceptor.accept()? {
						let connection = Arc::new(connection);
						log::debug!("{}: accepted {}", name, connection.address());
						peers.insert(connection.as_raw_fd(), Arc::clone(&connection));
						handler.on_connected(&connection);
					}
				}
			}

			let ready: Vec<_> = set.ready_from(first_peer).collect();
			for (fd, readiness) in ready {
				let Some(connection) = peers.get(&fd).cloned() else {
					continue;
				};
				let mut disconnected = false;
				if readiness.is_readable() {
					disconnected = drain(&connection, &mut buffer, handler)?;
				}
				if disconnected || readiness.is_closed() {
					log::debug!("{}: {} disconnected", name, connection.address());
					connection.abort();
					peers.remove(&fd);
					handler.on_disconnected(&connection);
				}
			}
		}
		log::debug!("{}: stopped", name);
		Ok(())
	}
}

/// Reads until the socket has nothing more right now, handing every chunk to
/// the handler. Returns true if the peer disconnected.
fn drain(connection: &Arc<Connection>, buffer: &mut [u8], handler: &dyn ServerHandler) -> std::io::Result<bool> {
	loop {
		match connection.receive(buffer)? {
			Received::Data(n) => {
				log::trace!("{}: received {} byte(s)", connection.address(), n);
				handler.on_received(connection, &buffer[..n]);
				// a short read means the socket is drained for now
				if n < buffer.len() {
					return Ok(false);
				}
			}
			Received::WouldBlock => return Ok(false),
			Received::Disconnected => return Ok(true),
		}
	}
}

fn abort_all(peers: &mut HashMap<RawFd, Arc<Connection>>, handler: &dyn ServerHandler) {
	for (_, connection) in peers.drain() {
		connection.abort();
		handler.on_disconnected(&connection);
	}
}
