use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{IoError, errno_of};
use crate::socket::{Shutdown, Socket};

/// Lifecycle of a [`Connection`].
///
/// `Open → Closing → Closed` when closed gracefully, `Open → Closed` when
/// aborted. Never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
	Open,
	/// Our side stopped writing; the peer may still send.
	Closing,
	Closed,
}

/// Which engine owns the connection, which decides how it reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
	/// A thread dedicated to this connection; reads block.
	Client,
	/// A shared poll loop; reads must never block.
	Server,
}

/// Outcome of one [`Connection::receive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
	/// This many bytes were read into the front of the buffer.
	Data(usize),
	/// Nothing to read right now.
	WouldBlock,
	/// The peer finished or reset the stream.
	Disconnected,
}

/// An established byte stream to one peer.
///
/// Handed to handler callbacks as an `Arc<Connection>`; `send`, `close` and
/// `abort` may be called from any thread.
#[derive(Debug)]
pub struct Connection {
	address: String,
	socket: Socket,
	side: Side,
	state: Mutex<ConnectionState>,
	/// Held for the whole of a send so concurrent sends never interleave.
	/// `state` is only ever held briefly, so `close`/`abort` never wait on a
	/// blocked writer.
	writer: Mutex<()>,
}

impl Connection {
	pub(crate) fn new(address: String, socket: Socket, side: Side) -> Self {
		Self {
			address,
			socket,
			side,
			state: Mutex::new(ConnectionState::Open),
			writer: Mutex::new(()),
		}
	}

	/// The peer's address as text: `ip:port`, `[ip6]:port` or a local name.
	pub fn address(&self) -> &str {
		&self.address
	}

	pub fn state(&self) -> ConnectionState {
		*self.lock()
	}

	fn lock(&self) -> MutexGuard<'_, ConnectionState> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Writes all of `data`, blocking until the kernel has taken every byte.
	///
	/// Returns `Ok(false)` if the connection is no longer open or the peer
	/// reset it, in which case the connection is now closed. Any other write
	/// failure is returned as an error.
	pub fn send(&self, data: &[u8]) -> std::io::Result<bool> {
		let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
		if *self.lock() != ConnectionState::Open {
			return Ok(false);
		}
		let mut sent = 0;
		while sent < data.len() {
			match self.socket.send_with_flags(&data[sent..], libc::MSG_NOSIGNAL) {
				Ok(n) => sent += n,
				Err(err) => match errno_of(&err) {
					libc::EINTR => continue,
					libc::ECONNRESET | libc::EPIPE => {
						let mut state = self.lock();
						if *state == ConnectionState::Open {
							log::debug!("{}: peer reset while sending", self.address);
							*state = ConnectionState::Closed;
						}
						return Ok(false);
					}
					_ => return Err(err),
				},
			}
		}
		Ok(true)
	}

	/// Reads whatever is available into `buffer`.
	///
	/// Server-side connections never block and report [`Received::WouldBlock`]
	/// when drained. Client-side connections block; a blocking read that
	/// reports "would block" means a receive timeout was set behind our back
	/// and is returned as [`IoError::BlockingTimeout`].
	pub fn receive(&self, buffer: &mut [u8]) -> std::io::Result<Received> {
		let flags = match self.side {
			Side::Client => 0,
			Side::Server => libc::MSG_DONTWAIT,
		};
		loop {
			return match self.socket.recv_with_flags(buffer, flags) {
				Ok(0) => Ok(Received::Disconnected),
				Ok(n) => Ok(Received::Data(n)),
				Err(err) => match errno_of(&err) {
					libc::EINTR => continue,
					libc::ECONNRESET | libc::EPIPE | libc::ETIMEDOUT => Ok(Received::Disconnected),
					code if code == libc::EAGAIN || code == libc::EWOULDBLOCK => match self.side {
						Side::Server => Ok(Received::WouldBlock),
						Side::Client => Err(IoError::BlockingTimeout.into()),
					},
					_ => Err(err),
				},
			};
		}
	}

	/// Stops sending while still accepting data from the peer.
	///
	/// Only the first call on an open connection has any effect.
	pub fn close(&self) {
		let mut state = self.lock();
		if *state == ConnectionState::Open {
			*state = ConnectionState::Closing;
			self.shutdown(Shutdown::Write);
		}
	}

	/// Shuts the connection down in both directions, dropping anything in
	/// flight.
	///
	/// Only shuts down the directions still open, so repeated calls (or a
	/// call after [`close`](Self::close)) never repeat a shutdown.
	pub fn abort(&self) {
		let mut state = self.lock();
		let how = match *state {
			ConnectionState::Open => Shutdown::ReadWrite,
			ConnectionState::Closing => Shutdown::Read,
			ConnectionState::Closed => return,
		};
		*state = ConnectionState::Closed;
		self.shutdown(how);
	}

	fn shutdown(&self, how: Shutdown) {
		// the peer may have torn the stream down first
		if let Err(err) = self.socket.shutdown(how) {
			log::debug!("{}: shutdown({:?}) failed: {}", self.address, how, err);
		}
	}

	pub(crate) fn as_raw_fd(&self) -> libc::c_int {
		self.socket.as_raw_fd()
	}
}
