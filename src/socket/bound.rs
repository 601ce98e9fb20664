use std::marker::PhantomData;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use super::listener::Listener;
use super::{SockType, Stream};
use crate::addr::Domain;
use crate::error::{SocketError, errno};

/// A socket that owns its address but is not listening yet.
///
/// The address is claimed, so nobody else can bind it, while connection
/// attempts are still refused. A server uses this to reserve a name before
/// it is ready to accept anything on it.
pub struct BoundSocket<D: Domain, T: SockType> {
	fd: OwnedFd,
	_marker: PhantomData<(D, T)>,
}

impl<D: Domain, T: SockType> BoundSocket<D, T> {
	/// Internal use only - called by RawSocket::bind()
	pub(crate) fn from_fd(fd: OwnedFd) -> Self {
		Self {
			fd,
			_marker: PhantomData,
		}
	}
}

impl<D: Domain> BoundSocket<D, Stream> {
	/// Starts accepting connections, with up to `backlog` of them queued.
	pub fn listen(self, backlog: i32) -> std::io::Result<Listener<D>> {
		let result = unsafe { libc::listen(self.fd.as_raw_fd(), backlog) };
		if result == -1 {
			return Err(SocketError::Listen { errno: errno(), backlog }.into());
		}
		Ok(Listener::from_fd(self.fd))
	}
}

impl<D: Domain, T: SockType> AsRawFd for BoundSocket<D, T> {
	fn as_raw_fd(&self) -> RawFd {
		self.fd.as_raw_fd()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::addr::{Ipv4, SocketAddrV4};
	use crate::socket::{ConnectorBuilder, RawSocket};

	#[test]
	fn listening_socket_accepts_on_its_port() {
		let bound = RawSocket::<Ipv4, Stream>::new().unwrap().bind(SocketAddrV4::localhost(0)).unwrap();
		let listener = bound.listen(1).unwrap();
		let addr = listener.local_addr().unwrap();
		assert_ne!(addr.port(), 0);
		let _stream = ConnectorBuilder::<Ipv4>::new().connect(addr).unwrap();
	}
}
