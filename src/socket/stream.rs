use std::marker::PhantomData;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use crate::addr::{Domain, FromSockAddr};
use crate::error::{IoError, SocketError, errno};

/// A connected stream socket of any address family.
///
/// Owns exactly one descriptor and closes it on drop. Moving a `Socket`
/// moves the descriptor; there is no way to copy one.
#[derive(Debug)]
pub struct Socket {
	fd: OwnedFd,
}

impl Socket {
	pub(crate) fn from_fd(fd: OwnedFd) -> Self {
		Self { fd }
	}

	/// Creates a connected pair of local stream sockets.
	pub fn pair() -> std::io::Result<(Socket, Socket)> {
		let mut fds = [-1 as libc::c_int; 2];
		let result = unsafe {
			libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0, fds.as_mut_ptr())
		};
		if result == -1 {
			return Err(SocketError::Create { errno: errno() }.into());
		}
		let (a, b) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
		Ok((Self::from_fd(a), Self::from_fd(b)))
	}

	/// Returns the raw file descriptor.
	#[inline]
	pub fn as_raw_fd(&self) -> libc::c_int {
		self.fd.as_raw_fd()
	}

	pub fn send_with_flags(&self, buf: &[u8], flags: i32) -> std::io::Result<usize> {
		let n = unsafe {
			libc::send(
				self.as_raw_fd(),
				buf.as_ptr() as *const libc::c_void,
				buf.len(),
				flags,
			)
		};

		if n == -1 {
			Err(IoError::Write { errno: errno() }.into())
		} else {
			Ok(n as usize)
		}
	}

	pub fn recv_with_flags(&self, buf: &mut [u8], flags: i32) -> std::io::Result<usize> {
		let n = unsafe {
			libc::recv(
				self.as_raw_fd(),
				buf.as_mut_ptr() as *mut libc::c_void,
				buf.len(),
				flags,
			)
		};

		if n == -1 {
			Err(IoError::Read { errno: errno() }.into())
		} else {
			Ok(n as usize)
		}
	}

	pub fn shutdown(&self, how: Shutdown) -> std::io::Result<()> {
		let how = match how {
			Shutdown::Read => libc::SHUT_RD,
			Shutdown::Write => libc::SHUT_WR,
			Shutdown::ReadWrite => libc::SHUT_RDWR,
		};

		let result = unsafe { libc::shutdown(self.as_raw_fd(), how) };

		if result == -1 {
			Err(IoError::Shutdown { errno: errno() }.into())
		} else {
			Ok(())
		}
	}
}

impl AsRawFd for Socket {
	fn as_raw_fd(&self) -> RawFd {
		self.fd.as_raw_fd()
	}
}

impl std::os::fd::AsFd for Socket {
	fn as_fd(&self) -> std::os::fd::BorrowedFd<'_> {
		std::os::fd::AsFd::as_fd(&self.fd)
	}
}

/// A connected stream socket.
///
/// Represents an established connection, ready for read/write.
/// Created by Listener::accept() (server) or RawSocket::connect() (client).
/// The address family is tracked in the type until the stream is handed
/// over as a plain [`Socket`].
pub struct ConnectedStream<D: Domain> {
	socket: Socket,
	_marker: PhantomData<D>,
}

impl<D: Domain> ConnectedStream<D> {
	pub(crate) fn from_fd(fd: OwnedFd) -> Self {
		Self {
			socket: Socket::from_fd(fd),
			_marker: PhantomData,
		}
	}

	/// Drops the address family, keeping the descriptor.
	pub fn into_socket(self) -> Socket {
		self.socket
	}
}

impl<D: Domain> std::ops::Deref for ConnectedStream<D> {
	type Target = Socket;

	fn deref(&self) -> &Socket {
		&self.socket
	}
}

impl<D: Domain> AsRawFd for ConnectedStream<D> {
	fn as_raw_fd(&self) -> RawFd {
		self.socket.as_raw_fd()
	}
}

impl<D: Domain> ConnectedStream<D>
where
	D::Addr: FromSockAddr,
{
	/// Returns the remote address of this connection.
	pub fn peer_addr(&self) -> std::io::Result<D::Addr> {
		let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
		let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

		let result = unsafe {
			libc::getpeername(
				self.as_raw_fd(),
				&mut storage as *mut _ as *mut libc::sockaddr,
				&mut len,
			)
		};

		if result == -1 {
			return Err(SocketError::GetOption { errno: errno(), option: "SO_PEERNAME" }.into());
		}

		unsafe {
			D::Addr::from_sockaddr(&storage as *const _ as *const libc::sockaddr, len)
				.ok_or_else(|| SocketError::InvalidAddress { reason: "invalid address" }.into())
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
	Read,      // SHUT_RD
	Write,     // SHUT_WR
	ReadWrite, // SHUT_RDWR
}
