use std::marker::PhantomData;
use std::os::fd::{FromRawFd, OwnedFd};

use super::SockType;
use super::Stream;
use super::bound::BoundSocket;
use super::stream::ConnectedStream;
use crate::addr::{Domain, ToSockAddr};
use crate::error::{SocketError, errno};

/// A raw socket that has been created but not yet bound or connected.
///
/// This is the starting point for all socket operations.
/// Use `.bind()` to become a listener.
/// Use `.connect()` to become a connected stream.
pub struct RawSocket<D: Domain, T: SockType> {
	fd: OwnedFd,
	_marker: PhantomData<(D, T)>,
}

impl<D: Domain, T: SockType> RawSocket<D, T> {
	/// Creates a new raw socket.
	///
	/// Calls the `socket()` syscall with the appropriate domain and type.
	/// The socket is created with `SOCK_CLOEXEC` (close on exec).
	pub fn new() -> std::io::Result<Self> {
		let fd = unsafe { libc::socket(D::raw(), T::raw() | libc::SOCK_CLOEXEC, 0) };
		if fd == -1 {
			return Err(SocketError::Create { errno: errno() }.into());
		}
		let fd = unsafe { OwnedFd::from_raw_fd(fd) };

		Ok(Self {
			fd,
			_marker: PhantomData,
		})
	}

	/// Returns the raw file descriptor.
	///
	/// Used internally for syscalls. Does not transfer ownership.
	#[inline]
	pub fn as_raw_fd(&self) -> libc::c_int {
		use std::os::fd::AsRawFd;
		self.fd.as_raw_fd()
	}

	/// Binds the socket to an address.
	///
	/// Consumes self, returns BoundSocket.
	pub fn bind(self, addr: D::Addr) -> std::io::Result<BoundSocket<D, T>>
	where
		D::Addr: ToSockAddr + std::fmt::Debug,
	{
		let result = addr.with_raw(|ptr, len| unsafe { libc::bind(self.as_raw_fd(), ptr, len) });

		match result {
			Some(-1) => Err(SocketError::Bind {
				errno: errno(),
				addr: format!("{:?}", addr),
			}
			.into()),
			Some(_) => Ok(BoundSocket::from_fd(self.into_fd())),
			None => Err(SocketError::InvalidAddress {
				reason: "address too long",
			}
			.into()),
		}
	}

	pub(crate) fn into_fd(self) -> OwnedFd {
		self.fd
	}
}

impl<D: Domain> RawSocket<D, Stream> {
	/// Connects to a remote address, blocking until the handshake completes.
	///
	/// Consumes self, returns a connected stream.
	pub fn connect(self, addr: D::Addr) -> std::io::Result<ConnectedStream<D>>
	where
		D::Addr: ToSockAddr + std::fmt::Debug,
	{
		let result = addr.with_raw(|ptr, len| {
			let result = unsafe { libc::connect(self.as_raw_fd(), ptr, len) };
			if result != -1 {
				return Ok(());
			}
			match errno() {
				// a signal during a blocking connect leaves it in progress
				libc::EINTR => wait_connected(self.as_raw_fd()),
				code => Err(code),
			}
		});

		match result {
			Some(Err(code)) => Err(SocketError::Connect {
				errno: code,
				addr: format!("{:?}", addr),
			}
			.into()),
			Some(Ok(())) => Ok(ConnectedStream::from_fd(self.into_fd())),
			None => Err(SocketError::InvalidAddress {
				reason: "address too long",
			}
			.into()),
		}
	}
}

/// Waits for an interrupted connect to finish and reports its outcome.
fn wait_connected(fd: libc::c_int) -> Result<(), i32> {
	let mut pollfd = libc::pollfd { fd, events: libc::POLLOUT, revents: 0 };
	loop {
		let ready = unsafe { libc::poll(&mut pollfd, 1, -1) };
		if ready == -1 {
			let code = errno();
			if code == libc::EINTR {
				continue;
			}
			return Err(code);
		}
		break;
	}
	let mut error: libc::c_int = 0;
	let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
	let result = unsafe {
		libc::getsockopt(
			fd,
			libc::SOL_SOCKET,
			libc::SO_ERROR,
			&mut error as *mut _ as *mut libc::c_void,
			&mut len,
		)
	};
	if result == -1 {
		return Err(errno());
	}
	if error == 0 { Ok(()) } else { Err(error) }
}

impl<D: Domain, T: SockType> std::os::fd::AsRawFd for RawSocket<D, T> {
	fn as_raw_fd(&self) -> std::os::fd::RawFd {
		std::os::fd::AsRawFd::as_raw_fd(&self.fd)
	}
}

impl<D: Domain, T: SockType> std::os::fd::AsFd for RawSocket<D, T> {
	fn as_fd(&self) -> std::os::fd::BorrowedFd<'_> {
		std::os::fd::AsFd::as_fd(&self.fd)
	}
}
