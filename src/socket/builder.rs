use std::fmt::Debug;
use std::marker::PhantomData;
use std::os::fd::AsRawFd;

use super::{BoundSocket, ConnectedStream, Listener, RawSocket, Stream, set_reuse_addr, set_tcp_nodelay};
use crate::addr::{Domain, ToSockAddr};

/// Address reuse configuration. Only meaningful for internet sockets.
#[derive(Debug, Clone, Copy)]
pub struct ReuseConfig {
	pub addr: bool,
}

impl Default for ReuseConfig {
	fn default() -> Self {
		// a restarted server must not wait out TIME_WAIT
		Self { addr: true }
	}
}

impl ReuseConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn addr(mut self, enable: bool) -> Self {
		self.addr = enable;
		self
	}

	fn apply<S: AsRawFd>(&self, socket: &S, is_unix: bool) -> std::io::Result<()> {
		if !is_unix && self.addr {
			set_reuse_addr(socket, true)?;
		}
		Ok(())
	}
}

/// TCP-specific configuration.
#[derive(Debug, Clone, Copy)]
pub struct TcpConfig {
	pub nodelay: bool,
}

impl Default for TcpConfig {
	fn default() -> Self {
		// low latency by default
		Self { nodelay: true }
	}
}

impl TcpConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn nodelay(mut self, enable: bool) -> Self {
		self.nodelay = enable;
		self
	}

	pub(crate) fn apply<S: AsRawFd>(&self, socket: &S, is_unix: bool) -> std::io::Result<()> {
		if !is_unix && self.nodelay {
			set_tcp_nodelay(socket, true)?;
		}
		Ok(())
	}
}

/// Builder for TCP/Unix stream listeners.
///
/// # Example
/// ```ignore
/// use looplane::{Ipv4, SocketAddrV4, ListenerBuilder, ReuseConfig};
///
/// let listener = ListenerBuilder::<Ipv4>::new()
///     .reuse(ReuseConfig::new().addr(true))
///     .backlog(16)
///     .bind(SocketAddrV4::any(8080))?;
/// ```
pub struct ListenerBuilder<D: Domain> {
	reuse: ReuseConfig,
	tcp: TcpConfig,
	backlog: i32,
	_marker: PhantomData<D>,
}

impl<D: Domain> Default for ListenerBuilder<D> {
	fn default() -> Self {
		Self::new()
	}
}

impl<D: Domain> ListenerBuilder<D> {
	pub fn new() -> Self {
		Self {
			reuse: ReuseConfig::default(),
			tcp: TcpConfig::default(),
			backlog: 16,
			_marker: PhantomData,
		}
	}

	/// Set address reuse options (ignored for Unix sockets).
	pub fn reuse(mut self, config: ReuseConfig) -> Self {
		self.reuse = config;
		self
	}

	/// Set TCP options (ignored for Unix sockets).
	pub fn tcp(mut self, config: TcpConfig) -> Self {
		self.tcp = config;
		self
	}

	/// Set listen backlog. Default: 16.
	pub fn backlog(mut self, backlog: i32) -> Self {
		self.backlog = backlog;
		self
	}

	/// Binds and starts listening.
	pub fn bind(self, addr: D::Addr) -> std::io::Result<Listener<D>>
	where
		D::Addr: ToSockAddr + Debug,
	{
		let backlog = self.backlog;
		self.bind_only(addr)?.listen(backlog)
	}

	/// Binds without listening, claiming the address while connection
	/// attempts are still refused. [`BoundSocket::listen`] opens it up.
	pub fn bind_only(self, addr: D::Addr) -> std::io::Result<BoundSocket<D, Stream>>
	where
		D::Addr: ToSockAddr + Debug,
	{
		let socket = RawSocket::<D, Stream>::new()?;
		let is_unix = D::raw() == libc::AF_UNIX;

		self.reuse.apply(&socket, is_unix)?;
		self.tcp.apply(&socket, is_unix)?;

		socket.bind(addr)
	}
}

/// Builder for outgoing TCP/Unix stream connections.
pub struct ConnectorBuilder<D: Domain> {
	tcp: TcpConfig,
	_marker: PhantomData<D>,
}

impl<D: Domain> Default for ConnectorBuilder<D> {
	fn default() -> Self {
		Self::new()
	}
}

impl<D: Domain> ConnectorBuilder<D> {
	pub fn new() -> Self {
		Self {
			tcp: TcpConfig::default(),
			_marker: PhantomData,
		}
	}

	/// Set TCP options (ignored for Unix sockets).
	pub fn tcp(mut self, config: TcpConfig) -> Self {
		self.tcp = config;
		self
	}

	/// Connects to the remote address, blocking until established or refused.
	pub fn connect(self, addr: D::Addr) -> std::io::Result<ConnectedStream<D>>
	where
		D::Addr: ToSockAddr + Debug,
	{
		let socket = RawSocket::<D, Stream>::new()?;
		self.tcp.apply(&socket, D::raw() == libc::AF_UNIX)?;
		socket.connect(addr)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::addr::{Ipv4, SocketAddrV4, Unix, UnixAddr};

	#[test]
	fn connector_reaches_listener() {
		let listener = ListenerBuilder::<Ipv4>::new().backlog(4).bind(SocketAddrV4::localhost(0)).unwrap();
		let addr = listener.local_addr().unwrap();
		let stream = ConnectorBuilder::<Ipv4>::new().connect(addr).unwrap();
		assert_eq!(stream.peer_addr().unwrap(), addr);
	}

	#[test]
	fn refused_connect_is_a_connect_error() {
		let addr = UnixAddr::from_name(&format!("@looplane.builder.{}", std::process::id())).unwrap();
		let err = ConnectorBuilder::<Unix>::new().connect(addr).err().unwrap();
		assert!(crate::error::is_connect_failure(&err));
		assert_eq!(err.kind(), std::io::ErrorKind::ConnectionRefused);
	}
}
