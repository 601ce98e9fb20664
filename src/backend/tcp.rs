use std::os::fd::RawFd;

use super::Acceptor;
use crate::addr::{Ipv4, SocketAddrV4};
use crate::connection::{Connection, Side};
use crate::socket::{AcceptResult, Listener, ListenerBuilder, ReuseConfig, TcpConfig};

/// Accepts TCP peers on every IPv4 interface.
pub(crate) struct TcpAcceptor {
	listener: Listener<Ipv4>,
	port: u16,
}

impl TcpAcceptor {
	/// Binds `0.0.0.0:port`; port 0 picks an ephemeral port.
	pub(crate) fn bind(port: u16, backlog: i32) -> std::io::Result<Self> {
		let listener = ListenerBuilder::<Ipv4>::new()
			.reuse(ReuseConfig::new().addr(true))
			.backlog(backlog)
			.bind(SocketAddrV4::any(port))?;
		let port = listener.local_addr()?.port();
		Ok(Self { listener, port })
	}

	/// The port actually bound.
	pub(crate) fn port(&self) -> u16 {
		self.port
	}
}

impl Acceptor for TcpAcceptor {
	fn listener_fd(&self) -> RawFd {
		self.listener.as_raw_fd()
	}

	fn accept(&self) -> std::io::Result<Option<Connection>> {
		match self.listener.try_accept()? {
			AcceptResult::Connection(stream, addr) => {
				if let Err(err) = TcpConfig::new().nodelay(true).apply(&*stream, false) {
					log::debug!("{}: {}", addr, err);
				}
				Ok(Some(Connection::new(addr.to_string(), stream.into_socket(), Side::Server)))
			}
			AcceptResult::Aborted => {
				log::debug!("tcp:{}: pending connection aborted", self.port);
				Ok(None)
			}
			AcceptResult::WouldBlock | AcceptResult::Interrupted => Ok(None),
		}
	}

	fn describe(&self) -> String {
		format!("tcp:{}", self.port)
	}
}
