use std::os::fd::RawFd;
use std::path::PathBuf;

use super::Acceptor;
use crate::addr::{Unix, UnixAddr};
use crate::connection::{Connection, Side};
use crate::socket::{AcceptResult, BoundSocket, Listener, ListenerBuilder, Stream};

/// Accepts peers on a local (Unix domain) socket.
pub(crate) struct LocalAcceptor {
	listener: Listener<Unix>,
	name: String,
	_reclaim: ReclaimGuard,
}

impl LocalAcceptor {
	pub(crate) fn bind(addr: &UnixAddr, backlog: i32) -> std::io::Result<Self> {
		Self::reserve(addr)?.listen(backlog)
	}

	/// Claims the name without accepting yet: connection attempts are
	/// refused until [`ReservedName::listen`].
	pub(crate) fn reserve(addr: &UnixAddr) -> std::io::Result<ReservedName> {
		let socket = ListenerBuilder::<Unix>::new().bind_only(addr.clone())?;
		Ok(ReservedName {
			socket,
			name: addr.to_string(),
			reclaim: ReclaimGuard(addr.fs_path().map(PathBuf::from)),
		})
	}
}

/// A bound local socket that is not listening yet.
pub(crate) struct ReservedName {
	socket: BoundSocket<Unix, Stream>,
	name: String,
	reclaim: ReclaimGuard,
}

impl ReservedName {
	pub(crate) fn name(&self) -> &str {
		&self.name
	}

	pub(crate) fn listen(self, backlog: i32) -> std::io::Result<LocalAcceptor> {
		let Self { socket, name, reclaim } = self;
		Ok(LocalAcceptor {
			listener: socket.listen(backlog)?,
			name,
			_reclaim: reclaim,
		})
	}
}

impl Acceptor for LocalAcceptor {
	fn listener_fd(&self) -> RawFd {
		self.listener.as_raw_fd()
	}

	fn accept(&self) -> std::io::Result<Option<Connection>> {
		match self.listener.try_accept()? {
			// local peers are normally unnamed, so they go by the listener's name
			AcceptResult::Connection(stream, _) => {
				Ok(Some(Connection::new(self.name.clone(), stream.into_socket(), Side::Server)))
			}
			AcceptResult::Aborted => {
				log::debug!("{}: pending connection aborted", self.name);
				Ok(None)
			}
			AcceptResult::WouldBlock | AcceptResult::Interrupted => Ok(None),
		}
	}

	fn describe(&self) -> String {
		format!("local:{}", self.name)
	}
}

/// Removes a filesystem socket once its listener is gone; abstract names
/// need no cleanup.
#[derive(Debug)]
struct ReclaimGuard(Option<PathBuf>);

impl Drop for ReclaimGuard {
	fn drop(&mut self) {
		if let Some(path) = self.0.take() {
			if let Err(err) = std::fs::remove_file(&path) {
				log::debug!("failed to remove {}: {}", path.display(), err);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn socket_file_is_removed_with_the_acceptor() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("reclaim.sock");
		let addr = UnixAddr::from_name(path.to_str().unwrap()).unwrap();
		let acceptor = LocalAcceptor::bind(&addr, 4).unwrap();
		assert!(path.exists());
		assert_eq!(acceptor.describe(), format!("local:{}", path.display()));
		drop(acceptor);
		assert!(!path.exists());
	}

	#[test]
	fn reserved_name_refuses_until_listening() {
		let name = format!("@looplane.reserve.{}", std::process::id());
		let addr = UnixAddr::from_name(&name).unwrap();
		let reserved = LocalAcceptor::reserve(&addr).unwrap();
		assert_eq!(reserved.name(), name);

		let connect = || crate::socket::ConnectorBuilder::<Unix>::new().connect(addr.clone());
		assert!(connect().is_err());
		let acceptor = reserved.listen(4).unwrap();
		let _stream = connect().unwrap();
		assert!(acceptor.accept().unwrap().is_some());
	}

	#[test]
	fn abstract_names_cannot_be_bound_twice() {
		let addr = UnixAddr::from_name(&format!("@looplane.test.{}", std::process::id())).unwrap();
		let _first = LocalAcceptor::bind(&addr, 4).unwrap();
		let err = LocalAcceptor::bind(&addr, 4).err().unwrap();
		assert_eq!(err.kind(), std::io::ErrorKind::AddrInUse);
	}
}
