use crate::Domain;
use crate::addr::ToSockAddr;
use crate::error::SocketError;

/// Unix domain socket marker.
///
/// Sockets with this domain use filesystem paths (e.g., /tmp/app.sock)
/// or Linux abstract names. Only works on the same machine.
pub struct Unix;

/// Unix domain socket address (file path or abstract).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnixAddr {
	path: Vec<u8>,
	/// True if this is an abstract socket (Linux-only, no filesystem entry).
	is_abstract: bool,
}

/// Offset of `sun_path` inside `sockaddr_un`.
const PATH_OFFSET: usize = std::mem::offset_of!(libc::sockaddr_un, sun_path);

/// Capacity of `sun_path`.
const PATH_CAPACITY: usize = std::mem::size_of::<libc::sockaddr_un>() - PATH_OFFSET;

impl UnixAddr {
	/// Creates a new Unix address from a filesystem path.
	pub fn new<P: AsRef<[u8]>>(path: P) -> Self {
		Self {
			path: path.as_ref().to_vec(),
			is_abstract: false,
		}
	}

	/// Creates an abstract socket address (Linux-only).
	///
	/// Abstract sockets exist only in memory, with no filesystem entry, and
	/// vanish when the last descriptor bound to them closes.
	pub fn abstract_socket<P: AsRef<[u8]>>(name: P) -> Self {
		Self {
			path: name.as_ref().to_vec(),
			is_abstract: true,
		}
	}

	/// Parses a local socket name.
	///
	/// - `/some/path` names a filesystem socket.
	/// - `@name` names the abstract socket `name`.
	/// - any other non-empty string names the abstract socket of that name.
	///
	/// Empty names, and names too long for `sun_path`, are rejected.
	pub fn from_name(name: &str) -> std::io::Result<Self> {
		if name.is_empty() {
			return Err(SocketError::InvalidAddress { reason: "empty local socket name" }.into());
		}
		let addr = if name.starts_with('/') {
			Self::new(name)
		} else if let Some(stripped) = name.strip_prefix('@') {
			if stripped.is_empty() {
				return Err(SocketError::InvalidAddress { reason: "empty abstract socket name" }.into());
			}
			Self::abstract_socket(stripped)
		} else {
			Self::abstract_socket(name)
		};
		if addr.raw_len().is_none() {
			return Err(SocketError::InvalidAddress { reason: "local socket name too long" }.into());
		}
		Ok(addr)
	}

	/// Returns true if this is an abstract socket.
	pub fn is_abstract(&self) -> bool {
		self.is_abstract
	}

	/// Returns the path bytes.
	pub fn path(&self) -> &[u8] {
		&self.path
	}

	/// Filesystem path of a non-abstract address.
	pub fn fs_path(&self) -> Option<&std::path::Path> {
		use std::os::unix::ffi::OsStrExt;
		if self.is_abstract || self.path.is_empty() {
			return None;
		}
		Some(std::path::Path::new(std::ffi::OsStr::from_bytes(&self.path)))
	}

	/// Significant length of the raw address, or `None` if it doesn't fit.
	fn raw_len(&self) -> Option<usize> {
		// "\0<name>" for abstract sockets, "<path>\0" for filesystem ones
		if self.path.len() + 1 > PATH_CAPACITY {
			return None;
		}
		Some(PATH_OFFSET + self.path.len() + 1)
	}

	/// Converts to the raw sockaddr_un for syscalls.
	pub(crate) fn to_raw(&self) -> Option<(libc::sockaddr_un, libc::socklen_t)> {
		let len = self.raw_len()?;
		let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
		addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
		// sun_path[0] stays 0 for abstract sockets
		let start = usize::from(self.is_abstract);
		for (i, &byte) in self.path.iter().enumerate() {
			addr.sun_path[start + i] = byte as libc::c_char;
		}
		Some((addr, len as libc::socklen_t))
	}

	/// Creates from raw sockaddr_un of the given significant length.
	pub(crate) fn from_raw(raw: &libc::sockaddr_un, len: libc::socklen_t) -> Self {
		let len = (len as usize).saturating_sub(PATH_OFFSET).min(PATH_CAPACITY);
		let bytes: Vec<u8> = raw.sun_path[..len].iter().map(|&c| c as u8).collect();
		match bytes.split_first() {
			// unnamed (e.g. the peer of an accepted connection)
			None => Self { path: Vec::new(), is_abstract: false },
			Some((&0, name)) => Self { path: name.to_vec(), is_abstract: true },
			Some(_) => {
				let end = bytes.iter().position(|&c| c == 0).unwrap_or(bytes.len());
				Self { path: bytes[..end].to_vec(), is_abstract: false }
			}
		}
	}
}

impl std::fmt::Display for UnixAddr {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = String::from_utf8_lossy(&self.path);
		if self.is_abstract {
			write!(f, "@{}", name)
		} else if self.path.is_empty() {
			f.write_str("(unnamed)")
		} else {
			f.write_str(&name)
		}
	}
}

impl ToSockAddr for UnixAddr {
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R,
	{
		let (raw, len) = self.to_raw()?;
		let ptr = &raw as *const _ as *const libc::sockaddr;
		Some(f(ptr, len))
	}
}

impl Domain for Unix {
	type Addr = UnixAddr;

	#[inline]
	fn raw() -> libc::c_int {
		libc::AF_UNIX
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn name_forms() {
		let path = UnixAddr::from_name("/tmp/looplane.sock").unwrap();
		assert!(!path.is_abstract());
		assert_eq!(path.to_string(), "/tmp/looplane.sock");

		let sigil = UnixAddr::from_name("@bus").unwrap();
		assert!(sigil.is_abstract());
		assert_eq!(sigil.path(), b"bus");

		let bare = UnixAddr::from_name("bus").unwrap();
		assert_eq!(bare, sigil);
		assert_eq!(bare.to_string(), "@bus");
	}

	#[test]
	fn invalid_names_are_rejected() {
		assert!(UnixAddr::from_name("").is_err());
		assert!(UnixAddr::from_name("@").is_err());
		let long = "x".repeat(PATH_CAPACITY);
		let err = UnixAddr::from_name(&long).unwrap_err();
		assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
		assert!(UnixAddr::from_name(&"x".repeat(PATH_CAPACITY - 1)).is_ok());
	}

	#[test]
	fn raw_round_trip_uses_significant_length() {
		let addr = UnixAddr::abstract_socket("looplane.7");
		let (raw, len) = addr.to_raw().unwrap();
		assert_eq!(len as usize, PATH_OFFSET + 1 + "looplane.7".len());
		assert_eq!(UnixAddr::from_raw(&raw, len), addr);

		let addr = UnixAddr::new("/run/x.sock");
		let (raw, len) = addr.to_raw().unwrap();
		assert_eq!(UnixAddr::from_raw(&raw, len), addr);
		assert_eq!(addr.fs_path(), Some(std::path::Path::new("/run/x.sock")));
	}
}
