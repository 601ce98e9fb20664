use crate::Domain;
use crate::addr::ToSockAddr;

/// IPv4 address family marker.
///
/// Sockets with this domain use 32-bit addresses (e.g., 192.168.1.1).
pub struct Ipv4;

impl Domain for Ipv4 {
	type Addr = SocketAddrV4;

	#[inline]
	fn raw() -> libc::c_int {
		libc::AF_INET
	}
}

/// IPv4 socket address (IP + port).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketAddrV4 {
	ip: [u8; 4],
	port: u16,
}

impl SocketAddrV4 {
	/// Creates a new IPv4 address.
	pub fn new(ip: [u8; 4], port: u16) -> Self {
		Self { ip, port }
	}

	/// The wildcard address `0.0.0.0` on `port`, used by listeners.
	pub fn any(port: u16) -> Self {
		Self { ip: [0; 4], port }
	}

	/// `127.0.0.1` on `port`.
	pub fn localhost(port: u16) -> Self {
		Self { ip: [127, 0, 0, 1], port }
	}

	/// Creates from raw sockaddr_in.
	pub(crate) fn from_raw(raw: &libc::sockaddr_in) -> Self {
		Self {
			ip: raw.sin_addr.s_addr.to_ne_bytes(),
			port: u16::from_be(raw.sin_port),
		}
	}

	/// Returns the IP bytes.
	pub fn ip(&self) -> [u8; 4] {
		self.ip
	}

	/// Returns the port.
	pub fn port(&self) -> u16 {
		self.port
	}

	/// Returns a copy of this address with a different port.
	pub fn with_port(&self, port: u16) -> Self {
		Self { ip: self.ip, port }
	}

	/// True for `127.0.0.0/8`.
	pub fn is_loopback(&self) -> bool {
		self.ip[0] == 127
	}

	/// Converts to the raw sockaddr_in for syscalls.
	pub(crate) fn to_raw(&self) -> libc::sockaddr_in {
		libc::sockaddr_in {
			sin_family: libc::AF_INET as libc::sa_family_t,
			sin_port: self.port.to_be(),
			sin_addr: libc::in_addr {
				s_addr: u32::from_ne_bytes(self.ip),
			},
			sin_zero: [0; 8],
		}
	}
}

impl std::fmt::Display for SocketAddrV4 {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}:{}", std::net::Ipv4Addr::from(self.ip), self.port)
	}
}

impl ToSockAddr for SocketAddrV4 {
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R,
	{
		// sockaddr_in must outlive the syscall, so it stays on this frame
		let raw = self.to_raw();
		let ptr = &raw as *const _ as *const libc::sockaddr;
		let len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
		Some(f(ptr, len))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn raw_conversion_preserves_ip_and_port() {
		let addr = SocketAddrV4::new([192, 168, 1, 20], 8080);
		let raw = addr.to_raw();
		assert_eq!(u16::from_be(raw.sin_port), 8080);
		assert_eq!(SocketAddrV4::from_raw(&raw), addr);
	}

	#[test]
	fn display_and_loopback() {
		assert_eq!(SocketAddrV4::localhost(20000).to_string(), "127.0.0.1:20000");
		assert!(SocketAddrV4::new([127, 4, 5, 6], 1).is_loopback());
		assert!(!SocketAddrV4::new([10, 0, 0, 1], 1).is_loopback());
	}
}
