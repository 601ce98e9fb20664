use crate::Domain;
use crate::addr::ToSockAddr;

/// IPv6 address family marker.
///
/// Sockets with this domain use 128-bit addresses (e.g., ::1).
pub struct Ipv6;

impl Domain for Ipv6 {
	type Addr = SocketAddrV6;

	#[inline]
	fn raw() -> libc::c_int {
		libc::AF_INET6
	}
}

/// IPv6 socket address (IP + port + scope).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketAddrV6 {
	ip: [u8; 16],
	port: u16,
	/// Scope ID for link-local addresses (identifies network interface).
	/// Usually 0 unless using link-local addresses like fe80::.
	scope_id: u32,
}

impl SocketAddrV6 {
	/// Creates a new IPv6 address.
	pub fn new(ip: [u8; 16], port: u16) -> Self {
		Self { ip, port, scope_id: 0 }
	}

	/// Creates with explicit scope ID.
	pub fn with_scope(ip: [u8; 16], port: u16, scope_id: u32) -> Self {
		Self { ip, port, scope_id }
	}

	/// Returns the IP bytes.
	pub fn ip(&self) -> [u8; 16] {
		self.ip
	}

	/// Returns the port.
	pub fn port(&self) -> u16 {
		self.port
	}

	/// Returns the scope ID.
	pub fn scope_id(&self) -> u32 {
		self.scope_id
	}

	/// Returns a copy of this address with a different port.
	pub fn with_port(&self, port: u16) -> Self {
		Self { port, ..*self }
	}

	/// True for `::1` and for IPv4-mapped loopback (`::ffff:127.0.0.0/104`).
	pub fn is_loopback(&self) -> bool {
		let (prefix, tail) = self.ip.split_at(10);
		if prefix.iter().any(|&b| b != 0) {
			return false;
		}
		match tail {
			[0, 0, 0, 0, 0, 1] => true,
			[0xff, 0xff, 127, ..] => true,
			_ => false,
		}
	}

	/// Converts to the raw sockaddr_in6 for syscalls.
	pub(crate) fn to_raw(&self) -> libc::sockaddr_in6 {
		libc::sockaddr_in6 {
			sin6_family: libc::AF_INET6 as libc::sa_family_t,
			sin6_port: self.port.to_be(),
			sin6_flowinfo: 0,
			sin6_addr: libc::in6_addr {
				s6_addr: self.ip,
			},
			sin6_scope_id: self.scope_id,
		}
	}

	/// Creates from raw sockaddr_in6.
	pub(crate) fn from_raw(raw: &libc::sockaddr_in6) -> Self {
		Self {
			ip: raw.sin6_addr.s6_addr,
			port: u16::from_be(raw.sin6_port),
			scope_id: raw.sin6_scope_id,
		}
	}
}

impl std::fmt::Display for SocketAddrV6 {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "[{}]:{}", std::net::Ipv6Addr::from(self.ip), self.port)
	}
}

impl ToSockAddr for SocketAddrV6 {
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R,
	{
		let raw = self.to_raw();
		let ptr = &raw as *const _ as *const libc::sockaddr;
		let len = std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t;
		Some(f(ptr, len))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ip(tail: &[u8]) -> [u8; 16] {
		let mut ip = [0u8; 16];
		ip[16 - tail.len()..].copy_from_slice(tail);
		ip
	}

	#[test]
	fn loopback_forms() {
		assert!(SocketAddrV6::new(ip(&[1]), 80).is_loopback());
		assert!(SocketAddrV6::new(ip(&[0xff, 0xff, 127, 0, 0, 9]), 80).is_loopback());
		assert!(!SocketAddrV6::new(ip(&[0xff, 0xff, 10, 0, 0, 1]), 80).is_loopback());
		assert!(!SocketAddrV6::new(ip(&[2]), 80).is_loopback());
	}

	#[test]
	fn display_brackets_the_ip() {
		assert_eq!(SocketAddrV6::new(ip(&[1]), 443).to_string(), "[::1]:443");
	}
}
