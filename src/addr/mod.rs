//! Address families and related types.
//!
//! This module defines the three address families supported:
//! - `Ipv4`: Internet Protocol version 4
//! - `Ipv6`: Internet Protocol version 6
//! - `Unix`: Unix domain sockets (local only)

mod ipv4;
mod ipv6;
mod resolve;
mod unix;
pub use self::ipv4::{Ipv4, SocketAddrV4};
pub use self::ipv6::{Ipv6, SocketAddrV6};
pub use self::resolve::{Resolution, loopback_name};
pub use self::unix::{Unix, UnixAddr};

/// Trait for address family markers.
///
/// Each type implementing this trait represents an address family
/// that can be passed to the `socket()` syscall.
pub trait Domain {
	/// The socket address type of this family.
	type Addr;
	/// Returns the libc constant for this address family.
	fn raw() -> libc::c_int;
}

/// Trait for address types that can be converted to raw sockaddr for syscalls.
pub trait ToSockAddr {
	/// Calls the provided closure with a pointer to the raw sockaddr and its size.
	/// Returns None if the address is invalid (e.g., path too long for Unix).
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R;
}

/// Trait for address types that can be created from raw sockaddr.
pub trait FromSockAddr: Sized {
	/// Creates address from raw sockaddr storage.
	///
	/// # Safety
	/// `addr` must point to at least `len` readable bytes of a sockaddr.
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self>;
}

impl FromSockAddr for SocketAddrV4 {
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self> {
		if len < std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t {
			return None;
		}
		let raw = unsafe { &*(addr as *const libc::sockaddr_in) };
		if raw.sin_family != libc::AF_INET as libc::sa_family_t {
			return None;
		}
		Some(Self::from_raw(raw))
	}
}

impl FromSockAddr for SocketAddrV6 {
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self> {
		if len < std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t {
			return None;
		}
		let raw = unsafe { &*(addr as *const libc::sockaddr_in6) };
		if raw.sin6_family != libc::AF_INET6 as libc::sa_family_t {
			return None;
		}
		Some(Self::from_raw(raw))
	}
}

impl FromSockAddr for UnixAddr {
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self> {
		if len < std::mem::size_of::<libc::sa_family_t>() as libc::socklen_t {
			return None;
		}
		let raw = unsafe { &*(addr as *const libc::sockaddr_un) };
		Some(Self::from_raw(raw, len))
	}
}

/// An internet socket address of either family.
///
/// This is what name resolution produces: one candidate per resolved
/// address, tried in order by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InetAddr {
	V4(SocketAddrV4),
	V6(SocketAddrV6),
}

impl InetAddr {
	pub fn port(&self) -> u16 {
		match self {
			Self::V4(addr) => addr.port(),
			Self::V6(addr) => addr.port(),
		}
	}

	pub fn is_loopback(&self) -> bool {
		match self {
			Self::V4(addr) => addr.is_loopback(),
			Self::V6(addr) => addr.is_loopback(),
		}
	}

	/// True if both addresses carry the same IP, ignoring ports.
	pub fn same_ip(&self, other: &Self) -> bool {
		match (self, other) {
			(Self::V4(a), Self::V4(b)) => a.ip() == b.ip(),
			(Self::V6(a), Self::V6(b)) => a.ip() == b.ip(),
			_ => false,
		}
	}
}

impl FromSockAddr for InetAddr {
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self> {
		if addr.is_null() || len < std::mem::size_of::<libc::sa_family_t>() as libc::socklen_t {
			return None;
		}
		match unsafe { (*addr).sa_family } as libc::c_int {
			libc::AF_INET => unsafe { SocketAddrV4::from_sockaddr(addr, len) }.map(Self::V4),
			libc::AF_INET6 => unsafe { SocketAddrV6::from_sockaddr(addr, len) }.map(Self::V6),
			_ => None,
		}
	}
}

impl std::fmt::Display for InetAddr {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::V4(addr) => write!(f, "{}", addr),
			Self::V6(addr) => write!(f, "{}", addr),
		}
	}
}

impl From<SocketAddrV4> for InetAddr {
	fn from(addr: SocketAddrV4) -> Self {
		Self::V4(addr)
	}
}

impl From<SocketAddrV6> for InetAddr {
	fn from(addr: SocketAddrV6) -> Self {
		Self::V6(addr)
	}
}
