//! Host name resolution and the same-machine check behind the loopback
//! shortcut.

use std::ffi::CString;

use super::{FromSockAddr, InetAddr};
use crate::error::{SocketError, errno};

/// Local socket name that a TCP server on `port` also listens on when
/// optimized loopback is enabled.
pub fn loopback_name(port: u16) -> String {
	format!("@looplane.{}", port)
}

/// Candidate addresses for one connection attempt.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
	addresses: Vec<InetAddr>,
	local: bool,
}

impl Resolution {
	/// Resolves `host`, stamping every candidate with `port`.
	///
	/// A host that fails to resolve yields an empty resolution rather than
	/// an error, so it goes through the ordinary connect-failure path.
	pub fn resolve(host: &str, port: u16) -> std::io::Result<Self> {
		let addresses: Vec<InetAddr> = lookup(host)
			.into_iter()
			.map(|addr| match addr {
				InetAddr::V4(v4) => InetAddr::V4(v4.with_port(port)),
				InetAddr::V6(v6) => InetAddr::V6(v6.with_port(port)),
			})
			.collect();
		let local = if addresses.is_empty() {
			false
		} else if addresses.iter().any(InetAddr::is_loopback) {
			true
		} else {
			let own = lookup(&host_name()?);
			addresses.iter().any(|addr| own.iter().any(|mine| mine.same_ip(addr)))
		};
		log::trace!("resolved {} to {} address(es), local={}", host, addresses.len(), local);
		Ok(Self { addresses, local })
	}

	/// Candidates in resolver order.
	pub fn addresses(&self) -> &[InetAddr] {
		&self.addresses
	}

	/// True if the host is this machine, so a local socket can stand in for TCP.
	pub fn is_local(&self) -> bool {
		self.local
	}
}

/// Owns a `getaddrinfo` result list.
struct AddrInfoList(*mut libc::addrinfo);

impl Drop for AddrInfoList {
	fn drop(&mut self) {
		if !self.0.is_null() {
			unsafe { libc::freeaddrinfo(self.0) };
		}
	}
}

fn lookup(host: &str) -> Vec<InetAddr> {
	let Ok(c_host) = CString::new(host) else {
		return Vec::new();
	};
	let mut hints: libc::addrinfo = unsafe { std::mem::zeroed() };
	hints.ai_family = libc::AF_UNSPEC;
	// Without a socket type getaddrinfo repeats each address once per type.
	hints.ai_socktype = libc::SOCK_STREAM;

	let mut list = AddrInfoList(std::ptr::null_mut());
	let result = unsafe { libc::getaddrinfo(c_host.as_ptr(), std::ptr::null(), &hints, &mut list.0) };
	if result != 0 {
		log::debug!("getaddrinfo({}) failed with code {}", host, result);
		return Vec::new();
	}

	let mut addresses = Vec::new();
	let mut cursor = list.0 as *const libc::addrinfo;
	while !cursor.is_null() {
		let info = unsafe { &*cursor };
		if let Some(addr) = unsafe { InetAddr::from_sockaddr(info.ai_addr, info.ai_addrlen) } {
			addresses.push(addr);
		}
		cursor = info.ai_next;
	}
	addresses
}

fn host_name() -> std::io::Result<String> {
	let mut buffer = [0u8; 256];
	let result = unsafe { libc::gethostname(buffer.as_mut_ptr() as *mut libc::c_char, buffer.len()) };
	if result == -1 {
		return Err(SocketError::HostName { errno: errno() }.into());
	}
	// the name may be silently truncated without a terminator
	let end = buffer.iter().position(|&b| b == 0).unwrap_or(buffer.len());
	Ok(String::from_utf8_lossy(&buffer[..end]).into_owned())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn numeric_loopback_is_local() {
		let resolution = Resolution::resolve("127.0.0.1", 4242).unwrap();
		assert_eq!(resolution.addresses().len(), 1);
		assert_eq!(resolution.addresses()[0].to_string(), "127.0.0.1:4242");
		assert!(resolution.is_local());
	}

	#[test]
	fn unresolvable_host_is_empty() {
		let resolution = Resolution::resolve("host.invalid", 1).unwrap();
		assert!(resolution.addresses().is_empty());
		assert!(!resolution.is_local());
	}

	#[test]
	fn loopback_name_tracks_port() {
		assert_eq!(loopback_name(20000), "@looplane.20000");
	}
}
