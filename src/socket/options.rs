use std::os::fd::AsRawFd;

use crate::error::{SocketError, errno};

/// Sets an integer-valued socket option.
fn set_int_option<S: AsRawFd>(
	socket: &S,
	level: libc::c_int,
	option: libc::c_int,
	value: libc::c_int,
	name: &'static str,
) -> std::io::Result<()> {
	let result = unsafe {
		libc::setsockopt(
			socket.as_raw_fd(),
			level,
			option,
			&value as *const _ as *const libc::c_void,
			std::mem::size_of::<libc::c_int>() as libc::socklen_t,
		)
	};
	if result == -1 {
		Err(SocketError::SetOption { errno: errno(), option: name }.into())
	} else {
		Ok(())
	}
}

/// Sets SO_REUSEADDR on a socket.
///
/// Allows binding to an address that's in TIME_WAIT state.
/// Essential for server restarts.
pub fn set_reuse_addr<S: AsRawFd>(socket: &S, enable: bool) -> std::io::Result<()> {
	set_int_option(socket, libc::SOL_SOCKET, libc::SO_REUSEADDR, enable as libc::c_int, "SO_REUSEADDR")
}

/// Sets TCP_NODELAY on a socket.
///
/// Disables Nagle's algorithm so small writes go out immediately.
pub fn set_tcp_nodelay<S: AsRawFd>(socket: &S, enable: bool) -> std::io::Result<()> {
	set_int_option(socket, libc::IPPROTO_TCP, libc::TCP_NODELAY, enable as libc::c_int, "TCP_NODELAY")
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::socket::Socket;

	#[test]
	fn reuse_applies_to_live_sockets() {
		let (a, _b) = Socket::pair().unwrap();
		set_reuse_addr(&a, true).unwrap();
	}

	#[test]
	fn tcp_option_on_local_socket_fails_with_errno() {
		let (a, _b) = Socket::pair().unwrap();
		let err = set_tcp_nodelay(&a, true).unwrap_err();
		assert!(err.to_string().contains("TCP_NODELAY"));
	}
}
