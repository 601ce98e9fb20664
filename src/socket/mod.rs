mod bound;
mod builder;
mod listener;
mod options;
mod poll;
mod raw;
mod stream;

pub use self::bound::BoundSocket;
pub use self::builder::{ConnectorBuilder, ListenerBuilder, ReuseConfig, TcpConfig};
pub use self::listener::{AcceptResult, Listener};
pub use self::options::{set_reuse_addr, set_tcp_nodelay};
pub use self::poll::{PollSet, Readiness, Waker};
pub use self::raw::RawSocket;
pub use self::stream::{ConnectedStream, Shutdown, Socket};

/// Trait for socket type markers.
///
/// Each type implementing this trait represents a socket type
/// that can be passed to the `socket()` syscall.
pub trait SockType {
	/// Returns the libc constant for this socket type.
	fn raw() -> libc::c_int;
}

/// Stream socket marker.
///
/// Provides reliable, ordered, two-way byte streams.
/// Used for TCP (with Ipv4/Ipv6) or Unix stream sockets.
pub struct Stream;

impl SockType for Stream {
	#[inline]
	fn raw() -> libc::c_int {
		libc::SOCK_STREAM
	}
}
