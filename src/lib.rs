//! Connection-oriented client/server networking over TCP and local sockets.
//!
//! A [`Server`] listens on a TCP port (optionally also on a same-host local
//! socket) or on a local socket alone; a [`Client`] keeps one connection to a
//! server alive, reconnecting as its handler decides. Both run on their own
//! threads and report events through [`ServerHandler`] / [`ClientHandler`].

pub mod socket;
mod addr;
mod backend;
mod client;
mod connection;
mod error;
mod server;
mod signal;
mod timeout;

pub use self::addr::{
	Domain, FromSockAddr, InetAddr, Ipv4, Ipv6, Resolution, SocketAddrV4, SocketAddrV6, ToSockAddr, Unix, UnixAddr,
	loopback_name,
};
pub use self::client::{Client, ClientHandler, ClientOptions};
pub use self::connection::{Connection, ConnectionState, Received};
pub use self::error::{IoError, SocketError, errno};
pub use self::server::{Server, ServerHandler, ServerOptions};
pub use self::socket::{
	BoundSocket, ConnectedStream, ConnectorBuilder, Listener, ListenerBuilder, ReuseConfig, Shutdown,
	SockType, Socket, Stream, TcpConfig,
};
pub use self::timeout::Timeout;
