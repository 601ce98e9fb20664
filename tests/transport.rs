mod common;

use std::sync::Arc;

use common::{
	ClientEvent, Collector, EchoServer, ServerEvent, init_logging, random_bytes, unique_name, wait_for_loopback,
};
use looplane::{Client, ClientOptions, Server, ServerOptions, Timeout, loopback_name};

const BLOCK: usize = 4096;

fn tcp_server(options: ServerOptions) -> (Server, Arc<EchoServer>, u16) {
	let handler = Arc::new(EchoServer::default());
	let server = Server::create_tcp(Arc::clone(&handler), 0, options).unwrap();
	assert!(handler.wait_for(&ServerEvent::Started));
	let port = server.port().unwrap();
	assert_ne!(port, 0);
	(server, handler, port)
}

/// Sends `payload` through a fresh client and checks it comes back intact.
fn echo(connect: impl Fn(Arc<Collector>) -> Client, payload: Vec<u8>) -> Arc<Collector> {
	let handler = Arc::new(Collector::sending(payload.clone()));
	let client = connect(Arc::clone(&handler));
	assert!(handler.received.wait_until(|received| received.len() >= payload.len()));
	drop(client);
	assert!(*handler.received.lock() == payload, "echo differs for {} bytes", payload.len());
	handler
}

#[test]
fn tcp_echo_is_byte_exact_around_the_block_size() {
	init_logging();
	let (_server, _, port) = tcp_server(ServerOptions::new().optimized_loopback(false).buffer_size(BLOCK));
	for size in [1, BLOCK - 1, BLOCK, BLOCK + 1, 7 * BLOCK + 3] {
		let handler = echo(
			|handler| {
				let options = ClientOptions::new().optimized_loopback(false).buffer_size(BLOCK);
				Client::create_tcp(handler, "127.0.0.1", port, options).unwrap()
			},
			random_bytes(size),
		);
		assert_eq!(handler.events()[1], ClientEvent::Connected(format!("127.0.0.1:{}", port)));
	}
}

#[test]
fn local_echo_over_a_filesystem_socket() {
	init_logging();
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("echo.sock");
	let name = path.to_str().unwrap().to_owned();

	let server_handler = Arc::new(EchoServer::default());
	let server = Server::create_local(Arc::clone(&server_handler), &name, ServerOptions::new().buffer_size(BLOCK)).unwrap();
	assert!(server_handler.wait_for(&ServerEvent::Started));
	assert_eq!(server.name().as_deref(), Some(name.as_str()));
	assert_eq!(server.port(), None);
	assert!(path.exists());

	for size in [1, BLOCK, BLOCK + 1, 64 * BLOCK] {
		let handler = echo(
			|handler| Client::create_local(handler, &name, ClientOptions::new().buffer_size(BLOCK)).unwrap(),
			random_bytes(size),
		);
		assert_eq!(handler.events()[1], ClientEvent::Connected(name.clone()));
	}

	drop(server);
	assert!(!path.exists());
	assert_eq!(server_handler.events().last(), Some(&ServerEvent::Stopped));
}

#[test]
fn local_echo_over_an_abstract_name() {
	init_logging();
	let name = unique_name("abstract");
	let server_handler = Arc::new(EchoServer::default());
	let _server = Server::create_local(Arc::clone(&server_handler), &name, ServerOptions::new()).unwrap();
	assert!(server_handler.wait_for(&ServerEvent::Started));

	let handler = echo(
		|handler| Client::create_local(handler, &name, ClientOptions::new()).unwrap(),
		random_bytes(3 * BLOCK),
	);
	assert_eq!(handler.events()[1], ClientEvent::Connected(name.clone()));
}

#[test]
fn same_host_tcp_client_takes_the_loopback_socket() {
	init_logging();
	let (_server, server_handler, port) = tcp_server(ServerOptions::new());
	wait_for_loopback(port);

	let handler = echo(
		|handler| Client::create_tcp(handler, "127.0.0.1", port, ClientOptions::new()).unwrap(),
		random_bytes(BLOCK),
	);
	assert_eq!(handler.events()[1], ClientEvent::Connected(loopback_name(port)));
	assert!(server_handler.wait_for(&ServerEvent::Connected(loopback_name(port))));

	// without the shortcut the same server is reached over TCP
	let handler = echo(
		|handler| {
			Client::create_tcp(handler, "127.0.0.1", port, ClientOptions::new().optimized_loopback(false)).unwrap()
		},
		random_bytes(BLOCK),
	);
	assert_eq!(handler.events()[1], ClientEvent::Connected(format!("127.0.0.1:{}", port)));
}

#[test]
fn one_mebibyte_round_trip_with_graceful_teardown() {
	init_logging();
	const SIZE: usize = 1024 * 1024;
	let (server, server_handler, port) = tcp_server(ServerOptions::new().buffer_size(SIZE));

	let payload = random_bytes(SIZE);
	let handler = Arc::new(Collector::sending(payload.clone()));
	let options = ClientOptions::new().buffer_size(SIZE).disconnect_timeout(Timeout::Infinite);
	let client = Client::create_tcp(Arc::clone(&handler), "localhost", port, options).unwrap();
	assert!(server_handler.received.wait_until(|received| *received == SIZE));

	// returns only once the server has seen our close and closed its side,
	// by which point every echoed byte has been read
	drop(client);
	assert!(*handler.received.lock() == payload);
	assert_eq!(handler.events().last(), Some(&ClientEvent::Stopped));
	assert!(server_handler.events.wait_until(|events| events.iter().any(|e| matches!(e, ServerEvent::Disconnected(_)))));

	drop(server);
	assert_eq!(server_handler.events().last(), Some(&ServerEvent::Stopped));
}
