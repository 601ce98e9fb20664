//! Readiness polling over `poll(2)`, and an eventfd-backed waker that lets
//! another thread interrupt a blocked poll.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use crate::error::{IoError, SocketError, errno};

/// Events reported for one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness(libc::c_short);

impl Readiness {
	/// Data (or end of stream) can be read without blocking.
	pub fn is_readable(&self) -> bool {
		self.0 & libc::POLLIN != 0
	}

	/// The peer hung up, the socket errored, or the descriptor is invalid.
	pub fn is_closed(&self) -> bool {
		self.0 & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0
	}
}

/// One readiness query over a set of descriptors, all watched for input.
///
/// Rebuilt each iteration by the caller; the set is small and the kernel
/// interface takes a flat array anyway.
#[derive(Debug, Default)]
pub struct PollSet {
	fds: Vec<libc::pollfd>,
}

impl PollSet {
	pub fn with_capacity(capacity: usize) -> Self {
		Self { fds: Vec::with_capacity(capacity) }
	}

	pub fn clear(&mut self) {
		self.fds.clear();
	}

	/// Adds a descriptor and returns its index in this set.
	pub fn push(&mut self, fd: RawFd) -> usize {
		self.fds.push(libc::pollfd { fd, events: libc::POLLIN, revents: 0 });
		self.fds.len() - 1
	}

	pub fn len(&self) -> usize {
		self.fds.len()
	}

	/// Blocks until a descriptor is ready or `timeout` elapses
	/// (`None` waits indefinitely). Returns the number of ready descriptors.
	///
	/// A signal interrupting the wait is reported as zero ready descriptors.
	pub fn wait(&mut self, timeout: Option<Duration>) -> std::io::Result<usize> {
		for pollfd in &mut self.fds {
			pollfd.revents = 0;
		}
		let timeout = match timeout {
			None => -1,
			// round up so a short remaining wait does not turn into a busy spin
			Some(timeout) => libc::c_int::try_from(timeout.as_micros().div_ceil(1000)).unwrap_or(libc::c_int::MAX),
		};
		let ready = unsafe { libc::poll(self.fds.as_mut_ptr(), self.fds.len() as libc::nfds_t, timeout) };
		if ready == -1 {
			let err = errno();
			if err == libc::EINTR {
				return Ok(0);
			}
			return Err(IoError::Poll { errno: err }.into());
		}
		Ok(ready as usize)
	}

	/// Events reported for the descriptor at `index` by the last wait.
	pub fn readiness(&self, index: usize) -> Readiness {
		self.fds.get(index).map(|pollfd| Readiness(pollfd.revents)).unwrap_or_default()
	}

	/// Descriptors with a non-empty readiness, starting at `from`.
	pub fn ready_from(&self, from: usize) -> impl Iterator<Item = (RawFd, Readiness)> + '_ {
		self.fds
			.iter()
			.skip(from)
			.filter(|pollfd| pollfd.revents != 0)
			.map(|pollfd| (pollfd.fd, Readiness(pollfd.revents)))
	}
}

/// Wakes a thread blocked in [`PollSet::wait`] from another thread.
///
/// Backed by a non-blocking eventfd. Nothing ever reads the counter, so once
/// woken the descriptor stays readable until the waker is dropped.
#[derive(Debug)]
pub struct Waker {
	fd: OwnedFd,
}

impl Waker {
	pub fn new() -> std::io::Result<Self> {
		let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
		if fd == -1 {
			return Err(SocketError::Create { errno: errno() }.into());
		}
		Ok(Self { fd: unsafe { OwnedFd::from_raw_fd(fd) } })
	}

	pub fn wake(&self) -> std::io::Result<()> {
		let one: u64 = 1;
		loop {
			let n = unsafe {
				libc::write(self.fd.as_raw_fd(), &one as *const u64 as *const libc::c_void, std::mem::size_of::<u64>())
			};
			if n != -1 {
				return Ok(());
			}
			match errno() {
				libc::EINTR => continue,
				// the counter is saturated, which still leaves it readable
				libc::EAGAIN => return Ok(()),
				err => return Err(IoError::Write { errno: err }.into()),
			}
		}
	}
}

impl AsRawFd for Waker {
	fn as_raw_fd(&self) -> RawFd {
		self.fd.as_raw_fd()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::socket::Socket;
	use std::sync::Arc;
	use std::time::Instant;

	#[test]
	fn times_out_with_nothing_ready() {
		let (a, _b) = Socket::pair().unwrap();
		let mut set = PollSet::with_capacity(1);
		set.push(a.as_raw_fd());
		let started = Instant::now();
		assert_eq!(set.wait(Some(Duration::from_millis(20))).unwrap(), 0);
		assert!(started.elapsed() >= Duration::from_millis(20));
		assert_eq!(set.readiness(0), Readiness::default());
	}

	#[test]
	fn reports_readable_peer() {
		let (a, b) = Socket::pair().unwrap();
		a.send_with_flags(b"x", libc::MSG_NOSIGNAL).unwrap();
		let mut set = PollSet::with_capacity(1);
		set.push(b.as_raw_fd());
		assert_eq!(set.wait(None).unwrap(), 1);
		assert!(set.readiness(0).is_readable());
		assert_eq!(set.ready_from(0).count(), 1);
	}

	#[test]
	fn waker_interrupts_a_blocked_wait() {
		let waker = Arc::new(Waker::new().unwrap());
		let remote = Arc::clone(&waker);
		let thread = std::thread::spawn(move || {
			std::thread::sleep(Duration::from_millis(20));
			remote.wake().unwrap();
		});
		let mut set = PollSet::with_capacity(1);
		set.push(waker.as_raw_fd());
		assert_eq!(set.wait(None).unwrap(), 1);
		assert!(set.readiness(0).is_readable());
		// stays readable once woken
		assert_eq!(set.wait(Some(Duration::ZERO)).unwrap(), 1);
		thread.join().unwrap();
	}
}
