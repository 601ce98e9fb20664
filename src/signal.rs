use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// A stop flag that sleeping threads can be woken from.
///
/// Every wait returns early once [`StopSignal::stop`] has been called, so a
/// retry delay never holds up shutdown.
#[derive(Debug, Default)]
pub struct StopSignal {
	stopped: Mutex<bool>,
	cond: Condvar,
}

impl StopSignal {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> MutexGuard<'_, bool> {
		// the flag stays meaningful even if a holder panicked
		self.stopped.lock().unwrap_or_else(PoisonError::into_inner)
	}

	pub fn stop(&self) {
		*self.lock() = true;
		self.cond.notify_all();
	}

	pub fn is_stopped(&self) -> bool {
		*self.lock()
	}

	/// Sleeps for `timeout` (forever if `None`) unless stopped first.
	/// Returns true if the signal was stopped.
	pub fn wait(&self, timeout: Option<Duration>) -> bool {
		let mut stopped = self.lock();
		match timeout {
			None => {
				while !*stopped {
					stopped = self.cond.wait(stopped).unwrap_or_else(PoisonError::into_inner);
				}
			}
			Some(timeout) => {
				let deadline = Instant::now() + timeout;
				while !*stopped {
					let now = Instant::now();
					if now >= deadline {
						break;
					}
					stopped = self
						.cond
						.wait_timeout(stopped, deadline - now)
						.unwrap_or_else(PoisonError::into_inner)
						.0;
				}
			}
		}
		*stopped
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;

	#[test]
	fn bounded_wait_elapses() {
		let signal = StopSignal::new();
		let started = Instant::now();
		assert!(!signal.wait(Some(Duration::from_millis(30))));
		assert!(started.elapsed() >= Duration::from_millis(30));
	}

	#[test]
	fn stop_cuts_a_wait_short() {
		let signal = Arc::new(StopSignal::new());
		let remote = Arc::clone(&signal);
		let started = Instant::now();
		let thread = std::thread::spawn(move || {
			std::thread::sleep(Duration::from_millis(20));
			remote.stop();
		});
		assert!(signal.wait(Some(Duration::from_secs(30))));
		assert!(started.elapsed() < Duration::from_secs(10));
		thread.join().unwrap();
		assert!(signal.is_stopped());
		assert!(signal.wait(None));
	}
}
