use std::time::Duration;

/// A wait bound in milliseconds.
///
/// Built from the signed convention used throughout the engines: negative is
/// [`Timeout::Infinite`], zero is [`Timeout::Immediate`], positive is a
/// bounded wait. Where a timeout decides whether to retry (reconnect,
/// relisten) `Infinite` means "do not retry"; where it bounds a teardown it
/// means "wait for as long as it takes".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeout {
	Infinite,
	Immediate,
	Millis(u32),
}

impl Timeout {
	pub fn from_millis(millis: i64) -> Self {
		match millis {
			n if n < 0 => Self::Infinite,
			0 => Self::Immediate,
			n => Self::Millis(u32::try_from(n).unwrap_or(u32::MAX)),
		}
	}

	/// The signed millisecond form, `-1` for `Infinite`.
	pub fn as_millis(&self) -> i64 {
		match self {
			Self::Infinite => -1,
			Self::Immediate => 0,
			Self::Millis(n) => i64::from(*n),
		}
	}

	/// `None` for `Infinite`.
	pub fn as_duration(&self) -> Option<Duration> {
		match self {
			Self::Infinite => None,
			Self::Immediate => Some(Duration::ZERO),
			Self::Millis(n) => Some(Duration::from_millis(u64::from(*n))),
		}
	}

	pub fn is_infinite(&self) -> bool {
		matches!(self, Self::Infinite)
	}

	pub fn is_immediate(&self) -> bool {
		matches!(self, Self::Immediate | Self::Millis(0))
	}
}

impl From<Duration> for Timeout {
	fn from(duration: Duration) -> Self {
		if duration.is_zero() {
			Self::Immediate
		} else {
			Self::Millis(u32::try_from(duration.as_millis()).unwrap_or(u32::MAX))
		}
	}
}

impl std::fmt::Display for Timeout {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Infinite => write!(f, "infinite"),
			Self::Immediate => write!(f, "0ms"),
			Self::Millis(n) => write!(f, "{}ms", n),
		}
	}
}
