/// Socket creation/configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("socket() failed: {}", errno_to_str(*.errno))]
    Create { errno: i32 },

    #[error("bind({addr}) failed: {}", errno_to_str(*.errno))]
    Bind { errno: i32, addr: String },

    #[error("listen(backlog={backlog}) failed: {}", errno_to_str(*.errno))]
    Listen { errno: i32, backlog: i32 },

    #[error("connect({addr}) failed: {}", errno_to_str(*.errno))]
    Connect { errno: i32, addr: String },

    #[error("accept() failed: {}", errno_to_str(*.errno))]
    Accept { errno: i32 },

    #[error("setsockopt({option}) failed: {}", errno_to_str(*.errno))]
    SetOption { errno: i32, option: &'static str },

    #[error("getsockopt({option}) failed: {}", errno_to_str(*.errno))]
    GetOption { errno: i32, option: &'static str },

    #[error("invalid address: {reason}")]
    InvalidAddress { reason: &'static str },

    #[error("gethostname() failed: {}", errno_to_str(*.errno))]
    HostName { errno: i32 },
}

/// I/O operation errors.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    #[error("read() failed: {}", errno_to_str(*.errno))]
    Read { errno: i32 },

    #[error("write() failed: {}", errno_to_str(*.errno))]
    Write { errno: i32 },

    #[error("poll() failed: {}", errno_to_str(*.errno))]
    Poll { errno: i32 },

    #[error("shutdown() failed: {}", errno_to_str(*.errno))]
    Shutdown { errno: i32 },

    /// A blocking receive reported `EAGAIN`, which only happens when a
    /// receive timeout has been set on a socket that must never time out.
    #[error("blocking receive timed out")]
    BlockingTimeout,
}

/// Returns current errno value.
#[inline]
pub fn errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

/// Converts errno to human-readable string.
fn errno_to_str(errno: i32) -> String {
    match errno {
        libc::EACCES => "permission denied".into(),
        libc::EADDRINUSE => "address already in use".into(),
        libc::EADDRNOTAVAIL => "address not available".into(),
        libc::EAFNOSUPPORT => "address family not supported".into(),
        libc::EAGAIN => "resource temporarily unavailable".into(),
        libc::EBADF => "bad file descriptor".into(),
        libc::ECONNABORTED => "connection aborted".into(),
        libc::ECONNREFUSED => "connection refused".into(),
        libc::ECONNRESET => "connection reset by peer".into(),
        libc::EINPROGRESS => "operation in progress".into(),
        libc::EINTR => "interrupted by signal".into(),
        libc::EINVAL => "invalid argument".into(),
        libc::EMFILE => "too many open files".into(),
        libc::ENETUNREACH => "network unreachable".into(),
        libc::ENOBUFS => "no buffer space available".into(),
        libc::ENOENT => "no such file or directory".into(),
        libc::ENOTCONN => "not connected".into(),
        libc::EPIPE => "broken pipe".into(),
        libc::ETIMEDOUT => "connection timed out".into(),
        _ => format!("errno {}", errno),
    }
}

/// Maps errno to std::io::ErrorKind.
fn errno_to_kind(errno: i32) -> std::io::ErrorKind {
    match errno {
        libc::EACCES | libc::EPERM => std::io::ErrorKind::PermissionDenied,
        libc::EADDRINUSE => std::io::ErrorKind::AddrInUse,
        libc::EADDRNOTAVAIL => std::io::ErrorKind::AddrNotAvailable,
        libc::EAGAIN => std::io::ErrorKind::WouldBlock,
        libc::ECONNABORTED => std::io::ErrorKind::ConnectionAborted,
        libc::ECONNREFUSED => std::io::ErrorKind::ConnectionRefused,
        libc::ECONNRESET => std::io::ErrorKind::ConnectionReset,
        libc::EINTR => std::io::ErrorKind::Interrupted,
        libc::EINVAL => std::io::ErrorKind::InvalidInput,
        libc::ENOENT => std::io::ErrorKind::NotFound,
        libc::ENOTCONN => std::io::ErrorKind::NotConnected,
        libc::EPIPE => std::io::ErrorKind::BrokenPipe,
        libc::ETIMEDOUT => std::io::ErrorKind::TimedOut,
        _ => std::io::ErrorKind::Other,
    }
}

impl From<SocketError> for std::io::Error {
    fn from(err: SocketError) -> Self {
        let errno = match &err {
            SocketError::Create { errno } => *errno,
            SocketError::Bind { errno, .. } => *errno,
            SocketError::Listen { errno, .. } => *errno,
            SocketError::Connect { errno, .. } => *errno,
            SocketError::Accept { errno } => *errno,
            SocketError::SetOption { errno, .. } => *errno,
            SocketError::GetOption { errno, .. } => *errno,
            SocketError::InvalidAddress { .. } => libc::EINVAL,
            SocketError::HostName { errno } => *errno,
        };
        std::io::Error::new(errno_to_kind(errno), err)
    }
}

impl From<IoError> for std::io::Error {
    fn from(err: IoError) -> Self {
        let kind = match &err {
            IoError::Read { errno } => errno_to_kind(*errno),
            IoError::Write { errno } => errno_to_kind(*errno),
            IoError::Poll { errno } => errno_to_kind(*errno),
            IoError::Shutdown { errno } => errno_to_kind(*errno),
            IoError::BlockingTimeout => std::io::ErrorKind::TimedOut,
        };
        std::io::Error::new(kind, err)
    }
}

/// Recovers the errno carried by an error produced by this crate.
///
/// Falls back to the OS error code, then to `EIO`.
pub(crate) fn errno_of(err: &std::io::Error) -> i32 {
    if let Some(inner) = err.get_ref() {
        if let Some(socket) = inner.downcast_ref::<SocketError>() {
            match socket {
                SocketError::Create { errno }
                | SocketError::Bind { errno, .. }
                | SocketError::Listen { errno, .. }
                | SocketError::Connect { errno, .. }
                | SocketError::Accept { errno }
                | SocketError::SetOption { errno, .. }
                | SocketError::GetOption { errno, .. }
                | SocketError::HostName { errno } => return *errno,
                SocketError::InvalidAddress { .. } => return libc::EINVAL,
            }
        }
        if let Some(io) = inner.downcast_ref::<IoError>() {
            match io {
                IoError::Read { errno }
                | IoError::Write { errno }
                | IoError::Poll { errno }
                | IoError::Shutdown { errno } => return *errno,
                IoError::BlockingTimeout => {}
            }
        }
    }
    err.raw_os_error().unwrap_or(libc::EIO)
}

fn socket_error(err: &std::io::Error) -> Option<&SocketError> {
    err.get_ref()?.downcast_ref::<SocketError>()
}

/// True for a `connect()` that the peer or network turned down, as opposed to
/// a failure to create or configure the socket itself.
pub(crate) fn is_connect_failure(err: &std::io::Error) -> bool {
    matches!(socket_error(err), Some(SocketError::Connect { .. }))
}

/// True for a `bind()` or `listen()` that failed on an otherwise usable socket.
pub(crate) fn is_bind_failure(err: &std::io::Error) -> bool {
    matches!(socket_error(err), Some(SocketError::Bind { .. } | SocketError::Listen { .. }))
}
