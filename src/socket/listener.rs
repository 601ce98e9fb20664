use std::{marker::PhantomData, os::fd::OwnedFd};

use super::stream::ConnectedStream;
use crate::addr::{Domain, FromSockAddr};
use crate::error::{SocketError, errno};

/// A listening socket ready to accept connections.
///
/// Only exists for stream sockets.
/// The type parameter D tracks which address family (Ipv4, Ipv6, Unix).
pub struct Listener<D: Domain> {
    fd: OwnedFd,
    _marker: PhantomData<D>,
}

impl<D: Domain> Listener<D> {
    /// Internal use only: called by BoundSocket::listen()
    pub(crate) fn from_fd(fd: OwnedFd) -> Self {
        Self {
            fd,
            _marker: PhantomData,
        }
    }

    /// Returns the raw file descriptor.
    #[inline]
    pub fn as_raw_fd(&self) -> libc::c_int {
        use std::os::fd::AsRawFd;
        self.fd.as_raw_fd()
    }
}

impl<D: Domain> Listener<D>
where
    D::Addr: FromSockAddr,
{
    /// Accepts one pending connection, returning the client's address.
    ///
    /// Meant to be called once the listener has been reported readable.
    /// The accepted socket is left in blocking mode; callers that must not
    /// block pass `MSG_DONTWAIT` on individual reads.
    ///
    /// Outcomes the caller can simply ignore (a connection reset before it
    /// was accepted, a signal, nothing pending) are reported as variants
    /// rather than errors.
    pub fn try_accept(&self) -> std::io::Result<AcceptResult<D>> {
        use std::os::fd::FromRawFd;

        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

        let fd = unsafe {
            libc::accept4(
                self.as_raw_fd(),
                &mut storage as *mut _ as *mut libc::sockaddr,
                &mut len,
                libc::SOCK_CLOEXEC,
            )
        };

        if fd == -1 {
            let err = errno();
            return match err {
                libc::EAGAIN => Ok(AcceptResult::WouldBlock),
                libc::EINTR => Ok(AcceptResult::Interrupted),
                libc::ECONNABORTED | libc::EPROTO => Ok(AcceptResult::Aborted),
                _ => Err(SocketError::Accept { errno: err }.into()),
            };
        }

        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        let stream = ConnectedStream::from_fd(fd);

        let addr = unsafe {
            D::Addr::from_sockaddr(&storage as *const _ as *const libc::sockaddr, len)
                .ok_or_else(|| SocketError::InvalidAddress {
                    reason: "invalid client address",
                })?
        };

        Ok(AcceptResult::Connection(stream, addr))
    }

    /// Returns the address this listener is bound to.
    ///
    /// For a listener bound to port 0 this reveals the port the kernel chose.
    pub fn local_addr(&self) -> std::io::Result<D::Addr> {
        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

        let result = unsafe {
            libc::getsockname(
                self.as_raw_fd(),
                &mut storage as *mut _ as *mut libc::sockaddr,
                &mut len,
            )
        };

        if result == -1 {
            return Err(SocketError::GetOption { errno: errno(), option: "SO_SOCKNAME" }.into());
        }

        unsafe {
            D::Addr::from_sockaddr(&storage as *const _ as *const libc::sockaddr, len)
                .ok_or_else(|| SocketError::InvalidAddress { reason: "invalid address" }.into())
        }
    }
}

impl<D: Domain> std::os::fd::AsRawFd for Listener<D> {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        std::os::fd::AsRawFd::as_raw_fd(&self.fd)
    }
}

impl<D: Domain> std::os::fd::AsFd for Listener<D> {
    fn as_fd(&self) -> std::os::fd::BorrowedFd<'_> {
        std::os::fd::AsFd::as_fd(&self.fd)
    }
}

/// Result of an accept attempt.
///
/// This enum does **not** represent socket state.
/// It represents the **outcome of a syscall probe**.
///
/// The listener remains in the `Listener<D>` state in all cases.
pub enum AcceptResult<D: Domain>
where
    D::Addr: FromSockAddr,
{
    /// A connection was accepted.
    Connection(ConnectedStream<D>, D::Addr),

    /// No connection is ready at this time.
    WouldBlock,

    /// The accept syscall was interrupted by a signal.
    Interrupted,

    /// The pending connection was reset before it could be accepted.
    Aborted,
}
