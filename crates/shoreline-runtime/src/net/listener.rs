//! Listening socket setup and accept error policy

use std::io;
use std::mem;
use std::net::{SocketAddr, TcpListener};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use shoreline_core::{Result, ShorelineError};

/// Create, configure, bind and listen.
///
/// IPv6 sockets are dual-stack (`IPV6_V6ONLY` off), so `[::]` also
/// accepts IPv4 clients.
pub fn bind(addr: SocketAddr, backlog: i32) -> Result<TcpListener> {
    let domain = match addr {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    };

    cfg_if::cfg_if! {
        if #[cfg(any(target_os = "linux", target_os = "android"))] {
            let ty = libc::SOCK_STREAM | libc::SOCK_CLOEXEC;
        } else {
            let ty = libc::SOCK_STREAM;
        }
    }

    let fd = unsafe { libc::socket(domain, ty, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error().into());
    }
    // SAFETY: fd is a freshly created socket we own
    let socket = unsafe { OwnedFd::from_raw_fd(fd) };

    set_option(&socket, libc::SOL_SOCKET, libc::SO_REUSEADDR, 1)?;
    if domain == libc::AF_INET6 {
        set_option(&socket, libc::IPPROTO_IPV6, libc::IPV6_V6ONLY, 0)?;
    }

    let (storage, len) = to_sockaddr(&addr);
    let ret = unsafe {
        libc::bind(
            socket.as_raw_fd(),
            &storage as *const libc::sockaddr_storage as *const libc::sockaddr,
            len,
        )
    };
    if ret != 0 {
        return Err(bind_error(addr, io::Error::last_os_error()));
    }

    if unsafe { libc::listen(socket.as_raw_fd(), backlog) } != 0 {
        return Err(io::Error::last_os_error().into());
    }

    Ok(TcpListener::from(socket))
}

/// An address that cannot be bound is a configuration problem, not a
/// transport failure.
fn bind_error(addr: SocketAddr, err: io::Error) -> ShorelineError {
    let unusable = matches!(err.kind(), io::ErrorKind::AddrInUse | io::ErrorKind::AddrNotAvailable)
        || err.raw_os_error() == Some(libc::EINVAL);
    if unusable {
        ShorelineError::config(format!("cannot bind {addr}: {err}"))
    } else {
        err.into()
    }
}

/// Wake every thread blocked in `accept` on `listener`; they get an error.
pub fn shutdown(listener: &TcpListener) {
    if let Err(err) = listener.set_nonblocking(true) {
        tracing::warn!(%err, "could not make listener non-blocking");
    }
    if unsafe { libc::shutdown(listener.as_raw_fd(), libc::SHUT_RDWR) } != 0 {
        let err = io::Error::last_os_error();
        // Some platforms refuse shutdown on listening sockets
        tracing::debug!(%err, "listener shutdown");
    }
}

/// What an acceptor does after `accept` failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptAction {
    /// The failure concerned one client only
    Retry,
    /// Out of descriptors or memory; wait a little
    Backoff,
    /// The listening socket is unusable
    Fatal,
}

pub fn classify_accept_error(err: &io::Error) -> AcceptAction {
    match err.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => return AcceptAction::Retry,
        _ => {}
    }
    match err.raw_os_error() {
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM) => AcceptAction::Backoff,
        Some(libc::EPROTO | libc::EPERM) => AcceptAction::Retry,
        _ => AcceptAction::Fatal,
    }
}

fn set_option(socket: &OwnedFd, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> io::Result<()> {
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            name,
            &value as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn to_sockaddr(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    // SAFETY: sockaddr_storage is plain data, all-zero is valid
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(v4) => {
            let sin = unsafe { &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in) };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_port = v4.port().to_be();
            sin.sin_addr = libc::in_addr {
                s_addr: u32::from_ne_bytes(v4.ip().octets()),
            };
            mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(v6) => {
            let sin6 = unsafe { &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in6) };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = v6.port().to_be();
            sin6.sin6_flowinfo = v6.flowinfo();
            sin6.sin6_addr = libc::in6_addr {
                s6_addr: v6.ip().octets(),
            };
            sin6.sin6_scope_id = v6.scope_id();
            mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as libc::socklen_t)
}
