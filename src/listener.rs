use std::fs;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::path::PathBuf;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::addr::{self, Addr, Scheme};

const BACKLOG: i32 = 128;

/// Keep-alive probing kicks in after five idle minutes and repeats at the
/// same interval.
#[cfg(target_os = "linux")]
const KEEPALIVE_PERIOD: std::time::Duration = std::time::Duration::from_secs(300);

/// A bound, non-blocking listening socket for one listen spec.
pub(crate) struct Listener {
    sock: Socket,
    addr: Addr,
    scheme: Scheme,
    /// Unix socket path to unlink when the listener goes away.
    path: Option<PathBuf>,
}

impl Listener {
    pub(crate) fn bind(spec: &str) -> io::Result<Listener> {
        let (scheme, rest) = addr::parse(spec)?;
        match scheme {
            Scheme::Tcp => Listener::bind_tcp(rest),
            Scheme::Unix => Listener::bind_unix(rest),
        }
    }

    fn bind_tcp(spec: &str) -> io::Result<Listener> {
        let target = addr::resolve_tcp(spec)?;
        let sock = Socket::new(
            Domain::for_address(target),
            Type::STREAM,
            Some(Protocol::TCP),
        )?;
        sock.set_reuse_address(true)?;
        sock.bind(&SockAddr::from(target))?;
        sock.listen(BACKLOG)?;
        sock.set_nonblocking(true)?;
        let local = sock.local_addr()?;
        let addr = Addr::from_sockaddr(&local)
            .ok_or_else(|| io::Error::other("listener reported a non-inet local address"))?;
        Ok(Listener {
            sock,
            addr,
            scheme: Scheme::Tcp,
            path: None,
        })
    }

    fn bind_unix(spec: &str) -> io::Result<Listener> {
        let path = PathBuf::from(spec);
        // A previous run may have left the socket file behind.
        if path.exists()
            && let Err(err) = fs::remove_file(&path)
            && err.kind() != io::ErrorKind::NotFound
        {
            return Err(err);
        }
        let sock = Socket::new(Domain::UNIX, Type::STREAM, None)?;
        sock.bind(&SockAddr::unix(&path)?)?;
        sock.listen(BACKLOG)?;
        sock.set_nonblocking(true)?;
        Ok(Listener {
            sock,
            addr: Addr::Unix(Some(path.clone())),
            scheme: Scheme::Unix,
            path: Some(path),
        })
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.sock.as_raw_fd()
    }

    pub(crate) fn local_addr(&self) -> &Addr {
        &self.addr
    }

    pub(crate) fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub(crate) fn accept(&self) -> io::Result<(Socket, SockAddr)> {
        self.sock.accept()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(path) = &self.path
            && path.exists()
            && let Err(err) = fs::remove_file(path)
        {
            crate::debug!("failed to remove socket file {}: {err}", path.display());
        }
    }
}

/// Prepares a freshly accepted socket for the loop. Failure means the
/// socket must be abandoned before the connection exists.
pub(crate) fn setup_accepted(sock: &Socket, scheme: Scheme) -> io::Result<()> {
    if scheme == Scheme::Tcp {
        set_keepalive(sock)?;
    }
    sock.set_nonblocking(true)
}

#[cfg(target_os = "linux")]
fn set_keepalive(sock: &Socket) -> io::Result<()> {
    let params = socket2::TcpKeepalive::new()
        .with_time(KEEPALIVE_PERIOD)
        .with_interval(KEEPALIVE_PERIOD);
    sock.set_keepalive(true)?;
    sock.set_tcp_keepalive(&params)
}

#[cfg(not(target_os = "linux"))]
fn set_keepalive(_sock: &Socket) -> io::Result<()> {
    // The BSDs are left on the system-wide keep-alive defaults.
    Ok(())
}
