use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

use socket2::{Domain, SockAddr};

/// Address of a listener or of one end of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addr {
    Tcp(SocketAddr),
    /// Unix-domain address; `None` for unnamed peer sockets.
    Unix(Option<PathBuf>),
}

impl Addr {
    pub(crate) fn from_sockaddr(sockaddr: &SockAddr) -> Option<Addr> {
        if let Some(addr) = sockaddr.as_socket() {
            return Some(Addr::Tcp(addr));
        }
        if sockaddr.domain() == Domain::UNIX {
            return Some(Addr::Unix(sockaddr.as_pathname().map(PathBuf::from)));
        }
        None
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Addr::Tcp(addr) => addr.fmt(f),
            Addr::Unix(Some(path)) => path.display().fmt(f),
            Addr::Unix(None) => f.write_str("(unnamed)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scheme {
    Tcp,
    Unix,
}

/// Splits a listen spec into its scheme and the remainder. A spec without
/// a `scheme://` prefix defaults to TCP.
pub(crate) fn parse(spec: &str) -> io::Result<(Scheme, &str)> {
    match spec.split_once("://") {
        None => Ok((Scheme::Tcp, spec)),
        Some(("tcp", rest)) => Ok((Scheme::Tcp, rest)),
        Some(("unix", rest)) => Ok((Scheme::Unix, rest)),
        Some((scheme, _)) => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unsupported listen scheme: {scheme}"),
        )),
    }
}

/// Resolves a `host:port` spec; a bare `:port` binds every interface.
pub(crate) fn resolve_tcp(spec: &str) -> io::Result<SocketAddr> {
    let target = if spec.starts_with(':') {
        format!("0.0.0.0{spec}")
    } else {
        spec.to_owned()
    };
    target.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("listen address resolves to nothing: {spec}"),
        )
    })
}
