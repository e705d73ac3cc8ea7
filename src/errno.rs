#[derive(Debug, thiserror::Error)]
pub(crate) struct Errno(i32);

impl Errno {
    pub(crate) fn last() -> Errno {
        #[cfg(target_os = "linux")]
        let errno = unsafe { *(libc::__errno_location()) };
        #[cfg(any(target_os = "macos", target_os = "freebsd", target_os = "dragonfly"))]
        let errno = unsafe { *(libc::__error()) };
        #[cfg(any(target_os = "netbsd", target_os = "openbsd"))]
        let errno = unsafe { *(libc::__errno()) };
        Errno(errno)
    }

    /// Returns `Ok(value)` if it does not contain the sentinel value. This
    /// should not be used when `-1` is not the errno sentinel value.
    #[inline]
    pub(crate) fn result<S: ErrnoSentinel + PartialEq<S>>(value: S) -> Result<S, Errno> {
        if value == S::sentinel() {
            Err(Self::last())
        } else {
            Ok(value)
        }
    }

    #[inline]
    pub(crate) fn is(&self, code: i32) -> bool {
        self.0 == code
    }
}

impl From<Errno> for std::io::Error {
    fn from(err: Errno) -> Self {
        std::io::Error::from_raw_os_error(err.0)
    }
}

impl std::fmt::Display for Errno {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let desc = match self.0 {
            libc::EAGAIN => "Resource temporarily unavailable",
            libc::EINTR => "Interrupted system call",
            libc::EBADF => "Bad file descriptor",
            libc::ENOENT => "No such file or directory",
            libc::ECONNRESET => "Connection reset by peer",
            libc::EPIPE => "Broken pipe",
            _ => "Unknown errno",
        };
        write!(f, "{:?}: {}", self, desc)
    }
}

/// The sentinel value indicates that a function failed and more detailed
/// information about the error can be found in `errno`
pub(crate) trait ErrnoSentinel: Sized {
    fn sentinel() -> Self;
}

impl ErrnoSentinel for i32 {
    fn sentinel() -> Self {
        -1
    }
}
