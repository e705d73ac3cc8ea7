//! Readiness notification over the platform polling facility.
//!
//! The loop needs exactly four operations from the kernel:
//!
//! - [`Poller::add_read`]: watch a descriptor for read readiness
//! - [`Poller::mod_read_write`]: additionally report write readiness
//! - [`Poller::mod_read`]: drop back to read readiness only
//! - [`Poller::wait`]: block until something is ready (or a timeout)
//!
//! # Platform Implementations
//!
//! | Platform | Backend | Notes |
//! |----------|---------|-------|
//! | Linux | epoll | interest changes are immediate syscalls |
//! | macOS / *BSD | kqueue | filter changes queue up and flush on the next `wait` |
//!
//! Registration is level-triggered on both backends: a descriptor keeps
//! being reported while unread input or writable buffer space remains,
//! which is what lets the loop resume a partial drain on a later
//! iteration.
//!
//! `wait` treats an interrupted sleep (`EINTR`) as an empty result; any
//! other failure is an error. The ready list may include descriptors that
//! were closed earlier in the same batch, so callers must tolerate
//! lookups that come up empty.

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod linux;
        pub(crate) use linux::Poller;
    } else if #[cfg(any(
        target_os = "macos",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly",
    ))] {
        mod bsd;
        pub(crate) use bsd::Poller;
    } else {
        compile_error!("no readiness backend for this platform");
    }
}
