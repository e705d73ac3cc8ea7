//! Single-threaded, readiness-driven socket event loop.
//!
//! This crate multiplexes many TCP and Unix-domain connections onto one
//! thread using the operating system's readiness notification facility
//! (epoll on Linux, kqueue on the BSDs). Application code supplies a set of
//! callbacks; the loop drives accept, read, write, and close on
//! non-blocking sockets and reports every event through them.
//!
//! # Architecture
//!
//! - [`serve`]: binds the listeners and runs the loop until a callback
//!   requests shutdown
//! - [`Events`]: the callback table (`serving`, `opened`, `data`,
//!   `pre_write`, `closed`, `tick`)
//! - [`Conn`]: per-connection handle with `write`/`close` and a
//!   user-defined context slot
//! - [`Action`]: callback verdict deciding whether to continue, close one
//!   connection, or stop the loop
//!
//! Every callback runs on the loop thread. Output queued with
//! [`Conn::write`] is flushed as the kernel accepts it; backpressure is
//! handled by registering for write readiness only while unsent bytes (or a
//! pending close) remain.
//!
//! # Examples
//!
//! ```no_run
//! use spindle::{Action, Events};
//!
//! fn main() -> std::io::Result<()> {
//!     let events = Events::new()
//!         .with_serving(|server| {
//!             println!("echo server listening on {}", server.addrs[0]);
//!             Action::None
//!         })
//!         .with_data(|_conn, input| (input.to_vec(), Action::None));
//!
//!     spindle::serve(events, &["tcp://127.0.0.1:5000"])
//! }
//! ```
//!
//! Addresses take the form `host:port` (TCP by default), `tcp://host:port`,
//! or `unix://path`; a stale Unix socket path is unlinked before binding.

mod addr;
mod conn;
mod errno;
mod events;
mod listener;
mod poll;
mod server;

pub use addr::Addr;
pub use conn::Conn;
pub use events::{Action, Events, Server};
pub use server::serve;

#[macro_export]
macro_rules! trace {
    ($($body:tt)+) => {{
        #[cfg(feature = "log")]
        { ::log::trace!($($body)+) }
        #[cfg(feature = "tracing")]
        { ::tracing::trace!($($body)+) }
    }};
}

#[macro_export]
macro_rules! debug {
    ($($body:tt)+) => {{
        #[cfg(feature = "log")]
        { ::log::debug!($($body)+) }
        #[cfg(feature = "tracing")]
        { ::tracing::debug!($($body)+) }
    }};
}

#[macro_export]
macro_rules! info {
    ($($body:tt)+) => {{
        #[cfg(feature = "log")]
        { ::log::info!($($body)+) }
        #[cfg(feature = "tracing")]
        { ::tracing::info!($($body)+) }
    }};
}

#[macro_export]
macro_rules! warn {
    ($($body:tt)+) => {{
        #[cfg(feature = "log")]
        { ::log::warn!($($body)+) }
        #[cfg(feature = "tracing")]
        { ::tracing::warn!($($body)+) }
    }};
}

#[macro_export]
macro_rules! error {
    ($($body:tt)+) => {{
        #[cfg(feature = "log")]
        { ::log::error!($($body)+) }
        #[cfg(feature = "tracing")]
        { ::tracing::error!($($body)+) }
    }};
}
