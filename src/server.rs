//! The dispatcher: owns the poller, the listeners, and every live
//! connection, and turns readiness reports into callback invocations.

use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::conn::{Conn, Received};
use crate::events::{Action, Events, Server};
use crate::listener::{self, Listener};
use crate::poll::Poller;

/// Size of the shared read buffer, and therefore the largest chunk handed
/// to a single `data` callback.
const PACKET_SIZE: usize = 4096;

/// Binds a listener for every spec in `addrs` and runs the event loop
/// until a callback returns [`Action::Shutdown`].
///
/// Specs look like `host:port`, `tcp://host:port`, or `unix://path`; the
/// spec's position in `addrs` becomes the [`Conn::addr_index`] of every
/// connection accepted from it. Listener and poller failures abort the
/// loop with the underlying error; per-connection I/O errors only close
/// the affected connection.
pub fn serve(events: Events, addrs: &[&str]) -> io::Result<()> {
    let poller = Rc::new(Poller::new()?);

    let mut listeners = Vec::with_capacity(addrs.len());
    for spec in addrs {
        let listener = Listener::bind(spec)?;
        poller.add_read(listener.raw_fd())?;
        listeners.push(listener);
    }

    let mut dispatcher = Dispatcher {
        poller,
        listeners,
        conns: HashMap::new(),
        events,
        last_tick: Instant::now(),
        delay: None,
        shutdown: false,
    };

    if let Some(hook) = dispatcher.events.serving.as_mut() {
        let server = Server {
            addrs: dispatcher
                .listeners
                .iter()
                .map(|listener| listener.local_addr().clone())
                .collect(),
        };
        if hook(&server) == Action::Shutdown {
            return Ok(());
        }
    }
    if dispatcher.events.tick.is_some() {
        // Fire the first tick right away; it picks its own schedule.
        dispatcher.delay = Some(Duration::ZERO);
    }

    let result = dispatcher.run();
    dispatcher.teardown();
    result
}

struct Dispatcher {
    poller: Rc<Poller>,
    listeners: Vec<Listener>,
    conns: HashMap<RawFd, Conn>,
    events: Events,
    last_tick: Instant,
    /// Wait timeout; `None` blocks forever (no tick configured).
    delay: Option<Duration>,
    shutdown: bool,
}

impl Dispatcher {
    fn run(&mut self) -> io::Result<()> {
        let mut ready: Vec<RawFd> = Vec::with_capacity(64);
        let mut packet = vec![0u8; PACKET_SIZE];

        while !self.shutdown {
            self.poller.wait(self.delay, &mut ready)?;
            for &fd in &ready {
                if self.shutdown {
                    break;
                }
                self.dispatch(fd, &mut packet)?;
            }
            if self.tick_due() {
                return Ok(());
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, fd: RawFd, packet: &mut [u8]) -> io::Result<()> {
        if let Some(index) = self
            .listeners
            .iter()
            .position(|listener| listener.raw_fd() == fd)
        {
            return self.accept_ready(index);
        }

        // A batch can report a descriptor that an earlier entry of the
        // same batch already finalized.
        let Some(conn) = self.conns.get(&fd).cloned() else {
            return Ok(());
        };

        if conn.has_unsent() {
            if let Some(hook) = self.events.pre_write.as_mut() {
                hook();
            }
            conn.flush()?;
        } else if conn.action() >= Action::Close {
            self.conns.remove(&fd);
            let action = conn.finalize();
            let mut requested = Action::None;
            if let Some(hook) = self.events.closed.as_mut() {
                requested = hook(&conn);
            }
            if action == Action::Shutdown || requested == Action::Shutdown {
                self.shutdown = true;
            }
        } else if let Received::Data(n) = conn.receive(packet) {
            if let Some(hook) = self.events.data.as_mut() {
                let (out, action) = hook(&conn, &packet[..n]);
                conn.absorb(&out, action);
            }
        }
        Ok(())
    }

    fn accept_ready(&mut self, index: usize) -> io::Result<()> {
        let listener = &self.listeners[index];
        let (sock, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(err) => return Err(err),
        };
        if let Err(err) = listener::setup_accepted(&sock, listener.scheme()) {
            crate::debug!("dropping freshly accepted socket: {err}");
            return Ok(());
        }

        let fd = sock.as_raw_fd();
        self.poller.add_read(fd)?;
        let conn = Conn::accepted(
            sock,
            peer,
            Rc::clone(&self.poller),
            index,
            listener.local_addr().clone(),
        );
        self.conns.insert(fd, conn.clone());

        if let Some(hook) = self.events.opened.as_mut() {
            let (out, action) = hook(&conn);
            conn.absorb(&out, action);
        }
        Ok(())
    }

    /// Runs the tick if its deadline has passed. Returns true when the
    /// tick asks for an immediate shutdown.
    fn tick_due(&mut self) -> bool {
        let Some(hook) = self.events.tick.as_mut() else {
            return false;
        };
        let now = Instant::now();
        if now.duration_since(self.last_tick) <= self.delay.unwrap_or(Duration::ZERO) {
            return false;
        }
        self.last_tick = now;
        let (delay, action) = hook(now);
        self.delay = Some(delay);
        action == Action::Shutdown
    }

    /// Closes whatever is still connected. Pending output is dropped;
    /// `closed` still fires once for each connection.
    fn teardown(&mut self) {
        for (_, conn) in self.conns.drain() {
            conn.finalize();
            if let Some(hook) = self.events.closed.as_mut() {
                hook(&conn);
            }
        }
    }
}
