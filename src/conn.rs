use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::rc::Rc;

use socket2::{SockAddr, Socket};

use crate::addr::Addr;
use crate::events::Action;
use crate::poll::Poller;

/// Output buffers that grew past this many bytes are released after a
/// complete drain instead of being kept around for reuse.
const RETAIN_LIMIT: usize = 4096;

/// Handle to one accepted connection.
///
/// `Conn` is a cheap clone; callbacks may keep a copy and call
/// [`write`](Conn::write) or [`close`](Conn::close) on it from a later
/// callback on the same loop. It is not `Send`: every operation belongs to
/// the loop thread. Once the connection has been torn down, all operations
/// turn into silent no-ops.
#[derive(Clone)]
pub struct Conn {
    inner: Rc<RefCell<Inner>>,
}

struct Inner {
    sock: Option<Socket>,
    fd: RawFd,
    out: Vec<u8>,
    /// Offset of the first unsent byte in `out`.
    cursor: usize,
    /// Whether the poller currently reports write readiness for this fd.
    write_armed: bool,
    action: Action,
    context: Option<Rc<dyn Any>>,
    poll: Option<Rc<Poller>>,
    addr_index: usize,
    local: Addr,
    remote: Option<Addr>,
    /// Raw accepted peer address, kept until `remote` is materialized.
    peer: Option<SockAddr>,
}

/// What a drain attempt left behind.
enum Drained {
    All,
    Blocked,
    Failed,
}

/// Outcome of a read attempt.
pub(crate) enum Received {
    Data(usize),
    Blocked,
    Closing,
}

impl Conn {
    pub(crate) fn accepted(
        sock: Socket,
        peer: SockAddr,
        poll: Rc<Poller>,
        addr_index: usize,
        local: Addr,
    ) -> Conn {
        let fd = sock.as_raw_fd();
        Conn {
            inner: Rc::new(RefCell::new(Inner {
                sock: Some(sock),
                fd,
                out: Vec::new(),
                cursor: 0,
                write_armed: false,
                action: Action::None,
                context: None,
                poll: Some(poll),
                addr_index,
                local,
                remote: None,
                peer: Some(peer),
            })),
        }
    }

    /// Queues `data` for transmission. An empty slice is a no-op, and the
    /// call is silently dropped once the connection is closing.
    pub fn write(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let mut inner = self.inner.borrow_mut();
        if inner.poll.is_none() || inner.action != Action::None {
            return;
        }
        inner.out.extend_from_slice(data);
        Inner::arm(&mut inner);
    }

    /// Requests a close. Queued output is still drained first; calling
    /// this more than once has no further effect.
    pub fn close(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.poll.is_none() {
            return;
        }
        if inner.action == Action::None {
            inner.action = Action::Close;
        }
        Inner::arm(&mut inner);
    }

    /// Stores an arbitrary user value on the connection. The loop never
    /// touches it.
    pub fn set_context<T: 'static>(&self, context: T) {
        self.inner.borrow_mut().context = Some(Rc::new(context));
    }

    /// Returns the user value stored with [`set_context`](Conn::set_context).
    pub fn context(&self) -> Option<Rc<dyn Any>> {
        self.inner.borrow().context.clone()
    }

    /// Index of the listen spec this connection was accepted from.
    pub fn addr_index(&self) -> usize {
        self.inner.borrow().addr_index
    }

    /// Local address of the owning listener.
    pub fn local_addr(&self) -> Addr {
        self.inner.borrow().local.clone()
    }

    /// Peer address, materialized from the accepted socket address on
    /// first access.
    pub fn remote_addr(&self) -> Option<Addr> {
        let mut inner = self.inner.borrow_mut();
        if inner.remote.is_none()
            && let Some(peer) = inner.peer.take()
        {
            inner.remote = Addr::from_sockaddr(&peer);
        }
        inner.remote.clone()
    }

    pub(crate) fn action(&self) -> Action {
        self.inner.borrow().action
    }

    pub(crate) fn has_unsent(&self) -> bool {
        let inner = self.inner.borrow();
        inner.out.len() - inner.cursor > 0
    }

    /// Folds a callback result into the connection: queue the output,
    /// escalate the action, and make sure the loop comes back for it.
    pub(crate) fn absorb(&self, out: &[u8], action: Action) {
        if out.is_empty() && action == Action::None {
            return;
        }
        let mut inner = self.inner.borrow_mut();
        inner.out.extend_from_slice(out);
        if action > inner.action {
            inner.action = action;
        }
        Inner::arm(&mut inner);
    }

    /// Writes queued output until it is gone or the socket would block.
    /// A completed drain resets the buffer and, with no close pending,
    /// drops back to read-only readiness. A hard error discards the
    /// output and escalates to close instead.
    pub(crate) fn flush(&self) -> io::Result<()> {
        let mut inner = self.inner.borrow_mut();
        let inner = &mut *inner;
        let Some(sock) = inner.sock.as_ref() else {
            return Ok(());
        };

        let drained = loop {
            match sock.send(&inner.out[inner.cursor..]) {
                Ok(n) => {
                    inner.cursor += n;
                    if inner.cursor < inner.out.len() {
                        continue;
                    }
                    break Drained::All;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break Drained::Blocked,
                Err(_) => break Drained::Failed,
            }
        };

        match drained {
            // Leave the cursor and registration alone; the drain resumes
            // on the next write-readiness event.
            Drained::Blocked => return Ok(()),
            Drained::Failed => {
                if inner.action < Action::Close {
                    inner.action = Action::Close;
                }
            }
            Drained::All => {}
        }

        inner.cursor = 0;
        if inner.out.capacity() > RETAIN_LIMIT {
            inner.out = Vec::new();
        } else {
            inner.out.clear();
        }
        if inner.action == Action::None {
            inner.write_armed = false;
            if let Some(poll) = &inner.poll {
                poll.mod_read(inner.fd)?;
            }
        }
        Ok(())
    }

    /// Reads into `buf`. EOF and hard errors escalate the pending action
    /// to close; the descriptor stays registered so the next readiness
    /// event finalizes it.
    pub(crate) fn receive(&self, buf: &mut [u8]) -> Received {
        let mut inner = self.inner.borrow_mut();
        let inner = &mut *inner;
        let Some(sock) = inner.sock.as_mut() else {
            return Received::Blocked;
        };
        match io::Read::read(sock, buf) {
            Ok(n) if n > 0 => Received::Data(n),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Received::Blocked,
            _ => {
                if inner.action < Action::Close {
                    inner.action = Action::Close;
                }
                Inner::arm(inner);
                Received::Closing
            }
        }
    }

    /// Closes the descriptor and cuts the connection loose from the loop.
    /// Returns the final pending action.
    pub(crate) fn finalize(&self) -> Action {
        let mut inner = self.inner.borrow_mut();
        inner.poll = None;
        // Dropping the socket closes the descriptor, which also releases
        // its poller registration.
        inner.sock = None;
        inner.action
    }
}

impl Inner {
    fn arm(inner: &mut Inner) {
        if inner.write_armed {
            return;
        }
        let Some(poll) = &inner.poll else {
            return;
        };
        if let Err(err) = poll.mod_read_write(inner.fd) {
            crate::error!("write-readiness request for fd {} failed: {err}", inner.fd);
        }
        inner.write_armed = true;
    }
}

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Conn")
            .field("fd", &inner.fd)
            .field("addr_index", &inner.addr_index)
            .field("action", &inner.action)
            .finish()
    }
}
