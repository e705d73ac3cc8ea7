//! kqueue poller for macOS and the BSDs.

use std::cell::RefCell;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::time::Duration;

use crate::errno::Errno;

const EVENT_BATCH: usize = 64;

pub(crate) struct Poller {
    kqueue: OwnedFd,
    /// Filter changes queue up here and are flushed by the next `wait`.
    changes: RefCell<Vec<libc::kevent>>,
}

impl Poller {
    pub(crate) fn new() -> io::Result<Self> {
        let kqueue = unsafe {
            let fd = libc::kqueue();
            Errno::result(fd)?;
            OwnedFd::from_raw_fd(fd)
        };
        Ok(Poller {
            kqueue,
            changes: RefCell::new(Vec::new()),
        })
    }

    pub(crate) fn add_read(&self, fd: RawFd) -> io::Result<()> {
        self.push_change(fd, libc::EVFILT_READ as i16, libc::EV_ADD as u16);
        Ok(())
    }

    pub(crate) fn mod_read_write(&self, fd: RawFd) -> io::Result<()> {
        // The read filter from add_read stays in place; only the write
        // filter is added alongside it.
        self.push_change(fd, libc::EVFILT_WRITE as i16, libc::EV_ADD as u16);
        Ok(())
    }

    pub(crate) fn mod_read(&self, fd: RawFd) -> io::Result<()> {
        self.push_change(fd, libc::EVFILT_WRITE as i16, libc::EV_DELETE as u16);
        Ok(())
    }

    fn push_change(&self, fd: RawFd, filter: i16, flags: u16) {
        let mut ev: libc::kevent = unsafe { mem::zeroed() };
        ev.ident = fd as libc::uintptr_t;
        ev.filter = filter as _;
        ev.flags = flags as _;
        self.changes.borrow_mut().push(ev);
    }

    /// Flushes queued filter changes, then fills `ready` with the
    /// descriptors that became ready within `timeout`; `None` blocks until
    /// an event arrives.
    pub(crate) fn wait(&self, timeout: Option<Duration>, ready: &mut Vec<RawFd>) -> io::Result<()> {
        ready.clear();

        let timeout = timeout.map(|t| libc::timespec {
            tv_sec: t.as_secs() as libc::time_t,
            tv_nsec: t.subsec_nanos() as libc::c_long,
        });
        let mut events: [libc::kevent; EVENT_BATCH] = unsafe { mem::zeroed() };

        let mut changes = self.changes.borrow_mut();
        let n = unsafe {
            libc::kevent(
                self.kqueue.as_raw_fd(),
                changes.as_ptr(),
                changes.len() as libc::c_int,
                events.as_mut_ptr(),
                events.len() as libc::c_int,
                timeout.as_ref().map_or(ptr::null(), |t| t),
            )
        };
        // The change list is consumed before the wait phase, even when the
        // sleep itself is interrupted.
        changes.clear();

        if n < 0 {
            let err = Errno::last();
            if err.is(libc::EINTR) {
                return Ok(());
            }
            return Err(err.into());
        }

        for event in &events[..n as usize] {
            if event.flags & libc::EV_ERROR != 0 {
                // Change-list failures land here; deleting a write filter
                // that was already gone is expected after a close.
                if event.data as i32 != libc::ENOENT && event.data != 0 {
                    crate::debug!(
                        "kevent change for fd {} failed: {}",
                        event.ident,
                        io::Error::from_raw_os_error(event.data as i32),
                    );
                }
                continue;
            }
            ready.push(event.ident as RawFd);
        }
        Ok(())
    }
}
