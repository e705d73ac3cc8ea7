//! Linux poller backed by epoll.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use crate::errno::Errno;

const EVENT_BATCH: usize = 64;

pub(crate) struct Poller {
    epoll: OwnedFd,
}

impl Poller {
    pub(crate) fn new() -> io::Result<Self> {
        let epoll = unsafe {
            let fd = libc::epoll_create1(libc::EPOLL_CLOEXEC);
            Errno::result(fd)?;
            OwnedFd::from_raw_fd(fd)
        };
        Ok(Poller { epoll })
    }

    pub(crate) fn add_read(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, libc::EPOLLIN as u32)
    }

    pub(crate) fn mod_read_write(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(
            libc::EPOLL_CTL_MOD,
            fd,
            (libc::EPOLLIN | libc::EPOLLOUT) as u32,
        )
    }

    pub(crate) fn mod_read(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, libc::EPOLLIN as u32)
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32) -> io::Result<()> {
        let mut ev = libc::epoll_event {
            events,
            u64: fd as u64,
        };
        unsafe {
            let ret = libc::epoll_ctl(self.epoll.as_raw_fd(), op, fd, &mut ev);
            Errno::result(ret)?;
        }
        Ok(())
    }

    /// Fills `ready` with the descriptors that became ready within
    /// `timeout`; `None` blocks until an event arrives.
    pub(crate) fn wait(&self, timeout: Option<Duration>, ready: &mut Vec<RawFd>) -> io::Result<()> {
        ready.clear();

        let timeout_ms = timeout.map(|d| d.as_millis() as i32).unwrap_or(-1);
        let mut events = [libc::epoll_event { events: 0, u64: 0 }; EVENT_BATCH];

        let n = unsafe {
            libc::epoll_wait(
                self.epoll.as_raw_fd(),
                events.as_mut_ptr(),
                events.len() as i32,
                timeout_ms,
            )
        };
        if n < 0 {
            let err = Errno::last();
            if err.is(libc::EINTR) {
                return Ok(());
            }
            return Err(err.into());
        }

        for event in &events[..n as usize] {
            ready.push(event.u64 as RawFd);
        }
        Ok(())
    }
}
