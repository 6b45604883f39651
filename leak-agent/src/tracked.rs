//! Instrumented handle constructors
//!
//! A [`Tracked`] value registers itself with the resident agent when created
//! and deregisters when dropped. Before the agent is installed the wrappers
//! are free: nothing is recorded.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::{Deref, DerefMut};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::path::Path;

use crate::agent::Agent;

struct Ticket {
    agent: &'static Agent,
    id: u64,
}

pub struct Tracked<T> {
    inner: T,
    ticket: Option<Ticket>,
}

impl<T> Tracked<T> {
    /// Wrap `inner`, recording it under `description` if the agent is resident.
    pub fn new(inner: T, description: impl Into<String>) -> Self {
        let mut ticket = None;
        if let Some(agent) = crate::installed() {
            if let Some(id) = agent.record_open(description.into()) {
                ticket = Some(Ticket { agent, id });
            }
        }
        Self { inner, ticket }
    }

    /// Whether this handle shows up in the agent's dump
    pub fn is_recorded(&self) -> bool {
        self.ticket.is_some()
    }
}

impl<T> Drop for Tracked<T> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            ticket.agent.record_close(ticket.id);
        }
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for Tracked<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T: fmt::Debug> fmt::Debug for Tracked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracked")
            .field("inner", &self.inner)
            .field("recorded", &self.is_recorded())
            .finish()
    }
}

impl<T: Read> Read for Tracked<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<T: Write> Write for Tracked<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<T: Seek> Seek for Tracked<T> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl<T: AsFd> AsFd for Tracked<T> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.as_fd()
    }
}

impl<T: AsRawFd> AsRawFd for Tracked<T> {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

/// Track an arbitrary value under a caller supplied label
pub fn track<T>(inner: T, description: impl Into<String>) -> Tracked<T> {
    Tracked::new(inner, description)
}

/// Open a file for reading
pub fn open(path: impl AsRef<Path>) -> io::Result<Tracked<File>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    Ok(Tracked::new(file, path.display().to_string()))
}

/// Create (or truncate) a file for writing
pub fn create(path: impl AsRef<Path>) -> io::Result<Tracked<File>> {
    let path = path.as_ref();
    let file = File::create(path)?;
    Ok(Tracked::new(file, path.display().to_string()))
}

/// Open an anonymous pipe, returning `(source, sink)`
pub fn pipe() -> io::Result<(Tracked<File>, Tracked<File>)> {
    let (read, write) = nix::unistd::pipe().map_err(io::Error::from)?;
    Ok((
        Tracked::new(File::from(read), "Pipe Source Channel"),
        Tracked::new(File::from(write), "Pipe Sink Channel"),
    ))
}

/// Open an epoll instance
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn selector() -> io::Result<Tracked<nix::sys::epoll::Epoll>> {
    use nix::sys::epoll::{Epoll, EpollCreateFlags};

    let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC).map_err(io::Error::from)?;
    Ok(Tracked::new(epoll, "selector"))
}
