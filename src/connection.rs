//! Windowed read/write protocols over one duplex TCP socket.
//!
//! A [`Connection`] owns its socket exclusively and stages all I/O through
//! a [`ByteWindow`]: reads drain the window first and flip it to its filled
//! state on completion (on failure too, holding whatever was staged);
//! writes flush the readable region without touching the caller's cursors.
//!
//! Multiplexing is delegated to the platform facility: every operation
//! awaits socket readiness and then performs a non-blocking transfer,
//! suspending rather than blocking a worker. An optional timeout bounds
//! each readiness wait; exceeding it fails the whole operation.
//!
//! At most one operation should be in flight per direction. Read protocols
//! take `&mut ByteWindow`, so overlapping same-direction calls cannot share
//! a buffer; one read and one write may run concurrently on the same
//! connection since they touch independent socket directions.

use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use socket2::SockRef;
use tokio::net::TcpStream;
use tokio::time;

use crate::error::Error;
use crate::window::ByteWindow;

/// Terminator recognized by [`Connection::read_line`].
const LINE_FEED: u8 = 0x0A;

/// One duplex byte-stream socket with windowed, future-based I/O.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    closed: AtomicBool,
}

impl Connection {
    /// Take ownership of an established socket.
    pub fn new(stream: TcpStream) -> Self {
        Connection {
            stream,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    pub fn peer_addr(&self) -> Result<SocketAddr, Error> {
        self.stream.peer_addr().map_err(Error::Io)
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        self.stream.local_addr().map_err(Error::Io)
    }

    /// Shut both directions of the socket down. Idempotent, never an error;
    /// wakes any in-flight operation with an end-of-stream or error result.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = SockRef::from(&self.stream).shutdown(Shutdown::Both);
        }
    }

    /// One socket read into the window's full capacity.
    ///
    /// Completes with whatever byte count the socket returns: 0 on
    /// end-of-stream, or trivially on a zero-capacity window. The window is
    /// left filled with the obtained bytes.
    pub async fn read(
        &self,
        window: &mut ByteWindow,
        timeout: Option<Duration>,
    ) -> Result<usize, Error> {
        self.ensure_open()?;
        let mut staged = Staged::drain(window);
        let capacity = staged.capacity();
        if capacity == 0 {
            return Ok(0);
        }
        let obtained = self.read_some(staged.unfilled(capacity), timeout).await?;
        staged.advance(obtained);
        Ok(obtained)
    }

    /// Read until exactly `n` bytes are staged.
    ///
    /// Fails with an invalid range when `n` exceeds the window's capacity,
    /// and with an incomplete read when the stream ends first — the window
    /// then holds the bytes obtained so far. On success the window is
    /// filled with exactly `n` bytes; anything the peer sent past `n` stays
    /// in the socket for the next operation.
    pub async fn read_exactly(
        &self,
        window: &mut ByteWindow,
        n: usize,
        timeout: Option<Duration>,
    ) -> Result<(), Error> {
        self.ensure_open()?;
        if n > window.capacity() {
            return Err(Error::InvalidRange { from: 0, to: n });
        }
        let mut staged = Staged::drain(window);
        while staged.filled() < n {
            let obtained = self.read_some(staged.unfilled(n), timeout).await?;
            if obtained == 0 {
                return Err(Error::IncompleteRead {
                    expected: n,
                    obtained: staged.filled(),
                });
            }
            staged.advance(obtained);
        }
        Ok(())
    }

    /// Read a line-feed-terminated line, one byte at a time.
    ///
    /// Completes with everything up to and including the first 0x0A, or
    /// with whatever accumulated when the stream ends (no terminator
    /// guarantee then). The store cannot grow, so a line that would exceed
    /// the window's capacity fails with [`Error::CapacityExceeded`] instead
    /// of scanning past the backing store.
    pub async fn read_line(
        &self,
        window: &mut ByteWindow,
        timeout: Option<Duration>,
    ) -> Result<(), Error> {
        self.ensure_open()?;
        let mut staged = Staged::drain(window);
        loop {
            let filled = staged.filled();
            if filled == staged.capacity() {
                return Err(Error::CapacityExceeded { capacity: filled });
            }
            let obtained = self.read_some(staged.unfilled(filled + 1), timeout).await?;
            if obtained == 0 {
                return Ok(());
            }
            staged.advance(obtained);
            if staged.last() == LINE_FEED {
                return Ok(());
            }
        }
    }

    /// Flush the window's entire readable region, looping over partial
    /// writes. The caller's cursors are untouched.
    pub async fn write(
        &self,
        window: &ByteWindow,
        timeout: Option<Duration>,
    ) -> Result<(), Error> {
        self.ensure_open()?;
        self.write_all(window.as_slice(), timeout).await
    }

    /// Flush `[position + from, position + to)` of the readable region.
    ///
    /// Fails with an invalid range unless `from <= to <= len()`; the
    /// caller's cursors are untouched on every path.
    pub async fn write_range(
        &self,
        window: &ByteWindow,
        from: usize,
        to: usize,
        timeout: Option<Duration>,
    ) -> Result<(), Error> {
        self.ensure_open()?;
        if from > to || to > window.len() {
            return Err(Error::InvalidRange { from, to });
        }
        self.write_all(&window.as_slice()[from..to], timeout).await
    }

    async fn write_all(&self, mut data: &[u8], timeout: Option<Duration>) -> Result<(), Error> {
        while !data.is_empty() {
            self.ready(self.stream.writable(), timeout).await?;
            match self.stream.try_write(data) {
                Ok(written) => data = &data[written..],
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(())
    }

    /// One non-blocking read into `dst` after a readiness wait. Returns 0
    /// only at end-of-stream; `dst` must not be empty.
    async fn read_some(&self, dst: &mut [u8], timeout: Option<Duration>) -> Result<usize, Error> {
        debug_assert!(!dst.is_empty());
        loop {
            self.ready(self.stream.readable(), timeout).await?;
            match self.stream.try_read(dst) {
                Ok(obtained) => return Ok(obtained),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    async fn ready<F>(&self, readiness: F, timeout: Option<Duration>) -> Result<(), Error>
    where
        F: std::future::Future<Output = io::Result<()>>,
    {
        match timeout {
            Some(limit) => match time::timeout(limit, readiness).await {
                Ok(result) => result.map_err(Error::Io),
                Err(_) => Err(Error::TimedOut),
            },
            None => readiness.await.map_err(Error::Io),
        }
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::Closed)
        }
    }
}

/// Stages socket reads into a drained window and flips it to the filled
/// state on every exit path, error and cancellation included.
struct Staged<'a> {
    window: &'a mut ByteWindow,
    filled: usize,
}

impl<'a> Staged<'a> {
    fn drain(window: &'a mut ByteWindow) -> Self {
        window.set_region(0, 0);
        Staged { window, filled: 0 }
    }

    fn capacity(&self) -> usize {
        self.window.capacity()
    }

    fn filled(&self) -> usize {
        self.filled
    }

    /// Unstaged span of the store up to `target`.
    fn unfilled(&mut self, target: usize) -> &mut [u8] {
        let filled = self.filled;
        &mut self.window.raw_mut()[filled..target]
    }

    fn advance(&mut self, n: usize) {
        self.filled += n;
    }

    fn last(&self) -> u8 {
        self.window.raw()[self.filled - 1]
    }
}

impl Drop for Staged<'_> {
    fn drop(&mut self) {
        self.window.set_region(0, self.filled);
    }
}
