//! Scripted in-memory port for protocol tests.
//!
//! Reads and writes are kept independent: reads drain a queue of scripted
//! device output, writes are appended to a log the test can inspect.
//! Output queued with [`MockPort::then_after_clear`] only becomes readable once
//! the input buffer has been cleared, which is how the bootloader's answer to
//! a menu selection arrives.
//!
//! A [`MockPort::blocking`] port behaves like a real serial port on an empty
//! queue: each read waits for its timeout, or until bytes scheduled with
//! [`MockPort::arriving_after`] show up.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::port::Port;

/// Control line change recorded by [`MockPort`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Line {
    Dtr(bool),
    Rts(bool),
}

pub(crate) struct MockPort {
    pub(crate) read_buf: VecDeque<u8>,
    pending: VecDeque<Vec<u8>>,
    pub(crate) write_buf: Vec<u8>,
    pub(crate) lines: Vec<Line>,
    pub(crate) clears: usize,
    pub(crate) fail_writes: bool,
    blocking: bool,
    scheduled: Option<(Instant, Vec<u8>)>,
    dtr: bool,
    timeout: Duration,
}

impl MockPort {
    pub(crate) fn new(response: &[u8]) -> Self {
        Self {
            read_buf: response
                .iter()
                .copied()
                .collect(),
            pending: VecDeque::new(),
            write_buf: Vec::new(),
            lines: Vec::new(),
            clears: 0,
            fail_writes: false,
            blocking: false,
            scheduled: None,
            dtr: true,
            timeout: Duration::from_millis(10),
        }
    }

    pub(crate) fn silent() -> Self {
        Self::new(&[])
    }

    pub(crate) fn then_after_clear(mut self, response: &[u8]) -> Self {
        self.pending
            .push_back(response.to_vec());
        self
    }

    /// Make reads on an empty queue wait like a serial driver.
    pub(crate) fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    /// Deliver `response` once `delay` has passed.
    pub(crate) fn arriving_after(mut self, delay: Duration, response: &[u8]) -> Self {
        self.scheduled = Some((Instant::now() + delay, response.to_vec()));
        self
    }

    fn release_scheduled(&mut self) {
        let due = self
            .scheduled
            .as_ref()
            .is_some_and(|(at, _)| Instant::now() >= *at);
        if due {
            let bytes = self
                .scheduled
                .take()
                .map(|(_, bytes)| bytes)
                .unwrap_or_default();
            self.read_buf
                .extend(bytes);
        }
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.release_scheduled();
        if self
            .read_buf
            .is_empty()
            && self.blocking
        {
            let wait = self
                .scheduled
                .as_ref()
                .map_or(self.timeout, |(at, _)| {
                    at.saturating_duration_since(Instant::now())
                        .min(self.timeout)
                });
            thread::sleep(wait);
            self.release_scheduled();
        }
        if self
            .read_buf
            .is_empty()
        {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf
            .len()
            .min(
                self.read_buf
                    .len(),
            );
        for (slot, byte) in buf
            .iter_mut()
            .zip(
                self.read_buf
                    .drain(..n),
            )
        {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"));
        }
        self.write_buf
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn bytes_to_read(&mut self) -> Result<u32> {
        Ok(u32::try_from(
            self.read_buf
                .len(),
        )
        .unwrap_or(u32::MAX))
    }

    fn clear_input(&mut self) -> Result<()> {
        self.read_buf
            .clear();
        if let Some(next) = self
            .pending
            .pop_front()
        {
            self.read_buf
                .extend(next);
        }
        self.clears += 1;
        Ok(())
    }

    fn clear_output(&mut self) -> Result<()> {
        self.clears += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.dtr = level;
        self.lines
            .push(Line::Dtr(level));
        Ok(())
    }

    fn dtr(&self) -> bool {
        self.dtr
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        self.lines
            .push(Line::Rts(level));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
