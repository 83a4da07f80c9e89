//! XMODEM file transfer protocol implementation (sender side).
//!
//! This module implements the classic XMODEM protocol used by the Gecko
//! bootloader to receive firmware images.
//!
//! ## Protocol Overview
//!
//! XMODEM sends 128-byte blocks, one at a time, and waits for the receiver
//! to acknowledge each block before sending the next one:
//!
//! ```text
//! Block format (checksum variant):
//! +-----+-----+------+--------------+-----+
//! | SOH | SEQ | ~SEQ |  DATA (128)  | SUM |
//! +-----+-----+------+--------------+-----+
//! | 1   | 1   | 1    |     128      | 1   |
//! +-----+-----+------+--------------+-----+
//! ```
//!
//! The sequence number starts at 1 and wraps from 255 to 0. The last block is
//! padded with `0x1A`. When the receiver opens the transfer with `'C'`
//! instead of `NAK`, the checksum byte is replaced by a big-endian CRC-16.
//!
//! The sender is an explicit state machine:
//!
//! ```text
//! AwaitStart -> SendBlock -> AwaitAck --ACK--> SendBlock ... -> SendEot
//!                               |                                 |
//!                          NAK/timeout                       AwaitEotAck -> Done
//!                               v
//!                             Retry --(limit reached)--> Failed
//! ```

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::crc::{checksum8, crc16_xmodem};
use log::{debug, trace, warn};
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::thread;
use std::time::{Duration, Instant};

/// XMODEM control characters.
pub mod control {
    /// Start of Header (128-byte block).
    pub const SOH: u8 = 0x01;
    /// End of Transmission.
    pub const EOT: u8 = 0x04;
    /// Acknowledge.
    pub const ACK: u8 = 0x06;
    /// Not Acknowledge.
    pub const NAK: u8 = 0x15;
    /// Cancel.
    pub const CAN: u8 = 0x18;
    /// CRC mode request character.
    pub const C: u8 = b'C';
}

/// Payload size of every block.
pub const BLOCK_SIZE: usize = 128;

/// Filler for the unused tail of the last block.
pub const PAD_BYTE: u8 = 0x1A;

/// Attempts per block (and for `EOT`) before the transfer is abandoned.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Trailing integrity check appended to each block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BlockCheck {
    /// One byte: payload sum modulo 256.
    #[default]
    Checksum,
    /// Two bytes: CRC-16/XMODEM, big-endian.
    Crc16,
}

impl BlockCheck {
    /// Number of bytes the check occupies on the wire.
    pub fn size(self) -> usize {
        match self {
            Self::Checksum => 1,
            Self::Crc16 => 2,
        }
    }

    /// Total size of an encoded block with this check.
    pub fn frame_len(self) -> usize {
        3 + BLOCK_SIZE + self.size()
    }
}

/// A single XMODEM block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    sequence: u8,
    payload: [u8; BLOCK_SIZE],
    check: BlockCheck,
}

impl Block {
    /// Build a block from up to [`BLOCK_SIZE`] bytes of data.
    ///
    /// Shorter data is padded with [`PAD_BYTE`]; longer data is truncated.
    pub fn new(sequence: u8, data: &[u8], check: BlockCheck) -> Self {
        let mut payload = [PAD_BYTE; BLOCK_SIZE];
        let n = data
            .len()
            .min(BLOCK_SIZE);
        payload[..n].copy_from_slice(&data[..n]);

        Self {
            sequence,
            payload,
            check,
        }
    }

    /// Sequence number of this block.
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Padded payload.
    pub fn payload(&self) -> &[u8; BLOCK_SIZE] {
        &self.payload
    }

    /// Arithmetic checksum of the payload.
    pub fn checksum(&self) -> u8 {
        checksum8(&self.payload)
    }

    /// Serialize the block into its wire format.
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(
            self.check
                .frame_len(),
        );

        frame.push(control::SOH);
        frame.push(self.sequence);
        frame.push(!self.sequence);
        frame.extend_from_slice(&self.payload);

        match self.check {
            BlockCheck::Checksum => frame.push(self.checksum()),
            BlockCheck::Crc16 => {
                let crc = crc16_xmodem(&self.payload);
                frame.extend_from_slice(&crc.to_be_bytes());
            },
        }

        frame
    }
}

/// XMODEM configuration options.
#[derive(Debug, Clone)]
pub struct XmodemConfig {
    /// How long to wait for the receiver to answer a block or `EOT`.
    pub ack_timeout: Duration,
    /// How long to wait for the receiver's `NAK`/`'C'` in `AwaitStart`.
    pub start_timeout: Duration,
    /// Pause before reading each response, giving the receiver time to turn
    /// the line around.
    pub turnaround_delay: Duration,
    /// Attempts per block before the transfer fails.
    pub max_retries: u32,
    /// Wait for the receiver to open the transfer before the first block.
    ///
    /// When set, `NAK` selects [`BlockCheck::Checksum`] and `'C'` selects
    /// [`BlockCheck::Crc16`], overriding `check`.
    pub await_start: bool,
    /// Block check used when `await_start` is not set.
    pub check: BlockCheck,
}

impl Default for XmodemConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(10),
            start_timeout: Duration::from_secs(10),
            turnaround_delay: Duration::from_millis(25),
            max_retries: DEFAULT_MAX_RETRIES,
            await_start: false,
            check: BlockCheck::Checksum,
        }
    }
}

/// Counters of one transfer, handed to the progress callback after every
/// block attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TransferSession {
    /// Length of the image in bytes.
    pub image_len: u64,
    /// Number of blocks the image occupies.
    pub total_blocks: u64,
    /// Sequence number of the block currently being sent.
    pub sequence: u8,
    /// Block transmissions, including retransmissions.
    pub attempts: u64,
    /// Image bytes acknowledged by the receiver (without padding).
    pub bytes_sent: u64,
    /// Acknowledged blocks.
    pub success_count: u64,
    /// Failed block attempts over the whole transfer.
    pub error_count: u64,
    /// Failed attempts of the current block.
    pub block_errors: u32,
    /// Block check in use.
    pub check: BlockCheck,
}

impl TransferSession {
    fn new(image_len: u64, check: BlockCheck) -> Self {
        Self {
            image_len,
            total_blocks: image_len.div_ceil(BLOCK_SIZE as u64),
            sequence: 1,
            check,
            ..Self::default()
        }
    }

    /// Completion percentage computed from acknowledged blocks.
    ///
    /// Counts whole blocks, so the value is capped at 100 once the padded
    /// last block is acknowledged.
    pub fn percent(&self) -> u8 {
        if self.image_len == 0 {
            return 100;
        }
        let pct = self.success_count * BLOCK_SIZE as u64 * 100 / self.image_len;
        u8::try_from(pct.min(100)).unwrap_or(100)
    }
}

/// States of the sender.
#[derive(Debug)]
enum State {
    AwaitStart,
    SendBlock,
    AwaitAck,
    Retry,
    SendEot,
    AwaitEotAck,
    Done,
    Failed(String),
}

/// A single answer from the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Response {
    Ack,
    Nak,
    Crc,
    Cancel,
    Timeout,
}

/// XMODEM transfer handler.
pub struct XmodemTransfer<'a, P: Port> {
    port: &'a mut P,
    config: XmodemConfig,
}

impl<'a, P: Port> XmodemTransfer<'a, P> {
    /// Create a new XMODEM transfer handler.
    pub fn new(port: &'a mut P) -> Self {
        Self {
            port,
            config: XmodemConfig::default(),
        }
    }

    /// Create a new XMODEM transfer handler with custom configuration.
    pub fn with_config(port: &'a mut P, config: XmodemConfig) -> Self {
        Self { port, config }
    }

    /// Send `image` from its current position to the end.
    ///
    /// `progress` is called after every block attempt, acknowledged or not.
    /// Returns the final counters on success. Any exhausted retry budget, a
    /// receiver cancel or a missing start signal fails the whole transfer
    /// with [`Error::Xmodem`].
    pub fn send<R, F>(&mut self, image: &mut R, mut progress: F) -> Result<TransferSession>
    where
        R: Read + Seek,
        F: FnMut(&TransferSession),
    {
        let start = image.stream_position()?;
        let end = image.seek(SeekFrom::End(0))?;
        image.seek(SeekFrom::Start(start))?;
        let image_len = end.saturating_sub(start);

        let mut session = TransferSession::new(image_len, self.config.check);
        debug!(
            "Starting XMODEM transfer: {} bytes in {} blocks",
            image_len, session.total_blocks
        );

        let mut state = if self.config.await_start {
            State::AwaitStart
        } else {
            State::SendBlock
        };
        let mut frame: Vec<u8> = Vec::new();
        let mut payload_len = 0usize;
        let mut eot_attempts = 0u32;

        loop {
            state = match state {
                State::AwaitStart => match self.await_response(self.config.start_timeout, true)? {
                    Response::Nak => {
                        debug!("Receiver requested checksum mode");
                        session.check = BlockCheck::Checksum;
                        State::SendBlock
                    },
                    Response::Crc => {
                        debug!("Receiver requested CRC-16 mode");
                        session.check = BlockCheck::Crc16;
                        State::SendBlock
                    },
                    Response::Cancel => State::Failed("transfer cancelled by receiver".into()),
                    Response::Ack | Response::Timeout => {
                        State::Failed("receiver never requested the first block".into())
                    },
                },

                State::SendBlock => {
                    let mut buf = [0u8; BLOCK_SIZE];
                    match read_chunk(image, &mut buf) {
                        Ok(0) => State::SendEot,
                        Ok(n) => {
                            payload_len = n;
                            frame = Block::new(session.sequence, &buf[..n], session.check)
                                .encode();
                            session.block_errors = 0;
                            trace!("Sending block {}", session.sequence);
                            self.write_frame(&frame)?;
                            session.attempts += 1;
                            State::AwaitAck
                        },
                        Err(e) => State::Failed(format!(
                            "failed to read image for block {}: {e}",
                            session.sequence
                        )),
                    }
                },

                State::AwaitAck => match self.await_response(self.config.ack_timeout, false)? {
                    Response::Ack => {
                        trace!("Block {} ACKed", session.sequence);
                        session.success_count += 1;
                        session.bytes_sent += payload_len as u64;
                        progress(&session);
                        session.sequence = session
                            .sequence
                            .wrapping_add(1);
                        State::SendBlock
                    },
                    Response::Cancel => State::Failed("transfer cancelled by receiver".into()),
                    response => {
                        debug!(
                            "Block {} not acknowledged ({response:?}), retrying",
                            session.sequence
                        );
                        session.error_count += 1;
                        session.block_errors += 1;
                        progress(&session);
                        State::Retry
                    },
                },

                State::Retry => {
                    if session.block_errors >= self.config.max_retries {
                        State::Failed(format!(
                            "block {} failed after {} attempts",
                            session.sequence, session.block_errors
                        ))
                    } else {
                        self.write_frame(&frame)?;
                        session.attempts += 1;
                        State::AwaitAck
                    }
                },

                State::SendEot => {
                    debug!("Sending EOT");
                    self.write_frame(&[control::EOT])?;
                    eot_attempts += 1;
                    State::AwaitEotAck
                },

                State::AwaitEotAck => match self.await_response(self.config.ack_timeout, false)? {
                    Response::Ack => {
                        debug!("EOT ACKed");
                        State::Done
                    },
                    Response::Cancel => State::Failed("transfer cancelled by receiver".into()),
                    _ if eot_attempts >= self.config.max_retries => State::Failed(format!(
                        "EOT not acknowledged after {eot_attempts} attempts"
                    )),
                    _ => State::SendEot,
                },

                State::Done => {
                    debug!(
                        "XMODEM transfer complete: {} blocks, {} errors",
                        session.success_count, session.error_count
                    );
                    return Ok(session);
                },

                State::Failed(reason) => {
                    warn!("XMODEM transfer aborted: {reason}");
                    self.abort();
                    return Err(Error::Xmodem(reason));
                },
            };
        }
    }

    /// Write a frame and flush it before any response is read.
    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.port
            .write_all_bytes(frame)
    }

    /// Tell the receiver to give up. Best effort.
    fn abort(&mut self) {
        if let Err(e) = self.write_frame(&[control::CAN, control::CAN]) {
            trace!("Failed to send CAN: {e}");
        }
    }

    /// Read a single byte, mapping a port timeout to `None`.
    fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut buf = [0u8; 1];
        match self
            .port
            .read(&mut buf)
        {
            Ok(1) => Ok(Some(buf[0])),
            Ok(_) => Ok(None),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            },
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Wait for a meaningful response byte; anything else is line noise.
    ///
    /// `'C'` only counts while waiting for the transfer to start, `ACK` only
    /// after something was sent. Two consecutive `CAN` bytes are required to
    /// treat the transfer as cancelled. Each read is bounded by the time left
    /// until the deadline; the port timeout is restored afterwards.
    fn await_response(&mut self, timeout: Duration, start: bool) -> Result<Response> {
        if !self
            .config
            .turnaround_delay
            .is_zero()
        {
            thread::sleep(self.config.turnaround_delay);
        }

        let original_timeout = self
            .port
            .timeout();
        let response = self.poll_response(Instant::now() + timeout, start);
        self.port
            .set_timeout(original_timeout)?;
        response
    }

    fn poll_response(&mut self, deadline: Instant, start: bool) -> Result<Response> {
        let mut pending_cancel = false;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Response::Timeout);
            }
            self.port
                .set_timeout(remaining)?;

            match self.read_byte()? {
                Some(control::ACK) if !start => return Ok(Response::Ack),
                Some(control::NAK) => return Ok(Response::Nak),
                Some(control::C) if start => return Ok(Response::Crc),
                Some(control::CAN) if pending_cancel => return Ok(Response::Cancel),
                Some(control::CAN) => pending_cancel = true,
                Some(other) => {
                    trace!("Ignoring unexpected byte: 0x{other:02X}");
                    pending_cancel = false;
                },
                None => {},
            }
        }
    }
}

/// Fill `buf` from `reader`, stopping early only at end of input.
fn read_chunk<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {},
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(filled)
}
