//! Transports for the lock-step 2PC subprotocol.
//!
//! The garbled exchange is strictly request/response, so blocking I/O on a
//! dedicated connection is the natural fit. Frames are a 4-byte big-endian
//! length prefix plus body, capped to keep a misbehaving peer from forcing
//! unbounded allocation.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::mpsc::{Receiver, Sender};
use std::time::Duration;

use crate::errors::GcError;
use crate::GcResult;

/// Upper bound for one framed 2PC message.
pub const MAX_FRAME_SIZE: usize = 256 * 1024 * 1024;

/// Byte transport between the two circuit parties.
pub trait GcChannel: Send {
    fn send(&mut self, bytes: &[u8]) -> GcResult<()>;
    fn recv(&mut self) -> GcResult<Vec<u8>>;
}

/// Blocking TCP transport.
pub struct TcpChannel {
    stream: TcpStream,
}

impl TcpChannel {
    /// Wrap an established stream, applying the peer timeout to both
    /// directions. `None` waits indefinitely (the reference behavior).
    pub fn new(stream: TcpStream, timeout: Option<Duration>) -> GcResult<Self> {
        stream.set_read_timeout(timeout)?;
        stream.set_write_timeout(timeout)?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }
}

fn map_io(err: std::io::Error) -> GcError {
    match err.kind() {
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => GcError::Timeout,
        std::io::ErrorKind::UnexpectedEof
        | std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::BrokenPipe => GcError::ChannelClosed,
        _ => GcError::Io(err),
    }
}

impl GcChannel for TcpChannel {
    fn send(&mut self, bytes: &[u8]) -> GcResult<()> {
        if bytes.len() > MAX_FRAME_SIZE {
            return Err(GcError::FrameTooLarge(bytes.len()));
        }
        let len = (bytes.len() as u32).to_be_bytes();
        self.stream.write_all(&len).map_err(map_io)?;
        self.stream.write_all(bytes).map_err(map_io)?;
        self.stream.flush().map_err(map_io)?;
        Ok(())
    }

    fn recv(&mut self) -> GcResult<Vec<u8>> {
        let mut len_buf = [0u8; 4];
        self.stream.read_exact(&mut len_buf).map_err(map_io)?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(GcError::FrameTooLarge(len));
        }
        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf).map_err(map_io)?;
        Ok(buf)
    }
}

/// In-memory transport for tests: a pair of crossed channels.
pub struct MemoryChannel {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

/// Two connected in-memory endpoints.
pub fn memory_pair() -> (MemoryChannel, MemoryChannel) {
    let (tx_a, rx_b) = std::sync::mpsc::channel();
    let (tx_b, rx_a) = std::sync::mpsc::channel();
    (
        MemoryChannel { tx: tx_a, rx: rx_a },
        MemoryChannel { tx: tx_b, rx: rx_b },
    )
}

impl GcChannel for MemoryChannel {
    fn send(&mut self, bytes: &[u8]) -> GcResult<()> {
        self.tx
            .send(bytes.to_vec())
            .map_err(|_| GcError::ChannelClosed)
    }

    fn recv(&mut self) -> GcResult<Vec<u8>> {
        self.rx.recv().map_err(|_| GcError::ChannelClosed)
    }
}
