//! Point-to-point serial link to the microcontroller.
//!
//! Inbound traffic is text: one decimal sample per `\n`-terminated line.
//! Outbound traffic is single command bytes. The two directions are split
//! into a [`LineSource`] and a [`CommandSink`] so that a reader thread and
//! the command dispatcher can share one open port.

use log::{debug, info};
use serial2::SerialPort;
use std::{
    fmt, io,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};
use thiserror::Error;

/// Baud rate the peer firmware is flashed with.
pub const DEFAULT_BAUD: u32 = 38400;

/// Longest partial line kept while waiting for a terminator. A decimal
/// sample never comes close.
pub const MAX_LINE_LEN: usize = 64;

/// Toggles the peer's record mode, in which it streams every captured sample.
pub const RECORD_TOGGLE: u8 = b'x';

/// Errors raised while talking to the peer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The port could not be opened. Fatal, never retried.
    #[error("failed to open serial port {port}: {source}")]
    Connection {
        /// Device path that was requested
        port: String,
        /// Underlying OS error
        source: io::Error,
    },

    /// No complete line arrived before the read timeout.
    #[error("timed out waiting for a line")]
    Timeout,

    /// The received bytes were not valid UTF-8.
    #[error("received a line that is not valid utf-8")]
    Decode,

    /// The line was text, but not a decimal sample.
    #[error("could not parse a sample from {0:?}")]
    Parse(String),

    /// The peer went away, or a replayed source ran dry.
    #[error("serial peer disconnected")]
    Disconnected,

    /// Every attempt of a bounded read failed.
    #[error("no valid sample after {0} attempts")]
    RetriesExhausted(usize),

    /// Bytes kept arriving without a line terminator.
    #[error("discarded {0} bytes without a line terminator")]
    LineTooLong(usize),

    /// Any other I/O failure on an open port. The feed treats it as a lost
    /// peer.
    #[error("serial io error: {0}")]
    Io(#[from] io::Error),
}

/// Something that yields newline-terminated text tokens, one per call.
pub trait LineSource: Send + 'static {
    /// Block until one line is available and return it, terminator included.
    fn read_line(&mut self) -> Result<String, TransportError>;
}

impl<L: LineSource + ?Sized> LineSource for Box<L> {
    fn read_line(&mut self) -> Result<String, TransportError> {
        (**self).read_line()
    }
}

/// Something that accepts single-byte commands for the peer.
pub trait CommandSink: Send {
    /// Send one command byte.
    fn write_byte(&mut self, byte: u8) -> Result<(), TransportError>;
}

impl<S: CommandSink + ?Sized> CommandSink for Box<S> {
    fn write_byte(&mut self, byte: u8) -> Result<(), TransportError> {
        (**self).write_byte(byte)
    }
}

/// Splits a byte stream into lines, keeping any partial line between reads.
#[derive(Debug, Default)]
pub struct LineFramer {
    pending: Vec<u8>,
}

impl LineFramer {
    /// Create an empty framer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Pop the next complete line, if one has been received. A partial line
    /// longer than [`MAX_LINE_LEN`] is dropped and reported as
    /// [`TransportError::LineTooLong`].
    pub fn next_line(&mut self) -> Option<Result<String, TransportError>> {
        let Some(end) = self.pending.iter().position(|&c| c == b'\n') else {
            if self.pending.len() > MAX_LINE_LEN {
                let dropped = self.pending.len();
                self.pending.clear();
                return Some(Err(TransportError::LineTooLong(dropped)));
            }
            return None;
        };
        let line: Vec<u8> = self.pending.drain(..=end).collect();
        // Often happens at the beginning of transmission when there is still
        // garbage in the hardware buffer
        Some(String::from_utf8(line).map_err(|_| TransportError::Decode))
    }
}

/// An open serial connection to the peer.
#[derive(Clone)]
pub struct SerialTransport {
    port: Arc<SerialPort>,
    name: String,
}

impl fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialTransport")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl SerialTransport {
    /// Open `port` at `baud` with the given per-read timeout.
    pub fn open(port: &str, baud: u32, read_timeout: Duration) -> Result<Self, TransportError> {
        let connection_error = |source| TransportError::Connection {
            port: port.to_string(),
            source,
        };
        let mut serial = SerialPort::open(port, baud).map_err(connection_error)?;
        serial
            .set_read_timeout(read_timeout)
            .map_err(connection_error)?;
        info!("Opened {} at {} baud", port, baud);

        Ok(Self {
            port: Arc::new(serial),
            name: port.to_string(),
        })
    }

    /// Device names the OS reports as serial ports.
    pub fn available_ports() -> Result<Vec<PathBuf>, TransportError> {
        Ok(SerialPort::available_ports()?)
    }

    /// Path of the open device.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The inbound half of the link.
    pub fn lines(&self) -> SerialLines {
        SerialLines {
            port: Arc::clone(&self.port),
            framer: LineFramer::new(),
        }
    }

    /// The outbound half of the link.
    pub fn commands(&self) -> SerialCommands {
        SerialCommands {
            port: Arc::clone(&self.port),
        }
    }
}

/// Reads lines off an open [`SerialTransport`].
pub struct SerialLines {
    port: Arc<SerialPort>,
    framer: LineFramer,
}

impl LineSource for SerialLines {
    fn read_line(&mut self) -> Result<String, TransportError> {
        let mut buffer = [0; 256];
        loop {
            if let Some(line) = self.framer.next_line() {
                return line;
            }
            let read_len = match self.port.read(&mut buffer) {
                Ok(0) => return Err(TransportError::Disconnected),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    return Err(TransportError::Timeout)
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            self.framer.push(&buffer[..read_len]);
        }
    }
}

/// Writes command bytes to an open [`SerialTransport`].
pub struct SerialCommands {
    port: Arc<SerialPort>,
}

impl CommandSink for SerialCommands {
    fn write_byte(&mut self, byte: u8) -> Result<(), TransportError> {
        self.port.write_all(&[byte])?;
        debug!("Sent command {:?}", byte as char);
        Ok(())
    }
}

/// A sink for sessions with no peer on the other end, such as file replay.
/// Commands are logged and kept for inspection.
#[derive(Debug, Clone, Default)]
pub struct LoggedCommands {
    sent: Arc<Mutex<Vec<u8>>>,
}

impl LoggedCommands {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every byte written so far, oldest first.
    pub fn sent(&self) -> Vec<u8> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl CommandSink for LoggedCommands {
    fn write_byte(&mut self, byte: u8) -> Result<(), TransportError> {
        info!("Command {:?}", byte as char);
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(byte);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framer_splits_lines() {
        let mut framer = LineFramer::new();
        framer.push(b"12\n-3");
        assert_eq!(framer.next_line().unwrap().unwrap(), "12\n");
        assert!(framer.next_line().is_none());

        framer.push(b"4\r\n7\n");
        assert_eq!(framer.next_line().unwrap().unwrap(), "-34\r\n");
        assert_eq!(framer.next_line().unwrap().unwrap(), "7\n");
        assert!(framer.next_line().is_none());
    }

    #[test]
    fn framer_flags_bad_utf8() {
        let mut framer = LineFramer::new();
        framer.push(&[0xFF, 0xFE, b'\n', b'5', b'\n']);
        assert!(matches!(
            framer.next_line(),
            Some(Err(TransportError::Decode))
        ));
        assert_eq!(framer.next_line().unwrap().unwrap(), "5\n");
    }

    #[test]
    fn framer_drops_runaway_partial_line() {
        let mut framer = LineFramer::new();
        framer.push(&[0xAA; 40]);
        assert!(framer.next_line().is_none());

        framer.push(&[0xAA; 40]);
        assert!(matches!(
            framer.next_line(),
            Some(Err(TransportError::LineTooLong(80)))
        ));
        assert!(framer.next_line().is_none());

        // The stream recovers at the next terminator
        framer.push(b"12\n");
        assert_eq!(framer.next_line().unwrap().unwrap(), "12\n");
    }

    #[test]
    fn logged_commands_keep_order() {
        let mut sink = LoggedCommands::new();
        let handle = sink.clone();
        sink.write_byte(b'x').unwrap();
        sink.write_byte(b'c').unwrap();
        assert_eq!(handle.sent(), vec![b'x', b'c']);
    }

    #[test]
    fn open_missing_port_is_connection_error() {
        let err = SerialTransport::open(
            "/dev/emolink-does-not-exist",
            DEFAULT_BAUD,
            Duration::from_millis(10),
        )
        .unwrap_err();
        assert!(matches!(err, TransportError::Connection { .. }));
    }
}
