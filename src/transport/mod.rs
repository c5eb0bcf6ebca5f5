// Raw byte transport underneath both the ADB and Fastboot stacks.
// Device discovery and interface claiming live outside this crate; anything
// that can move bulk bytes in both directions with a timeout can implement
// Transport (a USB bulk endpoint pair, a TCP socket, a test double).

pub mod tcp;

#[cfg(test)]
pub mod mock;

use std::time::Duration;
use thiserror::Error;

pub use tcp::TcpTransport;

/// A specialized `Result` type for raw transport I/O.
pub type UsbResult<T> = Result<T, UsbError>;

/// The common I/O error kind raised by every transport.
///
/// Fastboot's retry wrapper retries exactly this error kind.
#[derive(Debug, Error)]
pub enum UsbError {
    #[error("Transport operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Transport read failed: {description}")]
    ReadFailed { description: String },

    #[error("Transport write failed: {description}")]
    WriteFailed { description: String },

    #[error("Transport is closed")]
    Closed,

    #[error("Transport I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl UsbError {
    pub fn is_timeout(&self) -> bool {
        match self {
            UsbError::Timeout { .. } => true,
            UsbError::Io { source } => matches!(
                source.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

/// Bulk byte pipe to a device.
///
/// Reads and writes take `&self` so that one thread can block in `read` while
/// another writes; implementations guard each direction independently.
pub trait Transport: Send + Sync {
    /// Reads up to `length` bytes. An empty result means the peer went away.
    fn read(&self, length: usize, timeout: Duration) -> UsbResult<Vec<u8>>;

    /// Writes all of `data`.
    fn write(&self, data: &[u8], timeout: Duration) -> UsbResult<()>;

    fn close(&self);

    fn is_closed(&self) -> bool;
}
