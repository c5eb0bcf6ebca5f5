use crate::transport::UsbError;
use std::time::Duration;
use thiserror::Error;

/// A specialized `Result` type for ADB operations.
pub type AdbResult<T> = Result<T, AdbError>;

/// The error type for all ADB-related operations.
#[derive(Debug, Error)]
pub enum AdbError {
    #[error("ADB transport error: {source}")]
    Usb {
        #[from]
        source: UsbError,
    },

    #[error("ADB protocol error: {description}")]
    Protocol { description: String },

    #[error(
        "ADB message failed integrity check: expected {expected_length} bytes with checksum {expected_checksum:#x}, got {actual_length} bytes with checksum {actual_checksum:#x}"
    )]
    DataIntegrity {
        expected_length: u32,
        actual_length: u32,
        expected_checksum: u32,
        actual_checksum: u32,
    },

    #[error("Operation timed out after {duration:?}: {description}")]
    Timeout {
        duration: Duration,
        description: String,
    },

    #[error("Device authentication failed: {description}")]
    DeviceAuth { description: String },

    #[error("ADB stream {local_id} is closed")]
    StreamClosed { local_id: u32 },

    #[error("ADB stream unavailable: {description}")]
    StreamUnavailable { description: String },

    #[error("Device reported failure: {message}")]
    Remote { message: String },

    #[error("Invalid argument: {description}")]
    InvalidArgument { description: String },

    #[error("Local I/O failed: {source}")]
    LocalIo {
        #[from]
        source: std::io::Error,
    },
}

impl AdbError {
    pub fn protocol(description: impl Into<String>) -> Self {
        AdbError::Protocol {
            description: description.into(),
        }
    }

    pub fn timeout(duration: Duration, description: impl Into<String>) -> Self {
        AdbError::Timeout {
            duration,
            description: description.into(),
        }
    }

    /// True for both ADB-level deadlines and transport read/write timeouts.
    pub fn is_timeout(&self) -> bool {
        match self {
            AdbError::Timeout { .. } => true,
            AdbError::Usb { source } => source.is_timeout(),
            _ => false,
        }
    }

    pub fn is_stream_closed(&self) -> bool {
        matches!(self, AdbError::StreamClosed { .. })
    }

    pub fn is_protocol_error(&self) -> bool {
        matches!(self, AdbError::Protocol { .. })
    }
}
