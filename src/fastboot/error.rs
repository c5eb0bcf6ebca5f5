use crate::transport::UsbError;
use thiserror::Error;

/// A specialized `Result` type for Fastboot operations.
pub type FastbootResult<T> = Result<T, FastbootError>;

#[derive(Debug, Error)]
pub enum FastbootError {
    #[error("Fastboot transport error: {source}")]
    Usb {
        #[from]
        source: UsbError,
    },

    #[error("Expected {expected} from bootloader, got {actual}")]
    StateMismatch { expected: String, actual: String },

    #[error("Bootloader reported failure: {message}")]
    RemoteFailure { message: String },

    #[error("Invalid bootloader response {header:?}: {message:?}")]
    InvalidResponse { header: String, message: String },

    #[error("Bootloader accepted {accepted} bytes, {requested} were requested")]
    Transfer { requested: u64, accepted: u64 },

    #[error("Local I/O failed: {source}")]
    LocalIo {
        #[from]
        source: std::io::Error,
    },
}

impl FastbootError {
    /// Transport failures are the only ones worth retrying.
    pub fn is_usb_error(&self) -> bool {
        matches!(self, FastbootError::Usb { .. })
    }
}
