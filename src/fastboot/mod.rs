// Fastboot module - bootloader flashing protocol
// One request, one response cycle straight over a Transport.

pub mod commands;
pub mod error;
pub mod protocol;
pub mod retry;


pub use commands::{FastbootCommands, FastbootDevice};
pub use error::{FastbootError, FastbootResult};
pub use protocol::{FastbootProtocol, InfoCallback, ProgressCallback, ResponseHeader};
pub use retry::RetryingDevice;
