//! Host side of the Android ADB and Fastboot protocols.
//!
//! [`adb`] multiplexes logical streams (shell, file sync, ...) over one
//! [`transport::Transport`]; [`fastboot`] drives a bootloader with plain
//! request/response exchanges over the same kind of transport.

pub mod adb;
pub mod config;
pub mod fastboot;
pub mod timeout;
pub mod transport;

pub use adb::{AdbDevice, AdbError, AdbResult, Connection};
pub use config::{AdbConfig, FastbootConfig};
pub use fastboot::{FastbootCommands, FastbootDevice, FastbootError, FastbootResult, RetryingDevice};
pub use transport::{TcpTransport, Transport, UsbError, UsbResult};
