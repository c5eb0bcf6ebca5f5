// ADB module - Android Debug Bridge protocol, pure Rust
// Talks directly to adbd over any Transport (USB bulk endpoints, TCP); no
// adb server/daemon on the host is involved.

pub mod adapter;
pub mod auth;
pub mod connection;
pub mod device;
pub mod error;
pub mod filesync;
pub mod message;
pub mod shell;
pub mod stream;
pub mod types;


// Re-export the main types for easy access
pub use auth::{AuthSigner, AuthType};
pub use connection::Connection;
pub use device::AdbDevice;
pub use error::{AdbError, AdbResult};
pub use filesync::FilesyncService;
pub use message::{AdbMessage, Command};
pub use shell::{AsyncCommandHandle, ShellCompletion, ShellService};
pub use stream::Stream;
pub use types::{ConnectionInfo, DeviceFileStat};
