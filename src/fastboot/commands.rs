// Fastboot command set on top of FastbootProtocol.

use super::error::FastbootResult;
use super::protocol::{FastbootProtocol, InfoCallback, ProgressCallback, ResponseHeader};
use crate::config::FastbootConfig;
use crate::transport::Transport;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Operations a bootloader in fastboot mode understands. Each returns the
/// text of the terminal OKAY.
pub trait FastbootDevice {
    /// Uploads `data` to the bootloader's staging buffer.
    fn download(&self, data: &[u8], info: InfoCallback<'_>, progress: ProgressCallback<'_>) -> FastbootResult<String>;

    /// Writes the staged buffer to `partition`.
    fn flash(&self, partition: &str, timeout: Option<Duration>, info: InfoCallback<'_>) -> FastbootResult<String>;

    fn erase(&self, partition: &str, timeout: Option<Duration>, info: InfoCallback<'_>) -> FastbootResult<String>;

    fn getvar(&self, variable: &str, info: InfoCallback<'_>) -> FastbootResult<String>;

    fn oem(&self, command: &str, timeout: Option<Duration>, info: InfoCallback<'_>) -> FastbootResult<String>;

    /// Leaves fastboot and continues the normal boot.
    fn continue_boot(&self, info: InfoCallback<'_>) -> FastbootResult<String>;

    /// Reboots, optionally into `target_mode` (e.g. "recovery").
    fn reboot(&self, target_mode: Option<&str>, info: InfoCallback<'_>) -> FastbootResult<String>;

    fn reboot_bootloader(&self, info: InfoCallback<'_>) -> FastbootResult<String>;

    /// Reads `path`, downloads it and flashes it to `partition`.
    fn flash_from_file(
        &self,
        partition: &str,
        path: &Path,
        info: InfoCallback<'_>,
        progress: ProgressCallback<'_>,
    ) -> FastbootResult<String> {
        let image = std::fs::read(path)?;
        log::info!("Flashing {} ({} bytes) to {partition}", path.display(), image.len());
        self.download(&image, &mut *info, progress)?;
        self.flash(partition, None, info)
    }
}

pub struct FastbootCommands {
    protocol: FastbootProtocol,
    config: FastbootConfig,
}

impl FastbootCommands {
    pub fn new(transport: Arc<dyn Transport>, config: FastbootConfig) -> Self {
        Self {
            protocol: FastbootProtocol::new(transport, config.chunk_size()),
            config,
        }
    }

    pub fn protocol(&self) -> &FastbootProtocol {
        &self.protocol
    }

    pub fn config(&self) -> &FastbootConfig {
        &self.config
    }

    pub fn close(&self) {
        self.protocol.transport().close();
    }

    fn simple_command(
        &self,
        command: &str,
        arg: Option<&str>,
        timeout: Option<Duration>,
        info: InfoCallback<'_>,
    ) -> FastbootResult<String> {
        let timeout = timeout.unwrap_or(self.config.timeout);
        self.protocol.send_command(command, arg, timeout)?;
        self.protocol
            .handle_simple_responses(ResponseHeader::Okay, timeout, info)
    }
}

impl FastbootDevice for FastbootCommands {
    fn download(&self, data: &[u8], info: InfoCallback<'_>, progress: ProgressCallback<'_>) -> FastbootResult<String> {
        let timeout = self.config.timeout;
        let size = format!("{:08x}", data.len());
        self.protocol.send_command("download", Some(&size), timeout)?;
        self.protocol.handle_data_sending(data, timeout, info, progress)
    }

    fn flash(&self, partition: &str, timeout: Option<Duration>, info: InfoCallback<'_>) -> FastbootResult<String> {
        self.simple_command("flash", Some(partition), timeout, info)
    }

    fn erase(&self, partition: &str, timeout: Option<Duration>, info: InfoCallback<'_>) -> FastbootResult<String> {
        self.simple_command("erase", Some(partition), timeout, info)
    }

    fn getvar(&self, variable: &str, info: InfoCallback<'_>) -> FastbootResult<String> {
        self.simple_command("getvar", Some(variable), None, info)
    }

    fn oem(&self, command: &str, timeout: Option<Duration>, info: InfoCallback<'_>) -> FastbootResult<String> {
        // oem takes its argument after a space, not a colon
        self.simple_command(&format!("oem {command}"), None, timeout, info)
    }

    fn continue_boot(&self, info: InfoCallback<'_>) -> FastbootResult<String> {
        self.simple_command("continue", None, None, info)
    }

    fn reboot(&self, target_mode: Option<&str>, info: InfoCallback<'_>) -> FastbootResult<String> {
        self.simple_command("reboot", target_mode, None, info)
    }

    fn reboot_bootloader(&self, info: InfoCallback<'_>) -> FastbootResult<String> {
        self.simple_command("reboot-bootloader", None, None, info)
    }
}
