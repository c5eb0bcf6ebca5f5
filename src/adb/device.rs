// High level device handle: one Connection plus a lazily opened sync session.

use super::auth::AuthSigner;
use super::connection::Connection;
use super::error::AdbResult;
use super::filesync::FilesyncService;
use super::shell::{AsyncCommandHandle, ShellService};
use super::types::{ConnectionInfo, DeviceFileStat};
use crate::config::AdbConfig;
use crate::transport::Transport;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub struct AdbDevice {
    connection: Connection,
    shell: ShellService,
    filesync: Option<FilesyncService>,
    timeout: Duration,
}

impl AdbDevice {
    pub fn connect(
        transport: Arc<dyn Transport>,
        signers: &[&dyn AuthSigner],
        config: AdbConfig,
    ) -> AdbResult<Self> {
        Ok(Self::new(Connection::connect(transport, signers, config)?))
    }

    pub fn new(connection: Connection) -> Self {
        let timeout = connection.config().timeout;
        Self {
            shell: ShellService::new(connection.clone()),
            connection,
            filesync: None,
            timeout,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn info(&self) -> &ConnectionInfo {
        self.connection.info()
    }

    pub fn serial(&self) -> &str {
        self.connection.serial()
    }

    pub fn systemtype(&self) -> &str {
        self.connection.systemtype()
    }

    pub fn banner(&self) -> &str {
        self.connection.banner()
    }

    pub fn shell(&self, command: &str, timeout: Option<Duration>) -> AdbResult<String> {
        self.shell
            .command_string(command, false, timeout.unwrap_or(self.timeout))
    }

    pub fn async_shell(
        &self,
        command: &str,
        stdin: Option<Box<dyn Read + Send>>,
        stdout: Option<Box<dyn Write + Send>>,
        timeout: Option<Duration>,
    ) -> AdbResult<AsyncCommandHandle> {
        self.shell
            .async_command(command, stdin, stdout, false, timeout.unwrap_or(self.timeout))
    }

    pub fn push(&mut self, source: &mut dyn Read, device_path: &str, mode: Option<u32>) -> AdbResult<()> {
        self.with_filesync(|sync| sync.send(source, device_path, mode, None))
    }

    pub fn push_file(&mut self, local: &Path, device_path: &str) -> AdbResult<()> {
        let mut source = BufReader::new(File::open(local)?);
        log::info!("Pushing {} to {device_path}", local.display());
        self.push(&mut source, device_path, None)
    }

    /// Copies `device_path` into `dest`, returning the byte count.
    pub fn pull(&mut self, device_path: &str, dest: &mut dyn Write) -> AdbResult<u64> {
        self.with_filesync(|sync| sync.recv(device_path, dest))
    }

    pub fn pull_file(&mut self, device_path: &str, local: &Path) -> AdbResult<u64> {
        let mut dest = BufWriter::new(File::create(local)?);
        log::info!("Pulling {device_path} to {}", local.display());
        self.pull(device_path, &mut dest)
    }

    pub fn list(&mut self, path: &str) -> AdbResult<Vec<DeviceFileStat>> {
        self.with_filesync(|sync| sync.list(path)?.collect())
    }

    pub fn stat(&mut self, path: &str) -> AdbResult<DeviceFileStat> {
        self.with_filesync(|sync| sync.stat(path))
    }

    /// `target` is "" for a normal reboot, or e.g. "bootloader", "recovery".
    pub fn reboot(&self, target: &str) -> AdbResult<String> {
        self.service_command(&format!("reboot:{target}"))
    }

    pub fn remount(&self) -> AdbResult<String> {
        self.service_command("remount:")
    }

    pub fn root(&self) -> AdbResult<String> {
        self.service_command("root:")
    }

    /// Ends the sync session, if any, and drops the connection.
    pub fn close(mut self) {
        if let Some(sync) = self.filesync.take() {
            sync.close();
        }
        self.connection.close();
    }

    // One-shot services answer with a line of text and close the stream.
    fn service_command(&self, destination: &str) -> AdbResult<String> {
        let stream = self.connection.open_service(destination, self.timeout)?;
        let output = stream.read_until_close(self.timeout);
        stream.close();
        Ok(String::from_utf8_lossy(&output?).into_owned())
    }

    fn with_filesync<T>(
        &mut self,
        op: impl FnOnce(&mut FilesyncService) -> AdbResult<T>,
    ) -> AdbResult<T> {
        if self.filesync.as_ref().is_some_and(|sync| sync.stream().is_closed()) {
            self.filesync = None;
        }
        let sync = match self.filesync.take() {
            Some(sync) => sync,
            None => FilesyncService::using_connection(&self.connection, self.timeout)?,
        };
        let result = op(self.filesync.insert(sync));
        // A framing error leaves the session at an unknown position.
        if let Err(e) = &result
            && (e.is_protocol_error() || e.is_timeout())
            && let Some(sync) = self.filesync.take()
        {
            log::debug!("Dropping sync session after error: {e}");
            sync.stream().close();
        }
        result
    }
}

impl std::fmt::Debug for AdbDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdbDevice")
            .field("serial", &self.serial())
            .field("sync_open", &self.filesync.is_some())
            .finish()
    }
}
