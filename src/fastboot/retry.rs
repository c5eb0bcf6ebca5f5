// Retries Fastboot operations that fail at the transport level.

use super::commands::FastbootDevice;
use super::error::FastbootResult;
use super::protocol::{InfoCallback, ProgressCallback};
use std::thread;
use std::time::Duration;

pub const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Wraps any [`FastbootDevice`] so each call is retried up to
/// `num_retries` times after a USB error, `RETRY_DELAY` apart.
pub struct RetryingDevice<D> {
    inner: D,
    num_retries: u32,
    delay: Duration,
}

impl<D: FastbootDevice> RetryingDevice<D> {
    pub fn new(inner: D, num_retries: u32) -> Self {
        Self {
            inner,
            num_retries,
            delay: RETRY_DELAY,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    pub fn into_inner(self) -> D {
        self.inner
    }

    fn retry<T>(&self, operation: &str, mut call: impl FnMut(&D) -> FastbootResult<T>) -> FastbootResult<T> {
        let mut attempt = 0;
        loop {
            match call(&self.inner) {
                Err(e) if e.is_usb_error() && attempt < self.num_retries => {
                    attempt += 1;
                    log::warn!("fastboot {operation} failed ({e}), retry {attempt}/{}", self.num_retries);
                    thread::sleep(self.delay);
                }
                result => return result,
            }
        }
    }
}

impl<D: FastbootDevice> FastbootDevice for RetryingDevice<D> {
    fn download(&self, data: &[u8], info: InfoCallback<'_>, progress: ProgressCallback<'_>) -> FastbootResult<String> {
        self.retry("download", |device| device.download(data, &mut *info, &mut *progress))
    }

    fn flash(&self, partition: &str, timeout: Option<Duration>, info: InfoCallback<'_>) -> FastbootResult<String> {
        self.retry("flash", |device| device.flash(partition, timeout, &mut *info))
    }

    fn erase(&self, partition: &str, timeout: Option<Duration>, info: InfoCallback<'_>) -> FastbootResult<String> {
        self.retry("erase", |device| device.erase(partition, timeout, &mut *info))
    }

    fn getvar(&self, variable: &str, info: InfoCallback<'_>) -> FastbootResult<String> {
        self.retry("getvar", |device| device.getvar(variable, &mut *info))
    }

    fn oem(&self, command: &str, timeout: Option<Duration>, info: InfoCallback<'_>) -> FastbootResult<String> {
        self.retry("oem", |device| device.oem(command, timeout, &mut *info))
    }

    fn continue_boot(&self, info: InfoCallback<'_>) -> FastbootResult<String> {
        self.retry("continue", |device| device.continue_boot(&mut *info))
    }

    fn reboot(&self, target_mode: Option<&str>, info: InfoCallback<'_>) -> FastbootResult<String> {
        self.retry("reboot", |device| device.reboot(target_mode, &mut *info))
    }

    fn reboot_bootloader(&self, info: InfoCallback<'_>) -> FastbootResult<String> {
        self.retry("reboot-bootloader", |device| device.reboot_bootloader(&mut *info))
    }
}
