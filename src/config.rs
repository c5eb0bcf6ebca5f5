//! Tunables for the ADB and Fastboot stacks

use serde::{Deserialize, Serialize};
use std::time::Duration;

const ENV_TIMEOUT_SECS: &str = "ANDROID_USB_LINK_TIMEOUT_SECS";
const ENV_MAX_DATA: &str = "ANDROID_USB_LINK_MAX_DATA";
const ENV_CHUNK_KB: &str = "ANDROID_USB_LINK_CHUNK_KB";
const ENV_RETRIES: &str = "ANDROID_USB_LINK_RETRIES";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdbConfig {
    /// Sent to the device as `host::<banner>` in CNXN
    pub banner: String,
    /// Budget for the CNXN/AUTH exchange and for opening streams
    pub timeout: Duration,
    /// How long to wait for the user to accept a new key on the device
    pub auth_timeout: Duration,
    /// Largest payload we advertise; the device's CNXN may lower it
    pub max_data: u32,
    /// Stream ids wrap around at this value
    pub stream_id_limit: u32,
    /// Budget for the CLSE sent when a stream is dropped
    pub local_close_timeout: Duration,
}

impl Default for AdbConfig {
    fn default() -> Self {
        Self {
            banner: "android-usb-link".to_string(),
            timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(30),
            max_data: crate::adb::message::MAX_ADB_DATA,
            stream_id_limit: 1 << 31,
            local_close_timeout: Duration::from_millis(100),
        }
    }
}

impl AdbConfig {
    /// Small id space and short timeouts so exhaustion and expiry paths run fast
    pub fn for_tests() -> Self {
        Self {
            timeout: Duration::from_millis(500),
            auth_timeout: Duration::from_millis(200),
            stream_id_limit: 8,
            local_close_timeout: Duration::from_millis(50),
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    /// Defaults overridden by whatever `lookup` returns for the
    /// `ANDROID_USB_LINK_*` keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(secs) = lookup_number::<u64>(&lookup, ENV_TIMEOUT_SECS) {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(max_data) = lookup_number::<u32>(&lookup, ENV_MAX_DATA) {
            config.max_data = max_data;
        }
        config
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FastbootConfig {
    /// Download payload chunk size in KiB
    pub chunk_kb: usize,
    /// Default per-response timeout
    pub timeout: Duration,
    /// Extra attempts the retrying wrapper makes after a transport error
    pub num_retries: u32,
}

impl Default for FastbootConfig {
    fn default() -> Self {
        Self {
            chunk_kb: 1024,
            timeout: Duration::from_secs(10),
            num_retries: 3,
        }
    }
}

impl FastbootConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(secs) = lookup_number::<u64>(&lookup, ENV_TIMEOUT_SECS) {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(chunk_kb) = lookup_number::<usize>(&lookup, ENV_CHUNK_KB).filter(|kb| *kb > 0) {
            config.chunk_kb = chunk_kb;
        }
        if let Some(retries) = lookup_number::<u32>(&lookup, ENV_RETRIES) {
            config.num_retries = retries;
        }
        config
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_kb * 1024
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn lookup_number<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    parse_number(key, &lookup(key)?)
}

/// Bad values are logged and ignored.
fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Option<T> {
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Ignoring {key}={raw:?}: not a valid number");
            None
        }
    }
}
