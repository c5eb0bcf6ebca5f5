// Core ADB value types
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What the device told us about itself in its CNXN reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub systemtype: String,
    pub serial: String,
    pub banner: String,
    pub version: u32,
    pub max_data: u32,
}

impl ConnectionInfo {
    /// Parses a `systemtype:serial:banner` CNXN payload.
    pub fn parse(payload: &[u8], version: u32, max_data: u32) -> Option<Self> {
        let text = String::from_utf8_lossy(payload);
        let text = text.trim_end_matches('\0');
        let mut parts = text.splitn(3, ':');
        let systemtype = parts.next()?;
        let serial = parts.next()?;
        let banner = parts.next()?;
        Some(Self {
            systemtype: systemtype.to_string(),
            serial: serial.to_string(),
            banner: banner.to_string(),
            version,
            max_data,
        })
    }

    /// `key=value;` pairs adbd puts in its banner (ro.product.model etc).
    pub fn properties(&self) -> BTreeMap<String, String> {
        self.banner
            .split(';')
            .filter_map(|pair| {
                let (key, value) = pair.split_once('=')?;
                let key = key.trim();
                (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
            })
            .collect()
    }
}

/// File metadata from a filesync STAT or DENT reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFileStat {
    pub filename: String,
    pub mode: u32,
    pub size: u32,
    pub mtime: u32,
}

impl DeviceFileStat {
    const S_IFMT: u32 = 0o170_000;
    const S_IFDIR: u32 = 0o040_000;
    const S_IFREG: u32 = 0o100_000;

    /// STAT of a missing path comes back as all zeroes.
    pub fn exists(&self) -> bool {
        self.mode != 0 || self.size != 0 || self.mtime != 0
    }

    pub fn is_dir(&self) -> bool {
        self.mode & Self::S_IFMT == Self::S_IFDIR
    }

    pub fn is_file(&self) -> bool {
        self.mode & Self::S_IFMT == Self::S_IFREG
    }

    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connection_banner() {
        let info = ConnectionInfo::parse(
            b"device:SERIAL123:ro.product.name=walleye;ro.product.model=Pixel 2;\0",
            0x0100_0000,
            4096,
        )
        .unwrap();

        assert_eq!(info.systemtype, "device");
        assert_eq!(info.serial, "SERIAL123");
        let props = info.properties();
        assert_eq!(props.get("ro.product.model").map(String::as_str), Some("Pixel 2"));
        assert_eq!(props.len(), 2);
    }

    #[test]
    fn test_banner_may_contain_colons() {
        let info = ConnectionInfo::parse(b"device::features=shell_v2,cmd:abb", 1, 1).unwrap();
        assert_eq!(info.serial, "");
        assert_eq!(info.banner, "features=shell_v2,cmd:abb");
    }

    #[test]
    fn test_malformed_banner_rejected() {
        assert!(ConnectionInfo::parse(b"device", 1, 1).is_none());
        assert!(ConnectionInfo::parse(b"device:serial", 1, 1).is_none());
    }

    #[test]
    fn test_file_mode_helpers() {
        let dir = DeviceFileStat {
            filename: "sdcard".into(),
            mode: 0o040_771,
            size: 4096,
            mtime: 1,
        };
        assert!(dir.is_dir());
        assert!(!dir.is_file());
        assert_eq!(dir.permissions(), 0o771);

        let missing = DeviceFileStat {
            filename: "nope".into(),
            mode: 0,
            size: 0,
            mtime: 0,
        };
        assert!(!missing.exists());
    }
}
